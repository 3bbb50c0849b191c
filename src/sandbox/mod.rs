//! Execution sandbox for extension configuration scripts.
//!
//! Scripts run as the body of an implicit function inside a fresh,
//! disposable QuickJS realm. Visible names are exactly the bindings of
//! the `SandboxContext`, `console`, `require` and the JS intrinsics.
//! `require` is gated by two allow-lists (built-in module names,
//! external package names), both empty unless configured. Console
//! output never reaches an ambient stream; it is delivered as events
//! on a channel handed out at construction.
//!
//! Every execution gets its own runtime with a wall-clock budget, a
//! memory cap and a stack cap. `run` consumes the sandbox, so an
//! environment cannot be reused across scripts.

mod modules;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::prelude::Func;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Exception, Function, Runtime};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// A synchronous host function exposed to scripts. Arguments and
/// result cross the boundary as plain JSON; an `Err` becomes a thrown
/// exception inside the script.
pub type HostFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, String> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("script failed to parse: {message}")]
    Syntax { message: String },

    #[error("script failed: {message}")]
    Script { message: String },

    #[error("import of '{module}' denied by policy")]
    ImportDenied { module: String },

    #[error("script exceeded its {limit:?} budget")]
    Timeout { limit: Duration },

    #[error("sandbox internal failure: {message}")]
    Internal { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    fn from_label(label: &str) -> Self {
        match label {
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            "debug" => Self::Debug,
            _ => Self::Log,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

/// Diagnostic output captured from a running script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxEvent {
    Console { level: ConsoleLevel, text: String },
}

/// The two `require` allow-lists. Both default to empty, which denies
/// every import.
#[derive(Debug, Clone, Default)]
pub struct ImportPolicy {
    pub builtin: Vec<String>,
    pub external: Vec<String>,
}

impl ImportPolicy {
    pub fn new(builtin: Vec<String>, external: Vec<String>) -> Self {
        Self { builtin, external }
    }

    pub fn deny_all() -> Self {
        Self::default()
    }
}

/// Resource bounds for one execution.
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub memory_bytes: usize,
    pub stack_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_bytes: 32 * 1024 * 1024,
            stack_bytes: 512 * 1024,
        }
    }
}

/// The explicit binding set for one script execution: named JSON
/// values, named host functions and the sources of allow-listed
/// external modules.
#[derive(Clone, Default)]
pub struct SandboxContext {
    bindings: Vec<(String, Value)>,
    functions: Vec<(String, HostFn)>,
    modules: BTreeMap<String, String>,
}

impl SandboxContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.push((name.into(), value));
    }

    pub fn bind_function(&mut self, name: impl Into<String>, function: HostFn) {
        self.functions.push((name.into(), function));
    }

    pub fn register_module(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.modules.insert(name.into(), source.into());
    }
}

/// Installs `console` and `require`, then drops the raw host shims so
/// scripts only ever see the public surface.
const BOOTSTRAP: &str = r#"
(() => {
  const emit = __console_emit;
  const gate = __require_gate;
  const moduleSource = __module_source;
  delete globalThis.__console_emit;
  delete globalThis.__require_gate;
  delete globalThis.__module_source;
  delete globalThis.__host_invoke;
  const format = (args) => args.map((a) => {
    if (typeof a === "string") return a;
    if (a === undefined) return "undefined";
    const json = JSON.stringify(a);
    return json === undefined ? String(a) : json;
  }).join(" ");
  globalThis.console = {};
  for (const level of ["log", "info", "warn", "error", "debug"]) {
    globalThis.console[level] = (...args) => emit(level, format(args));
  }
  globalThis.require = (name) => {
    const kind = gate(String(name));
    if (kind === "builtin") {
      const mod = globalThis["__builtin_" + name];
      if (mod === undefined) {
        throw new Error("no such built-in module: " + name);
      }
      return mod;
    }
    const source = moduleSource(String(name));
    return new Function(source)();
  };
})();
"#;

/// One script execution: construct, `run`, discard.
pub struct Sandbox {
    context: SandboxContext,
    source: String,
    policy: ImportPolicy,
    limits: SandboxLimits,
    events: UnboundedSender<SandboxEvent>,
}

impl Sandbox {
    /// Returns the sandbox plus the receiving end of its console
    /// event channel.
    pub fn new(
        context: SandboxContext,
        source: impl Into<String>,
        policy: ImportPolicy,
    ) -> (Self, UnboundedReceiver<SandboxEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let sandbox = Self {
            context,
            source: source.into(),
            policy,
            limits: SandboxLimits::default(),
            events,
        };
        (sandbox, receiver)
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Executes the script and resolves to its returned value as plain
    /// JSON. The evaluation runs on a blocking thread; the engine never
    /// migrates.
    pub async fn run(self) -> Result<Value, SandboxError> {
        debug!(bytes = self.source.len(), "evaluating sandbox script");
        tokio::task::spawn_blocking(move || self.evaluate())
            .await
            .map_err(|error| SandboxError::Internal {
                message: format!("sandbox thread failed: {error}"),
            })?
    }

    fn evaluate(self) -> Result<Value, SandboxError> {
        let runtime = Runtime::new().map_err(|error| SandboxError::Internal {
            message: format!("runtime construction: {error}"),
        })?;
        runtime.set_memory_limit(self.limits.memory_bytes);
        runtime.set_max_stack_size(self.limits.stack_bytes);

        let started = Instant::now();
        let budget = self.limits.timeout;
        runtime.set_interrupt_handler(Some(Box::new(move || started.elapsed() > budget)));

        let context = Context::full(&runtime).map_err(|error| SandboxError::Internal {
            message: format!("context construction: {error}"),
        })?;

        let mut bindings = Vec::with_capacity(self.context.bindings.len());
        for (name, value) in &self.context.bindings {
            let text = serde_json::to_string(value).map_err(|error| SandboxError::Internal {
                message: format!("binding '{name}': {error}"),
            })?;
            bindings.push((name.clone(), text));
        }

        let denied: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

        context.with(|ctx| {
            self.install(&ctx, &bindings, &denied)
                .map_err(|error| SandboxError::Internal {
                    message: format!("sandbox setup: {error}"),
                })?;

            let wrapped = format!("(function() {{\n{}\n}})", self.source);
            let body = match ctx.eval::<Function, _>(wrapped).catch(&ctx) {
                Ok(body) => body,
                Err(caught) => {
                    return Err(SandboxError::Syntax {
                        message: describe(&caught),
                    })
                }
            };

            let value = match body.call::<_, rquickjs::Value>(()).catch(&ctx) {
                Ok(value) => value,
                Err(caught) => {
                    let message = describe(&caught);
                    return Err(self.classify(message, denied.borrow_mut().take(), started));
                }
            };

            let text = match ctx.json_stringify(value).catch(&ctx) {
                Ok(Some(text)) => text.to_string().map_err(|error| SandboxError::Internal {
                    message: format!("result extraction: {error}"),
                })?,
                Ok(None) => return Ok(Value::Null),
                Err(caught) => {
                    return Err(SandboxError::Script {
                        message: format!("returned value is not plain data: {}", describe(&caught)),
                    })
                }
            };
            serde_json::from_str(&text).map_err(|error| SandboxError::Internal {
                message: format!("result extraction: {error}"),
            })
        })
    }

    fn install(
        &self,
        ctx: &Ctx<'_>,
        bindings: &[(String, String)],
        denied: &Rc<RefCell<Option<String>>>,
    ) -> rquickjs::Result<()> {
        let globals = ctx.globals();

        let events = self.events.clone();
        globals.set(
            "__console_emit",
            Func::from(move |level: String, text: String| {
                let _ = events.send(SandboxEvent::Console {
                    level: ConsoleLevel::from_label(&level),
                    text,
                });
            }),
        )?;

        let policy = self.policy.clone();
        let denied_cell = Rc::clone(denied);
        globals.set(
            "__require_gate",
            Func::from(
                move |ctx: Ctx<'_>, name: String| -> rquickjs::Result<String> {
                    if policy.builtin.iter().any(|allowed| allowed == &name) {
                        return Ok("builtin".to_string());
                    }
                    if policy.external.iter().any(|allowed| allowed == &name) {
                        return Ok("external".to_string());
                    }
                    *denied_cell.borrow_mut() = Some(name.clone());
                    Err(Exception::throw_message(
                        &ctx,
                        &format!("import denied: '{name}' is not allow-listed"),
                    ))
                },
            ),
        )?;

        let module_sources = self.context.modules.clone();
        globals.set(
            "__module_source",
            Func::from(
                move |ctx: Ctx<'_>, name: String| -> rquickjs::Result<String> {
                    match module_sources.get(&name) {
                        Some(source) => Ok(source.clone()),
                        None => Err(Exception::throw_message(
                            &ctx,
                            &format!("no source registered for external module '{name}'"),
                        )),
                    }
                },
            ),
        )?;

        let functions: HashMap<String, HostFn> = self.context.functions.iter().cloned().collect();
        globals.set(
            "__host_invoke",
            Func::from(
                move |ctx: Ctx<'_>, name: String, args_json: String| -> rquickjs::Result<String> {
                    let function = functions.get(&name).ok_or_else(|| {
                        Exception::throw_message(&ctx, &format!("unknown host function '{name}'"))
                    })?;
                    let args: Vec<Value> = serde_json::from_str(&args_json).map_err(|error| {
                        Exception::throw_message(&ctx, &format!("host call arguments: {error}"))
                    })?;
                    match function(args) {
                        Ok(value) => serde_json::to_string(&value).map_err(|error| {
                            Exception::throw_message(
                                &ctx,
                                &format!("host result for '{name}': {error}"),
                            )
                        }),
                        Err(reason) => Err(Exception::throw_message(
                            &ctx,
                            &format!("{name}: {reason}"),
                        )),
                    }
                },
            ),
        )?;

        for (name, text) in bindings {
            globals.set(name.as_str(), ctx.json_parse(text.clone())?)?;
        }

        let mut shims = String::new();
        for (name, _) in &self.context.functions {
            let quoted = js_quote(name);
            shims.push_str(&format!(
                "globalThis[{quoted}] = ((invoke) => (...args) => \
                 JSON.parse(invoke({quoted}, JSON.stringify(args))))(__host_invoke);\n"
            ));
        }
        if !shims.is_empty() {
            ctx.eval::<(), _>(shims)?;
        }

        for name in &self.policy.builtin {
            modules::install(ctx, name)?;
        }

        ctx.eval::<(), _>(BOOTSTRAP)
    }

    fn classify(&self, message: String, denied: Option<String>, started: Instant) -> SandboxError {
        if started.elapsed() >= self.limits.timeout && message.to_lowercase().contains("interrupt")
        {
            return SandboxError::Timeout {
                limit: self.limits.timeout,
            };
        }
        if let Some(module) = denied {
            if message.contains("import denied") {
                return SandboxError::ImportDenied { module };
            }
        }
        SandboxError::Script { message }
    }
}

fn describe(caught: &CaughtError<'_>) -> String {
    match caught {
        CaughtError::Exception(exception) => {
            let mut message = exception
                .message()
                .unwrap_or_else(|| "uncaught exception".to_string());
            if let Some(stack) = exception.stack() {
                if !stack.is_empty() {
                    message.push('\n');
                    message.push_str(&stack);
                }
            }
            message
        }
        CaughtError::Value(value) => {
            if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
                text
            } else {
                format!("uncaught value of type {:?}", value.type_of())
            }
        }
        CaughtError::Error(error) => error.to_string(),
    }
}

fn js_quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            control if (control as u32) < 0x20 => {
                quoted.push_str(&format!("\\u{:04x}", control as u32));
            }
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

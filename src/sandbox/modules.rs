//! Modules shipped with the sandbox, resolvable through `require`.
//!
//! Each module is a plain object of native functions, installed as a
//! `__builtin_<name>` global when its name is on the built-in
//! allow-list. Names on the list without a module here fail at
//! `require` time inside the script.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use rquickjs::prelude::Func;
use rquickjs::{Ctx, Exception, Object};

/// Installs `name` under `__builtin_<name>` when it is one of the
/// shipped modules. Unknown names are left alone; the `require` shim
/// reports them.
pub(crate) fn install(ctx: &Ctx<'_>, name: &str) -> rquickjs::Result<()> {
    let module = match name {
        "b64" => b64_module(ctx)?,
        "hex" => hex_module(ctx)?,
        "datetime" => datetime_module(ctx)?,
        _ => return Ok(()),
    };
    ctx.globals().set(format!("__builtin_{name}"), module)
}

fn b64_module<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    let module = Object::new(ctx.clone())?;
    module.set("encode", Func::from(b64_encode))?;
    module.set("decode", Func::from(b64_decode))?;
    Ok(module)
}

fn hex_module<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    let module = Object::new(ctx.clone())?;
    module.set("encode", Func::from(hex_encode))?;
    module.set("decode", Func::from(hex_decode))?;
    Ok(module)
}

fn datetime_module<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    let module = Object::new(ctx.clone())?;
    module.set("now_iso", Func::from(datetime_now_iso))?;
    module.set("timestamp", Func::from(datetime_timestamp))?;
    Ok(module)
}

fn b64_encode(text: String) -> String {
    STANDARD.encode(text.as_bytes())
}

fn b64_decode(ctx: Ctx<'_>, text: String) -> rquickjs::Result<String> {
    let bytes = STANDARD
        .decode(text.as_bytes())
        .map_err(|error| Exception::throw_message(&ctx, &format!("b64.decode: {error}")))?;
    String::from_utf8(bytes)
        .map_err(|error| Exception::throw_message(&ctx, &format!("b64.decode: {error}")))
}

fn hex_encode(text: String) -> String {
    hex::encode(text.as_bytes())
}

fn hex_decode(ctx: Ctx<'_>, text: String) -> rquickjs::Result<String> {
    let bytes = hex::decode(text.as_bytes())
        .map_err(|error| Exception::throw_message(&ctx, &format!("hex.decode: {error}")))?;
    String::from_utf8(bytes)
        .map_err(|error| Exception::throw_message(&ctx, &format!("hex.decode: {error}")))
}

fn datetime_now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn datetime_timestamp() -> f64 {
    Utc::now().timestamp() as f64
}

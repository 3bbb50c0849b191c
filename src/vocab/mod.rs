//! The per-item vocabulary: a filter registry merged from built-ins and
//! bridged capabilities, plus the resolver table.
//!
//! Lookup is strict. An unknown name is a typed error carrying the
//! attempted name and the full sorted list of valid names; there is no
//! way to get an absent entry out of the registry and fail later.

mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::error::RenderError;

/// The filter calling convention: piped value plus extra arguments.
pub type FilterFn =
    Arc<dyn Fn(Value, Vec<Value>) -> BoxFuture<'static, Result<Value, RenderError>> + Send + Sync>;

/// The resolver calling convention: bare arguments, no piped value.
pub type ResolverFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RenderError>> + Send + Sync>;

/// Wraps a synchronous filter into the async calling convention.
fn sync_filter(f: fn(Value, Vec<Value>) -> Result<Value, RenderError>) -> FilterFn {
    Arc::new(move |value, args| Box::pin(std::future::ready(f(value, args))))
}

/// Everything a template expression can call during one item's render.
///
/// Built fresh per item and discarded after the render completes.
pub struct Vocabulary {
    filters: HashMap<String, FilterFn>,
    resolvers: HashMap<String, ResolverFn>,
}

impl Vocabulary {
    /// A vocabulary holding only the built-in filters and no resolvers.
    pub fn with_builtins() -> Self {
        let mut filters: HashMap<String, FilterFn> = HashMap::new();
        filters.insert("json_stringify".to_string(), sync_filter(builtin::json_stringify));
        filters.insert("json_parse".to_string(), sync_filter(builtin::json_parse));
        filters.insert("length".to_string(), sync_filter(builtin::length));
        Self {
            filters,
            resolvers: HashMap::new(),
        }
    }

    /// An empty vocabulary, without even the built-ins.
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
            resolvers: HashMap::new(),
        }
    }

    /// Registers a filter. A dynamic entry silently overrides a built-in
    /// of the same name.
    pub fn insert_filter(&mut self, name: impl Into<String>, filter: FilterFn) {
        let name = name.into();
        if self.filters.insert(name.clone(), filter).is_some() {
            debug!(filter = %name, "dynamic filter overrides existing entry");
        } else {
            debug!(filter = %name, "registered filter");
        }
    }

    /// Registers a resolver under its raw, unsanitized name.
    pub fn insert_resolver(&mut self, name: impl Into<String>, resolver: ResolverFn) {
        let name = name.into();
        debug!(resolver = %name, "registered resolver");
        self.resolvers.insert(name, resolver);
    }

    pub fn lookup_filter(&self, name: &str) -> Result<&FilterFn, RenderError> {
        self.filters.get(name).ok_or_else(|| RenderError::UnknownFilter {
            name: name.to_string(),
            available: self.filter_names(),
        })
    }

    pub fn lookup_resolver(&self, name: &str) -> Result<&ResolverFn, RenderError> {
        self.resolvers.get(name).ok_or_else(|| RenderError::UnknownResolver {
            name: name.to_string(),
            available: self.resolver_names(),
        })
    }

    /// All registered filter names, sorted.
    pub fn filter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered resolver names, sorted.
    pub fn resolver_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resolvers.keys().cloned().collect();
        names.sort();
        names
    }
}

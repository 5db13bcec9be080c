//! Host API: namespaced native functions callable from scripts
//!
//! Scripts reach the host only through functions registered here, named by
//! dotted path (`math.abs`, `net.http.get`) or, for `extern` declarations,
//! by `library::name`. The sandbox decides which namespaces a script may
//! reference before it ever runs.

mod context;
pub mod stdlib;

pub use context::{CancelToken, HeapCharge, MemoryMeter, NativeContext};

use crate::value::{RuntimeError, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Host function signature
pub type NativeFn =
    Arc<dyn Fn(&NativeContext, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Registry of host functions available to scripts
#[derive(Clone, Default)]
pub struct HostApi {
    functions: BTreeMap<String, NativeFn>,
}

impl HostApi {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `math`, `string`, `array`, `log` and `time` namespaces
    pub fn with_stdlib() -> Self {
        let mut host = Self::new();
        stdlib::register(&mut host);
        host
    }

    /// Register a namespaced function, replacing any previous registration
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&NativeContext, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Register a function exported by a native library for `extern fn` bindings
    pub fn register_library_fn<F>(&mut self, library: &str, name: &str, function: F)
    where
        F: Fn(&NativeContext, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.register(library_key(library, name), function);
    }

    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for HostApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostApi")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry key for a native library export
pub fn library_key(library: &str, name: &str) -> String {
    format!("{}::{}", library, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_call() {
        let mut host = HostApi::new();
        host.register("entity.count", |_, _| Ok(Value::Int(3)));
        let ctx = NativeContext::unbounded("test");
        let f = host.get("entity.count").unwrap();
        assert_eq!(f(&ctx, &[]).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_library_functions_use_separate_keys() {
        let mut host = HostApi::new();
        host.register_library_fn("crypto", "hash", |_, _| Ok(Value::Null));
        assert!(host.contains("crypto::hash"));
        assert!(!host.contains("crypto.hash"));
    }

    #[test]
    fn test_stdlib_namespaces_present() {
        let host = HostApi::with_stdlib();
        for name in ["math.abs", "string.len", "array.new", "log.info", "time.elapsed_ms"] {
            assert!(host.contains(name), "missing {}", name);
        }
    }
}

//! Warden Sandbox - contained execution of untrusted scripts
//!
//! Source flows through four stages:
//! - [`StaticValidator`] rejects disallowed namespaces, constructs and
//!   string patterns before anything is compiled
//! - [`CompileCache`] compiles validated source once per content hash
//! - [`IsolatedExecutor`] runs the compiled unit on a dedicated worker under
//!   the profile's timeout, memory ceiling and stack ceiling
//! - [`ViolationReporter`] turns what happened into an [`ExecutionResult`]
//!   and an audit trail
//!
//! [`Sandbox`] ties the stages together behind `execute_script`.
//!
//! Containment is in-process: a worker that runs host code which never
//! returns can be abandoned but not killed. Deployments that need a hard
//! guarantee should run the sandbox in a supervised child process.

pub mod cache;
pub mod executor;
pub mod profile;
pub mod reporter;
pub mod result;
pub mod sandbox;
pub mod validator;

pub use cache::{
    CacheError, CacheStats, CompileCache, CompileError, CompiledUnit, ContentHash, WarmReport,
};
pub use executor::{ExecutorStats, IsolatedExecutor};
pub use profile::{
    NamespaceAccess, PermissionProfile, PermissionProfileBuilder, PermissionTier, ProfileError,
};
pub use reporter::{EventSink, MemoryEventSink, NullEventSink, ViolationReporter, AUDIT_TARGET};
pub use result::{
    AuditRecord, EventCategory, ExecutionResult, ExecutionState, FailureKind, SecurityEvent,
    Severity,
};
pub use sandbox::{Sandbox, SandboxOptions};
pub use validator::{StaticValidator, ValidationResult};

pub use warden_script::{CancelToken, Diagnostic, HostApi, NativeContext, RuntimeError, Value};

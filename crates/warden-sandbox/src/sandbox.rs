//! Sandbox facade
//!
//! `execute_script` is the single entry point hosts need: it validates,
//! compiles (or reuses), runs and reports, and always returns an
//! [`ExecutionResult`] no matter how the script misbehaves.

use crate::cache::{CacheError, CacheStats, CompileCache, CompileError, CompiledUnit, WarmReport};
use crate::executor::{ExecutorStats, IsolatedExecutor, DEFAULT_POLL_INTERVAL};
use crate::profile::PermissionProfile;
use crate::reporter::{EventSink, NullEventSink, ViolationReporter};
use crate::result::{EventCategory, ExecutionResult, ExecutionState, FailureKind, SecurityEvent};
use crate::validator::{StaticValidator, ValidationResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use warden_config::{ConfigResult, WardenConfig};
use warden_script::diagnostic::codes;
use warden_script::{
    sort_diagnostics, CancelToken, Diagnostic, HostApi, NativeContext, RuntimeError, Span, Value,
};

/// Construction options for [`Sandbox`]
pub struct SandboxOptions {
    pub cache_capacity: usize,
    pub validator: StaticValidator,
    /// Host functions scripts may call, subject to their profile
    pub host: HostApi,
    pub sink: Arc<dyn EventSink>,
    pub poll_interval: Duration,
    /// Compiled units are loaded from here at startup when set
    pub persist_dir: Option<PathBuf>,
}

impl SandboxOptions {
    pub fn with_host(mut self, host: HostApi) -> Self {
        self.host = host;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_validator(mut self, validator: StaticValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            cache_capacity: crate::cache::DEFAULT_CAPACITY,
            validator: StaticValidator::default(),
            host: HostApi::with_stdlib(),
            sink: Arc::new(NullEventSink),
            poll_interval: DEFAULT_POLL_INTERVAL,
            persist_dir: None,
        }
    }
}

pub struct Sandbox {
    validator: StaticValidator,
    cache: CompileCache,
    executor: IsolatedExecutor,
    reporter: ViolationReporter,
    host: RwLock<Arc<HostApi>>,
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Self {
        let sandbox = Self {
            validator: options.validator,
            cache: CompileCache::new(options.cache_capacity),
            executor: IsolatedExecutor::new().with_poll_interval(options.poll_interval),
            reporter: ViolationReporter::new(options.sink),
            host: RwLock::new(Arc::new(options.host)),
        };
        if let Some(dir) = &options.persist_dir {
            match sandbox.warm_cache(dir) {
                Ok(report) => tracing::debug!(
                    loaded = report.loaded,
                    discarded = report.discarded,
                    dir = %dir.display(),
                    "warmed compile cache"
                ),
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), "failed to warm compile cache: {}", e)
                }
            }
        }
        sandbox
    }

    /// Sandbox configured from `[cache]` and `[validator]`, with the standard library host
    pub fn from_config(config: &WardenConfig) -> ConfigResult<Self> {
        let options = SandboxOptions {
            cache_capacity: config.cache().capacity(),
            validator: StaticValidator::from_settings(config.validator())?,
            persist_dir: config.cache().persist_dir.clone(),
            ..SandboxOptions::default()
        };
        Ok(Self::new(options))
    }

    fn host(&self) -> Arc<HostApi> {
        Arc::clone(
            &self
                .host
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    fn update_host(&self, update: impl FnOnce(&mut HostApi)) {
        let mut guard = self
            .host
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut host = HostApi::clone(&guard);
        update(&mut host);
        *guard = Arc::new(host);
        // Cached units were linked against the old registry
        self.cache.clear();
    }

    /// Register a namespaced host function such as `entity.spawn`
    pub fn register_namespace_fn<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&NativeContext, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.update_host(|host| host.register(name, function));
    }

    /// Register a native library export for `extern fn` declarations
    pub fn register_library_fn<F>(&self, library: &str, name: &str, function: F)
    where
        F: Fn(&NativeContext, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.update_host(|host| host.register_library_fn(library, name, function));
    }

    pub fn validate(&self, source: &str, profile: &PermissionProfile) -> ValidationResult {
        self.validator.validate(source, profile)
    }

    /// Compile without validating; the result is cached
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledUnit>, CompileError> {
        self.cache.get_or_compile(source, &self.host())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    pub fn persist_cache(&self, dir: &Path) -> Result<usize, CacheError> {
        self.cache.persist(dir)
    }

    pub fn warm_cache(&self, dir: &Path) -> Result<WarmReport, CacheError> {
        self.cache.warm_from(dir, &self.host())
    }

    /// Validate, compile and run `entry_point` of `source` under `profile`
    ///
    /// `entry_point` is a function name, or `""` for the top-level body.
    pub fn execute_script(
        &self,
        source: &str,
        entry_point: &str,
        args: Vec<Value>,
        profile: &PermissionProfile,
    ) -> ExecutionResult {
        self.execute_script_cancellable(source, entry_point, args, profile, &CancelToken::new())
    }

    /// Like [`execute_script`](Self::execute_script), stopping when `cancel` is raised
    pub fn execute_script_cancellable(
        &self,
        source: &str,
        entry_point: &str,
        args: Vec<Value>,
        profile: &PermissionProfile,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let script_id = profile.script_id();

        let validation = self.validator.validate(source, profile);
        if !validation.ok {
            let kind = if validation.violations.is_empty() {
                FailureKind::CompileError
            } else {
                FailureKind::StaticRejection
            };
            return self.short_circuit(
                script_id,
                kind,
                validation.violations,
                validation.diagnostics,
                started,
            );
        }

        let host = self.host();
        let unit = match self.cache.get_or_compile(source, &host) {
            Ok(unit) => unit,
            Err(e) => {
                return self.short_circuit(
                    script_id,
                    FailureKind::CompileError,
                    validation.violations,
                    locate(e.into_diagnostics(), source, script_id),
                    started,
                )
            }
        };

        if !unit.has_entry(entry_point) {
            let missing = Diagnostic::error_with_code(
                codes::ENTRY_POINT_NOT_FOUND,
                format!("Entry point '{}' is not defined", entry_point),
                Span::dummy(),
            )
            .with_file(script_id);
            return self.short_circuit(
                script_id,
                FailureKind::CompileError,
                validation.violations,
                vec![missing],
                started,
            );
        }

        let mut result =
            self.executor
                .execute_cancellable(&unit, entry_point, args, profile, &host, cancel);

        let mut diagnostics = validation.diagnostics;
        diagnostics.extend(unit.diagnostics().iter().cloned());
        diagnostics.extend(locate(std::mem::take(&mut result.diagnostics), source, script_id));
        sort_diagnostics(&mut diagnostics);
        result.diagnostics = diagnostics;

        let mut events = validation.violations;
        events.append(&mut result.security_events);
        result.security_events = events;
        result.elapsed = started.elapsed();

        self.reporter.record(script_id, &result.security_events);
        result
    }

    /// [`execute_script`](Self::execute_script) on tokio's blocking pool
    pub async fn execute_script_async(
        self: Arc<Self>,
        source: String,
        entry_point: String,
        args: Vec<Value>,
        profile: PermissionProfile,
    ) -> ExecutionResult {
        let script_id = profile.script_id().to_string();
        let sandbox = Arc::clone(&self);
        let joined = tokio::task::spawn_blocking(move || {
            sandbox.execute_script(&source, &entry_point, args, &profile)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) => {
                let event = SecurityEvent::error(
                    EventCategory::RuntimeFault,
                    codes::ISOLATION_FAULT,
                    format!("Execution task failed: {}", e),
                );
                self.reporter.record(&script_id, std::slice::from_ref(&event));
                let mut result = ExecutionResult::pending(&script_id);
                result.state = ExecutionState::Interrupted;
                ViolationReporter::summarize(&[event], Vec::new()).apply_to(&mut result);
                result
            }
        }
    }

    /// Result for a script that never reached the executor
    fn short_circuit(
        &self,
        script_id: &str,
        kind: FailureKind,
        events: Vec<SecurityEvent>,
        diagnostics: Vec<Diagnostic>,
        started: Instant,
    ) -> ExecutionResult {
        tracing::debug!(script_id, failure = %kind, "script rejected before execution");
        self.reporter.record(script_id, &events);

        let mut result = ExecutionResult::pending(script_id);
        result.failure_kind = Some(kind);
        result.elapsed = started.elapsed();
        ViolationReporter::summarize(&events, diagnostics).apply_to(&mut result);
        result
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxOptions::default())
    }
}

/// Resolve line and column of freshly built diagnostics
fn locate(diagnostics: Vec<Diagnostic>, source: &str, script_id: &str) -> Vec<Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| d.located_in(source).with_file(script_id))
        .collect()
}

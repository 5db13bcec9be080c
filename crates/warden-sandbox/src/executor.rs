//! Isolated execution
//!
//! Each execution runs on its own named worker thread. The VM on the worker
//! enforces the stack budget, the memory meter and the deadline itself; the
//! controller does not trust that and enforces the deadline a second time
//! with a bounded wait:
//!
//! 1. Wait for the worker's result in short slices until the deadline,
//!    watching the caller's cancel token between slices
//! 2. On deadline or caller cancel, raise the worker's cancel token and wait
//!    at most `cancel_grace` for it to stop
//! 3. A worker that still has not stopped is abandoned (detached); it can no
//!    longer affect the result and its thread is counted in
//!    [`ExecutorStats::abandoned`]
//!
//! Rust cannot kill a thread, so an abandoned worker keeps its CPU until its
//! next interrupt check or host call returns. Native code that never returns
//! to the VM is the one case this layer cannot reclaim.

use crate::cache::CompiledUnit;
use crate::profile::PermissionProfile;
use crate::reporter::ViolationReporter;
use crate::result::{EventCategory, ExecutionResult, ExecutionState, SecurityEvent};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use warden_script::diagnostic::codes;
use warden_script::{
    CancelToken, Diagnostic, HostApi, MemoryMeter, NativeContext, RuntimeError, Value, Vm,
};

/// Smallest native stack given to a worker
pub const MIN_WORKER_STACK_BYTES: u64 = 256 * 1024;

/// Longest single wait on the worker before re-checking the caller's token
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot of executor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExecutorStats {
    pub started: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub memory_exceeded: u64,
    pub faulted: u64,
    pub interrupted: u64,
    /// Workers detached after ignoring cancellation
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    memory_exceeded: AtomicU64,
    faulted: AtomicU64,
    interrupted: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn count_terminal(&self, state: ExecutionState) {
        let counter = match state {
            ExecutionState::Completed => &self.completed,
            ExecutionState::TimedOut => &self.timed_out,
            ExecutionState::MemoryExceeded => &self.memory_exceeded,
            ExecutionState::Faulted => &self.faulted,
            ExecutionState::Interrupted => &self.interrupted,
            ExecutionState::Pending | ExecutionState::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            memory_exceeded: self.memory_exceeded.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// What the worker sends back
enum WorkerOutcome {
    Finished {
        result: Result<Value, RuntimeError>,
        /// Bytes still charged when the run ended, before the VM was dropped
        memory_held: u64,
    },
    Panicked(String),
}

/// How the controller's wait ended
enum Wait {
    Received(WorkerOutcome),
    DeadlineReached,
    CallerCancelled,
    Vanished,
}

/// Owns the worker thread handle and releases it on every exit path
///
/// A finished worker is joined; one that is still running is detached.
struct WorkerGuard {
    handle: Option<JoinHandle<()>>,
}

impl WorkerGuard {
    fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Join a worker that has already delivered its outcome
    fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Give up on a worker that ignored cancellation
    fn abandon(mut self) {
        self.handle.take();
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

/// Terminal outcome before it is turned into an [`ExecutionResult`]
struct Terminal {
    state: ExecutionState,
    value: Option<Value>,
    events: Vec<SecurityEvent>,
    diagnostics: Vec<Diagnostic>,
    memory_held: Option<u64>,
}

impl Terminal {
    fn completed(value: Value) -> Self {
        Self {
            state: ExecutionState::Completed,
            value: Some(value),
            events: Vec::new(),
            diagnostics: Vec::new(),
            memory_held: None,
        }
    }

    fn failed(state: ExecutionState, event: SecurityEvent) -> Self {
        Self {
            state,
            value: None,
            events: vec![event],
            diagnostics: Vec::new(),
            memory_held: None,
        }
    }
}

/// Runs compiled units on dedicated, resource-bounded workers
#[derive(Debug, Clone)]
pub struct IsolatedExecutor {
    counters: Arc<Counters>,
    poll_interval: Duration,
}

impl IsolatedExecutor {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }

    /// Run `entry` of `unit` with `args` under `profile`
    pub fn execute(
        &self,
        unit: &CompiledUnit,
        entry: &str,
        args: Vec<Value>,
        profile: &PermissionProfile,
        host: &Arc<HostApi>,
    ) -> ExecutionResult {
        self.execute_cancellable(unit, entry, args, profile, host, &CancelToken::new())
    }

    /// Like [`execute`](Self::execute), stopping early when `cancel` is raised
    ///
    /// A run stopped this way ends `Interrupted`.
    pub fn execute_cancellable(
        &self,
        unit: &CompiledUnit,
        entry: &str,
        args: Vec<Value>,
        profile: &PermissionProfile,
        host: &Arc<HostApi>,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let deadline = started + profile.timeout();
        let worker_cancel = CancelToken::new();
        let meter = MemoryMeter::new(profile.max_memory_bytes());
        let memory_before = meter.used();

        let spawned = self.spawn_worker(
            unit,
            entry,
            args,
            profile,
            host,
            deadline,
            &worker_cancel,
            &meter,
        );
        let terminal = match spawned {
            Ok((handle, rx)) => {
                self.counters.started.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    script_id = profile.script_id(),
                    entry,
                    timeout_ms = profile.timeout().as_millis() as u64,
                    "execution running"
                );
                let guard = WorkerGuard::new(handle);
                self.supervise(guard, &rx, deadline, cancel, &worker_cancel, profile)
            }
            Err(e) => Terminal::failed(
                ExecutionState::Faulted,
                SecurityEvent::error(
                    EventCategory::RuntimeFault,
                    codes::ISOLATION_FAULT,
                    format!("Failed to start worker thread: {}", e),
                ),
            ),
        };

        // A worker that never reported is still running; read the live meter
        let memory_used = terminal
            .memory_held
            .unwrap_or_else(|| meter.used())
            .saturating_sub(memory_before);
        let terminal = apply_memory_post_check(terminal, memory_used, profile.max_memory_bytes());
        self.counters.count_terminal(terminal.state);
        let mut result = self.finish(terminal, profile, started.elapsed(), memory_used);
        result.peak_memory_bytes = meter.peak();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_worker(
        &self,
        unit: &CompiledUnit,
        entry: &str,
        args: Vec<Value>,
        profile: &PermissionProfile,
        host: &Arc<HostApi>,
        deadline: Instant,
        worker_cancel: &CancelToken,
        meter: &MemoryMeter,
    ) -> std::io::Result<(JoinHandle<()>, mpsc::Receiver<WorkerOutcome>)> {
        let (tx, rx) = mpsc::sync_channel(1);
        let executable = Arc::clone(unit.executable());
        let host = Arc::clone(host);
        let entry = entry.to_string();
        let max_stack_bytes = profile.max_stack_bytes();
        let ctx = NativeContext::new(
            profile.script_id(),
            Some(deadline),
            worker_cancel.clone(),
            meter.clone(),
        );
        let stack_size = usize::try_from(max_stack_bytes.max(MIN_WORKER_STACK_BYTES))
            .unwrap_or(usize::MAX);

        let handle = thread::Builder::new()
            .name(worker_name(profile.script_id()))
            .stack_size(stack_size)
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut vm = match Vm::new(executable, &host, ctx, max_stack_bytes) {
                        Ok(vm) => vm,
                        Err(error) => return (Err(error), 0),
                    };
                    let result = vm.run_entry(&entry, args);
                    // Globals and the return value are still alive here
                    let held = vm.context().meter().used();
                    (result, held)
                }));
                let outcome = match outcome {
                    Ok((result, memory_held)) => WorkerOutcome::Finished {
                        result,
                        memory_held,
                    },
                    Err(payload) => WorkerOutcome::Panicked(panic_message(payload.as_ref())),
                };
                // The controller may have stopped listening
                let _ = tx.send(outcome);
            })?;
        Ok((handle, rx))
    }

    fn supervise(
        &self,
        guard: WorkerGuard,
        rx: &mpsc::Receiver<WorkerOutcome>,
        deadline: Instant,
        caller_cancel: &CancelToken,
        worker_cancel: &CancelToken,
        profile: &PermissionProfile,
    ) -> Terminal {
        let wait = loop {
            if caller_cancel.is_cancelled() {
                break Wait::CallerCancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                break Wait::DeadlineReached;
            }
            match rx.recv_timeout((deadline - now).min(self.poll_interval)) {
                Ok(outcome) => break Wait::Received(outcome),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break Wait::Vanished,
            }
        };

        match wait {
            Wait::Received(outcome) => {
                guard.join();
                classify(outcome)
            }
            Wait::Vanished => {
                drop(guard);
                Terminal::failed(
                    ExecutionState::Interrupted,
                    SecurityEvent::error(
                        EventCategory::RuntimeFault,
                        codes::ISOLATION_FAULT,
                        "Worker exited without reporting a result",
                    ),
                )
            }
            Wait::DeadlineReached => {
                let event = SecurityEvent::error(
                    EventCategory::TimeoutExceeded,
                    codes::DEADLINE_EXCEEDED,
                    format!(
                        "Execution exceeded its timeout of {} ms",
                        profile.timeout().as_millis()
                    ),
                );
                self.stop_worker(guard, rx, worker_cancel, profile, ExecutionState::TimedOut, event)
            }
            Wait::CallerCancelled => {
                let event = SecurityEvent::error(
                    EventCategory::RuntimeFault,
                    codes::CANCELLED,
                    "Execution cancelled by the host",
                );
                self.stop_worker(guard, rx, worker_cancel, profile, ExecutionState::Interrupted, event)
            }
        }
    }

    /// Cancel the worker, wait out the grace period, abandon it if needed
    fn stop_worker(
        &self,
        guard: WorkerGuard,
        rx: &mpsc::Receiver<WorkerOutcome>,
        worker_cancel: &CancelToken,
        profile: &PermissionProfile,
        state: ExecutionState,
        event: SecurityEvent,
    ) -> Terminal {
        worker_cancel.cancel();
        let mut terminal = Terminal::failed(state, event);
        match rx.recv_timeout(profile.cancel_grace()) {
            Ok(WorkerOutcome::Finished { memory_held, .. }) => {
                terminal.memory_held = Some(memory_held);
                drop(guard);
            }
            Ok(WorkerOutcome::Panicked(_)) | Err(RecvTimeoutError::Disconnected) => drop(guard),
            Err(RecvTimeoutError::Timeout) => {
                guard.abandon();
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    script_id = profile.script_id(),
                    grace_ms = profile.cancel_grace().as_millis() as u64,
                    "worker ignored cancellation and was abandoned"
                );
                terminal.events.push(SecurityEvent::warning(
                    EventCategory::RuntimeFault,
                    codes::ISOLATION_FAULT,
                    format!(
                        "Worker did not stop within {} ms of cancellation and was abandoned",
                        profile.cancel_grace().as_millis()
                    ),
                ));
            }
        }
        terminal
    }

    fn finish(
        &self,
        terminal: Terminal,
        profile: &PermissionProfile,
        elapsed: Duration,
        memory_used: u64,
    ) -> ExecutionResult {
        let Terminal {
            state,
            value,
            events,
            diagnostics,
            ..
        } = terminal;

        match state {
            ExecutionState::Completed => tracing::debug!(
                script_id = profile.script_id(),
                elapsed_ms = elapsed.as_millis() as u64,
                memory_used,
                "execution completed"
            ),
            _ => tracing::info!(
                script_id = profile.script_id(),
                state = %state,
                elapsed_ms = elapsed.as_millis() as u64,
                memory_used,
                "execution stopped"
            ),
        }

        let mut result = ExecutionResult::pending(profile.script_id());
        result.state = state;
        result.return_value = value;
        result.elapsed = elapsed;
        result.memory_used_bytes = memory_used;
        ViolationReporter::summarize(&events, diagnostics).apply_to(&mut result);
        result
    }
}

impl Default for IsolatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Map the worker's own outcome to a terminal state
fn classify(outcome: WorkerOutcome) -> Terminal {
    let (error, memory_held) = match outcome {
        WorkerOutcome::Finished {
            result: Ok(value),
            memory_held,
        } => {
            let mut terminal = Terminal::completed(value);
            terminal.memory_held = Some(memory_held);
            return terminal;
        }
        WorkerOutcome::Finished {
            result: Err(error),
            memory_held,
        } => (error, memory_held),
        WorkerOutcome::Panicked(message) => {
            return Terminal::failed(
                ExecutionState::Faulted,
                SecurityEvent::error(
                    EventCategory::RuntimeFault,
                    codes::ISOLATION_FAULT,
                    format!("Worker panicked: {}", message),
                ),
            )
        }
    };

    let diagnostic = error.to_diagnostic();
    let (state, events) = match &error {
        RuntimeError::MemoryLimitExceeded { .. } => (
            ExecutionState::MemoryExceeded,
            vec![SecurityEvent::error(
                EventCategory::MemoryExceeded,
                error.code(),
                error.to_string(),
            )],
        ),
        RuntimeError::DeadlineExceeded => (
            ExecutionState::TimedOut,
            vec![SecurityEvent::error(
                EventCategory::TimeoutExceeded,
                error.code(),
                error.to_string(),
            )],
        ),
        RuntimeError::Cancelled => (
            ExecutionState::Interrupted,
            vec![SecurityEvent::error(
                EventCategory::RuntimeFault,
                error.code(),
                error.to_string(),
            )],
        ),
        RuntimeError::StackOverflow { depth, .. } => (
            ExecutionState::Faulted,
            vec![
                SecurityEvent::error(EventCategory::RuntimeFault, error.code(), error.to_string()),
                SecurityEvent::warning(
                    EventCategory::RecursionSuspected,
                    codes::RECURSION_SUSPECTED,
                    format!("Call depth reached {} before the stack ceiling", depth),
                ),
            ],
        ),
        _ => (
            ExecutionState::Faulted,
            vec![SecurityEvent::error(
                EventCategory::RuntimeFault,
                error.code(),
                error.to_string(),
            )],
        ),
    };
    Terminal {
        state,
        value: None,
        events,
        diagnostics: vec![diagnostic],
        memory_held: Some(memory_held),
    }
}

/// Usage over the ceiling fails the run even if the worker reported success
fn apply_memory_post_check(terminal: Terminal, used: u64, limit: u64) -> Terminal {
    if terminal.state != ExecutionState::Completed || used <= limit {
        return terminal;
    }
    Terminal::failed(
        ExecutionState::MemoryExceeded,
        SecurityEvent::error(
            EventCategory::MemoryExceeded,
            codes::MEMORY_LIMIT,
            format!(
                "Execution used {} bytes, over its ceiling of {} bytes",
                used, limit
            ),
        ),
    )
}

/// Thread names may not contain NUL
fn worker_name(script_id: &str) -> String {
    format!("warden-worker-{}", script_id.replace('\0', "_"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CompileCache;
    use crate::result::FailureKind;
    use pretty_assertions::assert_eq;

    fn run(source: &str, profile: &PermissionProfile) -> ExecutionResult {
        run_with_host(source, profile, HostApi::with_stdlib())
    }

    fn run_with_host(source: &str, profile: &PermissionProfile, host: HostApi) -> ExecutionResult {
        let host = Arc::new(host);
        let unit = CompileCache::default().get_or_compile(source, &host).unwrap();
        IsolatedExecutor::new().execute(&unit, "", Vec::new(), profile, &host)
    }

    fn profile() -> crate::profile::PermissionProfileBuilder {
        PermissionProfile::builder("test")
    }

    #[test]
    fn test_completes_with_value() {
        let result = run("return 2 + 2;", &profile().build().unwrap());
        assert_eq!(result.state, ExecutionState::Completed);
        assert!(result.success);
        assert_eq!(result.return_value, Some(Value::Int(4)));
        assert_eq!(result.failure_kind, None);
    }

    #[test]
    fn test_runtime_fault_is_reported() {
        let result = run("let x = 0;\nreturn 1 / x;", &profile().build().unwrap());
        assert_eq!(result.state, ExecutionState::Faulted);
        assert_eq!(result.failure_kind, Some(FailureKind::RuntimeFault));
        assert_eq!(result.diagnostics[0].code, codes::RUNTIME_FAULT);
    }

    #[test]
    fn test_integer_overflow_faults() {
        let result = run("return 9223372036854775807 + 1;", &profile().build().unwrap());
        assert_eq!(result.state, ExecutionState::Faulted);
        assert_eq!(result.diagnostics[0].code, codes::INTEGER_OVERFLOW);
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let profile = profile()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let start = Instant::now();
        let result = run("while true { }", &profile);
        assert!(start.elapsed() < Duration::from_millis(100) + Duration::from_millis(400));
        assert_eq!(result.state, ExecutionState::TimedOut);
        assert_eq!(result.failure_kind, Some(FailureKind::TimeoutExceeded));
    }

    #[test]
    fn test_runaway_recursion_is_contained() {
        let result = run("fn f(n) { return f(n + 1); }\nreturn f(0);", &profile().build().unwrap());
        assert_eq!(result.state, ExecutionState::Faulted);
        assert!(result.events(EventCategory::RecursionSuspected).next().is_some());
        assert_eq!(result.diagnostics[0].code, codes::STACK_OVERFLOW);
    }

    #[test]
    fn test_memory_ceiling_is_enforced() {
        let profile = profile().max_memory_bytes(64 * 1024).build().unwrap();
        let result = run("return array.new(100000, 0);", &profile);
        assert_eq!(result.state, ExecutionState::MemoryExceeded);
        assert_eq!(result.failure_kind, Some(FailureKind::MemoryExceeded));
        assert!(result.peak_memory_bytes <= 64 * 1024);
    }

    #[test]
    fn test_memory_is_measured_as_live_heap() {
        let profile = profile().max_memory_bytes(64 * 1024).build().unwrap();
        let source = "var xs = array.new(2000, 0);
                      var i = 0;
                      while i < 2000 { xs[i] = i; i += 1; }
                      var s = \"\";
                      var j = 0;
                      while j < 4000 { s = s + \"x\"; j += 1; }
                      return i + j;";
        let result = run(source, &profile);
        assert_eq!(result.state, ExecutionState::Completed);
        assert_eq!(result.return_value, Some(Value::Int(6000)));
        let slots = 2000 * std::mem::size_of::<Value>() as u64;
        assert!(result.memory_used_bytes >= slots + 4000);
        assert!(result.peak_memory_bytes >= result.memory_used_bytes);
        assert!(result.peak_memory_bytes < 64 * 1024);
    }

    #[test]
    fn test_panicking_host_function_faults_worker_only() {
        let mut host = HostApi::with_stdlib();
        host.register("entity.explode", |_, _| panic!("host bug"));
        let result = run_with_host("return entity.explode();", &profile().build().unwrap(), host);
        assert_eq!(result.state, ExecutionState::Faulted);
        assert_eq!(result.failure_kind, Some(FailureKind::IsolationFault));
        assert!(result.security_events[0].message.contains("host bug"));
    }

    #[test]
    fn test_host_call_ignoring_cancel_is_abandoned() {
        let mut host = HostApi::with_stdlib();
        host.register("entity.stall", |_, _| {
            thread::sleep(Duration::from_millis(400));
            Ok(Value::Null)
        });
        let host = Arc::new(host);
        let unit = CompileCache::default()
            .get_or_compile("return entity.stall();", &host)
            .unwrap();
        let profile = profile()
            .timeout(Duration::from_millis(50))
            .cancel_grace(Duration::from_millis(20))
            .build()
            .unwrap();
        let executor = IsolatedExecutor::new();

        let start = Instant::now();
        let result = executor.execute(&unit, "", Vec::new(), &profile, &host);
        assert!(start.elapsed() < Duration::from_millis(300));
        assert_eq!(result.state, ExecutionState::TimedOut);
        assert_eq!(executor.stats().abandoned, 1);
        assert_eq!(executor.stats().timed_out, 1);
    }

    #[test]
    fn test_caller_cancel_interrupts() {
        let host = Arc::new(HostApi::with_stdlib());
        let unit = CompileCache::default()
            .get_or_compile("while true { }", &host)
            .unwrap();
        let profile = profile().timeout(Duration::from_secs(5)).build().unwrap();
        let executor = IsolatedExecutor::new();
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });
        let result = executor.execute_cancellable(&unit, "", Vec::new(), &profile, &host, &cancel);
        canceller.join().unwrap();

        assert_eq!(result.state, ExecutionState::Interrupted);
        assert_eq!(executor.stats().interrupted, 1);
    }

    #[test]
    fn test_named_entry_receives_args() {
        let host = Arc::new(HostApi::with_stdlib());
        let unit = CompileCache::default()
            .get_or_compile("fn add(a, b) { return a + b; }", &host)
            .unwrap();
        let result = IsolatedExecutor::new().execute(
            &unit,
            "add",
            vec![Value::Int(40), Value::Int(2)],
            &profile().build().unwrap(),
            &host,
        );
        assert_eq!(result.return_value, Some(Value::Int(42)));
    }

    #[test]
    fn test_post_check_overrides_success() {
        let terminal = apply_memory_post_check(Terminal::completed(Value::Null), 11, 10);
        assert_eq!(terminal.state, ExecutionState::MemoryExceeded);
        assert_eq!(terminal.value, None);

        let fine = apply_memory_post_check(Terminal::completed(Value::Null), 10, 10);
        assert_eq!(fine.state, ExecutionState::Completed);
    }

    #[test]
    fn test_stats_count_each_run() {
        let host = Arc::new(HostApi::with_stdlib());
        let cache = CompileCache::default();
        let executor = IsolatedExecutor::new();
        let profile = profile().build().unwrap();
        for source in ["return 1;", "return 1 / 0;"] {
            let unit = cache.get_or_compile(source, &host).unwrap();
            executor.execute(&unit, "", Vec::new(), &profile, &host);
        }
        let stats = executor.stats();
        assert_eq!((stats.started, stats.completed, stats.faulted), (2, 1, 1));
    }

    #[test]
    fn test_worker_name_strips_nul() {
        assert_eq!(worker_name("a\0b"), "warden-worker-a_b");
    }
}

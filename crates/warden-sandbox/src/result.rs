//! Execution outcomes and security events

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use warden_script::{Diagnostic, Value};

/// Lifecycle of one execution
///
/// `Pending` is only observed on results for scripts that were rejected
/// before the executor ran them; every other state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    TimedOut,
    MemoryExceeded,
    Faulted,
    Interrupted,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionState::Pending | ExecutionState::Running)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::TimedOut => "timed_out",
            ExecutionState::MemoryExceeded => "memory_exceeded",
            ExecutionState::Faulted => "faulted",
            ExecutionState::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Why an execution did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Disallowed API or construct; the script never ran
    StaticRejection,
    /// Syntax or resolution error; the script never ran
    CompileError,
    TimeoutExceeded,
    MemoryExceeded,
    /// Script error caught at the executor boundary
    RuntimeFault,
    /// The worker itself died or could not be reclaimed
    IsolationFault,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::StaticRejection => "static rejection",
            FailureKind::CompileError => "compile error",
            FailureKind::TimeoutExceeded => "timeout exceeded",
            FailureKind::MemoryExceeded => "memory exceeded",
            FailureKind::RuntimeFault => "runtime fault",
            FailureKind::IsolationFault => "isolation fault",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    StaticRejection,
    TimeoutExceeded,
    MemoryExceeded,
    RecursionSuspected,
    RuntimeFault,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::StaticRejection => "static_rejection",
            EventCategory::TimeoutExceeded => "timeout_exceeded",
            EventCategory::MemoryExceeded => "memory_exceeded",
            EventCategory::RecursionSuspected => "recursion_suspected",
            EventCategory::RuntimeFault => "runtime_fault",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// One detected violation or anomaly
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    pub category: EventCategory,
    pub severity: Severity,
    pub message: String,
    /// Diagnostic code of the finding that raised this event
    pub code: String,
}

impl SecurityEvent {
    pub fn error(category: EventCategory, code: &str, message: impl Into<String>) -> Self {
        Self {
            category,
            severity: Severity::Error,
            message: message.into(),
            code: code.to_string(),
        }
    }

    pub fn warning(category: EventCategory, code: &str, message: impl Into<String>) -> Self {
        Self {
            category,
            severity: Severity::Warning,
            message: message.into(),
            code: code.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)
    }
}

/// A security event as recorded for audit, with its script and time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub script_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SecurityEvent,
}

impl AuditRecord {
    pub fn new(script_id: impl Into<String>, event: SecurityEvent) -> Self {
        Self {
            script_id: script_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        format!(
            "[{}] {} {}",
            self.timestamp.to_rfc3339(),
            self.script_id,
            self.event
        )
    }
}

/// Outcome of one `execute_script` call
///
/// Script misbehaviour of any kind is reported here rather than as an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub script_id: String,
    pub state: ExecutionState,
    pub success: bool,
    pub return_value: Option<Value>,
    pub diagnostics: Vec<Diagnostic>,
    pub security_events: Vec<SecurityEvent>,
    pub failure_kind: Option<FailureKind>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Heap still held by the script when it stopped
    pub memory_used_bytes: u64,
    /// Most heap the script held at any point
    pub peak_memory_bytes: u64,
}

impl ExecutionResult {
    /// A result with no outcome yet, for the given script
    pub fn pending(script_id: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            state: ExecutionState::Pending,
            success: false,
            return_value: None,
            diagnostics: Vec::new(),
            security_events: Vec::new(),
            failure_kind: None,
            elapsed: Duration::ZERO,
            memory_used_bytes: 0,
            peak_memory_bytes: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    /// Events of the given category
    pub fn events(&self, category: EventCategory) -> impl Iterator<Item = &SecurityEvent> {
        self.security_events
            .iter()
            .filter(move |event| event.category == category)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

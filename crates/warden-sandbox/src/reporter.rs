//! Violation reporting and audit output
//!
//! [`ViolationReporter::summarize`] turns the events of one execution attempt
//! into the reporting fields of an [`ExecutionResult`]. [`ViolationReporter::record`]
//! emits each event on the `warden::audit` tracing target and forwards it to
//! the configured [`EventSink`].

use crate::result::{
    AuditRecord, EventCategory, ExecutionResult, ExecutionState, FailureKind, SecurityEvent,
    Severity,
};
use std::sync::{Arc, Mutex, MutexGuard};
use warden_script::diagnostic::codes;
use warden_script::{sort_diagnostics, Diagnostic, Span};

/// Tracing target for security events
pub const AUDIT_TARGET: &str = "warden::audit";

/// Destination for audit records
pub trait EventSink: Send + Sync {
    fn record(&self, record: AuditRecord);

    /// Every record kept so far (for testing)
    fn records(&self) -> Vec<AuditRecord>;

    /// Clear kept records (for testing)
    fn clear(&self);
}

/// In-memory sink
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, record: AuditRecord) {
        self.lock().push(record);
    }

    fn records(&self) -> Vec<AuditRecord> {
        self.lock().clone()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _record: AuditRecord) {}

    fn records(&self) -> Vec<AuditRecord> {
        Vec::new()
    }

    fn clear(&self) {}
}

/// Reporting fields of an [`ExecutionResult`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Summary {
    pub diagnostics: Vec<Diagnostic>,
    pub security_events: Vec<SecurityEvent>,
    pub failure_kind: Option<FailureKind>,
}

impl Summary {
    /// Copy into `result`; success requires a completed run with no failure
    pub fn apply_to(self, result: &mut ExecutionResult) {
        result.diagnostics = self.diagnostics;
        result.security_events = self.security_events;
        if result.failure_kind.is_none() {
            result.failure_kind = self.failure_kind;
        }
        result.success =
            result.state == ExecutionState::Completed && result.failure_kind.is_none();
    }
}

pub struct ViolationReporter {
    sink: Arc<dyn EventSink>,
}

impl ViolationReporter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Reporter that only emits tracing events
    pub fn tracing_only() -> Self {
        Self::new(Arc::new(NullEventSink))
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Aggregate the events of one execution attempt
    ///
    /// `diagnostics` are kept as given. Each error event whose code no
    /// diagnostic carries gets a synthesized diagnostic, so a failed result
    /// always explains itself.
    pub fn summarize(events: &[SecurityEvent], diagnostics: Vec<Diagnostic>) -> Summary {
        let mut diagnostics = diagnostics;
        for event in events.iter().filter(|event| event.is_error()) {
            if !diagnostics.iter().any(|d| d.code == event.code) {
                diagnostics.push(Diagnostic::error_with_code(
                    event.code.as_str(),
                    event.message.as_str(),
                    Span::dummy(),
                ));
            }
        }
        sort_diagnostics(&mut diagnostics);

        let failure_kind = events
            .iter()
            .filter(|event| event.is_error())
            .map(failure_kind_of)
            .max_by_key(|kind| failure_rank(*kind));

        Summary {
            diagnostics,
            security_events: events.to_vec(),
            failure_kind,
        }
    }

    /// Emit events for audit
    pub fn record(&self, script_id: &str, events: &[SecurityEvent]) {
        for event in events {
            let record = AuditRecord::new(script_id, event.clone());
            let timestamp = record.timestamp.to_rfc3339();
            match event.severity {
                Severity::Error => tracing::warn!(
                    target: AUDIT_TARGET,
                    category = %event.category,
                    severity = %event.severity,
                    script_id,
                    timestamp = %timestamp,
                    code = %event.code,
                    "{}",
                    event.message
                ),
                Severity::Warning => tracing::info!(
                    target: AUDIT_TARGET,
                    category = %event.category,
                    severity = %event.severity,
                    script_id,
                    timestamp = %timestamp,
                    code = %event.code,
                    "{}",
                    event.message
                ),
            }
            self.sink.record(record);
        }
    }
}

impl Default for ViolationReporter {
    fn default() -> Self {
        Self::tracing_only()
    }
}

fn failure_kind_of(event: &SecurityEvent) -> FailureKind {
    match event.category {
        EventCategory::StaticRejection => FailureKind::StaticRejection,
        EventCategory::TimeoutExceeded => FailureKind::TimeoutExceeded,
        EventCategory::MemoryExceeded => FailureKind::MemoryExceeded,
        EventCategory::RuntimeFault if event.code == codes::ISOLATION_FAULT => {
            FailureKind::IsolationFault
        }
        EventCategory::RuntimeFault | EventCategory::RecursionSuspected => FailureKind::RuntimeFault,
    }
}

/// When several failures are reported, the one nearest the isolation boundary wins
fn failure_rank(kind: FailureKind) -> u8 {
    match kind {
        FailureKind::CompileError | FailureKind::RuntimeFault => 0,
        FailureKind::MemoryExceeded => 1,
        FailureKind::TimeoutExceeded => 2,
        FailureKind::StaticRejection => 3,
        FailureKind::IsolationFault => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn denied() -> SecurityEvent {
        SecurityEvent::error(
            EventCategory::StaticRejection,
            codes::NAMESPACE_DENIED,
            "namespace 'net' is denied",
        )
    }

    fn recursion() -> SecurityEvent {
        SecurityEvent::warning(
            EventCategory::RecursionSuspected,
            codes::RECURSION_SUSPECTED,
            "'f' calls itself",
        )
    }

    // ============================================================================
    // Summaries
    // ============================================================================

    #[test]
    fn test_empty_summary_has_no_failure() {
        let summary = ViolationReporter::summarize(&[], Vec::new());
        assert_eq!(summary, Summary::default());
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let summary = ViolationReporter::summarize(&[recursion()], Vec::new());
        assert_eq!(summary.failure_kind, None);
        assert!(summary.diagnostics.is_empty());
        assert_eq!(summary.security_events.len(), 1);
    }

    #[test]
    fn test_error_event_synthesizes_diagnostic() {
        let summary = ViolationReporter::summarize(&[denied()], Vec::new());
        assert_eq!(summary.failure_kind, Some(FailureKind::StaticRejection));
        assert_eq!(summary.diagnostics.len(), 1);
        assert_eq!(summary.diagnostics[0].code, codes::NAMESPACE_DENIED);
    }

    #[test]
    fn test_existing_diagnostic_is_not_duplicated() {
        let located = Diagnostic::error_with_code(codes::NAMESPACE_DENIED, "denied", Span::new(0, 3));
        let summary = ViolationReporter::summarize(&[denied()], vec![located.clone()]);
        assert_eq!(summary.diagnostics, vec![located]);
    }

    #[test]
    fn test_isolation_fault_outranks_runtime_fault() {
        let events = [
            SecurityEvent::error(EventCategory::RuntimeFault, codes::RUNTIME_FAULT, "boom"),
            SecurityEvent::error(EventCategory::RuntimeFault, codes::ISOLATION_FAULT, "gone"),
        ];
        let summary = ViolationReporter::summarize(&events, Vec::new());
        assert_eq!(summary.failure_kind, Some(FailureKind::IsolationFault));
    }

    #[test]
    fn test_apply_marks_success_only_for_clean_completion() {
        let mut result = ExecutionResult::pending("s");
        result.state = ExecutionState::Completed;
        ViolationReporter::summarize(&[recursion()], Vec::new()).apply_to(&mut result);
        assert!(result.success);

        let mut rejected = ExecutionResult::pending("s");
        ViolationReporter::summarize(&[denied()], Vec::new()).apply_to(&mut rejected);
        assert!(!rejected.success);
        assert_eq!(rejected.state, ExecutionState::Pending);
    }

    // ============================================================================
    // Sinks
    // ============================================================================

    #[test]
    fn test_record_forwards_to_sink() {
        let sink = Arc::new(MemoryEventSink::new());
        let reporter = ViolationReporter::new(sink.clone());
        reporter.record("mods/quest", &[denied(), recursion()]);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].script_id, "mods/quest");
        assert_eq!(records[1].event.severity, Severity::Warning);

        sink.clear();
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_null_sink_keeps_nothing() {
        let reporter = ViolationReporter::tracing_only();
        reporter.record("s", &[denied()]);
        assert!(reporter.sink().records().is_empty());
    }
}

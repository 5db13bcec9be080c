//! Per-execution context shared by the VM and host functions

use crate::value::RuntimeError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live-heap meter with a hard ceiling
///
/// Script-owned strings and arrays hold a [`HeapCharge`] for their storage;
/// the bytes return to the meter when the last reference is dropped, so
/// `used()` is the heap the script holds right now and `peak()` the most it
/// ever held. A charge that would cross the ceiling is refused and leaves the
/// counters untouched.
#[derive(Debug, Clone)]
pub struct MemoryMeter {
    used: Arc<AtomicU64>,
    peak: Arc<AtomicU64>,
    limit: u64,
}

impl MemoryMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            used: Arc::new(AtomicU64::new(0)),
            peak: Arc::new(AtomicU64::new(0)),
            limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Highest value `used()` has reached
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Fail if `bytes` more would not fit, without charging anything
    pub fn check(&self, bytes: u64) -> Result<(), RuntimeError> {
        let used = self.used();
        if used.saturating_add(bytes) > self.limit {
            return Err(self.exceeded(bytes, used));
        }
        Ok(())
    }

    /// Charge `bytes` until the returned guard is dropped
    pub fn charge(&self, bytes: u64) -> Result<HeapCharge, RuntimeError> {
        let limit = self.limit;
        let before = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(bytes).filter(|&next| next <= limit)
            })
            .map_err(|used| self.exceeded(bytes, used))?;
        self.peak.fetch_max(before + bytes, Ordering::SeqCst);
        Ok(HeapCharge {
            meter: self.clone(),
            bytes,
        })
    }

    fn release(&self, bytes: u64) {
        // Never fails: the closure always returns Some
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    fn exceeded(&self, requested: u64, used: u64) -> RuntimeError {
        RuntimeError::MemoryLimitExceeded {
            requested,
            used,
            limit: self.limit,
        }
    }
}

/// Bytes held against a [`MemoryMeter`], released on drop
#[derive(Debug)]
pub struct HeapCharge {
    meter: MemoryMeter,
    bytes: u64,
}

impl HeapCharge {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for HeapCharge {
    fn drop(&mut self) {
        self.meter.release(self.bytes);
    }
}

/// Context handed to every host function call
///
/// Host functions that block must respect [`NativeContext::remaining`] and
/// [`NativeContext::is_cancelled`]; host functions that allocate on behalf of
/// the script must call [`NativeContext::reserve`] first. The VM charges the
/// returned value itself.
#[derive(Debug, Clone)]
pub struct NativeContext {
    script_id: Arc<str>,
    started: Instant,
    deadline: Option<Instant>,
    cancel: CancelToken,
    meter: MemoryMeter,
}

impl NativeContext {
    pub fn new(
        script_id: impl AsRef<str>,
        deadline: Option<Instant>,
        cancel: CancelToken,
        meter: MemoryMeter,
    ) -> Self {
        Self {
            script_id: Arc::from(script_id.as_ref()),
            started: Instant::now(),
            deadline,
            cancel,
            meter,
        }
    }

    /// Context without deadline or memory ceiling
    pub fn unbounded(script_id: impl AsRef<str>) -> Self {
        Self::new(script_id, None, CancelToken::new(), MemoryMeter::unlimited())
    }

    pub fn script_id(&self) -> &str {
        &self.script_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn meter(&self) -> &MemoryMeter {
        &self.meter
    }

    /// Fail if the execution was cancelled or ran past its deadline
    pub fn check_interrupt(&self) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(RuntimeError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Fail early if an allocation of `bytes` would not fit under the ceiling
    pub fn reserve(&self, bytes: u64) -> Result<(), RuntimeError> {
        self.meter.check(bytes)
    }
}

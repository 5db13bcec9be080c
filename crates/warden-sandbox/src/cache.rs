//! Content-addressed compile cache
//!
//! Compiled units are keyed by the SHA-256 of their source and kept in a
//! bounded LRU. The lock is held only for lookups and inserts, never while
//! compiling, so two callers compiling the same new source may both do the
//! work; the results are identical and the later insert wins.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use crate::validator::linkable_natives;
use warden_script::bytecode;
use warden_script::{has_errors, Compiler, Diagnostic, Executable, HostApi, BYTECODE_VERSION};

pub const DEFAULT_CAPACITY: usize = 100;

/// Compilation failed; nothing was cached
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Compilation failed with {} diagnostic(s)", .0.len())]
    Diagnostics(Vec<Diagnostic>),
}

impl CompileError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Diagnostics(diagnostics) => diagnostics,
        }
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            CompileError::Diagnostics(diagnostics) => diagnostics,
        }
    }
}

/// Cache persistence errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize compiled unit: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Hex SHA-256 digest of a script's source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Accept a stored digest only if it is 64 lowercase hex digits
    pub fn parse(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable handle to a compiled script
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    hash: ContentHash,
    source: Arc<str>,
    executable: Arc<Executable>,
    /// Non-blocking compile diagnostics
    diagnostics: Vec<Diagnostic>,
}

impl CompiledUnit {
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn executable(&self) -> &Arc<Executable> {
        &self.executable
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// True if `entry` names the script body or one of its functions
    pub fn has_entry(&self, entry: &str) -> bool {
        self.executable.has_entry(entry)
    }
}

/// On-disk form of a compiled unit
#[derive(Serialize, Deserialize)]
struct PersistedUnit {
    hash: ContentHash,
    bytecode_version: u16,
    source: String,
    executable: Executable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compiles: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Result of [`CompileCache::warm_from`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WarmReport {
    pub loaded: usize,
    pub discarded: usize,
}

pub struct CompileCache {
    entries: Mutex<LruCache<ContentHash, Arc<CompiledUnit>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
}

impl CompileCache {
    /// Cache holding at most `capacity` units; zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compiles: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<ContentHash, Arc<CompiledUnit>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached unit for `source`, compiling it against `host` on a miss
    pub fn get_or_compile(
        &self,
        source: &str,
        host: &HostApi,
    ) -> Result<Arc<CompiledUnit>, CompileError> {
        let hash = ContentHash::of(source);
        if let Some(unit) = self.lock().get(&hash).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(hash = %hash, "compile cache hit");
            return Ok(unit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let unit = Arc::new(compile(hash, source, host)?);
        self.compiles.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(hash = %unit.hash, "compiled script");

        if let Some((evicted, _)) = self.lock().push(unit.hash.clone(), Arc::clone(&unit)) {
            if evicted != unit.hash {
                tracing::debug!(hash = %evicted, "evicted compiled unit");
            }
        }
        Ok(unit)
    }

    /// Cached unit by hash, without compiling
    pub fn get(&self, hash: &ContentHash) -> Option<Arc<CompiledUnit>> {
        self.lock().get(hash).cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.lock().contains(&ContentHash::of(source))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every cached unit; counters are kept
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compiles: self.compiles.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }

    /// Write every cached unit to `dir` as `<hash>.json`
    pub fn persist(&self, dir: &Path) -> Result<usize, CacheError> {
        fs::create_dir_all(dir)?;
        let units: Vec<Arc<CompiledUnit>> =
            self.lock().iter().map(|(_, unit)| Arc::clone(unit)).collect();

        for unit in &units {
            let persisted = PersistedUnit {
                hash: unit.hash.clone(),
                bytecode_version: BYTECODE_VERSION,
                source: unit.source.to_string(),
                executable: unit.executable.as_ref().clone(),
            };
            let json = serde_json::to_vec(&persisted)?;
            fs::write(dir.join(format!("{}.json", unit.hash)), json)?;
        }
        tracing::debug!(count = units.len(), dir = %dir.display(), "persisted compile cache");
        Ok(units.len())
    }

    /// Load units persisted by [`persist`](Self::persist)
    ///
    /// A unit is discarded when its file name, stored hash and stored source
    /// disagree, its bytecode version differs from this build, its bytecode
    /// fails validation, or it links a host function its source never calls
    /// or `host` does not provide. A missing directory loads nothing.
    pub fn warm_from(&self, dir: &Path, host: &HostApi) -> Result<WarmReport, CacheError> {
        let mut report = WarmReport::default();
        if !dir.is_dir() {
            return Ok(report);
        }

        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            match load_unit(&path, stem, host) {
                Some(unit) => {
                    self.lock().put(unit.hash.clone(), Arc::new(unit));
                    report.loaded += 1;
                }
                None => {
                    tracing::warn!(path = %path.display(), "discarding persisted compiled unit");
                    report.discarded += 1;
                }
            }
        }
        Ok(report)
    }
}

impl Default for CompileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn compile(hash: ContentHash, source: &str, host: &HostApi) -> Result<CompiledUnit, CompileError> {
    let (program, mut diagnostics) = warden_script::parse_source(source);
    if has_errors(&diagnostics) {
        return Err(CompileError::Diagnostics(diagnostics));
    }
    let executable = Compiler::new(host)
        .compile(&program)
        .map_err(CompileError::Diagnostics)?;
    diagnostics.retain(|d| !d.is_error());
    Ok(CompiledUnit {
        hash,
        source: Arc::from(source),
        executable: Arc::new(executable),
        diagnostics,
    })
}

fn load_unit(path: &Path, stem: &str, host: &HostApi) -> Option<CompiledUnit> {
    let bytes = fs::read(path).ok()?;
    let persisted: PersistedUnit = serde_json::from_slice(&bytes).ok()?;
    let expected = ContentHash::parse(stem)?;
    if persisted.hash != expected
        || ContentHash::of(&persisted.source) != expected
        || persisted.bytecode_version != BYTECODE_VERSION
    {
        return None;
    }
    bytecode::validate(&persisted.executable).ok()?;

    // The validator only ever sees the source, so the bytecode may link
    // nothing the source does not call
    let (program, diagnostics) = warden_script::parse_source(&persisted.source);
    if has_errors(&diagnostics) {
        return None;
    }
    let linkable = linkable_natives(&program);
    let natives = &persisted.executable.natives;
    if !natives
        .iter()
        .all(|name| linkable.contains(name) && host.contains(name))
    {
        return None;
    }
    Some(CompiledUnit {
        hash: persisted.hash,
        source: Arc::from(persisted.source),
        executable: Arc::new(persisted.executable),
        diagnostics: Vec::new(),
    })
}

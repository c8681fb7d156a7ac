//! Disk-Space Simulator (spec §4.C): a virtual filesystem overlay that
//! models bounded free space with pluggable exhaustion curves.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::rng::{AtomicCount, DeterministicStream};

#[derive(Debug, thiserror::Error)]
pub enum DiskSpaceError {
    #[error("no space left on device: operation {operation} on {path} needed {required} bytes, {available} available")]
    SpaceExhausted {
        operation: String,
        path: String,
        required: u64,
        available: u64,
    },
    #[error("injected disk error in {operation} on {path}: {message}")]
    Injected {
        operation: String,
        path: String,
        message: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DiskSpaceError {
    /// True for messages recognized by the disk-space classifier (spec §6):
    /// "no space left", "disk full", "quota exceeded", "device full",
    /// "insufficient space", case-insensitive, plus the POSIX ENOSPC errno.
    pub fn is_space_error(err: &(dyn std::error::Error + 'static)) -> bool {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && io.raw_os_error() == Some(libc::ENOSPC)
        {
            return true;
        }
        let text = err.to_string().to_lowercase();
        const NEEDLES: [&str; 5] = [
            "no space left",
            "disk full",
            "quota exceeded",
            "device full",
            "insufficient space",
        ];
        NEEDLES.iter().any(|needle| text.contains(needle))
    }
}

/// The policy governing how virtual free space decreases per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionMode {
    Linear,
    Progressive,
    Random,
    Immediate,
}

/// Consistent, non-live snapshot of the disk simulator's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStatsSnapshot {
    pub total_writes: u64,
    pub failed_writes: u64,
    pub injected_errors: u64,
    pub space_exhausted: u64,
    pub recovery_operations: u64,
    pub min_file_size: u64,
    pub max_file_size: u64,
}

#[derive(Default)]
struct DiskStats {
    total_writes: AtomicCount,
    failed_writes: AtomicCount,
    injected_errors: AtomicCount,
    space_exhausted: AtomicCount,
    recovery_operations: AtomicCount,
    min_file_size: AtomicCount,
    max_file_size: AtomicCount,
}

struct DiskState {
    available: u64,
    used: u64,
    write_counter: u64,
}

/// Bounded free-space model. `available + used == total` always holds
/// (spec §4.C invariant); all mutation happens under a single coarse lock.
pub struct VirtualDisk {
    total: u64,
    state: Mutex<DiskState>,
    exhaustion_mode: Mutex<(ExhaustionMode, f64)>,
    failure_points: RwLock<HashMap<u64, String>>,
    recovery_points: RwLock<HashMap<u64, u64>>,
    path_injection_points: RwLock<HashMap<String, String>>,
    stream: DeterministicStream,
    stats: DiskStats,
}

impl VirtualDisk {
    pub fn new(total: u64, seed: i64) -> Self {
        Self {
            total,
            state: Mutex::new(DiskState {
                available: total,
                used: 0,
                write_counter: 0,
            }),
            exhaustion_mode: Mutex::new((ExhaustionMode::Linear, 0.0)),
            failure_points: RwLock::new(HashMap::new()),
            recovery_points: RwLock::new(HashMap::new()),
            path_injection_points: RwLock::new(HashMap::new()),
            stream: DeterministicStream::new(seed),
            stats: DiskStats::default(),
        }
    }

    pub fn set_exhaustion(&self, mode: ExhaustionMode, rate: f64) {
        *self.exhaustion_mode.lock() = (mode, rate.clamp(0.0, 1.0));
    }

    pub fn register_failure_point(&self, write_index: u64, message: impl Into<String>) {
        self.failure_points.write().insert(write_index, message.into());
    }

    pub fn register_recovery_point(&self, write_index: u64, bytes: u64) {
        self.recovery_points.write().insert(write_index, bytes);
    }

    pub fn register_path_injection(&self, path: impl Into<String>, message: impl Into<String>) {
        self.path_injection_points.write().insert(path.into(), message.into());
    }

    pub fn available(&self) -> u64 {
        self.state.lock().available
    }

    pub fn used(&self) -> u64 {
        self.state.lock().used
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn stats(&self) -> DiskStatsSnapshot {
        DiskStatsSnapshot {
            total_writes: self.stats.total_writes.get(),
            failed_writes: self.stats.failed_writes.get(),
            injected_errors: self.stats.injected_errors.get(),
            space_exhausted: self.stats.space_exhausted.get(),
            recovery_operations: self.stats.recovery_operations.get(),
            min_file_size: self.stats.min_file_size.get(),
            max_file_size: self.stats.max_file_size.get(),
        }
    }

    /// Restore `available = total / 2`, zero the write counter, reset stats.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.available = self.total / 2;
        state.used = self.total - state.available;
        state.write_counter = 0;
        drop(state);
        self.stats.total_writes.set(0);
        self.stats.failed_writes.set(0);
        self.stats.injected_errors.set(0);
        self.stats.space_exhausted.set(0);
        self.stats.recovery_operations.set(0);
        self.stats.min_file_size.set(0);
        self.stats.max_file_size.set(0);
    }

    fn reduction_for(&self, counter: u64) -> u64 {
        let (mode, rate) = *self.exhaustion_mode.lock();
        let total = self.total as f64;
        match mode {
            ExhaustionMode::Linear => (total * rate) as u64,
            ExhaustionMode::Progressive => (total * rate * counter as f64 / 10.0) as u64,
            ExhaustionMode::Random => {
                let jitter = self.stream.exhaustion_jitter(counter);
                (total * rate * jitter) as u64
            }
            ExhaustionMode::Immediate => self.state.lock().available,
        }
    }

    /// The 8-step `checkSpaceAndInject` algorithm (spec §4.C).
    pub fn check_space_and_inject(
        &self,
        operation: &str,
        path: &str,
        required_bytes: u64,
    ) -> Result<(), DiskSpaceError> {
        self.stats.total_writes.add(1);

        let counter = {
            let mut state = self.state.lock();
            state.write_counter += 1;
            state.write_counter
        };

        if let Some(message) = self.path_injection_points.read().get(path).cloned() {
            self.stats.injected_errors.add(1);
            return Err(DiskSpaceError::Injected {
                operation: operation.to_string(),
                path: path.to_string(),
                message,
            });
        }

        if let Some(message) = self.failure_points.read().get(&counter).cloned() {
            self.stats.failed_writes.add(1);
            return Err(DiskSpaceError::Injected {
                operation: operation.to_string(),
                path: path.to_string(),
                message,
            });
        }

        if let Some(&credit) = self.recovery_points.read().get(&counter) {
            let mut state = self.state.lock();
            let before = state.available;
            state.available = (state.available + credit).min(self.total);
            let actual_credit = state.available - before;
            state.used = state.used.saturating_sub(actual_credit);
            self.stats.recovery_operations.add(1);
        }

        let reduction = self.reduction_for(counter);

        {
            let mut state = self.state.lock();
            let before = state.available;
            state.available = state.available.saturating_sub(reduction);
            let actual_reduction = before - state.available;
            state.used += actual_reduction;

            if state.available < required_bytes {
                self.stats.space_exhausted.add(1);
                self.stats.failed_writes.add(1);
                return Err(DiskSpaceError::SpaceExhausted {
                    operation: operation.to_string(),
                    path: path.to_string(),
                    required: required_bytes,
                    available: state.available,
                });
            }

            state.available -= required_bytes;
            state.used += required_bytes;
        }

        if required_bytes > 0 {
            let min = self.stats.min_file_size.get();
            if min == 0 || required_bytes < min {
                self.stats.min_file_size.set(required_bytes);
            }
            if required_bytes > self.stats.max_file_size.get() {
                self.stats.max_file_size.set(required_bytes);
            }
        }

        Ok(())
    }

    /// Credit `available` after a successful delete of `freed_bytes`.
    fn credit_delete(&self, freed_bytes: u64) {
        let mut state = self.state.lock();
        state.used = state.used.saturating_sub(freed_bytes);
        state.available = (state.available + freed_bytes).min(self.total);
    }
}

/// A filesystem facade wrapping write-oriented operations with the virtual
/// disk's space accounting; read operations pass through unmodified
/// (spec §6).
pub struct SimulatedFileSystem {
    root: PathBuf,
    disk: VirtualDisk,
}

impl SimulatedFileSystem {
    pub fn new(root: impl Into<PathBuf>, disk: VirtualDisk) -> Self {
        Self { root: root.into(), disk }
    }

    pub fn disk(&self) -> &VirtualDisk {
        &self.disk
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn write_file(&self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), DiskSpaceError> {
        let path = self.resolve(path.as_ref());
        self.disk
            .check_space_and_inject("WriteFile", &path.to_string_lossy(), bytes.len() as u64)?;
        fs::write(&path, bytes)?;
        Ok(())
    }

    pub fn create(&self, path: impl AsRef<Path>) -> Result<fs::File, DiskSpaceError> {
        let path = self.resolve(path.as_ref());
        self.disk.check_space_and_inject("Create", &path.to_string_lossy(), 0)?;
        Ok(fs::File::create(path)?)
    }

    pub fn mkdir_all(&self, path: impl AsRef<Path>) -> Result<(), DiskSpaceError> {
        let path = self.resolve(path.as_ref());
        self.disk.check_space_and_inject("MkdirAll", &path.to_string_lossy(), 0)?;
        fs::create_dir_all(&path)?;
        Ok(())
    }

    /// Compute size before deletion, remove the file, and credit the
    /// simulator only on success — spec §4.C's delete-ordering rule.
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<(), DiskSpaceError> {
        let path = self.resolve(path.as_ref());
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        self.disk
            .check_space_and_inject("Remove", &path.to_string_lossy(), 0)?;
        fs::remove_file(&path)?;
        self.disk.credit_delete(size);
        Ok(())
    }

    pub fn remove_all(&self, path: impl AsRef<Path>) -> Result<(), DiskSpaceError> {
        let path = self.resolve(path.as_ref());
        let size = dir_size(&path).unwrap_or(0);
        self.disk
            .check_space_and_inject("RemoveAll", &path.to_string_lossy(), 0)?;
        fs::remove_dir_all(&path)?;
        self.disk.credit_delete(size);
        Ok(())
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> std::io::Result<Vec<u8>> {
        fs::read(self.resolve(path.as_ref()))
    }

    pub fn stat(&self, path: impl AsRef<Path>) -> std::io::Result<fs::Metadata> {
        fs::metadata(self.resolve(path.as_ref()))
    }

    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> std::io::Result<()> {
        fs::rename(self.resolve(from.as_ref()), self.resolve(to.as_ref()))
    }
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let meta = fs::metadata(path)?;
    if meta.is_file() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

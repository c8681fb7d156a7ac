//! Per-scenario scratchpad (spec §3's `Runtime` entity): owns the
//! temp-directory lifecycle and holds the engine instances a scenario's
//! steps call into.

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::context::{CancellationManager, ContextController};
use crate::diskspace::VirtualDisk;
use crate::injector::ErrorInjector;
use crate::permission::PermissionSandbox;

use super::{Event, EventKind, Phase, StepResult};

/// A string-keyed bag of typed values shared across a scenario's steps
/// (spec §3: "shared data map (string → any)").
#[derive(Default)]
pub struct SharedData {
    values: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl SharedData {
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.lock().insert(key.into(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.values.lock().get(key).and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }
}

/// The per-scenario scratchpad: working directory, archive directory, temp
/// root, config fixture, shared data, created-resource lists, event log,
/// step results and the engine instances steps call into.
pub struct Runtime {
    pub root: PathBuf,
    pub working_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub config_file: PathBuf,
    pub shared: SharedData,
    pub injector: Arc<ErrorInjector>,
    pub context: Arc<ContextController>,
    pub cancellation: Arc<CancellationManager>,
    disk: RwLock<Option<Arc<VirtualDisk>>>,
    permission: RwLock<Option<Arc<PermissionSandbox>>>,
    created_files: Mutex<Vec<PathBuf>>,
    created_dirs: Mutex<Vec<PathBuf>>,
    events: Mutex<Vec<Event>>,
    step_results: Mutex<HashMap<String, StepResult>>,
}

impl Runtime {
    /// Allocate a fresh, disjoint temp root (`<tmp>/faultkit/<pid>-<uuid>/`,
    /// matching the teacher's collision-avoidance construction), create
    /// `working/` and `archives/`, and write the `.bkpdir.yml` config
    /// fixture (spec §6).
    pub fn allocate(seed: i64) -> std::io::Result<Self> {
        let pid = std::process::id();
        let run_id = Uuid::new_v4();
        let root = std::env::temp_dir()
            .join("faultkit")
            .join(format!("{pid}-{run_id}"));

        let working_dir = root.join("working");
        let archive_dir = root.join("archives");
        fs::create_dir_all(&working_dir)?;
        fs::create_dir_all(&archive_dir)?;

        let config_file = working_dir.join(".bkpdir.yml");
        fs::write(
            &config_file,
            format!(
                "archive_dir_path: {}\nuse_current_dir_name: true\n",
                archive_dir.display()
            ),
        )?;

        Ok(Self {
            root,
            working_dir,
            archive_dir,
            config_file,
            shared: SharedData::default(),
            injector: Arc::new(ErrorInjector::new(seed)),
            context: Arc::new(ContextController::new(None)),
            cancellation: Arc::new(CancellationManager::new()),
            disk: RwLock::new(None),
            permission: RwLock::new(None),
            created_files: Mutex::new(Vec::new()),
            created_dirs: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            step_results: Mutex::new(HashMap::new()),
        })
    }

    /// Return the virtual disk for this runtime, creating it with `total`
    /// bytes of capacity on first use.
    pub fn ensure_disk(&self, total: u64, seed: i64) -> Arc<VirtualDisk> {
        let mut disk = self.disk.write();
        disk.get_or_insert_with(|| Arc::new(VirtualDisk::new(total, seed))).clone()
    }

    pub fn disk(&self) -> Option<Arc<VirtualDisk>> {
        self.disk.read().clone()
    }

    /// Return the permission sandbox for this runtime, creating one (with
    /// its own temp directory) on first use.
    pub fn ensure_permission_sandbox(&self) -> std::io::Result<Arc<PermissionSandbox>> {
        let mut sandbox = self.permission.write();
        if sandbox.is_none() {
            *sandbox = Some(Arc::new(PermissionSandbox::new()?));
        }
        Ok(sandbox.as_ref().unwrap().clone())
    }

    pub fn permission_sandbox(&self) -> Option<Arc<PermissionSandbox>> {
        self.permission.read().clone()
    }

    pub fn track_created_file(&self, path: impl Into<PathBuf>) {
        self.created_files.lock().push(path.into());
    }

    pub fn track_created_dir(&self, path: impl Into<PathBuf>) {
        self.created_dirs.lock().push(path.into());
    }

    pub fn created_files(&self) -> Vec<PathBuf> {
        self.created_files.lock().clone()
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.created_dirs.lock().clone()
    }

    pub(super) fn emit(&self, kind: EventKind, step_id: Option<String>, phase: Option<Phase>, message: String) {
        self.events.lock().push(Event {
            timestamp: SystemTime::now(),
            kind,
            step_id,
            phase,
            message,
            error: None,
            duration: None,
        });
    }

    pub(super) fn record_step_result(&self, result: StepResult) {
        self.step_results.lock().insert(result.step_id.clone(), result);
    }

    pub fn step_result(&self, step_id: &str) -> Option<StepResult> {
        self.step_results.lock().get(step_id).cloned()
    }

    pub(super) fn step_results_snapshot(&self) -> HashMap<String, StepResult> {
        self.step_results.lock().clone()
    }

    pub fn events_snapshot(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Stop the context controller, reset the error injector, restore and
    /// drop the permission sandbox, and remove the temp directory. Always
    /// runs, even when the scenario failed (spec §4.G step 3).
    pub fn teardown(&self) {
        self.context.stop();
        self.injector.reset();
        if let Some(sandbox) = self.permission.write().take()
            && let Ok(sandbox) = Arc::try_unwrap(sandbox)
        {
            let _ = sandbox.cleanup();
        }
        let _ = fs::remove_dir_all(&self.root);
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.root).exists()
    }
}

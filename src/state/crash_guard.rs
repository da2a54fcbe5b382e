//! Persistent "last run ended cleanly" flag.
//!
//! The flag is cleared before a conversion touches any codec and set again
//! when it returns. A process that dies inside a vendor codec leaves it
//! cleared, and the next request fails fast instead of crashing again.

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage for the clean-exit flag.
pub trait CrashGuardStore: Send + Sync {
    fn last_run_clean(&self) -> bool;

    fn set_last_run_clean(&self, clean: bool);
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGuard {
    last_run_clean: bool,
}

/// Flag stored as a small JSON file. A missing file reads as clean.
#[derive(Debug)]
pub struct FileCrashGuard {
    path: PathBuf,
    cached: Mutex<bool>,
}

impl FileCrashGuard {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let clean = match Self::load(&path) {
            Ok(clean) => clean,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read crash guard, assuming clean");
                true
            }
        };
        Self {
            path,
            cached: Mutex::new(clean),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(true);
        }
        let content = std::fs::read_to_string(path)?;
        let guard: PersistedGuard = serde_json::from_str(&content)?;
        Ok(guard.last_run_clean)
    }

    fn save(&self, clean: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&PersistedGuard {
            last_run_clean: clean,
        })?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl CrashGuardStore for FileCrashGuard {
    fn last_run_clean(&self) -> bool {
        *self.cached.lock()
    }

    fn set_last_run_clean(&self, clean: bool) {
        let mut cached = self.cached.lock();
        *cached = clean;
        if let Err(e) = self.save(clean) {
            tracing::error!(path = ?self.path, error = %e, "Failed to persist crash guard");
        }
    }
}

/// In-process flag, for tests and embedders without a state directory.
#[derive(Debug)]
pub struct MemoryCrashGuard {
    clean: AtomicBool,
}

impl MemoryCrashGuard {
    pub fn new(clean: bool) -> Self {
        Self {
            clean: AtomicBool::new(clean),
        }
    }
}

impl Default for MemoryCrashGuard {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CrashGuardStore for MemoryCrashGuard {
    fn last_run_clean(&self) -> bool {
        self.clean.load(Ordering::SeqCst)
    }

    fn set_last_run_clean(&self, clean: bool) {
        self.clean.store(clean, Ordering::SeqCst);
    }
}

/// Marks a conversion as in flight for as long as it is alive.
pub struct ActiveConversion {
    store: Arc<dyn CrashGuardStore>,
}

impl ActiveConversion {
    /// Clear the flag and return the guard, or `None` when the previous run
    /// never finished. In that case the flag is reset so the request after
    /// this one runs normally.
    pub fn enter(store: Arc<dyn CrashGuardStore>) -> Option<Self> {
        if !store.last_run_clean() {
            warn!("Previous conversion did not finish, refusing this one");
            store.set_last_run_clean(true);
            return None;
        }
        store.set_last_run_clean(false);
        debug!("Crash guard armed");
        Some(Self { store })
    }
}

impl Drop for ActiveConversion {
    fn drop(&mut self) {
        self.store.set_last_run_clean(true);
        debug!("Crash guard cleared");
    }
}

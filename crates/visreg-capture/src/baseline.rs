//! On-disk baseline storage.
//!
//! Baselines live at `<dir>/<scenario>.png`. Writes go through a temporary
//! file in the same directory and are renamed into place. All access to one
//! baseline file is serialized through a lock shared by every store in the
//! process, and creating a baseline never replaces an existing file.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use image::ImageFormat;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use visreg_core::ScenarioId;

use crate::buffer::PixelBuffer;
use crate::Result;

/// Per-file locks, keyed by baseline path. Entries die with their last user.
static BASELINE_LOCKS: Mutex<Option<HashMap<PathBuf, Weak<Mutex<()>>>>> = Mutex::new(None);

fn baseline_lock(path: PathBuf) -> Arc<Mutex<()>> {
    let mut table = BASELINE_LOCKS.lock();
    let table = table.get_or_insert_with(HashMap::new);
    if let Some(lock) = table.get(&path).and_then(Weak::upgrade) {
        return lock;
    }

    table.retain(|_, lock| lock.strong_count() > 0);
    let lock = Arc::new(Mutex::new(()));
    table.insert(path, Arc::downgrade(&lock));
    lock
}

/// Directory of baseline images keyed by scenario.
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the baseline for `scenario`, whether or not it exists.
    #[must_use]
    pub fn path(&self, scenario: &ScenarioId) -> PathBuf {
        self.dir.join(scenario.file_name())
    }

    #[must_use]
    pub fn exists(&self, scenario: &ScenarioId) -> bool {
        self.path(scenario).is_file()
    }

    /// Run `f` while holding the lock for the baseline of `scenario`.
    ///
    /// The lock is shared with every other store pointing at the same file.
    /// Callers that check for a baseline and then write one must do both
    /// inside the same call.
    pub fn with_lock<T>(&self, scenario: &ScenarioId, f: impl FnOnce(&Self) -> T) -> T {
        let lock = baseline_lock(self.path(scenario));
        let _guard = lock.lock();
        f(self)
    }

    /// Load the baseline, or `None` if there is none yet.
    pub fn load(&self, scenario: &ScenarioId) -> Result<Option<PixelBuffer>> {
        let path = self.path(scenario);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(PixelBuffer::load(&path)?))
    }

    /// Atomically write `pixels` as the baseline for `scenario`, replacing
    /// any existing one.
    pub fn store(&self, scenario: &ScenarioId, pixels: &PixelBuffer) -> Result<PathBuf> {
        let path = self.path(scenario);
        self.write_temp(pixels)?
            .persist(&path)
            .map_err(|e| e.error)?;
        Ok(path)
    }

    /// Atomically write `pixels` as the baseline for `scenario` unless one
    /// already exists.
    ///
    /// Returns `None`, leaving the existing file untouched, if another writer
    /// got there first.
    pub fn create(&self, scenario: &ScenarioId, pixels: &PixelBuffer) -> Result<Option<PathBuf>> {
        let path = self.path(scenario);
        match self.write_temp(pixels)?.persist_noclobber(&path) {
            Ok(_) => Ok(Some(path)),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.error.into()),
        }
    }

    fn write_temp(&self, pixels: &PixelBuffer) -> Result<NamedTempFile> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = NamedTempFile::new_in(&self.dir)?;
        pixels.as_image().write_to(&mut file, ImageFormat::Png)?;
        file.as_file().sync_all()?;
        Ok(file)
    }
}

//! Durable state store backed by one JSON file per target

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{StateStore, StoreError, TargetState};

const EXTENSION: &str = "json";
const QUARANTINE_EXTENSION: &str = "corrupt";

/// Write-through store: states are cached in memory and every mutation is
/// persisted before it becomes visible.
///
/// File names are the hex-encoded target id, so ids may contain any
/// characters.
pub struct FileStore {
    data_dir: PathBuf,
    states: DashMap<String, TargetState>,
}

impl FileStore {
    /// Open (or create) a store in `data_dir`, loading existing records.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let states = DashMap::new();
        for entry in fs::read_dir(&data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| hex::decode(s).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok())
            else {
                tracing::warn!(path = %path.display(), "Ignoring unrecognized state file");
                continue;
            };

            match read_record(&id, &path) {
                Ok(state) => {
                    states.insert(id, state);
                }
                Err(e) => {
                    // The target starts over from the default state
                    let quarantined = path.with_extension(QUARANTINE_EXTENSION);
                    tracing::error!(
                        target_id = %id,
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable state record"
                    );
                    if let Err(e) = fs::rename(&path, &quarantined) {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to quarantine state record");
                    }
                }
            }
        }

        tracing::debug!(
            data_dir = %data_dir.display(),
            targets = states.len(),
            "Loaded target state"
        );

        Ok(Self { data_dir, states })
    }

    fn key_path(&self, id: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", hex::encode(id.as_bytes()), EXTENSION))
    }

    /// Write to a temporary file, then rename it over the old record.
    fn persist(&self, id: &str, state: &TargetState) -> Result<(), StoreError> {
        let data =
            serde_json::to_vec(state).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let path = self.key_path(id);
        let tmp = path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        Ok(())
    }
}

fn read_record(id: &str, path: &Path) -> Result<TargetState, StoreError> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| StoreError::Corrupted {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

impl StateStore for FileStore {
    fn get_state(&self, id: &str) -> Result<TargetState, StoreError> {
        Ok(self
            .states
            .get(id)
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }

    fn update(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut TargetState),
    ) -> Result<TargetState, StoreError> {
        let entry = self.states.entry(id.to_string());
        let current = match &entry {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(_) => TargetState::default(),
        };

        let mut next = current.clone();
        f(&mut next);
        // Unchanged states are not written, so untouched targets get no record
        if next != current {
            self.persist(id, &next)?;
            match entry {
                Entry::Occupied(mut occupied) => *occupied.get_mut() = next.clone(),
                Entry::Vacant(vacant) => {
                    vacant.insert(next.clone());
                }
            }
        }

        Ok(next)
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        // Hold the entry lock so a concurrent update cannot recreate the file
        // between the delete and the map removal.
        if let Entry::Occupied(entry) = self.states.entry(id.to_string()) {
            let path = self.key_path(id);
            if path.exists() {
                fs::remove_file(path)?;
            }
            entry.remove();
        }
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.states.iter().map(|e| e.key().clone()).collect())
    }
}

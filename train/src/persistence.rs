//! Write-once snapshot stores keyed by optimizer step.

use crate::errors::{Result, TrainError};
use crate::types::ModelState;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Where snapshots go during training and come back from at inference time.
pub trait Persistence {
    /// Stores a snapshot under its step key; a step is written once.
    fn save(&mut self, step: usize, state: &ModelState) -> Result<()>;

    /// Retrieves the snapshot saved under a step key.
    fn load(&self, step: usize) -> Result<ModelState>;
}

/// One JSON file per snapshot inside a directory.
pub struct DirPersistence {
    dir: PathBuf,
}

impl DirPersistence {
    pub fn new(dir: impl AsRef<Path>) -> Result<DirPersistence> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(DirPersistence {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("snapshot_{step}.json"))
    }
}

impl Persistence for DirPersistence {
    fn save(&mut self, step: usize, state: &ModelState) -> Result<()> {
        let path = self.path(step);
        if path.exists() {
            return Err(TrainError::InvalidConfigError(format!(
                "snapshot for step {step} already saved"
            )));
        }
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer(file, state)?;
        Ok(())
    }

    fn load(&self, step: usize) -> Result<ModelState> {
        let file = BufReader::new(File::open(self.path(step))?);
        Ok(serde_json::from_reader(file)?)
    }
}

/// In-memory store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryPersistence {
    states: HashMap<usize, ModelState>,
}

impl MemoryPersistence {
    pub fn new() -> MemoryPersistence {
        MemoryPersistence::default()
    }

    pub fn n_snapshots(&self) -> usize {
        self.states.len()
    }

    pub fn steps(&self) -> Vec<usize> {
        let mut steps: Vec<usize> = self.states.keys().copied().collect();
        steps.sort_unstable();
        steps
    }
}

impl Persistence for MemoryPersistence {
    fn save(&mut self, step: usize, state: &ModelState) -> Result<()> {
        if self.states.contains_key(&step) {
            return Err(TrainError::InvalidConfigError(format!(
                "snapshot for step {step} already saved"
            )));
        }
        self.states.insert(step, state.clone());
        Ok(())
    }

    fn load(&self, step: usize) -> Result<ModelState> {
        self.states.get(&step).cloned().ok_or_else(|| {
            TrainError::InvalidConfigError(format!("no snapshot saved for step {step}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ModelState {
        ModelState {
            theta: vec![1.0, -0.5, 0.25],
        }
    }

    #[test]
    fn test_memory_roundtrip_and_write_once() {
        let mut store = MemoryPersistence::new();
        store.save(12, &state()).unwrap();
        assert_eq!(store.load(12).unwrap(), state());
        assert!(store.save(12, &state()).is_err());
        assert!(store.load(13).is_err());
        assert_eq!(store.steps(), vec![12]);
    }

    #[test]
    fn test_dir_roundtrip() {
        let dir = std::env::temp_dir().join(format!("snapmix-persist-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut store = DirPersistence::new(&dir).unwrap();
        store.save(7, &state()).unwrap();
        assert_eq!(store.load(7).unwrap(), state());
        assert!(store.save(7, &state()).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

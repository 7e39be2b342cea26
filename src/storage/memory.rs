//! In-memory state store

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{StateStore, StoreError, TargetState};

/// Volatile store keeping every target's state in a [`DashMap`].
///
/// Each `update` holds the shard lock for its key, which serializes
/// concurrent writers of the same target.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: DashMap<String, TargetState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateStore for MemoryStore {
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
        match self.states.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                let mut state = TargetState::default();
                f(&mut state);
                if state != TargetState::default() {
                    entry.insert(state.clone());
                }
                Ok(state)
            }
        }
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.states.remove(id);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.states.iter().map(|e| e.key().clone()).collect())
    }
}

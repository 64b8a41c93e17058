// In-memory хранилище для тестов

use crate::storage::models::PersistedState;
use crate::storage::StateStore;
use crate::utils::error::Result;
use crate::utils::sync::lock;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn save(&self, state: &PersistedState) -> Result<()> {
        *lock(&self.state) = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>> {
        Ok(lock(&self.state).clone())
    }

    fn clear(&self) -> Result<()> {
        *lock(&self.state) = None;
        Ok(())
    }
}

// Модуль хранилища
//
// Persistence is explicit: the core writes only when asked to
// (`SecureCore::save_state`), never on the encrypt/decrypt path.

pub mod file;
pub mod memory;
pub mod models;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use models::{PersistedState, StoredIdentity};

use crate::utils::error::Result;

/// Where identity and trust records live between runs.
pub trait StateStore: Send + Sync {
    fn save(&self, state: &PersistedState) -> Result<()>;

    /// `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<PersistedState>>;

    fn clear(&self) -> Result<()>;
}

//! Client-held API key used to gate the chat assistant locally.

use parking_lot::RwLock;

pub const MIN_KEY_LEN: usize = 10;

pub trait CredentialStore: Send + Sync {
    fn get_credential(&self) -> Option<String>;
    /// Store a trimmed key; a blank key clears the store.
    fn set_credential(&self, key: &str);
    fn clear_credential(&self);

    fn is_configured(&self) -> bool {
        self.get_credential().is_some()
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    key: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn with_key(key: &str) -> Self {
        let store = Self::default();
        store.set_credential(key);
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credential(&self) -> Option<String> {
        self.key.read().clone()
    }

    fn set_credential(&self, key: &str) {
        let key = key.trim();
        *self.key.write() = (!key.is_empty()).then(|| key.to_string());
    }

    fn clear_credential(&self) {
        *self.key.write() = None;
    }
}

/// Cheap shape check before accepting a key.
pub fn is_plausible_key(key: &str) -> bool {
    key.trim().chars().count() >= MIN_KEY_LEN
}

//! Keychain-backed credential storage.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;
use stash_core::auth::{CredentialError, CredentialStore, Credentials};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "stash-cli";

/// Stores both tokens as one JSON record under a single keychain entry.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    username: String,
}

impl KeyringCredentialStore {
    /// Entry scoped to one backend, so switching servers does not reuse tokens.
    pub fn for_backend(api_base_url: &str) -> Self {
        Self {
            username: format!("credentials:{api_base_url}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, CredentialError> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| CredentialError::Storage(error.to_string()))
    }
}

fn decode(raw: &str) -> Result<Credentials, CredentialError> {
    serde_json::from_str(raw).map_err(|error| CredentialError::Corrupt(error.to_string()))
}

fn encode(credentials: &Credentials) -> Result<String, CredentialError> {
    serde_json::to_string(credentials).map_err(|error| CredentialError::Storage(error.to_string()))
}

impl CredentialStore for KeyringCredentialStore {
    #[cfg(not(test))]
    fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        match self.entry()?.get_password() {
            Ok(raw) => decode(&raw).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(CredentialError::Storage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| CredentialError::Storage(error.to_string()))?;
        guard.get(&self.username).map(|raw| decode(raw)).transpose()
    }

    #[cfg(not(test))]
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let raw = encode(credentials)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| CredentialError::Storage(error.to_string()))
    }

    #[cfg(test)]
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let raw = encode(credentials)?;
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CredentialError::Storage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear(&self) -> Result<(), CredentialError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(CredentialError::Storage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear(&self) -> Result<(), CredentialError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CredentialError::Storage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn credentials_round_trip_per_backend() {
        let first = KeyringCredentialStore::for_backend("https://one.example.com");
        let second = KeyringCredentialStore::for_backend("https://two.example.com");
        first.save(&Credentials::new("a", "r")).unwrap();

        assert_eq!(first.load().unwrap(), Some(Credentials::new("a", "r")));
        assert_eq!(second.load().unwrap(), None);

        first.clear().unwrap();
        assert_eq!(first.load().unwrap(), None);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let store = KeyringCredentialStore::for_backend("https://corrupt.example.com");
        KeyringCredentialStore::test_store()
            .lock()
            .unwrap()
            .insert(store.username.clone(), "{not json".to_string());

        assert!(matches!(store.load(), Err(CredentialError::Corrupt(_))));
    }
}

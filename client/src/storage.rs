use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// One slot of the session-state lookup chain. Keys map to opaque string
/// values; absence is `None`, never an error.
pub trait StorageProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    fn clear(&self);
}

/// Durable key-value store (the local-storage slot of the chain).
#[derive(Default)]
pub struct MemoryStorage {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageProvider for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.map.lock().unwrap().insert(key.into(), value.into());
    }

    fn remove(&self, key: &str) {
        self.map.lock().unwrap().remove(key);
    }

    fn clear(&self) {
        self.map.lock().unwrap().clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

#[derive(Clone, Debug)]
pub struct CookieAttributes {
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookieAttributes {
    /// Session cookie, dropped when the store is cleared.
    pub fn session() -> Self {
        Self {
            expires: None,
            secure: false,
            same_site: SameSite::Lax,
        }
    }

    /// Long expiry, secure on HTTPS origins, lax cross-site policy.
    pub fn long_lived(secure: bool) -> Self {
        Self {
            expires: Some(Utc::now() + Duration::days(30)),
            secure,
            same_site: SameSite::Lax,
        }
    }
}

struct Cookie {
    value: String,
    attributes: CookieAttributes,
}

/// Cookie-jar slot of the chain. Expired cookies read as absent and are
/// evicted on access.
#[derive(Default)]
pub struct CookieStorage {
    map: Mutex<HashMap<String, Cookie>>,
}

impl CookieStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_with(&self, key: &str, value: &str, attributes: CookieAttributes) {
        self.map.lock().unwrap().insert(
            key.into(),
            Cookie {
                value: value.into(),
                attributes,
            },
        );
    }

    pub fn attributes(&self, key: &str) -> Option<CookieAttributes> {
        self.map
            .lock()
            .unwrap()
            .get(key)
            .map(|cookie| cookie.attributes.clone())
    }
}

impl StorageProvider for CookieStorage {
    fn get(&self, key: &str) -> Option<String> {
        let mut map = self.map.lock().unwrap();
        if let Some(cookie) = map.get(key) {
            match cookie.attributes.expires {
                Some(expires) if expires <= Utc::now() => {
                    map.remove(key);
                    None
                }
                _ => Some(cookie.value.clone()),
            }
        } else {
            None
        }
    }

    fn set(&self, key: &str, value: &str) {
        self.set_with(key, value, CookieAttributes::session());
    }

    fn remove(&self, key: &str) {
        self.map.lock().unwrap().remove(key);
    }

    fn clear(&self) {
        self.map.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k"), None);
        storage.set("k", "v");
        assert_eq!(storage.get("k"), Some("v".into()));
        storage.remove("k");
        assert_eq!(storage.get("k"), None);
        storage.remove("k");
    }

    #[test]
    fn expired_cookie_reads_as_absent() {
        let storage = CookieStorage::new();
        storage.set_with(
            "refresh_token",
            "stale",
            CookieAttributes {
                expires: Some(Utc::now() - Duration::seconds(1)),
                secure: false,
                same_site: SameSite::Lax,
            },
        );
        assert_eq!(storage.get("refresh_token"), None);
        // evicted, not just masked
        assert!(storage.attributes("refresh_token").is_none());
    }

    #[test]
    fn long_lived_attributes() {
        let storage = CookieStorage::new();
        storage.set_with("refresh_token", "r", CookieAttributes::long_lived(true));
        let attributes = storage.attributes("refresh_token").unwrap();
        assert!(attributes.secure);
        assert_eq!(attributes.same_site, SameSite::Lax);
        assert!(attributes.expires.unwrap() > Utc::now());
    }
}

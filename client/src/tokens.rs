use crate::storage::{CookieAttributes, CookieStorage, MemoryStorage, StorageProvider};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
// pre-rename sessions stored the access token under these
const LEGACY_TOKEN_KEY: &str = "token";
const LEGACY_TOKEN_COOKIE: &str = "userToken";

#[derive(Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &crate::SENSITIVE)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| crate::SENSITIVE),
            )
            .finish()
    }
}

/// Session credentials spread over a durable local store and a cookie jar,
/// plus a scratch session store for feature code. The access and refresh
/// tokens are independently settable; updating one never touches the other.
#[derive(Clone)]
pub struct TokenStore {
    local: Arc<MemoryStorage>,
    session: Arc<MemoryStorage>,
    cookies: Arc<CookieStorage>,
    secure: bool,
}

impl TokenStore {
    /// `secure` marks refresh-token cookies as HTTPS-only.
    pub fn new(secure: bool) -> Self {
        Self {
            local: Arc::new(MemoryStorage::new()),
            session: Arc::new(MemoryStorage::new()),
            cookies: Arc::new(CookieStorage::new()),
            secure,
        }
    }

    pub fn local(&self) -> &MemoryStorage {
        &self.local
    }

    pub fn session(&self) -> &MemoryStorage {
        &self.session
    }

    pub fn cookies(&self) -> &CookieStorage {
        &self.cookies
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.local.get(ACCESS_TOKEN_KEY)
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.cookies.get(REFRESH_TOKEN_COOKIE)
    }

    /// Access token with legacy fallbacks, in priority order.
    pub fn get_auth_token(&self) -> Option<String> {
        let chain: [(&dyn StorageProvider, &str); 3] = [
            (&*self.local, ACCESS_TOKEN_KEY),
            (&*self.cookies, LEGACY_TOKEN_COOKIE),
            (&*self.local, LEGACY_TOKEN_KEY),
        ];
        chain.into_iter().find_map(|(provider, key)| provider.get(key))
    }

    pub fn set_access_token(&self, token: Option<&str>) {
        match token {
            Some(token) => self.local.set(ACCESS_TOKEN_KEY, token),
            None => self.local.remove(ACCESS_TOKEN_KEY),
        }
    }

    pub fn set_refresh_token(&self, token: Option<&str>) {
        match token {
            Some(token) => self.cookies.set_with(
                REFRESH_TOKEN_COOKIE,
                token,
                CookieAttributes::long_lived(self.secure),
            ),
            None => self.cookies.remove(REFRESH_TOKEN_COOKIE),
        }
    }

    /// Sets the access token; the refresh token only when one is supplied.
    pub fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        self.set_access_token(Some(access));
        if let Some(refresh) = refresh {
            self.set_refresh_token(Some(refresh));
        }
    }

    /// Access-only rotation, for gateways that mint a new access token
    /// per request.
    pub fn update_access_token(&self, access: &str) {
        self.set_access_token(Some(access));
    }

    /// Removes current and legacy token artifacts from both storages.
    /// Safe to call when nothing is stored.
    pub fn clear_tokens(&self) {
        self.local.remove(ACCESS_TOKEN_KEY);
        self.local.remove(LEGACY_TOKEN_KEY);
        self.cookies.remove(REFRESH_TOKEN_COOKIE);
        self.cookies.remove(LEGACY_TOKEN_COOKIE);
    }

    /// Full teardown: tokens plus everything feature code parked in the
    /// local, session, and cookie stores.
    pub fn purge_all(&self) {
        self.local.clear();
        self.session.clear();
        self.cookies.clear();
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_auth_token().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_tokens_without_refresh_keeps_refresh() {
        let store = TokenStore::new(false);
        store.set_tokens("a1", Some("r1"));
        store.set_tokens("a2", None);
        assert_eq!(store.get_access_token(), Some("a2".into()));
        assert_eq!(store.get_refresh_token(), Some("r1".into()));
    }

    #[test]
    fn update_access_token_never_touches_refresh() {
        let store = TokenStore::new(false);
        store.set_tokens("a1", Some("r1"));
        store.update_access_token("a2");
        assert_eq!(store.get_refresh_token(), Some("r1".into()));
    }

    #[test]
    fn auth_token_fallback_order() {
        let store = TokenStore::new(false);
        assert_eq!(store.get_auth_token(), None);

        store.local().set("token", "legacy-local");
        assert_eq!(store.get_auth_token(), Some("legacy-local".into()));

        store.cookies().set("userToken", "legacy-cookie");
        assert_eq!(store.get_auth_token(), Some("legacy-cookie".into()));

        store.set_access_token(Some("current"));
        assert_eq!(store.get_auth_token(), Some("current".into()));
    }

    #[test]
    fn clear_tokens_is_idempotent_and_drops_legacy_keys() {
        let store = TokenStore::new(false);
        store.clear_tokens();

        store.set_tokens("a", Some("r"));
        store.local().set("token", "legacy-local");
        store.cookies().set("userToken", "legacy-cookie");
        store.clear_tokens();
        store.clear_tokens();
        assert!(!store.is_authenticated());
        assert_eq!(store.get_refresh_token(), None);
    }

    #[test]
    fn debug_redacts_tokens() {
        let pair = TokenPair {
            access_token: "secret-access".into(),
            refresh_token: Some("secret-refresh".into()),
        };
        let debug = format!("{pair:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }
}

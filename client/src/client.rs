use crate::tokens::{TokenPair, TokenStore};
use crate::Error;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";
pub const NEW_ACCESS_TOKEN_HEADER: &str = "x-new-access-token";

const EXPIRED_TOKEN_CODES: &[&str] = &[
    "TOKEN_EXPIRED_NO_REFRESH",
    "INVALID_ACCESS_TOKEN",
    "ACCESS_TOKEN_DECODE_FAILED",
    "NO_ACCESS_TOKEN",
];
const FORCED_LOGOUT_CODES: &[&str] = &["USER_NOT_FOUND", "USER_INACTIVE"];
const EXPIRED_TOKEN_PHRASES: &[&str] = &["expired", "Invalid token", "Authorization header missing"];

type RefreshWaiter = oneshot::Sender<Result<String, String>>;

enum RefreshState {
    Idle,
    Refreshing(Vec<RefreshWaiter>),
}

type LogoutHook = Box<dyn Fn() + Send + Sync>;

struct Inner {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
    refresh: Mutex<RefreshState>,
    logging_out: AtomicBool,
    logout_hook: Mutex<Option<LogoutHook>>,
}

enum Step {
    Done(Value),
    Retry,
}

/// Authenticated HTTP client. Attaches the stored credentials to every
/// outbound request, watches responses for auth-failure and token-rotation
/// signals, and keeps at most one refresh call in flight.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_owned();
        let secure = base_url.starts_with("https://");
        Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                tokens: TokenStore::new(secure),
                refresh: Mutex::new(RefreshState::Idle),
                logging_out: AtomicBool::new(false),
                logout_hook: Mutex::new(None),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.tokens.is_authenticated()
    }

    /// Registers the teardown callback (navigation to the login entry
    /// point, in an embedding UI). Invoked at most once per teardown.
    pub fn on_logout(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.logout_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Primes the store after a successful credential exchange and re-arms
    /// the logout guard.
    pub fn complete_login(&self, tokens: &TokenPair) {
        self.inner
            .tokens
            .set_tokens(&tokens.access_token, tokens.refresh_token.as_deref());
        self.inner.logging_out.store(false, Ordering::SeqCst);
    }

    /// Terminal failure action shared by every unrecoverable-auth trigger:
    /// drop all token artifacts, wipe local/session/cookie state, and fire
    /// the logout hook. A second trigger while a teardown is pending is a
    /// no-op.
    pub fn force_logout(&self) {
        if self.inner.logging_out.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("unrecoverable auth failure, tearing down session");
        self.inner.tokens.clear_tokens();
        self.inner.tokens.purge_all();
        let hook = self.inner.logout_hook.lock().unwrap();
        if let Some(hook) = hook.as_ref() {
            hook();
        }
    }

    /// Sends a request, absorbing recoverable auth failures: silent token
    /// rotation and expired-token 401s are handled in place, with at most
    /// one re-issue of the original request.
    #[tracing::instrument(err, skip(self, body))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let mut retried = false;
        loop {
            match self.send_once(&method, path, query, body, retried).await? {
                Step::Done(value) => return Ok(value),
                Step::Retry => retried = true,
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
        retried: bool,
    ) -> Result<Step, Error> {
        let mut request = self
            .inner
            .http
            .request(method.clone(), format!("{}{}", self.inner.base_url, path));
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(token) = self.inner.tokens.get_auth_token() {
            request = request.bearer_auth(token);
        }
        if let Some(token) = self.inner.tokens.get_refresh_token() {
            request = request.header(REFRESH_TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        let rotated = response
            .headers()
            .get(NEW_ACCESS_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let text = response.text().await?;

        if status.is_success() {
            let value: Value = serde_json::from_str(&text)?;
            if value.get("status").and_then(Value::as_i64) == Some(3) {
                tracing::warn!("server reports no valid session");
                self.force_logout();
                return Err(Error::SessionRevoked);
            }
            if let Some(token) = &rotated {
                // the gateway already applied the new token, no retry needed
                self.inner.tokens.update_access_token(token);
            }
            if let Some(token) = body_rotated_token(&value) {
                self.inner.tokens.update_access_token(token);
                if !retried {
                    tracing::debug!("access token rotated in body, re-issuing request");
                    return Ok(Step::Retry);
                }
            }
            Ok(Step::Done(value))
        } else {
            let value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) => Value::String(text),
            };
            if has_code(&value, FORCED_LOGOUT_CODES) {
                self.force_logout();
                return Err(Error::Api {
                    status,
                    body: value,
                });
            }
            if status == StatusCode::UNAUTHORIZED && is_expired_token(&value) && !retried {
                self.refresh_access_token().await?;
                return Ok(Step::Retry);
            }
            Err(Error::Api {
                status,
                body: value,
            })
        }
    }

    /// Single-flight refresh. Callers arriving while a refresh is in
    /// flight park on the queue and observe that one refresh's outcome.
    async fn refresh_access_token(&self) -> Result<String, Error> {
        // entering Refreshing happens under the lock, before any await
        let waiter = {
            let mut state = self.inner.refresh.lock().unwrap();
            match &mut *state {
                RefreshState::Refreshing(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing(Vec::new());
                    None
                }
            }
        };

        if let Some(waiter) = waiter {
            tracing::debug!("refresh already in flight, waiting");
            return match waiter.await {
                Ok(Ok(token)) => Ok(token),
                Ok(Err(message)) => Err(Error::RefreshFailed(message)),
                Err(_) => Err(Error::RefreshFailed("refresh abandoned".into())),
            };
        }

        let result = self.run_refresh().await;

        let waiters = {
            let mut state = self.inner.refresh.lock().unwrap();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing(waiters) => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };
        match &result {
            Ok(token) => {
                for waiter in waiters {
                    let _ = waiter.send(Ok(token.clone()));
                }
            }
            Err(error) => {
                let message = error.to_string();
                for waiter in waiters {
                    let _ = waiter.send(Err(message.clone()));
                }
                self.force_logout();
            }
        }
        result
    }

    #[tracing::instrument(err, skip(self))]
    async fn run_refresh(&self) -> Result<String, Error> {
        let refresh_token = self
            .inner
            .tokens
            .get_refresh_token()
            .ok_or(Error::NoRefreshToken)?;

        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            status: i64,
            access_token: Option<String>,
            refresh_token: Option<String>,
        }

        let response: Response = crate::check_response(
            self.inner
                .http
                .post(format!("{}/refresh-token/", self.inner.base_url))
                .header(REFRESH_TOKEN_HEADER, &refresh_token)
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        match response {
            Response {
                status: 1,
                access_token: Some(access),
                refresh_token,
            } => {
                // keep the old refresh token unless the server rotated it
                self.inner.tokens.set_tokens(&access, refresh_token.as_deref());
                Ok(access)
            }
            _ => Err(Error::RefreshFailed(
                "refresh endpoint returned no token".into(),
            )),
        }
    }
}

fn has_code(body: &Value, codes: &[&str]) -> bool {
    body.get("error_code")
        .and_then(Value::as_str)
        .is_some_and(|code| codes.contains(&code))
}

fn is_expired_token(body: &Value) -> bool {
    has_code(body, EXPIRED_TOKEN_CODES)
        || body
            .get("message")
            .and_then(Value::as_str)
            .is_some_and(|message| {
                EXPIRED_TOKEN_PHRASES
                    .iter()
                    .any(|phrase| message.contains(phrase))
            })
}

// Backend quirk: ordinary success bodies also carry `status: 1`, so a
// body-driven rotation is only recognized when the message mentions the
// access token.
fn body_rotated_token(body: &Value) -> Option<&str> {
    if body.get("status").and_then(Value::as_i64) != Some(1) {
        return None;
    }
    let token = body.get("access_token")?.as_str()?;
    let message = body.get("message").and_then(Value::as_str)?;
    message.contains("access token").then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expired_token_markers() {
        assert!(is_expired_token(
            &json!({"error_code": "TOKEN_EXPIRED_NO_REFRESH"})
        ));
        assert!(is_expired_token(&json!({"error_code": "NO_ACCESS_TOKEN"})));
        assert!(is_expired_token(&json!({"message": "Signature has expired"})));
        assert!(is_expired_token(&json!({"message": "Invalid token"})));
        assert!(is_expired_token(
            &json!({"message": "Authorization header missing"})
        ));
        assert!(!is_expired_token(&json!({"message": "permission denied"})));
        assert!(!is_expired_token(&json!("not even json")));
    }

    #[test]
    fn forced_logout_markers() {
        assert!(has_code(
            &json!({"error_code": "USER_NOT_FOUND"}),
            FORCED_LOGOUT_CODES
        ));
        assert!(has_code(
            &json!({"error_code": "USER_INACTIVE"}),
            FORCED_LOGOUT_CODES
        ));
        assert!(!has_code(
            &json!({"error_code": "TOKEN_EXPIRED_NO_REFRESH"}),
            FORCED_LOGOUT_CODES
        ));
    }

    #[test]
    fn body_rotation_needs_the_access_token_phrase() {
        assert_eq!(
            body_rotated_token(
                &json!({"status": 1, "access_token": "t", "message": "access token refreshed"})
            ),
            Some("t")
        );
        assert_eq!(
            body_rotated_token(&json!({"status": 1, "access_token": "t", "message": "ok"})),
            None
        );
        assert_eq!(
            body_rotated_token(&json!({"status": 0, "access_token": "t"})),
            None
        );
    }

    #[test]
    fn force_logout_is_idempotent() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let client = Client::new("http://localhost", reqwest::Client::new());
        client.tokens().set_tokens("a", Some("r"));
        let redirects = Arc::new(AtomicUsize::new(0));
        let counter = redirects.clone();
        client.on_logout(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.force_logout();
        client.force_logout();

        assert!(!client.is_authenticated());
        assert_eq!(client.tokens().get_refresh_token(), None);
        assert_eq!(redirects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn login_rearms_the_logout_guard() {
        let client = Client::new("http://localhost", reqwest::Client::new());
        client.force_logout();
        client.complete_login(&TokenPair {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
        });
        assert!(client.is_authenticated());
        client.force_logout();
        assert!(!client.is_authenticated());
    }
}

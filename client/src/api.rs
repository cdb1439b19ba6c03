use crate::cache::ResponseCache;
use crate::client::Client;
use crate::tokens::TokenPair;
use crate::Error;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verb-shaped helpers over [`Client`] for feature code. Write-style calls
/// never return `Err`; transport failures are folded into the result so
/// callers can render a message without branching on exceptions.
#[derive(Clone)]
pub struct Api {
    client: Client,
    cache: ResponseCache,
}

#[derive(Debug)]
pub struct ApiResult<T> {
    pub status: bool,
    pub message: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResult<T> {
    fn failure(message: &str, error: impl std::fmt::Display) -> Self {
        Self {
            status: false,
            message: message.into(),
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl Api {
    pub fn new(client: Client) -> Self {
        Self::with_cache(client, ResponseCache::new())
    }

    pub fn with_cache(client: Client, cache: ResponseCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn get<T>(&self, path: &str, query: Option<&[(&str, &str)]>) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let value = self.client.request(Method::GET, path, query, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Read-through variant; a hit skips the network entirely, a miss
    /// populates the cache before returning.
    pub async fn get_cached<T>(
        &self,
        path: &str,
        query: Option<&[(&str, &str)]>,
        use_cache: bool,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let key = cache_key(path, query);
        if use_cache {
            if let Some(value) = self.cache.get(&key) {
                tracing::debug!(%key, "cache hit");
                return Ok(serde_json::from_value(value)?);
            }
        }
        let value = self.client.request(Method::GET, path, query, None).await?;
        self.cache.set(&key, value.clone(), None);
        Ok(serde_json::from_value(value)?)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.write(Method::POST, path, body).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.write(Method::PUT, path, body).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.write(Method::PATCH, path, body).await
    }

    pub async fn delete<T>(&self, path: &str) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        finish_write(self.client.request(Method::DELETE, path, None, None).await)
    }

    async fn write<B, T>(&self, method: Method, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let body = match serde_json::to_value(body) {
            Ok(body) => body,
            Err(error) => return ApiResult::failure("request could not be serialized", error),
        };
        finish_write(self.client.request(method, path, None, Some(&body)).await)
    }

    /// Two-step presigned upload: obtain a short-lived write URL for the
    /// object `key`, then PUT the bytes directly to it. Returns the
    /// canonical object URL with the signing query stripped.
    #[tracing::instrument(err, skip(self, bytes))]
    pub async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, Error> {
        #[derive(Serialize)]
        struct Request<'a> {
            key: &'a str,
            content_type: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            status: i64,
            url: Option<String>,
        }

        let body = serde_json::to_value(Request { key, content_type })?;
        let presign = self
            .client
            .request(Method::POST, "/uploads/presign/", None, Some(&body))
            .await?;
        let presign: Response = serde_json::from_value(presign)?;
        let url = match presign {
            Response {
                status: 1,
                url: Some(url),
            } => url,
            _ => return Err(Error::Upload("backend returned no presigned URL".into())),
        };

        let response = self
            .client
            .http()
            .put(&url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(Error::Upload(format!("[{status}] {body}")));
        }
        Ok(url.split('?').next().unwrap_or(&url).to_owned())
    }

    /// Exchanges credentials for a token pair and primes the token store.
    #[tracing::instrument(err, skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(), Error> {
        #[derive(Serialize)]
        struct Request<'a> {
            email: &'a str,
            password: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            status: i64,
            access_token: Option<String>,
            refresh_token: Option<String>,
            message: Option<String>,
        }

        let body = serde_json::to_value(Request { email, password })?;
        let response = self
            .client
            .request(Method::POST, "/login/", None, Some(&body))
            .await?;
        let response: Response = serde_json::from_value(response)?;
        match response {
            Response {
                status: 1,
                access_token: Some(access_token),
                refresh_token,
                ..
            } => {
                self.client.complete_login(&TokenPair {
                    access_token,
                    refresh_token,
                });
                Ok(())
            }
            Response { message, .. } => Err(Error::Login(
                message.unwrap_or_else(|| "invalid credentials".into()),
            )),
        }
    }

    /// Best-effort server-side logout, then local teardown either way.
    pub async fn logout(&self) {
        if let Err(error) = self.client.request(Method::POST, "/logout/", None, None).await {
            tracing::debug!(%error, "logout call failed, tearing down anyway");
        }
        self.cache.clear(None);
        self.client.force_logout();
    }
}

fn finish_write<T>(outcome: Result<Value, Error>) -> ApiResult<T>
where
    T: DeserializeOwned,
{
    match outcome {
        Ok(value) => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let data = serde_json::from_value(value).ok();
            ApiResult {
                status: true,
                message,
                data,
                error: None,
            }
        }
        Err(error) => ApiResult::failure("request failed", error),
    }
}

fn cache_key(path: &str, query: Option<&[(&str, &str)]>) -> String {
    match query {
        Some(query) if !query.is_empty() => {
            let query: Vec<_> = query
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            format!("{path}?{}", query.join("&"))
        }
        _ => path.to_owned(),
    }
}

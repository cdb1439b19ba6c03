pub mod api;
pub mod cache;
pub mod client;
mod error;
pub mod storage;
pub mod tokens;

pub use api::{Api, ApiResult};
pub use cache::ResponseCache;
pub use client::Client;
pub use error::Error;
pub use tokens::{TokenPair, TokenStore};

const SENSITIVE: &str = "***";

pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await?;
        let body = match serde_json::from_str(&body) {
            Ok(body) => body,
            Err(_) => serde_json::Value::String(body),
        };
        Err(Error::Api { status, body })
    }
}

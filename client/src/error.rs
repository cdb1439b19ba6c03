use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("[{status}] {body}")]
    Api {
        status: StatusCode,
        body: serde_json::Value,
    },
    #[error("session revoked by server")]
    SessionRevoked,
    #[error("no refresh token available")]
    NoRefreshToken,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("login rejected: {0}")]
    Login(String),
    #[error("upload failed: {0}")]
    Upload(String),
}

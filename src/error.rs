use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("No Claude credentials found")]
    NoCredentials,

    #[error("API error: {0}")]
    ApiFailed(u16),

    #[error("request timed out")]
    Timeout,

    #[error("config error: {0}")]
    Config(String),

    #[error("refresh task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(reqwest::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout
        } else {
            AppError::Http(err)
        }
    }
}

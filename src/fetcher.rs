use crate::config::AppConfig;
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::{Map, Value};

/// Top-level object of the usage endpoint's response, in document order.
pub type RawDocument = Map<String, Value>;

#[async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch(&self, token: &str) -> Result<RawDocument, AppError>;
}

pub struct HttpUsageFetcher {
    client: Client,
    endpoint: String,
    beta_header: String,
}

impl HttpUsageFetcher {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        Self::from_builder(Client::builder(), cfg)
    }

    fn from_builder(builder: ClientBuilder, cfg: &AppConfig) -> Result<Self, AppError> {
        let client = builder.timeout(cfg.request_timeout()).build()?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            beta_header: cfg.beta_header.clone(),
        })
    }

    fn parse_body(body: &[u8]) -> Result<RawDocument, AppError> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(AppError::ApiFailed(0)),
        }
    }
}

#[async_trait]
impl UsageFetcher for HttpUsageFetcher {
    async fn fetch(&self, token: &str) -> Result<RawDocument, AppError> {
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .header("anthropic-beta", &self.beta_header)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(status = status.as_u16(), "usage endpoint rejected request");
            return Err(AppError::ApiFailed(status.as_u16()));
        }

        let body = response.bytes().await?;
        Self::parse_body(&body)
    }
}

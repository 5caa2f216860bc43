use crate::config::CredentialSettings;
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

pub const TOKEN_ENV_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Something that can hand out the bearer token for the usage endpoint.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn token(&self) -> Result<String, AppError>;
}

/// Pulls `claudeAiOauth.accessToken` out of the JSON blob Claude Code stores.
pub fn parse_oauth_blob(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::NoCredentials);
    }

    let blob: Value = serde_json::from_str(raw).map_err(|_| AppError::NoCredentials)?;
    blob.get("claudeAiOauth")
        .and_then(|oauth| oauth.get("accessToken"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .ok_or(AppError::NoCredentials)
}

pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn token(&self) -> Result<String, AppError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(AppError::NoCredentials),
        }
    }
}

pub struct KeychainCredentials {
    service: String,
    account: String,
}

impl KeychainCredentials {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn read_blocking(service: &str, account: &str) -> Result<String, AppError> {
        let entry = keyring::Entry::new(service, account).map_err(|e| {
            tracing::debug!(error = %e, "keychain entry unavailable");
            AppError::NoCredentials
        })?;
        let secret = entry.get_password().map_err(|e| {
            tracing::debug!(error = %e, "keychain lookup failed");
            AppError::NoCredentials
        })?;
        parse_oauth_blob(&secret)
    }
}

#[async_trait]
impl CredentialSource for KeychainCredentials {
    fn name(&self) -> &'static str {
        "keychain"
    }

    async fn token(&self) -> Result<String, AppError> {
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || Self::read_blocking(&service, &account))
            .await
            .map_err(|e| AppError::Task(e.to_string()))?
    }
}

pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialSource for FileCredentials {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn token(&self) -> Result<String, AppError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let raw = fs::read_to_string(&path).map_err(|e| {
                tracing::debug!(path = %path.display(), error = %e, "credentials file unreadable");
                AppError::NoCredentials
            })?;
            parse_oauth_blob(&raw)
        })
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
    }
}

/// Tries each source in order and returns the first token found.
pub struct CredentialChain {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialChain {
    pub fn new(sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    pub fn from_settings(settings: &CredentialSettings) -> Self {
        let mut sources: Vec<Box<dyn CredentialSource>> = Vec::new();
        if settings.use_env {
            sources.push(Box::new(EnvCredentials::new(TOKEN_ENV_VAR)));
        }
        if settings.use_keychain {
            if let Some(account) = settings.keychain_account() {
                sources.push(Box::new(KeychainCredentials::new(
                    settings.keychain_service.clone(),
                    account,
                )));
            }
        }
        if let Some(path) = settings.credentials_file() {
            sources.push(Box::new(FileCredentials::new(path)));
        }
        Self::new(sources)
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl CredentialSource for CredentialChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn token(&self) -> Result<String, AppError> {
        for source in &self.sources {
            match source.token().await {
                Ok(token) => {
                    tracing::debug!(source = source.name(), "using credentials");
                    return Ok(token);
                }
                Err(AppError::NoCredentials) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AppError::NoCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl CredentialSource for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn token(&self) -> Result<String, AppError> {
            self.0.map(ToString::to_string).ok_or(AppError::NoCredentials)
        }
    }

    #[test]
    fn parse_oauth_blob_extracts_access_token() {
        let token = parse_oauth_blob(
            r#"{"claudeAiOauth":{"accessToken":"sk-ant-oat01-abc","refreshToken":"r"}}"#,
        )
        .expect("token");
        assert_eq!(token, "sk-ant-oat01-abc");
    }

    #[test]
    fn parse_oauth_blob_rejects_unusable_input() {
        for raw in [
            "",
            "   \n",
            "not json",
            r#"{"claudeAiOauth":{}}"#,
            r#"{"claudeAiOauth":{"accessToken":""}}"#,
            r#"{"accessToken":"top-level"}"#,
        ] {
            assert!(
                matches!(parse_oauth_blob(raw), Err(AppError::NoCredentials)),
                "accepted {raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn file_source_reads_claude_credentials_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join(".credentials.json");
        fs::write(&path, r#"{"claudeAiOauth":{"accessToken":"from-file"}}"#).expect("write");

        let token = FileCredentials::new(&path).token().await.expect("token");
        assert_eq!(token, "from-file");
    }

    #[tokio::test]
    async fn file_source_without_file_has_no_credentials() {
        let tmp = TempDir::new().expect("tempdir");
        let err = FileCredentials::new(tmp.path().join("missing.json"))
            .token()
            .await
            .expect_err("missing file");
        assert!(matches!(err, AppError::NoCredentials));
    }

    #[tokio::test]
    async fn env_source_without_variable_has_no_credentials() {
        let source = EnvCredentials::new("LIMITER_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(matches!(source.token().await, Err(AppError::NoCredentials)));
    }

    #[tokio::test]
    async fn chain_returns_first_available_token() {
        let chain = CredentialChain::new(vec![
            Box::new(Fixed(None)),
            Box::new(Fixed(Some("second"))),
            Box::new(Fixed(Some("third"))),
        ]);
        assert_eq!(chain.token().await.expect("token"), "second");
    }

    #[tokio::test]
    async fn empty_chain_has_no_credentials() {
        let chain = CredentialChain::new(vec![Box::new(Fixed(None))]);
        assert!(matches!(chain.token().await, Err(AppError::NoCredentials)));
    }

    #[test]
    fn from_settings_respects_disabled_sources() {
        let settings = CredentialSettings {
            use_env: false,
            use_keychain: false,
            credentials_file: Some(PathBuf::from("/nonexistent/creds.json")),
            ..CredentialSettings::default()
        };
        assert_eq!(
            CredentialChain::from_settings(&settings).source_names(),
            vec!["file"]
        );
    }
}

use std::fmt;
use std::time::Duration;

use crate::error::{ConnectorError, Result};

/// コネクタに渡すログイン情報 (ログには出さない)
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub otp: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            otp: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// 設定から開くトランスポートの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Http,
    Browser,
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub credentials: Credentials,
    /// コネクタ既定のベースURLを上書きする。複数ドメインで運営される
    /// サイトでは必須
    pub base_url: Option<String>,
    pub transport: TransportKind,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_pages: usize,
    pub headless: bool,
    pub debug: bool,
    pub user_agent: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            base_url: None,
            transport: TransportKind::Http,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(1000),
            max_pages: 100,
            headless: true,
            debug: false,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"
                .to_string(),
        }
    }
}

impl ConnectorConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(username, password),
            ..Default::default()
        }
    }

    /// `<PREFIX>_USERNAME` と `<PREFIX>_PASSWORD` を読む。
    /// `<PREFIX>_OTP` と `<PREFIX>_BASE_URL` は任意
    pub fn from_env(prefix: &str) -> Result<Self> {
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();
        let username = var("USERNAME")
            .ok_or_else(|| ConnectorError::Config(format!("{}_USERNAME not set", prefix)))?;
        let password = var("PASSWORD")
            .ok_or_else(|| ConnectorError::Config(format!("{}_PASSWORD not set", prefix)))?;

        let mut config = Self::new(username, password);
        config.credentials.otp = var("OTP").filter(|otp| !otp.is_empty());
        config.base_url = var("BASE_URL").filter(|url| !url.is_empty());
        Ok(config)
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.credentials.otp = Some(otp.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 上書きされたベースURL、なければコネクタ既定値
    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConnectorConfig::new("user", "pass")
            .with_headless(false)
            .with_base_url("https://example.org/")
            .with_timeout(Duration::from_secs(120))
            .with_max_retries(5);

        assert_eq!(config.credentials.username, "user");
        assert_eq!(config.credentials.password, "pass");
        assert!(!config.headless);
        assert_eq!(config.base_url_or("https://default/"), "https://example.org/");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let config = ConnectorConfig::new("alice", "hunter2").with_otp("123456");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("123456"));
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("CFGTEST_USERNAME", "u");
        std::env::set_var("CFGTEST_PASSWORD", "p");
        std::env::set_var("CFGTEST_BASE_URL", "https://site.example/");
        let config = ConnectorConfig::from_env("CFGTEST").unwrap();
        assert_eq!(config.credentials, Credentials::new("u", "p"));
        assert_eq!(config.base_url.as_deref(), Some("https://site.example/"));

        let missing = ConnectorConfig::from_env("CFGTEST_MISSING").unwrap_err();
        assert!(matches!(missing, ConnectorError::Config(_)));
    }
}

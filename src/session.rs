//! セッション管理
//!
//! 1回の認証済み実行が使うトランスポート (Cookie込み)、
//! ナビゲーションマップ、ログイン手順を所有する。

use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::navigation::NavigationMap;
use crate::page::ResolvedPage;
use crate::retry::RetryPolicy;
use crate::traits::LoginFlow;
use crate::transport::{HttpRequest, HttpResponse, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Anonymous,
    Authenticated,
    TornDown,
}

pub struct Session<K> {
    config: ConnectorConfig,
    transport: Box<dyn Transport>,
    navigation: NavigationMap<K>,
    login: Arc<dyn LoginFlow<K>>,
    retry: RetryPolicy,
    state: AuthState,
    current: Option<(K, String)>,
    login_attempts: u32,
}

impl<K> Session<K>
where
    K: Copy + Eq + Debug + Send + Sync + 'static,
{
    pub fn new(
        config: ConnectorConfig,
        transport: Box<dyn Transport>,
        navigation: NavigationMap<K>,
        login: impl LoginFlow<K> + 'static,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            config,
            transport,
            navigation,
            login: Arc::new(login),
            retry,
            state: AuthState::Anonymous,
            current: None,
            login_attempts: 0,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn navigation(&self) -> &NavigationMap<K> {
        &self.navigation
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn login_attempts(&self) -> u32 {
        self.login_attempts
    }

    pub fn current_kind(&self) -> Option<K> {
        self.current.as_ref().map(|(kind, _)| *kind)
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(|(_, url)| url.as_str())
    }

    pub fn is_here(&self, kind: K) -> bool {
        self.current_kind() == Some(kind)
    }

    pub fn absolute(&self, target: &str) -> Result<String> {
        self.navigation.absolute(target)
    }

    /// サイトのログイン手順を実行
    pub async fn authenticate(&mut self) -> Result<()> {
        self.check_open()?;
        self.state = AuthState::Anonymous;
        self.login_attempts += 1;
        info!("Logging in (attempt {})", self.login_attempts);

        let flow = Arc::clone(&self.login);
        let credentials = self.config.credentials.clone();
        match flow.login(self, &credentials).await {
            Ok(()) => {
                self.state = AuthState::Authenticated;
                info!("Login successful");
                Ok(())
            }
            Err(e) => {
                warn!("Login failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn ensure_authenticated(&mut self) -> Result<()> {
        if self.is_authenticated() {
            return Ok(());
        }
        self.authenticate().await
    }

    /// 1回のやり取り (接続失敗時は再送) をナビゲーションマップで判定する。
    /// 5xxは `UpstreamUnavailable`、4xxは `Http` になる
    pub async fn fetch(&mut self, request: HttpRequest) -> Result<ResolvedPage<K>> {
        let response = self.send(request).await?;
        self.resolve_response(response)
    }

    /// 取得済みレスポンスに [`Session::fetch`] と同じステータス判定をかけて
    /// ページを判定する
    pub fn resolve_response(&mut self, response: HttpResponse) -> Result<ResolvedPage<K>> {
        if response.status >= 500 {
            return Err(ConnectorError::UpstreamUnavailable {
                status: response.status,
                url: response.url,
            });
        }
        if response.status >= 400 {
            return Err(ConnectorError::Http {
                status: response.status,
                url: response.url,
            });
        }

        let resolution = self.navigation.resolve(&response.url)?;
        debug!("{} -> {:?}", response.url, resolution.kind);
        self.current = Some((resolution.kind, response.url.clone()));

        let content_type = response.content_type().map(str::to_string);
        Ok(ResolvedPage::new(
            resolution.kind,
            response.url,
            response.status,
            resolution.params,
            content_type,
            response.body,
        ))
    }

    /// ステータス確認もページ判定もしないやり取り
    pub async fn fetch_raw(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        self.send(request).await
    }

    pub async fn get(&mut self, url: &str) -> Result<ResolvedPage<K>> {
        self.fetch(HttpRequest::get(url)).await
    }

    /// `expected` のいずれかに着地すべき認証済み取得
    ///
    /// ログインページに着地したらセッション切れとみなし、再ログインして
    /// 同じリクエストを一度だけ送り直す
    pub async fn fetch_expecting(
        &mut self,
        request: HttpRequest,
        expected: &[K],
    ) -> Result<ResolvedPage<K>> {
        self.ensure_authenticated().await?;

        let page = self.fetch(request.clone()).await?;
        if expected.contains(&page.kind) {
            return Ok(page);
        }
        if !self.login.is_login_page(page.kind) {
            return Err(ConnectorError::SiteAssertion(format!(
                "expected {:?}, landed on {:?} at {}",
                expected, page.kind, page.url
            )));
        }

        warn!("Logged out while fetching {}, logging in again", request.url);
        self.authenticate().await?;

        let page = self.fetch(request).await?;
        if expected.contains(&page.kind) {
            Ok(page)
        } else {
            Err(ConnectorError::SiteAssertion(format!(
                "still on {:?} after logging in again ({})",
                page.kind, page.url
            )))
        }
    }

    /// 認証済みならログアウトし、トランスポートを閉じる。
    /// 2回目以降は何もしない
    pub async fn teardown(&mut self) -> Result<()> {
        if self.state == AuthState::TornDown {
            return Ok(());
        }
        if self.state == AuthState::Authenticated {
            let flow = Arc::clone(&self.login);
            if let Err(e) = flow.logout(self).await {
                warn!("Logout failed: {}", e);
            }
        }

        self.state = AuthState::TornDown;
        self.current = None;
        info!("Session closed");
        self.transport.close().await
    }

    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        self.check_open()?;
        request.url = self.navigation.absolute(&request.url)?;

        let transport = &self.transport;
        let timeout = self.config.timeout;
        let request = &request;
        self.retry
            .run("fetch", move || transport.send(request, timeout))
            .await
    }

    fn check_open(&self) -> Result<()> {
        if self.state == AuthState::TornDown {
            return Err(ConnectorError::Config("session already torn down".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::Credentials;
    use crate::transport::{MockReply, MockTransport};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Kind {
        Login,
        Home,
        History,
    }

    struct FormLogin;

    #[async_trait]
    impl LoginFlow<Kind> for FormLogin {
        async fn login(&self, session: &mut Session<Kind>, credentials: &Credentials) -> Result<()> {
            let page = session
                .fetch(HttpRequest::post_form(
                    "/login",
                    [
                        ("user", credentials.username.as_str()),
                        ("pass", credentials.password.as_str()),
                    ],
                ))
                .await?;
            if page.kind == Kind::Login {
                return Err(ConnectorError::InvalidCredentials("bad password".into()));
            }
            Ok(())
        }

        fn is_login_page(&self, kind: Kind) -> bool {
            kind == Kind::Login
        }

        async fn logout(&self, session: &mut Session<Kind>) -> Result<()> {
            session.fetch_raw(HttpRequest::get("/logout")).await?;
            Ok(())
        }
    }

    pub(crate) fn test_config() -> ConnectorConfig {
        ConnectorConfig::new("user", "secret")
            .with_retry_backoff(Duration::ZERO)
            .with_max_retries(2)
    }

    pub(crate) fn session(mock: &MockTransport) -> Session<Kind> {
        let navigation = NavigationMap::builder("https://bank.example/")
            .rule(Kind::Login, &["/login"])
            .rule(Kind::Home, &["/home"])
            .rule(Kind::History, &[r"/history(\?page=(?P<page>\d+))?"])
            .build()
            .unwrap();
        Session::new(test_config(), Box::new(mock.clone()), navigation, FormLogin)
    }

    #[tokio::test]
    async fn test_ensure_authenticated_is_idempotent() {
        let mock = MockTransport::new();
        mock.push_html("https://bank.example/home", "<p>welcome</p>");
        let mut session = session(&mock);

        session.ensure_authenticated().await.unwrap();
        session.ensure_authenticated().await.unwrap();

        assert_eq!(session.login_attempts(), 1);
        assert_eq!(mock.request_count(), 1);
        assert!(session.is_authenticated());
        assert!(session.is_here(Kind::Home));
    }

    #[tokio::test]
    async fn test_invalid_credentials_leave_session_anonymous() {
        let mock = MockTransport::new();
        mock.push_html("https://bank.example/login", "<p>wrong password</p>");
        let mut session = session(&mock);

        let err = session.ensure_authenticated().await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidCredentials(_)));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_fetch_resolves_and_exposes_params() {
        let mock = MockTransport::new();
        mock.push_html("", "<table></table>");
        let mut session = session(&mock);

        let page = session.get("/history?page=3").await.unwrap();
        assert_eq!(page.kind, Kind::History);
        assert_eq!(page.param("page").unwrap(), "3");
        assert_eq!(mock.requests()[0].url, "https://bank.example/history?page=3");
        assert_eq!(session.current_url(), Some("https://bank.example/history?page=3"));
    }

    #[tokio::test]
    async fn test_unrecognized_and_status_errors() {
        let mock = MockTransport::new();
        mock.push_html("https://bank.example/maintenance", "")
            .push_status("", 503, "down")
            .push_status("", 404, "missing");
        let mut session = session(&mock);

        assert!(matches!(
            session.get("/home").await,
            Err(ConnectorError::UnrecognizedPage { .. })
        ));
        assert!(matches!(
            session.get("/home").await,
            Err(ConnectorError::UpstreamUnavailable { status: 503, .. })
        ));
        assert!(matches!(
            session.get("/home").await,
            Err(ConnectorError::Http { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let mock = MockTransport::new();
        mock.push_reset()
            .push(MockReply::Timeout)
            .push_html("", "ok")
            .push_reset()
            .push_reset()
            .push_reset();
        let mut session = session(&mock);

        // two transient failures, budget two: third attempt wins
        let page = session.get("/home").await.unwrap();
        assert_eq!(page.body(), "ok");
        assert_eq!(mock.request_count(), 3);

        // three failures exceed the budget
        let err = session.get("/home").await.unwrap_err();
        assert!(matches!(err, ConnectorError::TransientNetwork { attempts: 3, .. }));
        assert_eq!(mock.request_count(), 6);
    }

    #[tokio::test]
    async fn test_relogin_resumes_same_request() {
        let mock = MockTransport::new();
        mock.push_html("https://bank.example/home", "") // login
            .push_html("https://bank.example/login", "") // silently logged out
            .push_html("https://bank.example/home", "") // login again
            .push_html("", "<p>page 2</p>");
        let mut session = session(&mock);

        let page = session
            .fetch_expecting(HttpRequest::get("/history?page=2"), &[Kind::History])
            .await
            .unwrap();

        assert_eq!(page.body(), "<p>page 2</p>");
        assert_eq!(session.login_attempts(), 2);
        let urls: Vec<String> = mock.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://bank.example/login",
                "https://bank.example/history?page=2",
                "https://bank.example/login",
                "https://bank.example/history?page=2",
            ]
        );
    }

    #[tokio::test]
    async fn test_unexpected_page_is_a_site_assertion() {
        let mock = MockTransport::new();
        mock.push_html("https://bank.example/home", "")
            .push_html("https://bank.example/home", "");
        let mut session = session(&mock);

        let err = session
            .fetch_expecting(HttpRequest::get("/history"), &[Kind::History])
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::SiteAssertion(_)));
    }

    #[tokio::test]
    async fn test_teardown_logs_out_once() {
        let mock = MockTransport::new();
        mock.push_html("https://bank.example/home", "")
            .push_html("https://bank.example/", "bye");
        let mut session = session(&mock);
        session.ensure_authenticated().await.unwrap();

        session.teardown().await.unwrap();
        session.teardown().await.unwrap();

        assert_eq!(mock.request_count(), 2);
        assert_eq!(mock.requests()[1].url, "https://bank.example/logout");
        assert!(mock.is_closed());
        assert!(matches!(
            session.get("/home").await,
            Err(ConnectorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_teardown_without_login_skips_logout() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        session.teardown().await.unwrap();
        assert_eq!(mock.request_count(), 0);
        assert!(mock.is_closed());
    }
}

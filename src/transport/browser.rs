//! Headless Chrome transport for sites that only render behind JavaScript.
//!
//! GET requests navigate the tab; anything else (POST, custom headers) is
//! replayed through `fetch()` inside the page so the browser's cookies and
//! origin apply.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};

use super::{Body, HttpRequest, HttpResponse, Method, Transport};

const NAVIGATION_STATUS_SCRIPT: &str =
    "(performance.getEntriesByType('navigation')[0] || {}).responseStatus || 200";

pub struct BrowserTransport {
    browser: Mutex<Option<Browser>>,
    page: Page,
    debug: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResult {
    status: u16,
    url: String,
    content_type: String,
    body: String,
}

impl BrowserTransport {
    pub async fn launch(config: &ConnectorConfig) -> Result<Self> {
        info!("Launching browser transport...");

        // ユニークなユーザーデータディレクトリを生成
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("site-connectors-{}", unique_id));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .no_sandbox()
            .request_timeout(config.timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", config.user_agent));

        if let Ok(path) = std::env::var("CHROME_PATH").or_else(|_| std::env::var("CHROMIUM_PATH")) {
            builder = builder.chrome_executable(path);
        }
        if !config.headless {
            builder = builder.with_head();
        }

        let browser_config = builder.build().map_err(ConnectorError::Browser)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ConnectorError::Browser(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ConnectorError::Browser(e.to_string()))?;

        info!("Browser transport ready");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            debug: config.debug,
        })
    }

    async fn navigate(&self, url: &str) -> Result<HttpResponse> {
        self.page.goto(url).await.map_err(page_error)?;

        let body = self.page.content().await.map_err(page_error)?;
        let final_url = self
            .page
            .url()
            .await
            .map_err(page_error)?
            .unwrap_or_else(|| url.to_string());
        let status = match self.page.evaluate(NAVIGATION_STATUS_SCRIPT).await {
            Ok(value) => value.into_value::<u16>().unwrap_or(200),
            Err(e) => {
                debug!("Navigation status unavailable: {}", e);
                200
            }
        };

        if self.debug {
            self.log_screenshot().await;
        }

        Ok(HttpResponse {
            url: final_url,
            status,
            headers: vec![("content-type".into(), "text/html".into())],
            body,
        })
    }

    async fn fetch_in_page(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut headers = serde_json::Map::new();
        let body = match &request.body {
            Body::Empty => None,
            Body::Form(fields) => {
                headers.insert(
                    "Content-Type".into(),
                    "application/x-www-form-urlencoded".into(),
                );
                Some(
                    url::form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(fields)
                        .finish(),
                )
            }
            Body::Json(value) => {
                headers.insert("Content-Type".into(), "application/json".into());
                Some(value.to_string())
            }
        };
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone().into());
        }

        let init = json!({
            "method": match request.method {
                Method::Get => "GET",
                Method::Post => "POST",
            },
            "headers": headers,
            "body": body,
            "credentials": "include",
            "redirect": "follow",
        });
        let script = format!(
            r#"
            (async () => {{
                const r = await fetch({url}, {init});
                const body = await r.text();
                return JSON.stringify({{
                    status: r.status,
                    url: r.url,
                    contentType: r.headers.get('content-type') || '',
                    body,
                }});
            }})()
            "#,
            url = serde_json::to_string(&request.url)?,
            init = init,
        );

        let raw = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(page_error)?
            .into_value::<String>()
            .map_err(|e| ConnectorError::Browser(e.to_string()))?;
        let fetched: FetchResult = serde_json::from_str(&raw)?;

        Ok(HttpResponse {
            url: fetched.url,
            status: fetched.status,
            headers: vec![("content-type".into(), fetched.content_type)],
            body: fetched.body,
        })
    }

    async fn log_screenshot(&self) {
        match self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
        {
            Ok(screenshot) => {
                use base64::Engine;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
                debug!("Page screenshot: data:image/png;base64,{}", encoded);
            }
            Err(e) => debug!("Screenshot failed: {}", e),
        }
    }
}

#[async_trait]
impl Transport for BrowserTransport {
    async fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        let exchange = async {
            if request.method == Method::Get && request.headers.is_empty() {
                self.navigate(&request.url).await
            } else {
                self.fetch_in_page(request).await
            }
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| {
                ConnectorError::transient(format!("timed out after {:?}: {}", timeout, request.url))
            })?
    }

    async fn close(&self) -> Result<()> {
        info!("Closing browser transport...");
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!("Browser did not close cleanly: {}", e);
            }
        }
        Ok(())
    }
}

/// Chrome network errors surface as `net::ERR_*` or a failed `fetch()`.
fn page_error(err: impl std::fmt::Display) -> ConnectorError {
    let message = err.to_string();
    if message.contains("net::ERR_") || message.contains("Failed to fetch") {
        ConnectorError::transient(message)
    } else {
        ConnectorError::Browser(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_error_classification() {
        assert!(page_error("net::ERR_CONNECTION_RESET").is_retryable());
        assert!(page_error("TypeError: Failed to fetch").is_retryable());
        assert!(matches!(
            page_error("Protocol error: target closed"),
            ConnectorError::Browser(_)
        ));
    }

    #[tokio::test]
    #[ignore] // 実環境テスト用: CHROME_PATH を設定して -- --ignored で実行
    async fn test_browser_transport_navigates() {
        let config = ConnectorConfig::anonymous();
        let transport = BrowserTransport::launch(&config).await.expect("launch");
        let response = transport
            .send(&HttpRequest::get("https://example.org/"), Duration::from_secs(30))
            .await
            .expect("navigate");
        assert!(response.body.contains("Example Domain"));
        transport.close().await.expect("close");
    }
}

//! セッションとネットワークの間のHTTPやり取り
//!
//! [`Transport`] はリクエストを1回だけ送り、リダイレクト後のURLを返す。
//! Cookieはトランスポート内に持つので、セッションごとに別になる。

mod browser;
mod http;
mod mock;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ConnectorConfig, TransportKind};
use crate::error::Result;

pub use browser::BrowserTransport;
pub use http::HttpTransport;
pub use mock::{MockReply, MockTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Form(Vec<(String, String)>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Body,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: Body::Empty,
            headers: Vec::new(),
        }
    }

    pub fn post_form<K, V>(url: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Body::Form(
                fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            headers: Vec::new(),
        }
    }

    pub fn post_json(url: impl Into<String>, value: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Body::Json(value),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// フォーム値の取得 (前のリクエストから次を組み立てるパーサ用)
    pub fn form_value(&self, name: &str) -> Option<&str> {
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// リダイレクト後の最終URL
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse>;

    /// ネットワーク資源 (ブラウザプロセス、接続プール) を解放
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// `config.transport` で選ばれたトランスポートを開く
pub async fn open(config: &ConnectorConfig) -> Result<Box<dyn Transport>> {
    Ok(match config.transport {
        TransportKind::Http => Box::new(HttpTransport::new(config)?),
        TransportKind::Browser => Box::new(BrowserTransport::launch(config).await?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let req = HttpRequest::post_form("/Logon", [("UserName", "u"), ("Password", "p")])
            .with_header("X-Token", "abc");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.form_value("UserName"), Some("u"));
        assert_eq!(req.form_value("missing"), None);
        assert_eq!(req.headers, vec![("X-Token".to_string(), "abc".to_string())]);

        let get = HttpRequest::get("/AccountsOverview");
        assert_eq!(get.body, Body::Empty);
        assert_eq!(get.form_value("UserName"), None);
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let resp = HttpResponse {
            url: "https://x/".into(),
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: "{}".into(),
        };
        assert_eq!(resp.content_type(), Some("application/json"));
    }
}

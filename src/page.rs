use std::collections::HashMap;

use scraper::Html;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConnectorError, Result};

/// 取得済み文書と、そのURLから判定したページ種別
///
/// 本文は文字列で保持する。[`ResolvedPage::html`] は呼ぶたびに解析し直すので、
/// `Send` でないDOMがawaitをまたぐことはない
#[derive(Debug, Clone)]
pub struct ResolvedPage<K> {
    pub kind: K,
    pub url: String,
    pub status: u16,
    pub params: HashMap<String, String>,
    content_type: Option<String>,
    body: String,
}

impl<K> ResolvedPage<K> {
    pub fn new(
        kind: K,
        url: impl Into<String>,
        status: u16,
        params: HashMap<String, String>,
        content_type: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            url: url.into(),
            status,
            params,
            content_type,
            body: body.into(),
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }

    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// 一致したルールの名前付きキャプチャ
    pub fn param(&self, name: &str) -> Result<&str> {
        self.params.get(name).map(String::as_str).ok_or_else(|| {
            ConnectorError::SiteAssertion(format!("no {:?} parameter in {}", name, self.url))
        })
    }

    /// ページURLのクエリ値
    pub fn query_param(&self, name: &str) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{selector, text};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Topic,
    }

    fn page(body: &str) -> ResolvedPage<Kind> {
        let mut params = HashMap::new();
        params.insert("t".to_string(), "12".to_string());
        ResolvedPage::new(
            Kind::Topic,
            "https://forum.example/viewtopic.php?t=12&start=15",
            200,
            params,
            Some("text/html".into()),
            body,
        )
    }

    #[test]
    fn test_params_and_query() {
        let page = page("");
        assert_eq!(page.param("t").unwrap(), "12");
        assert!(matches!(page.param("f"), Err(ConnectorError::SiteAssertion(_))));
        assert_eq!(page.query_param("start").as_deref(), Some("15"));
        assert_eq!(page.query_param("missing"), None);
        assert!(!page.is_json());
    }

    #[test]
    fn test_html_is_reparsed_on_demand() {
        let page = page("<div class='post'><h3> Hello   world </h3></div>");
        let doc = page.html();
        let h3 = selector("div.post h3").unwrap();
        let titles: Vec<String> = doc.select(&h3).map(text).collect();
        assert_eq!(titles, vec!["Hello world"]);
    }

    #[test]
    fn test_json_access() {
        let page = ResolvedPage::new(
            Kind::Topic,
            "https://x/",
            200,
            HashMap::new(),
            Some("application/json".into()),
            r#"{"EndOfData": true}"#,
        );
        assert!(page.is_json());
        assert_eq!(page.json().unwrap()["EndOfData"], Value::Bool(true));
    }
}

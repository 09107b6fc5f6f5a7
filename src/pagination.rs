//! 複数ページにまたがる一覧の取得・解析ループ

use std::fmt::Debug;
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::error::Result;
use crate::page::ResolvedPage;
use crate::session::Session;
use crate::transport::HttpRequest;

/// 1ページ分の解析結果
#[derive(Debug, Clone)]
pub struct PageOutcome<T> {
    pub records: Vec<T>,
    /// 次ページのリクエスト (`None` で終了)
    pub next: Option<HttpRequest>,
}

impl<T> PageOutcome<T> {
    pub fn more(records: Vec<T>, next: HttpRequest) -> Self {
        Self {
            records,
            next: Some(next),
        }
    }

    pub fn last(records: Vec<T>) -> Self {
        Self {
            records,
            next: None,
        }
    }

    pub fn with_next(records: Vec<T>, next: Option<HttpRequest>) -> Self {
        Self { records, next }
    }
}

/// 1セッション上のプル型ページング
///
/// [`Paginator::next_page`] 1回につき認証済み取得を1回行い (セッション切れなら
/// 再ログイン)、ページを `parse` に渡す。レコードはページ順、文書順に並ぶ
pub struct Paginator<K, T, F> {
    next: Option<HttpRequest>,
    expected: Vec<K>,
    parse: F,
    max_pages: Option<usize>,
    pages_fetched: usize,
    _records: PhantomData<fn() -> T>,
}

impl<K, T, F> Paginator<K, T, F>
where
    K: Copy + Eq + Debug + Send + Sync + 'static,
    F: FnMut(&ResolvedPage<K>) -> Result<PageOutcome<T>> + Send,
{
    pub fn new(start: HttpRequest, expected: &[K], parse: F) -> Self {
        Self {
            next: Some(start),
            expected: expected.to_vec(),
            parse,
            max_pages: None,
            pages_fetched: 0,
            _records: PhantomData,
        }
    }

    /// 設定のページ上限を上書き
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// 次ページのレコード。一覧が終われば `None`
    pub async fn next_page(&mut self, session: &mut Session<K>) -> Result<Option<Vec<T>>> {
        let Some(request) = self.next.take() else {
            return Ok(None);
        };

        let cap = self.max_pages.unwrap_or(session.config().max_pages);
        if self.pages_fetched >= cap {
            warn!("Page cap of {} reached, stopping before {}", cap, request.url);
            return Ok(None);
        }

        let page = session.fetch_expecting(request, &self.expected).await?;
        self.pages_fetched += 1;

        let outcome = (self.parse)(&page)?;
        debug!(
            "Page {} ({}): {} records, more: {}",
            self.pages_fetched,
            page.url,
            outcome.records.len(),
            outcome.next.is_some()
        );
        self.next = outcome.next;
        Ok(Some(outcome.records))
    }

    pub async fn collect(mut self, session: &mut Session<K>) -> Result<Vec<T>> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page(session).await? {
            records.extend(page);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::tests::{session, Kind};
    use crate::transport::MockTransport;

    fn rows(page: &ResolvedPage<Kind>) -> Result<PageOutcome<String>> {
        let value = page.json()?;
        let records = value["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let next = value["next"].as_str().map(HttpRequest::get);
        Ok(PageOutcome::with_next(records, next))
    }

    fn login(mock: &MockTransport) {
        mock.push_html("https://bank.example/home", "");
    }

    #[tokio::test]
    async fn test_pages_in_order_until_no_continuation() {
        let mock = MockTransport::new();
        login(&mock);
        mock.push_json("", json!({"rows": ["a", "b"], "next": "/history?page=2"}))
            .push_json("", json!({"rows": ["c"], "next": "/history?page=3"}))
            .push_json("", json!({"rows": ["d", "e"], "next": null}));
        let mut session = session(&mock);

        let records = Paginator::new(HttpRequest::get("/history"), &[Kind::History], rows)
            .collect(&mut session)
            .await
            .unwrap();

        assert_eq!(records, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_page_cap_stops_endless_listing() {
        let mock = MockTransport::new();
        login(&mock);
        for _ in 0..5 {
            mock.push_json("", json!({"rows": ["x"], "next": "/history?page=9"}));
        }
        let mut session = session(&mock);

        let mut paginator =
            Paginator::new(HttpRequest::get("/history"), &[Kind::History], rows).with_max_pages(3);
        let mut records = Vec::new();
        while let Some(page) = paginator.next_page(&mut session).await.unwrap() {
            records.extend(page);
        }

        assert_eq!(records.len(), 3);
        assert_eq!(paginator.pages_fetched(), 3);
        // login + three pages
        assert_eq!(mock.request_count(), 4);
    }

    #[tokio::test]
    async fn test_caller_can_stop_between_pages() {
        let mock = MockTransport::new();
        login(&mock);
        mock.push_json("", json!({"rows": ["a"], "next": "/history?page=2"}))
            .push_json("", json!({"rows": ["b"], "next": null}));
        let mut session = session(&mock);

        let mut paginator = Paginator::new(HttpRequest::get("/history"), &[Kind::History], rows);
        let first = paginator.next_page(&mut session).await.unwrap();
        assert_eq!(first, Some(vec!["a".to_string()]));
        drop(paginator);

        assert_eq!(mock.remaining(), 1);
    }

    #[tokio::test]
    async fn test_silent_logout_resumes_at_same_page() {
        let mock = MockTransport::new();
        login(&mock);
        mock.push_json("", json!({"rows": ["a"], "next": "/history?page=2"}))
            .push_html("https://bank.example/login", "session expired");
        login(&mock);
        mock.push_json("", json!({"rows": ["b"], "next": null}));
        let mut session = session(&mock);

        let records = Paginator::new(HttpRequest::get("/history"), &[Kind::History], rows)
            .collect(&mut session)
            .await
            .unwrap();

        assert_eq!(records, vec!["a", "b"]);
        assert_eq!(session.login_attempts(), 2);
        let last = mock.requests().pop().unwrap();
        assert_eq!(last.url, "https://bank.example/history?page=2");
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ConnectorError, Result};

use super::{HttpRequest, HttpResponse, Transport};

/// One scripted outcome of [`MockTransport::send`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// `url` is the final address; empty means "same as requested".
    Response {
        url: String,
        status: u16,
        content_type: &'static str,
        body: String,
    },
    ConnectionReset,
    Timeout,
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    requests: Vec<HttpRequest>,
    closed: bool,
}

/// Replays scripted replies in order and records every request, for
/// offline runs. Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: MockReply) -> &Self {
        self.lock().replies.push_back(reply);
        self
    }

    pub fn push_html(&self, url: &str, body: &str) -> &Self {
        self.push(MockReply::Response {
            url: url.to_string(),
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
        })
    }

    pub fn push_json(&self, url: &str, value: Value) -> &Self {
        self.push(MockReply::Response {
            url: url.to_string(),
            status: 200,
            content_type: "application/json",
            body: value.to_string(),
        })
    }

    pub fn push_status(&self, url: &str, status: u16, body: &str) -> &Self {
        self.push(MockReply::Response {
            url: url.to_string(),
            status,
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
        })
    }

    pub fn push_reset(&self) -> &Self {
        self.push(MockReply::ConnectionReset)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest, _timeout: Duration) -> Result<HttpResponse> {
        let reply = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            state.replies.pop_front()
        };

        match reply {
            Some(MockReply::Response {
                url,
                status,
                content_type,
                body,
            }) => Ok(HttpResponse {
                url: if url.is_empty() {
                    request.url.clone()
                } else {
                    url
                },
                status,
                headers: vec![("content-type".to_string(), content_type.to_string())],
                body,
            }),
            Some(MockReply::ConnectionReset) => Err(ConnectorError::transient(
                "connection reset by peer (os error 104)",
            )),
            Some(MockReply::Timeout) => Err(ConnectorError::transient(format!(
                "operation timed out: {}",
                request.url
            ))),
            None => Err(ConnectorError::Transport(format!(
                "no scripted reply for {:?} {}",
                request.method, request.url
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

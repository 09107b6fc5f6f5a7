use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};

use super::{Body, HttpRequest, HttpResponse, Method, Transport};

/// Plain HTTP transport with its own cookie jar.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        debug!("{:?} {}", request.method, request.url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = match &request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(fields),
            Body::Json(value) => builder.json(value),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.timeout(timeout).send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.text().await.map_err(classify)?;

        debug!("{} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> ConnectorError {
    if is_connection_level(&err) {
        ConnectorError::transient(err.to_string())
    } else {
        ConnectorError::Transport(err.to_string())
    }
}

/// Timeouts, refused connections and resets/aborts anywhere in the source
/// chain.
fn is_connection_level(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

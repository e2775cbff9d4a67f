use anyhow::Context;
use log::{debug, trace};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use model::decode_snapshot;
use preflight_core::{
    Command, CommandAck, CommandError, CommandTransport, SessionConfig, TelemetryError, TelemetrySnapshot,
    TelemetrySource,
};

pub const DATA_PATH: &str = "/api/data";

const CSRF_HEADER: HeaderName = HeaderName::from_static("x-csrftoken");
const REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");
const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub base_url: String,        // e.g. "http://192.168.4.1"
    pub csrf_token: Option<String>,
    pub fetch_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        SessionConfig::default().into()
    }
}

impl From<SessionConfig> for HttpConfig {
    fn from(s: SessionConfig) -> Self {
        Self {
            base_url: s.base_url,
            csrf_token: s.csrf_token,
            fetch_timeout: s.fetch_timeout,
            command_timeout: s.command_timeout,
        }
    }
}

/// Telemetry and command link to the flight controller's web server.
pub struct HttpLink {
    cfg: HttpConfig,
    base: Url,
    data_url: Url,
    client: Client,
}

impl HttpLink {
    pub fn new(cfg: HttpConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&cfg.base_url).with_context(|| format!("parse base url {}", cfg.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("base url {} is not http(s)", cfg.base_url);
        }
        let data_url = base.join(DATA_PATH).with_context(|| format!("join {DATA_PATH} to {base}"))?;
        let client = Client::builder()
            // same-origin credentials: keep whatever session cookies the server sets
            .cookie_store(true)
            .default_headers(default_headers(cfg.csrf_token.as_deref())?)
            .build()
            .context("build HTTP client")?;
        debug!("telemetry link to {base}");
        Ok(Self { cfg, base, data_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }
}

fn default_headers(csrf_token: Option<&str>) -> anyhow::Result<HeaderMap> {
    let mut h = HeaderMap::new();
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=UTF-8"));
    h.insert(ACCEPT, HeaderValue::from_static("application/json"));
    h.insert(REQUESTED_WITH, HeaderValue::from_static("XMLHttpRequest"));
    if let Some(token) = csrf_token {
        let mut v = HeaderValue::from_str(token).context("anti-forgery token is not a valid header value")?;
        v.set_sensitive(true);
        h.insert(CSRF_HEADER, v);
    }
    Ok(h)
}

#[async_trait::async_trait]
impl TelemetrySource for HttpLink {
    async fn fetch_snapshot(&self) -> Result<TelemetrySnapshot, TelemetryError> {
        let timeout = self.cfg.fetch_timeout;
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                TelemetryError::Timeout(timeout)
            } else {
                TelemetryError::Network(e.to_string())
            }
        };

        let resp = self.client.get(self.data_url.clone()).timeout(timeout).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TelemetryError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(transport)?;
        trace!("telemetry response, {} bytes", body.len());
        Ok(decode_snapshot(&body)?)
    }
}

#[async_trait::async_trait]
impl CommandTransport for HttpLink {
    async fn send(&self, command: &Command, request_id: Uuid) -> Result<CommandAck, CommandError> {
        let timeout = self.cfg.command_timeout;
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                CommandError::Timeout(timeout)
            } else {
                CommandError::Network(e.to_string())
            }
        };

        let url = self.base.join(command.path()).map_err(|e| CommandError::Network(e.to_string()))?;
        let body = command.body().to_string();
        let resp = self
            .client
            .post(url)
            .header(REQUEST_ID, request_id.to_string())
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(transport)?;
        if status.is_client_error() {
            return Err(CommandError::Rejected { status: status.as_u16(), reason: rejection_reason(&bytes) });
        }
        if !status.is_success() {
            return Err(CommandError::Status(status.as_u16()));
        }
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| CommandError::Malformed(e.to_string()))?;
        Ok(CommandAck { status: status.as_u16(), body })
    }
}

const MAX_REASON_LEN: usize = 200;

/// Best-effort human-readable reason from a 4xx body.
fn rejection_reason(body: &[u8]) -> Option<String> {
    let reason = match serde_json::from_slice::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(map)) => ["error", "reason", "message", "detail"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_owned)?,
        Ok(_) => return None,
        Err(_) => String::from_utf8_lossy(body).trim().to_owned(),
    };
    if reason.is_empty() {
        return None;
    }
    Some(reason.chars().take(MAX_REASON_LEN).collect())
}

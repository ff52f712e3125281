// # HTTP Record Store
//
// `RecordStore` and `Authenticator` over the JSON API of the credential-hiding
// proxy that fronts the DNS provider.
//
// ## Behavior
//
// - One HTTP request per call; no retry, backoff or caching (owned by the session)
// - Request timeout from `StoreConfig` (45 seconds by default)
// - Status codes mapped onto the engine's error taxonomy
// - Session token sent in the `x-auth-token` header, never logged
//
// ## API Reference
//
// - List zones: GET `/api/zones`
// - List records: GET `/api/zones/:zone_id/dns_records`
// - Create record: POST `/api/zones/:zone_id/dns_records`
// - Update record: PUT `/api/zones/:zone_id/dns_records/:record_id`
// - Delete record: DELETE `/api/zones/:zone_id/dns_records/:record_id`
// - Log in: POST `/api/auth/login` `{ "password": ... }` → `{ "token": ... }`
//
// Successful bodies are either the bare result or an envelope
// `{ "success": true, "result": ... }` (also nested as `data.result`).
// Failures carry `{ "success": false, "errors": [{ "message": ... }] }`.

use async_trait::async_trait;
use dnsmirror_core::config::StoreConfig;
use dnsmirror_core::record::TTL_AUTO;
use dnsmirror_core::traits::{Authenticator, RecordStore, SessionToken};
use dnsmirror_core::{Error, Record, RecordDraft, RecordId, Result, Zone};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;

/// Header carrying the session token
const AUTH_HEADER: &str = "x-auth-token";

/// Record as returned by the proxy
#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
    #[serde(default = "default_ttl")]
    ttl: u32,
    #[serde(default)]
    proxied: bool,
}

fn default_ttl() -> u32 {
    TTL_AUTO
}

impl From<ApiRecord> for Record {
    fn from(api: ApiRecord) -> Self {
        Record {
            id: RecordId::confirmed(api.id),
            record_type: api.record_type,
            name: api.name,
            content: api.content,
            ttl: api.ttl,
            proxied: api.proxied,
        }
    }
}

/// Record store backed by the proxy's HTTP API
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the session token.
pub struct HttpRecordStore {
    /// Proxy base URL, without trailing slash
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Session token from the last login
    /// ⚠️ NEVER log this value
    token: RwLock<Option<SessionToken>>,
}

impl std::fmt::Debug for HttpRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRecordStore")
            .field("base_url", &self.base_url)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl HttpRecordStore {
    /// Create a store for the proxy at `base_url`
    ///
    /// # Parameters
    ///
    /// - `base_url`: Proxy origin, e.g. `http://localhost:3000`
    /// - `timeout`: Per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::config("Store base URL cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            client,
            token: RwLock::new(None),
        })
    }

    /// Create a store from validated configuration
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Self::new(&config.base_url, config.timeout())
    }

    /// Start with an existing session token
    pub fn with_token(mut self, token: SessionToken) -> Self {
        self.token = RwLock::new(Some(token));
        self
    }

    /// Replace (or drop) the session token
    pub async fn set_token(&self, token: Option<SessionToken>) {
        *self.token.write().await = token;
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn records_path(zone_id: &str) -> String {
        format!("zones/{}/dns_records", zone_id)
    }

    fn record_path(zone_id: &str, record_id: &str) -> String {
        format!("zones/{}/dns_records/{}", zone_id, record_id)
    }

    /// Send a request and return the unwrapped result, `Null` for an empty body
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let request = match self.token.read().await.as_ref() {
            Some(token) => request.header(AUTH_HEADER, token.expose()),
            None => request,
        };

        let response = request.send().await.map_err(|e| transport_error(what, &e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(what, &e))?;

        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) if !status.is_success() => Value::String(text),
                Err(e) => return Err(Error::remote(format!("{}: unreadable response: {}", what, e))),
            }
        };

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| format!("{} failed", what));
            tracing::debug!("{} failed with status {}: {}", what, status, message);
            return Err(status_error(status.as_u16(), &message));
        }

        unwrap_envelope(body, what)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Option<T>> {
        let result = self.send(request, what).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| Error::remote(format!("{}: unexpected response shape: {}", what, e)))
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        tracing::debug!("GET /api/zones");
        let zones: Option<Vec<Zone>> = self.fetch(self.client.get(self.url("zones")), "List zones").await?;
        Ok(zones.unwrap_or_default())
    }

    async fn list(&self, zone_id: &str) -> Result<Vec<Record>> {
        let path = Self::records_path(zone_id);
        tracing::debug!("GET /api/{}", path);
        let records: Option<Vec<ApiRecord>> = self
            .fetch(self.client.get(self.url(&path)), "List records")
            .await?;
        Ok(records
            .unwrap_or_default()
            .into_iter()
            .map(Record::from)
            .collect())
    }

    async fn create(&self, zone_id: &str, draft: &RecordDraft) -> Result<Option<Record>> {
        let path = Self::records_path(zone_id);
        tracing::debug!("POST /api/{} ({} {})", path, draft.record_type, draft.name);
        let created: Option<ApiRecord> = self
            .fetch(self.client.post(self.url(&path)).json(draft), "Create record")
            .await?;
        Ok(created.map(Record::from))
    }

    async fn update(&self, zone_id: &str, record_id: &str, draft: &RecordDraft) -> Result<Option<Record>> {
        let path = Self::record_path(zone_id, record_id);
        tracing::debug!("PUT /api/{}", path);
        let updated: Option<ApiRecord> = self
            .fetch(self.client.put(self.url(&path)).json(draft), "Update record")
            .await?;
        Ok(updated.map(Record::from))
    }

    async fn delete(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let path = Self::record_path(zone_id, record_id);
        tracing::debug!("DELETE /api/{}", path);
        self.send(self.client.delete(self.url(&path)), "Delete record").await?;
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "http"
    }
}

#[async_trait]
impl Authenticator for HttpRecordStore {
    /// Log in and keep the issued token for later requests
    async fn login(&self, secret: &str) -> Result<SessionToken> {
        tracing::debug!("POST /api/auth/login");
        let request = self
            .client
            .post(self.url("auth/login"))
            .json(&serde_json::json!({ "password": secret }));

        let response = request.send().await.map_err(|e| transport_error("Login", &e))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| "Login failed".to_string());
            return Err(status_error(status.as_u16(), &message));
        }

        let token = extract_token(&body).ok_or_else(|| Error::remote("Login response carried no token"))?;
        let token = SessionToken::new(token);
        self.set_token(Some(token.clone())).await;
        tracing::info!("Logged in to {}", self.base_url);
        Ok(token)
    }
}

/// Map a failed response onto the error taxonomy
fn status_error(status: u16, message: &str) -> Error {
    match status {
        401 | 403 => Error::unauthorized(message),
        400 | 409 | 422 => Error::validation(message),
        404 => Error::not_found(message),
        429 => Error::remote(format!("Rate limit exceeded: {}", message)),
        500..=599 => Error::remote(format!("Server error ({}): {}", status, message)),
        _ => Error::remote(format!("Unexpected status {}: {}", status, message)),
    }
}

/// Map a request that got no response onto the error taxonomy
fn transport_error(what: &str, err: &reqwest::Error) -> Error {
    if err.is_decode() {
        Error::remote(format!("{}: unreadable response: {}", what, err))
    } else {
        // timeouts, refused connections, DNS failures, resets
        Error::network(format!("{}: {}", what, err))
    }
}

/// First error message of a failure body
fn error_message(body: &Value) -> Option<String> {
    let first_error = |v: &Value| {
        v.get("errors")
            .and_then(|errors| errors.get(0))
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    first_error(body)
        .or_else(|| body.get("data").and_then(first_error))
        .or_else(|| body.get("message").and_then(Value::as_str).map(str::to_string))
        .or_else(|| body.as_str().filter(|s| !s.trim().is_empty()).map(str::to_string))
}

/// Strip the `{ success, result }` envelope if there is one
fn unwrap_envelope(body: Value, what: &str) -> Result<Value> {
    let Some(object) = body.as_object() else {
        return Ok(body);
    };
    let Some(success) = object.get("success") else {
        return Ok(body);
    };

    if success == &Value::Bool(false) {
        let message = error_message(&body).unwrap_or_else(|| format!("{} failed", what));
        return Err(Error::remote(message));
    }

    let result = object
        .get("result")
        .or_else(|| object.get("data").and_then(|data| data.get("result")))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(result)
}

fn extract_token(body: &Value) -> Option<String> {
    body.get("token")
        .or_else(|| body.get("result").and_then(|r| r.get("token")))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

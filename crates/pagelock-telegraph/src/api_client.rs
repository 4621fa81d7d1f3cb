use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pagelock_core::error::RemoteError;
use pagelock_core::remote::{Credential, LockRecord, LockUpdate, RemoteResult, RemoteStore};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.telegra.ph";

/// Account field holding the lock holder id.
pub const HOLDER_FIELD: &str = "author_name";
/// Account field holding the encoded claim timestamp.
pub const TIMESTAMP_FIELD: &str = "short_name";

#[derive(Debug, Deserialize)]
struct AccountFields {
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    author_name: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("pagelock/0.1")
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Register a fresh account. The returned credential scopes every later
    /// call and keys document encryption.
    pub async fn create_account(&self, short_name: &str) -> Result<Credential> {
        let result = self
            .call(
                "createAccount",
                json!({"short_name": short_name, "author_name": ""}),
            )
            .await
            .map_err(|e| anyhow!("createAccount: {e}"))?;
        let token = result
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("createAccount response missing access_token"))?;
        Ok(Credential::new(token))
    }

    async fn call(&self, method: &str, params: Value) -> RemoteResult<Value> {
        let url = format!("{}/{}", self.base_url, method);
        let res = self
            .client
            .post(url)
            .json(&params)
            .send()
            .await
            .map_err(|e| {
                warn!(method, error = %e, "network error");
                RemoteError::Transport(e.to_string())
            })?;
        let status = res.status();
        let body: Value = res.json().await.map_err(|e| {
            RemoteError::Transport(format!("{method} returned unreadable body ({status}): {e}"))
        })?;
        unwrap_envelope(method, body)
    }
}

#[async_trait]
impl RemoteStore for ApiClient {
    async fn read_lock(&self, credential: &Credential) -> RemoteResult<LockRecord> {
        let result = self
            .call(
                "getAccountInfo",
                json!({
                    "access_token": credential.expose(),
                    "fields": [TIMESTAMP_FIELD, HOLDER_FIELD],
                }),
            )
            .await?;
        parse_lock_record(result)
    }

    async fn write_lock(&self, credential: &Credential, update: &LockUpdate) -> RemoteResult<()> {
        self.call("editAccountInfo", lock_params(credential, update))
            .await
            .map(|_| ())
    }

    async fn create_document(
        &self,
        credential: &Credential,
        title: &str,
        content: &str,
    ) -> RemoteResult<String> {
        let page = self
            .call(
                "createPage",
                json!({
                    "access_token": credential.expose(),
                    "title": title,
                    "content": document_nodes(content),
                }),
            )
            .await?;
        let path = page
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Rejected("createPage response missing path".into()))?;
        debug!(title, path, "page created");
        Ok(path.to_string())
    }

    async fn read_document(&self, credential: &Credential, path: &str) -> RemoteResult<String> {
        let page = self
            .call(
                "getPage",
                json!({
                    "access_token": credential.expose(),
                    "path": path,
                    "return_content": true,
                }),
            )
            .await?;
        // A page without a code node is malformed, not missing.
        Ok(extract_document(&page).unwrap_or_default())
    }

    async fn overwrite_document(
        &self,
        credential: &Credential,
        path: &str,
        title: &str,
        content: &str,
    ) -> RemoteResult<()> {
        self.call(
            "editPage",
            json!({
                "access_token": credential.expose(),
                "path": path,
                "title": title,
                "content": document_nodes(content),
            }),
        )
        .await
        .map(|_| ())
    }
}

/// Split the `{ok, result | error}` response envelope.
pub fn unwrap_envelope(method: &str, body: Value) -> RemoteResult<Value> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body.get("result").cloned().unwrap_or(Value::Null));
    }
    let error = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    warn!(method, error = %error, "request rejected");
    if error == "PAGE_NOT_FOUND" {
        Err(RemoteError::NotFound)
    } else {
        Err(RemoteError::Rejected(error))
    }
}

pub fn parse_lock_record(result: Value) -> RemoteResult<LockRecord> {
    let fields: AccountFields = serde_json::from_value(result)
        .map_err(|e| RemoteError::Rejected(format!("account fields: {e}")))?;
    Ok(LockRecord {
        holder: fields.author_name.unwrap_or_default(),
        timestamp: fields.short_name.unwrap_or_default(),
    })
}

pub fn lock_params(credential: &Credential, update: &LockUpdate) -> Value {
    let mut params = Map::new();
    params.insert("access_token".into(), credential.expose().into());
    if let Some(holder) = &update.holder {
        params.insert(HOLDER_FIELD.into(), holder.as_str().into());
    }
    if let Some(timestamp) = &update.timestamp {
        params.insert(TIMESTAMP_FIELD.into(), timestamp.as_str().into());
    }
    Value::Object(params)
}

/// Page body carrying one document: a single `code` node with the wire blob.
pub fn document_nodes(content: &str) -> Value {
    json!([{"tag": "code", "children": [content]}])
}

pub fn extract_document(page: &Value) -> Option<String> {
    page.get("content")?
        .get(0)?
        .get("children")?
        .get(0)?
        .as_str()
        .map(str::to_string)
}

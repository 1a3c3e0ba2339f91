use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ApiConfig, RetryConfig};
use crate::error::ApiError;
use crate::listing::{ListQuery, ListView, Page};
use crate::models::{Address, Document, RecordId};
use crate::validation::{normalize_cep, NewDocument, Validate, WhatsappMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Resource {
    Customers,
    Policies,
    Opportunities,
    Claims,
    Documents,
    Activities,
    Addresses,
    Contacts,
    Products,
    Insurers,
    Branches,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Resource::Customers => "/api/customers",
            Resource::Policies => "/api/policies",
            Resource::Opportunities => "/api/opportunities",
            Resource::Claims => "/api/claims",
            Resource::Documents => "/api/documents",
            Resource::Activities => "/api/activities",
            Resource::Addresses => "/api/addresses",
            Resource::Contacts => "/api/contacts",
            Resource::Products => "/api/products",
            Resource::Insurers => "/api/insurers",
            Resource::Branches => "/api/branches",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|source| ApiError::Transport {
                url: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let resp = req.send().await.map_err(|source| ApiError::Transport {
            url: self.base_url.clone(),
            source,
        })?;
        let status = resp.status();
        let url = resp.url().path().to_string();
        let body = resp.text().await.map_err(|source| ApiError::Transport {
            url: self.base_url.clone(),
            source,
        })?;

        if !status.is_success() {
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            tracing::warn!(status = status.as_u16(), path = %url, %message, "API request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(status = status.as_u16(), path = %url, bytes = body.len(), "API response");
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_as<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let value = self.send(req).await?;
        serde_json::from_value(unwrap_data(value)).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &ListQuery,
    ) -> Result<Page<T>, ApiError> {
        let req = self
            .request(reqwest::Method::GET, resource.path())
            .query(&query.to_pairs());
        let body = self.send(req).await?;
        Page::from_envelope(body, query)
    }

    /// Walk every page of a list.
    pub async fn list_all<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: ListQuery,
    ) -> Result<Vec<T>, ApiError> {
        let mut view = ListView::new(query);
        loop {
            let (ticket, query) = view.begin_fetch();
            let page = self.list(resource, &query).await?;
            view.append(ticket, page);
            if !view.next_page() {
                break;
            }
        }
        Ok(view.into_rows())
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        resource: Resource,
        id: &RecordId,
    ) -> Result<T, ApiError> {
        let path = format!("{}/{}", resource.path(), id);
        self.send_as(self.request(reqwest::Method::GET, &path)).await
    }

    /// Validate, then POST. Nothing is sent when validation fails.
    pub async fn create<T, B>(&self, resource: Resource, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Validate,
    {
        body.validate()?;
        let req = self.request(reqwest::Method::POST, resource.path()).json(body);
        self.send_as(req).await
    }

    /// Validate, then PUT. Nothing is sent when validation fails.
    pub async fn update<T, B>(
        &self,
        resource: Resource,
        id: &RecordId,
        body: &B,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Validate,
    {
        body.validate()?;
        let path = format!("{}/{}", resource.path(), id);
        let req = self.request(reqwest::Method::PUT, &path).json(body);
        self.send_as(req).await
    }

    pub async fn delete(&self, resource: Resource, id: &RecordId) -> Result<(), ApiError> {
        let path = format!("{}/{}", resource.path(), id);
        self.send(self.request(reqwest::Method::DELETE, &path)).await?;
        Ok(())
    }

    pub async fn upload_document(&self, doc: &NewDocument) -> Result<Document, ApiError> {
        doc.validate()?;
        let part = reqwest::multipart::Part::bytes(doc.bytes.clone()).file_name(doc.file_name.clone());
        let mut form = reqwest::multipart::Form::new()
            .text("customerId", doc.customer_id.to_string())
            .text("kind", doc.kind.clone())
            .part("file", part);
        if let Some(policy_id) = &doc.policy_id {
            form = form.text("policyId", policy_id.to_string());
        }
        let req = self
            .request(reqwest::Method::POST, Resource::Documents.path())
            .multipart(form);
        self.send_as(req).await
    }

    pub async fn lookup_cep(&self, cep: &str) -> Result<Address, ApiError> {
        let digits = normalize_cep(cep).ok_or_else(|| crate::error::ValidationError {
            entity: "cep",
            problems: vec![format!("'{cep}' must have 8 digits")],
        })?;
        let path = format!("/api/cep/{digits}");
        let mut address: Address = self.send_as(self.request(reqwest::Method::GET, &path)).await?;
        if address.cep.is_empty() {
            address.cep = digits;
        }
        Ok(address)
    }

    pub async fn send_whatsapp(&self, message: &WhatsappMessage) -> Result<Value, ApiError> {
        message.validate()?;
        let req = self
            .request(reqwest::Method::POST, "/api/whatsapp/send")
            .json(message);
        self.send(req).await
    }

    pub async fn whatsapp_config(&self) -> Result<Value, ApiError> {
        self.send(self.request(reqwest::Method::GET, "/api/whatsapp/config"))
            .await
    }

    pub async fn update_whatsapp_config(&self, config: &Value) -> Result<Value, ApiError> {
        let req = self
            .request(reqwest::Method::PUT, "/api/whatsapp/config")
            .json(config);
        self.send(req).await
    }
}

/// Re-run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, label: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = retry_delay(attempt, policy);
                tracing::warn!(
                    "{} retry {}/{} after error: {} (sleep {:?})",
                    label,
                    attempt,
                    attempts,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn retry_delay(attempt: u32, policy: &RetryConfig) -> Duration {
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(
        policy
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(policy.max_backoff_ms),
    )
}

fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let from_json = serde_json::from_str::<Value>(trimmed).ok().and_then(|value| {
        ["error", "message"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
    });
    Some(from_json.unwrap_or_else(|| trimmed.to_string()))
}

/// Some endpoints wrap single records as `{ "data": { ... } }`.
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Client bound to an in-process axum router on an ephemeral port.
#[cfg(test)]
pub(crate) async fn serve(router: axum::Router) -> ApiClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let config = ApiConfig {
        base_url: format!("http://{addr}/"),
        token: Some("t0ken".to_string()),
        ..ApiConfig::default()
    };
    ApiClient::new(&config).unwrap()
}

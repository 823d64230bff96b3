use super::{
    FetchError,
    StateFetcher,
};
use crate::state::{
    LifecycleState,
    ResourceId,
};
use async_trait::async_trait;
use http::header;
use reqwest::Client;
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};
use url::Url;

const DESCRIBE_STATE_METHOD: &str = "instance_describeState";

/// JSON-RPC code the provider gateway uses for unknown resources.
const NOT_FOUND_CODE: i32 = 404;

/// Queries a provider gateway over JSON-RPC for a resource's state.
///
/// ``` no_run
/// use instance_state::{HttpStateFetcher, ResourceId, StateFetcher};
///
/// #[tokio::main]
/// async fn main() {
///     let fetcher = HttpStateFetcher::new("http://localhost:9545", "us-east-1").unwrap();
///     let state = fetcher.fetch_state(&ResourceId::new("i-123")).await.unwrap();
///     println!("{state}");
/// }
/// ```
#[derive(Debug)]
pub struct HttpStateFetcher {
    client: Client,
    endpoint: Url,
    region: String,
    request_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: (&'a str, &'a str),
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    result: Option<DescribeStateResult>,
    error: Option<JsonRpcError>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DescribeStateResult {
    state: Option<String>,
}

impl HttpStateFetcher {
    pub fn new(endpoint: &str, region: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder().use_rustls_tls().build()?;
        Self::with_client(client, endpoint, region)
    }

    /// Like [`Self::new`], sending `auth` as the `Authorization` header.
    pub fn new_with_auth(
        endpoint: &str,
        region: impl Into<String>,
        auth: &str,
    ) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            auth.parse().map_err(|_| {
                FetchError::InvalidResponse("Invalid authorization header".to_string())
            })?,
        );

        let client = Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .build()?;
        Self::with_client(client, endpoint, region)
    }

    fn with_client(
        client: Client,
        endpoint: &str,
        region: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| FetchError::Transport(format!("invalid provider url {endpoint}: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            region: region.into(),
            request_id: AtomicU64::new(1),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl StateFetcher for HttpStateFetcher {
    async fn fetch_state(&self, resource_id: &ResourceId) -> Result<LifecycleState, FetchError> {
        let request_id = self.next_request_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: DESCRIBE_STATE_METHOD,
            params: (resource_id.as_str(), self.region.as_str()),
            id: request_id,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Transport(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        if body.jsonrpc != "2.0" {
            return Err(FetchError::InvalidResponse(format!(
                "Invalid JSON-RPC version: expected '2.0', got '{}'",
                body.jsonrpc
            )));
        }

        if body.id != request_id {
            return Err(FetchError::InvalidResponse(format!(
                "Request/response ID mismatch: expected {request_id}, got {}",
                body.id
            )));
        }

        if let Some(error) = body.error {
            if error.code == NOT_FOUND_CODE {
                return Err(FetchError::NotFound(resource_id.clone()));
            }
            return Err(FetchError::Provider {
                code: error.code,
                message: error.message,
            });
        }

        let state = body
            .result
            .and_then(|result| result.state)
            .map(|state| state.trim().to_string())
            .unwrap_or_default();

        if state.is_empty() {
            return Err(FetchError::InvalidResponse(
                "Missing state in successful response".to_string(),
            ));
        }

        Ok(LifecycleState::new(state))
    }
}

//! REST + SSE backend.
//!
//! Endpoints:
//! - `GET  /health`
//! - `GET  /hosts/active`
//! - `POST /datasets/request-sync`
//! - `POST /datasets/request-stream`, then `GET /datasets/stream/{request_id}`
//! - `POST /datasets/request-offload`, then `GET /datasets/{request_id}/status`
//!   until a `download_url` is published
use std::{path::Path, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use super::{
    BackendAdapter, Chunk, ChunkSource, ConnectorInfo, DEFAULT_TIMEOUT, OffloadPolicy,
    OffloadStatus, PollOutcome, QueryRequest, poll_until_published,
};
use crate::{
    error::TransportError,
    metric::{Completion, PendingQuery, QueryPattern, QueryResult, ServerTimestamps},
};

const PATTERNS: [QueryPattern; 3] = QueryPattern::ALL;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const INIT_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
/// Marks the end of the payload on the stream endpoint.
const STREAM_COMPLETE: &[u8] = b"---STREAM_COMPLETE---";
const MAX_ERROR_BODY: usize = 200;

/// Adapter for backends exposing datasets over REST, SSE streaming and
/// storage offload.
///
/// The HTTP client is injected so that one connection pool can be shared by
/// every adapter and every worker.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RestSseAdapter {
    client: Client,
    #[builder(setter(into))]
    name: String,
    #[builder(setter(into))]
    base_url: String,
    /// Timeout for listing connectors and reading streams.
    #[builder(default = DEFAULT_TIMEOUT)]
    timeout: Duration,
    #[builder(default)]
    offload: OffloadPolicy,
}

#[derive(Debug, Serialize)]
struct DatasetRequest<'a> {
    mac_address: &'a str,
    dataset_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<u64>,
}

impl<'a> From<&'a QueryRequest> for DatasetRequest<'a> {
    fn from(request: &'a QueryRequest) -> Self {
        Self {
            mac_address: &request.connector_id,
            dataset_name: &request.dataset,
            rows: request.rows,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    request_id: Option<String>,
    data: Option<serde_json::Value>,
    data_size_bytes: Option<u64>,
    #[serde(alias = "row_count")]
    rows: Option<u64>,
    #[serde(default)]
    timestamps: ServerTimestamps,
}

impl SyncResponse {
    fn bytes(&self) -> u64 {
        match (self.data_size_bytes, &self.data) {
            (Some(size), _) => size,
            (None, Some(serde_json::Value::String(s))) => s.len() as u64,
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StartedRequest {
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    download_url: Option<String>,
    error: Option<String>,
    #[serde(default)]
    timestamps: ServerTimestamps,
}

impl TryFrom<StatusResponse> for OffloadStatus {
    type Error = TransportError;

    fn try_from(value: StatusResponse) -> Result<Self, Self::Error> {
        match value.status.as_str() {
            "completed" => {
                let location = value.download_url.ok_or_else(|| {
                    TransportError::Malformed("completed status without download_url".into())
                })?;
                Ok(OffloadStatus::Completed {
                    location,
                    server_timestamps: value.timestamps,
                })
            }
            "error" => Ok(OffloadStatus::Failed(
                value.error.unwrap_or_else(|| "Unknown error".to_string()),
            )),
            _ => Ok(OffloadStatus::Pending),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActiveHosts {
    #[serde(default)]
    connectors: Vec<serde_json::Map<String, serde_json::Value>>,
}

fn connector_from_host(host: serde_json::Map<String, serde_json::Value>) -> ConnectorInfo {
    let text = |key: &str| host.get(key).and_then(|v| v.as_str()).map(str::to_string);
    ConnectorInfo {
        id: text("mac_address").unwrap_or_default(),
        status: text("status").unwrap_or_else(|| "unknown".to_string()),
        connected_at: text("connected_at"),
        last_ping: text("last_ping"),
        metadata: host,
    }
}

/// Pass chunks through until the end-of-stream marker, dropping the marker
/// and anything after it.
///
/// The marker may straddle network chunks, so the last bytes that could still
/// start it are held back until the next chunk settles them.
fn until_marker<S>(inner: S) -> impl Stream<Item = Result<Chunk, TransportError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, TransportError>> + Send + Unpin + 'static,
{
    const HELD: usize = STREAM_COMPLETE.len() - 1;

    stream::unfold(Some((inner, BytesMut::new())), |state| async move {
        let (mut inner, mut held) = state?;
        match inner.next().await {
            Some(Ok(bytes)) => {
                let wire = bytes.len() as u64;
                held.extend_from_slice(&bytes);
                if let Some(pos) = find(&held, STREAM_COMPLETE) {
                    held.truncate(pos);
                    return Some((Ok(Chunk::new(held.freeze()).read_from_wire(wire)), None));
                }
                let settled = held.len().saturating_sub(HELD);
                let chunk = Chunk::new(held.split_to(settled).freeze()).read_from_wire(wire);
                Some((Ok(chunk), Some((inner, held))))
            }
            Some(Err(e)) => Some((Err(e), None)),
            None if held.is_empty() => None,
            None => Some((Ok(Chunk::new(held.freeze()).read_from_wire(0)), None)),
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn ensure_success(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        code: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    })
}

impl RestSseAdapter {
    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, timeout: Duration) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        async {
            let response = self
                .client
                .post(self.url(path))
                .json(body)
                .timeout(timeout)
                .send()
                .await?;
            Ok::<T, TransportError>(ensure_success(response).await?.json().await?)
        }
        .await
        .map_err(|e| e.timed_out_after(timeout))
    }

    async fn fetch_sync(
        &self,
        pending: &PendingQuery,
        request: &QueryRequest,
    ) -> Result<Completion, TransportError> {
        let body: SyncResponse = self
            .post_json(
                "/datasets/request-sync",
                &DatasetRequest::from(request),
                request.timeout,
            )
            .await?;
        // The whole payload arrives at once, so first byte and completion coincide.
        let elapsed = pending.elapsed();

        let mut completion = Completion::success()
            .bytes(body.bytes())
            .rows(body.rows.unwrap_or(0))
            .ttfb(elapsed)
            .total_time(elapsed)
            .server_timestamps(body.timestamps);
        if let Some(id) = body.request_id {
            completion = completion.request_id(id);
        }
        Ok(completion)
    }

    async fn offload_status(&self, url: &str) -> Result<OffloadStatus, TransportError> {
        let status = async {
            let response = self.client.get(url).timeout(STATUS_TIMEOUT).send().await?;
            Ok::<StatusResponse, TransportError>(ensure_success(response).await?.json().await?)
        }
        .await
        .map_err(|e| e.timed_out_after(STATUS_TIMEOUT))?;
        status.try_into()
    }

    async fn fetch_offload(
        &self,
        pending: &PendingQuery,
        request: &QueryRequest,
        output: Option<&Path>,
    ) -> Result<Completion, TransportError> {
        let started: StartedRequest = self
            .post_json(
                "/datasets/request-offload",
                &DatasetRequest::from(request),
                INIT_TIMEOUT,
            )
            .await?;
        let request_id = started
            .request_id
            .unwrap_or_else(|| pending.request_id().to_string());
        let status_url = self.url(&format!("/datasets/{request_id}/status"));
        let status_url = status_url.as_str();

        let outcome = poll_until_published(self.offload, |_| self.offload_status(status_url)).await?;
        let completion = match outcome {
            PollOutcome::Published {
                location,
                server_timestamps,
                attempts,
            } => {
                let published = pending.elapsed();
                tracing::debug!("Request {request_id} published after {attempts} polls");

                let download_started = Instant::now();
                let content = async {
                    let response = self
                        .client
                        .get(&location)
                        .timeout(request.timeout)
                        .send()
                        .await?;
                    Ok::<Bytes, TransportError>(ensure_success(response).await?.bytes().await?)
                }
                .await
                .map_err(|e| e.timed_out_after(request.timeout))?;
                if let Some(path) = output {
                    tokio::fs::write(path, &content).await?;
                }

                Completion::success()
                    .bytes(content.len() as u64)
                    .ttfb(published)
                    .metadata_latency(published)
                    .transfer_latency(download_started.elapsed())
                    .server_timestamps(server_timestamps)
            }
            PollOutcome::Failed(message) => Completion::error(message),
            PollOutcome::Exhausted { .. } => {
                Completion::timeout("Polling timeout waiting for download URL")
            }
        };
        Ok(completion.request_id(request_id))
    }
}

#[async_trait]
impl BackendAdapter for RestSseAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_patterns(&self) -> &[QueryPattern] {
        &PATTERNS
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.url("/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::error!("Health check failed: {e}");
                false
            }
        }
    }

    async fn list_connectors(&self) -> Vec<ConnectorInfo> {
        let hosts = async {
            let response = self
                .client
                .get(self.url("/hosts/active"))
                .timeout(self.timeout)
                .send()
                .await?;
            let hosts: ActiveHosts = ensure_success(response).await?.json().await?;
            Ok::<_, TransportError>(hosts)
        };

        match hosts.await {
            Ok(hosts) => hosts.connectors.into_iter().map(connector_from_host).collect(),
            Err(e) => {
                tracing::error!("Error listing connectors: {e}");
                Vec::new()
            }
        }
    }

    async fn query_sync(&self, request: &QueryRequest) -> QueryResult {
        let pending = PendingQuery::start(
            &self.name,
            &request.connector_id,
            &request.dataset,
            QueryPattern::Sync,
        );
        let completion = match self.fetch_sync(&pending, request).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!("Sync query to {} failed: {e}", request.connector_id);
                e.into()
            }
        };
        pending.finish(completion)
    }

    async fn open_stream(&self, request: &QueryRequest) -> Result<ChunkSource, TransportError> {
        let negotiation = Instant::now();
        let started: StartedRequest = self
            .post_json(
                "/datasets/request-stream",
                &DatasetRequest::from(request),
                INIT_TIMEOUT,
            )
            .await?;
        let request_id = started
            .request_id
            .ok_or_else(|| TransportError::Malformed("stream request without request_id".into()))?;
        let metadata_latency = negotiation.elapsed();

        let timeout = self.timeout;
        let response = self
            .client
            .get(self.url(&format!("/datasets/stream/{request_id}")))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from(e).timed_out_after(timeout))?;
        let body = ensure_success(response)
            .await?
            .bytes_stream()
            .map_err(move |e| TransportError::from(e).timed_out_after(timeout))
            .boxed();

        Ok(ChunkSource::new(until_marker(body))
            .request_id(request_id)
            .metadata_latency(metadata_latency))
    }

    async fn query_offload(&self, request: &QueryRequest, output: Option<&Path>) -> QueryResult {
        let pending = PendingQuery::start(
            &self.name,
            &request.connector_id,
            &request.dataset,
            QueryPattern::Offload,
        );
        let completion = match self.fetch_offload(&pending, request, output).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!("Offload query to {} failed: {e}", request.connector_id);
                e.into()
            }
        };
        pending.finish(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapter::StreamQuery, metric::QueryStatus};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, method, path},
    };

    fn adapter(server: &MockServer) -> RestSseAdapter {
        RestSseAdapter::builder()
            .client(Client::new())
            .name("system1")
            .base_url(format!("{}/", server.uri()))
            .offload(OffloadPolicy {
                poll_interval: Duration::from_millis(10),
                max_attempts: 3,
            })
            .build()
    }

    #[tokio::test]
    async fn health_check_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(adapter(&server).health_check().await);
    }

    #[tokio::test]
    async fn health_check_swallows_connection_errors() {
        let adapter = RestSseAdapter::builder()
            .client(Client::new())
            .name("system1")
            .base_url("http://127.0.0.1:9")
            .build();

        assert!(!adapter.health_check().await);
        assert!(adapter.list_connectors().await.is_empty());
    }

    #[tokio::test]
    async fn lists_active_hosts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hosts/active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "connectors": [
                    {"mac_address": "aa:bb", "status": "online", "connected_at": "2024-01-01T00:00:00Z"},
                    {"mac_address": "cc:dd"}
                ]
            })))
            .mount(&server)
            .await;

        let connectors = adapter(&server).list_connectors().await;

        assert_eq!(connectors.len(), 2);
        assert_eq!(connectors[0].id, "aa:bb");
        assert_eq!(connectors[0].status, "online");
        assert_eq!(connectors[0].connected_at.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(connectors[1].status, "unknown");
        assert_eq!(connectors[1].metadata.get("mac_address"), Some(&json!("cc:dd")));
    }

    #[tokio::test]
    async fn sync_query_reads_size_and_timestamps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-sync"))
            .and(body_partial_json(json!({"mac_address": "aa:bb", "dataset_name": "sales.csv"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "request_id": "req-7",
                "data": "a,b\n1,2\n",
                "data_size_bytes": 2048,
                "timestamps": {"t1_received": 1.5}
            })))
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_sync(&QueryRequest::new("aa:bb", "sales.csv"))
            .await;

        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(result.request_id, "req-7");
        assert_eq!(result.bytes, 2048);
        assert_eq!(result.ttfb, result.total_time);
        assert_eq!(result.server_timestamps.get("t1_received"), Some(&json!(1.5)));
    }

    #[tokio::test]
    async fn sync_query_folds_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-sync"))
            .respond_with(ResponseTemplate::new(404).set_body_string("connector not found"))
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_sync(&QueryRequest::new("zz", "sales.csv"))
            .await;

        assert_eq!(result.status, QueryStatus::Error);
        assert_eq!(result.error.as_deref(), Some("HTTP 404: connector not found"));
        assert_eq!(result.throughput_bytes_per_sec, 0.0);
    }

    #[tokio::test]
    async fn sync_query_reports_timeouts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-sync"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_sync(&QueryRequest::new("aa:bb", "slow").timeout(Duration::from_millis(100)))
            .await;

        assert_eq!(result.status, QueryStatus::Timeout);
        assert_eq!(result.error.as_deref(), Some("Timeout after 100ms"));
    }

    #[tokio::test]
    async fn stream_stops_at_completion_marker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "s-1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/stream/s-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(&b"row1\nrow2\n---STREAM_COMPLETE---trailer"[..]),
            )
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_stream(&QueryRequest::new("aa:bb", "events"), None)
            .await
            .collect()
            .await;

        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(result.request_id, "s-1");
        assert_eq!(result.bytes, 10);
        assert!(result.ttfb <= result.total_time);
    }

    #[tokio::test]
    async fn stream_of_only_the_marker_still_times_first_byte() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "s-2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/stream/s-2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(STREAM_COMPLETE)
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_stream(&QueryRequest::new("aa:bb", "empty"), None)
            .await
            .collect()
            .await;

        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(result.bytes, 0);
        assert!(result.ttfb >= Duration::from_millis(50));
        assert!(result.ttfb <= result.total_time);
    }

    #[tokio::test]
    async fn stream_timeout_names_the_limit_that_fired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "s-3"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/stream/s-3"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        let adapter = RestSseAdapter::builder()
            .client(Client::new())
            .name("system1")
            .base_url(server.uri())
            .timeout(Duration::from_millis(100))
            .build();

        let result = adapter
            .query_stream(&QueryRequest::new("aa:bb", "slow"), None)
            .await
            .collect()
            .await;

        assert_eq!(result.status, QueryStatus::Timeout);
        assert_eq!(result.error.as_deref(), Some("Timeout after 100ms"));
    }

    #[tokio::test]
    async fn stream_open_failure_is_an_error_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-stream"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_stream(&QueryRequest::new("aa:bb", "events"), None)
            .await
            .collect()
            .await;

        assert_eq!(result.status, QueryStatus::Error);
        assert!(result.error.unwrap().starts_with("HTTP 503"));
    }

    #[tokio::test]
    async fn offload_polls_then_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-offload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "o-1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/o-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "uploading"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/o-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "download_url": format!("{}/bucket/o-1.csv", server.uri()),
                "timestamps": {"uploaded": "2024-01-01T00:00:01Z"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bucket/o-1.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("o-1.csv");
        let result = adapter(&server)
            .query_offload(&QueryRequest::new("aa:bb", "big"), Some(&output))
            .await;

        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(result.request_id, "o-1");
        assert_eq!(result.bytes, 4096);
        assert_eq!(std::fs::read(&output).unwrap().len(), 4096);
        assert!(result.server_timestamps.contains_key("uploaded"));
    }

    #[tokio::test]
    async fn offload_surfaces_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-offload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "o-2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/o-2/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "error", "error": "dataset missing"})),
            )
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_offload(&QueryRequest::new("aa:bb", "gone"), None)
            .await;

        assert_eq!(result.status, QueryStatus::Error);
        assert_eq!(result.error.as_deref(), Some("dataset missing"));
    }

    #[tokio::test]
    async fn offload_times_out_when_never_published() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datasets/request-offload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "o-3"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datasets/o-3/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "pending"})))
            .expect(3)
            .mount(&server)
            .await;

        let result = adapter(&server)
            .query_offload(&QueryRequest::new("aa:bb", "slow"), None)
            .await;

        assert_eq!(result.status, QueryStatus::Timeout);
        assert_eq!(result.request_id, "o-3");
    }

    async fn drain(parts: &[&'static [u8]]) -> (Vec<u8>, QueryResult) {
        let raw: Vec<Result<Bytes, TransportError>> =
            parts.iter().map(|part| Ok(Bytes::from_static(part))).collect();
        let pending = PendingQuery::start("system1", "aa:bb", "events", QueryPattern::Stream);
        let source = ChunkSource::new(until_marker(stream::iter(raw)));
        let StreamQuery { mut chunks, outcome } = StreamQuery::new(pending, source, None);

        let mut data = Vec::new();
        while let Some(chunk) = chunks.next().await {
            data.extend_from_slice(&chunk.data);
        }
        drop(chunks);
        (data, outcome.resolve().await)
    }

    #[tokio::test]
    async fn marker_split_across_chunks_is_stripped() {
        let (data, result) = drain(&[b"row1\n---STREAM_", b"COMPLETE---trailer"]).await;

        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(data, b"row1\n");
        assert_eq!(result.bytes, 5);
    }

    #[tokio::test]
    async fn marker_spread_over_three_chunks_is_stripped() {
        let (data, result) = drain(&[b"ab---STR", b"EAM_COMP", b"LETE---x", b"more"]).await;

        assert_eq!(data, b"ab");
        assert_eq!(result.bytes, 2);
    }

    #[tokio::test]
    async fn held_back_bytes_are_released_when_the_marker_never_completes() {
        let (data, result) = drain(&[b"ab---STREAM_", b"X", b"---STREAM"]).await;

        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(data, b"ab---STREAM_X---STREAM");
        assert_eq!(result.bytes, 22);
    }

    #[test]
    fn marker_search() {
        assert_eq!(find(b"abc---STREAM_COMPLETE---", STREAM_COMPLETE), Some(3));
        assert_eq!(find(b"abc", STREAM_COMPLETE), None);
    }
}

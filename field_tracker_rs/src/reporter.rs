use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::sample::LocationSample;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Classified result of one delivery request
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Backend acknowledged receipt
    Success,
    /// Network down, timeout or server-side failure; keep the samples
    Retryable(TrackerError),
    /// Credentials rejected; the samples can't be attributed and are dropped
    Fatal(TrackerError),
}

impl ReportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReportOutcome::Success)
    }
}

/// Delivers samples to the backend. Never retries on its own; the
/// orchestrator's trigger cadence drives retries.
#[async_trait]
pub trait NetworkReporter: Send + Sync {
    async fn report_one(&self, sample: &LocationSample, token: &str) -> ReportOutcome;
    async fn report_batch(&self, samples: &[LocationSample], token: &str) -> ReportOutcome;
}

/// Body for the single-sample endpoint
#[derive(Debug, Serialize)]
struct SinglePayload {
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    battery_level: u8,
    is_real_time: bool,
}

impl From<&LocationSample> for SinglePayload {
    fn from(sample: &LocationSample) -> Self {
        SinglePayload {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            battery_level: sample.battery_level_percent,
            is_real_time: sample.is_real_time,
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchItem {
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    battery_level: u8,
    is_real_time: bool,
    recorded_at: String,
}

impl From<&LocationSample> for BatchItem {
    fn from(sample: &LocationSample) -> Self {
        BatchItem {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            battery_level: sample.battery_level_percent,
            is_real_time: sample.is_real_time,
            recorded_at: sample.recorded_at().to_rfc3339(),
        }
    }
}

/// Body for the batch endpoint
#[derive(Debug, Serialize)]
struct BatchPayload {
    locations: Vec<BatchItem>,
}

/// Map an HTTP status to a delivery outcome
pub fn classify_status(status: u16) -> ReportOutcome {
    match status {
        200..=299 => ReportOutcome::Success,
        401 => ReportOutcome::Fatal(TrackerError::AuthRejected),
        _ => ReportOutcome::Retryable(TrackerError::ServerError(status)),
    }
}

/// JSON-over-HTTPS reporter
///
/// # Wire format
/// - Single: `POST {base}{location_path}` with
///   `{latitude, longitude, accuracy, battery_level, is_real_time}`
/// - Batch: `POST {base}{batch_path}` with `{locations: [{..., recorded_at}]}`
///
/// Both carry `Authorization: Bearer <token>`.
pub struct HttpReporter {
    client: reqwest::Client,
    single_url: String,
    batch_url: String,
}

impl HttpReporter {
    pub fn new(
        base_url: &str,
        location_path: &str,
        batch_path: &str,
        timeout: Duration,
    ) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("field-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            single_url: format!("{}{}", base, location_path),
            batch_url: format!("{}{}", base, batch_path),
        })
    }

    pub fn from_config(config: &TrackerConfig) -> TrackerResult<Self> {
        Self::new(
            &config.api.base_url,
            &config.api.location_path,
            &config.api.batch_path,
            config.request_timeout(),
        )
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T, token: &str) -> ReportOutcome {
        let response = match self
            .client
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("request to {} timed out", url)
                } else {
                    e.to_string()
                };
                return ReportOutcome::Retryable(TrackerError::NetworkUnavailable(reason));
            }
        };

        let outcome = classify_status(response.status().as_u16());
        if !outcome.is_success() {
            log::warn!("Location upload to {} rejected: HTTP {}", url, response.status());
        }
        outcome
    }
}

#[async_trait]
impl NetworkReporter for HttpReporter {
    async fn report_one(&self, sample: &LocationSample, token: &str) -> ReportOutcome {
        let payload = SinglePayload::from(sample);
        self.post(&self.single_url, &payload, token).await
    }

    async fn report_batch(&self, samples: &[LocationSample], token: &str) -> ReportOutcome {
        let payload = BatchPayload {
            locations: samples.iter().map(BatchItem::from).collect(),
        };
        self.post(&self.batch_url, &payload, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Fix;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Backend {
        status: AtomicU16,
        delay_ms: AtomicU16,
        requests: Mutex<Vec<(String, Option<String>, serde_json::Value)>>,
    }

    async fn record(
        state: Arc<Backend>,
        path: &str,
        headers: HeaderMap,
        body: serde_json::Value,
    ) -> StatusCode {
        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        state
            .requests
            .lock()
            .unwrap()
            .push((path.to_string(), auth, body));
        StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap()
    }

    async fn spawn_backend(status: u16) -> (Arc<Backend>, String) {
        let state = Arc::new(Backend::default());
        state.status.store(status, Ordering::SeqCst);

        let app = Router::new()
            .route(
                "/api/location",
                post(
                    |State(s): State<Arc<Backend>>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                        record(s, "single", headers, body).await
                    },
                ),
            )
            .route(
                "/api/location/batch",
                post(
                    |State(s): State<Arc<Backend>>, headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                        record(s, "batch", headers, body).await
                    },
                ),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (state, format!("http://{}", addr))
    }

    fn reporter(base: &str, timeout_ms: u64) -> HttpReporter {
        HttpReporter::new(
            base,
            "/api/location",
            "/api/location/batch",
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
    }

    fn sample(minute: u32, real_time: bool) -> LocationSample {
        LocationSample::new(
            Fix::new(41.311, 69.279, Some(8.5)),
            64,
            real_time,
            Utc.with_ymd_and_hms(2025, 5, 12, 10, minute, 0).unwrap(),
        )
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), ReportOutcome::Success);
        assert_eq!(classify_status(204), ReportOutcome::Success);
        assert_eq!(
            classify_status(401),
            ReportOutcome::Fatal(TrackerError::AuthRejected)
        );
        assert_eq!(
            classify_status(500),
            ReportOutcome::Retryable(TrackerError::ServerError(500))
        );
        assert!(matches!(classify_status(422), ReportOutcome::Retryable(_)));
    }

    #[tokio::test]
    async fn test_single_wire_format() {
        let (backend, base) = spawn_backend(201).await;
        let outcome = reporter(&base, 2000).report_one(&sample(0, true), "tok-1").await;
        assert_eq!(outcome, ReportOutcome::Success);

        let requests = backend.requests.lock().unwrap();
        let (path, auth, body) = &requests[0];
        assert_eq!(path, "single");
        assert_eq!(auth.as_deref(), Some("Bearer tok-1"));
        assert_eq!(body["latitude"], 41.311);
        assert_eq!(body["accuracy"], 8.5);
        assert_eq!(body["battery_level"], 64);
        assert_eq!(body["is_real_time"], true);
        assert!(body.get("recorded_at").is_none());
    }

    #[tokio::test]
    async fn test_batch_wire_format_preserves_order() {
        let (backend, base) = spawn_backend(200).await;
        let batch = vec![sample(1, false), sample(2, false), sample(3, true)];
        let outcome = reporter(&base, 2000).report_batch(&batch, "tok-2").await;
        assert_eq!(outcome, ReportOutcome::Success);

        let requests = backend.requests.lock().unwrap();
        let (path, _, body) = &requests[0];
        assert_eq!(path, "batch");
        let locations = body["locations"].as_array().unwrap();
        assert_eq!(locations.len(), 3);
        assert_eq!(locations[0]["recorded_at"], "2025-05-12T10:01:00+00:00");
        assert_eq!(locations[2]["recorded_at"], "2025-05-12T10:03:00+00:00");
        assert_eq!(locations[2]["is_real_time"], true);
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal_server_error_is_retryable() {
        let (_backend, base) = spawn_backend(401).await;
        let outcome = reporter(&base, 2000).report_one(&sample(0, false), "expired").await;
        assert_eq!(outcome, ReportOutcome::Fatal(TrackerError::AuthRejected));

        let (_backend, base) = spawn_backend(503).await;
        let outcome = reporter(&base, 2000).report_batch(&[sample(0, false)], "tok").await;
        assert_eq!(outcome, ReportOutcome::Retryable(TrackerError::ServerError(503)));
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let (backend, base) = spawn_backend(200).await;
        backend.delay_ms.store(1500, Ordering::SeqCst);

        let outcome = reporter(&base, 200).report_one(&sample(0, false), "tok").await;
        assert!(matches!(
            outcome,
            ReportOutcome::Retryable(TrackerError::NetworkUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = reporter(&format!("http://{}", addr), 1000)
            .report_one(&sample(0, false), "tok")
            .await;
        assert!(matches!(
            outcome,
            ReportOutcome::Retryable(TrackerError::NetworkUnavailable(_))
        ));
    }
}

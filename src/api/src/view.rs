//! Prediction viewer.
//!
//! Fetches ranked predictions for a race from the prediction service and
//! renders the top of the list. Fetches run as background tasks tagged with
//! a generation; a result that arrives for an older request is dropped, so
//! the view always reflects the latest race.

use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::PredictionRow;

/// Number of rows rendered.
pub const TOP_N: usize = 10;

/// Errors from fetching predictions.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("prediction service returned status {0}")]
    Status(u16),

    #[error("malformed prediction payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of predictions for a race.
#[async_trait]
pub trait PredictionSource: Send + Sync {
    async fn fetch(&self, race_id: &str) -> Result<Vec<PredictionRow>, FetchError>;
}

/// Prediction source backed by `GET {base_url}/api/predict?race_id=<id>`.
pub struct HttpPredictionSource {
    client: Client,
    base_url: String,
}

impl HttpPredictionSource {
    /// Create a new source. Every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PredictionSource for HttpPredictionSource {
    async fn fetch(&self, race_id: &str) -> Result<Vec<PredictionRow>, FetchError> {
        let response = self
            .client
            .get(format!("{}/api/predict", self.base_url))
            .query(&[("race_id", race_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Progress of the most recent fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// Observable view state.
#[derive(Debug, Clone)]
pub struct ViewState {
    /// Latest requested race
    pub race_id: Option<String>,
    /// Rows as received, not truncated
    pub rows: Vec<PredictionRow>,
    /// Race the current rows belong to
    pub rows_race_id: Option<String>,
    pub status: FetchStatus,
    generation: u64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            race_id: None,
            rows: Vec::new(),
            rows_race_id: None,
            status: FetchStatus::Idle,
            generation: 0,
        }
    }
}

impl ViewState {
    /// Start a new request, returning its generation.
    fn begin(&mut self, race_id: &str) -> u64 {
        self.generation += 1;
        self.race_id = Some(race_id.to_string());
        self.status = FetchStatus::Loading;
        self.generation
    }

    /// Apply a fetch outcome. Returns false when the outcome is stale.
    fn apply(
        &mut self,
        generation: u64,
        outcome: Result<Vec<PredictionRow>, FetchError>,
    ) -> bool {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "Discarding stale predictions");
            return false;
        }

        match outcome {
            Ok(rows) => {
                self.rows = rows;
                self.rows_race_id = self.race_id.clone();
                self.status = FetchStatus::Ready;
            }
            Err(e) => {
                tracing::warn!(race_id = ?self.race_id, "Failed to fetch predictions: {}", e);
                // Keep last-known rows only if they are for this race
                if self.rows_race_id != self.race_id {
                    self.rows.clear();
                    self.rows_race_id = None;
                }
                self.status = FetchStatus::Failed(e.to_string());
            }
        }
        true
    }

    /// Rendered top rows.
    pub fn render(&self) -> Vec<RenderedRow> {
        render_rows(&self.rows)
    }
}

/// A single rendered list item.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRow {
    /// 1-based position in the list
    pub rank: usize,
    pub driver_id: String,
    pub points_pct: String,
}

impl fmt::Display for RenderedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>2}. {:<12} {:>6}", self.rank, self.driver_id, self.points_pct)
    }
}

/// Format a probability as a percentage with one decimal place.
pub fn format_percent(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

/// Take the first `TOP_N` rows in received order.
pub fn render_rows(rows: &[PredictionRow]) -> Vec<RenderedRow> {
    rows.iter()
        .take(TOP_N)
        .enumerate()
        .map(|(i, row)| RenderedRow {
            rank: i + 1,
            driver_id: row.driver_id.clone(),
            points_pct: format_percent(row.prob_points),
        })
        .collect()
}

/// Prediction list for one race at a time.
pub struct PredictionView<S> {
    source: Arc<S>,
    state: Arc<watch::Sender<ViewState>>,
    inflight: Vec<JoinHandle<()>>,
}

impl<S: PredictionSource + 'static> PredictionView<S> {
    pub fn new(source: S) -> Self {
        let (tx, _rx) = watch::channel(ViewState::default());
        Self {
            source: Arc::new(source),
            state: Arc::new(tx),
            inflight: Vec::new(),
        }
    }

    /// Show predictions for `race_id`. Does nothing if it is already shown.
    pub fn set_race_id(&mut self, race_id: impl Into<String>) {
        let race_id = race_id.into();
        if self.state.borrow().race_id.as_deref() == Some(race_id.as_str()) {
            return;
        }
        self.issue(race_id);
    }

    /// Re-fetch the current race.
    #[allow(dead_code)]
    pub fn refresh(&mut self) {
        let current = self.state.borrow().race_id.clone();
        if let Some(race_id) = current {
            self.issue(race_id);
        }
    }

    fn issue(&mut self, race_id: String) {
        // Superseded fetches run to completion and are discarded in apply()
        self.inflight.retain(|handle| !handle.is_finished());

        let mut generation = 0;
        self.state.send_modify(|s| generation = s.begin(&race_id));
        tracing::debug!(%race_id, generation, "Fetching predictions");

        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        self.inflight.push(tokio::spawn(async move {
            let outcome = source.fetch(&race_id).await;
            state.send_if_modified(|s| s.apply(generation, outcome));
        }));
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Rendered top rows of the current state.
    pub fn render(&self) -> Vec<RenderedRow> {
        self.state.borrow().render()
    }

    /// Wait until the latest request has completed.
    pub async fn settled(&self) -> ViewState {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|s| s.status != FetchStatus::Loading).await {
            Ok(state) => state.clone(),
            // Sender lives in self, so this is unreachable while borrowed
            Err(_) => self.state(),
        };
        settled
    }
}

impl<S> Drop for PredictionView<S> {
    fn drop(&mut self) {
        for handle in self.inflight.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn rows(prefix: &str, n: usize) -> Vec<PredictionRow> {
        (0..n)
            .map(|i| PredictionRow {
                driver_id: format!("{}{:02}", prefix, i),
                prob_points: 1.0 - i as f64 * 0.05,
                score: 100.0 - i as f64,
            })
            .collect()
    }

    /// Replies with queued outcomes per race.
    #[derive(Default)]
    struct ScriptedSource {
        replies: Mutex<HashMap<String, VecDeque<Result<Vec<PredictionRow>, FetchError>>>>,
    }

    impl ScriptedSource {
        fn reply(self, race_id: &str, outcome: Result<Vec<PredictionRow>, FetchError>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(race_id.to_string())
                .or_default()
                .push_back(outcome);
            self
        }
    }

    #[async_trait]
    impl PredictionSource for ScriptedSource {
        async fn fetch(&self, race_id: &str) -> Result<Vec<PredictionRow>, FetchError> {
            self.replies
                .lock()
                .unwrap()
                .get_mut(race_id)
                .and_then(|q| q.pop_front())
                .unwrap_or(Err(FetchError::Status(404)))
        }
    }

    /// Holds each fetch until the test releases it.
    struct GatedSource {
        gates: Mutex<HashMap<String, oneshot::Receiver<Vec<PredictionRow>>>>,
        delivered: Arc<AtomicUsize>,
    }

    impl GatedSource {
        fn new(gates: Vec<(&str, oneshot::Receiver<Vec<PredictionRow>>)>) -> Self {
            Self {
                gates: Mutex::new(
                    gates
                        .into_iter()
                        .map(|(id, rx)| (id.to_string(), rx))
                        .collect(),
                ),
                delivered: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl PredictionSource for GatedSource {
        async fn fetch(&self, race_id: &str) -> Result<Vec<PredictionRow>, FetchError> {
            let gate = self.gates.lock().unwrap().remove(race_id);
            let outcome = match gate {
                Some(rx) => rx.await.map_err(|_| FetchError::Status(499)),
                None => Err(FetchError::Status(404)),
            };
            self.delivered.fetch_add(1, Ordering::SeqCst);
            outcome
        }
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.4567), "45.7%");
        assert_eq!(format_percent(0.0), "0.0%");
        assert_eq!(format_percent(1.0), "100.0%");
        assert_eq!(format_percent(0.05), "5.0%");
    }

    #[test]
    fn test_render_rows_top_ten_in_order() {
        let input = rows("D", 15);
        let rendered = render_rows(&input);

        assert_eq!(rendered.len(), TOP_N);
        for (i, item) in rendered.iter().enumerate() {
            assert_eq!(item.rank, i + 1);
            assert_eq!(item.driver_id, input[i].driver_id);
        }
    }

    #[test]
    fn test_render_rows_no_resort() {
        let input = vec![
            PredictionRow {
                driver_id: "LOW".into(),
                prob_points: 0.1,
                score: 1.0,
            },
            PredictionRow {
                driver_id: "HIGH".into(),
                prob_points: 0.9,
                score: 9.0,
            },
        ];
        let rendered = render_rows(&input);
        assert_eq!(rendered[0].driver_id, "LOW");
        assert_eq!(rendered[0].points_pct, "10.0%");
        assert_eq!(rendered[1].driver_id, "HIGH");
    }

    #[test]
    fn test_render_row_display() {
        let row = RenderedRow {
            rank: 1,
            driver_id: "VER".to_string(),
            points_pct: "45.7%".to_string(),
        };
        let line = row.to_string();
        assert!(line.starts_with(" 1. VER"));
        assert!(line.ends_with("45.7%"));
    }

    #[test]
    fn test_stale_outcome_discarded() {
        let mut state = ViewState::default();
        let first = state.begin("A");
        let second = state.begin("B");

        assert!(state.apply(second, Ok(rows("B", 3))));
        assert!(!state.apply(first, Ok(rows("A", 3))));

        assert_eq!(state.race_id.as_deref(), Some("B"));
        assert!(state.rows.iter().all(|r| r.driver_id.starts_with('B')));
    }

    #[test]
    fn test_failure_clears_rows_of_other_race() {
        let mut state = ViewState::default();
        let a = state.begin("A");
        state.apply(a, Ok(rows("A", 3)));

        let b = state.begin("B");
        assert!(state.apply(b, Err(FetchError::Status(500))));
        assert!(state.rows.is_empty());
        assert!(matches!(state.status, FetchStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_settled_without_race_returns_idle() {
        let view = PredictionView::new(ScriptedSource::default());
        let state = view.settled().await;
        assert_eq!(state.status, FetchStatus::Idle);
        assert!(state.rows.is_empty());
    }

    #[tokio::test]
    async fn test_settled_waits_for_latest_fetch() {
        let (tx, rx) = oneshot::channel();
        let mut view = PredictionView::new(GatedSource::new(vec![("R7", rx)]));

        view.set_race_id("R7");
        assert_eq!(view.state().status, FetchStatus::Loading);

        tx.send(rows("R7-", 12)).unwrap();
        let state = view.settled().await;
        assert_eq!(state.status, FetchStatus::Ready);
        assert_eq!(state.rows.len(), 12);
        assert_eq!(view.render().len(), TOP_N);
    }

    #[tokio::test]
    async fn test_initial_state_empty() {
        let view = PredictionView::new(ScriptedSource::default());
        assert_eq!(view.state().status, FetchStatus::Idle);
        assert!(view.render().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_renders_top_ten() {
        let source = ScriptedSource::default().reply("R1", Ok(rows("D", 15)));
        let mut view = PredictionView::new(source);

        view.set_race_id("R1");
        let state = view.settled().await;

        assert_eq!(state.status, FetchStatus::Ready);
        assert_eq!(state.rows.len(), 15);

        let rendered = view.render();
        assert_eq!(rendered.len(), 10);
        let expected: Vec<String> = rows("D", 10).into_iter().map(|r| r.driver_id).collect();
        let got: Vec<String> = rendered.into_iter().map(|r| r.driver_id).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_failure_retains_last_rows_for_same_race() {
        let source = ScriptedSource::default()
            .reply("R1", Ok(rows("D", 4)))
            .reply("R1", Err(FetchError::Status(503)));
        let mut view = PredictionView::new(source);

        view.set_race_id("R1");
        view.settled().await;
        view.refresh();
        let state = view.settled().await;

        assert_eq!(
            state.status,
            FetchStatus::Failed("prediction service returned status 503".to_string())
        );
        assert_eq!(state.rows.len(), 4);
        assert_eq!(view.render().len(), 4);
    }

    #[tokio::test]
    async fn test_same_race_does_not_refetch() {
        // Only one reply queued; a second fetch would fail
        let source = ScriptedSource::default().reply("R1", Ok(rows("D", 2)));
        let mut view = PredictionView::new(source);

        view.set_race_id("R1");
        view.settled().await;
        view.set_race_id("R1");
        let state = view.settled().await;

        assert_eq!(state.status, FetchStatus::Ready);
        assert_eq!(state.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_superseded_fetch_does_not_overwrite() {
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        let source = GatedSource::new(vec![("A", rx_a), ("B", rx_b)]);
        let delivered = Arc::clone(&source.delivered);
        let mut view = PredictionView::new(source);
        let mut updates = view.subscribe();

        view.set_race_id("A");
        view.set_race_id("B");

        // B resolves first, then A arrives late
        tx_b.send(rows("B", 3)).unwrap();
        updates
            .wait_for(|s| s.status == FetchStatus::Ready)
            .await
            .unwrap();
        updates.borrow_and_update();

        tx_a.send(rows("A", 5)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A's result reached the view and was dropped without a state change
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert!(!updates.has_changed().unwrap());

        let state = view.state();
        assert_eq!(state.race_id.as_deref(), Some("B"));
        assert_eq!(state.rows_race_id.as_deref(), Some("B"));
        assert_eq!(state.rows.len(), 3);
        assert!(view.render().iter().all(|r| r.driver_id.starts_with('B')));
    }

    async fn serve_predictions() -> String {
        async fn predict(Query(params): Query<HashMap<String, String>>) -> Json<Vec<PredictionRow>> {
            let race_id = params.get("race_id").cloned().unwrap_or_default();
            Json(rows(&race_id, 15))
        }

        let app = Router::new()
            .route("/api/predict", get(predict))
            .route("/broken/api/predict", get(|| async { "not json" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_source_fetches_rows() {
        let base = serve_predictions().await;
        let source = HttpPredictionSource::new(base, Duration::from_secs(5)).unwrap();

        let fetched = source.fetch("SPA").await.unwrap();
        assert_eq!(fetched.len(), 15);
        assert_eq!(fetched[0].driver_id, "SPA00");
    }

    #[tokio::test]
    async fn test_http_source_decode_failure() {
        let base = serve_predictions().await;
        let source =
            HttpPredictionSource::new(format!("{}/broken/", base), Duration::from_secs(5)).unwrap();

        let err = source.fetch("SPA").await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_http_source_status_failure() {
        let base = serve_predictions().await;
        let source =
            HttpPredictionSource::new(format!("{}/missing", base), Duration::from_secs(5)).unwrap();

        let err = source.fetch("SPA").await.unwrap_err();
        assert!(matches!(err, FetchError::Status(404)));
    }
}

//! ==============================================================================
//! store.rs - reconciliation / view-model store
//! ==============================================================================
//!
//! purpose:
//!     merges every ingestion path into one view model. adapters never touch
//!     state directly: they push `IngestEvent`s into a bounded queue and a
//!     single task applies them one at a time.
//!
//! flow:
//!
//! ```text
//!     pull adapter ─┐
//!     push adapter ─┼──> mpsc<IngestEvent> ──> ReconciliationStore::apply
//!     simulator ────┘                                │
//!                                                    ▼
//!                                      watch<ViewModel> ──> server / tests
//! ```
//!
//! rules:
//!     - last write wins: whatever arrives last becomes `current`, no matter
//!       what timestamp it carries
//!     - every accepted sample is appended to the bounded history
//!     - Loading -> Live happens once and never goes back
//!     - NoDataTimeout fires at most once, and only while still Loading
//!
//! ==============================================================================

use crate::domain::{now_millis, ErrorKind, IngestError, RawSample, Sample};
use crate::history::History;

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// queue depth between adapters and the store
const EVENT_QUEUE: usize = 256;

// ==============================================================================
// events
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pull,
    Push,
    Simulator,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Pull => "pull",
            SourceKind::Push => "push",
            SourceKind::Simulator => "simulator",
        })
    }
}

/// Everything an adapter can tell the store.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// a candidate sample
    Sample { source: SourceKind, raw: RawSample },
    /// history offered by a snapshot endpoint; only used while history is empty
    Backfill { source: SourceKind, samples: Vec<RawSample> },
    /// transient failure
    Fault { source: SourceKind, kind: ErrorKind },
    /// channel (re)established
    Connected { source: SourceKind },
}

/// An adapter's write end of the event queue, tagged with its source.
#[derive(Debug, Clone)]
pub struct IngestSink {
    source: SourceKind,
    tx: mpsc::Sender<IngestEvent>,
}

impl IngestSink {
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// false once the store is gone
    pub async fn sample(&self, raw: RawSample) -> bool {
        self.send(IngestEvent::Sample { source: self.source, raw }).await
    }

    pub async fn backfill(&self, samples: Vec<RawSample>) -> bool {
        self.send(IngestEvent::Backfill { source: self.source, samples }).await
    }

    pub async fn fault(&self, kind: ErrorKind) -> bool {
        self.send(IngestEvent::Fault { source: self.source, kind }).await
    }

    pub async fn connected(&self) -> bool {
        self.send(IngestEvent::Connected { source: self.source }).await
    }

    async fn send(&self, event: IngestEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

// ==============================================================================
// view model
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Uninitialized,
    Loading,
    Live,
}

/// Snapshot handed to subscribers after every mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewModel {
    pub current: Option<Sample>,
    pub history: Vec<Sample>,
    pub error_state: Option<ErrorKind>,
    pub phase: Phase,
}

impl ViewModel {
    /// the newest `n` history entries, oldest first
    pub fn recent(&self, n: usize) -> &[Sample] {
        &self.history[self.history.len().saturating_sub(n)..]
    }
}

// ==============================================================================
// store
// ==============================================================================

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub history_capacity: usize,
    pub no_data_timeout: Duration,
    /// log every accepted sample at info
    pub show_sensor_data: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            no_data_timeout: Duration::from_secs(10),
            show_sensor_data: true,
        }
    }
}

pub struct ReconciliationStore {
    config: StoreConfig,
    current: Option<Sample>,
    history: History,
    error_state: Option<ErrorKind>,
    phase: Phase,
    no_data_signalled: bool,
    view: watch::Sender<ViewModel>,
}

impl ReconciliationStore {
    pub fn new(config: StoreConfig) -> Self {
        let (view, _) = watch::channel(ViewModel::default());
        Self {
            history: History::new(config.history_capacity),
            config,
            current: None,
            error_state: None,
            phase: Phase::Uninitialized,
            no_data_signalled: false,
            view,
        }
    }

    pub fn current(&self) -> Option<&Sample> {
        self.current.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn error_state(&self) -> Option<ErrorKind> {
        self.error_state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// New receivers start at the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view.subscribe()
    }

    /// Uninitialized -> Loading
    pub fn begin(&mut self) {
        if self.phase == Phase::Uninitialized {
            self.phase = Phase::Loading;
            self.publish();
        }
    }

    /// Validate, normalize, replace `current`, append to history, notify.
    pub fn on_sample_received(&mut self, raw: RawSample) -> Result<(), IngestError> {
        let sample = match raw.into_sample(now_millis()) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "dropping sample");
                return Err(e);
            }
        };

        if self.config.show_sensor_data {
            info!(
                temperature = sample.temperature,
                location = %sample.location,
                band = %sample.band(),
                "sample accepted"
            );
        }

        self.current = Some(sample.clone());
        self.history.push(sample);
        self.phase = Phase::Live;
        self.error_state = None;
        self.publish();
        Ok(())
    }

    /// Seed an empty history without touching `current`. Returns how many
    /// samples were taken.
    pub fn on_backfill(&mut self, samples: Vec<RawSample>) -> usize {
        if !self.history.is_empty() {
            debug!(offered = samples.len(), "history already populated, backfill ignored");
            return 0;
        }
        let arrived = now_millis();
        let mut taken = 0;
        for raw in samples {
            match raw.into_sample(arrived) {
                Ok(sample) => {
                    self.history.push(sample);
                    taken += 1;
                }
                Err(e) => debug!(error = %e, "skipping backfill entry"),
            }
        }
        if taken > 0 {
            self.publish();
        }
        taken
    }

    /// Record a transient failure. `current` and `history` stay as they are.
    pub fn on_fault(&mut self, source: SourceKind, kind: ErrorKind) {
        if kind == ErrorKind::InvalidSample {
            debug!(%source, "invalid sample reported by adapter");
            return;
        }
        warn!(%source, error = %kind, "source fault");
        if self.error_state != Some(kind) {
            self.error_state = Some(kind);
            self.publish();
        }
    }

    /// Fires NoDataTimeout once if nothing has arrived yet.
    pub fn signal_no_data_timeout(&mut self) -> bool {
        if self.current.is_some() || self.no_data_signalled {
            return false;
        }
        self.no_data_signalled = true;
        warn!(
            waited_secs = self.config.no_data_timeout.as_secs_f64(),
            "no sensor data received yet"
        );
        self.error_state = Some(ErrorKind::NoDataTimeout);
        self.publish();
        true
    }

    pub fn apply(&mut self, event: IngestEvent) {
        match event {
            IngestEvent::Sample { source, raw } => {
                debug!(%source, "sample delivered");
                let _ = self.on_sample_received(raw);
            }
            IngestEvent::Backfill { source, samples } => {
                let taken = self.on_backfill(samples);
                if taken > 0 {
                    info!(%source, taken, "history seeded");
                }
            }
            IngestEvent::Fault { source, kind } => self.on_fault(source, kind),
            IngestEvent::Connected { source } => {
                info!(%source, "channel connected");
                if self.error_state == Some(ErrorKind::ChannelDisconnected) {
                    self.error_state = None;
                    self.publish();
                }
            }
        }
    }

    fn publish(&self) {
        self.view.send_replace(ViewModel {
            current: self.current.clone(),
            history: self.history.to_vec(),
            error_state: self.error_state,
            phase: self.phase,
        });
    }

    /// Apply events until cancelled, arming the one-shot no-data timer.
    /// Hands the final state back.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<IngestEvent>,
        cancel: CancellationToken,
    ) -> Self {
        self.begin();

        let deadline = tokio::time::sleep(self.config.no_data_timeout);
        tokio::pin!(deadline);
        let mut armed = self.current.is_none();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut deadline, if armed => {
                    armed = false;
                    self.signal_no_data_timeout();
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.apply(event);
                        if self.current.is_some() {
                            armed = false;
                        }
                    }
                    None => break,
                },
            }
        }

        debug!("store loop stopped");
        self
    }

    /// Run on its own task.
    pub fn spawn(self) -> StoreHandle {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let view = self.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(rx, cancel.clone()));
        StoreHandle { events: tx, view, cancel, task }
    }
}

/// Owner of a running store task.
pub struct StoreHandle {
    events: mpsc::Sender<IngestEvent>,
    view: watch::Receiver<ViewModel>,
    cancel: CancellationToken,
    task: JoinHandle<ReconciliationStore>,
}

impl StoreHandle {
    pub fn sink(&self, source: SourceKind) -> IngestSink {
        IngestSink { source, tx: self.events.clone() }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view.clone()
    }

    /// Stop the loop and return the final state.
    pub async fn shutdown(self) -> Option<ReconciliationStore> {
        self.cancel.cancel();
        self.task.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Band, RawTimestamp};

    fn raw(temp: f64, location: &str, ts: f64) -> RawSample {
        RawSample {
            temperature: Some(temp),
            location: Some(location.to_string()),
            timestamp: Some(RawTimestamp::Epoch(ts)),
            proof_reference: None,
        }
    }

    fn store(capacity: usize) -> ReconciliationStore {
        ReconciliationStore::new(StoreConfig {
            history_capacity: capacity,
            show_sensor_data: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_last_write_wins_regardless_of_timestamp() {
        let mut s = store(100);
        s.on_sample_received(raw(70.0, "A", 1_700_000_100.0)).unwrap();
        s.on_sample_received(raw(50.0, "B", 1_700_000_000.0)).unwrap();

        let current = s.current().unwrap();
        assert_eq!(current.location, "B");
        assert_eq!(current.timestamp_ms, 1_700_000_000_000);
        let order: Vec<&str> = s.history().iter().map(|x| x.location.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn test_duplicates_appended_twice() {
        let mut s = store(100);
        let sample = raw(72.0, "Warehouse-A", 1_700_000_000.0);
        s.on_sample_received(sample.clone()).unwrap();
        s.on_sample_received(sample).unwrap();
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn test_push_scenario_seconds_epoch_hot() {
        let mut s = store(100);
        s.on_sample_received(raw(85.0, "Warehouse-A", 1_700_000_000.0)).unwrap();
        let current = s.current().unwrap();
        assert_eq!(current.timestamp_ms, 1_700_000_000_000);
        assert_eq!(current.band(), Band::Hot);
    }

    #[test]
    fn test_capacity_eviction_101_into_100() {
        let mut s = store(100);
        for n in 0..101 {
            s.on_sample_received(raw(70.0, &format!("L{}", n), 1_700_000_000.0 + n as f64))
                .unwrap();
        }
        assert_eq!(s.history().len(), 100);
        assert!(s.history().iter().all(|x| x.location != "L0"));
        assert_eq!(s.history().last().unwrap().location, "L100");
    }

    #[test]
    fn test_invalid_sample_leaves_state_untouched() {
        let mut s = store(10);
        s.on_sample_received(raw(70.0, "A", 1.0)).unwrap();
        let err = s
            .on_sample_received(RawSample { location: Some("B".into()), ..Default::default() })
            .unwrap_err();
        assert_eq!(err, IngestError::MissingTemperature);
        assert_eq!(s.current().unwrap().location, "A");
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.error_state(), None);
    }

    #[test]
    fn test_fault_keeps_current_and_sample_clears_it() {
        let mut s = store(10);
        s.on_fault(SourceKind::Pull, ErrorKind::InvalidPayload);
        assert_eq!(s.error_state(), Some(ErrorKind::InvalidPayload));
        assert!(s.current().is_none());

        s.on_sample_received(raw(61.0, "A", 1.0)).unwrap();
        s.on_fault(SourceKind::Pull, ErrorKind::NetworkError);
        assert_eq!(s.error_state(), Some(ErrorKind::NetworkError));
        assert_eq!(s.current().unwrap().temperature, 61.0);
        assert_eq!(s.phase(), Phase::Live);

        s.on_sample_received(raw(62.0, "A", 2.0)).unwrap();
        assert_eq!(s.error_state(), None);
    }

    #[test]
    fn test_connected_clears_only_disconnect() {
        let mut s = store(10);
        s.apply(IngestEvent::Fault { source: SourceKind::Push, kind: ErrorKind::ChannelDisconnected });
        s.apply(IngestEvent::Connected { source: SourceKind::Push });
        assert_eq!(s.error_state(), None);

        s.apply(IngestEvent::Fault { source: SourceKind::Pull, kind: ErrorKind::NetworkError });
        s.apply(IngestEvent::Connected { source: SourceKind::Push });
        assert_eq!(s.error_state(), Some(ErrorKind::NetworkError));
    }

    #[test]
    fn test_backfill_only_into_empty_history() {
        let mut s = store(3);
        let taken = s.on_backfill(vec![
            raw(60.0, "A", 1.0),
            RawSample::default(),
            raw(61.0, "B", 2.0),
            raw(62.0, "C", 3.0),
            raw(63.0, "D", 4.0),
        ]);
        assert_eq!(taken, 4);
        assert_eq!(s.history().len(), 3);
        assert!(s.current().is_none());
        assert_eq!(s.on_backfill(vec![raw(1.0, "Z", 1.0)]), 0);
    }

    #[test]
    fn test_no_data_timeout_once_and_not_when_live() {
        let mut s = store(10);
        s.begin();
        assert_eq!(s.phase(), Phase::Loading);
        assert!(s.signal_no_data_timeout());
        assert!(!s.signal_no_data_timeout());
        assert_eq!(s.error_state(), Some(ErrorKind::NoDataTimeout));

        let mut live = store(10);
        live.on_sample_received(raw(70.0, "A", 1.0)).unwrap();
        assert!(!live.signal_no_data_timeout());
    }

    #[test]
    fn test_subscribers_see_each_update() {
        let mut s = store(10);
        let rx = s.subscribe();
        s.on_sample_received(raw(55.0, "A", 1.0)).unwrap();
        let view = rx.borrow();
        assert_eq!(view.current.as_ref().unwrap().band(), Band::Cold);
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.phase, Phase::Live);
    }

    #[test]
    fn test_view_recent() {
        let mut s = store(10);
        for n in 0..5 {
            s.on_sample_received(raw(70.0, &n.to_string(), 1.0)).unwrap();
        }
        let view = s.subscribe().borrow().clone();
        let recent: Vec<&str> = view.recent(2).iter().map(|x| x.location.as_str()).collect();
        assert_eq!(recent, vec!["3", "4"]);
        assert_eq!(view.recent(50).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_store_times_out_then_accepts_late_sample() {
        let handle = store(10).spawn();
        let rx = handle.subscribe();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rx.borrow().error_state, Some(ErrorKind::NoDataTimeout));
        assert_eq!(rx.borrow().phase, Phase::Loading);

        let sink = handle.sink(SourceKind::Push);
        assert!(sink.sample(raw(90.0, "Warehouse-E", 1_700_000_000.0)).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(rx.borrow().phase, Phase::Live);
        assert_eq!(rx.borrow().error_state, None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.borrow().error_state, None);

        let final_state = handle.shutdown().await.unwrap();
        assert_eq!(final_state.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_store_no_timeout_when_data_arrives() {
        let handle = store(10).spawn();
        let rx = handle.subscribe();
        handle.sink(SourceKind::Pull).sample(raw(65.0, "A", 1.0)).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rx.borrow().error_state, None);
        assert_eq!(rx.borrow().current.as_ref().unwrap().location, "A");

        let final_state = handle.shutdown().await.unwrap();
        assert!(!final_state.no_data_signalled);
    }
}

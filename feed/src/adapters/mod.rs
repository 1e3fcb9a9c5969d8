//! ==============================================================================
//! adapters - ingestion paths feeding the store
//! ==============================================================================
//!
//! every source implements `DataSource`: run until cancelled, hand raw
//! samples and fault signals to an `IngestSink`, never touch store state.
//!
//! - pull.rs:      periodic GET <base-url>/sensor-data
//! - push.rs:      long-lived websocket (socket.io or plain json)
//! - simulator.rs: offline sensor, same shape as the agent's readings
//!
//! `spawn` puts a source on its own task behind an `AdapterHandle`. the
//! handle is the only way to stop it; shutting down consumes the handle and
//! dropping it cancels too.
//!
//! ==============================================================================

pub mod pull;
pub mod push;
pub mod simulator;

use crate::store::{IngestSink, SourceKind};

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use pull::PullAdapter;
pub use push::PushAdapter;
pub use simulator::SimulatedSensor;

/// A producer of raw samples.
pub trait DataSource: Send + 'static {
    fn kind(&self) -> SourceKind;

    /// Deliver into `sink` until `cancel` fires or the store goes away.
    fn run(
        self,
        sink: IngestSink,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send;
}

/// Start `source` on its own task.
pub fn spawn<S: DataSource>(source: S, sink: IngestSink) -> AdapterHandle {
    let kind = source.kind();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(source.run(sink, cancel.clone()));
    info!(source = %kind, "adapter started");
    AdapterHandle { kind, cancel, task: Some(task) }
}

/// Scoped ownership of a running adapter.
pub struct AdapterHandle {
    kind: SourceKind,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AdapterHandle {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancel and wait for the task to exit. Once this returns the adapter
    /// has dropped its sink.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(source = %self.kind, "adapter stopped");
    }
}

impl Drop for AdapterHandle {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!(source = %self.kind, "adapter handle dropped, cancelling");
            self.cancel.cancel();
        }
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
pub(crate) async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

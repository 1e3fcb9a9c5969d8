//! Live sensor feed for the AutoChain IoT dashboard.
//!
//! Samples arrive from an HTTP poll, a websocket push channel, or the offline
//! simulator. One [`store::ReconciliationStore`] merges them into the current
//! reading plus a bounded history, and [`server`] exposes that view model to
//! the browser.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod history;
pub mod retry;
pub mod server;
pub mod store;

pub use domain::{classify, normalize, Band, ErrorKind, RawSample, Sample};
pub use history::History;
pub use store::{ReconciliationStore, StoreConfig, ViewModel};

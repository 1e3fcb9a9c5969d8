//! Offline stand-in for the IoT agent's simulated sensor.
//!
//! Readings follow a daily sine cycle (1440 ticks) around a base temperature
//! plus bounded noise, rounded to whole degrees. Locations rotate through
//! Warehouse-A..E and timestamps are seconds-epoch, like the agent's.

use super::{pause, DataSource};
use crate::domain::{now_millis, RawSample, RawTimestamp};
use crate::store::{IngestSink, SourceKind};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const TICKS_PER_DAY: f64 = 1440.0;
const LOCATIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub interval: Duration,
    pub base_temperature: f64,
    pub amplitude: f64,
    /// noise is uniform in [-noise, noise]
    pub noise: f64,
    pub seed: Option<u64>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            base_temperature: 70.0,
            amplitude: 10.0,
            noise: 2.0,
            seed: None,
        }
    }
}

pub struct SimulatedSensor {
    settings: SimulatorSettings,
    rng: StdRng,
    tick: u64,
}

impl SimulatedSensor {
    pub fn new(settings: SimulatorSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { settings, rng, tick: 0 }
    }

    /// Next reading, stamped with `now_secs`.
    pub fn read(&mut self, now_secs: u64) -> RawSample {
        let location = format!("Warehouse-{}", (b'A' + (self.tick % LOCATIONS as u64) as u8) as char);
        self.tick += 1;

        let cycle = self.settings.amplitude * (2.0 * PI * self.tick as f64 / TICKS_PER_DAY).sin();
        let noise = if self.settings.noise > 0.0 {
            self.rng.gen_range(-self.settings.noise..=self.settings.noise)
        } else {
            0.0
        };

        RawSample {
            temperature: Some((self.settings.base_temperature + cycle + noise).trunc()),
            location: Some(location),
            timestamp: Some(RawTimestamp::Epoch(now_secs as f64)),
            proof_reference: None,
        }
    }
}

impl DataSource for SimulatedSensor {
    fn kind(&self) -> SourceKind {
        SourceKind::Simulator
    }

    fn run(mut self, sink: IngestSink, cancel: CancellationToken) -> impl Future<Output = ()> + Send {
        async move {
            loop {
                let raw = self.read(now_millis() / 1000);
                if !sink.sample(raw).await {
                    break;
                }
                if !pause(self.settings.interval, &cancel).await {
                    break;
                }
            }
            debug!(ticks = self.tick, "simulator stopped");
        }
    }
}

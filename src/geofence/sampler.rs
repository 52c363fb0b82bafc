use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{haversine_distance_m, validate};
use crate::model::geofence::{GeofenceConfig, GeofenceResult, LocationSample};

/// Source of device fixes (GPS or network provider).
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Latest fix, or `None` when no provider currently has one.
    async fn current_location(&self) -> Option<LocationSample>;
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerPolicy {
    pub interval: Duration,
    /// Movement required before a new fix is published
    pub min_distance_m: f64,
}

impl Default for SamplerPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            min_distance_m: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceStatus {
    pub sample: LocationSample,
    pub result: GeofenceResult,
}

/// Background producer that polls a [`LocationProvider`] and publishes the
/// geofence status of the last accepted fix on a watch channel.
pub struct LocationSampler {
    provider: Arc<dyn LocationProvider>,
    policy: SamplerPolicy,
    config_tx: watch::Sender<GeofenceConfig>,
    status_tx: watch::Sender<Option<GeofenceStatus>>,
    task: Option<JoinHandle<()>>,
}

impl LocationSampler {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        policy: SamplerPolicy,
        config: GeofenceConfig,
    ) -> Self {
        let (config_tx, _) = watch::channel(config);
        let (status_tx, _) = watch::channel(None);
        Self {
            provider,
            policy,
            config_tx,
            status_tx,
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<GeofenceStatus>> {
        self.status_tx.subscribe()
    }

    pub fn last_known(&self) -> Option<GeofenceStatus> {
        *self.status_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Swaps the geofence and re-validates the cached fix against it.
    pub fn set_config(&self, config: GeofenceConfig) {
        self.config_tx.send_replace(config);
        self.status_tx.send_if_modified(|status| match status {
            Some(current) => {
                current.result = validate(&current.sample, &config);
                true
            }
            None => false,
        });
    }

    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let provider = Arc::clone(&self.provider);
        let policy = self.policy;
        let config_rx = self.config_tx.subscribe();
        let status_tx = self.status_tx.clone();

        info!(
            interval_ms = policy.interval.as_millis() as u64,
            min_distance_m = policy.min_distance_m,
            "Location sampler started"
        );
        self.task = Some(tokio::spawn(run_sampler(
            provider, policy, config_rx, status_tx,
        )));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Location sampler stopped");
        }
    }
}

impl Drop for LocationSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_sampler(
    provider: Arc<dyn LocationProvider>,
    policy: SamplerPolicy,
    config_rx: watch::Receiver<GeofenceConfig>,
    status_tx: watch::Sender<Option<GeofenceStatus>>,
) {
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(sample) = provider.current_location().await else {
            continue;
        };

        let moved_enough = match *status_tx.borrow() {
            Some(last) => {
                haversine_distance_m(
                    last.sample.latitude,
                    last.sample.longitude,
                    sample.latitude,
                    sample.longitude,
                ) >= policy.min_distance_m
            }
            None => true,
        };
        if !moved_enough {
            continue;
        }

        let config = *config_rx.borrow();
        let result = validate(&sample, &config);
        debug!(
            distance_m = result.distance_meters,
            is_valid = result.is_valid,
            "Location sample accepted"
        );
        status_tx.send_replace(Some(GeofenceStatus { sample, result }));
    }
}

// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Timed sampling run pairing a ground-truth distance with live readings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::Config;
use crate::dataset_store::{DatasetStore, Sample};
use crate::device_registry::{Device, DeviceRegistry};
use crate::error::RangingError;

/// Read access to whoever owns the live registry.
#[async_trait]
pub trait RegistryView: Send + Sync {
    /// Copy of the registered devices in id order.
    async fn snapshot(&self) -> Result<Vec<Device>, RangingError>;

    /// Current reference readings for `ids`, in the same order.
    async fn reference_readings(&self, ids: &[String]) -> Result<Vec<Option<i32>>, RangingError>;
}

#[async_trait]
impl RegistryView for Mutex<DeviceRegistry> {
    async fn snapshot(&self) -> Result<Vec<Device>, RangingError> {
        Ok(self.lock().await.snapshot())
    }

    async fn reference_readings(&self, ids: &[String]) -> Result<Vec<Option<i32>>, RangingError> {
        Ok(self.lock().await.reference_readings(ids))
    }
}

/// Parameters of one session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionParams {
    /// Distance in cm entered by the operator.
    pub ground_truth_distance: f64,
    /// Number of ticks.
    pub sample_count: u32,
    /// Wait before each tick.
    pub interval: Duration,
}

impl SessionParams {
    /// Session parameters from the `measurements` block.
    pub fn from_config(config: &Config, ground_truth_distance: f64) -> Self {
        SessionParams {
            ground_truth_distance,
            sample_count: config.measurements.quantity,
            interval: config.scan_interval(),
        }
    }
}

/// Outcome of a completed session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    /// Sampled device ids; position is the dataset index.
    pub device_ids: Vec<String>,
    /// Samples captured per device, in the same order.
    pub samples: Vec<Vec<Sample>>,
}

/// Ensures a single active session and carries abort requests.
#[derive(Default, Debug)]
pub struct SessionControl {
    active: AtomicBool,
    abort_requested: AtomicBool,
}

/// Marks a session active until dropped.
pub struct SessionGuard<'a> {
    control: &'a SessionControl,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.control.active.store(false, Ordering::SeqCst);
    }
}

impl SessionControl {
    /// Creates an idle control.
    pub fn new() -> Self {
        SessionControl::default()
    }

    /// Claims the session slot, failing if another session holds it.
    pub fn begin(&self) -> Result<SessionGuard<'_>, RangingError> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| RangingError::SessionActive)?;
        self.abort_requested.store(false, Ordering::SeqCst);
        Ok(SessionGuard { control: self })
    }

    /// True while a session runs.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Asks the running session to stop at its next tick.
    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }
}

/// Samples the reference reading of every snapshot device once per tick and
/// merges the buffers into the store when all ticks are done.
pub struct MeasurementSession<'a, V: RegistryView + ?Sized> {
    view: &'a V,
    store: &'a DatasetStore,
    control: &'a SessionControl,
}

impl<'a, V: RegistryView + ?Sized> MeasurementSession<'a, V> {
    /// Creates a session runner.
    pub fn new(view: &'a V, store: &'a DatasetStore, control: &'a SessionControl) -> Self {
        MeasurementSession {
            view,
            store,
            control,
        }
    }

    /// Runs one session. The device set is fixed by the snapshot taken at
    /// start; an aborted session persists nothing.
    ///
    /// Every device's buffer is written even when an earlier write fails. The
    /// first failure is returned once all devices have been tried, so devices
    /// written before or after it keep their new samples.
    pub async fn run(&self, params: SessionParams) -> Result<SessionReport, RangingError> {
        let _guard = self.control.begin()?;
        let snapshot = self.view.snapshot().await?;
        let device_ids: Vec<String> = snapshot.iter().map(|device| device.id().to_string()).collect();
        // A device whose reference reading vanishes keeps its last one.
        let mut last_known: Vec<Option<i32>> =
            snapshot.iter().map(Device::reference_rssi).collect();
        let mut samples: Vec<Vec<Sample>> = vec![Vec::new(); snapshot.len()];
        info!(
            "Measuring {} devices at {} cm, {} ticks.",
            device_ids.len(),
            params.ground_truth_distance,
            params.sample_count
        );

        for tick in 0..params.sample_count {
            sleep(params.interval).await;
            if self.control.abort_requested() {
                info!("Measurement aborted after {} ticks, nothing persisted.", tick);
                return Err(RangingError::SessionAborted);
            }
            let readings = self.view.reference_readings(&device_ids).await?;
            for ((reading, last), buffer) in readings
                .into_iter()
                .zip(last_known.iter_mut())
                .zip(samples.iter_mut())
            {
                if reading.is_some() {
                    *last = reading;
                }
                if let Some(rssi) = *last {
                    buffer.push(Sample::new(params.ground_truth_distance, f64::from(rssi)));
                }
            }
            debug!("Taking measurements {}/{}.", tick + 1, params.sample_count);
        }

        let mut first_failure = None;
        for (index, (id, buffer)) in device_ids.iter().zip(samples.iter()).enumerate() {
            if buffer.is_empty() {
                warn!("Device {} never reported a reference reading, skipping.", id);
                continue;
            }
            if let Err(err) = self.persist(index, buffer.clone()).await {
                error!("Saving the samples of device {} failed: {}", id, err);
                first_failure.get_or_insert(err);
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }
        info!("Measurements are completed.");
        Ok(SessionReport {
            device_ids,
            samples,
        })
    }

    async fn persist(&self, index: usize, buffer: Vec<Sample>) -> Result<(), RangingError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.merge(index, &buffer))
            .await
            .map_err(|err| RangingError::Internal(err.to_string()))?
    }
}

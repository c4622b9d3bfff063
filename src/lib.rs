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

#![warn(missing_docs)]
#![deny(
    clippy::indexing_slicing,
    clippy::unwrap_used,
    clippy::panic,
    clippy::expect_used
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing))]

//! Collects RSSI reports from push-connected devices, records calibration
//! sessions against known distances and converts the recorded samples into
//! distance estimates.

mod interference_table;
mod outlier_filter;
mod signal_converter;

/// Per-distance grouping and reductions.
pub mod aggregation;
/// Runtime configuration.
pub mod config;
/// Signal correction pipeline.
pub mod correction_pipeline;
/// Persisted per-device samples.
pub mod dataset_store;
/// Registry of reporting devices.
pub mod device_registry;
/// Library error type.
pub mod error;
/// Registry-owning event loop and push server.
pub mod gateway_engine;
/// Timed calibration sessions.
pub mod measurement_session;
/// Operator console.
pub mod operator_prompt;
/// Push-protocol messages.
pub mod protocol;
/// Offline dataset processing for the renderer.
pub mod render_export;


#[cfg(test)]
mod signal_converter_test;

pub use interference_table::{interference_factor, MAX_TABLE_DISTANCE_CM};
pub use outlier_filter::{drop_sentinel, reject_outliers, NO_READING_SENTINEL};
pub use signal_converter::{friis_transmission, log_distance_path_loss, LOG_DISTANCE_OFFSET_DB};

use log::info;
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::dataset_store::DatasetStore;
use crate::error::RangingError;
use crate::gateway_engine::{run_liveness_timer, serve, GatewayEngine};

/// Runs the gateway, the liveness sweep and the operator console until one of
/// them fails. The console closing alone does not stop the gateway.
pub fn run_gateway(config: Config) -> Result<(), RangingError> {
    Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
            info!("The gateway for scanning devices is running on port {}.", config.port);

            let (mut engine, handle) = GatewayEngine::new();
            let store = DatasetStore::new(config.data_dir.clone());
            let liveness_period = config.liveness_interval();

            let mut task_set = JoinSet::new();
            task_set.spawn(async move {
                engine.run().await;
                Ok::<(), RangingError>(())
            });
            task_set.spawn(serve(listener, handle.clone()));
            task_set.spawn(run_liveness_timer(handle.clone(), liveness_period));
            task_set.spawn(operator_prompt::run(config, handle, store));

            while let Some(finished) = task_set.join_next().await {
                finished.map_err(|err| RangingError::Internal(err.to_string()))??;
            }
            Ok(())
        })
}

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

//! Immutable runtime configuration loaded once from `config.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::correction_pipeline::{Aggregation, Algorithm, CorrectionConfig, OutlierRejection};
use crate::error::RangingError;

const DEFAULT_QUANTITY: u32 = 10;
const DEFAULT_TIME_PER_SCAN_MILLIS: u64 = 500;
const DEFAULT_PORT: u16 = 3030;
const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.25;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_LIVENESS_CHECK_MILLIS: u64 = 2000;
// A baseline needs at least one successive difference.
const MIN_DELTA_CORRECTION_QUANTITY: usize = 2;

/// Top-level configuration. Built once at startup and passed by reference.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Sampling parameters of a measurement session.
    #[serde(default)]
    pub measurements: MeasurementConfig,
    /// Listen port of the push gateway.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Display bounds, only forwarded to the renderer.
    #[serde(default)]
    pub coordinates: Coordinates,
    /// Path-loss exponent used by the log-distance model.
    #[serde(default = "default_path_loss_exponent")]
    pub pl_exp: f64,
    /// Drop samples holding the 127 "no reading" sentinel before processing.
    #[serde(default)]
    pub correct127s: bool,
    /// Datasets processed offline.
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    /// Directory holding the per-device sample files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Period of the gateway's stale-device sweep.
    #[serde(default = "default_liveness_check_millis")]
    pub liveness_check_millis: u64,
}

/// `measurements` block.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MeasurementConfig {
    /// Number of ticks per session.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Milliseconds between two ticks.
    #[serde(default = "default_time_per_scan")]
    pub time_per_scan: u64,
}

/// `coordinates` block: chart bounds in cm and signal units.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Coordinates {
    /// Left edge of the distance axis.
    pub left_x: f64,
    /// Right edge of the distance axis.
    pub right_x: f64,
    /// Lower edge of the signal axis.
    pub lower_y: f64,
    /// Upper edge of the signal axis.
    pub upper_y: f64,
}

/// One entry of `datasets[]`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    /// File name relative to the data directory.
    pub file_name: String,
    /// Conversion applied to every reading.
    #[serde(default)]
    pub algorithm: Algorithm,
    /// How readings sharing a distance are reduced.
    #[serde(rename = "type", default)]
    pub aggregation: Aggregation,
    /// Colour forwarded to the renderer.
    #[serde(default)]
    pub color: String,
    /// Optional outlier rejection.
    #[serde(default)]
    pub deltacorrection: Option<DeltaCorrection>,
}

/// `deltacorrection` block of a dataset.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct DeltaCorrection {
    /// Number of preceding samples forming the volatility baseline.
    pub quantity: usize,
    /// Maximum accepted ratio of the current jump to the baseline.
    pub threshold: f64,
}

fn default_quantity() -> u32 {
    DEFAULT_QUANTITY
}

fn default_time_per_scan() -> u64 {
    DEFAULT_TIME_PER_SCAN_MILLIS
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path_loss_exponent() -> f64 {
    DEFAULT_PATH_LOSS_EXPONENT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_liveness_check_millis() -> u64 {
    DEFAULT_LIVENESS_CHECK_MILLIS
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        MeasurementConfig {
            quantity: DEFAULT_QUANTITY,
            time_per_scan: DEFAULT_TIME_PER_SCAN_MILLIS,
        }
    }
}

impl Default for Coordinates {
    fn default() -> Self {
        Coordinates {
            left_x: 0.0,
            right_x: 500.0,
            lower_y: 0.0,
            upper_y: -100.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            measurements: MeasurementConfig::default(),
            port: DEFAULT_PORT,
            coordinates: Coordinates::default(),
            pl_exp: DEFAULT_PATH_LOSS_EXPONENT,
            correct127s: false,
            datasets: Vec::new(),
            data_dir: default_data_dir(),
            liveness_check_millis: DEFAULT_LIVENESS_CHECK_MILLIS,
        }
    }
}

impl Config {
    /// Loads the configuration from `path`. A missing or empty file yields the
    /// defaults; content that is present but unparseable is an error.
    pub fn load(path: &Path) -> Result<Config, RangingError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        if contents.trim().is_empty() {
            info!("No config present at {}, using defaults.", path.display());
            return Ok(Config::default());
        }
        Config::parse(&contents)
    }

    /// Parses configuration JSON.
    pub fn parse(contents: &str) -> Result<Config, RangingError> {
        serde_json::from_str(contents)
            .map_err(|err| RangingError::ContractViolation(err.to_string()))
    }

    /// Interval between two session ticks.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.measurements.time_per_scan)
    }

    /// Period of the stale-device sweep.
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_millis)
    }

    /// Builds the processing directives of one dataset. A `deltacorrection`
    /// whose quantity is below 2 can never form a baseline and is ignored.
    pub fn correction_for(&self, dataset: &DatasetConfig) -> CorrectionConfig {
        let outlier_rejection = match dataset.deltacorrection {
            Some(delta) if delta.quantity < MIN_DELTA_CORRECTION_QUANTITY => {
                warn!(
                    "deltacorrection of {} needs a quantity of at least {}, got {}; outlier rejection is off.",
                    dataset.file_name, MIN_DELTA_CORRECTION_QUANTITY, delta.quantity
                );
                None
            }
            Some(delta) => Some(OutlierRejection {
                window_size: delta.quantity,
                ratio_threshold: delta.threshold,
            }),
            None => None,
        };
        CorrectionConfig {
            algorithm: dataset.algorithm,
            aggregation: dataset.aggregation,
            path_loss_exponent: self.pl_exp,
            outlier_rejection,
            drop_sentinel: self.correct127s,
        }
    }
}

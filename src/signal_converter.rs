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

use std::f64::consts::{LN_10, PI};

// Transmit power and antenna gains are unknown for the reporting phones.
const TX_POWER_DBM: f64 = 0.0;
const RX_ANTENNA_GAIN_DB: f64 = 0.0;
const TX_ANTENNA_GAIN_DB: f64 = 0.0;

const MEASURED_POWER_AT_1_METER_DBM: f64 = -60.0;

/// Added to a reading before the log-distance model, so a reading equal to
/// the measured power at 1 m converts to 1.0.
pub const LOG_DISTANCE_OFFSET_DB: f64 = -MEASURED_POWER_AT_1_METER_DBM;

/// Free-space (Friis) conversion of a dBm reading to a linear ratio.
pub fn friis_transmission(rssi: f64) -> f64 {
    let received = -TX_POWER_DBM - TX_ANTENNA_GAIN_DB - RX_ANTENNA_GAIN_DB + rssi;
    1.0 / (32.0 * (received * LN_10 / 20.0).exp() * PI)
}

/// Log-distance path-loss conversion with exponent `path_loss_exponent`.
///
/// Typical exponents: free space 2, in-building line of sight 1.6 to 1.8,
/// obstructed factories 2 to 3, urban cellular 2.7 to 3.5.
pub fn log_distance_path_loss(rssi: f64, path_loss_exponent: f64) -> f64 {
    (-((rssi + LOG_DISTANCE_OFFSET_DB) * LN_10) / (10.0 * path_loss_exponent)).exp()
}

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

use crate::signal_converter::*;

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-12 * expected.abs().max(1.0),
        "{} != {}",
        actual,
        expected
    );
}

#[test]
fn test_log_distance_at_reference_power() {
    assert_close(log_distance_path_loss(-60.0, 2.25), 1.0);
}

#[test]
fn test_log_distance_ten_times_further() {
    // 10 dB more loss with n = 1 is one decade of distance.
    assert_close(log_distance_path_loss(-70.0, 1.0), 10.0);
    assert_close(log_distance_path_loss(-80.0, 2.0), 10.0);
}

#[test]
fn test_log_distance_matches_closed_form() {
    let expected = (-((-60.0 + LOG_DISTANCE_OFFSET_DB) * LN_10) / 22.5).exp();
    assert_eq!(log_distance_path_loss(-60.0, 2.25), expected);
}

#[test]
fn test_log_distance_is_deterministic() {
    let first = log_distance_path_loss(-73.0, 2.25);
    let second = log_distance_path_loss(-73.0, 2.25);
    assert_eq!(first.to_bits(), second.to_bits());
}

#[test]
fn test_friis_at_zero_dbm() {
    assert_close(friis_transmission(0.0), 1.0 / (32.0 * PI));
}

#[test]
fn test_friis_twenty_db_weaker() {
    assert_close(friis_transmission(-20.0), 10.0 / (32.0 * PI));
}

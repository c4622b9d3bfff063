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

//! Multi-path compensation factors for integer distances 0..=400 cm.
//!
//! Each factor is the amplitude ratio between a two-ray (direct plus floor
//! reflection) channel and the direct path alone, sampled at 1 cm spacing.

use std::f64::consts::PI;

use lazy_static::lazy_static;

use crate::error::RangingError;

/// Largest distance covered by the table.
pub const MAX_TABLE_DISTANCE_CM: usize = 400;

const CARRIER_WAVELENGTH_M: f64 = 0.125;
const TX_HEIGHT_M: f64 = 0.8;
const RX_HEIGHT_M: f64 = 1.2;
const FLOOR_REFLECTION_COEFFICIENT: f64 = -0.3;

fn two_ray_factor(distance_cm: usize) -> f64 {
    let horizontal = distance_cm as f64 / 100.0;
    let direct = horizontal.hypot(RX_HEIGHT_M - TX_HEIGHT_M);
    let reflected = horizontal.hypot(RX_HEIGHT_M + TX_HEIGHT_M);
    let phase = 2.0 * PI * (reflected - direct) / CARRIER_WAVELENGTH_M;
    let amplitude = FLOOR_REFLECTION_COEFFICIENT * direct / reflected;
    (1.0 + amplitude * amplitude + 2.0 * amplitude * phase.cos()).sqrt()
}

lazy_static! {
    static ref INTERFERENCE_TABLE: Vec<f64> =
        (0..=MAX_TABLE_DISTANCE_CM).map(two_ray_factor).collect();
}

/// Correction factor for distance `x`, rounded to the nearest centimetre.
pub fn interference_factor(x: f64) -> Result<f64, RangingError> {
    if !x.is_finite() || x < -0.5 || x.round() > MAX_TABLE_DISTANCE_CM as f64 {
        return Err(RangingError::InterferenceOutOfRange(x));
    }
    INTERFERENCE_TABLE
        .get(x.round() as usize)
        .copied()
        .ok_or(RangingError::InterferenceOutOfRange(x))
}

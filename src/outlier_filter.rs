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

use itertools::Itertools;
use log::debug;

use crate::dataset_store::Sample;

/// Value reported when the receiver saw no signal during a tick.
pub const NO_READING_SENTINEL: f64 = 127.0;

/// Removes every sample holding the "no reading" sentinel, keeping order.
pub fn drop_sentinel(samples: &[Sample]) -> Vec<Sample> {
    samples
        .iter()
        .filter(|sample| sample.y != NO_READING_SENTINEL)
        .copied()
        .collect()
}

// Mean absolute successive difference, 0.0 when fewer than two samples.
fn volatility_baseline(window: &[Sample]) -> f64 {
    let (sum, count) = window
        .iter()
        .tuple_windows()
        .fold((0.0, 0usize), |(sum, count), (a, b)| {
            (sum + (b.y - a.y).abs(), count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Rejects samples whose jump from the previous sample is large compared to
/// the recent volatility.
///
/// Samples are visited in storage order. For each sample after the first, the
/// baseline is the mean absolute successive difference over the preceding
/// `window_size` input samples; the sample is kept when
/// `|y - y_prev| / baseline < ratio_threshold`. A zero baseline (flat or too
/// short history) keeps the sample unconditionally, so a `window_size` below 2
/// keeps everything.
pub fn reject_outliers(samples: &[Sample], window_size: usize, ratio_threshold: f64) -> Vec<Sample> {
    let mut accepted = Vec::with_capacity(samples.len());
    let Some(first) = samples.first() else {
        return accepted;
    };
    accepted.push(*first);
    for (index, (previous, current)) in samples.iter().tuple_windows().enumerate() {
        let end = index + 1;
        let start = end.saturating_sub(window_size);
        let baseline = samples
            .get(start..end)
            .map(volatility_baseline)
            .unwrap_or(0.0);
        if baseline == 0.0 {
            debug!("Zero volatility baseline at sample {}, accepting.", end);
            accepted.push(*current);
            continue;
        }
        if (current.y - previous.y).abs() / baseline < ratio_threshold {
            accepted.push(*current);
        } else {
            debug!("Rejected outlier ({}, {}).", current.x, current.y);
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(ys: &[f64]) -> Vec<Sample> {
        ys.iter().map(|y| Sample::new(100.0, *y)).collect()
    }

    fn ys(samples: &[Sample]) -> Vec<f64> {
        samples.iter().map(|sample| sample.y).collect()
    }

    #[test]
    fn test_drop_sentinel_keeps_order() {
        let input = vec![
            Sample::new(10.0, -50.0),
            Sample::new(10.0, 127.0),
            Sample::new(20.0, -60.0),
            Sample::new(30.0, 127.0),
            Sample::new(5.0, -40.0),
        ];
        assert_eq!(
            drop_sentinel(&input),
            vec![
                Sample::new(10.0, -50.0),
                Sample::new(20.0, -60.0),
                Sample::new(5.0, -40.0)
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(reject_outliers(&[], 3, 2.0).is_empty());
    }

    #[test]
    fn test_first_sample_always_kept() {
        assert_eq!(ys(&reject_outliers(&samples(&[-50.0]), 3, 0.0)), vec![-50.0]);
    }

    #[test]
    fn test_spike_is_rejected() {
        // Baseline over [-50, -52, -50, -52] is 2; the jump to -90 is 38.
        let input = samples(&[-50.0, -52.0, -50.0, -52.0, -90.0]);
        assert_eq!(
            ys(&reject_outliers(&input, 4, 3.0)),
            vec![-50.0, -52.0, -50.0, -52.0]
        );
    }

    #[test]
    fn test_steady_jitter_is_kept() {
        let input = samples(&[-50.0, -52.0, -50.0, -53.0, -51.0]);
        assert_eq!(ys(&reject_outliers(&input, 4, 3.0)), ys(&input));
    }

    #[test]
    fn test_zero_baseline_accepts() {
        // Flat history gives a zero baseline, the jump is accepted.
        let input = samples(&[-60.0, -60.0, -60.0, -80.0]);
        assert_eq!(ys(&reject_outliers(&input, 3, 1.5)), ys(&input));
    }

    #[test]
    fn test_window_only_looks_back_window_size_samples() {
        // Early volatility falls outside a window of 2.
        let input = samples(&[-40.0, -80.0, -60.0, -61.0, -62.0, -75.0]);
        let kept = ys(&reject_outliers(&input, 2, 5.0));
        assert_eq!(kept.last(), Some(&-62.0));
    }
}

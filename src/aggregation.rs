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

//! Reductions over samples grouped by exact distance.

use crate::dataset_store::Sample;
use crate::error::RangingError;

/// All readings captured at one distance, in input order.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceGroup {
    /// Shared distance.
    pub x: f64,
    /// Readings at that distance.
    pub ys: Vec<f64>,
}

/// Groups samples by exact `x`. Groups appear in order of first occurrence.
pub fn group_by_distance(samples: &[Sample]) -> Vec<DistanceGroup> {
    let mut groups: Vec<DistanceGroup> = Vec::new();
    for sample in samples {
        match groups.iter_mut().find(|group| group.x == sample.x) {
            Some(group) => group.ys.push(sample.y),
            None => groups.push(DistanceGroup {
                x: sample.x,
                ys: vec![sample.y],
            }),
        }
    }
    groups
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Result<f64, RangingError> {
    if values.is_empty() {
        return Err(RangingError::EmptyGroup);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median; the mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Result<f64, RangingError> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = sorted.len() / 2;
    match (sorted.len() % 2, sorted.get(middle)) {
        (_, None) => Err(RangingError::EmptyGroup),
        (1, Some(value)) => Ok(*value),
        (_, Some(upper)) => {
            let lower = middle
                .checked_sub(1)
                .and_then(|index| sorted.get(index))
                .ok_or(RangingError::EmptyGroup)?;
            Ok((lower + upper) / 2.0)
        }
    }
}

fn reduce_groups(
    samples: &[Sample],
    reducer: fn(&[f64]) -> Result<f64, RangingError>,
) -> Result<Vec<Sample>, RangingError> {
    group_by_distance(samples)
        .into_iter()
        .map(|group| Ok(Sample::new(group.x, reducer(&group.ys)?)))
        .collect()
}

/// One averaged sample per distinct distance.
pub fn average_points(samples: &[Sample]) -> Result<Vec<Sample>, RangingError> {
    reduce_groups(samples, mean)
}

/// One median sample per distinct distance.
pub fn median_points(samples: &[Sample]) -> Result<Vec<Sample>, RangingError> {
    reduce_groups(samples, median)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_two_readings() {
        let input = [Sample::new(10.0, -50.0), Sample::new(10.0, -70.0)];
        assert_eq!(average_points(&input).unwrap(), vec![Sample::new(10.0, -60.0)]);
    }

    #[test]
    fn test_median_three_readings() {
        let input = [
            Sample::new(10.0, -50.0),
            Sample::new(10.0, -70.0),
            Sample::new(10.0, -60.0),
        ];
        assert_eq!(median_points(&input).unwrap(), vec![Sample::new(10.0, -60.0)]);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median(&[-40.0, -70.0, -50.0, -60.0]), Ok(-55.0));
    }

    #[test]
    fn test_single_element_groups_unchanged() {
        let input = [Sample::new(10.0, -53.5)];
        assert_eq!(average_points(&input).unwrap(), input.to_vec());
        assert_eq!(median_points(&input).unwrap(), input.to_vec());
    }

    #[test]
    fn test_empty_group_is_error() {
        assert_eq!(median(&[]), Err(RangingError::EmptyGroup));
        assert_eq!(mean(&[]), Err(RangingError::EmptyGroup));
    }

    #[test]
    fn test_groups_keep_first_occurrence_order() {
        let input = [
            Sample::new(30.0, -1.0),
            Sample::new(10.0, -2.0),
            Sample::new(30.0, -3.0),
        ];
        assert_eq!(
            group_by_distance(&input),
            vec![
                DistanceGroup {
                    x: 30.0,
                    ys: vec![-1.0, -3.0]
                },
                DistanceGroup {
                    x: 10.0,
                    ys: vec![-2.0]
                },
            ]
        );
    }
}

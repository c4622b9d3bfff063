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

//! Composes sentinel drop, outlier rejection, conversion and aggregation.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::aggregation::{average_points, group_by_distance, median_points, DistanceGroup};
use crate::dataset_store::{sort_by_distance, Sample};
use crate::error::RangingError;
use crate::interference_table::interference_factor;
use crate::outlier_filter::{drop_sentinel, reject_outliers};
use crate::signal_converter::{friis_transmission, log_distance_path_loss};

/// Conversion applied to every reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Algorithm {
    /// Readings pass through unchanged.
    #[default]
    None,
    /// Free-space transmission equation.
    Friis,
    /// Log-distance path-loss model.
    LogDistancePathLoss,
    /// Multi-path compensation, per-distance average, then log-distance.
    InterferenceCorrected,
}

impl From<String> for Algorithm {
    fn from(name: String) -> Self {
        match name.as_str() {
            "none" => Algorithm::None,
            "friis" => Algorithm::Friis,
            "logdpl" => Algorithm::LogDistancePathLoss,
            "interference" => Algorithm::InterferenceCorrected,
            _ => {
                warn!("The algorithm {:?} is unknown, none is used instead.", name);
                Algorithm::None
            }
        }
    }
}

impl From<Algorithm> for String {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::None => "none",
            Algorithm::Friis => "friis",
            Algorithm::LogDistancePathLoss => "logdpl",
            Algorithm::InterferenceCorrected => "interference",
        }
        .to_string()
    }
}

/// Reduction of readings that share a distance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Aggregation {
    /// No grouping.
    #[default]
    Raw,
    /// Mean per distance.
    Average,
    /// Mean per distance, connected as a line.
    AverageLine,
    /// Median per distance.
    Median,
    /// Median per distance, connected as a line.
    MedianLine,
    /// Unreduced readings per distance for box plots.
    GroupedForBoxplot,
}

impl From<String> for Aggregation {
    fn from(name: String) -> Self {
        match name.as_str() {
            "rawdata" => Aggregation::Raw,
            "average" => Aggregation::Average,
            "line" => Aggregation::AverageLine,
            "median" => Aggregation::Median,
            "medianline" => Aggregation::MedianLine,
            "boxplot" => Aggregation::GroupedForBoxplot,
            _ => {
                warn!("The type {:?} is unknown, rawdata is used instead.", name);
                Aggregation::Raw
            }
        }
    }
}

impl From<Aggregation> for String {
    fn from(aggregation: Aggregation) -> Self {
        match aggregation {
            Aggregation::Raw => "rawdata",
            Aggregation::Average => "average",
            Aggregation::AverageLine => "line",
            Aggregation::Median => "median",
            Aggregation::MedianLine => "medianline",
            Aggregation::GroupedForBoxplot => "boxplot",
        }
        .to_string()
    }
}

impl Aggregation {
    /// True when the result is drawn as a connected line.
    pub fn connects_line(self) -> bool {
        matches!(self, Aggregation::AverageLine | Aggregation::MedianLine)
    }
}

/// Outlier rejection parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutlierRejection {
    /// Preceding samples forming the volatility baseline.
    pub window_size: usize,
    /// Largest accepted jump-to-baseline ratio, exclusive.
    pub ratio_threshold: f64,
}

/// Processing directives of one dataset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectionConfig {
    /// Conversion step.
    pub algorithm: Algorithm,
    /// Aggregation step.
    pub aggregation: Aggregation,
    /// Exponent of the log-distance model.
    pub path_loss_exponent: f64,
    /// Optional outlier rejection step.
    pub outlier_rejection: Option<OutlierRejection>,
    /// Drop "no reading" sentinels first.
    pub drop_sentinel: bool,
}

/// Pipeline output.
#[derive(Clone, Debug, PartialEq)]
pub enum CorrectedSeries {
    /// One point per sample or per distance.
    Points(Vec<Sample>),
    /// Unreduced readings per distance.
    Groups(Vec<DistanceGroup>),
}

fn convert(
    samples: &[Sample],
    algorithm: Algorithm,
    path_loss_exponent: f64,
) -> Result<Vec<Sample>, RangingError> {
    match algorithm {
        Algorithm::None => Ok(samples.to_vec()),
        Algorithm::Friis => Ok(samples
            .iter()
            .map(|sample| Sample::new(sample.x, friis_transmission(sample.y)))
            .collect()),
        Algorithm::LogDistancePathLoss => Ok(samples
            .iter()
            .map(|sample| Sample::new(sample.x, log_distance_path_loss(sample.y, path_loss_exponent)))
            .collect()),
        Algorithm::InterferenceCorrected => {
            let compensated = samples
                .iter()
                .map(|sample| Ok(Sample::new(sample.x, sample.y / interference_factor(sample.x)?)))
                .collect::<Result<Vec<_>, RangingError>>()?;
            convert(
                &average_points(&compensated)?,
                Algorithm::LogDistancePathLoss,
                path_loss_exponent,
            )
        }
    }
}

/// Runs the configured steps in order: sentinel drop, outlier rejection,
/// conversion, aggregation. Line aggregations come back sorted by distance.
pub fn apply(samples: &[Sample], config: &CorrectionConfig) -> Result<CorrectedSeries, RangingError> {
    let mut current = if config.drop_sentinel {
        drop_sentinel(samples)
    } else {
        samples.to_vec()
    };
    if let Some(rejection) = config.outlier_rejection {
        current = reject_outliers(&current, rejection.window_size, rejection.ratio_threshold);
    }
    current = convert(&current, config.algorithm, config.path_loss_exponent)?;
    let mut points = match config.aggregation {
        Aggregation::Raw => current,
        Aggregation::Average | Aggregation::AverageLine => average_points(&current)?,
        Aggregation::Median | Aggregation::MedianLine => median_points(&current)?,
        Aggregation::GroupedForBoxplot => {
            return Ok(CorrectedSeries::Groups(group_by_distance(&current)))
        }
    };
    if config.aggregation.connects_line() {
        sort_by_distance(&mut points);
    }
    Ok(CorrectedSeries::Points(points))
}

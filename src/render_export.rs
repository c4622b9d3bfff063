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

//! Offline processing of the configured datasets into one JSON document for
//! the chart renderer.

use std::io::Write;

use log::{error, info};
use serde::Serialize;

use crate::config::{Config, Coordinates, DatasetConfig};
use crate::correction_pipeline::{apply, Aggregation, Algorithm, CorrectedSeries};
use crate::dataset_store::{read_samples, Sample};
use crate::error::RangingError;

/// Everything the renderer needs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderDocument {
    /// Axis bounds.
    pub coordinates: Coordinates,
    /// Processed datasets in configuration order.
    pub datasets: Vec<RenderedDataset>,
}

/// One processed dataset.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedDataset {
    /// Source file name.
    pub file_name: String,
    /// Drawing colour.
    pub color: String,
    /// Applied conversion.
    pub algorithm: Algorithm,
    /// Applied aggregation.
    #[serde(rename = "type")]
    pub aggregation: Aggregation,
    /// Draw the points as a connected line.
    pub connect_line: bool,
    /// Processed values.
    #[serde(flatten)]
    pub series: RenderedSeries,
}

/// Processed values: `{"points": [[x, y], ...]}` or `{"groups": [[x, [y, ...]], ...]}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderedSeries {
    /// One coordinate per entry.
    Points(Vec<Sample>),
    /// Unreduced readings per distance.
    Groups(Vec<(f64, Vec<f64>)>),
}

impl From<CorrectedSeries> for RenderedSeries {
    fn from(series: CorrectedSeries) -> Self {
        match series {
            CorrectedSeries::Points(points) => RenderedSeries::Points(points),
            CorrectedSeries::Groups(groups) => RenderedSeries::Groups(
                groups.into_iter().map(|group| (group.x, group.ys)).collect(),
            ),
        }
    }
}

fn process_dataset(config: &Config, dataset: &DatasetConfig) -> Result<RenderedDataset, RangingError> {
    let samples = read_samples(&config.data_dir.join(&dataset.file_name))?;
    let correction = config.correction_for(dataset);
    let series = apply(&samples, &correction)?;
    info!(
        "Processed {} ({} samples) with {:?}/{:?}.",
        dataset.file_name,
        samples.len(),
        correction.algorithm,
        correction.aggregation
    );
    Ok(RenderedDataset {
        file_name: dataset.file_name.clone(),
        color: dataset.color.clone(),
        algorithm: correction.algorithm,
        aggregation: correction.aggregation,
        connect_line: correction.aggregation.connects_line(),
        series: series.into(),
    })
}

/// Processes every configured dataset. A dataset that fails is logged and
/// left out so the others still render.
pub fn build_document(config: &Config) -> RenderDocument {
    let datasets = config
        .datasets
        .iter()
        .filter_map(|dataset| match process_dataset(config, dataset) {
            Ok(rendered) => Some(rendered),
            Err(err) => {
                error!("Skipping dataset {}: {}", dataset.file_name, err);
                None
            }
        })
        .collect();
    RenderDocument {
        coordinates: config.coordinates.clone(),
        datasets,
    }
}

/// Writes the document as JSON.
pub fn write_document<W: Write>(document: &RenderDocument, writer: W) -> Result<(), RangingError> {
    serde_json::to_writer(writer, document).map_err(|err| RangingError::Io(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeltaCorrection;
    use std::fs;

    fn config_with_data(name: &str, contents: &str, datasets: Vec<DatasetConfig>) -> Config {
        let dir = std::env::temp_dir().join(format!(
            "rssi_ranging_render_{}_{}",
            std::process::id(),
            name
        ));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("data0.json"), contents).unwrap();
        Config {
            data_dir: dir,
            datasets,
            ..Config::default()
        }
    }

    fn dataset(algorithm: Algorithm, aggregation: Aggregation) -> DatasetConfig {
        DatasetConfig {
            file_name: String::from("data0.json"),
            algorithm,
            aggregation,
            color: String::from("red"),
            deltacorrection: None,
        }
    }

    #[test]
    fn test_line_document() {
        let config = config_with_data(
            "line",
            "[[200,-70],[100,-50],[100,-70]]",
            vec![dataset(Algorithm::None, Aggregation::AverageLine)],
        );
        let document = build_document(&config);
        let mut json = Vec::new();
        write_document(&document, &mut json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(
            value["datasets"][0],
            serde_json::json!({
                "fileName": "data0.json",
                "color": "red",
                "algorithm": "none",
                "type": "line",
                "connectLine": true,
                "points": [[100, -60], [200, -70]],
            })
        );
        assert_eq!(value["coordinates"]["right_x"], serde_json::json!(500.0));
    }

    #[test]
    fn test_boxplot_document() {
        let config = config_with_data(
            "boxplot",
            "[[10,-50],[10,-55],[20,-60]]",
            vec![dataset(Algorithm::None, Aggregation::GroupedForBoxplot)],
        );
        let document = build_document(&config);
        assert_eq!(
            document.datasets[0].series,
            RenderedSeries::Groups(vec![(10.0, vec![-50.0, -55.0]), (20.0, vec![-60.0])])
        );
    }

    #[test]
    fn test_failing_dataset_is_skipped() {
        let mut out_of_range = dataset(Algorithm::InterferenceCorrected, Aggregation::Raw);
        out_of_range.deltacorrection = Some(DeltaCorrection {
            quantity: 3,
            threshold: 2.0,
        });
        let config = config_with_data(
            "skip",
            "[[900,-80]]",
            vec![out_of_range, dataset(Algorithm::None, Aggregation::Raw)],
        );
        let document = build_document(&config);
        assert_eq!(document.datasets.len(), 1);
        assert_eq!(document.datasets[0].algorithm, Algorithm::None);
    }
}

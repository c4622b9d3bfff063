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

//! Per-device sample files: `data/data{index}.json`, a JSON array of `[x, y]`.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::RangingError;

/// One `(distance, reading)` coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(from = "(f64, f64)")]
pub struct Sample {
    /// Ground-truth distance at capture time.
    pub x: f64,
    /// Signal reading, raw or converted.
    pub y: f64,
}

impl Sample {
    /// Creates a sample.
    pub fn new(x: f64, y: f64) -> Self {
        Sample { x, y }
    }

    /// Whether both coordinates can be written as JSON numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Sample {
    fn from((x, y): (f64, f64)) -> Self {
        Sample { x, y }
    }
}

// Whole numbers are written without a fraction so files read `[150,-60]`.
fn serialize_number<S: SerializeTuple>(tuple: &mut S, value: f64) -> Result<(), S::Error> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        tuple.serialize_element(&(value as i64))
    } else {
        tuple.serialize_element(&value)
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        serialize_number(&mut tuple, self.x)?;
        serialize_number(&mut tuple, self.y)?;
        tuple.end()
    }
}

/// Stable sort ascending by distance.
pub fn sort_by_distance(samples: &mut [Sample]) {
    samples.sort_by(|a, b| a.x.total_cmp(&b.x));
}

/// Reads a sample file. A missing or blank file holds no samples.
pub fn read_samples(path: &Path) -> Result<Vec<Sample>, RangingError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).map_err(|err| {
        RangingError::ContractViolation(format!("{}: {}", path.display(), err))
    })
}

/// Directory of per-device sample files.
#[derive(Clone, Debug)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DatasetStore { dir: dir.into() }
    }

    /// File backing the samples of the device at `device_index`.
    pub fn path_for(&self, device_index: usize) -> PathBuf {
        self.dir.join(format!("data{}.json", device_index))
    }

    /// Existing samples of a device, empty when no file exists yet.
    pub fn load(&self, device_index: usize) -> Result<Vec<Sample>, RangingError> {
        read_samples(&self.path_for(device_index))
    }

    /// Appends `new_samples` to the device's file and re-sorts it by distance.
    /// Equal distances are kept side by side, never deduplicated. A batch with
    /// a non-finite value is refused and the file is left untouched.
    pub fn merge(&self, device_index: usize, new_samples: &[Sample]) -> Result<(), RangingError> {
        let path = self.path_for(device_index);
        if let Some(bad) = new_samples.iter().find(|sample| !sample.is_finite()) {
            return Err(RangingError::ContractViolation(format!(
                "non-finite sample [{}, {}] for {}",
                bad.x,
                bad.y,
                path.display()
            )));
        }
        let mut merged = match self.load(device_index) {
            Ok(previous) if !previous.is_empty() => {
                let mut merged = previous;
                merged.extend_from_slice(new_samples);
                info!("Merging {} samples into {}.", new_samples.len(), path.display());
                merged
            }
            Ok(_) => {
                info!("Creating new data file {}.", path.display());
                new_samples.to_vec()
            }
            Err(RangingError::ContractViolation(reason)) => {
                warn!("Replacing unreadable data file: {}", reason);
                new_samples.to_vec()
            }
            Err(err) => return Err(err),
        };
        sort_by_distance(&mut merged);
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string(&merged)
            .map_err(|err| RangingError::Internal(err.to_string()))?;
        fs::write(&path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn scratch_store() -> DatasetStore {
        let dir = std::env::temp_dir().join(format!(
            "rssi_ranging_store_{}_{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = fs::remove_dir_all(&dir);
        DatasetStore::new(dir)
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let store = scratch_store();
        assert_eq!(store.load(0).unwrap(), Vec::new());
    }

    #[test]
    fn test_merge_into_empty_store_writes_compact_json() {
        let store = scratch_store();
        let samples = vec![Sample::new(150.0, -60.0); 3];
        store.merge(0, &samples).unwrap();
        assert_eq!(
            fs::read_to_string(store.path_for(0)).unwrap(),
            "[[150,-60],[150,-60],[150,-60]]"
        );
        assert_eq!(store.load(0).unwrap(), samples);
    }

    #[test]
    fn test_merge_appends_and_sorts() {
        let store = scratch_store();
        store
            .merge(1, &[Sample::new(200.0, -70.0), Sample::new(50.0, -45.0)])
            .unwrap();
        store
            .merge(1, &[Sample::new(100.0, -55.0), Sample::new(50.0, -47.0)])
            .unwrap();
        assert_eq!(
            store.load(1).unwrap(),
            vec![
                Sample::new(50.0, -45.0),
                Sample::new(50.0, -47.0),
                Sample::new(100.0, -55.0),
                Sample::new(200.0, -70.0),
            ]
        );
    }

    #[test]
    fn test_merge_in_batches_matches_single_batch() {
        let batch_a = [Sample::new(30.0, -50.0), Sample::new(10.0, -40.0)];
        let batch_b = [Sample::new(20.0, -45.0), Sample::new(30.0, -52.0)];

        let split = scratch_store();
        split.merge(0, &batch_a).unwrap();
        split.merge(0, &batch_b).unwrap();

        let single = scratch_store();
        let mut all = batch_a.to_vec();
        all.extend_from_slice(&batch_b);
        single.merge(0, &all).unwrap();
        assert_eq!(split.load(0).unwrap(), single.load(0).unwrap());
    }

    #[test]
    fn test_fractional_values_survive() {
        let store = scratch_store();
        store.merge(2, &[Sample::new(12.5, -60.25)]).unwrap();
        assert_eq!(store.load(2).unwrap(), vec![Sample::new(12.5, -60.25)]);
    }

    #[test]
    fn test_non_finite_batch_keeps_existing_file() {
        let store = scratch_store();
        store.merge(4, &[Sample::new(10.0, -40.0)]).unwrap();
        let before = fs::read_to_string(store.path_for(4)).unwrap();

        let result = store.merge(4, &[Sample::new(20.0, -45.0), Sample::new(30.0, f64::NAN)]);
        assert!(matches!(result, Err(RangingError::ContractViolation(_))));
        let result = store.merge(4, &[Sample::new(f64::INFINITY, -45.0)]);
        assert!(matches!(result, Err(RangingError::ContractViolation(_))));

        assert_eq!(fs::read_to_string(store.path_for(4)).unwrap(), before);
        assert_eq!(store.load(4).unwrap(), vec![Sample::new(10.0, -40.0)]);
    }

    #[test]
    fn test_unreadable_file_is_replaced() {
        let store = scratch_store();
        fs::create_dir_all(&store.dir).unwrap();
        fs::write(store.path_for(3), "{\"not\": \"an array\"}").unwrap();
        assert!(matches!(store.load(3), Err(RangingError::ContractViolation(_))));
        store.merge(3, &[Sample::new(1.0, -1.0)]).unwrap();
        assert_eq!(store.load(3).unwrap(), vec![Sample::new(1.0, -1.0)]);
    }
}

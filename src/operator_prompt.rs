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

//! Line-based operator console driving measurement sessions.

use log::{error, info};
use tokio::io::{self, AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::dataset_store::DatasetStore;
use crate::error::RangingError;
use crate::measurement_session::{MeasurementSession, RegistryView, SessionControl, SessionParams};

const DISTANCE_QUESTION: &str = "What is the actual distance of the devices right now (in cm)?";
const ABORT_COMMAND: &str = "abort";

/// Parses an operator-entered distance. Zero, negative and non-numeric
/// input is refused.
pub fn parse_distance(line: &str) -> Option<f64> {
    line.trim()
        .parse::<f64>()
        .ok()
        .filter(|distance| distance.is_finite() && *distance > 0.0)
}

/// Asks for a distance, runs one session per answer and repeats. Typing
/// `abort` while a session runs stops it at the next tick. Returns when
/// standard input closes.
pub async fn run<V: RegistryView>(
    config: Config,
    view: V,
    store: DatasetStore,
) -> Result<(), RangingError> {
    let control = SessionControl::new();
    let session = MeasurementSession::new(&view, &store, &control);
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        println!("{}", DISTANCE_QUESTION);
        let Some(line) = lines.next_line().await? else {
            info!("Operator input closed.");
            return Ok(());
        };
        let Some(distance) = parse_distance(&line) else {
            println!("Not a Number, try again!");
            continue;
        };

        println!("Taking measurements...");
        let measurement = session.run(SessionParams::from_config(&config, distance));
        tokio::pin!(measurement);
        let mut input_open = true;
        let outcome = loop {
            tokio::select! {
                outcome = &mut measurement => break outcome,
                line = lines.next_line(), if input_open => match line? {
                    Some(command) if command.trim() == ABORT_COMMAND => control.abort(),
                    Some(_) => println!("A measurement is running, type '{}' to cancel.", ABORT_COMMAND),
                    None => {
                        input_open = false;
                        control.abort();
                    }
                },
            }
        };
        match outcome {
            Ok(report) => println!(
                "Measurements are completed! {} devices sampled.",
                report.device_ids.len()
            ),
            Err(RangingError::SessionAborted) => println!("Measurement aborted."),
            Err(err) => error!("Measurement failed: {}", err),
        }
    }
}

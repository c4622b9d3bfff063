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

use thiserror::Error;

/// Library error type.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Clone)]
pub enum RangingError {
    /// An inbound push message could not be parsed into a known shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// Reading or writing a file failed.
    #[error("io error: {0}")]
    Io(String),
    /// Reported when a configuration or dataset file exists but its content
    /// does not have the expected structure.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// Every identifier of the dynamic identity space is already taken.
    #[error("identity space exhausted, {0} identities in use")]
    IdentitySpaceExhausted(u64),
    /// A median was requested for a group that holds no readings.
    #[error("cannot reduce an empty group")]
    EmptyGroup,
    /// The interference table only covers integer distances 0..=400.
    #[error("no interference factor for distance {0}")]
    InterferenceOutOfRange(f64),
    /// A measurement session is already running.
    #[error("a measurement session is already active")]
    SessionActive,
    /// The running session was aborted between two ticks.
    #[error("measurement session aborted")]
    SessionAborted,
    /// The gateway engine stopped and no longer answers requests.
    #[error("gateway engine unavailable")]
    GatewayUnavailable,
    /// Reported when a bug occurs inside the library. Whenever a seemingly
    /// impossible error condition arises where you could call `expect()`,
    /// return this error instead.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for RangingError {
    fn from(err: std::io::Error) -> Self {
        RangingError::Io(err.to_string())
    }
}

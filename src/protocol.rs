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

//! Push-protocol messages and the gateway state machine driving the registry.
//!
//! Inbound frames are JSON objects `{"id"?: string, "list"?: [...]}`. A frame
//! without an id asks for an identity; a frame with an id is a report.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::device_registry::{DeviceRegistry, NeighborObservation, UpsertOutcome};
use crate::error::RangingError;

/// Text frame sent on every freshly opened connection.
pub const CONNECTION_ACK: &str = "Hello client!";

#[derive(Deserialize)]
struct RawInboundMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    list: Option<Vec<NeighborObservation>>,
}

/// Inbound frame, resolved once at the protocol boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// The sender has no identity yet.
    IdentityRequest,
    /// A device reports its current neighbor list.
    Report {
        /// Identity previously issued to the sender.
        id: String,
        /// Observations, empty when the frame carried none.
        neighbors: Vec<NeighborObservation>,
    },
}

impl InboundMessage {
    /// Parses one JSON frame.
    pub fn parse(text: &str) -> Result<InboundMessage, RangingError> {
        let raw: RawInboundMessage = serde_json::from_str(text)
            .map_err(|err| RangingError::MalformedMessage(err.to_string()))?;
        match raw.id {
            Some(id) if !id.is_empty() => Ok(InboundMessage::Report {
                id,
                neighbors: raw.list.unwrap_or_default(),
            }),
            _ => Ok(InboundMessage::IdentityRequest),
        }
    }
}

/// Reply sent back to the sender of a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// `{"id": "..."}` carrying a freshly issued identity.
    IdentityAssigned {
        /// The issued identity.
        id: String,
    },
}

impl OutboundMessage {
    /// JSON text of the reply.
    pub fn to_json(&self) -> Result<String, RangingError> {
        serde_json::to_string(self).map_err(|err| RangingError::Internal(err.to_string()))
    }
}

/// Terminates push frames and applies them to the owned registry.
///
/// Any sender holding a previously issued id may report as that device; the
/// protocol carries no authentication.
#[derive(Default, Debug)]
pub struct ProtocolGateway {
    registry: DeviceRegistry,
}

impl ProtocolGateway {
    /// Creates a gateway over an empty registry.
    pub fn new() -> Self {
        ProtocolGateway::default()
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Write access to the registry, used by the liveness sweep.
    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Handles one raw text frame. Malformed frames are logged and dropped.
    pub fn on_text_frame(&mut self, text: &str) -> Option<OutboundMessage> {
        match InboundMessage::parse(text) {
            Ok(message) => self.on_message(message),
            Err(err) => {
                warn!("Dropping inbound frame: {}", err);
                None
            }
        }
    }

    /// Applies a parsed frame and returns the reply to send, if any.
    pub fn on_message(&mut self, message: InboundMessage) -> Option<OutboundMessage> {
        match message {
            InboundMessage::IdentityRequest => match self.registry.assign_identity() {
                Ok(id) => {
                    info!("New ID {} was sent.", id);
                    Some(OutboundMessage::IdentityAssigned { id })
                }
                Err(err) => {
                    warn!("Could not issue an identity: {}", err);
                    None
                }
            },
            InboundMessage::Report { id, neighbors } => {
                if self.registry.upsert(&id, neighbors) == UpsertOutcome::Inserted {
                    info!("Client first connect or reconnect after being disconnected: {}", id);
                }
                None
            }
        }
    }
}

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

//! Sorted in-memory collection of reporting devices.

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use log::{debug, warn};
use rand::Rng;
use serde::Deserialize;

use crate::error::RangingError;

/// Identifiers below this value are reserved for fixed devices.
pub const FIRST_DYNAMIC_IDENTITY: u32 = 4;
/// Largest identifier the gateway hands out.
pub const LAST_DYNAMIC_IDENTITY: u32 = 0xFF_FFFE;
/// Most identities kept waiting for a first report; older ones are forgotten.
pub const MAX_PROVISIONED_IDENTITIES: usize = 1024;

/// One entry of a device's reported neighbor list.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NeighborObservation {
    /// Identifier of the observed peer.
    #[serde(rename = "id")]
    pub neighbor_id: String,
    /// Unprocessed signal strength as reported.
    pub raw_rssi: i32,
    /// Value linearized by the reporting device, never computed here.
    #[serde(default)]
    pub linear_rssi: Option<f64>,
}

/// A reporting client known to the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    id: String,
    neighbor_reports: Vec<NeighborObservation>,
    stale: bool,
}

impl Device {
    fn new(id: String, neighbor_reports: Vec<NeighborObservation>) -> Self {
        Device {
            id,
            neighbor_reports,
            stale: false,
        }
    }

    /// Identifier assigned by the gateway.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest neighbor list, replaced on every report.
    pub fn neighbor_reports(&self) -> &[NeighborObservation] {
        &self.neighbor_reports
    }

    /// True when no report arrived since the last liveness sweep.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Raw reading of the reference peer, by convention the first neighbor.
    pub fn reference_rssi(&self) -> Option<i32> {
        self.neighbor_reports.first().map(|report| report.raw_rssi)
    }
}

/// Lifecycle of an identifier as seen by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Never issued and never reported.
    Unknown,
    /// Issued by the gateway but not yet admitted.
    Provisioned,
    /// Admitted and reporting.
    Registered,
    /// Admitted, but silent since the last liveness sweep.
    Stale,
}

/// Result of an [`DeviceRegistry::upsert`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// An existing device received a fresh neighbor list.
    Updated,
    /// A new device was admitted.
    Inserted,
    /// An unknown device reported an empty list and was not admitted.
    Rejected,
}

/// Devices kept sorted ascending by id.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    // Issued identities without a first report yet, oldest first.
    provisioned: VecDeque<String>,
    // Leading entries of `provisioned` that were already there at the last sweep.
    provisioned_before_sweep: usize,
    identities: RangeInclusive<u32>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        DeviceRegistry {
            devices: Vec::new(),
            provisioned: VecDeque::new(),
            provisioned_before_sweep: 0,
            identities: FIRST_DYNAMIC_IDENTITY..=LAST_DYNAMIC_IDENTITY,
        }
    }
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    #[cfg(test)]
    fn with_identity_range(identities: RangeInclusive<u32>) -> Self {
        DeviceRegistry {
            identities,
            ..DeviceRegistry::default()
        }
    }

    /// Number of issued identities still waiting for a first report.
    pub fn provisioned_len(&self) -> usize {
        self.provisioned.len()
    }

    fn is_provisioned(&self, id: &str) -> bool {
        self.provisioned.iter().any(|issued| issued == id)
    }

    fn forget_provisioned(&mut self, id: &str) {
        if let Some(position) = self.provisioned.iter().position(|issued| issued == id) {
            self.provisioned.remove(position);
            if position < self.provisioned_before_sweep {
                self.provisioned_before_sweep -= 1;
            }
        }
    }

    fn is_taken(&self, id: &str) -> bool {
        self.contains(id) || self.is_provisioned(id)
    }

    fn provision(&mut self, id: String) -> String {
        self.provisioned.push_back(id.clone());
        if self.provisioned.len() > MAX_PROVISIONED_IDENTITIES {
            if let Some(evicted) = self.provisioned.pop_front() {
                debug!("Identity {} was never claimed, forgetting it.", evicted);
            }
            self.provisioned_before_sweep = self.provisioned_before_sweep.saturating_sub(1);
        }
        id
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no device is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn position(&self, id: &str) -> Result<usize, usize> {
        self.devices
            .binary_search_by(|device| device.id.as_str().cmp(id))
    }

    /// Looks up a registered device.
    pub fn get(&self, id: &str) -> Option<&Device> {
        self.position(id)
            .ok()
            .and_then(|index| self.devices.get(index))
    }

    /// True when `id` belongs to a registered device.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_ok()
    }

    /// Where `id` currently is in its lifecycle.
    pub fn state_of(&self, id: &str) -> DeviceState {
        match self.get(id) {
            Some(device) if device.stale => DeviceState::Stale,
            Some(_) => DeviceState::Registered,
            None if self.is_provisioned(id) => DeviceState::Provisioned,
            None => DeviceState::Unknown,
        }
    }

    /// Issues a fresh identifier from the dynamic identity space.
    pub fn assign_identity(&mut self) -> Result<String, RangingError> {
        self.assign_identity_with(&mut rand::thread_rng())
    }

    /// Same as [`DeviceRegistry::assign_identity`] with a caller-supplied random source.
    pub fn assign_identity_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<String, RangingError> {
        let space = u64::from(self.identities.end() - self.identities.start()) + 1;
        let taken = (self.devices.len() + self.provisioned.len()) as u64;
        if taken >= space {
            return Err(RangingError::IdentitySpaceExhausted(taken));
        }
        for attempt in 1..=space {
            let candidate = format!("{:06x}", rng.gen_range(self.identities.clone()));
            if self.is_taken(&candidate) {
                debug!("Identity {} collided on attempt {}, retrying.", candidate, attempt);
                continue;
            }
            return Ok(self.provision(candidate));
        }
        // Random draws kept colliding; walk the space for the free ids left.
        let free = self
            .identities
            .clone()
            .map(|value| format!("{:06x}", value))
            .find(|candidate| !self.is_taken(candidate));
        match free {
            Some(candidate) => Ok(self.provision(candidate)),
            None => Err(RangingError::IdentitySpaceExhausted(taken)),
        }
    }

    /// Replaces the neighbor list of `id`, admitting the device if it is new.
    /// Unknown devices are only admitted with a non-empty list.
    pub fn upsert(&mut self, id: &str, neighbor_reports: Vec<NeighborObservation>) -> UpsertOutcome {
        match self.position(id) {
            Ok(index) => {
                if let Some(device) = self.devices.get_mut(index) {
                    device.neighbor_reports = neighbor_reports;
                    device.stale = false;
                }
                UpsertOutcome::Updated
            }
            Err(index) => {
                if neighbor_reports.is_empty() {
                    warn!(
                        "Device {} did not send any data, maybe it is not advertising.",
                        id
                    );
                    return UpsertOutcome::Rejected;
                }
                self.forget_provisioned(id);
                // Vec::insert shifts the tail, keeping ids ascending.
                self.devices
                    .insert(index, Device::new(id.to_string(), neighbor_reports));
                debug!("Device {} inserted at position {}.", id, index);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Copy of all devices in id order.
    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.clone()
    }

    /// Reference readings of `ids`, `None` for unknown devices or empty lists.
    pub fn reference_readings(&self, ids: &[String]) -> Vec<Option<i32>> {
        ids.iter()
            .map(|id| self.get(id).and_then(Device::reference_rssi))
            .collect()
    }

    /// Marks every device stale and returns those that already were, i.e.
    /// devices that sent nothing since the previous sweep. Identities issued
    /// before the previous sweep and still unclaimed are forgotten.
    pub fn sweep_stale(&mut self) -> Vec<String> {
        let expired = self.provisioned_before_sweep.min(self.provisioned.len());
        if expired > 0 {
            self.provisioned.drain(..expired);
            debug!("Forgot {} unclaimed identities.", expired);
        }
        self.provisioned_before_sweep = self.provisioned.len();

        let mut silent = Vec::new();
        for device in &mut self.devices {
            if device.stale {
                silent.push(device.id.clone());
            }
            device.stale = true;
        }
        silent
    }
}

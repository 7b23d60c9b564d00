use crate::composition::Composition;
use crate::container::Container;
use crate::equipment::Equipment;
use crate::error::{ErrorCode, LabError};
use crate::plate::Plate;
use crate::process::ProcessRecord;
use crate::provenance::ProvenanceGraph;
use crate::user::User;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type UserId = String;
pub type EquipmentId = String;
pub type PlateId = String;
pub type ContainerId = String;
pub type CompositionId = String;
pub type ProcessId = String;

/// One measured concentration. The table is append-only and its order is
/// the authoritative iteration order for a process's measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationMeasurement {
    pub composition: CompositionId,
    pub process: ProcessId,
    pub raw_concentration: f64,
}

/// One input to a pool; the full set of rows for a pool is its recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolComponent {
    pub pool: CompositionId,
    pub input: CompositionId,
    pub input_volume: f64,
    pub percentage_of_output: f64,
}

/// The whole store: every table plus the id counters. An engine op writes
/// to a working copy of this and the copy replaces the committed state only
/// when the op succeeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabState {
    pub users: HashMap<UserId, User>,
    pub equipment: HashMap<EquipmentId, Equipment>,
    pub plates: HashMap<PlateId, Plate>,
    pub containers: HashMap<ContainerId, Container>,
    pub compositions: HashMap<CompositionId, Composition>,
    pub processes: HashMap<ProcessId, ProcessRecord>,
    pub concentration_measurements: Vec<ConcentrationMeasurement>,
    pub pool_components: Vec<PoolComponent>,
    pub provenance: ProvenanceGraph,
    next_user_counter: u64,
    next_equipment_counter: u64,
    next_plate_counter: u64,
    next_container_counter: u64,
    next_composition_counter: u64,
    next_process_counter: u64,
}

impl LabState {
    pub fn load_from_path(path: &str) -> Result<Self, LabError> {
        let text = std::fs::read_to_string(path).map_err(|e| LabError {
            code: ErrorCode::Io,
            message: format!("Could not read state file '{path}': {e}"),
        })?;
        serde_json::from_str(&text).map_err(|e| LabError {
            code: ErrorCode::ParseError,
            message: format!("Could not parse state JSON '{path}': {e}"),
        })
    }

    pub fn save_to_path(&self, path: &str) -> Result<(), LabError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| LabError {
            code: ErrorCode::Internal,
            message: format!("Could not serialize state: {e}"),
        })?;
        std::fs::write(path, text).map_err(|e| LabError {
            code: ErrorCode::Io,
            message: format!("Could not write state file '{path}': {e}"),
        })
    }

    pub(crate) fn next_user_id(&mut self) -> UserId {
        self.next_user_counter += 1;
        format!("user-{}", self.next_user_counter)
    }

    pub(crate) fn next_equipment_id(&mut self) -> EquipmentId {
        self.next_equipment_counter += 1;
        format!("equip-{}", self.next_equipment_counter)
    }

    pub(crate) fn next_plate_id(&mut self) -> PlateId {
        self.next_plate_counter += 1;
        format!("plate-{}", self.next_plate_counter)
    }

    pub(crate) fn next_container_id(&mut self) -> ContainerId {
        self.next_container_counter += 1;
        format!("cont-{}", self.next_container_counter)
    }

    pub(crate) fn next_composition_id(&mut self) -> CompositionId {
        self.next_composition_counter += 1;
        format!("comp-{}", self.next_composition_counter)
    }

    pub(crate) fn next_process_id(&mut self) -> ProcessId {
        self.next_process_counter += 1;
        format!("proc-{}", self.next_process_counter)
    }

    pub fn user(&self, id: &UserId) -> Result<&User, LabError> {
        self.users.get(id).ok_or_else(|| LabError {
            code: ErrorCode::NotFound,
            message: format!("User '{id}' not found"),
        })
    }

    pub fn equipment_item(&self, id: &EquipmentId) -> Result<&Equipment, LabError> {
        self.equipment.get(id).ok_or_else(|| LabError {
            code: ErrorCode::NotFound,
            message: format!("Equipment '{id}' not found"),
        })
    }

    pub fn plate(&self, id: &PlateId) -> Result<&Plate, LabError> {
        self.plates.get(id).ok_or_else(|| LabError {
            code: ErrorCode::NotFound,
            message: format!("Plate '{id}' not found"),
        })
    }

    pub fn container(&self, id: &ContainerId) -> Result<&Container, LabError> {
        self.containers.get(id).ok_or_else(|| LabError {
            code: ErrorCode::NotFound,
            message: format!("Container '{id}' not found"),
        })
    }

    pub fn composition(&self, id: &CompositionId) -> Result<&Composition, LabError> {
        self.compositions.get(id).ok_or_else(|| LabError {
            code: ErrorCode::NotFound,
            message: format!("Composition '{id}' not found"),
        })
    }

    pub fn process(&self, id: &ProcessId) -> Result<&ProcessRecord, LabError> {
        self.processes.get(id).ok_or_else(|| LabError {
            code: ErrorCode::NotFound,
            message: format!("Process '{id}' not found"),
        })
    }

    /// The measurements a quantification process wrote, in insertion order.
    pub fn concentrations(&self, process: &ProcessId) -> Vec<(&CompositionId, f64)> {
        self.concentration_measurements
            .iter()
            .filter(|m| &m.process == process)
            .map(|m| (&m.composition, m.raw_concentration))
            .collect()
    }

    /// The recipe of a pool, in the order its inputs were recorded.
    pub fn pool_components_of(&self, pool: &CompositionId) -> Vec<&PoolComponent> {
        self.pool_components
            .iter()
            .filter(|c| &c.pool == pool)
            .collect()
    }

    /// Distinct plates whose wells a process touched, in first-touch order.
    pub fn plates_touched(&self, process: &ProcessId) -> Vec<&PlateId> {
        let mut ret: Vec<&PlateId> = vec![];
        for container_id in self.provenance.containers_touched(process) {
            let Some(plate_id) = self
                .containers
                .get(container_id)
                .and_then(|container| container.plate_id())
            else {
                continue;
            };
            if !ret.contains(&plate_id) {
                ret.push(plate_id);
            }
        }
        ret
    }
}

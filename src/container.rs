use crate::error::{ErrorCode, LabError};
use crate::state::{CompositionId, ContainerId, LabState, PlateId, ProcessId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerKind {
    Well {
        plate: PlateId,
        row: usize,
        column: usize,
    },
    Tube {
        external_id: String,
    },
}

/// A physical vessel. The process that created it (and every later process
/// that touched it) is recorded as provenance edges, never as a field here;
/// the only mutable state is the terminal `discarded` flag and the link to
/// the composition the vessel holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub kind: ContainerKind,
    pub volume: f64,
    pub discarded: bool,
    pub composition: Option<CompositionId>,
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Container {}

impl Container {
    pub fn create_well(
        state: &mut LabState,
        plate: &PlateId,
        process: &ProcessId,
        volume: f64,
        row: usize,
        column: usize,
    ) -> Result<ContainerId, LabError> {
        if !state.plates.contains_key(plate) {
            return Err(LabError {
                code: ErrorCode::NotFound,
                message: format!("Plate '{plate}' not found"),
            });
        }
        let id = state.next_container_id();
        state.containers.insert(
            id.clone(),
            Container {
                id: id.clone(),
                kind: ContainerKind::Well {
                    plate: plate.clone(),
                    row,
                    column,
                },
                volume,
                discarded: false,
                composition: None,
            },
        );
        state
            .plates
            .get_mut(plate)
            .ok_or_else(|| LabError {
                code: ErrorCode::Internal,
                message: format!("Plate '{plate}' vanished mid-creation"),
            })?
            .place_well(row, column, id.clone())?;
        state.provenance.record(&id, process);
        Ok(id)
    }

    pub fn create_tube(
        state: &mut LabState,
        process: &ProcessId,
        external_id: &str,
        volume: f64,
    ) -> ContainerId {
        let id = state.next_container_id();
        state.containers.insert(
            id.clone(),
            Container {
                id: id.clone(),
                kind: ContainerKind::Tube {
                    external_id: external_id.to_string(),
                },
                volume,
                discarded: false,
                composition: None,
            },
        );
        state.provenance.record(&id, process);
        id
    }

    pub fn is_well(&self) -> bool {
        matches!(self.kind, ContainerKind::Well { .. })
    }

    /// The plate this container sits on, if it is a well.
    pub fn plate_id(&self) -> Option<&PlateId> {
        match &self.kind {
            ContainerKind::Well { plate, .. } => Some(plate),
            ContainerKind::Tube { .. } => None,
        }
    }
}

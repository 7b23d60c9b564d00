use crate::state::{EquipmentId, LabState};
use serde::{Deserialize, Serialize};

/// A physical instrument: a robot, a pipetting tool, a sequencer.
/// The `equipment_type` string is what downstream formatting keys on
/// (e.g. `miseq` vs `hiseq` for the sample sheet lane model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EquipmentId,
    pub external_id: String,
    pub equipment_type: String,
}

impl PartialEq for Equipment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Equipment {}

impl Equipment {
    pub fn create(state: &mut LabState, external_id: &str, equipment_type: &str) -> EquipmentId {
        let id = state.next_equipment_id();
        state.equipment.insert(
            id.clone(),
            Equipment {
                id: id.clone(),
                external_id: external_id.to_string(),
                equipment_type: equipment_type.to_string(),
            },
        );
        id
    }
}

use crate::error::{ErrorCode, LabError};
use crate::state::{ContainerId, LabState, PlateId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateConfiguration {
    pub num_rows: usize,
    pub num_columns: usize,
}

impl PlateConfiguration {
    pub fn new(num_rows: usize, num_columns: usize) -> Self {
        Self {
            num_rows,
            num_columns,
        }
    }

    pub fn num_wells(&self) -> usize {
        self.num_rows * self.num_columns
    }
}

/// A plate and its row-major well layout. Slots are populated as wells are
/// created during the owning process; rows and columns are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plate {
    pub id: PlateId,
    pub external_id: String,
    pub configuration: PlateConfiguration,
    layout: Vec<Vec<Option<ContainerId>>>,
}

impl PartialEq for Plate {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Plate {}

impl Plate {
    pub fn create(
        state: &mut LabState,
        external_id: &str,
        configuration: PlateConfiguration,
    ) -> PlateId {
        let id = state.next_plate_id();
        let layout = vec![vec![None; configuration.num_columns]; configuration.num_rows];
        state.plates.insert(
            id.clone(),
            Plate {
                id: id.clone(),
                external_id: external_id.to_string(),
                configuration,
                layout,
            },
        );
        id
    }

    pub fn layout(&self) -> &[Vec<Option<ContainerId>>] {
        &self.layout
    }

    pub fn well_at(&self, row: usize, column: usize) -> Result<&ContainerId, LabError> {
        let missing = || LabError {
            code: ErrorCode::NotFound,
            message: format!(
                "Plate '{}' has no well at ({row}, {column})",
                self.external_id
            ),
        };
        row.checked_sub(1)
            .and_then(|r| self.layout.get(r))
            .and_then(|cells| column.checked_sub(1).and_then(|c| cells.get(c)))
            .and_then(|slot| slot.as_ref())
            .ok_or_else(missing)
    }

    pub(crate) fn place_well(
        &mut self,
        row: usize,
        column: usize,
        well: ContainerId,
    ) -> Result<(), LabError> {
        let slot = row
            .checked_sub(1)
            .and_then(|r| self.layout.get_mut(r))
            .and_then(|cells| column.checked_sub(1).and_then(|c| cells.get_mut(c)))
            .ok_or_else(|| LabError {
                code: ErrorCode::DomainValidation,
                message: format!(
                    "({row}, {column}) is outside the {}x{} geometry of plate '{}'",
                    self.configuration.num_rows, self.configuration.num_columns, self.external_id
                ),
            })?;
        *slot = Some(well);
        Ok(())
    }
}

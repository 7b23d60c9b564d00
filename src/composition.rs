use crate::error::{ErrorCode, LabError};
use crate::state::{CompositionId, ContainerId, LabState, ProcessId};
use serde::{Deserialize, Serialize};

/// Initial content of a freshly plated sample well.
pub const BLANK: &str = "blank";

/// What a container holds, and where it came from. Every variant except
/// `Sample` (the lineage root) records its upstream composition(s);
/// `Library` records two, one per source well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompositionDetail {
    Sample {
        content: String,
    },
    Gdna {
        source: CompositionId,
    },
    Library {
        gdna: CompositionId,
        primer: CompositionId,
    },
    Primer {
        template: CompositionId,
    },
    Reagent {
        reagent_type: String,
        external_lot_id: String,
    },
    Pool {
        name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Composition {
    pub id: CompositionId,
    pub container: ContainerId,
    pub created_by: ProcessId,
    pub volume: f64,
    pub detail: CompositionDetail,
}

impl PartialEq for Composition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Composition {}

impl Composition {
    fn create(
        state: &mut LabState,
        process: &ProcessId,
        container: &ContainerId,
        volume: f64,
        detail: CompositionDetail,
    ) -> Result<CompositionId, LabError> {
        let id = state.next_composition_id();
        state.compositions.insert(
            id.clone(),
            Composition {
                id: id.clone(),
                container: container.clone(),
                created_by: process.clone(),
                volume,
                detail,
            },
        );
        state
            .containers
            .get_mut(container)
            .ok_or_else(|| LabError {
                code: ErrorCode::NotFound,
                message: format!("Container '{container}' not found"),
            })?
            .composition = Some(id.clone());
        Ok(id)
    }

    pub fn create_sample(
        state: &mut LabState,
        process: &ProcessId,
        container: &ContainerId,
        volume: f64,
    ) -> Result<CompositionId, LabError> {
        Self::create(
            state,
            process,
            container,
            volume,
            CompositionDetail::Sample {
                content: BLANK.to_string(),
            },
        )
    }

    pub fn create_gdna(
        state: &mut LabState,
        process: &ProcessId,
        container: &ContainerId,
        volume: f64,
        source: &CompositionId,
    ) -> Result<CompositionId, LabError> {
        Self::create(
            state,
            process,
            container,
            volume,
            CompositionDetail::Gdna {
                source: source.clone(),
            },
        )
    }

    pub fn create_library(
        state: &mut LabState,
        process: &ProcessId,
        container: &ContainerId,
        volume: f64,
        gdna: &CompositionId,
        primer: &CompositionId,
    ) -> Result<CompositionId, LabError> {
        Self::create(
            state,
            process,
            container,
            volume,
            CompositionDetail::Library {
                gdna: gdna.clone(),
                primer: primer.clone(),
            },
        )
    }

    pub fn create_primer(
        state: &mut LabState,
        process: &ProcessId,
        container: &ContainerId,
        volume: f64,
        template: &CompositionId,
    ) -> Result<CompositionId, LabError> {
        Self::create(
            state,
            process,
            container,
            volume,
            CompositionDetail::Primer {
                template: template.clone(),
            },
        )
    }

    pub fn create_reagent(
        state: &mut LabState,
        process: &ProcessId,
        container: &ContainerId,
        volume: f64,
        reagent_type: &str,
        external_lot_id: &str,
    ) -> Result<CompositionId, LabError> {
        Self::create(
            state,
            process,
            container,
            volume,
            CompositionDetail::Reagent {
                reagent_type: reagent_type.to_string(),
                external_lot_id: external_lot_id.to_string(),
            },
        )
    }

    pub fn create_pool(
        state: &mut LabState,
        process: &ProcessId,
        container: &ContainerId,
        volume: f64,
        name: &str,
    ) -> Result<CompositionId, LabError> {
        Self::create(
            state,
            process,
            container,
            volume,
            CompositionDetail::Pool {
                name: name.to_string(),
            },
        )
    }

    /// Immediate upstream composition(s) this one was derived from.
    /// Empty for lineage roots (samples, reagents, pools aggregate through
    /// pool components instead).
    pub fn upstream_compositions(&self) -> Vec<&CompositionId> {
        match &self.detail {
            CompositionDetail::Sample { .. }
            | CompositionDetail::Reagent { .. }
            | CompositionDetail::Pool { .. } => vec![],
            CompositionDetail::Gdna { source } => vec![source],
            CompositionDetail::Library { gdna, primer } => vec![gdna, primer],
            CompositionDetail::Primer { template } => vec![template],
        }
    }
}

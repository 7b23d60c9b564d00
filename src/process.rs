use crate::error::{ErrorCode, LabError};
use crate::state::{CompositionId, EquipmentId, LabState, ProcessId, UserId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The closed set of process kinds. Adding a kind is a single-point change
/// here; every dispatch over it is an exhaustive match, so a missing arm is
/// a compile error instead of a runtime lookup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    #[serde(rename = "sample plating")]
    SamplePlating,
    #[serde(rename = "reagent creation")]
    ReagentCreation,
    #[serde(rename = "primer working plate creation")]
    PrimerWorkingPlateCreation,
    #[serde(rename = "gDNA extraction")]
    GdnaExtraction,
    #[serde(rename = "amplicon library prep")]
    LibraryPrepAmplicon,
    #[serde(rename = "shotgun library prep")]
    LibraryPrepShotgun,
    #[serde(rename = "quantification")]
    Quantification,
    #[serde(rename = "normalization")]
    Normalization,
    #[serde(rename = "pooling")]
    Pooling,
    #[serde(rename = "sequencing")]
    Sequencing,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 10] = [
        ProcessKind::SamplePlating,
        ProcessKind::ReagentCreation,
        ProcessKind::PrimerWorkingPlateCreation,
        ProcessKind::GdnaExtraction,
        ProcessKind::LibraryPrepAmplicon,
        ProcessKind::LibraryPrepShotgun,
        ProcessKind::Quantification,
        ProcessKind::Normalization,
        ProcessKind::Pooling,
        ProcessKind::Sequencing,
    ];

    /// The stored label, also used as the serde representation.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessKind::SamplePlating => "sample plating",
            ProcessKind::ReagentCreation => "reagent creation",
            ProcessKind::PrimerWorkingPlateCreation => "primer working plate creation",
            ProcessKind::GdnaExtraction => "gDNA extraction",
            ProcessKind::LibraryPrepAmplicon => "amplicon library prep",
            ProcessKind::LibraryPrepShotgun => "shotgun library prep",
            ProcessKind::Quantification => "quantification",
            ProcessKind::Normalization => "normalization",
            ProcessKind::Pooling => "pooling",
            ProcessKind::Sequencing => "sequencing",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().find(|kind| kind.label() == label).copied()
    }
}

/// Kind-specific metadata. Kinds whose only record is the generic one
/// (plating, reagent creation, quantification) carry no payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessPayload {
    PrimerWorkingPlateCreation {
        master_set_order: String,
    },
    GdnaExtraction {
        robot: EquipmentId,
        tool: EquipmentId,
        kit: CompositionId,
    },
    LibraryPrepAmplicon {
        master_mix: CompositionId,
        water_lot: CompositionId,
        robot: EquipmentId,
        tm300_tool: EquipmentId,
        tm50_tool: EquipmentId,
    },
    LibraryPrepShotgun {
        kit: CompositionId,
        stub_lot: CompositionId,
        robot: EquipmentId,
        normalization_process: Option<ProcessId>,
    },
    Normalization {
        quantification_process: ProcessId,
        water_lot: CompositionId,
    },
    Pooling {
        quantification_process: Option<ProcessId>,
        robot: Option<EquipmentId>,
    },
    Sequencing {
        pool: CompositionId,
        run_name: String,
        sequencer: EquipmentId,
        fwd_cycles: i64,
        rev_cycles: i64,
        assay: String,
        principal_investigator: UserId,
        contacts: Vec<UserId>,
    },
}

impl ProcessPayload {
    pub fn kind(&self) -> ProcessKind {
        match self {
            ProcessPayload::PrimerWorkingPlateCreation { .. } => {
                ProcessKind::PrimerWorkingPlateCreation
            }
            ProcessPayload::GdnaExtraction { .. } => ProcessKind::GdnaExtraction,
            ProcessPayload::LibraryPrepAmplicon { .. } => ProcessKind::LibraryPrepAmplicon,
            ProcessPayload::LibraryPrepShotgun { .. } => ProcessKind::LibraryPrepShotgun,
            ProcessPayload::Normalization { .. } => ProcessKind::Normalization,
            ProcessPayload::Pooling { .. } => ProcessKind::Pooling,
            ProcessPayload::Sequencing { .. } => ProcessKind::Sequencing,
        }
    }
}

/// One record shape for every process: the common fields plus the optional
/// kind-specific payload, accessed uniformly regardless of variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub kind: ProcessKind,
    pub date: NaiveDate,
    pub personnel: UserId,
    pub payload: Option<ProcessPayload>,
}

impl PartialEq for ProcessRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProcessRecord {}

/// Looks up a process and returns its fully typed record. Fails with
/// `NotFound` for an unknown id and with `UnknownKind` when the stored kind
/// and payload disagree (data drift; must never happen for records the
/// engine wrote).
pub fn resolve<'a>(state: &'a LabState, process_id: &ProcessId) -> Result<&'a ProcessRecord, LabError> {
    let record = state.processes.get(process_id).ok_or_else(|| LabError {
        code: ErrorCode::NotFound,
        message: format!("Process '{process_id}' not found"),
    })?;
    if let Some(payload) = &record.payload {
        if payload.kind() != record.kind {
            return Err(LabError {
                code: ErrorCode::UnknownKind,
                message: format!(
                    "Process '{process_id}' is stored as '{}' but carries a '{}' payload",
                    record.kind.label(),
                    payload.kind().label()
                ),
            });
        }
    }
    Ok(record)
}

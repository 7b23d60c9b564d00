use crate::error::{ErrorCode, LabError};
use crate::process::{self, ProcessPayload};
use crate::state::{LabState, ProcessId};
use serde::{Deserialize, Serialize};

const DATA_TARGET_GENE_HEADER: &str =
    "Sample_ID,Sample_Name,Sample_Plate,Sample_Well,I7_Index_ID,index,Sample_Project,Description,,";
const DATA_SHOTGUN_HEADER: &str =
    "Sample_ID,Sample_Name,Sample_Plate,Sample_Well,I7_Index_ID,index,I5_Index_ID,index2,Sample_Project,Description";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunType {
    #[default]
    TargetGene,
    Shotgun,
}

/// Whether the instrument reports per-lane data. Selected by the
/// sequencer's equipment type; anything unrecognized is refused rather
/// than guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneModel {
    Single,
    Multi,
}

pub fn lane_model_for(equipment_type: &str) -> Result<LaneModel, LabError> {
    match equipment_type {
        "miseq" => Ok(LaneModel::Single),
        "hiseq" => Ok(LaneModel::Multi),
        other => Err(LabError {
            code: ErrorCode::DomainValidation,
            message: format!("No sample sheet lane model for instrument type '{other}'"),
        }),
    }
}

/// Per-sample index metadata a shotgun sheet needs. `lane` is only
/// required on multi-lane instruments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShotgunSample {
    pub sample_id: String,
    pub i7_index_id: String,
    pub i7_index: String,
    pub i5_index_id: String,
    pub i5_index: String,
    pub lane: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleSheetOptions {
    pub run_type: RunType,
    pub samples: Vec<ShotgunSample>,
}

fn required(field: &str, value: &str) -> Result<(), LabError> {
    if value.is_empty() {
        return Err(LabError {
            code: ErrorCode::DomainValidation,
            message: format!("{field} is required"),
        });
    }
    Ok(())
}

fn required_sample_field(
    field: &str,
    sample_id: &str,
    value: &str,
) -> Result<(), LabError> {
    if value.is_empty() {
        return Err(LabError {
            code: ErrorCode::DomainValidation,
            message: format!("{field} is required for shotgun sample '{sample_id}'"),
        });
    }
    Ok(())
}

/// Formats the instrument sample sheet for a completed sequencing process.
/// The output grammar is byte-exact for downstream instrument software:
/// bracketed section markers, 10-comma padding on every metadata line, one
/// line per sample under `[Data]`.
pub fn format_sample_sheet(
    state: &LabState,
    sequencing: &ProcessId,
    options: &SampleSheetOptions,
) -> Result<String, LabError> {
    let record = process::resolve(state, sequencing)?;
    let Some(ProcessPayload::Sequencing {
        sequencer,
        run_name,
        fwd_cycles,
        rev_cycles,
        assay,
        principal_investigator,
        contacts,
        ..
    }) = &record.payload
    else {
        return Err(LabError {
            code: ErrorCode::DomainValidation,
            message: format!("Process '{sequencing}' is not a sequencing process"),
        });
    };

    let lane_model = lane_model_for(&state.equipment_item(sequencer)?.equipment_type)?;

    let pi = state.user(principal_investigator)?;
    let contact_0 = state.user(contacts.first().ok_or_else(|| LabError {
        code: ErrorCode::DomainValidation,
        message: "contact_0 is required".to_string(),
    })?)?;
    let contact_1 = contacts.get(1).map(|id| state.user(id)).transpose()?;
    let contact_2 = contacts.get(2).map(|id| state.user(id)).transpose()?;

    required("principal_investigator_name", &pi.name)?;
    required("principal_investigator_email", &pi.email)?;
    required("contact_0_name", &contact_0.name)?;
    required("contact_0_email", &contact_0.email)?;
    required("run_name", run_name)?;
    required("assay", assay)?;
    if *fwd_cycles <= 0 {
        return Err(LabError {
            code: ErrorCode::DomainValidation,
            message: "fwd_cycles must be > 0".to_string(),
        });
    }
    if *rev_cycles <= 0 {
        return Err(LabError {
            code: ErrorCode::DomainValidation,
            message: "rev_cycles must be > 0".to_string(),
        });
    }

    let pi_name = &pi.name;
    let pi_email = &pi.email;
    let contact_0_name = &contact_0.name;
    let contact_0_email = &contact_0.email;
    let contact_1_name = contact_1.map(|c| c.name.as_str()).unwrap_or("");
    let contact_1_email = contact_1.map(|c| c.email.as_str()).unwrap_or("");
    let contact_2_name = contact_2.map(|c| c.name.as_str()).unwrap_or("");
    let contact_2_email = contact_2.map(|c| c.email.as_str()).unwrap_or("");
    let date = record.date.format("%m/%d/%Y");
    let process_id = &record.id;

    let base_sheet = format!(
        "[Header],,,,,,,,,,\n\
         IEMFileVersion,4,,,,,,,,,\n\
         Investigator Name,{pi_name},,,,PI,{pi_name},{pi_email},,,\n\
         Experiment Name,{run_name},,,,Contact,{contact_0_name},{contact_1_name},{contact_2_name},,\n\
         Date,{date},,,,,{contact_0_email},{contact_1_email},{contact_2_email},,\n\
         Workflow,GenerateFASTQ,,,,,,,,,\n\
         Application,FASTQ Only,,,,,,,,,\n\
         Assay,{assay},,,,,,,,,\n\
         Description,plateflow ID,{process_id},,,,,,,,\n\
         Chemistry,Default,,,,,,,,,\n\
         ,,,,,,,,,,\n\
         [Reads],,,,,,,,,,\n\
         {fwd_cycles},,,,,,,,,,\n\
         {rev_cycles},,,,,,,,,,\n\
         ,,,,,,,,,,\n\
         [Settings],,,,,,,,,,\n\
         ReverseComplement,0,,,,,,,,,\n\
         ,,,,,,,,,,\n\
         [Data],,,,,,,,,,\n"
    );

    // The lane model toggles a leading Lane column in the header and every
    // sample row; single-lane instruments pad with a trailing comma instead.
    let (header_prefix, header_suffix, sample_suffix) = match lane_model {
        LaneModel::Single => ("", ",", ","),
        LaneModel::Multi => ("Lane,", "", ""),
    };

    let (sample_header, sample_details) = match options.run_type {
        RunType::TargetGene => {
            if lane_model == LaneModel::Multi {
                return Err(LabError {
                    code: ErrorCode::DomainValidation,
                    message: format!(
                        "Unsupported combination: target-gene run on multi-lane instrument \
                         (lane grouping for run '{run_name}' is not supported)"
                    ),
                });
            }
            let details = vec![format!("{run_name},,,,,NNNNNNNNNNNN,,,,,{sample_suffix}")];
            (
                format!("{header_prefix}{DATA_TARGET_GENE_HEADER}{header_suffix}"),
                details,
            )
        }
        RunType::Shotgun => {
            if options.samples.is_empty() {
                return Err(LabError {
                    code: ErrorCode::DomainValidation,
                    message: "Shotgun sample sheets require per-sample index metadata".to_string(),
                });
            }
            let mut details = Vec::with_capacity(options.samples.len());
            for sample in &options.samples {
                required("sample_id", &sample.sample_id)?;
                required_sample_field("i7_index_id", &sample.sample_id, &sample.i7_index_id)?;
                required_sample_field("i7_index", &sample.sample_id, &sample.i7_index)?;
                required_sample_field("i5_index_id", &sample.sample_id, &sample.i5_index_id)?;
                required_sample_field("i5_index", &sample.sample_id, &sample.i5_index)?;
                let sample_prefix = match lane_model {
                    LaneModel::Single => String::new(),
                    LaneModel::Multi => {
                        let lane = sample.lane.ok_or_else(|| LabError {
                            code: ErrorCode::DomainValidation,
                            message: format!(
                                "lane is required for shotgun sample '{}' on a multi-lane instrument",
                                sample.sample_id
                            ),
                        })?;
                        format!("{lane},")
                    }
                };
                details.push(format!(
                    "{sample_prefix}{},,,,{},{},{},{},,{sample_suffix}",
                    sample.sample_id,
                    sample.i7_index_id,
                    sample.i7_index,
                    sample.i5_index_id,
                    sample.i5_index,
                ));
            }
            (
                format!("{header_prefix}{DATA_SHOTGUN_HEADER}{header_suffix}"),
                details,
            )
        }
    };

    Ok(format!(
        "{base_sheet}{sample_header}\n{}\n",
        sample_details.join("\n")
    ))
}

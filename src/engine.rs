use crate::composition::{Composition, CompositionDetail};
use crate::container::Container;
use crate::error::{ErrorCode, LabError};
use crate::plate::{Plate, PlateConfiguration};
use crate::process::{ProcessKind, ProcessPayload, ProcessRecord};
use crate::state::{
    CompositionId, ConcentrationMeasurement, ContainerId, EquipmentId, LabState, PlateId,
    PoolComponent, ProcessId, UserId,
};
use chrono::NaiveDate;
use itertools::iproduct;
use serde::{Deserialize, Serialize};

pub type OpId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolInput {
    pub composition: CompositionId,
    pub input_volume: f64,
    pub percentage_of_output: f64,
}

/// Every workflow step the engine can perform. One variant per process
/// kind; the variant fields are the required inputs of that kind's
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessOp {
    SamplePlating {
        user: UserId,
        plate_configuration: PlateConfiguration,
        external_plate_id: String,
        volume: Option<f64>,
    },
    ReagentCreation {
        user: UserId,
        external_id: String,
        volume: f64,
        reagent_type: String,
    },
    PrimerWorkingPlateCreation {
        user: UserId,
        master_set_order: String,
        template_plates: Vec<PlateId>,
        volume: f64,
    },
    GdnaExtraction {
        user: UserId,
        robot: EquipmentId,
        tool: EquipmentId,
        kit: CompositionId,
        plates: Vec<PlateId>,
        volume: f64,
    },
    LibraryPrepAmplicon {
        user: UserId,
        master_mix: CompositionId,
        water_lot: CompositionId,
        robot: EquipmentId,
        tm300_tool: EquipmentId,
        tm50_tool: EquipmentId,
        volume: f64,
        plates: Vec<(PlateId, PlateId)>,
    },
    LibraryPrepShotgun {
        user: UserId,
        kit: CompositionId,
        stub_lot: CompositionId,
        robot: EquipmentId,
        normalization_process: Option<ProcessId>,
        volume: f64,
        plates: Vec<(PlateId, PlateId)>,
    },
    QuantificationManual {
        user: UserId,
        quantifications: Vec<(CompositionId, f64)>,
    },
    QuantificationPlate {
        user: UserId,
        plate: PlateId,
        concentrations: Vec<Vec<f64>>,
    },
    Normalization {
        user: UserId,
        quantification_process: ProcessId,
        water_lot: CompositionId,
    },
    Pooling {
        user: UserId,
        quantification_process: Option<ProcessId>,
        pool_name: String,
        volume: f64,
        inputs: Vec<PoolInput>,
        robot: Option<EquipmentId>,
    },
    Sequencing {
        user: UserId,
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub process: ProcessId,
    pub created_plate_ids: Vec<PlateId>,
    pub created_container_ids: Vec<ContainerId>,
    pub created_composition_ids: Vec<CompositionId>,
    pub warnings: Vec<String>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpRecord {
    pub op: ProcessOp,
    pub result: OpResult,
}

/// Deterministic workflow engine over a [`LabState`]. Each applied op is
/// one atomic unit: all writes land on a working copy that replaces the
/// committed state only when the whole op succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabEngine {
    state: LabState,
    journal: Vec<OpRecord>,
    op_counter: u64,
    today: NaiveDate,
}

impl Default for LabEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LabEngine {
    pub fn new() -> Self {
        Self::from_state(LabState::default())
    }

    pub fn from_state(state: LabState) -> Self {
        Self {
            state,
            journal: vec![],
            op_counter: 0,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Pins the date stamped onto newly created processes. Replays and
    /// tests use this; interactive use keeps the construction-time date.
    pub fn set_today(&mut self, today: NaiveDate) {
        self.today = today;
    }

    pub fn state(&self) -> &LabState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LabState {
        &mut self.state
    }

    pub fn operation_log(&self) -> &[OpRecord] {
        &self.journal
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    pub fn apply(&mut self, op: ProcessOp) -> Result<OpResult, LabError> {
        let op_id = self.next_op_id();
        // Working copy: a failure partway through a derivation leaves the
        // committed state exactly as it was.
        let mut tx = self.state.clone();
        let result = Self::apply_internal(&mut tx, self.today, op_id, &op)?;
        self.state = tx;
        self.journal.push(OpRecord {
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    /// The shared first step of every creation: write the generic process
    /// record (kind, date, performer) and hand back its id. Nothing
    /// kind-specific may be written before this.
    fn begin_process(
        state: &mut LabState,
        kind: ProcessKind,
        user: &UserId,
        today: NaiveDate,
    ) -> Result<ProcessId, LabError> {
        state.user(user)?;
        let id = state.next_process_id();
        state.processes.insert(
            id.clone(),
            ProcessRecord {
                id: id.clone(),
                kind,
                date: today,
                personnel: user.clone(),
                payload: None,
            },
        );
        Ok(id)
    }

    fn set_payload(
        state: &mut LabState,
        process: &ProcessId,
        payload: ProcessPayload,
    ) -> Result<(), LabError> {
        state
            .processes
            .get_mut(process)
            .ok_or_else(|| LabError {
                code: ErrorCode::Internal,
                message: format!("Process '{process}' vanished mid-creation"),
            })?
            .payload = Some(payload);
        Ok(())
    }

    fn expect_kind(
        state: &LabState,
        process: &ProcessId,
        kind: ProcessKind,
    ) -> Result<(), LabError> {
        let record = state.process(process)?;
        if record.kind != kind {
            return Err(LabError {
                code: ErrorCode::DomainValidation,
                message: format!(
                    "Process '{process}' is a '{}', expected a '{}'",
                    record.kind.label(),
                    kind.label()
                ),
            });
        }
        Ok(())
    }

    /// The composition held by the well at (row, column), refusing
    /// discarded vessels.
    fn composition_in_well(
        state: &LabState,
        plate: &Plate,
        row: usize,
        column: usize,
    ) -> Result<CompositionId, LabError> {
        let well_id = plate.well_at(row, column)?;
        let container = state.container(well_id)?;
        if container.discarded {
            return Err(LabError {
                code: ErrorCode::DomainValidation,
                message: format!(
                    "Well '{well_id}' on plate '{}' has been discarded",
                    plate.external_id
                ),
            });
        }
        container.composition.clone().ok_or_else(|| LabError {
            code: ErrorCode::DomainValidation,
            message: format!(
                "Well '{well_id}' on plate '{}' holds no composition",
                plate.external_id
            ),
        })
    }

    fn ensure_composition_usable(
        state: &LabState,
        composition: &CompositionId,
    ) -> Result<(), LabError> {
        let container_id = state.composition(composition)?.container.clone();
        if state.container(&container_id)?.discarded {
            return Err(LabError {
                code: ErrorCode::DomainValidation,
                message: format!(
                    "Composition '{composition}' sits in discarded container '{container_id}'"
                ),
            });
        }
        Ok(())
    }

    fn apply_internal(
        state: &mut LabState,
        today: NaiveDate,
        op_id: OpId,
        op: &ProcessOp,
    ) -> Result<OpResult, LabError> {
        let mut result = OpResult {
            op_id,
            process: String::new(),
            created_plate_ids: vec![],
            created_container_ids: vec![],
            created_composition_ids: vec![],
            warnings: vec![],
            messages: vec![],
        };

        match op {
            ProcessOp::SamplePlating {
                user,
                plate_configuration,
                external_plate_id,
                volume,
            } => {
                let process = Self::begin_process(state, ProcessKind::SamplePlating, user, today)?;
                result.process = process.clone();

                let volume = volume.unwrap_or(0.0);
                let plate_id = Plate::create(state, external_plate_id, *plate_configuration);
                result.created_plate_ids.push(plate_id.clone());

                // Fresh plates hold nothing but blanks.
                for (row, column) in iproduct!(
                    1..=plate_configuration.num_rows,
                    1..=plate_configuration.num_columns
                ) {
                    let well =
                        Container::create_well(state, &plate_id, &process, volume, row, column)?;
                    let composition = Composition::create_sample(state, &process, &well, volume)?;
                    result.created_container_ids.push(well);
                    result.created_composition_ids.push(composition);
                }
                result.messages.push(format!(
                    "Plated {}x{} blank wells on '{external_plate_id}'",
                    plate_configuration.num_rows, plate_configuration.num_columns
                ));
            }

            ProcessOp::ReagentCreation {
                user,
                external_id,
                volume,
                reagent_type,
            } => {
                let process =
                    Self::begin_process(state, ProcessKind::ReagentCreation, user, today)?;
                result.process = process.clone();

                let tube = Container::create_tube(state, &process, external_id, *volume);
                let composition = Composition::create_reagent(
                    state,
                    &process,
                    &tube,
                    *volume,
                    reagent_type,
                    external_id,
                )?;
                result.created_container_ids.push(tube);
                result.created_composition_ids.push(composition);
                result
                    .messages
                    .push(format!("Registered {reagent_type} lot '{external_id}'"));
            }

            ProcessOp::PrimerWorkingPlateCreation {
                user,
                master_set_order,
                template_plates,
                volume,
            } => {
                let process = Self::begin_process(
                    state,
                    ProcessKind::PrimerWorkingPlateCreation,
                    user,
                    today,
                )?;
                result.process = process.clone();
                Self::set_payload(
                    state,
                    &process,
                    ProcessPayload::PrimerWorkingPlateCreation {
                        master_set_order: master_set_order.clone(),
                    },
                )?;

                for template_id in template_plates {
                    let template = state.plate(template_id)?.clone();
                    let working_id = Plate::create(
                        state,
                        &format!("primers - {}", template.external_id),
                        template.configuration,
                    );
                    result.created_plate_ids.push(working_id.clone());

                    for (row, column) in iproduct!(
                        1..=template.configuration.num_rows,
                        1..=template.configuration.num_columns
                    ) {
                        let source = Self::composition_in_well(state, &template, row, column)?;
                        let well = Container::create_well(
                            state,
                            &working_id,
                            &process,
                            *volume,
                            row,
                            column,
                        )?;
                        let composition =
                            Composition::create_primer(state, &process, &well, *volume, &source)?;
                        result.created_container_ids.push(well);
                        result.created_composition_ids.push(composition);
                    }
                }
                result.messages.push(format!(
                    "Created {} primer working plate(s) for master set order '{master_set_order}'",
                    template_plates.len()
                ));
            }

            ProcessOp::GdnaExtraction {
                user,
                robot,
                tool,
                kit,
                plates,
                volume,
            } => {
                let process = Self::begin_process(state, ProcessKind::GdnaExtraction, user, today)?;
                result.process = process.clone();

                state.equipment_item(robot)?;
                state.equipment_item(tool)?;
                state.composition(kit)?;
                Self::set_payload(
                    state,
                    &process,
                    ProcessPayload::GdnaExtraction {
                        robot: robot.clone(),
                        tool: tool.clone(),
                        kit: kit.clone(),
                    },
                )?;

                for source_id in plates {
                    let source = state.plate(source_id)?.clone();
                    let gdna_plate_id = Plate::create(
                        state,
                        &format!("gdna - {}", source.external_id),
                        source.configuration,
                    );
                    result.created_plate_ids.push(gdna_plate_id.clone());

                    for (row, column) in iproduct!(
                        1..=source.configuration.num_rows,
                        1..=source.configuration.num_columns
                    ) {
                        let upstream = Self::composition_in_well(state, &source, row, column)?;
                        let well = Container::create_well(
                            state,
                            &gdna_plate_id,
                            &process,
                            *volume,
                            row,
                            column,
                        )?;
                        let composition =
                            Composition::create_gdna(state, &process, &well, *volume, &upstream)?;
                        result.created_container_ids.push(well);
                        result.created_composition_ids.push(composition);
                    }
                }
                result
                    .messages
                    .push(format!("Extracted {} plate(s)", plates.len()));
            }

            ProcessOp::LibraryPrepAmplicon {
                user,
                master_mix,
                water_lot,
                robot,
                tm300_tool,
                tm50_tool,
                volume,
                plates,
            } => {
                let process =
                    Self::begin_process(state, ProcessKind::LibraryPrepAmplicon, user, today)?;
                result.process = process.clone();

                state.composition(master_mix)?;
                state.composition(water_lot)?;
                state.equipment_item(robot)?;
                state.equipment_item(tm300_tool)?;
                state.equipment_item(tm50_tool)?;
                Self::set_payload(
                    state,
                    &process,
                    ProcessPayload::LibraryPrepAmplicon {
                        master_mix: master_mix.clone(),
                        water_lot: water_lot.clone(),
                        robot: robot.clone(),
                        tm300_tool: tm300_tool.clone(),
                        tm50_tool: tm50_tool.clone(),
                    },
                )?;

                Self::derive_library_plates(
                    state,
                    &process,
                    plates,
                    *volume,
                    "amplicon library",
                    &mut result,
                )?;
                result.messages.push(format!(
                    "Prepared {} amplicon library plate(s)",
                    plates.len()
                ));
            }

            ProcessOp::LibraryPrepShotgun {
                user,
                kit,
                stub_lot,
                robot,
                normalization_process,
                volume,
                plates,
            } => {
                let process =
                    Self::begin_process(state, ProcessKind::LibraryPrepShotgun, user, today)?;
                result.process = process.clone();

                state.composition(kit)?;
                state.composition(stub_lot)?;
                state.equipment_item(robot)?;
                if let Some(normalization) = normalization_process {
                    Self::expect_kind(state, normalization, ProcessKind::Normalization)?;
                }
                Self::set_payload(
                    state,
                    &process,
                    ProcessPayload::LibraryPrepShotgun {
                        kit: kit.clone(),
                        stub_lot: stub_lot.clone(),
                        robot: robot.clone(),
                        normalization_process: normalization_process.clone(),
                    },
                )?;

                Self::derive_library_plates(
                    state,
                    &process,
                    plates,
                    *volume,
                    "shotgun library",
                    &mut result,
                )?;
                result.messages.push(format!(
                    "Prepared {} shotgun library plate(s)",
                    plates.len()
                ));
            }

            ProcessOp::QuantificationManual {
                user,
                quantifications,
            } => {
                let process = Self::begin_process(state, ProcessKind::Quantification, user, today)?;
                result.process = process.clone();

                for (composition, concentration) in quantifications {
                    state.composition(composition)?;
                    state
                        .concentration_measurements
                        .push(ConcentrationMeasurement {
                            composition: composition.clone(),
                            process: process.clone(),
                            raw_concentration: *concentration,
                        });
                }
                result.messages.push(format!(
                    "Recorded {} concentration(s)",
                    quantifications.len()
                ));
            }

            ProcessOp::QuantificationPlate {
                user,
                plate,
                concentrations,
            } => {
                let process = Self::begin_process(state, ProcessKind::Quantification, user, today)?;
                result.process = process.clone();

                let plate = state.plate(plate)?.clone();
                let config = plate.configuration;
                // A matrix that does not match the plate geometry is an
                // instrument-export mixup; refuse it rather than zip-truncate.
                let shape_ok = concentrations.len() == config.num_rows
                    && concentrations.iter().all(|r| r.len() == config.num_columns);
                if !shape_ok {
                    return Err(LabError {
                        code: ErrorCode::DomainValidation,
                        message: format!(
                            "Concentration matrix does not match the {}x{} geometry of plate '{}'",
                            config.num_rows, config.num_columns, plate.external_id
                        ),
                    });
                }

                for (row, column) in iproduct!(1..=config.num_rows, 1..=config.num_columns) {
                    let composition = Self::composition_in_well(state, &plate, row, column)?;
                    state
                        .concentration_measurements
                        .push(ConcentrationMeasurement {
                            composition,
                            process: process.clone(),
                            raw_concentration: concentrations[row - 1][column - 1],
                        });
                }
                result.messages.push(format!(
                    "Quantified plate '{}' ({} wells)",
                    plate.external_id,
                    config.num_wells()
                ));
            }

            ProcessOp::Normalization {
                user,
                quantification_process,
                water_lot,
            } => {
                let process = Self::begin_process(state, ProcessKind::Normalization, user, today)?;
                result.process = process.clone();

                Self::expect_kind(state, quantification_process, ProcessKind::Quantification)?;
                state.composition(water_lot)?;
                Self::set_payload(
                    state,
                    &process,
                    ProcessPayload::Normalization {
                        quantification_process: quantification_process.clone(),
                        water_lot: water_lot.clone(),
                    },
                )?;
                result.messages.push(format!(
                    "Normalization informed by '{quantification_process}'"
                ));
            }

            ProcessOp::Pooling {
                user,
                quantification_process,
                pool_name,
                volume,
                inputs,
                robot,
            } => {
                let process = Self::begin_process(state, ProcessKind::Pooling, user, today)?;
                result.process = process.clone();

                if inputs.is_empty() {
                    return Err(LabError {
                        code: ErrorCode::DomainValidation,
                        message: "Pooling requires at least one input composition".to_string(),
                    });
                }
                if let Some(quantification) = quantification_process {
                    Self::expect_kind(state, quantification, ProcessKind::Quantification)?;
                }
                if let Some(robot) = robot {
                    state.equipment_item(robot)?;
                }
                Self::set_payload(
                    state,
                    &process,
                    ProcessPayload::Pooling {
                        quantification_process: quantification_process.clone(),
                        robot: robot.clone(),
                    },
                )?;

                let tube = Container::create_tube(state, &process, pool_name, *volume);
                let pool = Composition::create_pool(state, &process, &tube, *volume, pool_name)?;
                result.created_container_ids.push(tube);
                result.created_composition_ids.push(pool.clone());

                for input in inputs {
                    Self::ensure_composition_usable(state, &input.composition)?;
                    state.pool_components.push(PoolComponent {
                        pool: pool.clone(),
                        input: input.composition.clone(),
                        input_volume: input.input_volume,
                        percentage_of_output: input.percentage_of_output,
                    });
                }

                let percentage_sum: f64 =
                    inputs.iter().map(|input| input.percentage_of_output).sum();
                if (percentage_sum - 100.0).abs() > 0.01 {
                    result.warnings.push(format!(
                        "Pool component percentages sum to {percentage_sum}, not 100"
                    ));
                }
                result.messages.push(format!(
                    "Pooled {} input(s) into '{pool_name}'",
                    inputs.len()
                ));
            }

            ProcessOp::Sequencing {
                user,
                pool,
                run_name,
                sequencer,
                fwd_cycles,
                rev_cycles,
                assay,
                principal_investigator,
                contacts,
            } => {
                let process = Self::begin_process(state, ProcessKind::Sequencing, user, today)?;
                result.process = process.clone();

                if *fwd_cycles <= 0 {
                    return Err(LabError {
                        code: ErrorCode::DomainValidation,
                        message: format!("fwd_cycles must be > 0, got {fwd_cycles}"),
                    });
                }
                if *rev_cycles <= 0 {
                    return Err(LabError {
                        code: ErrorCode::DomainValidation,
                        message: format!("rev_cycles must be > 0, got {rev_cycles}"),
                    });
                }
                let pool_composition = state.composition(pool)?;
                if !matches!(pool_composition.detail, CompositionDetail::Pool { .. }) {
                    return Err(LabError {
                        code: ErrorCode::DomainValidation,
                        message: format!("Composition '{pool}' is not a pool"),
                    });
                }
                state.equipment_item(sequencer)?;
                state.user(principal_investigator)?;
                if contacts.is_empty() || contacts.len() > 3 {
                    return Err(LabError {
                        code: ErrorCode::DomainValidation,
                        message: format!(
                            "Sequencing requires between one and three contacts, got {}",
                            contacts.len()
                        ),
                    });
                }
                for contact in contacts {
                    state.user(contact)?;
                }

                Self::set_payload(
                    state,
                    &process,
                    ProcessPayload::Sequencing {
                        pool: pool.clone(),
                        run_name: run_name.clone(),
                        sequencer: sequencer.clone(),
                        fwd_cycles: *fwd_cycles,
                        rev_cycles: *rev_cycles,
                        assay: assay.clone(),
                        principal_investigator: principal_investigator.clone(),
                        contacts: contacts.clone(),
                    },
                )?;
                result
                    .messages
                    .push(format!("Scheduled run '{run_name}' for pool '{pool}'"));
            }
        }

        Ok(result)
    }

    /// Shared 1:1 geometric derivation for both library preps: each output
    /// well's composition records the sample well and the matching primer
    /// well at the same coordinates.
    fn derive_library_plates(
        state: &mut LabState,
        process: &ProcessId,
        plates: &[(PlateId, PlateId)],
        volume: f64,
        external_prefix: &str,
        result: &mut OpResult,
    ) -> Result<(), LabError> {
        for (gdna_plate_id, primer_plate_id) in plates {
            let gdna_plate = state.plate(gdna_plate_id)?.clone();
            let primer_plate = state.plate(primer_plate_id)?.clone();
            if gdna_plate.configuration != primer_plate.configuration {
                return Err(LabError {
                    code: ErrorCode::DomainValidation,
                    message: format!(
                        "Primer plate '{}' ({}x{}) does not match the {}x{} geometry of '{}'",
                        primer_plate.external_id,
                        primer_plate.configuration.num_rows,
                        primer_plate.configuration.num_columns,
                        gdna_plate.configuration.num_rows,
                        gdna_plate.configuration.num_columns,
                        gdna_plate.external_id
                    ),
                });
            }

            let library_plate_id = Plate::create(
                state,
                &format!("{external_prefix} - {}", gdna_plate.external_id),
                gdna_plate.configuration,
            );
            result.created_plate_ids.push(library_plate_id.clone());

            for (row, column) in iproduct!(
                1..=gdna_plate.configuration.num_rows,
                1..=gdna_plate.configuration.num_columns
            ) {
                let gdna = Self::composition_in_well(state, &gdna_plate, row, column)?;
                let primer = Self::composition_in_well(state, &primer_plate, row, column)?;
                let well =
                    Container::create_well(state, &library_plate_id, process, volume, row, column)?;
                let composition =
                    Composition::create_library(state, process, &well, volume, &gdna, &primer)?;
                result.created_container_ids.push(well);
                result.created_composition_ids.push(composition);
            }
        }
        Ok(())
    }

    /// Plating correction: rewrites the content of one sample well of a
    /// plating process's plate.
    pub fn update_well(
        &mut self,
        plating_process: &ProcessId,
        row: usize,
        column: usize,
        content: &str,
    ) -> Result<(), LabError> {
        Self::expect_kind(&self.state, plating_process, ProcessKind::SamplePlating)?;
        let plate_id = self
            .state
            .plates_touched(plating_process)
            .first()
            .cloned()
            .cloned()
            .ok_or_else(|| LabError {
                code: ErrorCode::Internal,
                message: format!("Plating process '{plating_process}' touched no plate"),
            })?;
        let plate = self.state.plate(&plate_id)?;
        let composition_id = Self::composition_in_well(&self.state, plate, row, column)?;
        let composition = self
            .state
            .compositions
            .get_mut(&composition_id)
            .ok_or_else(|| LabError {
                code: ErrorCode::NotFound,
                message: format!("Composition '{composition_id}' not found"),
            })?;
        match &mut composition.detail {
            CompositionDetail::Sample {
                content: well_content,
            } => {
                *well_content = content.to_string();
                Ok(())
            }
            _ => Err(LabError {
                code: ErrorCode::DomainValidation,
                message: format!("Composition '{composition_id}' is not a sample well"),
            }),
        }
    }

    /// Marks a container as discarded. Terminal: discarding twice is an
    /// error, as is any later derivation reading from the container.
    pub fn discard_container(&mut self, container: &ContainerId) -> Result<(), LabError> {
        let container = self
            .state
            .containers
            .get_mut(container)
            .ok_or_else(|| LabError {
                code: ErrorCode::NotFound,
                message: format!("Container '{container}' not found"),
            })?;
        if container.discarded {
            return Err(LabError {
                code: ErrorCode::DomainValidation,
                message: format!("Container '{}' is already discarded", container.id),
            });
        }
        container.discarded = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::BLANK;
    use crate::equipment::Equipment;
    use crate::process::resolve;
    use crate::user::User;

    fn base_engine() -> (LabEngine, UserId) {
        let mut engine = LabEngine::new();
        engine.set_today(NaiveDate::from_ymd_opt(2017, 5, 31).unwrap());
        let user = User::create(engine.state_mut(), "Test User", "test@lab.example");
        (engine, user)
    }

    fn plate_2x3(engine: &mut LabEngine, user: &UserId, external_id: &str) -> OpResult {
        engine
            .apply(ProcessOp::SamplePlating {
                user: user.clone(),
                plate_configuration: PlateConfiguration::new(2, 3),
                external_plate_id: external_id.to_string(),
                volume: Some(10.0),
            })
            .unwrap()
    }

    fn reagent(engine: &mut LabEngine, user: &UserId, lot: &str, kind: &str) -> CompositionId {
        engine
            .apply(ProcessOp::ReagentCreation {
                user: user.clone(),
                external_id: lot.to_string(),
                volume: 50.0,
                reagent_type: kind.to_string(),
            })
            .unwrap()
            .created_composition_ids[0]
            .clone()
    }

    fn extraction_setup(
        engine: &mut LabEngine,
        user: &UserId,
    ) -> (EquipmentId, EquipmentId, CompositionId) {
        let robot = Equipment::create(engine.state_mut(), "RB-1", "extraction robot");
        let tool = Equipment::create(engine.state_mut(), "TL-1", "tm1000-8");
        let kit = reagent(engine, user, "KIT-001", "extraction kit");
        (robot, tool, kit)
    }

    fn extract_plate(engine: &mut LabEngine, user: &UserId, source: &PlateId) -> OpResult {
        let (robot, tool, kit) = extraction_setup(engine, user);
        engine
            .apply(ProcessOp::GdnaExtraction {
                user: user.clone(),
                robot,
                tool,
                kit,
                plates: vec![source.clone()],
                volume: 10.0,
            })
            .unwrap()
    }

    #[test]
    fn test_sample_plating_creates_blank_wells() {
        let (mut engine, user) = base_engine();
        let res = plate_2x3(&mut engine, &user, "Test plate 1");

        assert_eq!(res.created_plate_ids.len(), 1);
        assert_eq!(res.created_container_ids.len(), 6);
        assert_eq!(res.created_composition_ids.len(), 6);

        let state = engine.state();
        for composition_id in &res.created_composition_ids {
            let composition = state.composition(composition_id).unwrap();
            assert_eq!(composition.volume, 10.0);
            assert_eq!(
                composition.detail,
                CompositionDetail::Sample {
                    content: BLANK.to_string()
                }
            );
            assert!(composition.upstream_compositions().is_empty());
            assert_eq!(composition.created_by, res.process);
        }
        let record = resolve(state, &res.process).unwrap();
        assert_eq!(record.kind, ProcessKind::SamplePlating);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2017, 5, 31).unwrap());
        assert_eq!(record.personnel, user);
    }

    #[test]
    fn test_resolve_reports_stored_kind_for_every_seeded_process() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        extract_plate(&mut engine, &user, &plating.created_plate_ids[0]);

        let state = engine.state();
        assert!(state.processes.len() >= 3);
        for (id, record) in &state.processes {
            assert_eq!(resolve(state, id).unwrap().kind, record.kind);
        }
    }

    #[test]
    fn test_gdna_extraction_derives_one_to_one() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let source_plate_id = plating.created_plate_ids[0].clone();
        let res = extract_plate(&mut engine, &user, &source_plate_id);

        let state = engine.state();
        let source = state.plate(&source_plate_id).unwrap();
        let gdna_plate = state.plate(&res.created_plate_ids[0]).unwrap();
        assert_eq!(gdna_plate.configuration, source.configuration);
        assert_eq!(gdna_plate.external_id, "gdna - Test plate 1");

        for (row, column) in iproduct!(1..=2usize, 1..=3usize) {
            let source_comp = state
                .container(source.well_at(row, column).unwrap())
                .unwrap()
                .composition
                .clone()
                .unwrap();
            let out_comp_id = state
                .container(gdna_plate.well_at(row, column).unwrap())
                .unwrap()
                .composition
                .clone()
                .unwrap();
            let out_comp = state.composition(&out_comp_id).unwrap();
            assert_eq!(
                out_comp.detail,
                CompositionDetail::Gdna {
                    source: source_comp
                }
            );
            assert_eq!(out_comp.created_by, res.process);
        }
    }

    #[test]
    fn test_extraction_from_discarded_well_fails_and_rolls_back() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        engine
            .discard_container(&plating.created_container_ids[4])
            .unwrap();

        let processes_before = engine.state().processes.len();
        let containers_before = engine.state().containers.len();
        let compositions_before = engine.state().compositions.len();
        let edges_before = engine.state().provenance.edges.len();

        let (robot, tool, kit) = extraction_setup(&mut engine, &user);
        let processes_after_setup = engine.state().processes.len();
        let err = engine
            .apply(ProcessOp::GdnaExtraction {
                user: user.clone(),
                robot,
                tool,
                kit,
                plates: vec![plating.created_plate_ids[0].clone()],
                volume: 10.0,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
        assert!(err.message.contains("discarded"));

        // Nothing from the failed op sticks, not even the generic record.
        assert_eq!(engine.state().processes.len(), processes_after_setup);
        assert_eq!(
            engine.state().containers.len(),
            containers_before + 1 // the kit tube from setup
        );
        assert_eq!(engine.state().compositions.len(), compositions_before + 1);
        assert_eq!(engine.state().provenance.edges.len(), edges_before + 1);
        assert!(processes_before < processes_after_setup);
    }

    #[test]
    fn test_library_prep_records_both_upstreams() {
        let (mut engine, user) = base_engine();
        let sample_plating = plate_2x3(&mut engine, &user, "Samples");
        let gdna = extract_plate(&mut engine, &user, &sample_plating.created_plate_ids[0]);
        let primer_template = plate_2x3(&mut engine, &user, "Primer template");
        let primers = engine
            .apply(ProcessOp::PrimerWorkingPlateCreation {
                user: user.clone(),
                master_set_order: "MS-7".to_string(),
                template_plates: vec![primer_template.created_plate_ids[0].clone()],
                volume: 10.0,
            })
            .unwrap();

        let master_mix = reagent(&mut engine, &user, "MM-1", "master mix");
        let water = reagent(&mut engine, &user, "W-1", "water");
        let robot = Equipment::create(engine.state_mut(), "RB-2", "processing robot");
        let tm300 = Equipment::create(engine.state_mut(), "TM-300", "tm300-8");
        let tm50 = Equipment::create(engine.state_mut(), "TM-50", "tm50-8");

        let res = engine
            .apply(ProcessOp::LibraryPrepAmplicon {
                user: user.clone(),
                master_mix,
                water_lot: water,
                robot,
                tm300_tool: tm300,
                tm50_tool: tm50,
                volume: 10.0,
                plates: vec![(
                    gdna.created_plate_ids[0].clone(),
                    primers.created_plate_ids[0].clone(),
                )],
            })
            .unwrap();

        let state = engine.state();
        let gdna_plate = state.plate(&gdna.created_plate_ids[0]).unwrap();
        let primer_plate = state.plate(&primers.created_plate_ids[0]).unwrap();
        let library_plate = state.plate(&res.created_plate_ids[0]).unwrap();
        assert_eq!(library_plate.configuration, gdna_plate.configuration);
        assert_eq!(library_plate.external_id, "amplicon library - gdna - Samples");

        for (row, column) in iproduct!(1..=2usize, 1..=3usize) {
            let expected_gdna = state
                .container(gdna_plate.well_at(row, column).unwrap())
                .unwrap()
                .composition
                .clone()
                .unwrap();
            let expected_primer = state
                .container(primer_plate.well_at(row, column).unwrap())
                .unwrap()
                .composition
                .clone()
                .unwrap();
            let library_comp_id = state
                .container(library_plate.well_at(row, column).unwrap())
                .unwrap()
                .composition
                .clone()
                .unwrap();
            let library_comp = state.composition(&library_comp_id).unwrap();
            assert_eq!(
                library_comp.detail,
                CompositionDetail::Library {
                    gdna: expected_gdna.clone(),
                    primer: expected_primer.clone(),
                }
            );
            assert_eq!(
                library_comp.upstream_compositions(),
                vec![&expected_gdna, &expected_primer]
            );
        }
    }

    #[test]
    fn test_library_prep_geometry_mismatch_fails() {
        let (mut engine, user) = base_engine();
        let gdna_plating = plate_2x3(&mut engine, &user, "Samples");
        let small = engine
            .apply(ProcessOp::SamplePlating {
                user: user.clone(),
                plate_configuration: PlateConfiguration::new(2, 2),
                external_plate_id: "Small primer plate".to_string(),
                volume: Some(10.0),
            })
            .unwrap();

        let master_mix = reagent(&mut engine, &user, "MM-1", "master mix");
        let water = reagent(&mut engine, &user, "W-1", "water");
        let robot = Equipment::create(engine.state_mut(), "RB-2", "processing robot");
        let tm300 = Equipment::create(engine.state_mut(), "TM-300", "tm300-8");
        let tm50 = Equipment::create(engine.state_mut(), "TM-50", "tm50-8");

        let err = engine
            .apply(ProcessOp::LibraryPrepAmplicon {
                user: user.clone(),
                master_mix,
                water_lot: water,
                robot,
                tm300_tool: tm300,
                tm50_tool: tm50,
                volume: 10.0,
                plates: vec![(
                    gdna_plating.created_plate_ids[0].clone(),
                    small.created_plate_ids[0].clone(),
                )],
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_quantification_manual_preserves_insertion_order() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");

        // Deliberately shuffled relative to creation order.
        let picks = [4usize, 0, 5, 2, 1, 3];
        let quantifications: Vec<(CompositionId, f64)> = picks
            .iter()
            .enumerate()
            .map(|(n, i)| {
                (
                    plating.created_composition_ids[*i].clone(),
                    (n as f64) * 1.5,
                )
            })
            .collect();

        let res = engine
            .apply(ProcessOp::QuantificationManual {
                user: user.clone(),
                quantifications: quantifications.clone(),
            })
            .unwrap();

        let read_back = engine.state().concentrations(&res.process);
        assert_eq!(read_back.len(), quantifications.len());
        for (got, expected) in read_back.iter().zip(quantifications.iter()) {
            assert_eq!(got.0, &expected.0);
            assert_eq!(got.1, expected.1);
        }
    }

    #[test]
    fn test_quantification_plate_maps_row_major() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let res = engine
            .apply(ProcessOp::QuantificationPlate {
                user: user.clone(),
                plate: plating.created_plate_ids[0].clone(),
                concentrations: vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            })
            .unwrap();

        let state = engine.state();
        let plate = state.plate(&plating.created_plate_ids[0]).unwrap();
        let measured = state.concentrations(&res.process);
        assert_eq!(measured.len(), 6);

        for (row, column) in iproduct!(1..=2usize, 1..=3usize) {
            let composition = state
                .container(plate.well_at(row, column).unwrap())
                .unwrap()
                .composition
                .clone()
                .unwrap();
            let expected = ((row - 1) * 3 + column) as f64;
            let got = measured
                .iter()
                .find(|(c, _)| **c == composition)
                .map(|(_, v)| *v)
                .unwrap();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_quantification_plate_dimension_mismatch_fails() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let processes_before = engine.state().processes.len();
        let measurements_before = engine.state().concentration_measurements.len();

        let err = engine
            .apply(ProcessOp::QuantificationPlate {
                user: user.clone(),
                plate: plating.created_plate_ids[0].clone(),
                concentrations: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
        assert!(err.message.contains("2x3"));

        assert_eq!(engine.state().processes.len(), processes_before);
        assert_eq!(
            engine.state().concentration_measurements.len(),
            measurements_before
        );
    }

    #[test]
    fn test_normalization_links_quantification() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let quant = engine
            .apply(ProcessOp::QuantificationManual {
                user: user.clone(),
                quantifications: vec![(plating.created_composition_ids[0].clone(), 1.5)],
            })
            .unwrap();
        let water = reagent(&mut engine, &user, "W-1", "water");

        let res = engine
            .apply(ProcessOp::Normalization {
                user: user.clone(),
                quantification_process: quant.process.clone(),
                water_lot: water.clone(),
            })
            .unwrap();
        let record = resolve(engine.state(), &res.process).unwrap();
        assert_eq!(
            record.payload,
            Some(ProcessPayload::Normalization {
                quantification_process: quant.process.clone(),
                water_lot: water,
            })
        );

        // Pointing a normalization at a non-quantification process fails.
        let water_2 = reagent(&mut engine, &user, "W-2", "water");
        let err = engine
            .apply(ProcessOp::Normalization {
                user: user.clone(),
                quantification_process: plating.process.clone(),
                water_lot: water_2,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
        assert!(err.message.contains("sample plating"));
    }

    #[test]
    fn test_pooling_records_components_once_each_in_order() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let a = plating.created_composition_ids[0].clone();
        let b = plating.created_composition_ids[1].clone();

        let res = engine
            .apply(ProcessOp::Pooling {
                user: user.clone(),
                quantification_process: None,
                pool_name: "Test pool".to_string(),
                volume: 100.0,
                inputs: vec![
                    PoolInput {
                        composition: a.clone(),
                        input_volume: 50.0,
                        percentage_of_output: 50.0,
                    },
                    PoolInput {
                        composition: b.clone(),
                        input_volume: 50.0,
                        percentage_of_output: 50.0,
                    },
                ],
                robot: None,
            })
            .unwrap();
        assert!(res.warnings.is_empty());

        let pool = res.created_composition_ids[0].clone();
        let components = engine.state().pool_components_of(&pool);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].input, a);
        assert_eq!(components[1].input, b);
        assert!(components.iter().all(|c| c.percentage_of_output == 50.0));

        let tube = engine.state().container(&res.created_container_ids[0]).unwrap();
        assert!(!tube.is_well());
    }

    #[test]
    fn test_pooling_warns_when_percentages_stray() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let res = engine
            .apply(ProcessOp::Pooling {
                user: user.clone(),
                quantification_process: None,
                pool_name: "Partial pool".to_string(),
                volume: 100.0,
                inputs: vec![PoolInput {
                    composition: plating.created_composition_ids[0].clone(),
                    input_volume: 50.0,
                    percentage_of_output: 80.0,
                }],
                robot: None,
            })
            .unwrap();
        assert_eq!(res.warnings.len(), 1);
        assert!(res.warnings[0].contains("80"));
    }

    #[test]
    fn test_pooling_requires_inputs() {
        let (mut engine, user) = base_engine();
        let err = engine
            .apply(ProcessOp::Pooling {
                user: user.clone(),
                quantification_process: None,
                pool_name: "Empty pool".to_string(),
                volume: 100.0,
                inputs: vec![],
                robot: None,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
    }

    fn sequencing_setup(
        engine: &mut LabEngine,
        user: &UserId,
    ) -> (CompositionId, EquipmentId, UserId) {
        let plating = plate_2x3(engine, user, "Test plate 1");
        let pool = engine
            .apply(ProcessOp::Pooling {
                user: user.clone(),
                quantification_process: None,
                pool_name: "Test pool".to_string(),
                volume: 100.0,
                inputs: vec![PoolInput {
                    composition: plating.created_composition_ids[0].clone(),
                    input_volume: 100.0,
                    percentage_of_output: 100.0,
                }],
                robot: None,
            })
            .unwrap()
            .created_composition_ids[0]
            .clone();
        let sequencer = Equipment::create(engine.state_mut(), "MiSeq-01", "miseq");
        let pi = User::create(engine.state_mut(), "P. Investigator", "pi@lab.example");
        (pool, sequencer, pi)
    }

    fn sequencing_op(
        user: &UserId,
        pool: &CompositionId,
        sequencer: &EquipmentId,
        pi: &UserId,
        fwd_cycles: i64,
        rev_cycles: i64,
    ) -> ProcessOp {
        ProcessOp::Sequencing {
            user: user.clone(),
            pool: pool.clone(),
            run_name: "Run 1".to_string(),
            sequencer: sequencer.clone(),
            fwd_cycles,
            rev_cycles,
            assay: "Kapa Hyper Plus".to_string(),
            principal_investigator: pi.clone(),
            contacts: vec![user.clone()],
        }
    }

    #[test]
    fn test_sequencing_validates_cycles() {
        let (mut engine, user) = base_engine();
        let (pool, sequencer, pi) = sequencing_setup(&mut engine, &user);

        for cycles in [0i64, -1] {
            let err = engine
                .apply(sequencing_op(&user, &pool, &sequencer, &pi, cycles, 151))
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::DomainValidation);
            assert!(err.message.contains("fwd_cycles"));

            let err = engine
                .apply(sequencing_op(&user, &pool, &sequencer, &pi, 151, cycles))
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::DomainValidation);
            assert!(err.message.contains("rev_cycles"));
        }

        let res = engine
            .apply(sequencing_op(&user, &pool, &sequencer, &pi, 1, 1))
            .unwrap();
        let record = resolve(engine.state(), &res.process).unwrap();
        assert_eq!(record.kind, ProcessKind::Sequencing);
    }

    #[test]
    fn test_sequencing_requires_one_to_three_contacts() {
        let (mut engine, user) = base_engine();
        let (pool, sequencer, pi) = sequencing_setup(&mut engine, &user);

        for contacts in [vec![], vec![user.clone(); 4]] {
            let err = engine
                .apply(ProcessOp::Sequencing {
                    user: user.clone(),
                    pool: pool.clone(),
                    run_name: "Run 1".to_string(),
                    sequencer: sequencer.clone(),
                    fwd_cycles: 151,
                    rev_cycles: 151,
                    assay: "Kapa Hyper Plus".to_string(),
                    principal_investigator: pi.clone(),
                    contacts,
                })
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::DomainValidation);
            assert!(err.message.contains("contacts"));
        }
    }

    #[test]
    fn test_sequencing_pool_must_be_pool_composition() {
        let (mut engine, user) = base_engine();
        let (_, sequencer, pi) = sequencing_setup(&mut engine, &user);
        let plating = plate_2x3(&mut engine, &user, "Another plate");
        let not_a_pool = plating.created_composition_ids[0].clone();

        let err = engine
            .apply(sequencing_op(&user, &not_a_pool, &sequencer, &pi, 151, 151))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
        assert!(err.message.contains("not a pool"));
    }

    #[test]
    fn test_update_well_rewrites_sample_content() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        engine
            .update_well(&plating.process, 1, 2, "1.SKB1.640202")
            .unwrap();

        let state = engine.state();
        let plate = state.plate(&plating.created_plate_ids[0]).unwrap();
        let composition_id = state
            .container(plate.well_at(1, 2).unwrap())
            .unwrap()
            .composition
            .clone()
            .unwrap();
        assert_eq!(
            state.composition(&composition_id).unwrap().detail,
            CompositionDetail::Sample {
                content: "1.SKB1.640202".to_string()
            }
        );

        // Only plating processes can correct wells.
        let quant = engine
            .apply(ProcessOp::QuantificationManual {
                user: user.clone(),
                quantifications: vec![(plating.created_composition_ids[0].clone(), 1.0)],
            })
            .unwrap();
        let err = engine.update_well(&quant.process, 1, 1, "x").unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
    }

    #[test]
    fn test_discard_container_is_terminal() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let well = plating.created_container_ids[0].clone();
        engine.discard_container(&well).unwrap();
        let err = engine.discard_container(&well).unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainValidation);
        assert!(err.message.contains("already discarded"));
    }

    #[test]
    fn test_latest_process_tracks_newest_touch() {
        let (mut engine, user) = base_engine();
        let plating = plate_2x3(&mut engine, &user, "Test plate 1");
        let well = plating.created_container_ids[0].clone();
        assert_eq!(
            engine.state().provenance.latest_process(&well),
            Some(&plating.process)
        );
        assert_eq!(
            engine.state().plates_touched(&plating.process),
            vec![&plating.created_plate_ids[0]]
        );
    }

    #[test]
    fn test_journal_records_applied_ops() {
        let (mut engine, user) = base_engine();
        plate_2x3(&mut engine, &user, "Test plate 1");
        plate_2x3(&mut engine, &user, "Test plate 2");

        let log = engine.operation_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].result.op_id, "op-1");
        assert_eq!(log[1].result.op_id, "op-2");
        assert!(matches!(log[0].op, ProcessOp::SamplePlating { .. }));
    }

    #[test]
    fn test_unknown_performer_is_not_found() {
        let mut engine = LabEngine::new();
        let err = engine
            .apply(ProcessOp::SamplePlating {
                user: "user-99".to_string(),
                plate_configuration: PlateConfiguration::new(2, 3),
                external_plate_id: "Test plate".to_string(),
                volume: None,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(engine.state().processes.is_empty());
        assert!(engine.operation_log().is_empty());
    }
}

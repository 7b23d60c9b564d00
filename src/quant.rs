use crate::error::{ErrorCode, LabError};

/// Parses a plate-reader export: a fitting-curve line (leading `Curve`
/// token) and blank lines are skipped, every other line is a
/// whitespace-delimited row of concentrations. No shape validation happens
/// here; callers needing per-well correspondence check dimensions
/// themselves.
pub fn parse_plate_reader(contents: &str) -> Result<Vec<Vec<f64>>, LabError> {
    let mut data = vec![];
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Curve") {
            continue;
        }
        let mut row = Vec::new();
        for token in line.split_whitespace() {
            let value = token.parse::<f64>().map_err(|_| LabError {
                code: ErrorCode::ParseError,
                message: format!("Non-numeric concentration value '{token}'"),
            })?;
            row.push(value);
        }
        data.push(row);
    }
    Ok(data)
}

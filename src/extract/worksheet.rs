//! Fixed-layout extraction of shear-stage measurement rows.
//!
//! The lab template places a two-level column header on worksheet rows 11
//! and 12 (0-based 10 and 11); the top level spans merged cells, so in a
//! delimited export only the first column of a span carries the label and
//! the rest are blank. Measurement data follows from row 13 down.

use std::io::Read;

use tracing::debug;

use super::{cell, read_grid, ExtractError};

/// Worksheet row index of the top-level column header.
const HEADER_TOP_ROW: usize = 10;
/// Worksheet row index of the sub-level column header.
const HEADER_SUB_ROW: usize = 11;
/// First data row.
const DATA_START_ROW: usize = 12;

/// The fixed measurement fields, in storage order.
pub const MEASUREMENT_COLUMNS: [&str; 8] = [
    "time_start_of_stage",
    "shear_induced_pwp",
    "axial_strain",
    "vol_strain",
    "induced_pwp",
    "p",
    "q",
    "e",
];

/// Header pairs (top level, sub level) identifying each measurement column.
const HEADER_PAIRS: [(&str, &str); 8] = [
    ("Time start of stage", "(Sec)"),
    ("Shear induced PWP", ""),
    ("Shear induced PWP", "Axial strain"),
    ("Shear induced PWP", "Vol strain"),
    ("Shear induced PWP", "Induced PWP"),
    ("Shear induced PWP", "p'"),
    ("Shear induced PWP", "q"),
    ("Shear induced PWP", "e"),
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorksheetRow {
    pub time_start_of_stage: String,
    pub shear_induced_pwp: String,
    pub axial_strain: String,
    pub vol_strain: String,
    pub induced_pwp: String,
    pub p: String,
    pub q: String,
    pub e: String,
}

/// Extract the measurement table from a delimited worksheet export.
pub fn extract_rows<R: Read>(reader: R, delimiter: u8) -> Result<Vec<WorksheetRow>, ExtractError> {
    let grid = read_grid(reader, delimiter)?;

    if grid.len() <= DATA_START_ROW {
        return Err(ExtractError::Layout(format!(
            "expected header rows at {} and {}, found only {} rows",
            HEADER_TOP_ROW + 1,
            HEADER_SUB_ROW + 1,
            grid.len()
        )));
    }

    let column_indexes = locate_columns(&grid)?;

    let mut rows = Vec::new();
    for row_index in DATA_START_ROW..grid.len() {
        let mut values: Vec<String> = column_indexes
            .iter()
            .map(|&col| cell(&grid, row_index, col).trim().to_string())
            .collect();
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }

        // Sensor drift can report slightly negative axial strain at the
        // start of a stage; the template treats those readings as zero.
        if let Ok(strain) = values[2].parse::<f64>() {
            if strain < 0.0 {
                values[2] = "0".to_string();
            }
        }

        let mut drained = values.drain(..);
        rows.push(WorksheetRow {
            time_start_of_stage: drained.next().unwrap_or_default(),
            shear_induced_pwp: drained.next().unwrap_or_default(),
            axial_strain: drained.next().unwrap_or_default(),
            vol_strain: drained.next().unwrap_or_default(),
            induced_pwp: drained.next().unwrap_or_default(),
            p: drained.next().unwrap_or_default(),
            q: drained.next().unwrap_or_default(),
            e: drained.next().unwrap_or_default(),
        });
    }

    if rows.is_empty() {
        return Err(ExtractError::Empty);
    }

    debug!(rows = rows.len(), "extracted measurement rows");
    Ok(rows)
}

/// Resolve the worksheet column index of each measurement field from the
/// two header rows. The top row is forward-filled across merged spans
/// before matching.
fn locate_columns(grid: &[Vec<String>]) -> Result<[usize; 8], ExtractError> {
    let top_row = &grid[HEADER_TOP_ROW];
    let sub_row = &grid[HEADER_SUB_ROW];
    let width = top_row.len().max(sub_row.len());

    let mut top_filled: Vec<String> = Vec::with_capacity(width);
    let mut last = String::new();
    for col in 0..width {
        let value = cell(grid, HEADER_TOP_ROW, col).trim();
        if !value.is_empty() {
            last = value.to_string();
        }
        top_filled.push(last.clone());
    }

    let mut indexes = [usize::MAX; 8];
    for col in 0..width {
        let top = top_filled[col].as_str();
        let sub = cell(grid, HEADER_SUB_ROW, col).trim();
        for (field, (want_top, want_sub)) in HEADER_PAIRS.iter().enumerate() {
            if indexes[field] == usize::MAX && top == *want_top && sub == *want_sub {
                indexes[field] = col;
            }
        }
    }

    for (field, &index) in indexes.iter().enumerate() {
        if index == usize::MAX {
            let (top, sub) = HEADER_PAIRS[field];
            return Err(ExtractError::Layout(format!(
                "missing measurement column '{}' / '{}'",
                top,
                if sub.is_empty() { "(value)" } else { sub }
            )));
        }
    }

    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_csv(data_rows: &[&str]) -> String {
        let mut lines: Vec<String> = (0..HEADER_TOP_ROW).map(|_| ",,,,,,,,".to_string()).collect();
        lines.push("Stage,Time start of stage ,Shear induced PWP,,,,,,".to_string());
        lines.push(",(Sec),,Axial strain,Vol strain,Induced PWP,p',q,e".to_string());
        for row in data_rows {
            lines.push(row.to_string());
        }
        lines.join("\n")
    }

    #[test]
    fn extracts_fixed_columns_from_template_layout() {
        let csv = template_csv(&[
            "1,0,0.00,0.01,0.02,0.03,120.5,60.2,0.82",
            "1,10,0.05,0.02,0.03,0.04,119.8,61.0,0.81",
        ]);

        let rows = extract_rows(csv.as_bytes(), b',').unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time_start_of_stage, "0");
        assert_eq!(rows[0].p, "120.5");
        assert_eq!(rows[1].q, "61.0");
        assert_eq!(rows[1].e, "0.81");
    }

    #[test]
    fn clamps_negative_axial_strain_to_zero() {
        let csv = template_csv(&["1,0,0.00,-0.004,0.02,0.03,120.5,60.2,0.82"]);
        let rows = extract_rows(csv.as_bytes(), b',').unwrap();
        assert_eq!(rows[0].axial_strain, "0");
    }

    #[test]
    fn skips_blank_trailing_rows() {
        let csv = template_csv(&["1,0,0.00,0.01,0.02,0.03,120.5,60.2,0.82", ",,,,,,,,"]);
        let rows = extract_rows(csv.as_bytes(), b',').unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn missing_header_column_is_a_layout_error() {
        let mut lines: Vec<String> = (0..HEADER_TOP_ROW).map(|_| ",,,,".to_string()).collect();
        lines.push("Stage,Time start of stage ,Totally different,,".to_string());
        lines.push(",(Sec),,Axial strain,".to_string());
        lines.push("1,0,0.1,0.2,".to_string());

        let err = extract_rows(lines.join("\n").as_bytes(), b',').unwrap_err();
        assert!(matches!(err, ExtractError::Layout(_)));
    }

    #[test]
    fn short_file_is_a_layout_error() {
        let err = extract_rows("a,b,c\n1,2,3\n".as_bytes(), b',').unwrap_err();
        assert!(matches!(err, ExtractError::Layout(_)));
    }

    #[test]
    fn header_only_file_is_empty() {
        let csv = template_csv(&[]);
        let err = extract_rows(csv.as_bytes(), b',').unwrap_err();
        assert!(matches!(err, ExtractError::Layout(_) | ExtractError::Empty));
    }
}

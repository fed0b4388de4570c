//! Instance-metadata block scanning.
//!
//! Test workbooks carry a block of categorical attributes (drainage,
//! shearing, anisotropy, ...) whose position varies between template
//! revisions, so rather than a fixed cell range the scanner looks for the
//! `Drainage` marker with `Shearing` directly beneath it and reads
//! name/value pairs downward from there. An adjacent third column may carry
//! the anisotropy magnitude.

use std::io::Read;

use indexmap::IndexMap;
use tracing::debug;

use super::{cell, read_grid};

/// Scan a delimited worksheet export for the instance block. Extraction is
/// best effort: any failure yields an empty map, never an error, because
/// missing metadata must not sink the row data of an upload.
pub fn find_instances<R: Read>(reader: R, delimiter: u8) -> IndexMap<String, String> {
    let grid = match read_grid(reader, delimiter) {
        Ok(grid) => grid,
        Err(err) => {
            debug!("instance extraction failed: {err}");
            return IndexMap::new();
        }
    };

    for (row_index, row) in grid.iter().enumerate() {
        for col_index in 0..row.len() {
            if cell(&grid, row_index, col_index).trim() != "Drainage" {
                continue;
            }
            if cell(&grid, row_index + 1, col_index).trim() != "Shearing" {
                continue;
            }
            return read_block(&grid, row_index, col_index);
        }
    }

    debug!("no instance block found");
    IndexMap::new()
}

/// Read (name, value) pairs downward from the block marker until the first
/// blank name cell.
fn read_block(grid: &[Vec<String>], start_row: usize, col: usize) -> IndexMap<String, String> {
    let mut instances = IndexMap::new();

    for row in start_row..grid.len() {
        let name = cell(grid, row, col).trim();
        if name.is_empty() {
            break;
        }
        let value = cell(grid, row, col + 1).trim();
        if !value.is_empty() {
            instances.insert(normalize_name(name), value.to_string());
        }

        // The anisotropy row carries its magnitude one further column over.
        let magnitude = cell(grid, row, col + 2).trim();
        if !magnitude.is_empty() {
            instances.insert("anisotropy_value".to_string(), magnitude.to_string());
        }
    }

    debug!(count = instances.len(), "extracted instance block");
    instances
}

/// Attribute names are stored lowercase, with two template quirks: `PSD`
/// keeps its capitals and the consolidation label drops its range suffix.
fn normalize_name(name: &str) -> String {
    if name == "PSD" {
        return name.to_string();
    }
    if name.starts_with("Consolidation") {
        return "consolidation".to_string();
    }
    name.to_lowercase()
}

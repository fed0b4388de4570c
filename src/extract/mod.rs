//! Extraction of measurement rows and instance metadata from delimited
//! worksheet exports of the lab test template.

pub mod instances;
pub mod worksheet;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read worksheet: {0}")]
    Csv(#[from] csv::Error),

    #[error("unexpected worksheet layout: {0}")]
    Layout(String),

    #[error("worksheet contains no data rows")]
    Empty,
}

/// Delimiter for a worksheet export, decided by file extension.
pub fn delimiter_for(filename: &str) -> u8 {
    match filename.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "tsv" => b'\t',
        _ => b',',
    }
}

/// Parse a delimited export into a cell grid. Rows in these exports have
/// ragged lengths, so the reader runs in flexible mode.
pub(crate) fn read_grid<R: std::io::Read>(
    reader: R,
    delimiter: u8,
) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut grid = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        grid.push(record.iter().map(|cell| cell.to_string()).collect());
    }
    Ok(grid)
}

pub(crate) fn cell(grid: &[Vec<String>], row: usize, col: usize) -> &str {
    grid.get(row)
        .and_then(|r| r.get(col))
        .map(String::as_str)
        .unwrap_or("")
}

//! XLS/XLSX extraction via calamine. First sheet only, by declared
//! sheet order, so multi-sheet workbooks stay deterministic.

use std::io::Cursor;

use calamine::{Data, Reader};
use tracing::debug;

use crate::error::{ExtractError, ExtractResult};
use crate::extract::tabular::{extract_rows, TabularReport};
use crate::records::Category;

/// Render a cell the way the tabular analysis expects: dates as ISO,
/// numbers as plain decimals.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_iso(dt.as_f64()),
        Data::DateTimeIso(s) => s.split('T').next().unwrap_or(s).to_string(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

/// Excel serial day number to an ISO date string. Serial 1 is
/// 1900-01-01, with the 1900 leap-year bug baked into the epoch.
fn excel_serial_to_iso(serial: f64) -> String {
    let days = serial.trunc() as i64;
    let epoch = chrono::NaiveDate::from_ymd_opt(1899, 12, 30).expect("static date");
    match epoch.checked_add_days(chrono::Days::new(days.max(0) as u64)) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

/// Parse spreadsheet bytes: header row plus data rows from the first
/// sheet, fed through the shared tabular analysis.
pub fn extract_sheet(
    bytes: &[u8],
    source_url: &str,
    category: Category,
) -> ExtractResult<TabularReport> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook =
        calamine::open_workbook_auto_from_rs(cursor).map_err(|e| ExtractError::Parse {
            stage: "sheet-open",
            message: e.to_string(),
        })?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ExtractError::Parse {
            stage: "sheet-open",
            message: "workbook has no sheets".to_string(),
        })?;
    debug!(sheet = %sheet_name, "reading first worksheet");

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ExtractError::Parse {
            stage: "sheet-range",
            message: e.to_string(),
        })?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| ExtractError::Parse {
            stage: "sheet-range",
            message: "sheet is empty".to_string(),
        })?
        .iter()
        .map(cell_to_string)
        .collect();

    let data_rows = rows.map(|row| row.iter().map(cell_to_string).collect::<Vec<String>>());
    Ok(extract_rows(&headers, data_rows, source_url, category))
}

use calamine::{open_workbook_auto, Reader, Sheets};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::ServiceError;

/// Reads `.xlsx` / `.xls` workbooks as rows of display strings.
pub struct ExcelReader {
    workbook: Sheets<BufReader<File>>,
}

impl ExcelReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let workbook = open_workbook_auto(path).map_err(|e| {
            ServiceError::Spreadsheet(format!(
                "Failed to open workbook {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self { workbook })
    }

    /// All rows of the first worksheet, header row included.
    pub fn first_sheet_rows(&mut self) -> Result<Vec<Vec<String>>, ServiceError> {
        let range = self
            .workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ServiceError::Spreadsheet("Workbook contains no sheets".into()))?
            .map_err(|e| ServiceError::Spreadsheet(format!("Failed to read first sheet: {}", e)))?;

        Ok(range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect())
    }
}

//! Tabular uploads: parsing and CSV export.

use crate::core::error::AppError;
use serde::Serialize;
use std::path::Path;

pub const REPORT_FILE_NAME: &str = "processed_data.csv";
pub const REPORT_MIME: &str = "text/csv";

/// ZIP local file header, which every `.xlsx` file starts with.
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Csv,
    Spreadsheet,
}

impl UploadKind {
    pub fn from_filename(filename: &str) -> Result<UploadKind, AppError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("csv") => Ok(UploadKind::Csv),
            Some("xlsx") => Ok(UploadKind::Spreadsheet),
            _ => Err(AppError::InputFormat(format!(
                "{filename:?} is not a .csv or .xlsx file"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Parses an upload after checking its declared type.
    pub fn from_upload(filename: &str, bytes: &[u8]) -> Result<Table, AppError> {
        match UploadKind::from_filename(filename)? {
            UploadKind::Csv => Table::from_csv(bytes),
            // TODO: read .xlsx workbooks once a spreadsheet reader is part of the stack.
            UploadKind::Spreadsheet => Err(AppError::InputFormat(
                "spreadsheet uploads are not supported; export the sheet as CSV".to_owned(),
            )),
        }
    }

    pub fn from_csv(bytes: &[u8]) -> Result<Table, AppError> {
        if bytes.starts_with(ZIP_SIGNATURE) {
            return Err(AppError::InputFormat(
                "file looks like a spreadsheet archive, not CSV".to_owned(),
            ));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(AppError::InputFormat("CSV file has no header row".to_owned()));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_owned).collect());
        }

        Ok(Table { headers, rows })
    }

    /// Header plus rows in their original order. No index column is added.
    pub fn to_csv(&self) -> Result<Vec<u8>, AppError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }

        writer
            .into_inner()
            .map_err(|e| AppError::InputFormat(e.to_string()))
    }
}

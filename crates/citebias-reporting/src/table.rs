//! In-memory tables with an explicit column order, and their CSV/JSON forms.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use indexmap::IndexSet;
use serde_json::{Map, Value};

use citebias_core::{FieldValue, Record};

use crate::ReportingError;

/// Rows plus the column order they are written in.
///
/// Rows may carry fields outside `columns`; those are not written. Columns a
/// row lacks are written as empty cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_records(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self { columns, rows }
    }

    /// Columns are the union of the rows' field names, in first-seen order.
    pub fn from_rows(rows: Vec<Record>) -> Self {
        let columns: IndexSet<String> = rows
            .iter()
            .flat_map(|r| r.field_names().map(str::to_string))
            .collect();
        Self {
            columns: columns.into_iter().collect(),
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Record] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: Record) {
        self.rows.push(row);
    }

    /// Set `name` on every row from `value`, appending the column if new.
    pub fn with_column<F>(&mut self, name: &str, mut value: F)
    where
        F: FnMut(&Record) -> FieldValue,
    {
        for row in &mut self.rows {
            let v = value(row);
            row.insert(name, v);
        }
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
    }

    /// Text of every row's `column`, empty for missing cells.
    pub fn column_text<'a>(&'a self, column: &'a str) -> impl Iterator<Item = String> + 'a {
        self.rows
            .iter()
            .map(move |r| r.get(column).map(|v| v.render().into_owned()).unwrap_or_default())
    }

    // ── CSV ──

    pub fn read_csv(path: &Path) -> Result<Self, ReportingError> {
        let file = File::open(path).map_err(|e| ReportingError::io(path, e))?;
        let table = Self::from_reader(file)?;
        tracing::debug!(path = %path.display(), rows = table.len(), "read table");
        Ok(table)
    }

    /// Parse CSV with a header row. Every cell is read as text; empty cells
    /// and cells missing from short rows become [`FieldValue::Null`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReportingError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let columns: Vec<String> = csv.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for result in csv.records() {
            let record = result?;
            let row = columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let value = match record.get(i) {
                        Some(cell) if !cell.is_empty() => FieldValue::Text(cell.to_string()),
                        _ => FieldValue::Null,
                    };
                    (col.clone(), value)
                })
                .collect();
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), ReportingError> {
        let file = File::create(path).map_err(|e| ReportingError::io(path, e))?;
        self.to_writer(BufWriter::new(file))?;
        tracing::info!(path = %path.display(), rows = self.len(), "wrote CSV");
        Ok(())
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), ReportingError> {
        let mut out = RowWriter::from_writer(writer, self.columns.clone(), true)?;
        for row in &self.rows {
            out.write_row(row)?;
        }
        out.flush()
    }

    // ── JSON ──

    /// Write an array of objects, keys in column order.
    pub fn write_json(&self, path: &Path) -> Result<(), ReportingError> {
        let file = File::create(path).map_err(|e| ReportingError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.to_json())?;
        writer.flush().map_err(|e| ReportingError::io(path, e))?;
        tracing::info!(path = %path.display(), rows = self.len(), "wrote JSON");
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object: Map<String, Value> = self
                        .columns
                        .iter()
                        .map(|col| {
                            let value = row.get(col).map(FieldValue::to_json).unwrap_or(Value::Null);
                            (col.clone(), value)
                        })
                        .collect();
                    Value::Object(object)
                })
                .collect(),
        )
    }
}

/// Writes rows one at a time, flushing after each so an interrupted run
/// keeps everything written so far.
pub struct RowWriter<W: Write> {
    csv: csv::Writer<W>,
    columns: Vec<String>,
}

impl RowWriter<File> {
    /// Start a fresh file with a header row.
    pub fn create(path: &Path, columns: Vec<String>) -> Result<Self, ReportingError> {
        let file = File::create(path).map_err(|e| ReportingError::io(path, e))?;
        RowWriter::from_writer(file, columns, true)
    }

    /// Continue an existing file, keeping its header; creates it if missing
    /// or empty.
    pub fn append(path: &Path, columns: Vec<String>) -> Result<Self, ReportingError> {
        let existing = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        if !existing {
            return Self::create(path, columns);
        }

        let header = Table::read_csv(path)?.columns;
        if header != columns {
            tracing::warn!(
                path = %path.display(),
                "existing header differs from requested columns, keeping existing"
            );
        }
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| ReportingError::io(path, e))?;
        RowWriter::from_writer(file, header, false)
    }
}

impl<W: Write> RowWriter<W> {
    pub fn from_writer(
        writer: W,
        columns: Vec<String>,
        write_header: bool,
    ) -> Result<Self, ReportingError> {
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        if write_header {
            csv.write_record(&columns)?;
        }
        Ok(Self { csv, columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn write_row(&mut self, row: &Record) -> Result<(), ReportingError> {
        self.csv.write_record(
            self.columns
                .iter()
                .map(|col| row.get(col).map(|v| v.render()).unwrap_or_default().into_owned()),
        )?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<(), ReportingError> {
        self.csv
            .flush()
            .map_err(|e| ReportingError::Csv(csv::Error::from(e)))
    }
}

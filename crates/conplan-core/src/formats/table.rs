//! Generic delimited tables.
//!
//! Optimizer files routinely carry columns the engine never interprets
//! (costs, coordinates, penalty columns). `Table` keeps every cell as text
//! so those columns survive a read/modify/write cycle untouched.

use crate::{ConplanError, UnitId};
use std::io::Write;
use std::path::Path;

/// Pick `\t` when the header line is tab separated, `,` otherwise.
#[must_use]
pub fn detect_delimiter(text: &str) -> u8 {
    let first = text.lines().next().unwrap_or_default();
    if first.contains('\t') && !first.contains(',') {
        b'\t'
    } else {
        b','
    }
}

/// A header row plus string records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    /// Column names.
    pub headers: Vec<String>,
    /// Records; every record has `headers.len()` cells.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Create an empty table with the given columns.
    #[must_use]
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Parse a comma or tab separated table.
    pub fn parse(text: &str) -> Result<Self, ConplanError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(detect_delimiter(text))
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    /// Read a table from a file.
    pub fn read_path(path: impl AsRef<Path>) -> Result<Self, ConplanError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConplanError::Io(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Write the table as comma separated values.
    pub fn write_to(&self, writer: impl Write) -> Result<(), ConplanError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write the table to a file.
    pub fn write_path(&self, path: impl AsRef<Path>) -> Result<(), ConplanError> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_to(file)
    }

    /// Position of a column, case-insensitive.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    }

    /// Position of a column or a `Format` error naming the expected columns.
    pub fn require_column(&self, name: &str) -> Result<usize, ConplanError> {
        self.column(name).ok_or_else(|| {
            ConplanError::Format(format!(
                "Expected column '{}' but found: {}",
                name,
                self.headers.join(", ")
            ))
        })
    }

    /// Append a column filled with `fill`, returning its position.
    pub fn push_column(&mut self, name: impl Into<String>, fill: &str) -> usize {
        self.headers.push(name.into());
        for row in &mut self.rows {
            row.push(fill.to_string());
        }
        self.headers.len() - 1
    }

    /// Append a record keyed by column name; absent columns get `fill` and
    /// unknown names create new columns.
    pub fn push_named(&mut self, cells: &[(&str, String)], fill: &str) {
        for (name, _) in cells {
            if self.column(name).is_none() {
                self.push_column(*name, fill);
            }
        }
        let mut row = vec![fill.to_string(); self.headers.len()];
        for (name, value) in cells {
            if let Some(idx) = self.column(name) {
                row[idx] = value.clone();
            }
        }
        self.rows.push(row);
    }

    /// Parse a column as unit ids.
    pub fn unit_ids(&self, column: usize) -> Result<Vec<UnitId>, ConplanError> {
        self.rows
            .iter()
            .map(|row| {
                row.get(column)
                    .map(String::as_str)
                    .unwrap_or_default()
                    .parse()
            })
            .collect()
    }

    /// Parse a column as numbers.
    pub fn numbers(&self, column: usize) -> Result<Vec<f64>, ConplanError> {
        self.rows
            .iter()
            .enumerate()
            .map(|(line, row)| {
                let cell = row.get(column).map(String::as_str).unwrap_or_default();
                cell.parse::<f64>().map_err(|_| {
                    ConplanError::Format(format!(
                        "Row {}: '{}' in column '{}' is not a number",
                        line + 2,
                        cell,
                        self.headers.get(column).map(String::as_str).unwrap_or("?")
                    ))
                })
            })
            .collect()
    }
}

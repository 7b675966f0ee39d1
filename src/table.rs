//! CSV track table: load records, write results back to a sibling file.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::errors::TableError;

pub const TITLE_COLUMN: &str = "Track Name";
pub const CREATOR_COLUMN: &str = "Artist Name(s)";
pub const LINK_COLUMN: &str = "YouTube Link";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const LINK_PREFIX: &str = "http";

/// One unit of work: a title/artist pair and its (possibly empty) link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub title: String,
    pub creator: String,
    pub result: String,
}

impl Record {
    #[cfg(test)]
    pub fn new(title: &str, creator: &str, result: &str) -> Self {
        Self {
            title: title.to_string(),
            creator: creator.to_string(),
            result: result.to_string(),
        }
    }

    /// True when the row already carries a link and never needs a search.
    pub fn has_link(&self) -> bool {
        self.result.starts_with(LINK_PREFIX)
    }
}

/// Blank cells and spreadsheet `nan` markers both count as missing.
pub fn is_missing_value(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan")
}

/// `<dir>/<stem><suffix>.<ext>` next to the input.
pub fn output_path_for(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    input.with_file_name(format!("{stem}{suffix}.{extension}"))
}

/// Full table contents. Columns other than title/artist/link pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    title_column: usize,
    creator_column: usize,
    link_column: usize,
}

impl RecordTable {
    pub fn load(path: &Path) -> Result<Self, TableError> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let mut headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|header| header.trim_start_matches('\u{feff}').to_string())
            .collect();

        let title_column = column_index(&headers, TITLE_COLUMN)
            .ok_or(TableError::MissingColumn(TITLE_COLUMN))?;
        let creator_column = column_index(&headers, CREATOR_COLUMN)
            .ok_or(TableError::MissingColumn(CREATOR_COLUMN))?;
        let source_width = headers.len();
        let link_column = match column_index(&headers, LINK_COLUMN) {
            Some(index) => index,
            None => {
                headers.push(LINK_COLUMN.to_string());
                headers.len() - 1
            }
        };

        let mut rows = Vec::new();
        for row in csv_reader.records() {
            let row = row?;
            if row.len() > source_width {
                return Err(TableError::RowTooLong {
                    line: row.position().map_or(0, |position| position.line()),
                    expected: source_width,
                    found: row.len(),
                });
            }
            let mut cells: Vec<String> = row.iter().map(str::to_string).collect();
            cells.resize(headers.len(), String::new());
            rows.push(cells);
        }

        Ok(Self {
            headers,
            rows,
            title_column,
            creator_column,
            link_column,
        })
    }

    /// Builds a three-column table from bare records.
    #[cfg(test)]
    pub fn from_records(records: &[Record]) -> Self {
        Self {
            headers: vec![
                TITLE_COLUMN.to_string(),
                CREATOR_COLUMN.to_string(),
                LINK_COLUMN.to_string(),
            ],
            rows: records
                .iter()
                .map(|record| {
                    vec![
                        record.title.clone(),
                        record.creator.clone(),
                        record.result.clone(),
                    ]
                })
                .collect(),
            title_column: 0,
            creator_column: 1,
            link_column: 2,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| Record {
                title: row[self.title_column].trim().to_string(),
                creator: row[self.creator_column].trim().to_string(),
                result: row[self.link_column].clone(),
            })
            .collect()
    }

    /// Copies each record's link back into its row. Row order is unchanged.
    pub fn apply_results(&mut self, records: &[Record]) {
        for (row, record) in self.rows.iter_mut().zip(records) {
            row[self.link_column] = record.result.clone();
        }
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), TableError> {
        writer.write_all(UTF8_BOM)?;
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        self.write_to(File::create(path)?)
    }
}

fn column_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

//! Tabular sources and the text synthesized from them for embedding.
//!
//! A source is a set of named sheets, each with a header row and data rows.
//! Every sheet yields one [`SheetDescriptor`] per column group and one
//! [`RowRecord`] per non-empty row (or per group of rows).

pub mod csv_source;

pub use csv_source::CsvSource;

use crate::types::{Result, RowRecord, SheetDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lazily produced rows of a source.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<RowRecord>> + Send + 'a>;

/// Anything the knowledge base can be rebuilt from.
pub trait TabularSource: Send + Sync {
    /// Sheet names in build order.
    fn sheet_names(&self) -> Vec<String>;

    /// Schema descriptors for every sheet.
    fn descriptors(&self) -> Result<Vec<SheetDescriptor>>;

    /// All rows of all sheets, streamed.
    fn rows(&self) -> Result<RowStream<'_>>;
}

/// How sheets are turned into embeddable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Columns per structure descriptor; wider sheets get several.
    pub columns_per_descriptor: usize,
    /// Example values listed per column in a descriptor.
    pub sample_rows: usize,
    /// Consecutive rows merged into one content record.
    pub rows_per_record: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            columns_per_descriptor: 12,
            sample_rows: 3,
            rows_per_record: 1,
        }
    }
}

/// Header names with blanks replaced by `column_N` (1-based).
pub fn normalize_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() {
                format!("column_{}", i + 1)
            } else {
                h.to_string()
            }
        })
        .collect()
}

/// Structure descriptors for one sheet.
///
/// `samples` holds the first few data rows, used for example values.
pub fn describe_sheet(
    sheet: &str,
    headers: &[String],
    samples: &[Vec<String>],
    settings: &IngestSettings,
) -> Vec<SheetDescriptor> {
    let per = settings.columns_per_descriptor.max(1);
    if headers.is_empty() {
        return vec![SheetDescriptor {
            descriptor_id: format!("{}#0", sheet),
            sheet_id: sheet.to_string(),
            column_names: Vec::new(),
            text: format!("Sheet: {}. Columns: none.", sheet),
            embedding: None,
        }];
    }

    headers
        .chunks(per)
        .enumerate()
        .map(|(group, columns)| {
            let offset = group * per;
            let mut text = format!("Sheet: {}. Columns: {}.", sheet, columns.join(", "));

            let examples: Vec<String> = columns
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    let values: Vec<&str> = samples
                        .iter()
                        .take(settings.sample_rows)
                        .filter_map(|row| row.get(offset + i))
                        .map(|v| v.trim())
                        .filter(|v| !v.is_empty())
                        .collect();
                    (!values.is_empty()).then(|| format!("{} = {}", name, values.join(", ")))
                })
                .collect();
            if !examples.is_empty() {
                text.push_str(" Sample: ");
                text.push_str(&examples.join("; "));
            }

            SheetDescriptor {
                descriptor_id: format!("{}#{}", sheet, group),
                sheet_id: sheet.to_string(),
                column_names: columns.to_vec(),
                text,
                embedding: None,
            }
        })
        .collect()
}

/// `"{sheet} row {n}: col is value; ..."` for the non-empty cells of a row.
///
/// Returns `None` for a row with no non-empty cells.
pub fn row_text(
    sheet: &str,
    number: usize,
    headers: &[String],
    cells: &[String],
) -> Option<(String, BTreeMap<String, String>)> {
    let mut fields = BTreeMap::new();
    let mut parts = Vec::new();
    for (i, value) in cells.iter().enumerate() {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let column = headers
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("column_{}", i + 1));
        parts.push(format!("{} is {}", column, value));
        fields.insert(column, value.to_string());
    }
    if parts.is_empty() {
        return None;
    }
    Some((format!("{} row {}: {}", sheet, number, parts.join("; ")), fields))
}

/// Turns raw cell rows of one sheet into [`RowRecord`]s.
///
/// Row numbers are 1-based data row positions, counted before empty rows
/// are skipped, so they line up with the source.
pub struct RowSynthesizer<I> {
    sheet: String,
    headers: Vec<String>,
    cells: I,
    per_record: usize,
    next_number: usize,
}

impl<I> RowSynthesizer<I>
where
    I: Iterator<Item = Result<Vec<String>>>,
{
    pub fn new(sheet: String, headers: Vec<String>, cells: I, settings: &IngestSettings) -> Self {
        Self {
            sheet,
            headers,
            cells,
            per_record: settings.rows_per_record.max(1),
            next_number: 1,
        }
    }
}

impl<I> Iterator for RowSynthesizer<I>
where
    I: Iterator<Item = Result<Vec<String>>>,
{
    type Item = Result<RowRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut texts = Vec::new();
        let mut fields = BTreeMap::new();
        let mut first = 0;
        let mut last = 0;

        while texts.len() < self.per_record {
            let cells = match self.cells.next() {
                Some(Ok(c)) => c,
                Some(Err(e)) => return Some(Err(e)),
                None if texts.is_empty() => return None,
                None => break,
            };
            let number = self.next_number;
            self.next_number += 1;
            if let Some((text, row_fields)) = row_text(&self.sheet, number, &self.headers, &cells)
            {
                if texts.is_empty() {
                    first = number;
                    fields = row_fields;
                }
                last = number;
                texts.push(text);
            }
        }

        Some(Ok(self.record(first, last, texts, fields)))
    }
}

impl<I> RowSynthesizer<I> {
    fn record(
        &self,
        first: usize,
        last: usize,
        texts: Vec<String>,
        fields: BTreeMap<String, String>,
    ) -> RowRecord {
        let single = texts.len() == 1;
        RowRecord {
            row_id: if single {
                format!("r{}", first)
            } else {
                format!("r{}-r{}", first, last)
            },
            sheet_id: self.sheet.clone(),
            text: texts.join("\n"),
            fields: if single { fields } else { BTreeMap::new() },
            embedding: None,
        }
    }
}

/// One sheet held in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// An in-memory workbook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
    #[serde(default)]
    pub settings: IngestSettings,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: IngestSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Add a sheet, builder style.
    pub fn sheet(mut self, name: &str, headers: &[&str], rows: &[&[&str]]) -> Self {
        self.push_sheet(Sheet {
            name: name.to_string(),
            headers: normalize_headers(headers.iter().copied()),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        });
        self
    }

    /// Add a sheet, replacing any sheet with the same name.
    pub fn push_sheet(&mut self, sheet: Sheet) {
        self.sheets.retain(|s| s.name != sheet.name);
        self.sheets.push(sheet);
    }
}

impl TabularSource for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn descriptors(&self) -> Result<Vec<SheetDescriptor>> {
        Ok(self
            .sheets
            .iter()
            .flat_map(|s| describe_sheet(&s.name, &s.headers, &s.rows, &self.settings))
            .collect())
    }

    fn rows(&self) -> Result<RowStream<'_>> {
        Ok(Box::new(self.sheets.iter().flat_map(move |s| {
            RowSynthesizer::new(
                s.name.clone(),
                s.headers.clone(),
                s.rows.iter().cloned().map(Ok),
                &self.settings,
            )
        })))
    }
}

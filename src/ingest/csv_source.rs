//! Delimited-text sources: one file per sheet.

use super::{describe_sheet, normalize_headers, IngestSettings, RowStream, RowSynthesizer, TabularSource};
use crate::types::{AppError, Result, SheetDescriptor};
use csv::{Reader, ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct SheetFile {
    name: String,
    path: PathBuf,
    delimiter: u8,
}

/// A `.csv`/`.tsv` file, or a directory of them read in name order.
#[derive(Debug, Clone)]
pub struct CsvSource {
    root: PathBuf,
    files: Vec<SheetFile>,
    settings: IngestSettings,
}

fn delimiter_for(path: &Path) -> Option<u8> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => Some(b','),
        Some("tsv") | Some("tab") => Some(b'\t'),
        _ => None,
    }
}

fn sheet_file(path: PathBuf) -> Option<SheetFile> {
    let delimiter = delimiter_for(&path)?;
    let name = path.file_stem()?.to_str()?.to_string();
    Some(SheetFile {
        name,
        path,
        delimiter,
    })
}

fn source_err(path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::Source(format!("{}: {}", path.display(), e))
}

impl CsvSource {
    /// Open a single file or scan a directory (non-recursive).
    pub fn open(path: impl AsRef<Path>, settings: IngestSettings) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let meta = std::fs::metadata(&root).map_err(|e| source_err(&root, e))?;

        let mut files = Vec::new();
        if meta.is_dir() {
            let entries = std::fs::read_dir(&root).map_err(|e| source_err(&root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| source_err(&root, e))?;
                if entry.path().is_file() {
                    files.extend(sheet_file(entry.path()));
                }
            }
            files.sort_by(|a, b| a.path.cmp(&b.path));
        } else {
            let file = sheet_file(root.clone()).ok_or_else(|| {
                source_err(&root, "expected a .csv or .tsv file")
            })?;
            files.push(file);
        }

        if files.is_empty() {
            return Err(source_err(&root, "no .csv or .tsv files found"));
        }
        for (i, f) in files.iter().enumerate() {
            if files[..i].iter().any(|g| g.name == f.name) {
                return Err(source_err(
                    &f.path,
                    format!("duplicate sheet name '{}'", f.name),
                ));
            }
        }

        info!(path = %root.display(), sheets = files.len(), "Opened tabular source");
        Ok(Self {
            root,
            files,
            settings,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn reader(file: &SheetFile) -> Result<(Vec<String>, Reader<File>)> {
        let mut reader = ReaderBuilder::new()
            .delimiter(file.delimiter)
            .flexible(true)
            .from_path(&file.path)
            .map_err(|e| source_err(&file.path, e))?;
        let headers = normalize_headers(
            reader
                .headers()
                .map_err(|e| source_err(&file.path, e))?
                .iter(),
        );
        Ok((headers, reader))
    }

    fn cells(path: PathBuf, reader: Reader<File>) -> impl Iterator<Item = Result<Vec<String>>> + Send {
        reader.into_records().map(move |record| {
            record
                .map(|r: StringRecord| r.iter().map(str::to_string).collect())
                .map_err(|e| source_err(&path, e))
        })
    }

    fn sheet_rows(&self, file: &SheetFile) -> RowStream<'static> {
        match Self::reader(file) {
            Ok((headers, reader)) => Box::new(RowSynthesizer::new(
                file.name.clone(),
                headers,
                Self::cells(file.path.clone(), reader),
                &self.settings,
            )),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

impl TabularSource for CsvSource {
    fn sheet_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }

    fn descriptors(&self) -> Result<Vec<SheetDescriptor>> {
        let mut out = Vec::new();
        for file in &self.files {
            let (headers, reader) = Self::reader(file)?;
            let samples = Self::cells(file.path.clone(), reader)
                .take(self.settings.sample_rows)
                .collect::<Result<Vec<_>>>()?;
            let descriptors = describe_sheet(&file.name, &headers, &samples, &self.settings);
            debug!(sheet = %file.name, columns = headers.len(), descriptors = descriptors.len(), "Described sheet");
            out.extend(descriptors);
        }
        Ok(out)
    }

    fn rows(&self) -> Result<RowStream<'_>> {
        Ok(Box::new(
            self.files.iter().flat_map(move |file| self.sheet_rows(file)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) {
        fs::write(dir.path().join(name), body).unwrap();
    }

    #[test]
    fn test_directory_sheets_in_name_order() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b_pricing.csv", "product,price\nxyz,10\n");
        write(&dir, "a_products.tsv", "product\tname\nxyz\tWidget\n");
        write(&dir, "notes.txt", "ignored");

        let src = CsvSource::open(dir.path(), IngestSettings::default()).unwrap();
        assert_eq!(src.sheet_names(), vec!["a_products", "b_pricing"]);

        let rows: Vec<_> = src.rows().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].text, "a_products row 1: product is xyz; name is Widget");
        assert_eq!(rows[1].sheet_id, "b_pricing");
    }

    #[test]
    fn test_descriptors_use_sample_rows() {
        let dir = TempDir::new().unwrap();
        write(&dir, "Pricing.csv", "product,,price\nxyz,,10\nabc,,5\n");

        let src = CsvSource::open(dir.path().join("Pricing.csv"), IngestSettings::default()).unwrap();
        let d = src.descriptors().unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].column_names, vec!["product", "column_2", "price"]);
        assert!(d[0].text.contains("product = xyz, abc"));
    }

    #[test]
    fn test_ragged_rows_are_accepted() {
        let dir = TempDir::new().unwrap();
        write(&dir, "S.csv", "a,b\n1\n2,3,4\n");
        let src = CsvSource::open(dir.path(), IngestSettings::default()).unwrap();
        let rows: Vec<_> = src.rows().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].text, "S row 1: a is 1");
        assert_eq!(rows[1].text, "S row 2: a is 2; b is 3; column_3 is 4");
    }

    #[test]
    fn test_missing_path_and_empty_dir_are_source_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            CsvSource::open(dir.path().join("nope.csv"), IngestSettings::default()),
            Err(AppError::Source(_))
        ));
        assert!(matches!(
            CsvSource::open(dir.path(), IngestSettings::default()),
            Err(AppError::Source(_))
        ));
    }
}

//! Almacén de documentos para las muestras crudas del periférico.
//!
//! Un documento por línea (JSON Lines). Cada documento guarda el momento de
//! la medición, el texto recibido y los campos ya separados.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::{decode_notification, parse_record, PayloadError};
use crate::types::FeatureLayout;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Filtro inválido '{0}' (formato: data.<índice>=<valor>)")]
    InvalidFilter(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDocument {
    pub measured_at: DateTime<Utc>,
    pub raw: String,
    pub data: Vec<String>,
}

impl SampleDocument {
    /// Solo se guardan notificaciones con el número exacto de columnas
    pub fn from_notification(
        payload: &[u8],
        layout: FeatureLayout,
    ) -> Result<Option<Self>, PayloadError> {
        let text = match decode_notification(payload) {
            Some(text) => text,
            None => return Ok(None),
        };
        let reading = parse_record(&text, layout)?;
        Ok(Some(Self {
            measured_at: Utc::now(),
            data: reading.fields(),
            raw: reading.raw,
        }))
    }
}

/// Filtro por igualdad sobre posiciones de `data`: "data.18=right"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    conditions: Vec<(usize, String)>,
}

impl DocumentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn field_equals(mut self, index: usize, value: impl Into<String>) -> Self {
        self.conditions.push((index, value.into()));
        self
    }

    pub fn matches(&self, doc: &SampleDocument) -> bool {
        self.conditions
            .iter()
            .all(|(idx, value)| doc.data.get(*idx).map(|v| v == value).unwrap_or(false))
    }
}

impl FromStr for DocumentFilter {
    type Err = StoreError;

    /// Condiciones separadas por comas: "data.18=right,data.19=n11611553"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut filter = DocumentFilter::all();
        for cond in s.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (field, value) = cond
                .split_once('=')
                .ok_or_else(|| StoreError::InvalidFilter(cond.to_string()))?;
            let index = field
                .trim()
                .strip_prefix("data.")
                .and_then(|i| i.parse::<usize>().ok())
                .ok_or_else(|| StoreError::InvalidFilter(cond.to_string()))?;
            filter = filter.field_equals(index, value.trim());
        }
        Ok(filter)
    }
}

pub struct DocumentStore {
    path: PathBuf,
    file: File,
    batch_size: usize,
    buffer: Vec<SampleDocument>,
}

impl DocumentStore {
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Acumula el documento; cuando el lote se llena lo escribe y devuelve cuántos insertó
    pub fn push(&mut self, doc: SampleDocument) -> Result<Option<usize>, StoreError> {
        self.buffer.push(doc);
        if self.buffer.len() < self.batch_size {
            return Ok(None);
        }
        self.flush().map(Some)
    }

    /// Escribe lo pendiente. Si falla, el lote se descarta igualmente
    /// para no reintentar indefinidamente.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        let batch = std::mem::take(&mut self.buffer);
        self.insert_many(&batch)
    }

    pub fn insert_many(&mut self, docs: &[SampleDocument]) -> Result<usize, StoreError> {
        let mut out = String::new();
        for doc in docs {
            out.push_str(&serde_json::to_string(doc)?);
            out.push('\n');
        }
        self.file.write_all(out.as_bytes())?;
        self.file.flush()?;
        Ok(docs.len())
    }

    /// Documentos que cumplen el filtro. Las líneas corruptas se saltan con un aviso.
    pub fn find(&self, filter: &DocumentFilter) -> Result<Vec<SampleDocument>, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut docs = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SampleDocument>(&line) {
                Ok(doc) if filter.matches(&doc) => docs.push(doc),
                Ok(_) => {}
                Err(e) => {
                    log::warn!("⚠️  Documento {} ilegible en {:?}: {}", idx + 1, self.path, e)
                }
            }
        }

        Ok(docs)
    }

    /// Vuelca los documentos filtrados a un CSV de entrenamiento con cabecera
    pub fn export_csv(
        &self,
        filter: &DocumentFilter,
        layout: FeatureLayout,
        out: impl AsRef<Path>,
    ) -> Result<usize, StoreError> {
        let docs = self.find(filter)?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_path(out)?;
        writer.write_record(layout.csv_header())?;
        for doc in &docs {
            writer.write_record(&doc.data)?;
        }
        writer.flush()?;
        Ok(docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn imu_line(label: &str, student: &str) -> String {
        let features: Vec<String> = (0..18).map(|i| format!("{}.5", i)).collect();
        format!("{},{},{}", features.join(","), label, student)
    }

    fn doc(label: &str) -> SampleDocument {
        let line = imu_line(label, "n11611553");
        SampleDocument::from_notification(line.as_bytes(), FeatureLayout::Imu)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn notification_becomes_document() {
        let d = doc("right");
        assert_eq!(d.data.len(), 20);
        assert_eq!(d.data[0], "0.5");
        assert_eq!(d.data[18], "right");
        assert!(d.raw.ends_with("right,n11611553"));

        assert!(SampleDocument::from_notification(b"", FeatureLayout::Imu)
            .unwrap()
            .is_none());
        assert!(SampleDocument::from_notification(b"1,2,3", FeatureLayout::Imu).is_err());
    }

    #[test]
    fn batches_are_written_when_full() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path().join("imu_db/imu_data.jsonl"), 2).unwrap();

        assert_eq!(store.push(doc("up")).unwrap(), None);
        assert_eq!(store.pending(), 1);
        assert_eq!(store.push(doc("down")).unwrap(), Some(2));
        assert_eq!(store.pending(), 0);

        assert_eq!(store.find(&DocumentFilter::all()).unwrap().len(), 2);
    }

    #[test]
    fn filter_selects_by_data_position() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path().join("imu.jsonl"), 1).unwrap();
        for label in ["right", "left", "right", "push"] {
            store.push(doc(label)).unwrap();
        }

        let filter: DocumentFilter = "data.18=right".parse().unwrap();
        let found = store.find(&filter).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.data[18] == "right"));

        let none: DocumentFilter = "data.18=right, data.19=someone".parse().unwrap();
        assert!(store.find(&none).unwrap().is_empty());
    }

    #[test]
    fn bad_filters_are_rejected() {
        assert!("label=right".parse::<DocumentFilter>().is_err());
        assert!("data.x=right".parse::<DocumentFilter>().is_err());
        assert_eq!("".parse::<DocumentFilter>().unwrap(), DocumentFilter::all());
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imu.jsonl");
        let mut store = DocumentStore::open(&path, 1).unwrap();
        store.push(doc("up")).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{not json}\n")
            .unwrap();
        store.push(doc("down")).unwrap();

        assert_eq!(store.find(&DocumentFilter::all()).unwrap().len(), 2);
    }

    #[test]
    fn export_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let mut store = DocumentStore::open(dir.path().join("imu.jsonl"), 1).unwrap();
        store.push(doc("up")).unwrap();
        store.push(doc("left")).unwrap();

        let out = dir.path().join("training_data.csv");
        let n = store
            .export_csv(&DocumentFilter::all().field_equals(18, "left"), FeatureLayout::Imu, &out)
            .unwrap();
        assert_eq!(n, 1);

        let content = fs::read_to_string(out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].starts_with("meanAx,sdAx,rangeAx"));
        assert!(lines[0].ends_with("label,studentId"));
        assert!(lines[1].ends_with("left,n11611553"));
    }
}

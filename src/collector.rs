use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use csv::Writer;

use crate::payload::{decode_notification, parse_record, PayloadError};
use crate::types::FeatureLayout;

/// Qué pasó con una notificación
#[derive(Debug, PartialEq)]
pub enum RecordOutcome {
    /// Vacía, cabecera o mensaje de estado
    Ignored,
    Malformed { error: PayloadError, line: String },
    Recorded { count: u64, label: Option<String> },
}

/// Nombre por defecto: motion_data_YYYYMMDD_HHMMSS.csv
pub fn default_output_path() -> PathBuf {
    PathBuf::from(format!("motion_data_{}.csv", Local::now().format("%Y%m%d_%H%M%S")))
}

/// Graba lecturas completas (features + label + studentId) a un CSV de entrenamiento
pub struct CsvRecorder {
    writer: Writer<File>,
    path: PathBuf,
    layout: FeatureLayout,
    count: u64,
}

impl CsvRecorder {
    pub fn create(path: impl AsRef<Path>, layout: FeatureLayout) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = Writer::from_path(&path)
            .with_context(|| format!("No se pudo crear el CSV {:?}", path))?;
        writer.write_record(layout.csv_header())?;
        writer.flush()?;

        Ok(Self {
            writer,
            path,
            layout,
            count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn record_notification(&mut self, data: &[u8]) -> Result<RecordOutcome> {
        let line = match decode_notification(data) {
            Some(line) => line,
            None => return Ok(RecordOutcome::Ignored),
        };

        let reading = match parse_record(&line, self.layout) {
            Ok(reading) => reading,
            Err(error) => return Ok(RecordOutcome::Malformed { error, line }),
        };

        self.writer.write_record(reading.fields())?;
        // Cada muestra queda en disco aunque el proceso se corte con Ctrl+C
        self.writer.flush()?;
        self.count += 1;

        Ok(RecordOutcome::Recorded {
            count: self.count,
            label: reading.label,
        })
    }

    pub fn finish(mut self) -> Result<(PathBuf, u64)> {
        self.writer.flush()?;
        Ok((self.path, self.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn records_valid_lines_and_reports_the_rest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("motion.csv");
        let mut recorder = CsvRecorder::create(&path, FeatureLayout::Wrist).unwrap();

        assert_eq!(
            recorder.record_notification(b"meanX,sdX,rangeX").unwrap(),
            RecordOutcome::Ignored
        );
        assert!(matches!(
            recorder.record_notification(b"1,2,3,left").unwrap(),
            RecordOutcome::Malformed {
                error: PayloadError::WrongWidth { expected: 12, got: 4 },
                ..
            }
        ));
        assert_eq!(
            recorder
                .record_notification(b"0.1,0.2,0.3,0.4,0.5,0.6,0.7,0.8,0.9,1,left,n1\n")
                .unwrap(),
            RecordOutcome::Recorded {
                count: 1,
                label: Some("left".to_string())
            }
        );

        let (written, count) = recorder.finish().unwrap();
        assert_eq!(count, 1);

        let content = fs::read_to_string(written).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "meanX,sdX,rangeX,meanY,sdY,rangeY,meanZ,sdZ,rangeZ,wristArmed,label,studentId"
        );
        assert_eq!(lines[1], "0.1,0.2,0.3,0.4,0.5,0.6,0.7,0.8,0.9,1,left,n1");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn default_name_is_timestamped() {
        let name = default_output_path().to_string_lossy().to_string();
        assert!(name.starts_with("motion_data_"));
        assert!(name.ends_with(".csv"));
    }
}

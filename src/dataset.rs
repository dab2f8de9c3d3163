use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::types::{FeatureLayout, IMU_FEATURE_COLUMNS, LABEL_COLUMN, LEGACY_ACCEL_COLUMNS};

/// CSV con cabecera, columnas accesibles por nombre
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    records: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, records: Vec<Vec<String>>) -> Self {
        Self { columns, records }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;

        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("Cabecera inválida en {:?}", path))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut records = Vec::new();
        for (row_idx, result) in reader.records().enumerate() {
            let record =
                result.with_context(|| format!("Fila {} inválida en {:?}", row_idx + 1, path))?;
            records.push(record.iter().map(|v| v.trim().to_string()).collect());
        }

        Ok(Self { columns, records })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = WriterBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("No se pudo crear el CSV {:?}", path))?;
        writer.write_record(&self.columns)?;
        for record in &self.records {
            writer.write_record(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn value<'a>(&self, record: &'a [String], column: usize) -> Option<&'a str> {
        record.get(column).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn rename_columns(&mut self, renames: &[(&str, &str)]) {
        for (from, to) in renames {
            if let Some(idx) = self.column_index(from) {
                self.columns[idx] = to.to_string();
            }
        }
    }

    pub fn lowercase_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            for record in &mut self.records {
                if let Some(v) = record.get_mut(idx) {
                    *v = v.to_lowercase();
                }
            }
        }
    }

    /// Reordena a las columnas pedidas; las que falten quedan vacías
    pub fn project(&self, columns: &[&str]) -> Dataset {
        let indices: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let records = self
            .records
            .iter()
            .map(|record| {
                indices
                    .iter()
                    .map(|idx| {
                        idx.and_then(|i| record.get(i).cloned())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        Dataset {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            records,
        }
    }

    pub fn append(&mut self, other: &Dataset) {
        let cols: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let aligned = other.project(&cols);
        self.records.extend(aligned.records);
    }

    /// Convierte a muestras numéricas descartando filas corruptas:
    /// features vacías o no numéricas, o las 9 features de acelerómetro a cero.
    pub fn clean(&self, layout: FeatureLayout) -> Result<CleanReport> {
        let mut feature_idx = Vec::with_capacity(layout.feature_count());
        for (i, column) in layout.feature_columns().iter().enumerate() {
            // CSVs antiguos: acelerómetro como meanX..rangeZ
            let idx = self.column_index(column).or_else(|| {
                LEGACY_ACCEL_COLUMNS
                    .get(i)
                    .and_then(|legacy| self.column_index(legacy))
            });
            match idx {
                Some(idx) => feature_idx.push(idx),
                None => bail!("Falta la columna {} (columnas: {:?})", column, self.columns),
            }
        }
        let label_idx = self
            .column_index(LABEL_COLUMN)
            .with_context(|| format!("Falta la columna {}", LABEL_COLUMN))?;
        let accel = layout.accel_columns().len();

        let mut samples = LabeledSamples::default();
        let mut removed = 0;

        'rows: for record in &self.records {
            let label = match self.value(record, label_idx) {
                Some(label) => label,
                None => {
                    removed += 1;
                    continue;
                }
            };

            let mut features = Vec::with_capacity(feature_idx.len());
            for &idx in &feature_idx {
                match self.value(record, idx).and_then(|v| v.parse::<f32>().ok()) {
                    Some(x) if x.is_finite() => features.push(x),
                    _ => {
                        removed += 1;
                        continue 'rows;
                    }
                }
            }

            if features[..accel].iter().all(|x| *x == 0.0) {
                removed += 1;
                continue;
            }

            samples.features.push(features);
            samples.labels.push(label.to_string());
        }

        Ok(CleanReport { samples, removed })
    }
}

/// Une nuestro CSV (columnas meanX..rangeZ) con el de otro estudiante
/// (ya en meanAx..rangeAz). Etiquetas en minúsculas, cabecera IMU completa.
pub fn combine(ours: &Dataset, theirs: &Dataset) -> Dataset {
    let renames: Vec<(&str, &str)> = LEGACY_ACCEL_COLUMNS
        .iter()
        .copied()
        .zip(IMU_FEATURE_COLUMNS.iter().copied())
        .collect();

    let mut ours = ours.clone();
    ours.rename_columns(&renames);

    let header = FeatureLayout::Imu.csv_header();
    let mut combined = ours.project(&header);
    combined.append(theirs);
    combined.lowercase_column(LABEL_COLUMN);
    combined
}

pub struct CleanReport {
    pub samples: LabeledSamples,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledSamples {
    pub features: Vec<Vec<f32>>,
    pub labels: Vec<String>,
}

impl LabeledSamples {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Muestras por clase, de más a menos frecuente
    pub fn class_counts(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in &self.labels {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
        let mut counts: Vec<(String, usize)> =
            counts.into_iter().map(|(l, c)| (l.to_string(), c)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    fn subset(&self, indices: &[usize]) -> LabeledSamples {
        LabeledSamples {
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i].clone()).collect(),
        }
    }

    /// División train/test estratificada y reproducible (misma semilla, mismo reparto).
    /// Cada clase con al menos dos muestras aporta al menos una al test.
    pub fn stratified_split(
        &self,
        test_fraction: f64,
        seed: u64,
    ) -> Result<(LabeledSamples, LabeledSamples)> {
        ensure!(
            test_fraction > 0.0 && test_fraction < 1.0,
            "test_fraction debe estar en (0, 1), es {}",
            test_fraction
        );

        let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, label) in self.labels.iter().enumerate() {
            by_class.entry(label.as_str()).or_default().push(i);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut test = Vec::new();

        for indices in by_class.values_mut() {
            indices.shuffle(&mut rng);
            let n = indices.len();
            let n_test = if n < 2 {
                0
            } else {
                ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1)
            };
            test.extend_from_slice(&indices[..n_test]);
            train.extend_from_slice(&indices[n_test..]);
        }

        train.sort_unstable();
        test.sort_unstable();
        Ok((self.subset(&train), self.subset(&test)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn wrist_dataset(rows: &[&str]) -> Dataset {
        let columns = FeatureLayout::Wrist
            .csv_header()
            .into_iter()
            .map(str::to_string)
            .collect();
        let records = rows
            .iter()
            .map(|r| r.split(',').map(str::to_string).collect())
            .collect();
        Dataset::new(columns, records)
    }

    #[test]
    fn clean_drops_missing_and_all_zero_rows() {
        let data = wrist_dataset(&[
            "1,2,3,4,5,6,7,8,9,1,up,n1",
            "0,0,0,0,0,0,0,0,0,1,up,n1",
            "1,,3,4,5,6,7,8,9,1,down,n1",
            "1,2,3,4,5,6,7,8,abc,0,down,n1",
            "1,2,3,4,5,6,7,8,9,0,,n1",
            "0.5,0,0,0,0,0,0,0,0,0,left,n1",
        ]);
        let report = data.clean(FeatureLayout::Wrist).unwrap();
        assert_eq!(report.removed, 4);
        assert_eq!(report.samples.labels, vec!["up", "left"]);
        assert_eq!(report.samples.features[1][0], 0.5);
    }

    #[test]
    fn clean_accepts_legacy_accel_names() {
        // meanX..rangeZ + meanGx..rangeGz, como el CSV combinado antiguo
        let mut columns: Vec<String> = LEGACY_ACCEL_COLUMNS
            .iter()
            .chain(&IMU_FEATURE_COLUMNS[9..])
            .map(|c| c.to_string())
            .collect();
        columns.push(LABEL_COLUMN.to_string());
        let row: Vec<String> = (1..=18)
            .map(|i| i.to_string())
            .chain(["push".to_string()])
            .collect();
        let data = Dataset::new(columns, vec![row]);

        let report = data.clean(FeatureLayout::Imu).unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.samples.labels, vec!["push"]);
        assert_eq!(report.samples.features[0][0], 1.0);
        assert_eq!(report.samples.features[0][17], 18.0);
    }

    #[test]
    fn clean_requires_feature_columns() {
        let data = wrist_dataset(&["1,2,3,4,5,6,7,8,9,1,up,n1"]);
        assert!(data.clean(FeatureLayout::Imu).is_err());
    }

    #[test]
    fn combine_renames_and_lowercases() {
        let ours = wrist_dataset(&["1,2,3,4,5,6,7,8,9,1,UP,n11611553"]);
        let theirs = Dataset::new(
            FeatureLayout::Imu.csv_header().into_iter().map(str::to_string).collect(),
            vec![(0..18)
                .map(|i| i.to_string())
                .chain(["Push".to_string(), "bert".to_string()])
                .collect()],
        );

        let combined = combine(&ours, &theirs);
        assert_eq!(combined.columns().len(), 20);
        assert_eq!(combined.columns()[0], "meanAx");
        assert_eq!(combined.len(), 2);

        let label = combined.column_index("label").unwrap();
        let mean_ax = combined.column_index("meanAx").unwrap();
        let mean_gx = combined.column_index("meanGx").unwrap();
        assert_eq!(combined.records[0][label], "up");
        assert_eq!(combined.records[0][mean_ax], "1");
        // Nuestro CSV no tenía giroscopio
        assert_eq!(combined.records[0][mean_gx], "");
        assert_eq!(combined.records[1][label], "push");
    }

    #[test]
    fn load_and_save_keep_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "meanX, sdX,label\n1,2,up\n3,4,down\n").unwrap();

        let data = Dataset::load(&path).unwrap();
        assert_eq!(data.columns(), &["meanX", "sdX", "label"]);
        assert_eq!(data.len(), 2);

        let copy = dir.path().join("copy.csv");
        data.save(&copy).unwrap();
        assert_eq!(Dataset::load(&copy).unwrap(), data);
    }

    #[test]
    fn split_is_stratified_and_reproducible() {
        let mut samples = LabeledSamples::default();
        for i in 0..50 {
            samples.features.push(vec![i as f32]);
            samples.labels.push(if i % 5 == 0 { "push" } else { "up" }.to_string());
        }

        let (train, test) = samples.stratified_split(0.2, 42).unwrap();
        assert_eq!(train.len() + test.len(), 50);
        assert_eq!(test.len(), 10);
        let test_counts = test.class_counts();
        assert_eq!(test_counts, vec![("up".to_string(), 8), ("push".to_string(), 2)]);

        let (_, again) = samples.stratified_split(0.2, 42).unwrap();
        assert_eq!(test, again);
        assert!(samples.stratified_split(1.0, 42).is_err());
    }
}

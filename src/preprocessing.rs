use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("No hay datos para ajustar")]
    Empty,

    #[error("Etiqueta desconocida: {0}")]
    UnknownLabel(String),

    #[error("Índice de clase inválido en classes.json: {0}")]
    InvalidIndex(String),
}

/// Normalización z-score por columna: (x - mean) / scale.
/// Mismo criterio que StandardScaler: desviación poblacional y
/// scale = 1 cuando la columna es constante.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl StandardScaler {
    pub fn fit<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, PreprocessError> {
        let first = rows.first().ok_or(PreprocessError::Empty)?.as_ref();
        let dims = first.len();
        let n = rows.len() as f64;

        // Acumular en f64 para no perder precisión con muchas muestras
        let mut sum = vec![0.0f64; dims];
        for row in rows {
            let row = row.as_ref();
            if row.len() != dims {
                return Err(PreprocessError::InvalidFeatureSize {
                    expected: dims,
                    actual: row.len(),
                });
            }
            for (acc, &x) in sum.iter_mut().zip(row) {
                *acc += x as f64;
            }
        }
        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();

        let mut sq = vec![0.0f64; dims];
        for row in rows {
            for ((acc, &x), m) in sq.iter_mut().zip(row.as_ref()).zip(&mean) {
                *acc += (x as f64 - m).powi(2);
            }
        }

        let scale = sq
            .iter()
            .map(|s| {
                let std = (s / n).sqrt();
                if std > f64::EPSILON {
                    std as f32
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            scale,
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, features: &[f32]) -> Result<Vec<f32>, PreprocessError> {
        if features.len() != self.n_features() {
            return Err(PreprocessError::InvalidFeatureSize {
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreprocessError> {
        let content = fs::read_to_string(path)?;
        let scaler: Self = serde_json::from_str(&content)?;
        if scaler.mean.len() != scaler.scale.len() {
            return Err(PreprocessError::InvalidFeatureSize {
                expected: scaler.mean.len(),
                actual: scaler.scale.len(),
            });
        }
        Ok(scaler)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PreprocessError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ClassesJson {
    index_to_class: HashMap<String, String>,
}

/// Mapa biyectivo nombre de clase <-> índice que devuelve el modelo
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes }
    }

    /// Clases únicas ordenadas alfabéticamente
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Result<Self, PreprocessError> {
        let unique: BTreeSet<&str> = labels.iter().map(|l| l.as_ref()).collect();
        if unique.is_empty() {
            return Err(PreprocessError::Empty);
        }
        Ok(Self {
            classes: unique.into_iter().map(str::to_string).collect(),
        })
    }

    /// Mapeo manual usado por los primeros modelos SVM (sin classes.json)
    pub fn legacy() -> Self {
        Self::new(
            ["right", "left", "up", "down", "push"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn transform(&self, label: &str) -> Result<usize, PreprocessError> {
        self.classes
            .iter()
            .position(|c| c == label)
            .ok_or_else(|| PreprocessError::UnknownLabel(label.to_string()))
    }

    pub fn inverse_transform(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// Como inverse_transform pero nunca falla: índices fuera de rango
    /// se muestran como "Unknown_<n>"
    pub fn decode(&self, index: i64) -> String {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.inverse_transform(i))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown_{}", index))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreprocessError> {
        let content = fs::read_to_string(path)?;
        let data: ClassesJson = serde_json::from_str(&content)?;

        // Convertir HashMap a Vec ordenado por índice
        let mut pairs = BTreeMap::new();
        for (k, v) in data.index_to_class {
            let idx: usize = k.parse().map_err(|_| PreprocessError::InvalidIndex(k.clone()))?;
            pairs.insert(idx, v);
        }

        // Los índices deben ser 0..n sin huecos
        for (expected, idx) in pairs.keys().enumerate() {
            if *idx != expected {
                return Err(PreprocessError::InvalidIndex(idx.to_string()));
            }
        }

        Ok(Self {
            classes: pairs.into_values().collect(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PreprocessError> {
        let data = ClassesJson {
            index_to_class: self
                .classes
                .iter()
                .enumerate()
                .map(|(i, c)| (i.to_string(), c.clone()))
                .collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }
}

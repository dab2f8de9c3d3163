//! Pipeline por notificación: bytes -> lectura -> (escalado) -> modelo -> etiqueta.
//!
//! Cada notificación se procesa completa y de forma síncrona; un error
//! solo afecta a esa notificación.

use std::fmt;

use chrono::Local;
use thiserror::Error;

use crate::gesture_classifier::{ClassScores, Classifier, ClassifierError};
use crate::payload::{decode_notification, parse_reading, PayloadError};
use crate::preprocessing::{LabelEncoder, PreprocessError, StandardScaler};
use crate::types::{
    FeatureLayout, Reading, FEATURE_SAMPLE_EVERY, HIGH_CONFIDENCE, MEDIUM_CONFIDENCE,
};

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Error parseando datos: {0}")]
    Payload(#[from] PayloadError),

    #[error("Error escalando features: {0}")]
    Scaling(#[from] PreprocessError),

    #[error("Error clasificando: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("{component} espera {expected} features pero el layout {layout} tiene {actual}")]
    Mismatch {
        component: &'static str,
        layout: FeatureLayout,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence > HIGH_CONFIDENCE {
            ConfidenceTier::High
        } else if confidence > MEDIUM_CONFIDENCE {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "🎯",
            ConfidenceTier::Medium => "⚡",
            ConfidenceTier::Low => "❓",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Número de predicción desde el arranque (empieza en 1)
    pub sequence: u64,
    pub timestamp: String,
    pub label: String,
    /// Etiqueta que envió el firmware, si la hay
    pub actual: Option<String>,
    pub confidence: f32,
    pub tier: ConfidenceTier,
    pub features: Vec<f32>,
}

impl Prediction {
    /// Cada FEATURE_SAMPLE_EVERY predicciones se muestran features de depuración
    pub fn shows_feature_sample(&self) -> bool {
        self.sequence % FEATURE_SAMPLE_EVERY == 0
    }

    /// Primeras tres features (eje X del acelerómetro)
    pub fn feature_sample(&self) -> String {
        self.features
            .iter()
            .take(3)
            .map(|f| format!("{:.3}", f))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] Predicción: {} | Real: {} | Confianza: {:.2}",
            self.tier.icon(),
            self.timestamp,
            self.label.to_uppercase(),
            self.actual.as_deref().unwrap_or("unknown"),
            self.confidence
        )
    }
}

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub layout: FeatureLayout,
    /// Etiquetas del firmware que no se clasifican (reposo)
    pub skip_labels: Vec<String>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            layout: FeatureLayout::default(),
            skip_labels: vec!["still".to_string()],
        }
    }
}

pub struct Predictor<C: Classifier> {
    classifier: C,
    scaler: Option<StandardScaler>,
    encoder: LabelEncoder,
    config: PredictorConfig,
    prediction_count: u64,
}

impl<C: Classifier> Predictor<C> {
    /// Comprueba que modelo y scaler esperan el mismo número de features que el layout
    pub fn new(
        classifier: C,
        scaler: Option<StandardScaler>,
        encoder: LabelEncoder,
        config: PredictorConfig,
    ) -> Result<Self, PredictError> {
        let layout = config.layout;
        let actual = layout.feature_count();

        if let Some(expected) = classifier.n_features() {
            if expected != actual {
                return Err(PredictError::Mismatch {
                    component: "el modelo",
                    layout,
                    expected,
                    actual,
                });
            }
        }

        if let Some(scaler) = &scaler {
            if scaler.n_features() != actual {
                return Err(PredictError::Mismatch {
                    component: "el scaler",
                    layout,
                    expected: scaler.n_features(),
                    actual,
                });
            }
        }

        Ok(Self {
            classifier,
            scaler,
            encoder,
            config,
            prediction_count: 0,
        })
    }

    pub fn prediction_count(&self) -> u64 {
        self.prediction_count
    }

    pub fn layout(&self) -> FeatureLayout {
        self.config.layout
    }

    pub fn uses_scaler(&self) -> bool {
        self.scaler.is_some()
    }

    /// Punto de entrada por notificación BLE.
    /// Ok(None) si la línea se ignora (vacía, cabecera o etiqueta de reposo).
    pub fn handle_notification(&mut self, data: &[u8]) -> Result<Option<Prediction>, PredictError> {
        match decode_notification(data) {
            Some(text) => self.predict_line(&text),
            None => Ok(None),
        }
    }

    pub fn predict_line(&mut self, text: &str) -> Result<Option<Prediction>, PredictError> {
        let reading = parse_reading(text, self.config.layout)?;

        if let Some(label) = &reading.label {
            if self.config.skip_labels.iter().any(|s| s.eq_ignore_ascii_case(label)) {
                return Ok(None);
            }
        }

        self.predict_reading(reading).map(Some)
    }

    pub fn predict_reading(&mut self, reading: Reading) -> Result<Prediction, PredictError> {
        let scores = self.classify(&reading.features)?;
        let confidence = scores.confidence();

        self.prediction_count += 1;

        Ok(Prediction {
            sequence: self.prediction_count,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            label: self.encoder.decode(scores.class_index),
            actual: reading.label,
            confidence,
            tier: ConfidenceTier::from_confidence(confidence),
            features: reading.features,
        })
    }

    /// Escalado opcional + inferencia, sin decodificar la etiqueta
    pub fn classify(&mut self, features: &[f32]) -> Result<ClassScores, PredictError> {
        let scores = match &self.scaler {
            Some(scaler) => {
                let scaled = scaler.transform(features)?;
                self.classifier.predict(&scaled)?
            }
            None => self.classifier.predict(features)?,
        };
        Ok(scores)
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }
}

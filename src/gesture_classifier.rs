use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("No output tensor found")]
    NoOutputTensor,

    #[error("Missing ONNX {kind}")]
    MissingIo { kind: &'static str },
}

/// Resultado crudo del modelo para una muestra
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
    pub class_index: i64,
    /// Solo si el modelo exporta probabilidades (predict_proba)
    pub probabilities: Option<Vec<f32>>,
}

impl ClassScores {
    /// Probabilidad máxima, 0 si el modelo no da probabilidades
    pub fn confidence(&self) -> f32 {
        self.probabilities
            .as_ref()
            .and_then(|p| p.iter().copied().reduce(f32::max))
            .unwrap_or(0.0)
    }
}

/// Clasificador ya entrenado sobre un vector de features
pub trait Classifier {
    /// Número de features esperado, si el modelo lo declara
    fn n_features(&self) -> Option<usize>;

    fn predict(&mut self, features: &[f32]) -> Result<ClassScores, ClassifierError>;
}

/// Índice de la probabilidad más alta (el primero en caso de empate)
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Clase final: manda la salida de etiqueta (predict); el argmax de las
/// probabilidades solo si el modelo no exporta etiqueta
pub fn resolve_class(label: Option<i64>, probabilities: Option<&[f32]>) -> Option<i64> {
    label.or_else(|| probabilities.and_then(argmax).map(|i| i as i64))
}

/// Qué lleva cada salida del grafo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Tensor float32 (predict_proba con zipmap=False)
    Probabilities,
    /// Tensor int64 (predict)
    Label,
    /// seq(map(int64, float)) del ZipMap por defecto de skl2onnx
    ProbabilityMaps,
    Other,
}

impl OutputKind {
    fn of(value_type: &ValueType) -> Self {
        match value_type {
            ValueType::Tensor { ty, .. } if *ty == TensorElementType::Float32 => {
                OutputKind::Probabilities
            }
            ValueType::Tensor { ty, .. } if *ty == TensorElementType::Int64 => OutputKind::Label,
            ValueType::Sequence(inner) if matches!(**inner, ValueType::Map { .. }) => {
                OutputKind::ProbabilityMaps
            }
            _ => OutputKind::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSelection {
    pub label: Option<String>,
    pub probabilities: Option<String>,
    /// Probabilidades solo como ZipMap, que no se leen
    pub zipmap: Option<String>,
}

/// Primera salida de etiqueta y primera de probabilidades
pub fn select_outputs(outputs: &[(String, OutputKind)]) -> OutputSelection {
    let first = |wanted: OutputKind| {
        outputs
            .iter()
            .find(|(_, kind)| *kind == wanted)
            .map(|(name, _)| name.clone())
    };
    let probabilities = first(OutputKind::Probabilities);
    OutputSelection {
        label: first(OutputKind::Label),
        zipmap: if probabilities.is_none() {
            first(OutputKind::ProbabilityMaps)
        } else {
            None
        },
        probabilities,
    }
}

/// Modelo exportado desde scikit-learn a ONNX.
/// Salidas esperadas: etiqueta int64 y, opcionalmente, probabilidades float32 [1, n_clases].
/// Las probabilidades solo dan la confianza.
pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    n_features: Option<usize>,
    label_output_name: Option<String>,
    prob_output_name: Option<String>,
}

impl OnnxClassifier {
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?.commit_from_file(model_path)?;

        let input = session
            .inputs
            .first()
            .ok_or(ClassifierError::MissingIo { kind: "input" })?;
        let input_name = input.name.clone();

        // Dimensión fija de features si el grafo la declara ([None, 18] -> 18)
        let n_features = match &input.input_type {
            ValueType::Tensor { shape, .. } => shape
                .last()
                .copied()
                .filter(|d| *d > 0)
                .map(|d| d as usize),
            _ => None,
        };

        let kinds: Vec<(String, OutputKind)> = session
            .outputs
            .iter()
            .map(|output| (output.name.clone(), OutputKind::of(&output.output_type)))
            .collect();
        let OutputSelection {
            label: label_output_name,
            probabilities: prob_output_name,
            zipmap,
        } = select_outputs(&kinds);

        if prob_output_name.is_none() && label_output_name.is_none() {
            return Err(ClassifierError::MissingIo { kind: "output" });
        }
        if let Some(name) = zipmap {
            log::warn!(
                "⚠️  La salida '{}' es un ZipMap: sin probabilidades la confianza será 0. \
                 Exporta el modelo con options={{'zipmap': False}}",
                name
            );
        }

        log::info!("[ONNX] Modelo cargado: {}", model_path.display());
        log::info!("[ONNX] Input: {} ({:?} features)", input_name, n_features);
        log::info!(
            "[ONNX] Outputs: label={:?} probabilities={:?}",
            label_output_name,
            prob_output_name
        );

        Ok(Self {
            session,
            input_name,
            n_features,
            label_output_name,
            prob_output_name,
        })
    }

    pub fn has_probabilities(&self) -> bool {
        self.prob_output_name.is_some()
    }
}

impl Classifier for OnnxClassifier {
    fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    fn predict(&mut self, features: &[f32]) -> Result<ClassScores, ClassifierError> {
        if let Some(expected) = self.n_features {
            if features.len() != expected {
                return Err(ClassifierError::InvalidFeatureSize {
                    expected,
                    actual: features.len(),
                });
            }
        }

        // Tensor de entrada [1, n_features]
        let input_value = Tensor::from_array((vec![1_usize, features.len()], features.to_vec()))?;

        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => input_value,
        ])?;

        let probabilities = match &self.prob_output_name {
            Some(name) => {
                let (_, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
                Some(data.to_vec())
            }
            None => None,
        };

        let label = match &self.label_output_name {
            Some(name) => {
                let (_, data) = outputs[name.as_str()].try_extract_tensor::<i64>()?;
                data.first().copied()
            }
            None => None,
        };

        let class_index =
            resolve_class(label, probabilities.as_deref()).ok_or(ClassifierError::NoOutputTensor)?;

        Ok(ClassScores {
            class_index,
            probabilities,
        })
    }
}

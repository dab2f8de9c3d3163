use std::fmt;

use anyhow::{ensure, Result};

use crate::dataset::LabeledSamples;
use crate::gesture_classifier::Classifier;
use crate::predictor::Predictor;
use crate::preprocessing::{LabelEncoder, StandardScaler};

#[derive(Debug, Clone, PartialEq)]
pub struct ClassReport {
    pub class: String,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

/// Filas = clase real, columnas = clase predicha
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    pub classes: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Predicciones fuera de rango (None) no entran en ninguna columna
    pub fn new(classes: Vec<String>, y_true: &[usize], y_pred: &[Option<usize>]) -> Self {
        let n = classes.len();
        let mut counts = vec![vec![0usize; n]; n];
        for (&t, p) in y_true.iter().zip(y_pred) {
            if let Some(p) = p.filter(|p| *p < n) {
                if t < n {
                    counts[t][p] += 1;
                }
            }
        }
        Self { classes, counts }
    }

    pub fn report(&self) -> Vec<ClassReport> {
        let n = self.classes.len();
        (0..n)
            .map(|c| {
                let tp = self.counts[c][c] as f32;
                let predicted: usize = (0..n).map(|r| self.counts[r][c]).sum();
                let support: usize = self.counts[c].iter().sum();
                let precision = if predicted > 0 { tp / predicted as f32 } else { 0.0 };
                let recall = if support > 0 { tp / support as f32 } else { 0.0 };
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassReport {
                    class: self.classes[c].clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10}", "")?;
        for class in &self.classes {
            write!(f, " {:>8}", class)?;
        }
        writeln!(f)?;
        for (class, row) in self.classes.iter().zip(&self.counts) {
            write!(f, "{:>10}", class)?;
            for count in row {
                write!(f, " {:>8}", count)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub accuracy: f32,
    pub samples: usize,
    pub matrix: ConfusionMatrix,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for r in self.matrix.report() {
            writeln!(
                f,
                "{:<12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                r.class, r.precision, r.recall, r.f1, r.support
            )?;
        }
        writeln!(f, "\naccuracy: {:.4} ({} muestras)\n", self.accuracy, self.samples)?;
        write!(f, "{}", self.matrix)
    }
}

/// Evalúa un predictor (escalado + modelo + encoder) sobre muestras etiquetadas
pub fn evaluate<C: Classifier>(
    predictor: &mut Predictor<C>,
    samples: &LabeledSamples,
) -> Result<Evaluation> {
    ensure!(!samples.is_empty(), "No hay muestras para evaluar");

    let encoder = predictor.encoder().clone();
    let mut y_true = Vec::with_capacity(samples.len());
    let mut y_pred = Vec::with_capacity(samples.len());

    for (features, label) in samples.features.iter().zip(&samples.labels) {
        y_true.push(encoder.transform(label)?);
        let scores = predictor.classify(features)?;
        y_pred.push(usize::try_from(scores.class_index).ok());
    }

    let correct = y_true
        .iter()
        .zip(&y_pred)
        .filter(|(t, p)| Some(**t) == **p)
        .count();

    Ok(Evaluation {
        accuracy: correct as f32 / samples.len() as f32,
        samples: samples.len(),
        matrix: ConfusionMatrix::new(encoder.classes().to_vec(), &y_true, &y_pred),
    })
}

/// Ajusta scaler y encoder sobre el split de entrenamiento
pub fn fit_preprocessing(train: &LabeledSamples) -> Result<(StandardScaler, LabelEncoder)> {
    let scaler = StandardScaler::fit(&train.features)?;
    let encoder = LabelEncoder::fit(&train.labels)?;
    Ok((scaler, encoder))
}

/// Mejor candidato por accuracy; en empate gana el primero
pub fn select_best<T>(candidates: &[(T, Evaluation)]) -> Option<&(T, Evaluation)> {
    candidates.iter().fold(None, |best: Option<&(T, Evaluation)>, c| match best {
        Some(b) if b.1.accuracy >= c.1.accuracy => Some(b),
        _ => Some(c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::tests::ThresholdClassifier;
    use crate::predictor::PredictorConfig;
    use crate::types::FeatureLayout;

    fn classes() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn report_matches_hand_computed_metrics() {
        // reales: a a a b ; predichos: a b a b
        let matrix = ConfusionMatrix::new(
            classes(),
            &[0, 0, 0, 1],
            &[Some(0), Some(1), Some(0), Some(1)],
        );
        assert_eq!(matrix.counts, vec![vec![2, 1], vec![0, 1]]);

        let report = matrix.report();
        assert_eq!(report[0].precision, 1.0);
        assert!((report[0].recall - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(report[1].precision, 0.5);
        assert_eq!(report[1].recall, 1.0);
        assert_eq!(report[0].support, 3);
    }

    #[test]
    fn out_of_range_predictions_are_not_counted() {
        let matrix = ConfusionMatrix::new(classes(), &[0, 1], &[None, Some(7)]);
        assert_eq!(matrix.counts, vec![vec![0, 0], vec![0, 0]]);
    }

    #[test]
    fn evaluate_runs_through_the_predictor() {
        let encoder = LabelEncoder::new(vec!["neg".to_string(), "pos".to_string()]);
        let mut predictor = Predictor::new(
            ThresholdClassifier::new(10, Some(0.9)),
            None,
            encoder,
            PredictorConfig {
                layout: FeatureLayout::Wrist,
                ..Default::default()
            },
        )
        .unwrap();

        let mut samples = LabeledSamples::default();
        for (x, label) in [(1.0, "pos"), (-1.0, "neg"), (2.0, "neg"), (-3.0, "neg")] {
            let mut features = vec![0.0; 10];
            features[0] = x;
            samples.features.push(features);
            samples.labels.push(label.to_string());
        }

        let eval = evaluate(&mut predictor, &samples).unwrap();
        assert_eq!(eval.accuracy, 0.75);
        assert_eq!(eval.matrix.counts, vec![vec![2, 1], vec![0, 1]]);
        // evaluar no cuenta como predicción en vivo
        assert_eq!(predictor.prediction_count(), 0);
    }

    #[test]
    fn best_candidate_is_highest_accuracy_first_on_ties() {
        let eval = |accuracy| Evaluation {
            accuracy,
            samples: 1,
            matrix: ConfusionMatrix::new(classes(), &[], &[]),
        };
        let candidates = vec![("rf", eval(0.8)), ("svm", eval(0.9)), ("xgb", eval(0.9))];
        assert_eq!(select_best(&candidates).map(|c| c.0), Some("svm"));
        assert!(select_best::<&str>(&[]).is_none());
    }

    #[test]
    fn preprocessing_is_fitted_on_training_split() {
        let train = LabeledSamples {
            features: vec![vec![1.0, 0.0], vec![3.0, 0.0]],
            labels: vec!["up".to_string(), "down".to_string()],
        };
        let (scaler, encoder) = fit_preprocessing(&train).unwrap();
        assert_eq!(scaler.mean, vec![2.0, 0.0]);
        assert_eq!(encoder.classes(), &["down", "up"]);
    }
}

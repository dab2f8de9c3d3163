use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::ble::{BleConfig, DeviceSelector};
use crate::gesture_classifier::OnnxClassifier;
use crate::predictor::{Predictor, PredictorConfig};
use crate::preprocessing::{LabelEncoder, StandardScaler};
use crate::types::{FeatureLayout, FEATURES_CHAR_UUID, SERVICE_UUID};

#[derive(Parser, Debug)]
#[command(name = "motion-predictor")]
#[command(about = "Predicción de movimientos en tiempo real desde un Arduino por BLE")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Clasifica en vivo las features que llegan por BLE")]
    Predict(PredictArgs),
    #[command(about = "Graba lecturas BLE a un CSV de entrenamiento")]
    Collect(CollectArgs),
    #[command(about = "Graba lecturas BLE en el almacén de documentos")]
    Record(RecordArgs),
    #[command(about = "Exporta documentos del almacén a CSV")]
    Export(ExportArgs),
    #[command(about = "Une dos CSV de entrenamiento con la cabecera IMU")]
    Combine(CombineArgs),
    #[command(about = "Ajusta scaler y label encoder sobre un CSV")]
    FitPreprocessing(FitArgs),
    #[command(about = "Evalúa un modelo ONNX sobre el split de test")]
    Evaluate(EvaluateArgs),
    #[command(about = "Compara varios modelos ONNX y elige el mejor por accuracy")]
    Compare(CompareArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// MAC del periférico; si se da, no se escanea
    #[arg(long)]
    pub address: Option<String>,

    /// Palabras clave del nombre BLE (basta con una)
    #[arg(long = "name", default_values_t = ["Arduino".to_string(), "Nano".to_string()])]
    pub keywords: Vec<String>,

    #[arg(long, default_value = "hci0")]
    pub adapter: String,

    /// Segundos de escaneo
    #[arg(long, default_value_t = 10)]
    pub scan_secs: u64,

    #[arg(long, default_value = SERVICE_UUID)]
    pub service_uuid: String,

    #[arg(long, default_value = FEATURES_CHAR_UUID)]
    pub char_uuid: String,
}

impl DeviceArgs {
    pub fn ble_config(&self) -> BleConfig {
        let device = match &self.address {
            Some(mac) => DeviceSelector::Address(mac.clone()),
            None => DeviceSelector::NameKeywords(self.keywords.clone()),
        };
        BleConfig {
            adapter: self.adapter.clone(),
            device,
            scan_timeout: Duration::from_secs(self.scan_secs),
            service_uuid: self.service_uuid.clone(),
            char_uuid: self.char_uuid.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    #[arg(long, default_value = "best_motion_classifier.onnx")]
    pub model: PathBuf,

    /// classes.json ({"index_to_class": ...}); sin él se usa el mapeo manual
    #[arg(long, default_value = "label_encoder.json")]
    pub classes: PathBuf,

    /// Si el fichero no existe se clasifica sin escalar
    #[arg(long, default_value = "feature_scaler.json")]
    pub scaler: PathBuf,

    #[arg(long)]
    pub no_scaler: bool,
}

impl ModelArgs {
    pub fn load_encoder(&self) -> Result<LabelEncoder> {
        load_encoder(&self.classes)
    }

    pub fn load_scaler(&self) -> Result<Option<StandardScaler>> {
        if self.no_scaler {
            return Ok(None);
        }
        load_optional_scaler(&self.scaler)
    }

    pub fn load_predictor(&self, config: PredictorConfig) -> Result<Predictor<OnnxClassifier>> {
        let classifier = OnnxClassifier::new(&self.model)
            .with_context(|| format!("No se pudo cargar el modelo {:?}", self.model))?;
        let predictor =
            Predictor::new(classifier, self.load_scaler()?, self.load_encoder()?, config)?;
        Ok(predictor)
    }
}

pub fn load_encoder(path: &Path) -> Result<LabelEncoder> {
    if !path.exists() {
        log::warn!("⚠️  {:?} no existe, usando mapeo manual de etiquetas", path);
        return Ok(LabelEncoder::legacy());
    }
    let encoder = LabelEncoder::load(path)
        .with_context(|| format!("No se pudo leer el label encoder {:?}", path))?;
    log::info!("🏷️  Clases: {:?}", encoder.classes());
    Ok(encoder)
}

pub fn load_optional_scaler(path: &Path) -> Result<Option<StandardScaler>> {
    if !path.exists() {
        log::info!("ℹ️  Sin scaler ({:?} no existe), features sin normalizar", path);
        return Ok(None);
    }
    let scaler = StandardScaler::load(path)
        .with_context(|| format!("No se pudo leer el scaler {:?}", path))?;
    Ok(Some(scaler))
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    #[arg(long, default_value_t = FeatureLayout::Imu)]
    pub layout: FeatureLayout,

    /// Etiquetas del firmware que no se clasifican
    #[arg(long = "skip-label", default_values_t = ["still".to_string()])]
    pub skip_labels: Vec<String>,

    /// Notificaciones en cola antes de descartar
    #[arg(long, default_value_t = 100)]
    pub queue: usize,
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[arg(long, default_value_t = FeatureLayout::Wrist)]
    pub layout: FeatureLayout,

    /// Por defecto motion_data_<fecha>.csv
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Parar tras N segundos (por defecto, hasta que se corte la conexión)
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[arg(long, default_value_t = FeatureLayout::Imu)]
    pub layout: FeatureLayout,

    #[arg(long, default_value = "imu_db/imu_data.jsonl")]
    pub store: PathBuf,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long, default_value = "imu_db/imu_data.jsonl")]
    pub store: PathBuf,

    /// Ej: "data.18=right"
    #[arg(long)]
    pub filter: Option<String>,

    #[arg(long, default_value_t = FeatureLayout::Imu)]
    pub layout: FeatureLayout,

    #[arg(long, short, default_value = "training_data.csv")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct CombineArgs {
    /// CSV propio con columnas meanX..rangeZ
    pub ours: PathBuf,

    /// CSV de otro estudiante con columnas meanAx..rangeGz
    pub theirs: PathBuf,

    #[arg(long, short, default_value = "combined_training_data.csv")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    #[arg(long, default_value_t = FeatureLayout::Imu)]
    pub layout: FeatureLayout,

    #[arg(long, default_value_t = 0.2)]
    pub test_fraction: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    pub data: PathBuf,

    #[command(flatten)]
    pub split: SplitArgs,

    #[arg(long, default_value = "feature_scaler.json")]
    pub scaler_out: PathBuf,

    #[arg(long, default_value = "label_encoder.json")]
    pub classes_out: PathBuf,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    pub data: PathBuf,

    #[command(flatten)]
    pub split: SplitArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Evaluar sobre todas las filas en vez del split de test
    #[arg(long)]
    pub all: bool,
}

/// Modelo candidato: "modelo.onnx" o "modelo.onnx:scaler.json"
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub model: PathBuf,
    pub scaler: Option<PathBuf>,
}

impl std::str::FromStr for Candidate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (model, scaler) = match s.split_once(':') {
            Some((model, scaler)) => (model, Some(scaler)),
            None => (s, None),
        };
        if model.is_empty() || scaler.map(str::is_empty).unwrap_or(false) {
            return Err(format!("candidato inválido '{}'", s));
        }
        Ok(Self {
            model: PathBuf::from(model),
            scaler: scaler.map(PathBuf::from),
        })
    }
}

impl Candidate {
    pub fn name(&self) -> String {
        self.model
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.model.display().to_string())
    }
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    pub data: PathBuf,

    #[command(flatten)]
    pub split: SplitArgs,

    /// Modelos a comparar ("rf.onnx", "svm.onnx:feature_scaler.json", ...)
    #[arg(long = "candidate", required = true)]
    pub candidates: Vec<Candidate>,

    #[arg(long, default_value = "label_encoder.json")]
    pub classes: PathBuf,

    /// Copiar el mejor modelo a esta ruta
    #[arg(long)]
    pub save_best: Option<PathBuf>,
}

impl CompareArgs {
    pub fn validate(&self) -> Result<()> {
        for c in &self.candidates {
            if !c.model.exists() {
                bail!("El modelo {:?} no existe", c.model);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn predict_defaults_mirror_deployed_setup() {
        let cli = Cli::try_parse_from(["motion-predictor", "predict"]).unwrap();
        let Command::Predict(args) = cli.command else {
            panic!("subcomando incorrecto");
        };
        assert_eq!(args.layout, FeatureLayout::Imu);
        assert_eq!(args.skip_labels, vec!["still"]);
        assert_eq!(args.model.model, PathBuf::from("best_motion_classifier.onnx"));

        let ble = args.device.ble_config();
        assert_eq!(
            ble.device,
            DeviceSelector::NameKeywords(vec!["Arduino".to_string(), "Nano".to_string()])
        );
        assert_eq!(ble.scan_timeout, Duration::from_secs(10));
        assert_eq!(ble.char_uuid, FEATURES_CHAR_UUID);
    }

    #[test]
    fn address_skips_scanning() {
        let cli = Cli::try_parse_from([
            "motion-predictor",
            "record",
            "--address",
            "28:CD:C1:08:37:69",
            "--name",
            "Nano33",
        ])
        .unwrap();
        let Command::Record(args) = cli.command else {
            panic!("subcomando incorrecto");
        };
        assert_eq!(
            args.device.ble_config().device,
            DeviceSelector::Address("28:CD:C1:08:37:69".to_string())
        );
        assert_eq!(args.batch_size, 1);
    }

    #[test]
    fn candidates_parse_with_optional_scaler() {
        let c: Candidate = "svm.onnx:feature_scaler.json".parse().unwrap();
        assert_eq!(c.scaler, Some(PathBuf::from("feature_scaler.json")));
        assert_eq!(c.name(), "svm");

        let rf: Candidate = "models/rf.onnx".parse().unwrap();
        assert_eq!(rf.scaler, None);
        assert!("svm.onnx:".parse::<Candidate>().is_err());
    }

    #[test]
    fn missing_classes_file_falls_back_to_manual_mapping() {
        let encoder = load_encoder(Path::new("/nonexistent/label_encoder.json")).unwrap();
        assert_eq!(encoder, LabelEncoder::legacy());
        assert!(load_optional_scaler(Path::new("/nonexistent/scaler.json"))
            .unwrap()
            .is_none());
    }
}

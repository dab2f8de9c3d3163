use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use motion_predictor::config::ModelArgs;
use motion_predictor::predictor::PredictorConfig;
use motion_predictor::types::FeatureLayout;

/// Reproduce un CSV grabado como si llegara por BLE, línea a línea
#[derive(Parser, Debug)]
#[command(name = "replay_csv")]
struct ReplayArgs {
    /// CSV con una muestra por línea (cabecera opcional)
    csv: PathBuf,

    #[command(flatten)]
    model: ModelArgs,

    #[arg(long, default_value_t = FeatureLayout::Imu)]
    layout: FeatureLayout,

    /// Imprime el vector de features de cada línea
    #[arg(long)]
    dump_features: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = ReplayArgs::parse();
    println!("🎞️  Reproduciendo muestras desde {:?}", args.csv);

    let mut predictor = args.model.load_predictor(PredictorConfig {
        layout: args.layout,
        ..Default::default()
    })?;

    let file =
        File::open(&args.csv).with_context(|| format!("No se pudo abrir {:?}", args.csv))?;
    let reader = BufReader::new(file);
    let mut labelled = 0usize;
    let mut correct = 0usize;
    let mut rejected = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let prediction = match predictor.handle_notification(line.as_bytes()) {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("⚠️  Línea {}: {}", idx + 1, e);
                rejected += 1;
                continue;
            }
        };

        println!("{}", prediction);
        if args.dump_features {
            let features: Vec<String> = prediction
                .features
                .iter()
                .map(|f| format!("{:.4}", f))
                .collect();
            println!("   [{}]", features.join(", "));
        }

        if let Some(actual) = &prediction.actual {
            labelled += 1;
            if actual.eq_ignore_ascii_case(&prediction.label) {
                correct += 1;
            }
        }
    }

    println!("\n📊 Predicciones: {} (rechazadas: {})", predictor.prediction_count(), rejected);
    if labelled > 0 {
        println!(
            "🎯 Aciertos: {}/{} ({:.1}%)",
            correct,
            labelled,
            correct as f32 / labelled as f32 * 100.0
        );
    }
    Ok(())
}

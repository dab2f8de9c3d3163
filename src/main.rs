/*
Predicción de movimientos en tiempo real con BLE - Rust + ONNX

El Arduino Nano 33 IoT calcula media / desviación / rango por eje y envía
una línea CSV por notificación BLE. Este binario:
1. Recibe las notificaciones vía BlueZ (D-Bus)
2. Valida y parsea el vector de features
3. Normaliza (si el modelo lo necesita) y clasifica con ONNX Runtime
4. Imprime la etiqueta predicha

También incluye las herramientas para grabar datos de entrenamiento,
exportarlos, combinarlos y comparar modelos exportados a ONNX.

Ejemplo:
    RUST_LOG=info ./target/release/motion-predictor predict --address 28:CD:C1:08:37:69
*/

use std::fs;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};

use motion_predictor::ble::{get_stats, spawn_ble_receiver};
use motion_predictor::collector::{default_output_path, CsvRecorder, RecordOutcome};
use motion_predictor::config::{
    load_encoder, load_optional_scaler, Cli, CollectArgs, Command, CombineArgs, CompareArgs,
    EvaluateArgs, ExportArgs, FitArgs, PredictArgs, RecordArgs, SplitArgs,
};
use motion_predictor::dataset::{combine, Dataset, LabeledSamples};
use motion_predictor::evaluate::{evaluate, fit_preprocessing, select_best};
use motion_predictor::gesture_classifier::OnnxClassifier;
use motion_predictor::predictor::{Predictor, PredictorConfig};
use motion_predictor::store::{DocumentFilter, DocumentStore, SampleDocument};

const PROGRESS_EVERY: u64 = 10;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Predict(args) => run_predict(args),
        Command::Collect(args) => run_collect(args),
        Command::Record(args) => run_record(args),
        Command::Export(args) => run_export(args),
        Command::Combine(args) => run_combine(args),
        Command::FitPreprocessing(args) => run_fit(args),
        Command::Evaluate(args) => run_evaluate(args),
        Command::Compare(args) => run_compare(args),
    }
}

/// Siguiente notificación, respetando el límite de tiempo si lo hay.
/// None cuando se acaba el tiempo o se cierra la conexión.
fn next_notification(rx: &Receiver<Vec<u8>>, deadline: Option<Instant>) -> Option<Vec<u8>> {
    match deadline {
        None => rx.recv().ok(),
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(data) => Some(data),
                Err(RecvTimeoutError::Timeout) => {
                    log::info!("⏹️  Tiempo de captura agotado");
                    None
                }
                Err(RecvTimeoutError::Disconnected) => None,
            }
        }
    }
}

fn deadline(duration: Option<u64>) -> Option<Instant> {
    duration.map(|secs| Instant::now() + Duration::from_secs(secs))
}

fn run_predict(args: PredictArgs) -> Result<()> {
    println!("{}", "=".repeat(60));
    println!("  🤖 Predicción de movimientos en tiempo real");
    println!("{}", "=".repeat(60));

    log::info!("🔧 Inicializando clasificador ONNX...");
    let mut predictor = args.model.load_predictor(PredictorConfig {
        layout: args.layout,
        skip_labels: args.skip_labels.clone(),
    })?;
    log::info!(
        "✅ Clasificador cargado (layout {}, scaler: {})",
        predictor.layout(),
        if predictor.uses_scaler() { "sí" } else { "no" }
    );

    let rx = spawn_ble_receiver(args.device.ble_config(), args.queue);
    println!("💡 Haz movimientos con el Arduino para ver predicciones\n");

    for data in rx.iter() {
        match predictor.handle_notification(&data) {
            Ok(Some(prediction)) => {
                println!("{}", prediction);
                if prediction.shows_feature_sample() {
                    println!(
                        "   📊 Features de ejemplo (eje X): [{}...]",
                        prediction.feature_sample()
                    );
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("⚠️  {} ({:?})", e, String::from_utf8_lossy(&data)),
        }
    }

    let stats = get_stats();
    println!("\n⏹️  Predicción detenida");
    println!("📊 Total de predicciones: {}", predictor.prediction_count());
    println!(
        "📡 Notificaciones recibidas: {} (descartadas: {})",
        stats.notifications, stats.dropped
    );
    Ok(())
}

fn run_collect(args: CollectArgs) -> Result<()> {
    let output = args.output.clone().unwrap_or_else(default_output_path);
    let mut recorder = CsvRecorder::create(&output, args.layout)?;
    println!("💾 Guardando datos en: {}", recorder.path().display());

    let rx = spawn_ble_receiver(args.device.ble_config(), 100);
    let deadline = deadline(args.duration);
    println!("📊 Arma el dispositivo (gira la muñeca) para empezar a grabar gestos\n");

    while let Some(data) = next_notification(&rx, deadline) {
        match recorder.record_notification(&data)? {
            RecordOutcome::Ignored => {}
            RecordOutcome::Malformed { error, line } => {
                log::warn!("⚠️  Línea descartada ({}): {}", error, line);
            }
            RecordOutcome::Recorded { count, label } => {
                if count % PROGRESS_EVERY == 0 {
                    println!(
                        "✓ {} muestras recogidas... (label: {})",
                        count,
                        label.as_deref().unwrap_or("?")
                    );
                }
            }
        }
    }
    drop(rx);

    let (path, count) = recorder.finish()?;
    println!("\n✅ Captura completa");
    println!("   Total de muestras: {}", count);
    println!("   Guardado en: {}", path.display());
    Ok(())
}

fn run_record(args: RecordArgs) -> Result<()> {
    let mut store = DocumentStore::open(&args.store, args.batch_size)
        .with_context(|| format!("No se pudo abrir el almacén {:?}", args.store))?;
    log::info!("🗄️  Almacén de documentos: {}", store.path().display());

    let rx = spawn_ble_receiver(args.device.ble_config(), 100);
    let deadline = deadline(args.duration);
    let mut inserted = 0usize;

    while let Some(data) = next_notification(&rx, deadline) {
        let doc = match SampleDocument::from_notification(&data, args.layout) {
            Ok(Some(doc)) => doc,
            Ok(None) => continue,
            Err(e) => {
                log::debug!("Notificación descartada: {}", e);
                continue;
            }
        };
        println!("[notify] {}", doc.raw);

        match store.push(doc) {
            Ok(Some(n)) => {
                inserted += n;
                println!("Insertados {} docs", n);
            }
            Ok(None) => {}
            Err(e) => log::error!("❌ Inserción fallida: {}", e),
        }
    }
    drop(rx);

    if store.pending() > 0 {
        inserted += store.flush()?;
    }
    println!("✅ {} documentos guardados en {}", inserted, store.path().display());
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    let filter: DocumentFilter = match &args.filter {
        Some(f) => f.parse()?,
        None => DocumentFilter::all(),
    };
    let store = DocumentStore::open(&args.store, 1)?;
    let n = store.export_csv(&filter, args.layout, &args.output)?;
    println!("✅ {} documentos escritos en {}", n, args.output.display());
    Ok(())
}

fn run_combine(args: CombineArgs) -> Result<()> {
    let ours = Dataset::load(&args.ours)?;
    let theirs = Dataset::load(&args.theirs)?;
    let combined = combine(&ours, &theirs);
    combined.save(&args.output)?;

    println!("Nuestros datos: {} muestras", ours.len());
    println!("Datos ajenos: {} muestras", theirs.len());
    println!("Combinados: {} muestras", combined.len());
    println!("Guardado en {}", args.output.display());
    Ok(())
}

/// Carga, limpia y divide el CSV igual para fit, evaluate y compare
fn load_split(
    data: &std::path::Path,
    split: &SplitArgs,
) -> Result<(LabeledSamples, LabeledSamples)> {
    let dataset = Dataset::load(data)?;
    let report = dataset.clean(split.layout)?;
    ensure!(!report.samples.is_empty(), "No quedan muestras válidas en {:?}", data);

    println!(
        "✅ {} muestras cargadas ({} corruptas eliminadas)",
        report.samples.len(),
        report.removed
    );
    let classes: Vec<String> = report
        .samples
        .class_counts()
        .into_iter()
        .map(|(label, n)| format!("{}={}", label, n))
        .collect();
    println!("📊 Clases: {}", classes.join(", "));

    report.samples.stratified_split(split.test_fraction, split.seed)
}

fn run_fit(args: FitArgs) -> Result<()> {
    let (train, test) = load_split(&args.data, &args.split)?;
    let (scaler, encoder) = fit_preprocessing(&train)?;

    scaler.save(&args.scaler_out)?;
    encoder.save(&args.classes_out)?;

    println!("📐 Train: {} | Test: {}", train.len(), test.len());
    println!("✅ Guardado: {}", args.scaler_out.display());
    println!("✅ Guardado: {} ({:?})", args.classes_out.display(), encoder.classes());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let (train, test) = load_split(&args.data, &args.split)?;
    let samples = if args.all {
        let mut all = train;
        all.features.extend(test.features);
        all.labels.extend(test.labels);
        all
    } else {
        test
    };

    let mut predictor = args.model.load_predictor(PredictorConfig {
        layout: args.split.layout,
        skip_labels: Vec::new(),
    })?;
    let evaluation = evaluate(&mut predictor, &samples)?;

    println!("\n{}", evaluation);
    Ok(())
}

fn run_compare(args: CompareArgs) -> Result<()> {
    args.validate()?;
    let (_, test) = load_split(&args.data, &args.split)?;
    let encoder = load_encoder(&args.classes)?;

    let mut results = Vec::with_capacity(args.candidates.len());
    for candidate in &args.candidates {
        let scaler = match &candidate.scaler {
            Some(path) => Some(
                load_optional_scaler(path)?
                    .with_context(|| format!("El scaler {:?} no existe", path))?,
            ),
            None => None,
        };
        let classifier = OnnxClassifier::new(&candidate.model)
            .with_context(|| format!("No se pudo cargar {:?}", candidate.model))?;
        let mut predictor = Predictor::new(
            classifier,
            scaler,
            encoder.clone(),
            PredictorConfig {
                layout: args.split.layout,
                skip_labels: Vec::new(),
            },
        )?;

        let evaluation = evaluate(&mut predictor, &test)?;
        println!("   ✅ {:<24} accuracy {:.4}", candidate.name(), evaluation.accuracy);
        results.push((candidate.clone(), evaluation));
    }

    println!("\n{}", "=".repeat(60));
    println!("🏆 COMPARACIÓN DE MODELOS");
    println!("{}", "=".repeat(60));
    let best = select_best(&results).context("No hay candidatos")?;
    for (candidate, evaluation) in &results {
        let marker = if candidate == &best.0 { "🌟 MEJOR" } else { "" };
        println!("{:<24} {:.4}   {}", candidate.name(), evaluation.accuracy, marker);
    }

    println!("\n✅ Mejor modelo: {}", best.0.name());
    println!(
        "   Usa scaler: {}",
        if best.0.scaler.is_some() { "sí" } else { "no" }
    );
    println!("\n{}", best.1);

    if let Some(dest) = &args.save_best {
        fs::copy(&best.0.model, dest)
            .with_context(|| format!("No se pudo copiar {:?} a {:?}", best.0.model, dest))?;
        println!("💾 Guardado: {}", dest.display());
    }
    Ok(())
}

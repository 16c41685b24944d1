use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use comment_sentiment::{
    config::Config,
    logging::init_tracing,
    ml::{
        metrics::{gather_metrics, init_metrics},
        training::classifier_grid,
        ArtifactStore, ClassifierConfig, Document, LabeledDataset, ModelType, PredictionService,
        TrainingPipeline, TrainingReport,
    },
};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sentiment")]
#[command(about = "Train and serve a comment sentiment classifier", version, long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "SENTIMENT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the model artifacts
    #[arg(short, long, global = true)]
    model_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit, evaluate and persist a model
    Train {
        /// Training CSV with a `text,label` header
        #[arg(long)]
        train: Option<PathBuf>,

        /// Held-out test CSV with a `text,label` header
        #[arg(long)]
        test: Option<PathBuf>,

        /// Classifier family: logistic or centroid
        #[arg(long)]
        model: Option<ModelType>,
    },

    /// Rank logistic regression settings and the centroid model on a test set
    Compare {
        #[arg(long)]
        train: Option<PathBuf>,

        #[arg(long)]
        test: Option<PathBuf>,

        /// Inverse regularization strengths to try
        #[arg(long, value_delimiter = ',', default_values_t = vec![0.1, 0.5, 1.0, 2.0, 5.0])]
        c: Vec<f64>,

        /// Iteration caps to try
        #[arg(long, value_delimiter = ',', default_values_t = vec![500, 1000, 2000])]
        max_iter: Vec<usize>,
    },

    /// Predict the sentiment of one or more texts
    Predict {
        #[arg(value_name = "TEXT", required = true)]
        texts: Vec<String>,
    },

    /// Score the persisted model against a labelled CSV
    Evaluate {
        #[arg(long)]
        test: PathBuf,
    },

    /// Show the persisted model and its training report
    Info,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = &cli.model_dir {
        config.service.model_dir = dir.clone();
    }
    if cli.json_logs {
        config.observability.json_logs = true;
    }

    init_tracing(&config.observability)?;
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting sentiment");

    if config.observability.metrics_enabled {
        if let Err(e) = init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let outcome = run(cli.command, config);

    if cli.print_metrics {
        eprint!("{}", gather_metrics());
    }
    outcome
}

fn run(command: Commands, mut config: Config) -> anyhow::Result<()> {
    let store = ArtifactStore::new(config.service.model_dir.clone());

    match command {
        Commands::Train { train, test, model } => {
            if let Some(model_type) = model {
                config.classifier.model_type = model_type;
            }
            let train_path = train.unwrap_or(config.training.train_path.clone());
            let test_path = test.unwrap_or(config.training.test_path.clone());

            let train_set = LabeledDataset::from_csv_path(&train_path)
                .with_context(|| format!("Failed to read {}", train_path.display()))?;
            let test_set = LabeledDataset::from_csv_path(&test_path)
                .with_context(|| format!("Failed to read {}", test_path.display()))?;

            let pipeline = TrainingPipeline::new(config.vectorizer, config.classifier)?;
            let report = pipeline
                .run_and_persist(&train_set, &test_set, &store)
                .context("Training failed")?;

            let gates = report.quality_gates();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "artifact_id": report.artifact_id,
                    "model_dir": store.dir(),
                    "train_accuracy": report.train.metrics.accuracy,
                    "test_accuracy": report.test.metrics.accuracy,
                    "macro_f1": report.test.metrics.f1_score,
                    "inference_time_ms": report.test.inference_time_ms,
                    "quality_gates": gates,
                    "quality_gates_passed": gates.all_passed(),
                }))?
            );
        }

        Commands::Compare {
            train,
            test,
            c,
            max_iter,
        } => {
            let train_path = train.unwrap_or(config.training.train_path.clone());
            let test_path = test.unwrap_or(config.training.test_path.clone());
            let train_set = LabeledDataset::from_csv_path(&train_path)
                .with_context(|| format!("Failed to read {}", train_path.display()))?;
            let test_set = LabeledDataset::from_csv_path(&test_path)
                .with_context(|| format!("Failed to read {}", test_path.display()))?;

            let base = ClassifierConfig {
                model_type: ModelType::LogisticRegression,
                ..config.classifier.clone()
            };
            let mut candidates = classifier_grid(&base, &c, &max_iter);
            candidates.push(ClassifierConfig {
                model_type: ModelType::NearestCentroid,
                ..config.classifier.clone()
            });

            let pipeline = TrainingPipeline::new(config.vectorizer, config.classifier)?;
            let results = pipeline
                .compare(&train_set, &test_set, &candidates)
                .context("Comparison failed")?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Predict { texts } => {
            let documents = texts
                .iter()
                .map(|t| Document::parse(t))
                .collect::<Result<Vec<_>, _>>()?;

            let service = load_service(config)?;
            if let [document] = documents.as_slice() {
                let result = service.predict_single(document.as_str())?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let (results, statistics) = service.predict_batch(&documents)?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "results": results,
                        "statistics": statistics,
                    }))?
                );
            }
        }

        Commands::Evaluate { test } => {
            let test_set = LabeledDataset::from_csv_path(&test)
                .with_context(|| format!("Failed to read {}", test.display()))?;
            let service = load_service(config)?;
            let evaluation = service.evaluate(&test_set)?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }

        Commands::Info => {
            let report: Option<TrainingReport> = store.load_metrics()?;
            let service = load_service(config)?;
            let info = service.info()?;
            if let Some(report) = &report {
                if report.artifact_id != info.artifact_id {
                    tracing::warn!(
                        report = %report.artifact_id,
                        model = %info.artifact_id,
                        "Training report does not belong to the loaded model"
                    );
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "model": info,
                    "status": service.status(),
                    "training_report": report,
                }))?
            );
        }
    }

    Ok(())
}

fn load_service(config: Config) -> anyhow::Result<PredictionService> {
    let service = PredictionService::new(config.service);
    if let Err(e) = service.load() {
        if e.is_fatal() {
            bail!("{} (train a model first with `sentiment train`)", e);
        }
        return Err(e.into());
    }
    Ok(service)
}

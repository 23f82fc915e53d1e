use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tonescale_core::config::DetectorBackend;
use tonescale_core::{AnalyzerConfig, ScaleRegistry, SkinToneAnalyzer};
use tonescale_engine::{spawn_engine, EngineConfig, EngineHandle};

#[derive(Parser)]
#[command(name = "tonescale", about = "Skin-tone classification on the Monk scale")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the skin tone in one or more images
    Classify {
        /// Image files (PNG, JPEG...)
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Calibration file (TOML); see `tonescale config`
        #[arg(short, long, env = "TONESCALE_CONFIG")]
        config: Option<PathBuf>,
        /// SCRFD ONNX model; enables face detection
        #[arg(short, long, env = "TONESCALE_MODEL_PATH")]
        model: Option<PathBuf>,
        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Print the reference scale
    Scale {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the calibration config (defaults, or the given file after validation)
    Config {
        /// Calibration file to validate and print
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            images,
            config,
            model,
            pretty,
        } => {
            let failed = classify(&images, config.as_deref(), model, pretty).await?;
            if failed > 0 {
                anyhow::bail!("{failed} of {} images could not be classified", images.len());
            }
        }
        Commands::Scale { json } => print_scale(json)?,
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AnalyzerConfig> {
    match path {
        Some(path) => AnalyzerConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(AnalyzerConfig::default()),
    }
}

/// Classify every image concurrently; returns how many failed.
async fn classify(
    images: &[PathBuf],
    config_path: Option<&Path>,
    model: Option<PathBuf>,
    pretty: bool,
) -> Result<usize> {
    let mut config = load_config(config_path)?;
    if let Some(model) = model {
        config.locator.detector = DetectorBackend::Scrfd;
        config.locator.model_path = Some(model);
    }
    let analyzer = Arc::new(SkinToneAnalyzer::new(config)?);

    let engine_config = EngineConfig {
        // One-shot run: nothing to reuse across invocations.
        cache_capacity: 0,
        ..EngineConfig::from_env()
    };
    let engine = spawn_engine(analyzer, &engine_config)?;

    let mut tasks = Vec::with_capacity(images.len());
    for path in images {
        let engine = engine.clone();
        let path = path.clone();
        tasks.push(tokio::spawn(async move {
            let result = classify_one(&engine, &path).await;
            (path, result)
        }));
    }

    let mut failed = 0;
    for task in tasks {
        let (path, result) = task.await.context("classification task panicked")?;
        match result {
            Ok(result) => {
                let json = if pretty {
                    serde_json::to_string_pretty(&result)?
                } else {
                    serde_json::to_string(&result)?
                };
                println!("{json}");
            }
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e:#}", path.display());
            }
        }
    }
    Ok(failed)
}

async fn classify_one(
    engine: &EngineHandle,
    path: &Path,
) -> Result<tonescale_core::ClassificationResult> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let result = engine.analyze_encoded(bytes).await?;
    tracing::debug!(path = %path.display(), tone = %result.tone_label, "classified");
    Ok(result)
}

fn print_scale(json: bool) -> Result<()> {
    let scale = ScaleRegistry::monk();
    if json {
        println!("{}", serde_json::to_string_pretty(scale.tones())?);
        return Ok(());
    }
    println!("{:<6} {:<8} {:<8} {:<8} {:>10}", "INDEX", "ID", "NAME", "HEX", "BRIGHTNESS");
    for tone in scale.iter() {
        println!(
            "{:<6} {:<8} {:<8} {:<8} {:>10.1}",
            tone.index,
            tone.id,
            tone.name,
            tone.hex(),
            tone.brightness()
        );
    }
    Ok(())
}

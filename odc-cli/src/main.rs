use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use office_pool::{ConversionRequest, ConvertError, Converter, PoolConfig, PoolEvent, SubmittedTask};

#[derive(Parser)]
#[command(
    name = "odc",
    version,
    about = "Convert office documents through a pool of engine instances"
)]
struct Cli {
    /// Documents to convert.
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Target format extension (pdf, odt, docx, ...).
    #[arg(long, short = 't', default_value = "pdf")]
    to: String,

    /// Directory for converted files; defaults to each source's directory.
    #[arg(long, short)]
    out_dir: Option<PathBuf>,

    /// TOML configuration file (pool size, timeouts, engine binary).
    #[arg(long, short, env = "ODC_CONFIG")]
    config: Option<PathBuf>,

    /// Engine instances to run; overrides the config file.
    #[arg(long)]
    pool_size: Option<usize>,
}

fn load_config(cli: &Cli) -> anyhow::Result<PoolConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => PoolConfig::default(),
    };
    if let Some(pool_size) = cli.pool_size {
        config.pool_size = pool_size;
    }
    Ok(config)
}

fn target_for(source: &Path, out_dir: &Option<PathBuf>, extension: &str) -> anyhow::Result<PathBuf> {
    let stem = source
        .file_stem()
        .with_context(|| format!("{} has no file name", source.display()))?;
    let dir = out_dir.clone().unwrap_or_else(|| {
        source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    });
    Ok(dir.join(format!("{}.{}", stem.to_string_lossy(), extension)))
}

/// Submit, backing off briefly while the queue is full.
async fn submit_with_backoff(
    converter: &Converter,
    request: ConversionRequest,
) -> Result<SubmittedTask, ConvertError> {
    loop {
        match converter.submit(request.clone()) {
            Err(ConvertError::Backpressure { .. }) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => return other,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "odc=info,office_pool=info,office_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let converter = Converter::builder().config(config).build().await?;

    // Surface operational alerts while conversions run.
    let mut events = converter.subscribe();
    let alerts = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                PoolEvent::InstancePermanentlyDead { .. } => {
                    tracing::error!("{}", event.describe());
                }
                PoolEvent::InstanceDied { .. } | PoolEvent::RestartFailed { .. } => {
                    tracing::warn!("{}", event.describe());
                }
                _ => tracing::debug!("{}", event.describe()),
            }
        }
    });

    let mut submitted = Vec::new();
    let mut failures = 0usize;
    for source in &cli.sources {
        let target = target_for(source, &cli.out_dir, &cli.to)?;
        let request = ConversionRequest::new(source, target).with_format(cli.to.clone());
        match submit_with_backoff(&converter, request).await {
            Ok(handle) => submitted.push((source.clone(), handle)),
            Err(e) => {
                eprintln!("{}: {e}", source.display());
                failures += 1;
            }
        }
    }

    for (source, handle) in submitted {
        match handle.wait().await {
            Ok(conversion) if conversion.exported => {
                println!(
                    "{} -> {} ({} attempt(s), {:.1?})",
                    source.display(),
                    conversion.target.display(),
                    conversion.attempts,
                    conversion.elapsed
                );
            }
            Ok(_) => println!("{}: skipped by filter chain", source.display()),
            Err(e) => {
                eprintln!("{}: {e}", source.display());
                failures += 1;
            }
        }
    }

    converter.shutdown().await;
    alerts.abort();

    if failures > 0 {
        bail!("{failures} conversion(s) failed");
    }
    Ok(())
}

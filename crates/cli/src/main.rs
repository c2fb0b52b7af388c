use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_apply::{ApplyConfig, ApplyError, Applier, BatchReport, CancellationToken};
use keel_kubehub::{KubeDiscovery, KubeTransport};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Apply manifests with kubectl apply semantics")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update objects from manifest files
    Apply {
        /// Manifest file, or "-" for stdin. Repeatable; files are applied in order.
        #[arg(short = 'f', long = "filename", required = true, action = ArgAction::Append)]
        filenames: Vec<PathBuf>,
        /// Hand every object to the server's apply patch instead of computing a patch locally
        #[arg(long = "server-side", action = ArgAction::SetTrue)]
        server_side: bool,
        /// Field manager for server-side apply
        #[arg(long = "field-manager")]
        field_manager: Option<String>,
        /// Namespace for namespaced objects that do not declare one
        #[arg(short = 'n', long = "namespace")]
        namespace: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

async fn read_manifest(path: &PathBuf) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await.context("reading manifest from stdin")?;
        return Ok(buf);
    }
    tokio::fs::read(path).await.with_context(|| format!("reading {}", path.display()))
}

#[derive(Serialize)]
struct JsonLine<'a> {
    file: String,
    #[serde(flatten)]
    report: &'a BatchReport,
}

fn print_report(output: Output, file: &PathBuf, report: &BatchReport) -> Result<()> {
    match output {
        Output::Human => {
            for a in &report.applied {
                println!("{} {}", a.display_ref(), a.action);
            }
            for f in &report.failures {
                eprintln!("error: {}/{}: {}", f.kind.to_lowercase(), f.name, f.message);
            }
        }
        Output::Json => {
            let line = JsonLine { file: file.display().to_string(), report };
            println!("{}", serde_json::to_string_pretty(&line)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply { filenames, server_side, field_manager, namespace } => {
            let mut cfg = ApplyConfig::from_env();
            cfg.server_side |= server_side;
            if let Some(fm) = field_manager {
                cfg.field_manager = fm;
            }
            if let Some(ns) = namespace {
                cfg.default_namespace = ns;
            }
            info!(files = filenames.len(), server_side = cfg.server_side, field_manager = %cfg.field_manager, "apply invoked");

            let client = keel_kubehub::kube_client().await?;
            let applier = Applier::new(Arc::new(KubeDiscovery::new(client.clone())), Arc::new(KubeTransport::new(client))).with_config(cfg);

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received; cancelling apply");
                        cancel.cancel();
                    }
                }
            });

            let mut failed = 0usize;
            for file in &filenames {
                let manifest = read_manifest(file).await?;
                match applier.apply(&manifest, &cancel).await {
                    Ok(report) => {
                        failed += report.failures.len();
                        print_report(cli.output, file, &report)?;
                    }
                    Err(ApplyError::Cancelled { report, pending }) => {
                        print_report(cli.output, file, &report)?;
                        error!(pending, "apply cancelled");
                        anyhow::bail!("apply cancelled; {} object(s) in {} not attempted", pending, file.display());
                    }
                    Err(e) => {
                        error!(error = %e, file = %file.display(), "apply failed");
                        return Err(e).with_context(|| format!("applying {}", file.display()));
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} object(s) failed to apply", failed);
            }
        }
    }
    Ok(())
}

//! labeld: label printer daemon and one-shot CLI.
//!
//! `serve` runs the HTTP API and print queue until Ctrl+C. `print` and
//! `query` talk to the device once and exit; the exit code is 0 only when
//! the job succeeded.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use labelprinter::raster::{DEFAULT_THRESHOLD, load_png};
use labelprinter::{Family, Page, PrintJob, Query, TagPayload};

use labeld::app::SharedState;
use labeld::config::AppConfig;
use labeld::services::{print_queue, printer};
use labeld::{server, shutdown};

/// Label printer daemon
#[derive(Parser, Debug)]
#[command(name = "labeld")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Printer family: g, sp, tp, tp-b or t5080 (overrides PRINTER_FAMILY)
    #[arg(long, global = true)]
    family: Option<Family>,

    /// hidraw device node (overrides HIDRAW_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Run against the simulated device instead of hardware
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API and the print queue
    Serve {
        /// Listen port (overrides SERVER_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print PNG files as a single job, one page per file
    Print {
        #[arg(value_name = "PNG")]
        pages: Vec<PathBuf>,

        /// Raw tag payload to write before the pages
        #[arg(long, value_name = "FILE")]
        tag: Option<PathBuf>,

        /// Luma threshold; darker pixels print
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: u8,

        #[arg(long)]
        speed: Option<u16>,

        #[arg(long)]
        density: Option<u8>,

        #[arg(long)]
        paper_type: Option<u8>,
    },
    /// Read back device information
    Query {
        #[command(subcommand)]
        what: QueryKind,
    },
}

#[derive(Subcommand, Debug)]
enum QueryKind {
    /// Label resolution in dots per millimetre
    Dpi {
        #[arg(long)]
        paper_type: Option<u8>,
    },
    /// Loaded consumable
    Material,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = labeld::init_foundation();
    if let Some(family) = cli.family {
        config.printer_family = family;
    }
    if let Some(device) = cli.device {
        config.hidraw_path = device;
    }
    if cli.dry_run {
        config.dry_run_mode = true;
    }

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server_port = port;
            }
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Print {
            pages,
            tag,
            threshold,
            speed,
            density,
            paper_type,
        } => {
            let mut params = config.job_params();
            params.speed = speed.unwrap_or(params.speed);
            params.density = density.unwrap_or(params.density);
            params.paper_type = paper_type.unwrap_or(params.paper_type);

            let mut batch = Vec::with_capacity(pages.len());
            for path in &pages {
                let packed = load_png(path, threshold)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
                batch.push(Page::from(packed));
            }
            let mut job = PrintJob::new(params).with_batch(batch);
            if let Some(tag) = tag {
                let bytes = tokio::fs::read(&tag)
                    .await
                    .with_context(|| format!("Failed to read {}", tag.display()))?;
                job = job.with_tag(TagPayload::new(bytes));
            }
            anyhow::ensure!(
                job.has_pages() || job.has_tag(),
                "Nothing to print: pass PNG files or --tag"
            );
            print_once(config, job).await
        }
        Commands::Query { what } => {
            let query = match what {
                QueryKind::Dpi { paper_type } => Query::ReadDpi {
                    paper_type: paper_type.unwrap_or(config.paper_type),
                },
                QueryKind::Material => Query::ReadMaterial,
            };
            query_once(config, query).await
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting label server");
    let state = SharedState::new(config);

    let worker = print_queue::start_worker(state.clone()).await;

    let server_state = state.clone();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_state).await {
            tracing::error!("Server failed: {e}");
        }
    });

    let server_done = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Ctrl+C received");
            false
        }
        _ = &mut server_handle => true,
    };

    shutdown::graceful_shutdown(&state, Some(worker)).await;
    if !server_done {
        let _ = server_handle.await;
    }
    Ok(())
}

async fn print_once(config: AppConfig, job: PrintJob) -> anyhow::Result<ExitCode> {
    let state = SharedState::new(config);
    let job_id = uuid::Uuid::new_v4().to_string();

    // Ctrl+C turns into a cooperative stop of the running job
    let stopper = state.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping job");
            stopper.stop_active().await;
        }
    });

    let outcome = printer::print(&state, &job_id, job).await;
    ctrl_c.abort();
    let outcome = outcome?;

    println!("{outcome}");
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn query_once(config: AppConfig, query: Query) -> anyhow::Result<ExitCode> {
    let state = SharedState::new(config);
    let (outcome, report) = printer::query(&state, query).await?;
    match report {
        Some(report) if outcome.is_success() => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            println!("{outcome}");
            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lectern command-line front end.
//
// Runs page images through the recognition pipeline and exposes the review
// queue, audit trail and engine list. Completion events are printed to stdout
// as JSON lines.

mod data_dir;
mod services;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lectern_core::error::{LecternError, Result};
use lectern_core::types::{DocumentId, PageId, Resolution, ReviewTaskId, SourceFormat};
use lectern_document::PageInput;
use lectern_engine::CancelToken;
use lectern_pipeline::{BatchReport, CompletionReceiver};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use services::{AdapterMode, Services};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Multi-engine OCR/HTR pipeline: classify, recognise, fuse, review")]
#[command(version)]
struct Cli {
    /// Directory holding config.json, records.db and audit.db
    #[arg(long, global = true, env = "LECTERN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Pipeline config (JSON); replaces the one stored in the data directory
    #[arg(long, global = true, env = "LECTERN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognise page images, one page per file, in the order given
    Run {
        /// Back every configured engine with a mock adapter
        #[arg(long)]
        mock: bool,

        /// Document the pages belong to (a fresh id if omitted)
        #[arg(long)]
        document: Option<DocumentId>,

        /// Page images (PNG, JPEG, TIFF, BMP, WebP)
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Classify and recognise a stored page again
    Reprocess {
        #[arg(long)]
        mock: bool,

        page: PageId,

        /// The original image file
        image: PathBuf,
    },

    /// Inspect and resolve review tasks
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Show audit events, newest first
    Audit {
        /// Only events for this page, oldest first
        #[arg(long)]
        page: Option<PageId>,

        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// List configured engines and their health
    Engines {
        #[arg(long)]
        mock: bool,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// List open review tasks
    List,

    /// Replace the transcription with human-entered text
    Correct { task: ReviewTaskId, text: String },

    /// Mark the page unreadable
    Reject {
        task: ReviewTaskId,
        note: Option<String>,
    },
}

fn adapter_mode(mock: bool) -> AdapterMode {
    if mock {
        AdapterMode::Mock
    } else {
        AdapterMode::Real
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("lectern: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(data_dir::default_data_dir);
    let services = Services::init(data_dir, cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            mock,
            document,
            images,
        } => run(&services, mock, document, &images).await,
        Commands::Reprocess { mock, page, image } => {
            reprocess(&services, mock, page, &image).await
        }
        Commands::Review { action } => review(&services, action).await,
        Commands::Audit { page, limit } => {
            let entries = match page {
                Some(page) => services.audit().events_for_page(&page)?,
                None => services.audit().recent_events(limit)?,
            };
            print_lines(&entries)
        }
        Commands::Engines { mock } => {
            let (pipeline, _completions) = services.pipeline(adapter_mode(mock))?;
            print_lines(&pipeline.engine_snapshot())
        }
    }
}

async fn run(
    services: &Services,
    mock: bool,
    document: Option<DocumentId>,
    images: &[PathBuf],
) -> Result<()> {
    let document_id = document.unwrap_or_default();
    let mut inputs = Vec::with_capacity(images.len());
    for (index, path) in images.iter().enumerate() {
        inputs.push(read_page(path, document_id, index as u32)?);
    }

    let (pipeline, completions) = services.pipeline(adapter_mode(mock))?;
    let printer = spawn_printer(completions);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling remaining pages");
            on_interrupt.cancel();
        }
    });

    info!(
        document = %document_id,
        pages = inputs.len(),
        data_dir = %services.data_dir().display(),
        accept_threshold = services.config().accept_threshold,
        "starting run"
    );
    let report = pipeline.process_batch(inputs, &cancel).await;
    drop(pipeline);
    finish_printer(printer).await;

    summarize(&report);
    Ok(())
}

async fn reprocess(services: &Services, mock: bool, page: PageId, image: &Path) -> Result<()> {
    let bytes = std::fs::read(image)?;
    let (pipeline, completions) = services.pipeline(adapter_mode(mock))?;
    let printer = spawn_printer(completions);

    let outcome = pipeline.reprocess(page, &bytes, &CancelToken::new()).await;
    drop(pipeline);
    finish_printer(printer).await;

    let outcome = outcome?;
    eprintln!("page {}: {:?}", outcome.page.id, outcome.status);
    Ok(())
}

async fn review(services: &Services, action: ReviewAction) -> Result<()> {
    let (pipeline, completions) = services.pipeline(AdapterMode::None)?;
    let printer = spawn_printer(completions);

    let result = match action {
        ReviewAction::List => pipeline
            .open_reviews()
            .and_then(|tasks| print_lines(&tasks)),
        ReviewAction::Correct { task, text } => pipeline
            .resolve_review(task, Resolution::Corrected { text })
            .await
            .map(|_| ()),
        ReviewAction::Reject { task, note } => pipeline
            .resolve_review(task, Resolution::Rejected { note })
            .await
            .map(|_| ()),
    };
    drop(pipeline);
    finish_printer(printer).await;
    result
}

fn read_page(path: &Path, document_id: DocumentId, page_index: u32) -> Result<PageInput> {
    let bytes = std::fs::read(path).map_err(|err| {
        LecternError::Input(format!("cannot read {}: {err}", path.display()))
    })?;
    let mut input = PageInput::new(document_id, page_index, bytes);
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let format = SourceFormat::from_extension(ext);
        if format != SourceFormat::Other {
            input = input.with_format(format);
        }
    }
    Ok(input)
}

/// Print completion events as JSON lines until the pipeline is dropped.
fn spawn_printer(mut completions: CompletionReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = completions.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "failed to serialise completion event"),
            }
        }
    })
}

async fn finish_printer(printer: JoinHandle<()>) {
    if let Err(err) = printer.await {
        warn!(error = %err, "completion printer stopped abnormally");
    }
}

fn print_lines<T: Serialize>(items: &[T]) -> Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(())
}

fn summarize(report: &BatchReport) {
    for page in &report.pages {
        match &page.error {
            Some(err) => eprintln!("page {}: {:?} ({err})", page.page_index, page.status),
            None => eprintln!(
                "page {}: {:?}{}",
                page.page_index,
                page.status,
                page.confidence
                    .map(|c| format!(" confidence={c:.3}"))
                    .unwrap_or_default()
            ),
        }
    }
    for document in &report.documents {
        eprintln!(
            "document {}: {:?} ({} pages)",
            document.document_id, document.status, document.pages
        );
    }
}

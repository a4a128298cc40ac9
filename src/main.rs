use chrono::Utc;
use clap::Parser;
use notion_vault::cli::checks::{format_ago, format_bytes, run_checks};
use notion_vault::cli::commands::{Cli, Commands};
use notion_vault::config::ConfigLoader;
use notion_vault::progress::{ProgressHandle, Renderer};
use notion_vault::shutdown::setup_shutdown_handler;
use notion_vault::state::SyncState;
use notion_vault::sync::{SyncOptions, SyncOrchestrator};
use notion_vault::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress bars own the terminal during an interactive sync.
    let renderer = match &cli.command {
        Commands::Sync { quiet, .. } => Some(Renderer::detect(*quiet)),
        _ => None,
    };
    let interactive = matches!(renderer, Some(Renderer::Interactive(_)));

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = if interactive && !cli.verbose {
        BoxMakeWriter::new(std::io::sink)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set tracing subscriber: {}", e)))?;

    match cli.command {
        Commands::Sync { dry_run, force, .. } => {
            let renderer = renderer.unwrap_or_else(|| Renderer::detect(true));
            handle_sync(cli.config.as_deref(), dry_run, force, renderer).await?;
        }
        Commands::Status => {
            handle_status(cli.config.as_deref())?;
        }
        Commands::Validate => {
            handle_validate(cli.config.as_deref()).await?;
        }
    }

    Ok(())
}

async fn handle_sync(
    config_path: Option<&str>,
    dry_run: bool,
    force: bool,
    renderer: Renderer,
) -> Result<()> {
    let config_path = ConfigLoader::resolve_path(config_path)?;
    let config = ConfigLoader::load_from_file(&config_path)?;
    info!(
        "Configuration loaded from {}: {} roots configured",
        config_path.display(),
        config.sync.roots.len()
    );

    if dry_run {
        println!("🔍 Dry run: nothing will be written");
    }
    println!("🔄 Syncing into {}", config.vault_path().display());

    let cancel = CancellationToken::new();
    setup_shutdown_handler(cancel.clone());

    let progress = ProgressHandle::spawn(renderer);
    let options = SyncOptions { dry_run, force };
    let orchestrator = SyncOrchestrator::new(config, options, progress, cancel)?;
    let report = orchestrator.run().await?;

    println!(
        "📄 {} pages, {} entries written ({} unchanged, {} failed)",
        report.pages_written, report.entries_written, report.skipped, report.failed_items
    );
    if report.attachments_written > 0 || report.attachment_failures > 0 {
        println!(
            "📎 {} attachments written, {} failed",
            report.attachments_written, report.attachment_failures
        );
    }

    if report.cancelled {
        println!("⚠️  Sync cancelled; progress so far has been saved");
        return Ok(());
    }

    if report.is_success() {
        println!("✅ Sync completed in {:.1?}", report.duration);
        Ok(())
    } else {
        for error in &report.errors {
            println!("❌ {}", error);
        }
        Err(Error::Sync(format!(
            "{} of {} roots failed",
            report.errors.len(),
            report.errors.len() + report.roots_processed
        )))
    }
}

fn handle_status(config_path: Option<&str>) -> Result<()> {
    let config_path = ConfigLoader::resolve_path(config_path)?;
    let config = ConfigLoader::read(&config_path)?;
    let state = SyncState::load(config.state_path())?;

    println!("📊 notion-vault status");
    println!("💾 Vault: {}", config.vault_path().display());
    println!("🗂  State: {}", config.state_path().display());
    println!();

    if state.resource_count() == 0 {
        println!("📭 No resources synced yet");
        return Ok(());
    }

    let attachments = state.attachment_stats();
    println!("  Pages:       {}", state.page_count());
    println!("  Databases:   {}", state.database_count());
    println!("  Entries:     {}", state.entry_count());
    println!(
        "  Attachments: {} ({})",
        attachments.count,
        format_bytes(attachments.total_bytes)
    );
    match state.last_sync_time {
        Some(at) => println!(
            "  Last sync:   {} ({})",
            format_ago(at, Utc::now()),
            at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("  Last sync:   never"),
    }

    Ok(())
}

async fn handle_validate(config_path: Option<&str>) -> Result<()> {
    let config_path = ConfigLoader::resolve_path(config_path)?;
    println!("🔎 Validating {}", config_path.display());

    let results = run_checks(&config_path, CancellationToken::new()).await;
    for result in &results {
        println!("{}", result.line());
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if failed == 0 {
        println!("✅ All checks passed");
        Ok(())
    } else {
        Err(Error::Validation(format!("{} checks failed", failed)))
    }
}

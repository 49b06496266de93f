//! acm-install - content installer for racing simulator archives
//!
//! Developer harness over the library: list an archive, show what it would
//! install, install it.

use acm_install::archive::ArchiveReader;
use acm_install::content::ContentEntry;
use acm_install::installer::{InstallSession, ProgressEvent};
use acm_install::{InstallConfig, InstallError, ReaderConfig};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acm-install")]
#[command(version)]
#[command(about = "Install cars, tracks and other content from archives into the game folder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 7-Zip executable to use instead of looking it up
    #[arg(long, global = true, env = "ACM_7Z_PATH")]
    seven_zip: Option<PathBuf>,
}

#[derive(clap::Args)]
struct Target {
    /// Game root directory
    #[arg(short, long, env = "ACM_ROOT")]
    root: PathBuf,

    /// Directory for manager UI themes
    #[arg(long)]
    themes_dir: Option<PathBuf>,

    /// Overwrite track models shared with existing layouts
    #[arg(long)]
    replace_shared_models: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List files inside an archive
    List {
        archive: PathBuf,

        #[arg(short, long)]
        password: Option<String>,
    },

    /// Show content found in an archive and what installing it would do
    Scan {
        archive: PathBuf,

        #[arg(short, long)]
        password: Option<String>,

        #[command(flatten)]
        target: Target,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install content from an archive
    Install {
        archive: PathBuf,

        #[arg(short, long)]
        password: Option<String>,

        #[command(flatten)]
        target: Target,

        /// Update option to use where an entry offers it, e.g. "Keep UI Information"
        #[arg(short, long)]
        option: Option<String>,

        /// Ids of entries to leave out
        #[arg(long)]
        skip: Vec<String>,
    },
}

/// Wrap a library error with its user-facing title and comment
fn explain(e: InstallError) -> anyhow::Error {
    let message = format!("{}. {}", e.title(), e.comment());
    anyhow::Error::new(e).context(message)
}

fn install_config(target: &Target) -> InstallConfig {
    let mut config = InstallConfig::with_root(&target.root);
    if let Some(themes_dir) = &target.themes_dir {
        config.themes_dir = themes_dir.clone();
    }
    config.keep_existing_shared_models = !target.replace_shared_models;
    config
}

/// Token cancelled on Ctrl+C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            token.cancel();
        }
    });
    cancel
}

fn print_entry(entry: &ContentEntry) {
    let state = match (entry.existing(), entry.no_conflict()) {
        (None, _) => "new".to_string(),
        (Some(_), true) => "adds to existing".to_string(),
        (Some(existing), false) if entry.is_newer_version() => {
            format!("update of {}", existing.version.as_deref().unwrap_or("?"))
        }
        (Some(existing), false) if entry.is_older_version() => {
            format!("older than {}", existing.version.as_deref().unwrap_or("?"))
        }
        (Some(_), false) => "replaces existing".to_string(),
    };

    println!("{:<14} {:<24} {} [{}]", entry.content_type, entry.display_id(), entry.display_name(), state);
    println!("{:<14} from {}", "", entry.display_path());
    for (i, option) in entry.options().iter().enumerate() {
        let marker = if i == entry.selected_index() { '*' } else { ' ' };
        println!("{:<14} {} {}", "", marker, option.display_name);
    }
    if entry.shared_models_overlap() {
        println!("{:<14} shares models with installed layouts", "");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(if cli.verbose {
                    "acm_install=debug".parse()?
                } else {
                    "acm_install=warn".parse()?
                }),
            )
            .init();
    }

    let mut reader_config = ReaderConfig::default();
    if cli.seven_zip.is_some() {
        reader_config.executable = cli.seven_zip.clone();
    }
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::List { archive, password } => {
            let Some(reader) = ArchiveReader::open(&archive, password, reader_config, &cancel)
                .await
                .map_err(explain)?
            else {
                bail!("Cancelled");
            };
            let Some(listing) = reader.list_entries(&cancel).await.map_err(explain)? else {
                bail!("Cancelled");
            };

            for entry in &listing.entries {
                println!("{:>12}  {}", entry.size, entry.key);
            }
            let total: u64 = listing.entries.iter().map(|e| e.size).sum();
            eprintln!(
                "\nTotal: {} files, {} bytes{}",
                listing.entries.len(),
                total,
                if listing.solid { " (solid)" } else { "" }
            );
        }

        Commands::Scan {
            archive,
            password,
            target,
            json,
        } => {
            let config = install_config(&target);
            let mut session = InstallSession::open(&archive, password, reader_config, &config).map_err(explain)?;
            if session.scan(&cancel).await.map_err(explain)?.is_none() {
                bail!("Cancelled");
            }

            if json {
                let entries: Vec<serde_json::Value> = session
                    .entries()
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "type": e.content_type,
                            "id": e.id,
                            "name": e.display_name(),
                            "path": e.display_path(),
                            "version": e.version,
                            "new": e.is_new(),
                            "options": e.options().iter().map(|o| o.display_name.clone()).collect::<Vec<_>>(),
                            "selected": e.selected_index(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if session.entries().is_empty() {
                println!("Nothing to install in {}", archive.display());
            } else {
                for entry in session.entries() {
                    print_entry(entry);
                }
            }
        }

        Commands::Install {
            archive,
            password,
            target,
            option,
            skip,
        } => {
            let config = install_config(&target);
            let mut session = InstallSession::open(&archive, password, reader_config, &config).map_err(explain)?;
            if session.scan(&cancel).await.map_err(explain)?.is_none() {
                bail!("Cancelled");
            }

            for entry in session.entries_mut() {
                if skip.iter().any(|s| s.eq_ignore_ascii_case(&entry.id)) {
                    entry.active = false;
                }
                if let Some(name) = &option {
                    if !entry.select_option_by_name(name) {
                        eprintln!("{} has no option \"{}\", using \"{}\"", entry.id, name, selected_name(entry));
                    }
                }
            }

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} | {msg}")
                    .context("Invalid progress bar template")?
                    .progress_chars("=>-"),
            );
            pb.enable_steady_tick(Duration::from_millis(100));

            let bar = pb.clone();
            session.set_progress_callback(Arc::new(move |event| match event {
                ProgressEvent::PhaseStarted { message, .. } => bar.set_message(message),
                ProgressEvent::Copying { key, current, total } => {
                    bar.set_length(total as u64);
                    bar.set_position(current as u64);
                    bar.set_message(key);
                }
                ProgressEvent::Recycled { paths } => {
                    for path in paths {
                        bar.println(format!("Recycled {}", path.display()));
                    }
                }
                ProgressEvent::Installed { content_type, id, destination } => {
                    bar.println(format!("Installed {} {} to {}", content_type, id, destination.display()));
                }
                ProgressEvent::PhaseCompleted { .. } => {}
            }));

            let result = session.install(&cancel).await;
            pb.finish_and_clear();

            let Some(report) = result.map_err(explain)? else {
                bail!("Cancelled");
            };

            println!("\n=== Installation Summary ===");
            println!("Items: {}", report.installed.len());
            println!("Files: {} ({} bytes)", report.files_written, report.bytes_written);
        }
    }

    Ok(())
}

fn selected_name(entry: &ContentEntry) -> &str {
    entry
        .selected_option()
        .map_or("nothing", |o| o.display_name.as_str())
}

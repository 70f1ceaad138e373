use std::path::PathBuf;

use anyhow::Context;
use texsync::config::EngineConfig;
use texsync::logging::{self, info, warn};
use texsync::service::{SyncTask, TextureSync};
use texsync::state::StateStore;
use texsync::sync::apply::SyncOutcome;
use texsync::sync::progress::{InstallProgress, ProgressEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExistingFolder {
    Refuse,
    Backup,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Status,
    Sync,
    Install(ExistingFolder),
    Latest,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    mode: CliMode,
    textures_dir: Option<PathBuf>,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = None;
    let mut existing = ExistingFolder::Refuse;
    let mut textures_dir = None;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                return Ok(CliArgs {
                    mode: CliMode::Help,
                    textures_dir: None,
                });
            }
            "--backup" => existing = ExistingFolder::Backup,
            "--replace" => existing = ExistingFolder::Replace,
            command @ ("status" | "sync" | "install" | "latest") if mode.is_none() => {
                mode = Some(command.to_string());
            }
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            other => {
                if textures_dir.is_some() {
                    anyhow::bail!("unexpected argument: {other}");
                }
                textures_dir = Some(PathBuf::from(other));
            }
        }
    }

    let mode = match mode.as_deref().unwrap_or("status") {
        "sync" => CliMode::Sync,
        "install" => CliMode::Install(existing),
        "latest" => CliMode::Latest,
        _ => CliMode::Status,
    };
    if existing != ExistingFolder::Refuse && !matches!(mode, CliMode::Install(_)) {
        anyhow::bail!("--backup and --replace only apply to install");
    }
    Ok(CliArgs { mode, textures_dir })
}

fn print_help() {
    println!("Usage: texsync [status|sync|install [--backup|--replace]|latest] [TEXTURES_DIR]");
    println!("  status     Show what a sync would change (default)");
    println!("  sync       Bring the texture folder up to date");
    println!("  install    First-time installation into TEXTURES_DIR");
    println!("  --backup   Rename an existing folder before installing");
    println!("  --replace  Delete an existing folder before installing");
    println!("  latest     Print the latest upstream revision");
    println!("TEXTURES_DIR is remembered; later runs may omit it.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = parse_cli_mode(std::env::args())?;
    if args.mode == CliMode::Help {
        print_help();
        return Ok(());
    }
    logging::init_tracing();

    let config = EngineConfig::from_env()?;
    let store = StateStore::new(&config.state_file);
    let mut state = store
        .load()
        .with_context(|| format!("failed to load {}", store.path().display()))?;
    let service = TextureSync::from_config(&config).context("failed to build GitHub client")?;

    if args.mode == CliMode::Latest {
        println!("{}", service.resolve_latest_revision().await?);
        return Ok(());
    }

    if let Some(dir) = &args.textures_dir {
        let dir = dir.to_string_lossy();
        if state.textures_path.as_deref() != Some(dir.as_ref()) {
            state = store.set_textures_path(&dir)?;
        }
    }
    let textures_dir = state
        .textures_path
        .clone()
        .map(PathBuf::from)
        .context("no textures directory known yet; pass TEXTURES_DIR")?;
    let target = service.target_dir(&textures_dir);

    match args.mode {
        CliMode::Status => {
            let status = service.check_sync_status(&textures_dir).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if let Some(revision) = &state.last_synced_revision {
                println!("last synced revision: {revision}");
            }
        }
        CliMode::Sync => {
            if !service.check_existing_folder(&textures_dir) {
                anyhow::bail!(
                    "{} does not exist; run `texsync install` first",
                    target.display()
                );
            }
            let outcome = drive(service.run_sync(&textures_dir), print_sync_event).await?;
            report(&outcome);
            store.record_sync(&outcome, false)?;
            if !state.initial_setup_done && !outcome.is_cancelled() {
                store.set_initial_setup_done(true)?;
            }
        }
        CliMode::Install(existing) => {
            if service.check_existing_folder(&textures_dir) {
                match existing {
                    ExistingFolder::Refuse => anyhow::bail!(
                        "{} already exists; pass --backup or --replace",
                        target.display()
                    ),
                    ExistingFolder::Backup => {
                        let name = service.backup_existing_folder(&textures_dir).await?;
                        println!("Backed up existing folder to {name}");
                    }
                    ExistingFolder::Replace => {
                        service.delete_existing_folder(&textures_dir).await?;
                        println!("Deleted existing folder {}", target.display());
                    }
                }
            }
            let task = service.start_installation(&textures_dir)?;
            let outcome = drive(task, print_install_event).await?;
            report(&outcome);
            if !outcome.is_cancelled() {
                store.mark_setup_complete(&outcome.resulting_revision)?;
            }
        }
        CliMode::Latest | CliMode::Help => {}
    }
    Ok(())
}

/// Prints events until the worker finishes. Ctrl-C cancels after the file
/// in flight.
async fn drive<E>(
    mut task: SyncTask<E>,
    mut print: impl FnMut(&E),
) -> anyhow::Result<SyncOutcome> {
    let cancel = task.cancel.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, finishing the current file");
            cancel.cancel();
        }
    });
    while let Some(event) = task.events.recv().await {
        print(&event);
    }
    signal.abort();
    Ok(task.finish().await?)
}

fn print_sync_event(event: &ProgressEvent) {
    match (event.current, event.total) {
        (Some(current), Some(total)) => println!("[{current}/{total}] {}", event.message),
        _ => println!("[{}] {}", event.stage.as_str(), event.message),
    }
}

fn print_install_event(event: &InstallProgress) {
    match event.percent {
        Some(percent) => println!("[{percent:>3}%] {}", event.message),
        None => println!("[{}] {}", event.stage.as_str(), event.message),
    }
}

fn report(outcome: &SyncOutcome) {
    info!(revision = %outcome.resulting_revision, status = ?outcome.status, "{}", outcome.summary());
    for path in &outcome.skipped_paths {
        println!("skipped: {path}");
    }
    if outcome.is_cancelled() {
        println!("Cancelled. Run again to finish.");
    }
}

//! Waypoint CLI - drive the progress engine against a local store.

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use waypoint_core::{EngineConfig, LevelId, ModuleId, ScreenId, UnlockStatus, UserId};
use waypoint_progress::{EngineContext, ProgressStore};
use waypoint_storage::JsonStore;
use waypoint_sync::{LifecycleEvent, SyncEngine, SyncOptions};
use waypoint_timer::TimerPersistence;

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Course progress and sync engine", long_about = None)]
struct Cli {
    /// Data directory (store and config.json)
    #[arg(long, global = true, default_value = ".waypoint")]
    data_dir: PathBuf,

    /// User to act as
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show module and level status
    Status,
    /// Start a level
    Start {
        /// Module number
        module: u32,
        /// Level number
        level: u32,
    },
    /// Complete a level
    Complete {
        /// Module number
        module: u32,
        /// Level number
        level: u32,
    },
    /// Reconcile with the store
    Sync {
        /// Sync even if nothing changed
        #[arg(long)]
        force: bool,
    },
    /// Run a persisted countdown until it expires or Ctrl-C
    Countdown {
        /// Countdown screen
        screen: String,
        /// Initial duration when nothing is saved
        #[arg(long, default_value = "600")]
        seconds: u32,
    },
    /// Delete all progress of the user
    Reset {
        /// Confirm
        #[arg(long)]
        yes: bool,
    },
    /// Reseed one module's records
    Init {
        /// Module number
        module: u32,
        /// Confirm
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::load(cli.data_dir.join("config.json"))?;
    let remote = Arc::new(JsonStore::new(cli.data_dir.join("store")).await?);
    let user = UserId::new(cli.user);
    if !user.is_valid() {
        bail!("invalid user id {:?}", user.as_str());
    }

    let ctx = Arc::new(EngineContext::new(config.curriculum.clone()));
    let store = ProgressStore::new(remote.clone(), ctx.clone());
    let engine = SyncEngine::new(store.clone(), config.sync.clone());
    engine.sign_in(user.clone()).await;
    engine.handle(LifecycleEvent::Mount).await;
    store.seed_user(&user).await?;

    match cli.command {
        Commands::Status => {
            println!("Progress for {}", user);
            for module in config.curriculum.module_ids() {
                let summary = ctx.module_summary(module).await;
                println!(
                    "  Module {} [{}] {}/{} ({:.0}%)",
                    module,
                    format_status(ctx.module_status(module).await),
                    summary.completed,
                    summary.total,
                    summary.percentage(),
                );
                for level in config.curriculum.levels(module) {
                    println!("    Level {}: {}", level, format_status(ctx.level_status(module, level).await));
                }
            }
        }
        Commands::Start { module, level } => {
            let (module, level) = (ModuleId(module), LevelId(level));
            if !ctx.is_level_unlocked(module, level).await {
                bail!("level {}-{} is locked", module, level);
            }
            let record = store.start_level(&user, module, level).await?;
            println!("Started {} (completed: {})", record.key(), record.is_completed);
        }
        Commands::Complete { module, level } => {
            let (module, level) = (ModuleId(module), LevelId(level));
            if !ctx.is_level_unlocked(module, level).await {
                bail!("level {}-{} is locked", module, level);
            }
            let record = store.complete_level(&user, module, level).await?;
            println!("Completed {}", record.key());
            if ctx.is_module_completed(module).await {
                println!("Module {} completed", module);
            }
        }
        Commands::Sync { force } => {
            let result = engine
                .smart_sync(SyncOptions {
                    force,
                    ..Default::default()
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Countdown { screen, seconds } => {
            let mut timer = TimerPersistence::mount(
                remote.clone(),
                user.clone(),
                ScreenId::new(screen),
                seconds,
                config.timer.clone(),
            )
            .await
            .on_expire(|| println!("Time's up"));

            let mut remaining = timer.subscribe();
            println!("{} seconds left", timer.remaining());
            timer.start();

            loop {
                tokio::select! {
                    changed = remaining.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let left = *remaining.borrow_and_update();
                        if left == 0 {
                            break;
                        }
                        if left % 10 == 0 {
                            println!("{} seconds left", left);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted, saving countdown");
                        break;
                    }
                }
            }
            let left = timer.remaining();
            if timer.teardown().await {
                println!("Saved {} seconds", left);
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes all progress for {}; pass --yes to confirm", user);
            }
            let removed = store.admin().reset_user_progress(&user).await?;
            println!("Removed {} records", removed);
        }
        Commands::Init { module, yes } => {
            if !yes {
                bail!("init overwrites module {} for {}; pass --yes to confirm", module, user);
            }
            let progress = store
                .admin()
                .initialize_user_progress(&user, ModuleId(module))
                .await?;
            println!("Module {} reset to {} levels", module, progress.levels.len());
        }
    }

    if let Some(result) = engine.handle(LifecycleEvent::Unmount).await {
        if !result.success && !result.skipped {
            warn!(error = ?result.error, "exit push failed");
        }
    }

    Ok(())
}

fn format_status(status: UnlockStatus) -> &'static str {
    match status {
        UnlockStatus::Locked => "LOCKED",
        UnlockStatus::Available => "AVAILABLE",
        UnlockStatus::Completed => "COMPLETED",
    }
}

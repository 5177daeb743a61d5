//! mobd — the background supervisor binary. Parses a minimal flag set,
//! loads configuration, acquires the pidfile singleton, and runs the
//! patrol/nudge loop until shutdown.

use anyhow::{Context, Result};
use mob_core::config::Config;
use mob_core::pidfile::SupervisorPidFile;
use mob_daemon::supervisor::Supervisor;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mob_dir = mob_dir_from_args(&args).unwrap_or_else(|| {
        std::env::current_dir().expect("failed to read current directory")
    });
    let replace_mode = args.iter().any(|a| a == "--replace" || a == "-r");

    let config = Config::load_or_default(Config::default_path(&mob_dir.join(".mob")));

    if config.general.log_format == "json" {
        mob_telemetry::logging::init_logging_json("mobd", &config.general.log_level);
    } else {
        mob_telemetry::logging::init_logging("mobd", &config.general.log_level);
    }

    info!(mob_dir = %mob_dir.display(), pid = std::process::id(), "mobd starting");

    if replace_mode {
        if let Some(existing) = SupervisorPidFile::read_valid(&mob_dir) {
            info!(pid = existing.pid, "replacing existing supervisor (--replace)");
            #[cfg(unix)]
            unsafe {
                libc::kill(existing.pid as i32, libc::SIGTERM);
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let _ = SupervisorPidFile::remove(&mob_dir);
        }
    }

    let supervisor = Supervisor::new(mob_dir.clone(), config);
    supervisor
        .acquire_pidfile()
        .context("another supervisor is already running against this mob directory (use --replace)")?;

    let shutdown = supervisor.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    supervisor.run().await?;
    info!("mobd stopped");
    Ok(())
}

fn mob_dir_from_args(args: &[String]) -> Option<std::path::PathBuf> {
    args.iter()
        .position(|a| a == "--mob-dir")
        .and_then(|i| args.get(i + 1))
        .map(std::path::PathBuf::from)
}

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use runbox::catalog::Catalog;
use runbox::config::{CliArgs, Config};
use runbox::queue::JobQueue;
use runbox::sandbox::{DEFAULT_TIMEOUT, Sandbox};
use runbox::web_server::build_server;
use runbox::worker::worker;
use runbox::workspace::Workspace;

/// In-flight jobs get this long to finish after a termination signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Check if a command exists in the system PATH
fn check_command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check if the current user is root and warn if so
fn check_running_user() {
    if std::env::var("USER").unwrap_or_default() == "root"
        || std::env::var("LOGNAME").unwrap_or_default() == "root"
        || unsafe { libc::getuid() } == 0
    {
        log::warn!("WARNING: Running as root user is not recommended for security reasons!");
        log::warn!("Please consider running this application with a non-privileged user account.");
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = CliArgs::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(log_level));

    let concurrency = cli.concurrency;
    if concurrency == 0 {
        log::error!("The number of workers must not be 0");
        std::process::exit(1);
    }

    if !check_command_exists("docker") {
        log::error!("Required command 'docker' not found. Please install the docker CLI.");
        std::process::exit(1);
    }

    // Check running user and warn if running as root
    check_running_user();

    let config = Config::resolve(&cli).unwrap_or_else(|e| {
        log::error!("Failed to read configuration: {e}");
        std::process::exit(1);
    });

    let catalog = Catalog::builtin().unwrap_or_else(|e| {
        log::error!("Invalid language catalog: {e}");
        std::process::exit(1);
    });

    let workspace = Workspace::new(&config.workspace_dir).unwrap_or_else(|e| {
        log::error!("Failed to prepare workspace: {e}");
        std::process::exit(1);
    });
    log::info!("workspace ready at {}", workspace.root().display());

    let queue = JobQueue::connect(&config.redis_host, config.redis_port)
        .await
        .unwrap_or_else(|e| {
            log::error!("Failed to connect to the job queue broker: {e}");
            std::process::exit(1);
        });
    log::info!(
        "connected to redis at {}:{}",
        config.redis_host,
        config.redis_port
    );

    let catalog = Arc::new(catalog);
    let workspace = Arc::new(workspace);
    let sandbox = Arc::new(Sandbox::new(config.volume.clone(), DEFAULT_TIMEOUT));
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=concurrency {
        workers.spawn(worker(
            i,
            catalog.clone(),
            workspace.clone(),
            sandbox.clone(),
            queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(config.port, catalog, queue).unwrap_or_else(|e| {
        log::error!("Failed to start web server: {e}");
        std::process::exit(1);
    });
    log::info!("listening on port {}", config.port);

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {res_server:?}");
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {res_worker:?}");
        }
    }

    // 1. Shutdown actix-web server gracefully, refusing new submissions
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait for in-flight jobs, but only within the drain grace period
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    log::error!("Worker handle panicked: {e:?}");
                } else {
                    log::error!("Worker handle finished with error: {e:?}");
                }
            }
        }
    })
    .await;

    if drained.is_err() {
        log::warn!(
            "workers did not finish within {}s, aborting remaining jobs",
            SHUTDOWN_GRACE.as_secs()
        );
        workers.shutdown().await;
    }

    log::info!("Shutdown complete");
    Ok(())
}

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;

#[derive(Parser)]
#[command(name = "runbox", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Number of jobs executed concurrently
    #[arg(long = "concurrency", short = 'j', default_value_t = 5)]
    pub concurrency: u8,

    /// Host directory holding per-job source trees (defaults to the user cache dir)
    #[arg(long = "workspace", short = 'w')]
    pub workspace: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v', default_value_t = false)]
    pub verbose: bool,
}

/// Runtime configuration resolved from CLI arguments and the environment.
#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub redis_host: String,
    pub redis_port: u16,
    pub workspace_dir: PathBuf,
    /// Mount source passed to the container runtime. Usually the workspace
    /// directory itself; overridable when the workspace lives on a named
    /// volume shared with the daemon.
    pub volume: String,
}

impl Config {
    pub fn resolve(cli: &CliArgs) -> Result<Self> {
        let port = env_or("PORT", DEFAULT_PORT)?;
        let redis_host =
            std::env::var("REDIS_HOST").unwrap_or_else(|_| DEFAULT_REDIS_HOST.to_string());
        let redis_port = env_or("REDIS_PORT", DEFAULT_REDIS_PORT)?;

        let workspace_dir = match &cli.workspace {
            Some(dir) => dir.clone(),
            None => default_workspace_dir()?,
        };
        let volume = std::env::var("CODE_VOLUME")
            .unwrap_or_else(|_| workspace_dir.to_string_lossy().into_owned());

        Ok(Self {
            port,
            redis_host,
            redis_port,
            workspace_dir,
            volume,
        })
    }
}

fn default_workspace_dir() -> Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "runbox").ok_or_else(|| anyhow!("Unable to find user directory"))?;
    Ok(proj_dirs.cache_dir().join("workspace"))
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

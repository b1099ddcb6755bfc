/*!
pipecache CLI - pipeline step that persists or retrieves build caches.

Every option can also be set through the environment variables a CI runner
passes to plugin steps (`PLUGIN_*`, `DRONE_REPO`). `.env` and `.repo.env` in
the current directory are loaded first when present; variables already set in
the environment take precedence over both.
*/

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use pipecache_core::config::DEFAULT_SCRATCH_DIR;
use pipecache_core::entry::object_key;
use pipecache_core::{
    init_logging, CacheConfig, CacheCoordinator, CacheEntry, LogFormat, ObjectStorageConfig,
    RunMode, SharedVolumeDriver, StorageBackend,
};
use tabled::{Table, Tabled};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "pipecache")]
#[command(about = "Persist and retrieve build caches between pipeline runs")]
#[command(version)]
struct Cli {
    /// Run mode: persist or retrieve
    #[arg(long, env = "PLUGIN_MODE")]
    mode: Option<RunMode>,

    /// Legacy switch selecting retrieve mode
    #[arg(long, env = "PLUGIN_RESTORE", value_parser = BoolishValueParser::new())]
    restore: bool,

    /// Legacy switch selecting persist mode
    #[arg(long, env = "PLUGIN_REFRESH", value_parser = BoolishValueParser::new())]
    refresh: bool,

    /// Storage backend: volume or s3
    #[arg(long, env = "PLUGIN_STORAGE_TYPE", default_value = "volume")]
    storage_type: StorageBackend,

    /// Paths under the working directory to cache (comma separated)
    #[arg(long, env = "PLUGIN_CACHEABLE_RELATIVE_PATHS", value_delimiter = ',')]
    relative_paths: Vec<String>,

    /// Absolute paths to cache (comma separated)
    #[arg(long, env = "PLUGIN_CACHEABLE_ABSOLUTE_PATHS", value_delimiter = ',')]
    absolute_paths: Vec<String>,

    /// File whose content hash scopes the volume cache
    #[arg(long, env = "PLUGIN_VERSION_FILE_PATH")]
    version_file: Option<PathBuf>,

    /// Root of the shared cache volume
    #[arg(long, env = "PLUGIN_VOLUME_CACHE_ROOT_DIR")]
    volume_root: Option<PathBuf>,

    /// Repository name, scopes the volume cache
    #[arg(long, env = "DRONE_REPO", default_value = "")]
    repo_name: String,

    /// S3 endpoint (host:port or URL)
    #[arg(long, env = "PLUGIN_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    #[arg(long, env = "PLUGIN_S3_ACCESS_KEY_ID")]
    s3_access_key_id: Option<String>,

    #[arg(long, env = "PLUGIN_S3_SECRET", hide_env_values = true)]
    s3_secret: Option<String>,

    #[arg(long, env = "PLUGIN_S3_BUCKET")]
    s3_bucket: Option<String>,

    /// Key prefix for cache objects
    #[arg(long, env = "PLUGIN_S3_CACHE_ROOT_DIR", default_value = "")]
    s3_root_dir: String,

    #[arg(long, env = "PLUGIN_S3_REGION")]
    s3_region: Option<String>,

    /// Use plain HTTP for the S3 endpoint
    #[arg(long, env = "PLUGIN_S3_INSECURE", value_parser = BoolishValueParser::new())]
    s3_insecure: bool,

    /// Deflate level for archives (0-9)
    #[arg(long, env = "PLUGIN_COMPRESSION_LEVEL")]
    compression_level: Option<u32>,

    /// Directory relative paths resolve against
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Scratch directory for archives, relative to the working directory
    #[arg(long, default_value = DEFAULT_SCRATCH_DIR)]
    scratch_dir: PathBuf,

    /// Enable debug logging
    #[arg(short = 'v', long, env = "PLUGIN_DEBUG", value_parser = BoolishValueParser::new())]
    debug: bool,

    /// Log output format: text or json
    #[arg(long, env = "PLUGIN_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Persist or retrieve according to the configured mode (default)
    Run,
    /// Show which paths would be cached and where, without touching storage
    Plan,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Index")]
    index: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Local path")]
    local_path: String,
    #[tabled(rename = "Stored at")]
    location: String,
}

/// Loaded in this order; a variable set by an earlier file is kept
const ENV_FILES: [&str; 2] = [".env", ".repo.env"];

fn main() -> Result<(), anyhow::Error> {
    let env_files = load_env_files(Path::new("."))?;
    let cli = Cli::parse();

    init_logging(cli.log_format, cli.debug).context("failed to initialize logging")?;
    for path in &env_files {
        debug!(path = %path.display(), "Loaded environment file");
    }

    let config = create_cache_config(&cli)?;
    debug!(config = ?config, "Resolved configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config)?,
        Command::Plan => println!("{}", render_plan(&config)?),
    }

    Ok(())
}

fn load_env_files(dir: &Path) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut loaded = Vec::new();
    for name in ENV_FILES {
        let path = dir.join(name);
        if !path.is_file() {
            continue;
        }
        dotenvy::from_path(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        loaded.push(path);
    }
    Ok(loaded)
}

fn resolve_mode(cli: &Cli) -> Result<RunMode, anyhow::Error> {
    if let Some(mode) = cli.mode {
        return Ok(mode);
    }
    if cli.restore || cli.refresh {
        return Ok(RunMode::from_flags(cli.refresh, cli.restore)?);
    }
    Ok(RunMode::Retrieve)
}

fn clean_paths(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn create_cache_config(cli: &Cli) -> Result<CacheConfig, anyhow::Error> {
    let mode = resolve_mode(cli)?;
    let mut config = CacheConfig::new(mode, cli.storage_type);

    config.relative_paths = clean_paths(&cli.relative_paths);
    config.absolute_paths = clean_paths(&cli.absolute_paths);
    config.work_dir = cli.work_dir.clone();
    config.scratch_dir = cli.scratch_dir.clone();
    config.repo_name = cli.repo_name.clone();
    config.version_file = cli.version_file.clone().filter(|p| !p.as_os_str().is_empty());
    config.volume_root = cli.volume_root.clone();
    config.compression_level = cli.compression_level;

    if cli.storage_type == StorageBackend::ObjectStorage {
        config.object_storage = Some(ObjectStorageConfig {
            endpoint: cli.s3_endpoint.clone().unwrap_or_default(),
            bucket: cli.s3_bucket.clone().unwrap_or_default(),
            root_dir: cli.s3_root_dir.clone(),
            region: cli.s3_region.clone(),
            access_key_id: cli.s3_access_key_id.clone(),
            secret_access_key: cli.s3_secret.clone(),
            insecure: cli.s3_insecure,
        });
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(config: &CacheConfig) -> Result<(), anyhow::Error> {
    let coordinator = CacheCoordinator::from_config(config)?;
    let outcome = coordinator
        .execute()
        .with_context(|| format!("cache {} failed", config.mode))?;

    info!(outcome = %outcome, "Cache step complete");

    let metrics = pipecache_core::observability::gather_metrics()?;
    if !metrics.is_empty() {
        debug!("Metrics:\n{metrics}");
    }
    Ok(())
}

fn plan_rows(config: &CacheConfig) -> Result<Vec<PlanRow>, anyhow::Error> {
    let entries = CacheEntry::from_config(config);

    let location: Box<dyn Fn(&CacheEntry) -> String> = match config.backend {
        StorageBackend::Volume => {
            let driver = SharedVolumeDriver::new(config)?;
            let persist_dir = driver.persist_dir().to_path_buf();
            Box::new(move |entry: &CacheEntry| {
                entry.cache_path(&persist_dir).display().to_string()
            })
        }
        StorageBackend::ObjectStorage => {
            let root = config
                .object_storage
                .as_ref()
                .map(|settings| settings.root_dir.clone())
                .unwrap_or_default();
            Box::new(move |entry: &CacheEntry| object_key(&root, &entry.path_key()))
        }
    };

    Ok(entries
        .iter()
        .map(|entry| PlanRow {
            index: entry.index,
            kind: entry.kind.to_string(),
            local_path: entry.local_path(&config.work_dir).display().to_string(),
            location: location(entry),
        })
        .collect())
}

fn render_plan(config: &CacheConfig) -> Result<String, anyhow::Error> {
    let rows = plan_rows(config)?;
    if rows.is_empty() {
        return Ok("No cache paths configured.".to_string());
    }
    Ok(Table::new(rows).to_string())
}

#![forbid(unsafe_code)]

//! Environment-driven configuration.
//!
//! # Design
//! - One `Settings::from_env` entry point read once at bootstrap; the rest
//!   of the workspace receives plain structs, never the environment.
//! - Required variables fail fast with `MissingEnv`; malformed values fail
//!   with `Invalid` and name the offending variable.
//! - Every tunable has a shipped default matching the documented engine
//!   behaviour.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failures raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable was absent.
    #[error("required environment variable missing")]
    MissingEnv {
        /// Variable name.
        name: &'static str,
    },
    /// A variable was present but unparseable.
    #[error("environment variable invalid")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// HTTP facade settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Bind address for the API listener, from `API_URL`.
    pub bind_addr: String,
}

/// Durable store settings.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL connection string, from `DATABASE_URL`.
    pub url: String,
    /// Connection pool size.
    pub max_connections: u32,
}

/// Ephemeral progress store settings.
#[derive(Debug, Clone)]
pub struct ProgressSettings {
    /// Redis connection string, from `REDIS_URL`; the in-memory store is
    /// used when absent.
    pub redis_url: Option<String>,
    /// Time-to-live for progress records.
    pub ttl: Duration,
}

/// Storage roots the pipeline works in.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Scratch root downloads land in, from `STORAGE_WORKING`.
    pub working: PathBuf,
    /// Root processed packages are assembled under, from
    /// `STORAGE_PROCESSED`.
    pub processed: PathBuf,
    /// Root sample cuts are staged under, from `STORAGE_SAMPLES`.
    pub samples: PathBuf,
}

/// Endpoints and credentials for the external download clients.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// qBittorrent Web API base URL.
    pub qbittorrent_url: String,
    /// aria2 JSON-RPC endpoint.
    pub aria2_url: String,
    /// aria2 RPC secret, when the daemon requires one.
    pub aria2_secret: Option<String>,
    /// rclone binary path.
    pub rclone_bin: PathBuf,
    /// rclone configuration file path.
    pub rclone_config: Option<PathBuf>,
    /// rclone remote name used for Google Drive transfers.
    pub rclone_remote: String,
    /// SABnzbd base URL.
    pub sabnzbd_url: String,
    /// SABnzbd API key.
    pub sabnzbd_api_key: Option<String>,
    /// Directory SABnzbd completes the engine category into.
    pub sabnzbd_complete_dir: PathBuf,
}

/// Paths of the external media tools.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// ffprobe binary path.
    pub ffprobe_bin: PathBuf,
    /// ffmpeg binary path.
    pub ffmpeg_bin: PathBuf,
    /// Sync measurement analyzer binary path.
    pub analyzer_bin: PathBuf,
}

/// Driver tunables.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Re-entry cap after FAILED/CANCELLED.
    pub retry_cap: u32,
    /// Per-step command timeout.
    pub step_timeout: Duration,
    /// Timeout for the blocking cloud-copy invocation.
    pub cloud_copy_timeout: Duration,
    /// Timeout for client health probes.
    pub health_probe_timeout: Duration,
    /// Concurrent jobs allowed in the download stage.
    pub download_slots: usize,
    /// Concurrent jobs allowed in the processing stages.
    pub process_slots: usize,
    /// Concurrent jobs allowed in the upload stage.
    pub upload_slots: usize,
}

/// Upload delivery settings.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Primary rclone remote the package is delivered to.
    pub primary_remote: String,
    /// Optional secondary remote used on primary failure.
    pub secondary_remote: Option<String>,
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP facade settings.
    pub api: ApiSettings,
    /// Durable store settings.
    pub database: DatabaseSettings,
    /// Ephemeral store settings.
    pub progress: ProgressSettings,
    /// Storage roots.
    pub storage: StorageSettings,
    /// External client endpoints.
    pub clients: ClientSettings,
    /// External tool paths.
    pub tools: ToolSettings,
    /// Driver tunables.
    pub pipeline: PipelineSettings,
    /// Upload targets.
    pub upload: UploadSettings,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnv` for absent required variables and `Invalid`
    /// for values that fail to parse.
    pub fn from_env() -> ConfigResult<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_map(&vars)
    }

    /// Load settings from an explicit variable map (used by tests).
    ///
    /// # Errors
    ///
    /// Same contract as [`Settings::from_env`].
    pub fn from_map(vars: &HashMap<String, String>) -> ConfigResult<Self> {
        let database_url = require(vars, "DATABASE_URL")?;
        let redis_url = optional(vars, "REDIS_URL");
        if redis_url.is_none() {
            warn!("REDIS_URL not set; progress records will be kept in process memory");
        }

        Ok(Self {
            api: ApiSettings {
                bind_addr: optional(vars, "API_URL")
                    .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            },
            database: DatabaseSettings {
                url: database_url,
                max_connections: parse_or(vars, "DATABASE_MAX_CONNECTIONS", 8)?,
            },
            progress: ProgressSettings {
                redis_url,
                ttl: Duration::from_secs(parse_or(vars, "PROGRESS_TTL_SECONDS", 3600)?),
            },
            storage: StorageSettings {
                working: require_path(vars, "STORAGE_WORKING")?,
                processed: require_path(vars, "STORAGE_PROCESSED")?,
                samples: require_path(vars, "STORAGE_SAMPLES")?,
            },
            clients: ClientSettings {
                qbittorrent_url: optional(vars, "QBITTORRENT_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:8081".to_string()),
                aria2_url: optional(vars, "ARIA2_RPC_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:6800/jsonrpc".to_string()),
                aria2_secret: optional(vars, "ARIA2_RPC_SECRET"),
                rclone_bin: optional_path(vars, "RCLONE_BIN")
                    .unwrap_or_else(|| PathBuf::from("rclone")),
                rclone_config: optional_path(vars, "RCLONE_CONFIG"),
                rclone_remote: optional(vars, "RCLONE_GDRIVE_REMOTE")
                    .unwrap_or_else(|| "gdrive:".to_string()),
                sabnzbd_url: optional(vars, "SABNZBD_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:8085".to_string()),
                sabnzbd_api_key: optional(vars, "SABNZBD_API_KEY"),
                sabnzbd_complete_dir: optional_path(vars, "SABNZBD_COMPLETE_DIR")
                    .unwrap_or_else(|| PathBuf::from("/downloads/complete/mediabot")),
            },
            tools: ToolSettings {
                ffprobe_bin: optional_path(vars, "FFPROBE_BIN")
                    .unwrap_or_else(|| PathBuf::from("ffprobe")),
                ffmpeg_bin: optional_path(vars, "FFMPEG_BIN")
                    .unwrap_or_else(|| PathBuf::from("ffmpeg")),
                analyzer_bin: optional_path(vars, "SYNC_ANALYZER_BIN")
                    .unwrap_or_else(|| PathBuf::from("av-sync-probe")),
            },
            pipeline: PipelineSettings {
                retry_cap: parse_or(vars, "JOB_RETRY_CAP", 3)?,
                step_timeout: Duration::from_secs(parse_or(vars, "STEP_TIMEOUT_SECONDS", 1800)?),
                cloud_copy_timeout: Duration::from_secs(parse_or(
                    vars,
                    "CLOUD_COPY_TIMEOUT_SECONDS",
                    3600,
                )?),
                health_probe_timeout: Duration::from_secs(parse_or(
                    vars,
                    "HEALTH_PROBE_TIMEOUT_SECONDS",
                    5,
                )?),
                download_slots: parse_or(vars, "DOWNLOAD_SLOTS", 4)?,
                process_slots: parse_or(vars, "PROCESS_SLOTS", 2)?,
                upload_slots: parse_or(vars, "UPLOAD_SLOTS", 4)?,
            },
            upload: UploadSettings {
                primary_remote: optional(vars, "UPLOAD_PRIMARY_REMOTE")
                    .unwrap_or_else(|| "storage:packages".to_string()),
                secondary_remote: optional(vars, "UPLOAD_SECONDARY_REMOTE"),
            },
        })
    }
}

fn require(vars: &HashMap<String, String>, name: &'static str) -> ConfigResult<String> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or(ConfigError::MissingEnv { name })
}

fn require_path(vars: &HashMap<String, String>, name: &'static str) -> ConfigResult<PathBuf> {
    require(vars, name).map(PathBuf::from)
}

fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
}

fn optional_path(vars: &HashMap<String, String>, name: &str) -> Option<PathBuf> {
    optional(vars, name).map(PathBuf::from)
}

fn parse_or<T>(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: T,
) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err| ConfigError::Invalid {
            name,
            reason: format!("{err}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_vars() -> HashMap<String, String> {
        HashMap::from([
            ("DATABASE_URL".to_string(), "postgres://localhost/mediabot".to_string()),
            ("STORAGE_WORKING".to_string(), "/data/work".to_string()),
            ("STORAGE_PROCESSED".to_string(), "/data/processed".to_string()),
            ("STORAGE_SAMPLES".to_string(), "/data/samples".to_string()),
        ])
    }

    #[test]
    fn minimal_environment_loads_with_defaults() {
        let settings = Settings::from_map(&minimal_vars()).expect("loads");
        assert_eq!(settings.api.bind_addr, "0.0.0.0:8080");
        assert_eq!(settings.pipeline.retry_cap, 3);
        assert_eq!(settings.pipeline.download_slots, 4);
        assert_eq!(settings.pipeline.process_slots, 2);
        assert_eq!(settings.progress.ttl, Duration::from_secs(3600));
        assert!(settings.progress.redis_url.is_none());
    }

    #[test]
    fn missing_database_url_fails_fast() {
        let mut vars = minimal_vars();
        vars.remove("DATABASE_URL");
        let err = Settings::from_map(&vars).expect_err("must fail");
        assert!(matches!(err, ConfigError::MissingEnv { name: "DATABASE_URL" }));
    }

    #[test]
    fn malformed_number_names_the_variable() {
        let mut vars = minimal_vars();
        vars.insert("JOB_RETRY_CAP".to_string(), "many".to_string());
        let err = Settings::from_map(&vars).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { name: "JOB_RETRY_CAP", .. }));
    }
}

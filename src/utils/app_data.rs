use crate::scanner::ScannerKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "harx";
const CONFIG_FILE: &str = "config.json";
const INDEX_EXTENSION: &str = "idx";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Decoded entries kept in the LRU cache; 0 disables caching
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Upper bound on concurrently open file handles
    #[serde(default = "default_max_open_files")]
    pub max_open_files: usize,

    /// Reusable read buffers kept by the entry reader
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,

    /// Search worker threads
    /// If 0, uses the number of CPU cores
    #[serde(default)]
    pub worker_count: usize,

    /// Persist indexes next to the config and reuse them when fresh
    #[serde(default = "default_persist_index")]
    pub persist_index: bool,

    /// Scanner backend used for builds and body streaming
    #[serde(default)]
    pub scanner: ScannerKind,
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_max_open_files() -> usize {
    8
}

fn default_buffer_pool_size() -> usize {
    16
}

fn default_persist_index() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            max_open_files: default_max_open_files(),
            buffer_pool_size: default_buffer_pool_size(),
            worker_count: 0,
            persist_index: default_persist_index(),
            scanner: ScannerKind::default(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;

        if config_path.exists() {
            let content =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: AppConfig =
                serde_json::from_str(&content).context("Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

/// Get the number of CPUs available
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Get the path to the config file
pub fn get_config_path() -> io::Result<PathBuf> {
    Ok(get_app_data_dir()?.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> io::Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.ok_or_else(|| io::Error::other("could not determine app data directory"))?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Default location of the persisted index for a HAR file
pub fn get_index_path(har_path: &Path) -> io::Result<PathBuf> {
    let indexes_dir = get_app_data_dir()?.join("indexes");
    fs::create_dir_all(&indexes_dir)?;
    Ok(indexes_dir.join(format!("{}.{}", hash_path(har_path), INDEX_EXTENSION)))
}

/// Hash a path to create a unique file name
/// Format: first 16 chars of the file stem + hash
fn hash_path(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    // File stem for readability
    let stem = canonical
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    let sanitized: String = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(16)
        .collect();

    let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
    format!("{}-{}", sanitized, &hash.to_hex()[..16])
}

//! Configuration management.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the memory engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,
    /// Serving similarity threshold used when callers do not supply one.
    pub default_search_threshold: f32,
    /// Maximum number of search results when callers do not supply a limit.
    pub max_results: usize,
    /// Duplicate-detection threshold used by the formation pipeline.
    ///
    /// Stricter than the serving threshold: a candidate at or above it is
    /// considered the same topic as an existing memory.
    pub duplicate_threshold: f32,
    /// Equivalence threshold used by the formation pipeline.
    ///
    /// At or above it the candidate carries no material change and is
    /// skipped; between `duplicate_threshold` and this value the candidate
    /// supersedes the match.
    pub equivalence_threshold: f32,
    /// Capacity of the formation queue buffer.
    pub queue_capacity: usize,
    /// Default deadline for draining the queue at shutdown.
    pub stop_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("engram.db"),
            default_search_threshold: 0.5,
            max_results: 10,
            duplicate_threshold: 0.85,
            equivalence_threshold: 0.95,
            queue_capacity: 64,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Database path.
    pub db_path: Option<String>,
    /// Serving search threshold.
    pub default_search_threshold: Option<f32>,
    /// Max results.
    pub max_results: Option<usize>,
    /// Formation section.
    pub formation: Option<ConfigFileFormation>,
}

/// Formation section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFormation {
    /// Duplicate-detection threshold.
    pub duplicate_threshold: Option<f32>,
    /// Equivalence threshold.
    pub equivalence_threshold: Option<f32>,
    /// Queue capacity.
    pub queue_capacity: Option<usize>,
    /// Stop timeout in milliseconds.
    pub stop_timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| crate::Error::Storage {
            operation: "read_config_file".to_string(),
            cause: e.to_string(),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| crate::Error::Storage {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/engram/` on macOS)
    /// 2. XDG config dir (`~/.config/engram/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("engram").join("config.toml");
        if platform_config.exists()
            && let Ok(config) = Self::load_from_file(&platform_config)
        {
            return config;
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("engram")
            .join("config.toml");
        if xdg_config.exists()
            && let Ok(config) = Self::load_from_file(&xdg_config)
        {
            return config;
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `EngineConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(db_path) = file.db_path {
            config.db_path = PathBuf::from(db_path);
        }
        if let Some(threshold) = file.default_search_threshold {
            config.default_search_threshold = threshold;
        }
        if let Some(max_results) = file.max_results {
            config.max_results = max_results;
        }
        if let Some(formation) = file.formation {
            if let Some(v) = formation.duplicate_threshold {
                config.duplicate_threshold = v;
            }
            if let Some(v) = formation.equivalence_threshold {
                config.equivalence_threshold = v;
            }
            if let Some(v) = formation.queue_capacity {
                config.queue_capacity = v;
            }
            if let Some(v) = formation.stop_timeout_ms {
                config.stop_timeout = Duration::from_millis(v);
            }
        }

        config
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Sets the duplicate-detection threshold.
    #[must_use]
    pub const fn with_duplicate_threshold(mut self, threshold: f32) -> Self {
        self.duplicate_threshold = threshold;
        self
    }

    /// Sets the equivalence threshold.
    #[must_use]
    pub const fn with_equivalence_threshold(mut self, threshold: f32) -> Self {
        self.equivalence_threshold = threshold;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "copykeep.db";
pub const QUARANTINE_DIR: &str = ".quarantine";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    /// Mutating requests are rejected unless this is set.
    pub write_mode: bool,
    pub ignore_patterns: Vec<String>,
    /// Headroom a destination drive must keep beyond the size of the file being copied.
    pub min_free_buffer_bytes: u64,
    pub queue: QueueConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub chunk_size: usize,
    pub progress_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub chunk_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub keep_copies: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DB_PATH.to_string(),
            write_mode: false,
            ignore_patterns: vec![format!("**/{}/**", QUARANTINE_DIR)],
            min_free_buffer_bytes: 10 * 1024 * 1024 * 1024,
            queue: QueueConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            chunk_size: 1024 * 1024,
            progress_interval_ms: 500,
            poll_interval_ms: 250,
            chunk_delay_ms: 0,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { keep_copies: 2 }
    }
}

impl QueueConfig {
    pub const MAX_CONCURRENCY: usize = 10;

    pub fn clamped_concurrency(&self) -> usize {
        clamp_concurrency(self.concurrency)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

pub fn clamp_concurrency(limit: usize) -> usize {
    limit.clamp(1, QueueConfig::MAX_CONCURRENCY)
}

/// Load `Config.toml` (optional) overlaid with `COPYKEEP_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    configuration_from(environment())
}

/// `COPYKEEP_WRITE_MODE` sets `write_mode`; `COPYKEEP_QUEUE__CONCURRENCY` sets
/// `queue.concurrency`.
fn environment() -> Environment {
    Environment::with_prefix("COPYKEEP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn configuration_from(env: Environment) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(env)
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;
        let result_clone = result.clone();

        for res_dir in &result_clone {
            let res_dir_path = Path::new(res_dir);

            if dir_path.starts_with(res_dir_path) {
                should_add = false;
                break;
            }

            if res_dir_path.starts_with(dir_path) {
                result.retain(|x| x != res_dir);
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_read_only() {
        let config = AppConfig::default();
        assert!(!config.write_mode);
        assert_eq!(config.queue.concurrency, 2);
        assert_eq!(config.cleanup.keep_copies, 2);
        assert!(config.ignore_patterns.iter().any(|p| p.contains(QUARANTINE_DIR)));
    }

    #[test]
    fn test_environment_overrides_top_level_and_nested_keys() {
        let vars: config::Map<String, String> = [
            ("COPYKEEP_WRITE_MODE", "true"),
            ("COPYKEEP_DATABASE_PATH", "/tmp/catalog.db"),
            ("COPYKEEP_QUEUE__CONCURRENCY", "4"),
            ("COPYKEEP_CLEANUP__KEEP_COPIES", "3"),
            ("OTHER_WRITE_MODE", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = configuration_from(environment().source(Some(vars))).unwrap();
        assert!(config.write_mode);
        assert_eq!(config.database_path, "/tmp/catalog.db");
        assert_eq!(config.queue.concurrency, 4);
        assert_eq!(config.cleanup.keep_copies, 3);
        assert_eq!(config.queue.chunk_size, QueueConfig::default().chunk_size);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        assert_eq!(clamp_concurrency(0), 1);
        assert_eq!(clamp_concurrency(4), 4);
        assert_eq!(clamp_concurrency(64), QueueConfig::MAX_CONCURRENCY);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/mnt/media".to_string(),
            "/mnt/media/movies".to_string(),
            "/var/data".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&"/mnt/media".to_string()));
        assert!(result.contains(&"/var/data".to_string()));
    }

    #[test]
    fn test_non_overlapping_parent_after_child() {
        let dirs = vec![
            "/mnt/media/tv".to_string(),
            "/mnt/media/movies".to_string(),
            "/mnt/media".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result, vec!["/mnt/media".to_string()]);
    }
}

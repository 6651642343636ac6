//! Application-level configuration loading: session engine tunables.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRAITOR_BACK_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Letters per session code.
    pub code_length: usize,
    /// Candidates drawn by the code allocator before giving up.
    pub max_code_attempts: u32,
    /// Create retries after the persistence layer reports a code collision.
    pub max_create_attempts: u32,
    /// Minimum number of joined players required to launch.
    pub min_players: usize,
    /// Scans handed to each detective at launch.
    pub scan_allowance: u8,
    /// Delay before the end-of-timer evaluation fires, in seconds.
    pub game_duration_secs: u64,
    /// Users registered with admin access.
    pub admin_user_ids: Vec<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        code_length = config.code_length,
                        min_players = config.min_players,
                        game_duration_secs = config.game_duration_secs,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Delay between start and the end-of-timer evaluation.
    pub fn game_duration(&self) -> Duration {
        Duration::from_secs(self.game_duration_secs)
    }

    /// Whether `user_id` is registered with admin access.
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == user_id)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            code_length: 5,
            max_code_attempts: 1000,
            max_create_attempts: 5,
            min_players: 3,
            scan_allowance: 3,
            game_duration_secs: 600,
            admin_user_ids: Vec::new(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

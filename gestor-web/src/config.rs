use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub port: u16,
    pub database_url: String,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Engine TOML file; falls back to the engine's own search path.
    pub engine_config: Option<PathBuf>,
    /// Run the background scheduler inside the server process.
    pub run_scheduler: bool,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gestor")
        .join("analytics.db")
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: format!("sqlite://{}", default_database_path().to_string_lossy()),
            cors_origins: vec!["http://localhost:3000".to_string()],
            request_timeout_secs: 30,
            engine_config: None,
            run_scheduler: true,
        }
    }
}

impl WebConfig {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = env::var("GESTOR_PORT").or_else(|_| env::var("PORT")) {
            config.port = port.parse()?;
        }

        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database_url = database_url;
        } else if let Ok(db_path) = env::var("GESTOR_DATABASE_PATH") {
            config.database_url = format!("sqlite://{}", db_path);
        }

        if let Ok(origins) = env::var("GESTOR_CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(timeout) = env::var("GESTOR_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = timeout.parse()?;
        }

        if let Ok(path) = env::var("GESTOR_ENGINE_CONFIG") {
            config.engine_config = Some(PathBuf::from(path));
        }

        if let Ok(flag) = env::var("GESTOR_SCHEDULER_ENABLED") {
            config.run_scheduler = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Settings for tests and throwaway instances.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            run_scheduler: false,
            ..Self::default()
        }
    }
}

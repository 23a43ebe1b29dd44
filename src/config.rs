use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    /// PostgreSQL connection URL; absent means in-memory standalone mode
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub paystack: PaystackSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaystackSection {
    pub base_url: String,
    /// Read from the PAYSTACK_SECRET_KEY env var when empty
    pub secret_key: String,
    pub timeout_secs: u64,
    pub currency: String,
}

impl Default for PaystackSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            timeout_secs: 15,
            currency: "GHS".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerSection {
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: i64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            stale_threshold_secs: 120,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;
        let mut config: Self = serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {config_path}: {e}"))?;

        // Secrets come from the environment, never from the YAML on disk.
        if config.paystack.secret_key.is_empty()
            && let Ok(key) = std::env::var("PAYSTACK_SECRET_KEY")
        {
            config.paystack.secret_key = key;
        }
        if config.postgres_url.is_none()
            && let Ok(url) = std::env::var("DATABASE_URL")
        {
            config.postgres_url = Some(url);
        }
        Ok(config)
    }
}

//! Subcommand implementations.

pub mod audit;
pub mod init;
pub mod query;
pub mod remember;
pub mod serve;
pub mod status;
pub mod token;

use mynd_config::AppConfig;
use mynd_engine::ContextEngine;
use serde::Serialize;
use std::path::PathBuf;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Global flags shared by every subcommand.
pub struct Context {
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    pub fn new(config_path: Option<PathBuf>, data_dir: Option<PathBuf>, json: bool) -> Self {
        Self {
            config_path,
            data_dir,
            json,
        }
    }

    /// The config file in effect, whether or not it exists yet.
    pub fn config_file(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
    }

    /// File, then environment, then `--data-dir`.
    pub fn load_config(&self) -> Result<AppConfig, Box<dyn std::error::Error>> {
        let mut config = match self.config_path {
            Some(ref path) => {
                let mut config = AppConfig::load_from(path)
                    .map_err(|e| format!("Failed to load config: {e}"))?;
                config.apply_env(|key| std::env::var(key).ok())?;
                config
            }
            None => AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?,
        };
        if let Some(ref dir) = self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        config.validate()?;
        Ok(config)
    }

    pub async fn engine(&self) -> Result<(AppConfig, ContextEngine), Box<dyn std::error::Error>> {
        let config = self.load_config()?;
        let engine = ContextEngine::from_config(&config)
            .await
            .map_err(|e| format!("Failed to open Mynd storage: {e}"))?;
        Ok((config, engine))
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

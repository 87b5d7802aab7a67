//! `mynd init`: Create the data directory, config file and storage.

use super::{CmdResult, Context, print_json};
use mynd_config::{AppConfig, StorageBackend};
use mynd_engine::KEY_FILE;

pub async fn run(ctx: &Context) -> CmdResult {
    let config_path = ctx.config_file();
    let created_config = if config_path.exists() {
        false
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, AppConfig::default_toml())?;
        true
    };

    let config = ctx.load_config()?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // Opening the engine runs migrations and creates the signing key.
    let (config, engine) = ctx.engine().await?;
    let status = engine.status().await?;

    if ctx.json {
        return print_json(&serde_json::json!({
            "config_file": config_path,
            "config_created": created_config,
            "data_dir": data_dir,
            "backend": config.storage.backend,
            "events": status.events,
        }));
    }

    println!("Mynd setup");
    println!("==========\n");
    if created_config {
        println!("Created config:  {}", config_path.display());
    } else {
        println!("Config exists:   {}", config_path.display());
    }
    println!("Data directory:  {}", data_dir.display());
    match config.storage.backend {
        StorageBackend::Sqlite => {
            println!("Database:        {}", config.database_path().display());
            if config.tokens.secret.is_none() {
                println!("Signing key:     {}", data_dir.join(KEY_FILE).display());
            }
        }
        StorageBackend::Memory => {
            println!("Storage:         in-memory (nothing persists between runs)");
        }
    }
    println!("Events stored:   {}", status.events);
    println!("\nNext steps:");
    println!("  mynd demo                      load sample events");
    println!("  mynd query \"auth decisions\"    see what an assistant would get");
    println!("  mynd token issue claude        issue a token for an AI client");
    println!("  mynd serve                     start the local API");

    Ok(())
}

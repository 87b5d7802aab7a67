//! `mynd status`: Show system status.

use super::{CmdResult, Context, print_json};

pub async fn run(ctx: &Context) -> CmdResult {
    let (config, engine) = ctx.engine().await?;
    let status = engine.status().await?;

    if ctx.json {
        return print_json(&serde_json::json!({
            "config_file": ctx.config_file(),
            "data_dir": config.data_dir(),
            "backend": config.storage.backend,
            "gateway": format!("{}:{}", config.gateway.host, config.gateway.port),
            "engine": status,
        }));
    }

    println!("Mynd Status");
    println!("===========");
    println!("  Config file:  {}", ctx.config_file().display());
    println!("  Data dir:     {}", config.data_dir().display());
    println!("  Backend:      {:?}", config.storage.backend);
    println!("  Event store:  {}", status.event_store);
    println!("  Index:        {} ({} documents)", status.index, status.indexed_documents);
    println!("  Estimator:    {}", status.estimator);
    println!("  Events:       {}", status.events);
    println!("  Live tokens:  {}", status.live_tokens);
    println!("  Audit log:    {} records", status.audit_records);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);

    if !ctx.config_file().exists() {
        println!("\n  No config file, run `mynd init` first");
    }

    Ok(())
}

//! `mynd serve`: Start the HTTP gateway.

use super::{CmdResult, Context};

pub async fn run(ctx: &Context, port: Option<u16>) -> CmdResult {
    let mut config = ctx.load_config()?;
    if let Some(p) = port {
        config.gateway.port = p;
    }

    if !ctx.json {
        println!(
            "Mynd gateway listening on http://{}:{}",
            config.gateway.host, config.gateway.port
        );
        println!("   Health:  GET  /health");
        println!("   Status:  GET  /api/status");
        println!("   Tokens:  POST /api/tokens");
        println!("   Context: POST /api/context");
        println!("   Audit:   GET  /api/audit, /api/audit/verify");
        println!();
    }

    mynd_gateway::start(config).await
}

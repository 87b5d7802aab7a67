//! `mynd token`: Issue and revoke capability tokens.
//!
//! Runs as the local owner, so no bearer is needed.

use super::{CmdResult, Context, print_json};
use mynd_core::capability::Scope;

pub async fn issue(
    ctx: &Context,
    client_id: &str,
    scopes: &[String],
    max_tokens: Option<usize>,
    ttl: Option<u64>,
) -> CmdResult {
    let scope = Scope::parse(scopes)?;
    let (_config, engine) = ctx.engine().await?;
    let issued = engine.issue_token(client_id, scope, max_tokens, ttl).await?;
    let token = &issued.token;

    if ctx.json {
        return print_json(&serde_json::json!({
            "token": issued.bearer,
            "token_id": token.token_id,
            "client_id": token.client_id,
            "scope": token.scope.grants(),
            "max_tokens": token.max_tokens,
            "expires_at": token.expires_at,
        }));
    }

    println!("Issued token for {}", token.client_id);
    println!("  Token id:    {}", token.token_id);
    println!("  Scope:       {}", token.scope.grants().join(", "));
    println!("  Max tokens:  {}", token.max_tokens);
    println!("  Expires:     {}", token.expires_at.to_rfc3339());
    println!();
    println!("  {}", issued.bearer);
    println!();
    println!("This is the only time the bearer is shown. Send it as");
    println!("`Authorization: Bearer <token>`.");
    Ok(())
}

pub async fn revoke(ctx: &Context, token_id: &str) -> CmdResult {
    let (_config, engine) = ctx.engine().await?;
    let changed = engine.revoke_token(token_id).await?;

    if ctx.json {
        return print_json(&serde_json::json!({ "token_id": token_id, "revoked": changed }));
    }
    if changed {
        println!("Revoked {token_id}");
    } else {
        println!("{token_id} was already revoked or does not exist");
    }
    Ok(())
}

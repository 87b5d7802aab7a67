//! `mynd query`: Show the context bundle an assistant would receive.

use super::{CmdResult, Context, print_json};
use mynd_core::bundle::{BundleStatus, ContextFilters, ContextRequest};
use mynd_core::capability::Scope;
use mynd_core::event::SourceType;

/// Local queries run under a throwaway token so they are audited like any
/// other client.
const CLI_CLIENT: &str = "mynd-cli";
const CLI_TOKEN_TTL_SECS: u64 = 60;

pub async fn run(ctx: &Context, text: &str, max_tokens: usize, sources: &[String]) -> CmdResult {
    let source_types = sources
        .iter()
        .map(|s| s.parse::<SourceType>())
        .collect::<Result<Vec<_>, _>>()?;

    let (_config, engine) = ctx.engine().await?;
    let issued = engine
        .issue_token(
            CLI_CLIENT,
            Scope::read_only(),
            Some(max_tokens.max(1)),
            Some(CLI_TOKEN_TTL_SECS),
        )
        .await?;

    let mut filters = ContextFilters::default();
    if !source_types.is_empty() {
        filters = filters.with_source_types(source_types);
    }
    let request = ContextRequest::new(text, max_tokens, issued.bearer).with_filters(filters);
    let bundle = engine.get_context(request).await?;

    if ctx.json {
        return print_json(&bundle);
    }

    match bundle.status() {
        BundleStatus::Empty => {
            println!("No relevant context found for \"{text}\"");
            if bundle.degraded {
                println!("(retrieval was degraded, results may be incomplete)");
            }
            return Ok(());
        }
        BundleStatus::Complete | BundleStatus::Truncated => {}
    }

    println!("{}", bundle.rendered_text);
    println!();
    println!(
        "── {} of {} candidates, {}/{} tokens{}{}",
        bundle.included_event_ids.len(),
        bundle.candidates_considered,
        bundle.tokens_used,
        bundle.budget,
        if bundle.truncated { ", truncated" } else { "" },
        if bundle.degraded { ", degraded" } else { "" },
    );
    for source in &bundle.sources {
        println!(
            "   {} {} ({})",
            source.source_type,
            source.source_path,
            source.timestamp.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

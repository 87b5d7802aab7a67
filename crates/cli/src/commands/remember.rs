//! `mynd remember` and `mynd demo`: Put events into the store by hand.

use super::{CmdResult, Context, print_json};
use chrono::{TimeZone, Utc};
use mynd_core::error::{Error, StoreError};
use mynd_core::event::{SemanticEvent, SourceType};
use tracing::debug;

/// A hand-written event, as given on the command line.
pub struct Entry {
    pub summary: String,
    pub source: String,
    pub path: String,
    pub concepts: Vec<String>,
    pub decision: Option<String>,
}

impl Entry {
    fn into_event(self) -> Result<SemanticEvent, Box<dyn std::error::Error>> {
        if self.summary.trim().is_empty() {
            return Err("summary must not be empty".into());
        }
        let source_type: SourceType = self.source.parse()?;
        let mut event = SemanticEvent::new(source_type, self.path, self.summary.trim())
            .with_concepts(self.concepts);
        if let Some(decision) = self.decision {
            event = event.with_decision_context(decision);
        }
        Ok(event)
    }
}

pub async fn run(ctx: &Context, entry: Entry) -> CmdResult {
    let event = entry.into_event()?;
    let (_config, engine) = ctx.engine().await?;
    let id = engine.remember(event).await?;

    if ctx.json {
        return print_json(&serde_json::json!({ "id": id }));
    }
    println!("Remembered {id}");
    Ok(())
}

/// A short authentication design story across three sources.
fn demo_events() -> Vec<SemanticEvent> {
    let day = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).single().unwrap_or_else(Utc::now);
    vec![
        SemanticEvent::new(
            SourceType::Browser,
            "https://docs.python.org/authentication",
            "Researched JWT vs session authentication. Decided on JWT because the mobile app \
             needs stateless auth. Chose client-side token storage over Redis complexity.",
        )
        .with_id("demo-browser-auth-research")
        .with_timestamp(day)
        .with_concepts(["jwt", "sessions", "authentication", "mobile"])
        .with_decision_context("Mobile clients need stateless auth")
        .with_metadata("domain", "docs.python.org"),
        SemanticEvent::new(
            SourceType::File,
            "/Users/dev/projects/auth-decisions.md",
            "Architecture decision: JWT authentication with refresh tokens for web and mobile. \
             Stateless, mobile-friendly and scalable. Trade-off: XSS risk vs infrastructure \
             simplicity.",
        )
        .with_id("demo-file-auth-decision")
        .with_timestamp(day + chrono::Duration::hours(2))
        .with_concepts(["jwt", "refresh tokens", "architecture", "authentication"])
        .with_decision_context("Accepted XSS risk to avoid a session store")
        .with_metadata("file_type", "markdown"),
        SemanticEvent::new(
            SourceType::Code,
            "/Users/dev/projects/user-service/auth.py",
            "Implemented JWT authentication with refresh tokens using PyJWT. Added token \
             expiration and refresh. Tokens cached in memory for validation speed.",
        )
        .with_id("demo-code-auth-impl")
        .with_timestamp(day + chrono::Duration::hours(5))
        .with_concepts(["jwt", "pyjwt", "refresh tokens", "caching"])
        .with_metadata("language", "python"),
    ]
}

pub async fn demo(ctx: &Context) -> CmdResult {
    let (_config, engine) = ctx.engine().await?;

    let mut added = Vec::new();
    let mut skipped = 0usize;
    for event in demo_events() {
        match engine.remember(event).await {
            Ok(id) => added.push(id),
            Err(Error::Store(StoreError::Duplicate(id))) => {
                debug!(event_id = %id, "Demo event already present");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if ctx.json {
        return print_json(&serde_json::json!({ "added": added, "already_present": skipped }));
    }

    println!("Demo data: {} added, {} already present", added.len(), skipped);
    println!("\nTry these queries:");
    println!("   mynd query \"authentication architecture decision\"");
    println!("   mynd query \"JWT vs sessions\"");
    println!("   mynd query \"mobile app authentication\" --source browser");
    Ok(())
}

//! `mynd audit`: Export and verify the hash-chained audit log.

use super::{CmdResult, Context, print_json};
use mynd_core::error::{AuditError, Error};
use std::io::Write;
use std::path::Path;

/// One JSON record per line, to stdout or a file.
pub async fn export(ctx: &Context, from: u64, to: u64, output: Option<&Path>) -> CmdResult {
    let (_config, engine) = ctx.engine().await?;
    let records = engine.get_audit_range(from, to).await?;

    let mut lines = String::new();
    for record in &records {
        lines.push_str(&serde_json::to_string(record)?);
        lines.push('\n');
    }

    match output {
        Some(path) => {
            std::fs::write(path, lines)?;
            eprintln!("Wrote {} audit records to {}", records.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(lines.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

pub async fn verify(ctx: &Context, from: u64, to: u64) -> CmdResult {
    let (_config, engine) = ctx.engine().await?;

    match engine.verify_audit(from, to).await {
        Ok(report) => {
            if ctx.json {
                return print_json(&serde_json::json!({ "valid": true, "report": report }));
            }
            println!(
                "Audit chain intact: {} records checked ({}..={})",
                report.records_checked, report.from, report.to
            );
            if let Some(head) = report.head_hash {
                println!("  Head hash: {head}");
            }
            Ok(())
        }
        Err(Error::Audit(AuditError::BrokenAt { sequence, kind })) => {
            if ctx.json {
                print_json(&serde_json::json!({
                    "valid": false,
                    "broken_at": sequence,
                    "problem": kind.to_string(),
                }))?;
            }
            Err(format!("audit chain broken at sequence {sequence}: {kind}").into())
        }
        Err(e) => Err(e.into()),
    }
}

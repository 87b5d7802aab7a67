//! Budget-bounded selection and rendering.
//!
//! # Algorithm
//!
//! 1. Walk the ranked, deduplicated candidates in order
//! 2. Take each one whose cost fits the remaining budget
//! 3. Stop at the first that does not fit, marking the bundle truncated
//! 4. Render every taken item as a header line plus its summary
//!
//! Stopping (rather than skipping ahead to smaller items) keeps selection
//! monotonic in the budget: the result for a smaller budget is always a
//! prefix of the result for a larger one.

use crate::context::candidate::RetrievedCandidate;
use chrono::SecondsFormat;
use mynd_core::bundle::{ContextBundle, SourceRef};
use mynd_core::event::SemanticEvent;

/// Candidates chosen for a budget.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub chosen: Vec<RetrievedCandidate>,
    pub tokens_used: usize,
    /// A candidate was turned away for budget.
    pub truncated: bool,
}

/// Greedy, prefix-stable selection.
pub fn select(candidates: Vec<RetrievedCandidate>, budget: usize) -> Selection {
    let mut selection = Selection::default();
    for candidate in candidates {
        if selection.tokens_used + candidate.estimated_tokens > budget {
            selection.truncated = true;
            break;
        }
        selection.tokens_used += candidate.estimated_tokens;
        selection.chosen.push(candidate);
    }
    selection
}

/// `[source_type] source_path (timestamp)`; the path is omitted when empty.
pub fn render_header(event: &SemanticEvent) -> String {
    let ts = event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    if event.source_path.is_empty() {
        format!("[{}] ({ts})", event.source_type)
    } else {
        format!("[{}] {} ({ts})", event.source_type, event.source_path)
    }
}

/// Header and summary per item, in rank order, separated by blank lines.
pub fn render(chosen: &[RetrievedCandidate]) -> String {
    chosen
        .iter()
        .map(|c| format!("{}\n{}", render_header(&c.event), c.event.semantic_summary))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Turn a selection into the bundle returned to the caller.
pub fn build_bundle(
    query_text: &str,
    budget: usize,
    candidates_considered: usize,
    selection: Selection,
) -> ContextBundle {
    ContextBundle {
        query_text: query_text.to_string(),
        included_event_ids: selection.chosen.iter().map(|c| c.event.id.clone()).collect(),
        rendered_text: render(&selection.chosen),
        tokens_used: selection.tokens_used,
        budget,
        sources: selection
            .chosen
            .iter()
            .map(|c| SourceRef {
                source_type: c.event.source_type,
                source_path: c.event.source_path.clone(),
                timestamp: c.event.timestamp,
            })
            .collect(),
        truncated: selection.truncated,
        degraded: false,
        candidates_considered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use mynd_core::event::SourceType;

    fn priced(id: &str, cost: usize) -> RetrievedCandidate {
        RetrievedCandidate::new(
            SemanticEvent::new(SourceType::Code, "src/lib.rs", format!("summary {id}")).with_id(id),
            0.5,
            cost,
        )
    }

    fn ids(selection: &Selection) -> Vec<&str> {
        selection.chosen.iter().map(|c| c.event.id.as_str()).collect()
    }

    #[test]
    fn takes_what_fits() {
        let s = select(vec![priced("a", 30), priced("b", 30), priced("c", 30)], 50);
        assert_eq!(ids(&s), vec!["a"]);
        assert_eq!(s.tokens_used, 30);
        assert!(s.truncated);
    }

    #[test]
    fn exact_fit_is_not_truncated() {
        let s = select(vec![priced("a", 20), priced("b", 30)], 50);
        assert_eq!(s.tokens_used, 50);
        assert!(!s.truncated);
    }

    #[test]
    fn stops_at_first_misfit() {
        // "c" would fit on its own but comes after a rejected item.
        let s = select(vec![priced("a", 10), priced("b", 100), priced("c", 5)], 50);
        assert_eq!(ids(&s), vec!["a"]);
        assert!(s.truncated);
    }

    #[test]
    fn zero_budget() {
        let s = select(vec![priced("a", 1)], 0);
        assert!(s.chosen.is_empty());
        assert!(s.truncated);

        let s = select(vec![], 0);
        assert!(!s.truncated);
    }

    #[test]
    fn selection_is_monotonic_in_budget() {
        let items = || vec![priced("a", 7), priced("b", 11), priced("c", 3), priced("d", 19)];
        let mut previous: Option<Selection> = None;
        for budget in 0..=45 {
            let current = select(items(), budget);
            assert!(current.tokens_used <= budget);
            if let Some(prev) = previous {
                assert!(current.tokens_used >= prev.tokens_used);
                assert_eq!(&ids(&current)[..prev.chosen.len()], ids(&prev).as_slice());
            }
            previous = Some(current);
        }
    }

    #[test]
    fn header_format() {
        let ts: DateTime<Utc> = DateTime::parse_from_rfc3339("2026-03-01T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = SemanticEvent::new(SourceType::Browser, "https://jwt.io", "x").with_timestamp(ts);
        assert_eq!(render_header(&event), "[browser] https://jwt.io (2026-03-01T09:30:00Z)");

        let bare = SemanticEvent::new(SourceType::Manual, "", "x").with_timestamp(ts);
        assert_eq!(render_header(&bare), "[manual] (2026-03-01T09:30:00Z)");
    }

    #[test]
    fn bundle_preserves_rank_order() {
        let selection = select(vec![priced("a", 1), priced("b", 1)], 10);
        let bundle = build_bundle("q", 10, 2, selection);
        assert_eq!(bundle.included_event_ids, vec!["a", "b"]);
        assert_eq!(bundle.sources.len(), 2);
        let a = bundle.rendered_text.find("summary a").unwrap();
        let b = bundle.rendered_text.find("summary b").unwrap();
        assert!(a < b);
        assert!(bundle.rendered_text.starts_with("[code] src/lib.rs ("));
    }
}

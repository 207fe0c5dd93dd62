//! Export tag of the units whose fetch succeeded.

use std::collections::BTreeSet;
use tracing::{debug, instrument};

use entitle_registry::{GraphResult, GraphStore, Statement};

/// Default export tag of active units.
pub const DEFAULT_EXPORT_TAG: &str = "ELIOT";

/// Tag the active units and untag the others, in one transaction.
pub fn tag_statements(active: &BTreeSet<String>, tag: &str) -> [Statement; 2] {
    let codes: Vec<String> = active.iter().cloned().collect();
    [
        Statement::new(
            "MATCH (s:Structure) \
             WHERE s.UAI IN $active AND NOT $tag IN coalesce(s.exports, []) \
             SET s.exports = coalesce(s.exports, []) + $tag",
        )
        .param("active", codes.clone())
        .param("tag", tag),
        Statement::new(
            "MATCH (s:Structure) \
             WHERE s.UAI IS NOT NULL AND NOT s.UAI IN $active AND $tag IN s.exports \
             SET s.exports = [e IN s.exports WHERE e <> $tag]",
        )
        .param("active", codes)
        .param("tag", tag),
    ]
}

/// Persist the active-unit set as an export tag.
///
/// An empty set writes nothing. Returns whether a transaction was committed.
#[instrument(skip(graph, active), fields(active = active.len()))]
pub async fn persist_active_units(
    graph: &dyn GraphStore,
    active: &BTreeSet<String>,
    tag: &str,
) -> GraphResult<bool> {
    if active.is_empty() {
        debug!("No active unit, export tags left unchanged");
        return Ok(false);
    }

    graph.execute_transaction(&tag_statements(active, tag)).await?;
    debug!(tag = %tag, "Active units persisted");
    Ok(true)
}

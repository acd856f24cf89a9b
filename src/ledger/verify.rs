//! Chain Verification
//!
//! Pure checks over an entity history that has already been loaded in
//! chronological order.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::ledger::entry::LedgerEntry;

/// Verify hashes and linkage of a chronologically ordered history.
///
/// An empty history is valid. Stops at the first problem found.
pub fn verify_chain(entries: &[LedgerEntry]) -> bool {
    for (i, entry) in entries.iter().enumerate() {
        if !entry.verify_hash() {
            warn!(
                "Hash mismatch in {}/{} at entry {} ({})",
                entry.entity_type, entry.entity_id, i, entry.id
            );
            return false;
        }
    }

    for i in 1..entries.len() {
        let prev_entry = &entries[i - 1];
        let curr_entry = &entries[i];

        if curr_entry.prev_hash != prev_entry.hash {
            warn!(
                "Hash chain broken in {}/{} at entry {}: expected {}, got {}",
                curr_entry.entity_type,
                curr_entry.entity_id,
                i,
                prev_entry.hash,
                curr_entry.prev_hash
            );
            return false;
        }
    }

    debug!("Chain verified: {} entries", entries.len());
    true
}

/// Indices of entries whose stored hash no longer matches their content.
pub fn find_tampered_entries(entries: &[LedgerEntry]) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.verify_hash())
        .map(|(i, _)| i)
        .collect()
}

/// A position where an entry does not link to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    pub index: usize,
    pub expected_prev_hash: String,
    pub actual_prev_hash: String,
}

/// Every linkage break in the history.
pub fn find_chain_breaks(entries: &[LedgerEntry]) -> Vec<ChainBreak> {
    entries
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1].prev_hash != pair[0].hash)
        .map(|(i, pair)| ChainBreak {
            index: i + 1,
            expected_prev_hash: pair[0].hash.clone(),
            actual_prev_hash: pair[1].prev_hash.clone(),
        })
        .collect()
}

/// Entries that share one `prev_hash`, i.e. were appended against the same tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fork {
    pub prev_hash: String,
    pub indices: Vec<usize>,
}

/// Groups of two or more entries claiming the same predecessor.
pub fn detect_forks(entries: &[LedgerEntry]) -> Vec<Fork> {
    let mut by_prev: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, entry) in entries.iter().enumerate() {
        by_prev.entry(entry.prev_hash.as_str()).or_default().push(i);
    }

    let mut forks: Vec<Fork> = by_prev
        .into_iter()
        .filter(|(_, indices)| indices.len() > 1)
        .map(|(prev_hash, indices)| Fork {
            prev_hash: prev_hash.to_string(),
            indices,
        })
        .collect();
    forks.sort_by_key(|fork| fork.indices[0]);
    forks
}

/// Full diagnosis of one entity chain.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub entity_type: String,
    pub entity_id: String,
    pub entry_count: usize,
    pub head_hash: Option<String>,
    pub genesis_valid: bool,
    pub tampered: Vec<usize>,
    pub breaks: Vec<ChainBreak>,
    pub forks: Vec<Fork>,
}

impl VerificationReport {
    pub fn from_entries(entity_type: &str, entity_id: &str, entries: &[LedgerEntry]) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            entry_count: entries.len(),
            head_hash: entries.last().map(|entry| entry.hash.clone()),
            genesis_valid: entries.first().map_or(true, LedgerEntry::is_genesis),
            tampered: find_tampered_entries(entries),
            breaks: find_chain_breaks(entries),
            forks: detect_forks(entries),
        }
    }

    /// Same answer as `verify_chain`; `genesis_valid` is informational.
    pub fn is_valid(&self) -> bool {
        self.tampered.is_empty() && self.breaks.is_empty()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "✅ {}/{} chain is valid ({} entries)",
                self.entity_type, self.entity_id, self.entry_count
            )
        } else {
            format!(
                "❌ {}/{} chain is invalid ({} entries): {} tampered, {} breaks, {} forks",
                self.entity_type,
                self.entity_id,
                self.entry_count,
                self.tampered.len(),
                self.breaks.len(),
                self.forks.len()
            )
        }
    }

    /// Get detailed status
    pub fn detailed_status(&self) -> String {
        let mut lines = vec![
            format!("Entries: {}", self.entry_count),
            format!("Head hash: {}", self.head_hash.as_deref().unwrap_or("none")),
            format!(
                "Genesis: {}",
                if self.genesis_valid { "✅ Valid" } else { "❌ Missing sentinel" }
            ),
        ];
        for index in &self.tampered {
            lines.push(format!("Tampered entry: {}", index));
        }
        for gap in &self.breaks {
            lines.push(format!(
                "Break at entry {}: expected {}, got {}",
                gap.index, gap.expected_prev_hash, gap.actual_prev_hash
            ));
        }
        for fork in &self.forks {
            lines.push(format!(
                "Fork on {:?}: entries {:?}",
                fork.prev_hash, fork.indices
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{LedgerData, NewLedgerEntry, GENESIS_PREV_HASH};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn status(value: &str) -> LedgerData {
        json!({ "status": value }).as_object().cloned().unwrap()
    }

    fn build_chain(statuses: &[&str]) -> Vec<LedgerEntry> {
        let start = Utc::now();
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for (i, value) in statuses.iter().enumerate() {
            let prev_hash = entries
                .last()
                .map(|entry| entry.hash.clone())
                .unwrap_or_else(|| GENESIS_PREV_HASH.to_string());
            let entry = NewLedgerEntry::new("t1", "work_order", "wo-1", "update", status(value), prev_hash)
                .seal()
                .unwrap()
                .into_entry(Uuid::new_v4(), start + Duration::milliseconds(i as i64));
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_empty_chain_is_valid() {
        assert!(verify_chain(&[]));
        let report = VerificationReport::from_entries("work_order", "wo-1", &[]);
        assert!(report.is_valid());
        assert!(report.genesis_valid);
        assert_eq!(report.head_hash, None);
    }

    #[test]
    fn test_untouched_chain_is_valid() {
        let entries = build_chain(&["pending", "in_progress", "done"]);
        assert!(verify_chain(&entries));

        let report = VerificationReport::from_entries("work_order", "wo-1", &entries);
        assert!(report.is_valid());
        assert_eq!(report.head_hash.as_deref(), Some(entries[2].hash.as_str()));
        assert!(report.summary().contains("✅"));
    }

    #[test]
    fn test_find_tampered_entries() {
        let mut entries = build_chain(&["pending", "in_progress", "done"]);
        entries[1].data = status("cancelled");

        assert!(!verify_chain(&entries));
        assert_eq!(find_tampered_entries(&entries), vec![1]);
        assert!(find_chain_breaks(&entries).is_empty());
    }

    #[test]
    fn test_removed_entry_breaks_chain() {
        let mut entries = build_chain(&["pending", "in_progress", "done"]);
        let removed = entries.remove(1);

        assert!(!verify_chain(&entries));
        let breaks = find_chain_breaks(&entries);
        assert_eq!(breaks.len(), 1);
        assert_eq!(breaks[0].index, 1);
        assert_eq!(breaks[0].actual_prev_hash, removed.hash);
    }

    #[test]
    fn test_detect_forks() {
        let mut entries = build_chain(&["pending", "in_progress"]);
        let sibling = NewLedgerEntry::new(
            "t1",
            "work_order",
            "wo-1",
            "update",
            status("on_hold"),
            entries[0].hash.clone(),
        )
        .seal()
        .unwrap()
        .into_entry(Uuid::new_v4(), Utc::now() + Duration::seconds(1));
        entries.push(sibling);

        assert!(!verify_chain(&entries));
        let forks = detect_forks(&entries);
        assert_eq!(forks.len(), 1);
        assert_eq!(forks[0].indices, vec![1, 2]);

        let report = VerificationReport::from_entries("work_order", "wo-1", &entries);
        assert!(!report.is_valid());
        assert!(report.detailed_status().contains("Fork"));
    }

    #[test]
    fn test_missing_sentinel_reported_but_not_invalid() {
        let mut entries = build_chain(&["pending"]);
        entries[0] = NewLedgerEntry::new("t1", "work_order", "wo-1", "create", status("pending"), "dangling")
            .seal()
            .unwrap()
            .into_entry(Uuid::new_v4(), Utc::now());

        let report = VerificationReport::from_entries("work_order", "wo-1", &entries);
        assert!(report.is_valid());
        assert!(!report.genesis_valid);
    }
}

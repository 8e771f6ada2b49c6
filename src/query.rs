//! QueryService (C8) — priority-ordered, filtered, paginated views.
//!
//! Operates on a consistent snapshot taken under the engine's mutex
//! (`spec.md` §5); the scan and sort below run on cloned data after the
//! lock is released, so queries never block admission/leasing and never
//! mutate state (`spec.md` §4.8).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::item::{ItemId, LifecycleState, TriageItem};

/// Filter keys applied to payload or top-level record fields
/// (`spec.md` §4.8).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Restrict to a single lifecycle state.
    pub state: Option<LifecycleState>,
    /// Restrict to a single base priority.
    pub base_priority: Option<i64>,
    /// Restrict to a single assigned clinician id.
    pub clinician_id: Option<String>,
    /// Restrict to a single language.
    pub language: Option<String>,
    /// Restrict to a single cultural context string.
    pub cultural_context: Option<String>,
    /// Restrict to a single department key.
    pub department: Option<String>,
}

impl Filter {
    fn matches(&self, item: &TriageItem) -> bool {
        if let Some(state) = self.state {
            if item.lifecycle_state != state {
                return false;
            }
        }
        if let Some(priority) = self.base_priority {
            if item.base_priority != priority {
                return false;
            }
        }
        if let Some(clinician_id) = &self.clinician_id {
            if item.payload.clinician_id.as_deref() != Some(clinician_id.as_str()) {
                return false;
            }
        }
        if let Some(language) = &self.language {
            if item.payload.language.as_deref() != Some(language.as_str()) {
                return false;
            }
        }
        if let Some(cultural_context) = &self.cultural_context {
            if item.payload.cultural_context.as_deref() != Some(cultural_context.as_str()) {
                return false;
            }
        }
        if let Some(department) = &self.department {
            if item.payload.department.as_deref() != Some(department.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Total order over query results: non-terminal items (ordered by current
/// effective priority desc, `admission_sequence` asc) are always returned
/// before terminal items (ordered by `terminal_at` desc, `id` asc as a
/// deterministic tie-break the spec leaves unstated).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortKey {
    /// Key for a `Pending`/`Leased` item.
    NonTerminal {
        /// Effective priority at the time the item was scanned.
        effective_priority: i64,
        /// Admission sequence, the tie-breaker.
        sequence: u64,
    },
    /// Key for a `Completed`/`Failed` item.
    Terminal {
        /// Time the item became terminal.
        terminal_at: u64,
    },
}

fn rank(key: &SortKey, id: &str, other_key: &SortKey, other_id: &str) -> Ordering {
    match (key, other_key) {
        (SortKey::NonTerminal { .. }, SortKey::Terminal { .. }) => Ordering::Less,
        (SortKey::Terminal { .. }, SortKey::NonTerminal { .. }) => Ordering::Greater,
        (
            SortKey::NonTerminal {
                effective_priority: a_priority,
                sequence: a_sequence,
            },
            SortKey::NonTerminal {
                effective_priority: b_priority,
                sequence: b_sequence,
            },
        ) => b_priority
            .cmp(a_priority)
            .then_with(|| a_sequence.cmp(b_sequence)),
        (
            SortKey::Terminal {
                terminal_at: a_terminal_at,
            },
            SortKey::Terminal {
                terminal_at: b_terminal_at,
            },
        ) => b_terminal_at
            .cmp(a_terminal_at)
            .then_with(|| id.cmp(other_id)),
    }
}

/// Opaque pagination cursor: the key of the last item returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    key: SortKey,
    id: ItemId,
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct Page {
    /// Items in this page, already in result order.
    pub items: Vec<TriageItem>,
    /// Cursor to pass to the next call, or `None` if this was the last page.
    pub next_cursor: Option<Cursor>,
}

fn sort_key_for(item: &TriageItem, effective_priority: i64) -> SortKey {
    if item.lifecycle_state.is_terminal() {
        SortKey::Terminal {
            terminal_at: item.terminal_at.unwrap_or(0),
        }
    } else {
        SortKey::NonTerminal {
            effective_priority,
            sequence: item.admission_sequence,
        }
    }
}

/// Runs a query over a snapshot of items, given a function to compute the
/// current effective priority of a non-terminal item (so the caller can
/// supply the engine's live `AgingPolicy` + clock without this module
/// depending on them).
pub fn run_query<'a>(
    items: impl Iterator<Item = &'a TriageItem>,
    filter: &Filter,
    cursor: Option<&Cursor>,
    limit: usize,
    effective_priority_of: impl Fn(&TriageItem) -> i64,
) -> Page {
    let mut matches: Vec<(SortKey, &TriageItem)> = items
        .filter(|item| filter.matches(item))
        .map(|item| (sort_key_for(item, effective_priority_of(item)), item))
        .collect();

    matches.sort_by(|(a_key, a_item), (b_key, b_item)| {
        rank(a_key, &a_item.id, b_key, &b_item.id)
    });

    let start = match cursor {
        None => 0,
        Some(cursor) => matches
            .iter()
            .position(|(key, item)| rank(key, &item.id, &cursor.key, &cursor.id) == Ordering::Greater)
            .unwrap_or(matches.len()),
    };

    let end = if limit == 0 {
        matches.len()
    } else {
        (start + limit).min(matches.len())
    };

    let page_items: Vec<TriageItem> = matches[start..end]
        .iter()
        .map(|(_, item)| (*item).clone())
        .collect();

    let next_cursor = if end < matches.len() {
        let (key, item) = &matches[end - 1];
        Some(Cursor {
            key: key.clone(),
            id: item.id.clone(),
        })
    } else {
        None
    };

    Page {
        items: page_items,
        next_cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{LifecycleState, Payload};

    fn item(id: &str, state: LifecycleState, sequence: u64, terminal_at: Option<u64>) -> TriageItem {
        TriageItem {
            id: id.to_string(),
            base_priority: 10,
            admitted_at: 0,
            admission_sequence: sequence,
            scheduling_base: 10,
            payload: Payload::default(),
            lifecycle_state: state,
            lease: None,
            retries: 0,
            history: Vec::new(),
            terminal_at,
        }
    }

    #[test]
    fn non_terminal_before_terminal_ordered_by_priority_then_sequence() {
        let items = vec![
            item("a", LifecycleState::Pending, 0, None),
            item("b", LifecycleState::Completed, 1, Some(100)),
            item("c", LifecycleState::Pending, 2, None),
        ];
        let page = run_query(
            items.iter(),
            &Filter::default(),
            None,
            10,
            |item| if item.id == "c" { 50 } else { item.base_priority },
        );
        let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn pagination_round_trips_via_cursor() {
        let items: Vec<TriageItem> = (0..5)
            .map(|i| item(&format!("i{i}"), LifecycleState::Pending, i, None))
            .collect();
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = run_query(items.iter(), &Filter::default(), cursor.as_ref(), 2, |item| {
                item.base_priority + (4 - item.admission_sequence as i64)
            });
            seen.extend(page.items.iter().map(|i| i.id.clone()));
            if page.next_cursor.is_none() {
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(seen, vec!["i0", "i1", "i2", "i3", "i4"]);
    }

    #[test]
    fn filter_by_department() {
        let mut a = item("a", LifecycleState::Pending, 0, None);
        a.payload.department = Some("cardiology".to_string());
        let b = item("b", LifecycleState::Pending, 1, None);
        let items = vec![a, b];
        let filter = Filter {
            department: Some("cardiology".to_string()),
            ..Default::default()
        };
        let page = run_query(items.iter(), &filter, None, 10, |item| item.base_priority);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "a");
    }
}

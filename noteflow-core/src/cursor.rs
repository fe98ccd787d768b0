//! Remote collaborator cursors.
//!
//! The registry keeps the last selection reported by every remote owner and
//! draws one marker per owner through a [`CursorOverlay`]. Entries that have
//! not been refreshed within the staleness window are erased and forgotten.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Entries older than this are evicted on reconcile.
pub const STALE_AFTER_SECS: i64 = 30;

pub const CURSOR_COLORS: [&str; 16] = [
    "#F44336", "#E91E63", "#9C27B0", "#673AB7", "#3F51B5", "#2196F3", "#03A9F4", "#00BCD4",
    "#009688", "#4CAF50", "#8BC34A", "#CDDC39", "#FFEB3B", "#FFC107", "#FF9800", "#FF5722",
];

/// Deterministic marker colour for an owner id.
pub fn color_for_owner(owner_id: &str) -> &'static str {
    let hash = owner_id
        .encode_utf16()
        .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(i32::from(unit)));
    CURSOR_COLORS[(hash.unsigned_abs() as usize) % CURSOR_COLORS.len()]
}

/// Last-known selection of one collaborator, as stored on the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorAnnotation {
    pub owner_id: String,
    pub display_name: String,
    pub selection_start: usize,
    pub selection_length: usize,
    pub updated_at: DateTime<Utc>,
}

impl CursorAnnotation {
    /// Selected span. Offsets come from other clients, so the end saturates
    /// instead of overflowing.
    pub fn range(&self) -> Range<usize> {
        self.selection_start..self.selection_start.saturating_add(self.selection_length)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }
}

/// A marker as handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorMarker {
    pub owner_id: String,
    pub display_name: String,
    pub color: &'static str,
    pub range: Range<usize>,
}

/// Where markers get drawn. Implemented by the editor widget.
pub trait CursorOverlay {
    /// Draw or move the marker for `marker.owner_id`.
    fn draw(&self, marker: &CursorMarker);

    fn erase(&self, owner_id: &str);
}

#[derive(Debug, Clone)]
pub struct CursorRegistry {
    local_owner: String,
    stale_after: Duration,
    entries: HashMap<String, CursorAnnotation>,
}

impl CursorRegistry {
    pub fn new(local_owner: impl Into<String>) -> Self {
        Self {
            local_owner: local_owner.into(),
            stale_after: Duration::seconds(STALE_AFTER_SECS),
            entries: HashMap::new(),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn local_owner(&self) -> &str {
        &self.local_owner
    }

    /// Record an owner's annotation, replacing any previous one. The local
    /// owner's own annotation is never tracked.
    pub fn upsert(&mut self, owner_id: &str, annotation: CursorAnnotation) {
        if owner_id == self.local_owner {
            return;
        }
        self.entries.insert(owner_id.to_string(), annotation);
    }

    pub fn get(&self, owner_id: &str) -> Option<&CursorAnnotation> {
        self.entries.get(owner_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop a single owner, erasing its marker.
    pub fn remove<O: CursorOverlay + ?Sized>(&mut self, owner_id: &str, overlay: &O) {
        if self.entries.remove(owner_id).is_some() {
            overlay.erase(owner_id);
        }
    }

    /// Evict stale entries and redraw the rest. Returns the visible markers,
    /// ordered by owner id.
    pub fn reconcile<O: CursorOverlay + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        overlay: &O,
    ) -> Vec<CursorMarker> {
        let stale_after = self.stale_after;
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, annotation)| annotation.age(now) > stale_after)
            .map(|(owner, _)| owner.clone())
            .collect();
        for owner in stale {
            debug!(%owner, "evicting stale cursor");
            self.entries.remove(&owner);
            overlay.erase(&owner);
        }

        let ordered: BTreeMap<&String, &CursorAnnotation> = self
            .entries
            .iter()
            .filter(|(owner, _)| **owner != self.local_owner)
            .collect();
        ordered
            .into_iter()
            .map(|(owner, annotation)| {
                let marker = CursorMarker {
                    owner_id: owner.clone(),
                    display_name: annotation.display_name.clone(),
                    color: color_for_owner(owner),
                    range: annotation.range(),
                };
                overlay.draw(&marker);
                marker
            })
            .collect()
    }

    /// Erase every marker and forget all entries. Used on session teardown.
    pub fn clear<O: CursorOverlay + ?Sized>(&mut self, overlay: &O) {
        for owner in self.entries.keys() {
            overlay.erase(owner);
        }
        self.entries.clear();
    }
}

//! Property tests for the block conversion, diff and cursor invariants.

use chrono::{Duration, TimeZone, Utc};
use noteflow_core::cursor::{CursorAnnotation, CursorMarker, CursorOverlay, CursorRegistry};
use noteflow_core::delta::Attributes;
use noteflow_core::{diff, from_blocks, to_blocks, OpSequence, Operation};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => ("[ab\n]{0,4}", any::<bool>()).prop_map(|(text, bold)| {
            let op = Operation::text(text);
            if bold {
                let mut attrs = Attributes::new();
                attrs.insert("bold".into(), Value::Bool(true));
                op.with_attributes(attrs)
            } else {
                op
            }
        }),
        1 => (0u8..3).prop_map(|n| {
            let mut embed = Map::new();
            embed.insert("image".into(), json!(format!("img-{n}")));
            Operation::embed(embed)
        }),
    ]
}

fn sequence() -> impl Strategy<Value = OpSequence> {
    prop::collection::vec(operation(), 0..8).prop_map(OpSequence::from_ops)
}

proptest! {
    #[test]
    fn blocks_round_trip(seq in sequence()) {
        let blocks = to_blocks(&seq);
        prop_assert_eq!(from_blocks(&blocks), seq.clone());
        let text = blocks[0].as_text().unwrap();
        prop_assert_eq!(&text.value, &seq.plain_text());
    }

    #[test]
    fn blocks_survive_serialization(seq in sequence()) {
        let json = serde_json::to_value(to_blocks(&seq)).unwrap();
        let blocks: Vec<noteflow_core::ContentBlock> = serde_json::from_value(json).unwrap();
        prop_assert_eq!(from_blocks(&blocks), seq);
    }

    #[test]
    fn patch_reproduces_new(old in sequence(), new in sequence()) {
        let patch = diff(&old, &new);
        prop_assert!(patch.keep_prefix + patch.keep_suffix <= old.len());
        prop_assert_eq!(patch.base_len(), old.len());
        prop_assert_eq!(patch.apply(&old).unwrap(), new);
    }

    #[test]
    fn patch_of_local_edit_is_tight(
        base in sequence(),
        at in 0usize..20,
        text in "[ab]{1,3}",
    ) {
        let at = at.min(base.len());
        let edited = base.insert_text(at, &text, None);
        let patch = diff(&base, &edited);
        prop_assert_eq!(patch.apply(&base).unwrap(), edited);
        // Never replaces more than the inserted text's neighbouring runs.
        prop_assert!(patch.delete_count <= base.len());
    }
}

#[derive(Default)]
struct Overlay {
    drawn: RefCell<BTreeMap<String, CursorMarker>>,
}

impl CursorOverlay for Overlay {
    fn draw(&self, marker: &CursorMarker) {
        self.drawn
            .borrow_mut()
            .insert(marker.owner_id.clone(), marker.clone());
    }

    fn erase(&self, owner_id: &str) {
        self.drawn.borrow_mut().remove(owner_id);
    }
}

proptest! {
    #[test]
    fn reconcile_idempotent_and_never_self(
        ages in prop::collection::vec((0usize..5, 0i64..60), 0..10),
    ) {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let overlay = Overlay::default();
        let mut registry = CursorRegistry::new("owner-0");
        for (owner, age) in &ages {
            let owner_id = format!("owner-{owner}");
            registry.upsert(&owner_id, CursorAnnotation {
                owner_id: owner_id.clone(),
                display_name: owner_id.clone(),
                selection_start: *owner,
                selection_length: 1,
                updated_at: now - Duration::seconds(*age),
            });
        }

        let first = registry.reconcile(now, &overlay);
        let drawn = overlay.drawn.borrow().clone();
        let second = registry.reconcile(now, &overlay);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&*overlay.drawn.borrow(), &drawn);
        let no_self = first.iter().all(|m| m.owner_id != "owner-0");
        prop_assert!(no_self, "local owner drawn");
        let all_fresh = first.iter().all(|m| {
            registry
                .get(&m.owner_id)
                .is_some_and(|a| now - a.updated_at <= Duration::seconds(30))
        });
        prop_assert!(all_fresh, "stale marker drawn");
    }
}

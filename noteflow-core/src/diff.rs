//! Minimal positional diff between two insert-only sequences.
//!
//! The diff keeps every leading and trailing operation that is structurally
//! identical in both sequences, then trims the common characters of the first
//! and last differing text runs. What remains in the middle is replaced
//! wholesale. Comparing operations instead of characters keeps the walk
//! linear in the number of operations; the boundary trim makes the common
//! case (one contiguous edit inside a paragraph) as tight as a character
//! diff.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delta::{OpSequence, Operation};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch expects a base of length {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Retain/delete/insert instruction, in the editor's native change format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchOp {
    Retain { retain: usize },
    Delete { delete: usize },
    Insert(Operation),
}

/// Edit turning one sequence into another.
///
/// Applying it keeps the first `keep_prefix` positions, drops the next
/// `delete_count`, inserts `insert_ops`, and keeps the final `keep_suffix`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditPatch {
    pub keep_prefix: usize,
    pub delete_count: usize,
    pub insert_ops: Vec<Operation>,
    pub keep_suffix: usize,
}

impl EditPatch {
    /// True when applying the patch changes nothing.
    pub fn is_noop(&self) -> bool {
        self.delete_count == 0 && self.insert_ops.is_empty()
    }

    /// True when the base sequence was empty, so the patch is a verbatim
    /// load of the new content. Callers should replace the content outright.
    pub fn replaces_empty(&self) -> bool {
        self.keep_prefix == 0 && self.delete_count == 0 && self.keep_suffix == 0
    }

    /// Length of the base sequence this patch applies to.
    pub fn base_len(&self) -> usize {
        self.keep_prefix + self.delete_count + self.keep_suffix
    }

    pub fn apply(&self, old: &OpSequence) -> Result<OpSequence, PatchError> {
        let len = old.len();
        if self.base_len() != len {
            return Err(PatchError::LengthMismatch {
                expected: self.base_len(),
                actual: len,
            });
        }

        let mut out = old.slice(0..self.keep_prefix);
        for op in &self.insert_ops {
            out.push(op.clone());
        }
        Ok(out.concat(old.slice(len - self.keep_suffix..len)))
    }

    /// The patch as a retain/delete/insert list. Zero-length steps are omitted.
    pub fn ops(&self) -> Vec<PatchOp> {
        let mut ops = Vec::with_capacity(self.insert_ops.len() + 3);
        if self.keep_prefix > 0 {
            ops.push(PatchOp::Retain {
                retain: self.keep_prefix,
            });
        }
        if self.delete_count > 0 {
            ops.push(PatchOp::Delete {
                delete: self.delete_count,
            });
        }
        ops.extend(self.insert_ops.iter().cloned().map(PatchOp::Insert));
        if self.keep_suffix > 0 {
            ops.push(PatchOp::Retain {
                retain: self.keep_suffix,
            });
        }
        ops
    }
}

impl Serialize for EditPatch {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ops().serialize(serializer)
    }
}

/// Compute the patch turning `old` into `new`.
pub fn diff(old: &OpSequence, new: &OpSequence) -> EditPatch {
    let old_ops = old.ops();
    let new_ops = new.ops();
    let shared = old_ops.len().min(new_ops.len());

    let mut prefix_ops = 0;
    let mut keep_prefix = 0;
    while prefix_ops < shared && old_ops[prefix_ops] == new_ops[prefix_ops] {
        keep_prefix += old_ops[prefix_ops].len();
        prefix_ops += 1;
    }

    // The back walk may not reclaim operations the front walk already kept.
    let mut suffix_ops = 0;
    let mut keep_suffix = 0;
    while suffix_ops < shared - prefix_ops
        && old_ops[old_ops.len() - 1 - suffix_ops] == new_ops[new_ops.len() - 1 - suffix_ops]
    {
        keep_suffix += old_ops[old_ops.len() - 1 - suffix_ops].len();
        suffix_ops += 1;
    }

    let mut old_mid = old_ops[prefix_ops..old_ops.len() - suffix_ops].to_vec();
    let mut new_mid = new_ops[prefix_ops..new_ops.len() - suffix_ops].to_vec();

    if let Some(common) = boundary_overlap(old_mid.first(), new_mid.first(), common_prefix_len) {
        keep_prefix += common;
        trim_front(&mut old_mid, common);
        trim_front(&mut new_mid, common);
    }
    if let Some(common) = boundary_overlap(old_mid.last(), new_mid.last(), common_suffix_len) {
        keep_suffix += common;
        trim_back(&mut old_mid, common);
        trim_back(&mut new_mid, common);
    }

    let total = old.len();
    debug_assert!(keep_prefix + keep_suffix <= total, "prefix and suffix overlap");
    let delete_count = total.saturating_sub(keep_prefix + keep_suffix);
    debug_assert_eq!(delete_count, old_mid.iter().map(Operation::len).sum::<usize>());

    EditPatch {
        keep_prefix,
        delete_count,
        insert_ops: new_mid,
        keep_suffix,
    }
}

/// Shared characters of two boundary text runs with identical formatting.
fn boundary_overlap(
    old: Option<&Operation>,
    new: Option<&Operation>,
    measure: fn(&str, &str) -> usize,
) -> Option<usize> {
    let (old, new) = (old?, new?);
    if old.attributes != new.attributes {
        return None;
    }
    let common = measure(old.as_text()?, new.as_text()?);
    (common > 0).then_some(common)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

fn common_suffix_len(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

fn trim_front(ops: &mut Vec<Operation>, count: usize) {
    let first = OpSequence::from_ops([ops[0].clone()]);
    let rest = first.slice(count..first.len());
    ops.splice(0..1, rest.into_ops());
}

fn trim_back(ops: &mut Vec<Operation>, count: usize) {
    let last_index = ops.len() - 1;
    let last = OpSequence::from_ops([ops[last_index].clone()]);
    let rest = last.slice(0..last.len() - count);
    ops.splice(last_index.., rest.into_ops());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Attributes;
    use serde_json::{json, Map, Value};

    fn text(s: &str) -> Operation {
        Operation::text(s)
    }

    fn bold(s: &str) -> Operation {
        let mut attrs = Attributes::new();
        attrs.insert("bold".into(), Value::Bool(true));
        Operation::text(s).with_attributes(attrs)
    }

    fn image(url: &str) -> Operation {
        let mut embed = Map::new();
        embed.insert("image".into(), json!(url));
        Operation::embed(embed)
    }

    fn seq(ops: Vec<Operation>) -> OpSequence {
        OpSequence::from_ops(ops)
    }

    fn assert_reproduces(old: &OpSequence, new: &OpSequence) -> EditPatch {
        let patch = diff(old, new);
        assert_eq!(&patch.apply(old).unwrap(), new, "patch {:?}", patch);
        patch
    }

    #[test]
    fn test_insert_inside_single_run() {
        let old = seq(vec![text("Hello world")]);
        let new = seq(vec![text("Hello there world")]);
        let patch = assert_reproduces(&old, &new);

        assert_eq!(patch.keep_prefix, 6);
        assert_eq!(patch.delete_count, 0);
        assert_eq!(patch.insert_ops, vec![text("there ")]);
        assert_eq!(patch.keep_suffix, 5);
    }

    #[test]
    fn test_empty_base_is_full_load() {
        let old = OpSequence::new();
        let new = seq(vec![text("First line")]);
        let patch = assert_reproduces(&old, &new);

        assert!(patch.replaces_empty());
        assert_eq!(patch.delete_count, 0);
        assert_eq!(patch.insert_ops, new.ops().to_vec());
    }

    #[test]
    fn test_identical_is_noop() {
        let doc = seq(vec![text("a"), image("x"), bold("b")]);
        let patch = assert_reproduces(&doc, &doc);
        assert!(patch.is_noop());
        assert!(!patch.replaces_empty());
        assert_eq!(patch.keep_prefix + patch.keep_suffix, doc.len());
    }

    #[test]
    fn test_untouched_operations_are_kept() {
        let old = seq(vec![bold("Title"), text("\nbody one\n"), image("a"), bold("end")]);
        let new = seq(vec![bold("Title"), text("\nbody two\n"), image("a"), bold("end")]);
        let patch = assert_reproduces(&old, &new);

        assert_eq!(patch.keep_prefix, "Title\nbody ".chars().count());
        assert_eq!(patch.delete_count, 3);
        assert_eq!(patch.insert_ops, vec![text("two")]);
        assert_eq!(patch.keep_suffix, "\n".len() + 1 + "end".len());
    }

    #[test]
    fn test_formatting_change_replaces_run() {
        let old = seq(vec![text("Hello")]);
        let new = seq(vec![bold("Hello")]);
        let patch = assert_reproduces(&old, &new);

        assert_eq!(patch.keep_prefix, 0);
        assert_eq!(patch.delete_count, 5);
        assert_eq!(patch.insert_ops, vec![bold("Hello")]);
    }

    #[test]
    fn test_deletion_and_embed_removal() {
        let old = seq(vec![text("abc"), image("x"), text("def")]);
        let new = seq(vec![text("abcdef")]);
        let patch = assert_reproduces(&old, &new);
        assert_eq!(patch.keep_prefix, 3);
        assert_eq!(patch.delete_count, 1);
        assert!(patch.insert_ops.is_empty());
        assert_eq!(patch.keep_suffix, 3);
    }

    #[test]
    fn test_repeated_runs_do_not_overlap() {
        let old = seq(vec![text("ab"), image("x")]);
        let new = seq(vec![text("ab"), image("x"), text("ab"), image("x")]);
        let patch = assert_reproduces(&old, &new);
        assert!(patch.keep_prefix + patch.keep_suffix <= old.len());

        let old = seq(vec![text("aaa")]);
        let new = seq(vec![text("aaaaa")]);
        let patch = assert_reproduces(&old, &new);
        assert_eq!(patch.keep_prefix, 3);
        assert_eq!(patch.keep_suffix, 0);
        assert_eq!(patch.insert_ops, vec![text("aa")]);
    }

    #[test]
    fn test_clear_everything() {
        let old = seq(vec![text("gone"), image("x")]);
        let patch = assert_reproduces(&old, &OpSequence::new());
        assert_eq!(patch.delete_count, 5);
        assert!(patch.insert_ops.is_empty());
    }

    #[test]
    fn test_apply_rejects_foreign_base() {
        let patch = diff(&seq(vec![text("abc")]), &seq(vec![text("abd")]));
        let err = patch.apply(&seq(vec![text("too long")])).unwrap_err();
        assert_eq!(err, PatchError::LengthMismatch { expected: 3, actual: 8 });
    }

    #[test]
    fn test_native_change_format() {
        let patch = diff(&seq(vec![text("Hello world")]), &seq(vec![text("Hello there world")]));
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{"retain": 6}, {"insert": "there "}, {"retain": 5}])
        );

        let patch = diff(&seq(vec![text("abc")]), &seq(vec![text("xbc")]));
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{"delete": 1}, {"insert": "x"}, {"retain": 2}])
        );
    }
}

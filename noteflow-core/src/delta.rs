//! Insert-only operation sequences.
//!
//! An [`OpSequence`] is the content model shared with the editor widget: an
//! ordered list of operations, each inserting either a run of text or a
//! single embedded object. Positions are measured in `char`s, with every
//! embed counting as one position.
//!
//! Browser-based editors and the cursor offsets their clients store
//! (`selectionStart`, `selectionLength`) count UTF-16 code units instead.
//! The two agree except after characters outside the Basic Multilingual
//! Plane (most emoji), each of which is one `char` but two code units; past
//! such a character a remote cursor marker lands one position late per
//! character. Offsets are not converted between the two units.
//!
//! Sequences are kept canonical: empty text runs are dropped and adjacent
//! text runs with identical attributes are merged. Two sequences describing
//! the same content therefore compare equal structurally.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Formatting attributes attached to an operation (bold, link, header, ...).
pub type Attributes = Map<String, Value>;

#[derive(Error, Debug)]
pub enum DeltaError {
    #[error("operation {index} is a {kind}; stored content must be insert-only")]
    NonInsertOperation { index: usize, kind: &'static str },

    #[error("malformed operation list: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Payload of an insert operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Insert {
    Text(String),
    /// An opaque embedded object, e.g. `{"image": "https://..."}`.
    Embed(Map<String, Value>),
}

/// A single insert operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Operation {
    pub insert: Insert,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl Operation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            insert: Insert::Text(text.into()),
            attributes: None,
        }
    }

    pub fn embed(embed: Map<String, Value>) -> Self {
        Self {
            insert: Insert::Embed(embed),
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = if attributes.is_empty() {
            None
        } else {
            Some(attributes)
        };
        self
    }

    /// Length in abstract positions: chars for text, 1 for an embed.
    pub fn len(&self) -> usize {
        match &self.insert {
            Insert::Text(text) => text.chars().count(),
            Insert::Embed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.insert {
            Insert::Text(text) => Some(text),
            Insert::Embed(_) => None,
        }
    }

    /// Whether `other` is a text run that may be merged into this one.
    fn mergeable_with(&self, other: &Operation) -> bool {
        self.as_text().is_some() && other.as_text().is_some() && self.attributes == other.attributes
    }

    /// Sub-range of this operation, in positions. Embeds are indivisible.
    fn slice(&self, range: Range<usize>) -> Operation {
        match &self.insert {
            Insert::Text(text) => Operation {
                insert: Insert::Text(text.chars().skip(range.start).take(range.len()).collect()),
                attributes: self.attributes.clone(),
            },
            Insert::Embed(_) => self.clone(),
        }
    }
}

/// Canonical, insert-only sequence of operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Operation>", into = "Vec<Operation>")]
pub struct OpSequence {
    ops: Vec<Operation>,
}

impl OpSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequence, normalizing the operation list.
    pub fn from_ops(ops: impl IntoIterator<Item = Operation>) -> Self {
        let mut seq = Self::new();
        for op in ops {
            seq.push(op);
        }
        seq
    }

    /// Parse the editor's native JSON operation list.
    ///
    /// Lists carrying `retain` or `delete` entries are change sets, not
    /// content, and are rejected.
    pub fn from_json(value: &Value) -> Result<Self, DeltaError> {
        if let Value::Array(items) = value {
            for (index, item) in items.iter().enumerate() {
                for kind in ["retain", "delete"] {
                    if item.get(kind).is_some() {
                        return Err(DeltaError::NonInsertOperation { index, kind });
                    }
                }
            }
        }
        let ops: Vec<Operation> = serde_json::from_value(value.clone())?;
        Ok(Self::from_ops(ops))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.ops).unwrap_or(Value::Array(Vec::new()))
    }

    /// Append an operation, merging it into the last run where possible.
    pub fn push(&mut self, mut op: Operation) {
        if op.is_empty() {
            return;
        }
        if op.attributes.as_ref().is_some_and(Map::is_empty) {
            op.attributes = None;
        }
        if let Some(last) = self.ops.last_mut() {
            if last.mergeable_with(&op) {
                if let (Insert::Text(head), Insert::Text(tail)) = (&mut last.insert, op.insert) {
                    head.push_str(&tail);
                }
                return;
            }
        }
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Operation> {
        self.ops
    }

    /// Total length in positions.
    pub fn len(&self) -> usize {
        self.ops.iter().map(Operation::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Concatenation of every text run, embeds excluded.
    pub fn plain_text(&self) -> String {
        self.ops.iter().filter_map(Operation::as_text).collect()
    }

    /// Content between two positions. Out-of-range bounds are clamped.
    pub fn slice(&self, range: Range<usize>) -> OpSequence {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        let mut out = OpSequence::new();
        let mut offset = 0;
        for op in &self.ops {
            let len = op.len();
            let op_start = offset;
            let op_end = offset + len;
            offset = op_end;
            if op_end <= start {
                continue;
            }
            if op_start >= end {
                break;
            }
            let from = start.saturating_sub(op_start);
            let to = (end - op_start).min(len);
            out.push(op.slice(from..to));
        }
        out
    }

    pub fn concat(mut self, other: OpSequence) -> OpSequence {
        for op in other.ops {
            self.push(op);
        }
        self
    }

    /// Insert formatted text at `at`.
    pub fn insert_text(&self, at: usize, text: &str, attributes: Option<Attributes>) -> OpSequence {
        let mut op = Operation::text(text);
        op.attributes = attributes;
        self.insert_op(at, op)
    }

    pub fn insert_embed(&self, at: usize, embed: Map<String, Value>) -> OpSequence {
        self.insert_op(at, Operation::embed(embed))
    }

    fn insert_op(&self, at: usize, op: Operation) -> OpSequence {
        let at = at.min(self.len());
        let mut out = self.slice(0..at);
        out.push(op);
        out.concat(self.slice(at..self.len()))
    }

    /// Remove `len` positions starting at `at`.
    pub fn delete(&self, at: usize, len: usize) -> OpSequence {
        let total = self.len();
        let at = at.min(total);
        let end = at.saturating_add(len).min(total);
        self.slice(0..at).concat(self.slice(end..total))
    }
}

impl From<Vec<Operation>> for OpSequence {
    fn from(ops: Vec<Operation>) -> Self {
        Self::from_ops(ops)
    }
}

impl From<OpSequence> for Vec<Operation> {
    fn from(seq: OpSequence) -> Self {
        seq.ops
    }
}

impl FromIterator<Operation> for OpSequence {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self::from_ops(iter)
    }
}

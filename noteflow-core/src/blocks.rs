//! Persisted note content: an ordered list of typed blocks.
//!
//! Only text blocks are produced by the editor conversion path. Scribble and
//! media blocks round-trip through storage untouched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delta::OpSequence;

/// Free placement of a block on the page. `None` on a block means it flows
/// in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub id: String,
    #[serde(default)]
    pub position: Option<Position>,
    /// Plain-text projection of `delta`. Derived, never authoritative.
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub delta: OpSequence,
}

impl TextBlock {
    pub fn new(id: impl Into<String>, delta: OpSequence) -> Self {
        Self {
            id: id.into(),
            position: None,
            value: delta.plain_text(),
            delta,
        }
    }

    /// Replace the operations and refresh the projection.
    pub fn set_delta(&mut self, delta: OpSequence) {
        self.value = delta.plain_text();
        self.delta = delta;
    }
}

/// A single pen stroke, sampled as parallel coordinate/time/pressure arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub t: Vec<f64>,
    pub p: Vec<f64>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScribbleBlock {
    pub id: String,
    #[serde(default)]
    pub position: Option<Position>,
    /// Recognized handwriting, if any.
    #[serde(default)]
    pub value: String,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlock {
    pub id: String,
    #[serde(default)]
    pub position: Option<Position>,
    /// Caption or alt text.
    #[serde(default)]
    pub value: String,
    pub content_type: String,
    pub content_url: String,
    pub width: f64,
    pub height: f64,
}

/// One unit of note content, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text(TextBlock),
    Scribble(ScribbleBlock),
    Media(MediaBlock),
}

impl ContentBlock {
    pub fn id(&self) -> &str {
        match self {
            ContentBlock::Text(b) => &b.id,
            ContentBlock::Scribble(b) => &b.id,
            ContentBlock::Media(b) => &b.id,
        }
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            ContentBlock::Text(b) => b.position,
            ContentBlock::Scribble(b) => b.position,
            ContentBlock::Media(b) => b.position,
        }
    }

    /// Plain-text value of the block.
    pub fn value(&self) -> &str {
        match self {
            ContentBlock::Text(b) => &b.value,
            ContentBlock::Scribble(b) => &b.value,
            ContentBlock::Media(b) => &b.value,
        }
    }

    pub fn as_text(&self) -> Option<&TextBlock> {
        match self {
            ContentBlock::Text(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextBlock> {
        match self {
            ContentBlock::Text(b) => Some(b),
            _ => None,
        }
    }
}

pub(crate) fn new_block_id() -> String {
    Uuid::new_v4().to_string()
}

/// Wrap the editor's live content into a single text block.
pub fn to_blocks(content: &OpSequence) -> Vec<ContentBlock> {
    to_blocks_with_id(content, &new_block_id())
}

/// Like [`to_blocks`], reusing an existing text block id.
pub fn to_blocks_with_id(content: &OpSequence, block_id: &str) -> Vec<ContentBlock> {
    vec![ContentBlock::Text(TextBlock::new(block_id, content.clone()))]
}

/// Editor content stored in `blocks`: the first text block's operations, or
/// an empty sequence when the note has no text block yet.
pub fn from_blocks(blocks: &[ContentBlock]) -> OpSequence {
    blocks
        .iter()
        .find_map(ContentBlock::as_text)
        .map(|block| block.delta.clone())
        .unwrap_or_default()
}

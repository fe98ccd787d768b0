//! # noteflow-core
//!
//! Core library for noteflow's collaborative note editor.
//!
//! This crate holds the content model shared with the editor widget, the
//! persisted block representation, the diff used to update a live editor in
//! place, remote cursor bookkeeping, and the note aggregate.

pub mod blocks;
pub mod config;
pub mod cursor;
pub mod delta;
pub mod diff;
pub mod note;

pub use blocks::{
    from_blocks, to_blocks, to_blocks_with_id, ContentBlock, MediaBlock, ScribbleBlock, TextBlock,
};
pub use config::Config;
pub use cursor::{CursorAnnotation, CursorMarker, CursorOverlay, CursorRegistry};
pub use delta::{DeltaError, Insert, OpSequence, Operation};
pub use diff::{diff, EditPatch, PatchError, PatchOp};
pub use note::{Note, NoteError, NoteEvent, SerializedNote};

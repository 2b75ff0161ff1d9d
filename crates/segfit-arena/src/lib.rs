//! # segfit-arena
//!
//! The host memory region for the segfit allocator: one flat, contiguous,
//! ever-growing byte arena addressed by offsets from zero. The allocator
//! core never touches raw memory; everything goes through the
//! bounds-checked accessors here.

pub mod arena;
pub mod config;

pub use arena::{Arena, ArenaError, WORD_SIZE};
pub use config::ArenaConfig;

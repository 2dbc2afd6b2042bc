//! Data models for engram.
//!
//! This module contains the core data structures used throughout the system.

mod formation;
mod memory;

pub use formation::{FormationEvent, FormationTask, TaskStatus};
pub use memory::{Memory, MemoryCategory, MemoryDraft, MemoryId, MemoryStatus};

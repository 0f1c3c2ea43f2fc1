//! Board - the replicated log held by every peer
//!
//! This crate provides the authoritative local store of versioned messages:
//! - Append-only storage keyed by version
//! - Duplicate admission check that breaks multicast echo loops
//! - High-water-mark tracking and gap computation for repair

pub mod board;

pub use board::Board;

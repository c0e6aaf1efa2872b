//! ecomlens Core - Shared domain types.
//!
//! This crate provides the types shared by every ecomlens component:
//! - `analytics` - Store clients, session sampler, aggregation engine, CLV integrator
//! - `cli` - Command-line runner for analytics passes
//!
//! # Architecture
//!
//! The core crate contains only types and pure codecs - no I/O, no database
//! access. Both store families (the entity document store and the session
//! wide-column store) are described here so that their key models can be
//! reconciled without either side depending on the other.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, prices, statuses, entity records and composite row keys

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;

//! Core types for ecomlens.
//!
//! This module provides type-safe wrappers for the domain concepts that flow
//! between the entity store, the session store and the analytics engine.

pub mod entity;
pub mod id;
pub mod price;
pub mod row_key;
pub mod status;

pub use entity::*;
pub use id::*;
pub use price::{Price, PriceError};
pub use row_key::{KeyRange, MetricKey, RowKey, RowKeyError, SessionKey};
pub use status::*;

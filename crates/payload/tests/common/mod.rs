//! Test infrastructure for the payload layer.
//!
//! Fixtures build populated in-memory stores and systems of record;
//! [`FaultyStore`] injects page, delete and stop faults.

#![allow(dead_code)]

pub mod faults;
pub mod fixtures;

pub use faults::*;
pub use fixtures::*;

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for weft crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`selections`] - Terse selection-tree builders
//! - [`selectors`] - Canned queries and fragments used across the test suite
//! - [`recording`] - Callbacks that record delivered snapshots

pub mod config;
pub mod recording;
pub mod selections;
pub mod selectors;

// Re-export commonly used items at crate root for convenience
pub use config::InMemoryConfigStore;
pub use recording::RecordingCallback;
pub use selections::{
    arg, include_if, inline, linked, non_null_scalar, plural, scalar, spread, var_arg,
};
pub use selectors::{
    fragment_on, friends_query, me_query, node_query, user_fragment, FRIENDS_QUERY, ME_QUERY,
};

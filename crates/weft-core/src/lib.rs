// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! weft-core: normalized client-side record store.
//!
//! Records fetched through selectors are kept in one flat map keyed by record
//! id. Views read them back through the [`reader`] with structural sharing,
//! commits flow through the [`publish_queue`] (optimistic layers included),
//! subscribers are notified only when data they read changed, and records no
//! longer reachable from a retained root are reclaimed by the reference
//! counting [`gc`] in bounded batches.
//!
//! [`Environment`] ties the pieces together and is the entry point for hosts.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

/// Store configuration and its storage port.
pub mod config;
mod environment;
mod error;
/// Reference-counted garbage collector.
pub mod gc;
/// Record and selector identifiers.
pub mod ident;
/// Reference marker.
pub mod marker;
/// Copy-on-write record writer and updater type.
pub mod mutator;
/// Payload normalizer.
pub mod normalizer;
/// Publish queue.
pub mod publish_queue;
/// Reader.
pub mod reader;
mod record;
/// Selection trees and selectors.
pub mod selector;
mod snapshot;
mod source;
mod storage_key;
mod subscriptions;
mod task;

pub use config::{ConfigError, ConfigService, ConfigStore, StoreConfig};
pub use environment::{Disposable, Environment, OptimisticInput, PayloadOutcome, RunReport};
pub use error::StoreError;
pub use gc::{CollectStep, GarbageCollector, HoldId, RetainId};
pub use ident::{make_client_id, make_client_list_id, DataId, SelectorId, ROOT_ID, ROOT_TYPE};
pub use marker::{mark, mark_references};
pub use mutator::{MutatorError, RecordSourceMutator, Updater};
pub use normalizer::{
    normalize, FieldError, InconsistentField, Inconsistency, NormalizeError, NormalizeOptions,
    Normalized,
};
pub use publish_queue::{
    BaseItem, OptimisticUpdate, PublishQueue, QueueState, RunOutcome, UpdateId, UpdateOrigin,
};
pub use reader::{read, read_with_previous, FRAGMENTS_KEY};
pub use record::{FieldValue, Record, ID_KEY, TYPENAME_KEY};
pub use selector::{
    Argument, ArgumentValue, Condition, FragmentSpread, InlineFragment, LinkedField, ScalarField,
    Selection, Selector, SelectorNode, Variables,
};
pub use snapshot::{recycle, ReadObject, ReadValue, Snapshot};
pub use source::{OverlayView, ReadSource, RecordEntry, RecordOverlay, RecordSource, RecordStatus};
pub use storage_key::{canonical_json, storage_key};
pub use subscriptions::{SnapshotCallback, SubscriptionId, SubscriptionTable};
pub use task::{Task, TaskQueue};

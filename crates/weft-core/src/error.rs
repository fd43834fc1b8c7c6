// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use thiserror::Error;

use crate::ident::DataId;
use crate::normalizer::NormalizeError;

/// Fatal store errors.
///
/// These indicate a bug in the host or in the store itself. Recoverable
/// conditions (missing data, normalization inconsistencies, non-null
/// violations) are reported as data and never surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A payload was committed for a selector whose root record is unknown.
    #[error("selector root not found: {0}")]
    UnknownRoot(DataId),
    /// Payload data does not match the selector's root shape.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    /// Collection tracking was enabled over a source that already holds records.
    #[error("garbage collection must start on an empty record source ({0} entries present)")]
    CollectionNotEmpty(usize),
    /// A release decremented a retain count that was already zero.
    #[error("retain count underflow for {0}")]
    RetainCountUnderflow(DataId),
    /// `run` was invoked while a run was applying.
    #[error("publish queue re-entered while applying")]
    QueueReentered,
    /// Internal invariant violated.
    #[error("internal store corruption: {0}")]
    Internal(&'static str),
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use std::fmt;

use blake3::Hasher;

/// Canonical 256-bit hash used for selector and selection-tree identity.
pub type Hash = [u8; 32];

/// Prefix that marks an identifier as client-generated.
///
/// Client ids are never handed to network collaborators; they only exist to
/// give nested objects without an identity field a stable home in the store.
pub const CLIENT_ID_PREFIX: &str = "client:";

/// Identifier of the synthetic root record that query selectors hang off.
pub const ROOT_ID: &str = "client:root";

/// Typename of the synthetic root record.
pub const ROOT_TYPE: &str = "__Root";

/// Opaque identifier of a single record in the store.
///
/// Server-assigned ids are stable across sessions. Client ids (see
/// [`CLIENT_ID_PREFIX`]) are derived from the parent id and storage key and
/// are only stable for the lifetime of the parent.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DataId(String);

impl DataId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier of the synthetic root record.
    pub fn root() -> Self {
        Self(ROOT_ID.to_owned())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for client-generated identifiers.
    #[must_use]
    pub fn is_client_id(&self) -> bool {
        self.0.starts_with(CLIENT_ID_PREFIX)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for DataId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Derives the client id for a singular linked object with no identity field.
///
/// Format: `client:<parent>:<storage_key>`. A parent that is itself a client
/// id contributes its id without the `client:` prefix, so nesting never
/// repeats it. Server ids share this namespace: a server record `root` and
/// the synthetic `client:root` derive the same child ids.
pub fn make_client_id(parent: &DataId, storage_key: &str) -> DataId {
    let parent = parent.as_str();
    let parent = parent.strip_prefix(CLIENT_ID_PREFIX).unwrap_or(parent);
    DataId(format!("{CLIENT_ID_PREFIX}{parent}:{storage_key}"))
}

/// Derives the client id for the `index`-th element of a plural linked field.
pub fn make_client_list_id(parent: &DataId, storage_key: &str, index: usize) -> DataId {
    let base = make_client_id(parent, storage_key);
    DataId(format!("{}:{index}", base.0))
}

/// Strongly typed identity of a selector: root id, selection tree and variables.
///
/// Produced by [`crate::Selector::id`]; two selectors are interchangeable for
/// notification and retention bookkeeping iff their ids are equal.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SelectorId(pub Hash);

impl SelectorId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Returns the first eight bytes as lowercase hex, for log lines.
    #[must_use]
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for SelectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SelectorId({})", self.short_hex())
    }
}

/// Produces a stable, domain-separated selector id (prefix `b"selector:"`) using BLAKE3.
///
/// Each component is length-prefixed so adjacent fields cannot alias.
pub fn make_selector_id(root: &DataId, fingerprint: &Hash, variables_json: &str) -> SelectorId {
    let mut hasher = Hasher::new();
    hasher.update(b"selector:");
    hasher.update(&(root.as_str().len() as u64).to_le_bytes());
    hasher.update(root.as_str().as_bytes());
    hasher.update(fingerprint);
    hasher.update(&(variables_json.len() as u64).to_le_bytes());
    hasher.update(variables_json.as_bytes());
    SelectorId(hasher.finalize().into())
}

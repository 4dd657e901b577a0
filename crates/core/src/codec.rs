//! Inventory record codec.
//!
//! The stored set lives in the anchor's `data` map, one key per reference:
//! `namespace_name_group_kind`, value empty. Names may hold `:` (RBAC objects)
//! which is written as `__` since `:` is not a valid map key character there.
//! Decoding is strict: a malformed key fails the whole decode. Encoding refuses
//! references whose key would not decode back to the same reference.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::{InventorySet, ObjectReference};

/// Anchor payload (ConfigMap-style `data`).
pub type Payload = BTreeMap<String, String>;

const FIELD_SEP: char = '_';
const COLON_TRANSCODED: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed inventory entry {entry:?}: {reason}")]
    Malformed { entry: String, reason: &'static str },
    #[error("cannot record {reference} in an inventory: {reason}")]
    Unencodable { reference: String, reason: &'static str },
}

pub fn encode_key(r: &ObjectReference) -> Result<String, CodecError> {
    let refuse = |reason: &'static str| CodecError::Unencodable { reference: r.to_string(), reason };
    if r.name.is_empty() { return Err(refuse("empty name")); }
    if r.group_kind.kind.is_empty() { return Err(refuse("empty kind")); }
    let fields = [&r.namespace, &r.name, &r.group_kind.group, &r.group_kind.kind];
    if fields.iter().any(|f| f.contains(FIELD_SEP)) { return Err(refuse("'_' is reserved as the field separator")); }
    let name = r.name.replace(':', COLON_TRANSCODED);
    Ok(format!("{}_{}_{}_{}", r.namespace, name, r.group_kind.group, r.group_kind.kind))
}

pub fn decode_key(entry: &str) -> Result<ObjectReference, CodecError> {
    let bad = |reason: &'static str| CodecError::Malformed { entry: entry.to_string(), reason };
    // namespace is everything before the first separator, kind and group are the last two fields
    let (namespace, rest) = entry.split_once(FIELD_SEP).ok_or_else(|| bad("missing field separator"))?;
    let (rest, kind) = rest.rsplit_once(FIELD_SEP).ok_or_else(|| bad("expected 4 fields"))?;
    let (name, group) = rest.rsplit_once(FIELD_SEP).ok_or_else(|| bad("expected 4 fields"))?;
    let name = name.replace(COLON_TRANSCODED, ":");
    if name.contains(FIELD_SEP) { return Err(bad("too many fields")); }
    if name.is_empty() { return Err(bad("empty name")); }
    if kind.is_empty() { return Err(bad("empty kind")); }
    Ok(ObjectReference::new(group, kind, namespace, &name))
}

pub fn encode(set: &InventorySet) -> Result<Payload, CodecError> {
    set.iter().map(|r| Ok((encode_key(r)?, String::new()))).collect()
}

pub fn decode(payload: &Payload) -> Result<InventorySet, CodecError> {
    payload.keys().map(|k| decode_key(k)).collect()
}

//! Bitmask codec for persisted permission rows
//!
//! Field `i` occupies bits `[2i, 2i+1]`. Field 0 is the host-level decision,
//! field `k.ordinal() + 1` the decision for request kind `k`.
//! `0b11` is Allow, `0b10` is Deny, anything else reads as Undecided.

use crate::kind::{Permission, RequestKind};
use crate::store::RowPermissions;

const BITS_PER_FIELD: usize = 2;
const FIELD_MASK: i64 = 0b11;
const ALLOW_BITS: i64 = 0b11;
const DENY_BITS: i64 = 0b10;

/// Host-level field plus one field per request kind
pub(crate) const FIELD_COUNT: usize = RequestKind::COUNT + 1;

pub(crate) fn field_index(kind: Option<RequestKind>) -> usize {
    kind.map(|k| k.ordinal() + 1).unwrap_or(0)
}

fn shift(field: usize) -> usize {
    field * BITS_PER_FIELD
}

/// Replace one field, leaving every other field untouched.
pub(crate) fn encode_field(bitmask: i64, field: usize, value: Permission) -> i64 {
    debug_assert!(field < FIELD_COUNT);
    let cleared = bitmask & !(FIELD_MASK << shift(field));
    let bits = match value {
        Permission::Allow => ALLOW_BITS,
        Permission::Deny => DENY_BITS,
        Permission::Undecided => 0,
    };
    cleared | (bits << shift(field))
}

pub(crate) fn decode_field(bitmask: i64, field: usize) -> Permission {
    match (bitmask >> shift(field)) & FIELD_MASK {
        ALLOW_BITS => Permission::Allow,
        DENY_BITS => Permission::Deny,
        _ => Permission::Undecided,
    }
}

pub fn encode_row(row: &RowPermissions) -> i64 {
    let mut bitmask = encode_field(0, field_index(None), row.host);
    for kind in RequestKind::ALL {
        bitmask = encode_field(bitmask, field_index(Some(kind)), row.kind(kind));
    }
    bitmask
}

pub fn decode_row(bitmask: i64) -> RowPermissions {
    let mut row = RowPermissions::undecided();
    row.host = decode_field(bitmask, field_index(None));
    for kind in RequestKind::ALL {
        row.set(Some(kind), decode_field(bitmask, field_index(Some(kind))));
    }
    row
}

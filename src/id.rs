//! Identifier encoding: the 64-bit ids that flow through filters, registers
//! and table types.
//!
//! A [`Id`] packs two 32-bit identifiers: the low half ("pred" when the id is
//! used as a pair) and the high half ("obj"). A bare (non-pair) identifier is
//! just a 32-bit value with the high half zero.

/// Raw identifier value. The store, the compiler and the VM all pass these
/// around rather than a richer type, matching the source's "everything is an
/// id" design (§3.1).
pub type Id = u64;

/// A single 32-bit component of an [`Id`].
pub type Entity = u32;

/// Bits reserved for role flags within each 32-bit half. Preserved verbatim
/// by every mask this crate builds; nothing in this crate sets them, but a
/// host is free to tag entities with them before handing ids to the store.
const ROLE_BITS: u32 = 0xF000_0000;

/// Reserved id meaning "any identifier" (GLOSSARY: Wildcard).
pub const WILDCARD: Entity = 0xFFFF_FFFF;

/// Reserved id used as the implicit subject of a term with none (GLOSSARY: This).
pub const THIS: Entity = 0xFFFF_FFFE;

/// Encode a `(pred, obj)` pair into a 64-bit id: pred in the low half, obj in
/// the high half (§3.1).
#[inline]
pub const fn pair(pred: Entity, obj: Entity) -> Id {
    (pred as Id) | ((obj as Id) << 32)
}

/// Low half (predicate slot) of a packed id.
#[inline]
pub const fn lo(id: Id) -> Entity {
    (id & 0xFFFF_FFFF) as Entity
}

/// High half (object slot) of a packed id.
#[inline]
pub const fn hi(id: Id) -> Entity {
    (id >> 32) as Entity
}

/// Role bits carried by the low half.
#[inline]
pub const fn lo_role(id: Id) -> Entity {
    lo(id) & ROLE_BITS
}

/// Role bits carried by the high half.
#[inline]
pub const fn hi_role(id: Id) -> Entity {
    hi(id) & ROLE_BITS
}

/// True if `e` is the reserved wildcard.
#[inline]
pub const fn is_wildcard(e: Entity) -> bool {
    e == WILDCARD
}

/// True if `e` is the reserved `This` marker.
#[inline]
pub const fn is_this(e: Entity) -> bool {
    e == THIS
}

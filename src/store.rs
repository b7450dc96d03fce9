//! Store oracle: the external collaborator interface (spec.md §6.1).
//!
//! The core never constructs or mutates a store; it only calls these
//! operations. Everything that actually holds component data, builds
//! indices, or persists anything lives outside this crate.

use crate::id::{Entity, Id};

/// Opaque handle to a table (an archetype: the set of entities sharing the
/// same exact id set). `0` is never a valid table produced by a conforming
/// store; it exists only as a sentinel for register initialization.
pub type Table = u32;

/// One hit in a [`StoreOracle::table_set_for`] result: a table plus the
/// column (position within that table's type) where the query's mask first
/// matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRecord {
    pub table: Table,
    pub first_matching_column: usize,
}

/// A relation's metadata, looked up by id (spec.md §6.1: `has_role`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `R(a,b) ∧ R(b,c) ⇒ R(a,c)`.
    Transitive,
    /// Has no subtypes; subtype expansion may be skipped.
    Final,
    /// Participates in the `IsA` subtype hierarchy.
    IsA,
}

/// The entity/table oracle the core compiles and executes against
/// (spec.md §2 component A, §6.1).
///
/// Implementations own indexing, storage layout and mutation; none of that
/// is this crate's concern (spec.md §1 Non-goals).
pub trait StoreOracle {
    /// Map an entity to its storage location, if it has one.
    fn record_of(&self, entity: Entity) -> Option<(Table, usize)>;

    /// Convenience over [`record_of`](Self::record_of).
    fn table_of(&self, entity: Entity) -> Option<Table> {
        self.record_of(entity).map(|(table, _)| table)
    }

    /// Every table whose type contains at least one id matching `mask`
    /// (wildcard halves already normalized by the caller). Each record
    /// carries the column index of the first match.
    fn table_set_for(&self, mask: Id) -> Vec<TableRecord>;

    /// A table's type: the ordered id sequence it holds. Ordered so the
    /// predicate dominates the sort key (predicate in the pair's high bits
    /// per spec.md §6.1).
    fn table_type(&self, table: Table) -> &[Id];

    /// All entities stored in `table`, in row order.
    fn table_entities(&self, table: Table) -> &[Entity];

    /// Number of rows (entities) in `table`.
    fn table_row_count(&self, table: Table) -> usize {
        self.table_entities(table).len()
    }

    /// Metadata lookup on an id: does it carry `role`?
    fn has_role(&self, id: Entity, role: Role) -> bool;
}

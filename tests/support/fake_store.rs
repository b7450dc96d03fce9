//! In-memory `StoreOracle` fixture for end-to-end scenario tests
//! (SPEC_FULL §10.5).

use std::collections::{HashMap, HashSet};

use queryvm::store::{Role, StoreOracle, Table, TableRecord};
use queryvm::{id, Entity};

/// A minimal archetype store: entities with an identical fact set share a
/// table (the ECS convention spec.md §3.1/§6.1 assumes), entities with a
/// distinct one get their own.
#[derive(Default)]
pub struct FakeStore {
    next_table: Table,
    by_type: HashMap<Vec<id::Id>, Table>,
    table_type: HashMap<Table, Vec<id::Id>>,
    table_entities: HashMap<Table, Vec<Entity>>,
    record_of: HashMap<Entity, (Table, usize)>,
    transitive: HashSet<Entity>,
    non_final: HashSet<Entity>,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore {
            next_table: 1,
            ..Default::default()
        }
    }

    /// Declare `subject`'s full `(predicate, object)` fact set in one shot.
    pub fn entity(&mut self, subject: Entity, facts: &[(Entity, Entity)]) -> &mut Self {
        let mut ty: Vec<id::Id> = facts.iter().map(|&(p, o)| id::pair(p, o)).collect();
        ty.sort_unstable();
        let next_table = &mut self.next_table;
        let table_type = &mut self.table_type;
        let table_entities = &mut self.table_entities;
        let table = *self.by_type.entry(ty.clone()).or_insert_with(|| {
            let t = *next_table;
            *next_table += 1;
            table_type.insert(t, ty);
            table_entities.insert(t, Vec::new());
            t
        });
        let row = self.table_entities.get(&table).unwrap().len();
        self.table_entities.get_mut(&table).unwrap().push(subject);
        self.record_of.insert(subject, (table, row));
        self
    }

    pub fn mark_transitive(&mut self, predicate: Entity) -> &mut Self {
        self.transitive.insert(predicate);
        self
    }

    pub fn mark_non_final(&mut self, predicate: Entity) -> &mut Self {
        self.non_final.insert(predicate);
        self
    }
}

impl StoreOracle for FakeStore {
    fn record_of(&self, entity: Entity) -> Option<(Table, usize)> {
        self.record_of.get(&entity).copied()
    }

    fn table_set_for(&self, mask: id::Id) -> Vec<TableRecord> {
        let probe = queryvm::pair::Pair {
            pred: queryvm::pair::PairSlot::Literal(id::lo(mask)),
            obj: queryvm::pair::PairSlot::Literal(id::hi(mask)),
            reg_mask: queryvm::pair::RegMask::empty(),
            transitive: false,
            final_: true,
        };
        let filter = probe.materialize(&[]);
        self.table_type
            .iter()
            .filter_map(|(&table, ty)| {
                ty.iter()
                    .position(|&id| filter.matches(id))
                    .map(|p| TableRecord { table, first_matching_column: p })
            })
            .collect()
    }

    fn table_type(&self, table: Table) -> &[id::Id] {
        self.table_type.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn table_entities(&self, table: Table) -> &[Entity] {
        self.table_entities.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn has_role(&self, id: Entity, role: Role) -> bool {
        match role {
            Role::Transitive => self.transitive.contains(&id),
            Role::Final => !self.non_final.contains(&id),
            Role::IsA => false,
        }
    }
}

//! A two-stage declarative query engine core.
//!
//! A [`term::Expression`] (a conjunction of [`term::Clause`] terms) is
//! [`compile`]d against a host-owned [`store::StoreOracle`] into a
//! [`program::Program`]: a linear opcode sequence. [`iter`] drives that
//! program with a stateful, re-entrant [`vm::QueryIter`] — a backtracking VM
//! that streams one variable assignment per [`vm::QueryIter::next`] call.
//!
//! Text parsing of a surface query language, mutation of the store, and
//! index construction are all out of scope — this crate only compiles and
//! executes already-parsed term sets against a store the host already owns.

pub mod config;
pub mod error;
pub mod id;
pub mod pair;
pub mod program;
pub mod store;
pub mod term;
pub mod variable;
pub mod vm;

pub use config::EngineConfig;
pub use error::{CompileError, CompileResult};
pub use id::Entity;
pub use program::{Op, OpKind, Program};
pub use store::StoreOracle;
pub use term::{Clause, ClauseBuilder, Expression, Term};
pub use variable::{VarId, VarKind};
pub use vm::{Binding, QueryIter};

/// Compile an [`Expression`] against `store` into a [`Program`] (spec.md
/// §6.2 `compile`), using the default [`EngineConfig`] ceiling.
pub fn compile(expression: &Expression, store: &dyn StoreOracle) -> CompileResult<Program> {
    program::compile(expression, store)
}

/// Same as [`compile`], but with `config`'s variable-count ceiling in place
/// of [`EngineConfig::default`]'s.
pub fn compile_with_config(
    expression: &Expression,
    store: &dyn StoreOracle,
    config: &EngineConfig,
) -> CompileResult<Program> {
    program::compile_with_config(expression, store, config)
}

/// Start a fresh, re-entrant iteration over `program` (spec.md §6.2 `iter`).
/// There is no `free` — the iterator's resources are released when it (and
/// the borrow of `program`/`store` it holds) is dropped.
pub fn iter<'a>(program: &'a Program, store: &'a dyn StoreOracle) -> QueryIter<'a> {
    QueryIter::new(program, store)
}

/// Same as [`iter`], but validates `config.inline_walk_frames` against the
/// VM's actual compiled-in walk-stack capacity.
pub fn iter_with_config<'a>(
    program: &'a Program,
    store: &'a dyn StoreOracle,
    config: &EngineConfig,
) -> QueryIter<'a> {
    QueryIter::new_with_config(program, store, config)
}

/// Advance `iterator` to its next result (spec.md §6.2 `next`).
pub fn next(iterator: &mut QueryIter<'_>) -> bool {
    iterator.next()
}

/// Look up a user-named variable by its source name (spec.md §6.2
/// `find_variable`).
pub fn find_variable(program: &Program, name: &str) -> Option<VarId> {
    program.find_variable(name)
}

/// The source name of `var`, if any (spec.md §6.2 `variable_name`).
pub fn variable_name(program: &Program, var: VarId) -> Option<&str> {
    program.variable_name(var)
}

/// Whether `var` is an entity-kind (as opposed to table-kind) variable
/// (spec.md §6.2 `variable_is_entity`).
pub fn variable_is_entity(program: &Program, var: VarId) -> bool {
    program.variable_is_entity(var)
}

/// The entity `var` is currently bound to in `iterator`'s most recent result
/// (spec.md §6.2 `variable`). `None` (rather than the spec's sentinel `0`)
/// for a table-kind variable with no entity view, or for any variable with
/// nothing bound yet.
pub fn variable(iterator: &QueryIter<'_>, var: VarId) -> Option<Entity> {
    iterator.binding().variable(var)
}

/// Number of source terms in the compiled program (spec.md §6.2 `term_count`).
pub fn term_count(program: &Program) -> usize {
    program.term_count
}

/// Number of user-visible variables in the compiled program (spec.md §6.2
/// `variable_count` — compiler-synthesized variables are not counted).
pub fn variable_count(program: &Program) -> usize {
    program.user_variable_count
}

/// Human-readable disassembly of `program`, one line per opcode (spec.md
/// §6.2 `to_string`).
pub fn to_string(program: &Program) -> String {
    program.disassemble()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Role, Table, TableRecord};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemStore {
        table_type: HashMap<Table, Vec<id::Id>>,
        table_entities: HashMap<Table, Vec<Entity>>,
        record_of: HashMap<Entity, (Table, usize)>,
    }

    impl MemStore {
        fn add(&mut self, table: Table, ty: Vec<id::Id>, entities: Vec<Entity>) {
            for (row, &e) in entities.iter().enumerate() {
                self.record_of.insert(e, (table, row));
            }
            self.table_type.insert(table, ty);
            self.table_entities.insert(table, entities);
        }
    }

    impl StoreOracle for MemStore {
        fn record_of(&self, entity: Entity) -> Option<(Table, usize)> {
            self.record_of.get(&entity).copied()
        }
        fn table_set_for(&self, mask: id::Id) -> Vec<TableRecord> {
            let probe = crate::pair::Pair {
                pred: crate::pair::PairSlot::Literal(id::lo(mask)),
                obj: crate::pair::PairSlot::Literal(id::hi(mask)),
                reg_mask: crate::pair::RegMask::empty(),
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
        fn has_role(&self, _id: Entity, _role: Role) -> bool {
            false
        }
    }

    const JEDI: Entity = 1;
    const YODA: Entity = 100;

    #[test]
    fn public_api_round_trips_a_ground_fact_query() {
        let mut store = MemStore::default();
        store.add(10, vec![id::pair(JEDI, 0)], vec![YODA]);

        let expr = Expression::new(vec![ClauseBuilder::new(Term::Id(JEDI)).subject(Term::Id(YODA)).build()]);
        let program = compile(&expr, &store).expect("compiles");

        assert_eq!(term_count(&program), 1);
        let mut it = iter(&program, &store);
        assert!(next(&mut it));
        assert!(!next(&mut it));
        assert!(to_string(&program).contains("Yield"));
    }

    #[test]
    fn public_api_streams_implicit_subject_variable() {
        let mut store = MemStore::default();
        store.add(10, vec![id::pair(JEDI, 0)], vec![YODA]);

        let expr = Expression::new(vec![ClauseBuilder::new(Term::Id(JEDI)).build()]);
        let program = compile(&expr, &store).expect("compiles");
        let this = find_variable(&program, variable::THIS_NAME).expect("This is always bound");
        assert!(variable_is_entity(&program, this) || program.root == Some(this));

        let mut it = iter(&program, &store);
        assert!(next(&mut it));
        assert_eq!(variable(&it, this), Some(YODA));
        assert!(!next(&mut it));
    }
}

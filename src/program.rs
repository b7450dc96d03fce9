//! Program compiler (spec.md §4.3, component D).
//!
//! Lowers a planned variable set + clause list into the linear opcode
//! sequence the backtracking VM (§4.4) executes.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult};
use crate::id::{self, Entity};
use crate::pair::Pair;
use crate::store::{Role, StoreOracle};
use crate::term::Expression;
use crate::variable::{PlannedClause, Slot, VarId, VarKind, Variable, VariablePlanner, NONE};

/// One VM instruction (spec.md §3.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpKind {
    /// True on first entry, false on redo; terminates the program.
    Input,
    /// Enumerate the store's table set for a filter, writing the subject.
    Select,
    /// Check membership of an already-known table/entity in a filter's set.
    With,
    /// Inclusive/exclusive descendant walk of the subtype DAG (spec.md §4.3,
    /// §4.4). `inclusive` folds the spec's `SetJmp`/`Store`/`Jump` idiom into
    /// a single opcode (see DESIGN.md) — the compiler never needs the
    /// general-purpose delimited-control primitive those describe.
    SubSet { inclusive: bool },
    /// Inclusive/exclusive ancestor walk of the subtype DAG.
    SuperSet { inclusive: bool },
    /// Forward each entity of a table register into a fresh entity register.
    Each,
    /// Write a literal entity's table, or narrow an already-bound Entity-kind
    /// `r_in` down to its own single-row table (twin-bridging a join), into
    /// `r_out` exactly once.
    Store,
    /// Publishes the current frame as a result; always "fails" afterward to
    /// resume the search on the next call.
    Yield,
}

/// One compiled instruction (spec.md §3.4).
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub param: Option<Pair>,
    /// Literal id used when `r_in` is the sentinel (e.g. a literal-subject
    /// `Store`).
    pub subject: Option<Entity>,
    pub r_in: VarId,
    pub r_out: VarId,
    /// Source-term index this op satisfies, or -1.
    pub column: i32,
    pub on_pass: i32,
    pub on_fail: i32,
}

impl Op {
    fn new(kind: OpKind) -> Self {
        Op {
            kind,
            param: None,
            subject: None,
            r_in: NONE,
            r_out: NONE,
            column: -1,
            on_pass: -1,
            on_fail: -1,
        }
    }
}

/// A compiled, immutable program (spec.md §3.4). Shared read-only by any
/// number of iterators.
#[derive(Debug, Clone)]
pub struct Program {
    pub ops: Vec<Op>,
    /// All variables, including compiler-synthesized ones appended after
    /// the user-visible ones (indices `[0, user_variable_count)`).
    pub variables: Vec<Variable>,
    pub user_variable_count: usize,
    pub term_count: usize,
    pub root: Option<VarId>,
    /// `table_var -> entity_var`, see [`Compiler::entity_view`].
    pub(crate) entity_view: HashMap<VarId, VarId>,
}

impl Program {
    pub fn find_variable(&self, name: &str) -> Option<VarId> {
        self.variables[..self.user_variable_count]
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.id)
    }

    pub fn variable_name(&self, id: VarId) -> Option<&str> {
        self.variables.get(id as usize).map(|v| v.name.as_str())
    }

    pub fn variable_is_entity(&self, id: VarId) -> bool {
        self.variables
            .get(id as usize)
            .map(|v| v.kind == VarKind::Entity)
            .unwrap_or(false)
    }

    /// Human-readable disassembly (spec.md §6.2 `to_string`).
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (idx, op) in self.ops.iter().enumerate() {
            let mnemonic = match op.kind {
                OpKind::Input => "Input",
                OpKind::Select => "Select",
                OpKind::With => "With",
                OpKind::SubSet { inclusive: true } => "SubSet+",
                OpKind::SubSet { inclusive: false } => "SubSet",
                OpKind::SuperSet { inclusive: true } => "SuperSet+",
                OpKind::SuperSet { inclusive: false } => "SuperSet",
                OpKind::Each => "Each",
                OpKind::Store => "Store",
                OpKind::Yield => "Yield",
            };
            let fields = op
                .param
                .as_ref()
                .map(|p| format!("F:({:?},{:?})", p.pred, p.obj))
                .unwrap_or_default();
            out.push_str(&format!(
                "{idx}: [P:{}, F:{}] {mnemonic} I:{} O:{} {fields}\n",
                op.on_pass, op.on_fail, op.r_in, op.r_out
            ));
        }
        out
    }
}

const ISA: Entity = 0; // predicate id reserved for the subtype hierarchy, by convention of the host store.

struct Compiler<'s> {
    ops: Vec<Op>,
    variables: Vec<Variable>,
    user_variable_count: usize,
    written: Vec<bool>,
    planned: Vec<PlannedClause>,
    store: &'s dyn StoreOracle,
    literal_table_vars: HashMap<Entity, VarId>,
    /// `table_var -> entity_var` for every `Table`-kind variable an `Each`
    /// has populated an entity-typed view of (named twin or synthetic).
    /// Lets [`Binding::variable`](crate::vm::Binding::variable) report the
    /// current row's entity even though the `Table`-kind register itself
    /// stays pinned at the whole matching table.
    entity_view: HashMap<VarId, VarId>,
    anon_counter: u32,
}

impl<'s> Compiler<'s> {
    fn alloc_var(&mut self, kind: VarKind, name: String) -> VarId {
        let id = self.variables.len() as VarId;
        self.variables.push(Variable {
            name,
            kind,
            id,
            occurs: 0,
            depth: 0,
            marked: false,
        });
        self.written.push(false);
        id
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        self.anon_counter += 1;
        format!("{prefix}{}", self.anon_counter)
    }

    fn push(&mut self, op: Op) -> i32 {
        let idx = self.ops.len() as i32;
        self.ops.push(op);
        idx
    }

    /// Apply the default wiring (spec.md §4.3: `on_pass = current_count`,
    /// `on_fail = current_count - 2`) to every op pushed so far that still
    /// carries the placeholder `-1`s, except index 0 (`Input`, wired by the
    /// caller) and any op an idiom has already wired explicitly.
    fn wire_defaults(&mut self) {
        let len = self.ops.len() as i32;
        for (idx, op) in self.ops.iter_mut().enumerate() {
            let idx = idx as i32;
            if op.on_pass == -1 && idx + 1 < len {
                op.on_pass = idx + 1;
            }
            if op.on_fail == -1 && idx > 0 {
                op.on_fail = idx - 1;
            }
        }
    }

    fn pred_metadata(&self, pred: Slot) -> (bool, bool) {
        match pred {
            Slot::Literal(id) if !id::is_wildcard(id) => (
                self.store.has_role(id, Role::Transitive),
                self.store.has_role(id, Role::Final),
            ),
            _ => (false, true),
        }
    }

    fn literal_pred(&self, pred: Slot) -> Entity {
        match pred {
            Slot::Literal(id) => id,
            _ => panic!("transitive/subset paths require a literal predicate"),
        }
    }

    /// Ensure `subject` has a bound Table-kind register, emitting a `Store`
    /// for literal subjects (spec.md §4.3 body, literal-subject sweep).
    fn ensure_subject_table_var(&mut self, subject: Slot) -> VarId {
        match subject {
            Slot::Var(id) => id,
            Slot::Literal(id) => {
                if let Some(&v) = self.literal_table_vars.get(&id) {
                    return v;
                }
                let name = self.fresh_name("@lit");
                let v = self.alloc_var(VarKind::Table, name);
                let mut op = Op::new(OpKind::Store);
                op.subject = Some(id);
                op.r_out = v;
                op.column = -1;
                self.push(op);
                self.written[v as usize] = true;
                self.literal_table_vars.insert(id, v);
                v
            }
            Slot::Absent => unreachable!("subject slot is never absent"),
        }
    }

    /// If `table_var`'s Table-kind register is not yet written but its named
    /// Entity-kind twin already is (an earlier clause bound it via predicate
    /// or object position), derive the table register from that single
    /// entity via a `Store` (see `exec_store`'s `record_of` branch) so this
    /// clause joins against it with a `With` instead of re-enumerating
    /// independently with an unconstrained `Select`.
    fn bridge_from_entity_twin_if_needed(&mut self, table_var: VarId) {
        if self.written[table_var as usize] {
            return;
        }
        let name = self.variables[table_var as usize].name.clone();
        let Some(twin) = self.find_entity_twin(&name) else {
            return;
        };
        if !self.written[twin as usize] {
            return;
        }
        let mut op = Op::new(OpKind::Store);
        op.r_in = twin;
        op.r_out = table_var;
        self.push(op);
        self.written[table_var as usize] = true;
    }

    fn promote_to_entity(&mut self, table_var: VarId) -> VarId {
        let name = self.variables[table_var as usize].name.clone();
        if let Some(twin) = self.find_entity_twin(&name) {
            if self.written[twin as usize] {
                return twin;
            }
            self.emit_each(table_var, twin);
            return twin;
        }
        let fresh_name = self.fresh_name("@entity_of");
        let entity_var = self.alloc_var(VarKind::Entity, fresh_name);
        self.emit_each(table_var, entity_var);
        entity_var
    }

    /// Mirror image of `bridge_from_entity_twin_if_needed`: if `slot` is an
    /// unwritten Entity-kind variable whose Table-kind twin is already
    /// written (bound as an earlier clause's subject), promote it eagerly
    /// via `Each` so this clause's filter joins against that specific
    /// binding instead of treating the slot as fresh and unconstrained.
    /// Without this, a variable that is a subject in one clause and an
    /// object in a later one (the mutual-reference join shape of spec.md
    /// §8 scenario S3) would have its two clauses match independently.
    fn bridge_entity_twin_from_table_if_needed(&mut self, slot: Slot) {
        let Slot::Var(entity_var) = slot else { return };
        if self.written[entity_var as usize] {
            return;
        }
        if self.variables[entity_var as usize].kind != VarKind::Entity {
            return;
        }
        let name = self.variables[entity_var as usize].name.clone();
        let Some(table_var) = self.find_table_twin(&name) else {
            return;
        };
        if !self.written[table_var as usize] {
            return;
        }
        self.emit_each(table_var, entity_var);
    }

    fn find_table_twin(&self, name: &str) -> Option<VarId> {
        self.variables
            .iter()
            .find(|v| v.kind == VarKind::Table && v.name == name)
            .map(|v| v.id)
    }

    fn find_entity_twin(&self, name: &str) -> Option<VarId> {
        self.variables
            .iter()
            .find(|v| v.kind == VarKind::Entity && v.name == name)
            .map(|v| v.id)
    }

    fn emit_each(&mut self, table_var: VarId, entity_var: VarId) {
        let mut op = Op::new(OpKind::Each);
        op.r_in = table_var;
        op.r_out = entity_var;
        self.push(op);
        self.written[entity_var as usize] = true;
        self.entity_view.insert(table_var, entity_var);
    }

    fn emit_select(&mut self, term_idx: usize, subject_var: VarId, pred: Slot, obj: Slot) {
        let pair = Pair::encode(pred, obj, self.store);
        let mut op = Op::new(OpKind::Select);
        op.param = Some(pair);
        op.r_out = subject_var;
        op.column = term_idx as i32;
        self.push(op);
        self.written[subject_var as usize] = true;
        self.mark_var_slots_written(pred);
        self.mark_var_slots_written(obj);
    }

    fn emit_with(&mut self, term_idx: usize, subject_var: VarId, pred: Slot, obj: Slot) {
        let pair = Pair::encode(pred, obj, self.store);
        let mut op = Op::new(OpKind::With);
        op.param = Some(pair);
        op.r_in = subject_var;
        op.column = term_idx as i32;
        self.push(op);
        self.mark_var_slots_written(pred);
        self.mark_var_slots_written(obj);
    }

    fn mark_var_slots_written(&mut self, slot: Slot) {
        if let Slot::Var(id) = slot {
            self.written[id as usize] = true;
        }
    }

    fn emit_select_or_with(
        &mut self,
        term_idx: usize,
        subject_var: VarId,
        subject_written: bool,
        pred: Slot,
        obj: Slot,
    ) {
        if subject_written {
            self.emit_with(term_idx, subject_var, pred, obj);
        } else {
            self.emit_select(term_idx, subject_var, pred, obj);
        }
    }

    /// The 4-op inclusive-set idiom (spec.md §4.3), collapsed into a single
    /// `SubSet`/`SuperSet { inclusive: true }` opcode (see DESIGN.md). Binds
    /// a fresh anonymous variable and returns its id.
    fn emit_inclusive_subset(&mut self, seed: Slot, relation: Entity, kind: WalkKind) -> VarId {
        let name = self.fresh_name("@subset");
        let av = self.alloc_var(VarKind::Entity, name);
        self.emit_walk(seed, relation, kind, true, av);
        self.written[av as usize] = true;
        av
    }

    /// Binds an existing variable directly from a walk, rather than a fresh
    /// anonymous one (used when the walk result *is* the term's subject or
    /// object, per spec.md §4.3's transitive-case table).
    fn emit_walk(&mut self, seed: Slot, relation: Entity, kind: WalkKind, inclusive: bool, out: VarId) {
        let pair = Pair::encode(Slot::Literal(relation), seed, self.store);
        let mut op = Op::new(match kind {
            WalkKind::Sub => OpKind::SubSet { inclusive },
            WalkKind::Super => OpKind::SuperSet { inclusive },
        });
        op.param = Some(pair);
        op.r_out = out;
        self.push(op);
    }

    fn compile_term(&mut self, term_idx: usize) -> CompileResult<()> {
        let pc = self.planned[term_idx].clone();
        let subject_var = self.ensure_subject_table_var(pc.subject);
        self.bridge_from_entity_twin_if_needed(subject_var);
        self.bridge_entity_twin_from_table_if_needed(pc.predicate);
        self.bridge_entity_twin_from_table_if_needed(pc.object);
        let subject_written = self.written[subject_var as usize];

        let (transitive, final_) = self.pred_metadata(pc.predicate);
        let pred_is_var = matches!(pc.predicate, Slot::Var(_));
        let object_written = match pc.object {
            Slot::Var(id) => self.written[id as usize],
            Slot::Literal(_) => true,
            Slot::Absent => true,
        };

        if pred_is_var || (final_ && !transitive) {
            self.emit_select_or_with(term_idx, subject_var, subject_written, pc.predicate, pc.object);
        } else if !final_ {
            let rel = self.literal_pred(pc.predicate);
            let av = self.emit_inclusive_subset(Slot::Literal(rel), ISA, WalkKind::Sub);
            self.emit_select_or_with(term_idx, subject_var, subject_written, Slot::Var(av), pc.object);
        } else if transitive && subject_written && object_written {
            let rel = self.literal_pred(pc.predicate);
            let av = self.emit_inclusive_subset(pc.object, rel, WalkKind::Sub);
            self.emit_with(term_idx, subject_var, Slot::Literal(rel), Slot::Var(av));
        } else if transitive && subject_written && !object_written {
            let rel = self.literal_pred(pc.predicate);
            let subj_entity = self.promote_to_entity(subject_var);
            let obj_var = match pc.object {
                Slot::Var(id) => id,
                _ => {
                    return Err(CompileError::UnconstrainedVariable {
                        name: "object".to_string(),
                    })
                }
            };
            self.emit_walk(Slot::Var(subj_entity), rel, WalkKind::Super, true, obj_var);
            self.written[obj_var as usize] = true;
        } else if transitive && !subject_written && object_written {
            let rel = self.literal_pred(pc.predicate);
            self.emit_walk(pc.object, rel, WalkKind::Sub, true, subject_var);
            self.written[subject_var as usize] = true;
        } else {
            // Both free: Select finds any (subj, obj) pair, then a bare
            // (non-inclusive) SuperSet walks further objects. Spec.md §9's
            // open question: the (x, x) reflexive pair is deliberately
            // omitted here for anonymous subjects — documented limitation,
            // not a bug.
            let rel = self.literal_pred(pc.predicate);
            let obj_var = match pc.object {
                Slot::Var(id) => id,
                _ => {
                    return Err(CompileError::UnconstrainedVariable {
                        name: "object".to_string(),
                    })
                }
            };
            self.emit_select(term_idx, subject_var, Slot::Literal(rel), Slot::Var(obj_var));
            let subj_entity = self.promote_to_entity(subject_var);
            self.emit_walk(Slot::Var(subj_entity), rel, WalkKind::Super, false, obj_var);
        }

        self.written[subject_var as usize] = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum WalkKind {
    Sub,
    Super,
}

/// Compile an [`Expression`] against `store` into a [`Program`] (spec.md
/// §6.2 `compile`). Unlike the terse interface list in §6.2, encoding a
/// `Pair` needs store metadata (§4.1 "mark transitive/final from store
/// metadata"), so `store` is a required parameter here. Uses the default
/// [`crate::config::EngineConfig`] ceiling; see [`compile_with_config`] to
/// override it.
pub fn compile(expr: &Expression, store: &dyn StoreOracle) -> CompileResult<Program> {
    compile_with_config(expr, store, &crate::config::EngineConfig::default())
}

/// Same as [`compile`], but with the variable-count ceiling taken from a
/// host-supplied [`crate::config::EngineConfig`] instead of its default.
pub fn compile_with_config(
    expr: &Expression,
    store: &dyn StoreOracle,
    config: &crate::config::EngineConfig,
) -> CompileResult<Program> {
    let (plan, planned) = VariablePlanner::plan_with_limit(&expr.clauses, config.max_variables)?;

    for pc in &planned {
        if let Slot::Literal(id) = pc.subject {
            if store.table_of(id).is_none() {
                return Err(CompileError::UnknownEntity { id });
            }
        }
    }

    let user_variable_count = plan.variables.len();
    let written = vec![false; user_variable_count];
    let mut c = Compiler {
        ops: Vec::new(),
        variables: plan.variables,
        user_variable_count,
        written,
        planned,
        store,
        literal_table_vars: HashMap::new(),
        entity_view: HashMap::new(),
        anon_counter: 0,
    };

    // (a) Prologue.
    let mut input_op = Op::new(OpKind::Input);
    input_op.on_pass = 1;
    input_op.on_fail = -1;
    c.push(input_op);

    // (b) Body: literal-subject terms first, then sorted subject-variable sweeps.
    let term_order = body_term_order(&c);
    for term_idx in term_order {
        c.compile_term(term_idx)?;
    }

    // (c) Epilogue: Each for any unwritten Entity variable whose Table twin is written.
    let table_vars: Vec<VarId> = c
        .variables
        .iter()
        .filter(|v| v.kind == VarKind::Table)
        .map(|v| v.id)
        .collect();
    for table_id in table_vars {
        if !c.written[table_id as usize] {
            continue;
        }
        let name = c.variables[table_id as usize].name.clone();
        if let Some(entity_id) = c.find_entity_twin(&name) {
            if !c.written[entity_id as usize] {
                c.emit_each(table_id, entity_id);
            }
        }
    }

    // The root, if `Table`-kind, must stream one entity per matching row —
    // otherwise a single `Select` binding collapses every matching entity
    // into one table-wide result. Promote it to its entity form even when no
    // named twin asked for one.
    let root = plan.root;
    let yield_r_in = root
        .map(|r| {
            if c.variables[r as usize].kind == VarKind::Entity {
                return r;
            }
            let name = c.variables[r as usize].name.clone();
            match c.find_entity_twin(&name) {
                Some(e) if c.written[e as usize] => e,
                _ => c.promote_to_entity(r),
            }
        })
        .unwrap_or(NONE);

    let mut yield_op = Op::new(OpKind::Yield);
    yield_op.r_in = yield_r_in;
    c.push(yield_op);

    c.wire_defaults();
    c.ops[0].on_pass = 1;
    c.ops[0].on_fail = -1;

    let term_count = c.planned.len();
    tracing::debug!(ops = c.ops.len(), term_count, user_variable_count, "emitted program");
    Ok(Program {
        ops: c.ops,
        variables: c.variables,
        user_variable_count,
        term_count,
        root,
        entity_view: c.entity_view,
    })
}


/// literal-subject terms first (in source order), then every term grouped
/// by its subject variable in sorted (already-planned) order (spec.md §4.3 (b)).
fn body_term_order(c: &Compiler) -> Vec<usize> {
    let mut order = Vec::with_capacity(c.planned.len());
    for (idx, pc) in c.planned.iter().enumerate() {
        if matches!(pc.subject, Slot::Literal(_)) {
            order.push(idx);
        }
    }
    let table_var_ids: Vec<VarId> = c
        .variables
        .iter()
        .filter(|v| v.kind == VarKind::Table)
        .map(|v| v.id)
        .collect();
    for var_id in table_var_ids {
        for (idx, pc) in c.planned.iter().enumerate() {
            if pc.subject == Slot::Var(var_id) {
                order.push(idx);
            }
        }
    }
    order
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Slot::Var(a), Slot::Var(b)) => a == b,
            (Slot::Literal(a), Slot::Literal(b)) => a == b,
            (Slot::Absent, Slot::Absent) => true,
            _ => false,
        }
    }
}

pub(crate) const ISA_RELATION: Entity = ISA;
pub use WalkKind as SubsetWalkKind;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::ClauseBuilder;
    use std::collections::HashMap as Map;

    #[derive(Default)]
    struct MemStore {
        table_type: Map<crate::store::Table, Vec<crate::id::Id>>,
        table_entities: Map<crate::store::Table, Vec<Entity>>,
        record_of: Map<Entity, (crate::store::Table, usize)>,
        transitive: std::collections::HashSet<Entity>,
        non_final: std::collections::HashSet<Entity>,
    }

    impl StoreOracle for MemStore {
        fn record_of(&self, entity: Entity) -> Option<(crate::store::Table, usize)> {
            self.record_of.get(&entity).copied()
        }
        fn table_set_for(&self, mask: crate::id::Id) -> Vec<crate::store::TableRecord> {
            let mut out = Vec::new();
            for (&table, ty) in &self.table_type {
                if let Some(pos) = ty.iter().position(|&id| {
                    let pair = crate::pair::Pair {
                        pred: crate::pair::PairSlot::Literal(id::lo(mask)),
                        obj: crate::pair::PairSlot::Literal(id::hi(mask)),
                        reg_mask: crate::pair::RegMask::empty(),
                        transitive: false,
                        final_: true,
                    };
                    pair.materialize(&[]).matches(id)
                }) {
                    out.push(crate::store::TableRecord {
                        table,
                        first_matching_column: pos,
                    });
                }
            }
            out
        }
        fn table_type(&self, table: crate::store::Table) -> &[crate::id::Id] {
            self.table_type.get(&table).map(|v| v.as_slice()).unwrap_or(&[])
        }
        fn table_entities(&self, table: crate::store::Table) -> &[Entity] {
            self.table_entities.get(&table).map(|v| v.as_slice()).unwrap_or(&[])
        }
        fn has_role(&self, id: Entity, role: Role) -> bool {
            match role {
                Role::Transitive => self.transitive.contains(&id),
                Role::Final => !self.non_final.contains(&id),
                Role::IsA => false,
            }
        }
    }

    fn jedi_store() -> MemStore {
        let mut s = MemStore::default();
        // Entity 100 = Yoda, table 1 holds the "Jedi" tag: pair(Jedi=1, 0)
        s.table_type.insert(1, vec![id::pair(1, 0)]);
        s.table_entities.insert(1, vec![100]);
        s.record_of.insert(100, (1, 0));
        s
    }

    #[test]
    fn compiles_a_ground_fact_query() {
        let store = jedi_store();
        let clauses = vec![ClauseBuilder::new(1).subject(100u32).build()];
        let expr = Expression::new(clauses);
        let program = compile(&expr, &store).expect("compiles");
        assert!(program.ops.len() >= 2);
        assert!(matches!(program.ops[0].kind, OpKind::Input));
        assert!(matches!(program.ops.last().unwrap().kind, OpKind::Yield));
    }
}

//! Backtracking VM (spec.md §4.4, component E).
//!
//! A stateful, re-entrant iterator over a compiled [`Program`]. Each call to
//! [`QueryIter::next`] resumes exactly where the last one left off and
//! produces at most one new variable assignment.

use std::collections::HashSet;

use smallvec::SmallVec;

use crate::id::{self, Entity};
use crate::pair::{Filter, PairSlot};
use crate::program::{OpKind, Program};
use crate::store::{StoreOracle, Table};
use crate::variable::{VarId, NONE};

/// The value a register currently holds (spec.md §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegValue {
    /// Never written since the iterator started.
    Empty,
    Entity(Entity),
    /// A contiguous slice of one table's rows.
    Table { table: Table, offset: usize, count: usize },
}

impl RegValue {
    fn as_entity_lenient(&self) -> Entity {
        match self {
            RegValue::Entity(e) => *e,
            RegValue::Empty => id::WILDCARD,
            RegValue::Table { .. } => panic!("entity-kind register holds a table value"),
        }
    }

    fn as_table(&self) -> (Table, usize, usize) {
        match self {
            RegValue::Table { table, offset, count } => (*table, *offset, *count),
            other => panic!("table-kind register holds {other:?}, not a table"),
        }
    }
}

/// A register/column snapshot: the full input state an opcode sees on entry
/// (spec.md §3.5's "frame").
#[derive(Debug, Clone)]
struct State {
    registers: Vec<RegValue>,
    columns: Vec<i32>,
}

impl State {
    fn empty(var_count: usize, term_count: usize) -> Self {
        State {
            registers: vec![RegValue::Empty; var_count],
            columns: vec![-1; term_count],
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Cursor {
    computed: bool,
    table_set: Vec<crate::store::TableRecord>,
    ts_idx: usize,
    type_idx: usize,
    /// Fixed table for `With` (membership check only, no table-set walk).
    fixed_table: Option<Table>,
}

#[derive(Debug, Clone)]
struct WalkFrame {
    pending: Vec<Entity>,
}

/// Inline capacity of [`Walk::stack`] before it spills to the heap (spec.md
/// §5's "16 frames" resource note). Mirrored at runtime by
/// [`crate::config::EngineConfig::inline_walk_frames`] purely for a host's
/// visibility into the ceiling — the `SmallVec` array length itself is a
/// compile-time const generic, not adjustable from a runtime config value.
const WALK_STACK_INLINE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default)]
struct Walk {
    started: bool,
    seed_done: bool,
    visited: HashSet<Entity>,
    stack: SmallVec<[WalkFrame; WALK_STACK_INLINE_CAPACITY]>,
}

#[derive(Debug, Clone, Default)]
struct Each {
    started: bool,
    entities: Vec<Entity>,
    idx: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Once {
    done: bool,
}

/// Per-opcode persistent state (spec.md §3.7). Lives for the iterator's
/// whole lifetime, independent of the register-frame copy-forwarding.
#[derive(Debug, Clone)]
enum OpContext {
    None,
    Entered(bool),
    Cursor(Cursor),
    Walk(Walk),
    Each(Each),
    Once(Once),
}

impl OpContext {
    fn for_kind(kind: OpKind) -> Self {
        match kind {
            OpKind::Input => OpContext::Entered(false),
            OpKind::Select | OpKind::With => OpContext::Cursor(Cursor::default()),
            OpKind::SubSet { .. } | OpKind::SuperSet { .. } => OpContext::Walk(Walk::default()),
            OpKind::Each => OpContext::Each(Each::default()),
            OpKind::Store => OpContext::Once(Once::default()),
            OpKind::Yield => OpContext::None,
        }
    }
}

/// A single match: the binding the most recent [`QueryIter::next`] produced.
pub struct Binding<'a> {
    iter: &'a QueryIter<'a>,
}

impl<'a> Binding<'a> {
    /// The current value of `var`, as an entity id, if that variable's
    /// register currently holds one (directly, or via its `Each`-driven
    /// entity view, or as a single-row table).
    pub fn variable(&self, var: VarId) -> Option<Entity> {
        if let Some(&entity_var) = self.iter.program.entity_view.get(&var) {
            return self.variable(entity_var);
        }
        let reg = self.iter.current.registers.get(var as usize)?;
        match reg {
            RegValue::Entity(e) => Some(*e),
            RegValue::Table { table, offset, count } if *count >= 1 => {
                self.iter.store.table_entities(*table).get(*offset).copied()
            }
            _ => None,
        }
    }
}

/// Stateful, re-entrant iterator over a [`Program`] (spec.md §3.6, §6.2
/// `iter`/`next`).
pub struct QueryIter<'a> {
    program: &'a Program,
    store: &'a dyn StoreOracle,
    frames: Vec<State>,
    contexts: Vec<OpContext>,
    current: State,
    op: i32,
    done: bool,
}

impl<'a> QueryIter<'a> {
    pub fn new(program: &'a Program, store: &'a dyn StoreOracle) -> Self {
        Self::new_with_config(program, store, &crate::config::EngineConfig::default())
    }

    /// Same as [`Self::new`], but checks `config.inline_walk_frames` against
    /// [`WALK_STACK_INLINE_CAPACITY`], the walk stack's actual compiled-in
    /// inline capacity (a `debug_assert` only — the capacity is a const
    /// generic on [`SmallVec`], fixed at compile time, not something a
    /// runtime config value can resize).
    pub fn new_with_config(
        program: &'a Program,
        store: &'a dyn StoreOracle,
        config: &crate::config::EngineConfig,
    ) -> Self {
        debug_assert_eq!(
            config.inline_walk_frames, WALK_STACK_INLINE_CAPACITY,
            "EngineConfig::inline_walk_frames must match the SmallVec's compiled-in capacity"
        );
        let var_count = program.variables.len();
        let term_count = program.term_count;
        let op_count = program.ops.len();
        let mut frames = vec![State::empty(var_count, term_count); op_count];
        frames[0] = State::empty(var_count, term_count);
        let contexts = program.ops.iter().map(|o| OpContext::for_kind(o.kind)).collect();
        QueryIter {
            program,
            store,
            frames,
            contexts,
            current: State::empty(var_count, term_count),
            op: 0,
            done: false,
        }
    }

    /// Advance to the next result. Returns `false` once the search space is
    /// exhausted (spec.md §6.2 `next`); the iterator stays exhausted forever
    /// after that (it never restarts).
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        loop {
            if self.op < 0 {
                self.done = true;
                return false;
            }
            let idx = self.op as usize;
            let kind = self.program.ops[idx].kind;

            if matches!(kind, OpKind::Yield) {
                self.current = self.frames[idx].clone();
                tracing::trace!(op = idx, "yield");
                self.op = self.program.ops[idx].on_fail;
                return true;
            }

            self.current = self.frames[idx].clone();
            let passed = self.execute(idx);
            tracing::trace!(op = idx, kind = ?kind, passed, "advance");
            let op = &self.program.ops[idx];
            let next = if passed { op.on_pass } else { op.on_fail };
            if passed {
                if (next as usize) < self.frames.len() {
                    self.frames[next as usize] = self.current.clone();
                }
            }
            self.op = next;
        }
    }

    /// The binding produced by the most recent successful [`next`](Self::next).
    pub fn binding(&self) -> Binding<'_> {
        Binding { iter: self }
    }

    fn entity_regs(&self) -> Vec<Entity> {
        self.current.registers.iter().map(RegValue::as_entity_lenient).collect()
    }

    fn execute(&mut self, idx: usize) -> bool {
        let kind = self.program.ops[idx].kind;
        match kind {
            OpKind::Input => self.exec_input(idx),
            OpKind::Select => self.exec_select_or_with(idx, false),
            OpKind::With => self.exec_select_or_with(idx, true),
            OpKind::SubSet { inclusive } => self.exec_walk(idx, WalkDir::Sub, inclusive),
            OpKind::SuperSet { inclusive } => self.exec_walk(idx, WalkDir::Super, inclusive),
            OpKind::Each => self.exec_each(idx),
            OpKind::Store => self.exec_store(idx),
            OpKind::Yield => unreachable!("Yield is handled in the dispatch loop"),
        }
    }

    fn exec_input(&mut self, idx: usize) -> bool {
        let OpContext::Entered(entered) = &mut self.contexts[idx] else {
            unreachable!()
        };
        if !*entered {
            *entered = true;
            true
        } else {
            false
        }
    }

    fn exec_store(&mut self, idx: usize) -> bool {
        let op = &self.program.ops[idx];
        let OpContext::Once(once) = &mut self.contexts[idx] else {
            unreachable!()
        };
        if once.done {
            return false;
        }
        once.done = true;
        let value = if let Some(lit) = op.subject {
            match self.store.table_of(lit) {
                Some(table) => RegValue::Table {
                    table,
                    offset: 0,
                    count: self.store.table_row_count(table),
                },
                None => RegValue::Entity(lit),
            }
        } else {
            match self.current.registers[op.r_in as usize] {
                // Bridging a Table-kind subject from its already-bound
                // Entity-kind twin (program.rs's `bridge_from_entity_twin_if_needed`):
                // narrow to that entity's own single-row table, same lookup
                // `write_walk_output` uses for a walk result.
                RegValue::Entity(e) => match self.store.record_of(e) {
                    Some((table, row)) => RegValue::Table { table, offset: row, count: 1 },
                    None => RegValue::Entity(e),
                },
                other => other,
            }
        };
        self.current.registers[op.r_out as usize] = value;
        true
    }

    fn exec_each(&mut self, idx: usize) -> bool {
        let op = &self.program.ops[idx];
        let r_in = self.current.registers[op.r_in as usize];
        let OpContext::Each(e) = &mut self.contexts[idx] else {
            unreachable!()
        };
        if !e.started {
            let (table, offset, count) = r_in.as_table();
            e.entities = self.store.table_entities(table)[offset..offset + count].to_vec();
            e.idx = 0;
            e.started = true;
        }
        loop {
            if e.idx >= e.entities.len() {
                return false;
            }
            let entity = e.entities[e.idx];
            e.idx += 1;
            if id::is_wildcard(entity) || id::is_this(entity) {
                continue;
            }
            self.current.registers[op.r_out as usize] = RegValue::Entity(entity);
            return true;
        }
    }

    fn exec_select_or_with(&mut self, idx: usize, with: bool) -> bool {
        let op = self.program.ops[idx].clone_cheap();
        let regs = self.entity_regs();
        let filter = op.param.as_ref().expect("Select/With always carry a Pair").materialize(&regs);

        let OpContext::Cursor(cursor) = &mut self.contexts[idx] else {
            unreachable!()
        };

        if with {
            if !cursor.computed {
                let (table, _, _) = self.current.registers[op.r_in as usize].as_table();
                cursor.fixed_table = Some(table);
                let ty = self.store.table_type(table);
                cursor.type_idx = match find_match(ty, 0, &filter) {
                    Some(p) => p,
                    None => {
                        cursor.computed = true;
                        return false;
                    }
                };
                cursor.computed = true;
            } else {
                let table = cursor.fixed_table.expect("computed implies fixed_table");
                let ty = self.store.table_type(table);
                match find_match(ty, cursor.type_idx + 1, &filter) {
                    Some(p) => cursor.type_idx = p,
                    None => return false,
                }
            }
            let table = cursor.fixed_table.unwrap();
            let ty = self.store.table_type(table);
            let matched = ty[cursor.type_idx];
            if op.column >= 0 {
                self.current.columns[op.column as usize] = cursor.type_idx as i32;
            }
            reify(&mut self.current, &filter, matched);
            true
        } else {
            let fresh_table = !cursor.computed;
            if !cursor.computed {
                cursor.table_set = self.store.table_set_for(filter.mask);
                cursor.ts_idx = 0;
                cursor.computed = true;
            }
            if !advance_select_row(cursor, self.store, &filter, fresh_table) {
                return false;
            }
            let rec = cursor.table_set[cursor.ts_idx];
            let ty = self.store.table_type(rec.table);
            let matched = ty[cursor.type_idx];
            if op.column >= 0 {
                self.current.columns[op.column as usize] = cursor.type_idx as i32;
            }
            reify(&mut self.current, &filter, matched);
            self.current.registers[op.r_out as usize] = RegValue::Table {
                table: rec.table,
                offset: 0,
                count: self.store.table_row_count(rec.table),
            };
            true
        }
    }

    fn exec_walk(&mut self, idx: usize, dir: WalkDir, inclusive: bool) -> bool {
        let op = self.program.ops[idx].clone_cheap();
        let regs = self.entity_regs();
        let pair = op.param.as_ref().expect("SubSet/SuperSet always carry a Pair");
        let rel = match pair.pred {
            PairSlot::Literal(r) => r,
            PairSlot::Variable(v) => regs[v as usize],
        };
        let seed = match pair.obj {
            PairSlot::Literal(s) => s,
            PairSlot::Variable(v) => regs[v as usize],
        };

        let store = self.store;
        let OpContext::Walk(walk) = &mut self.contexts[idx] else {
            unreachable!()
        };

        if inclusive && !walk.seed_done {
            walk.seed_done = true;
            write_walk_output(&mut self.current, op.r_out, seed, store);
            return true;
        }

        loop {
            if !walk.started {
                walk.started = true;
                let batch: Vec<Entity> = direct_related(dir, store, rel, seed)
                    .into_iter()
                    .filter(|e| walk.visited.insert(*e))
                    .collect();
                if !batch.is_empty() {
                    walk.stack.push(WalkFrame { pending: batch });
                }
            }
            let Some(frame) = walk.stack.last_mut() else {
                return false;
            };
            if let Some(e) = frame.pending.pop() {
                let children: Vec<Entity> = direct_related(dir, store, rel, e)
                    .into_iter()
                    .filter(|c| walk.visited.insert(*c))
                    .collect();
                if !children.is_empty() {
                    walk.stack.push(WalkFrame { pending: children });
                }
                write_walk_output(&mut self.current, op.r_out, e, store);
                return true;
            }
            walk.stack.pop();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WalkDir {
    Sub,
    Super,
}

fn direct_related(dir: WalkDir, store: &dyn StoreOracle, rel: Entity, seed: Entity) -> Vec<Entity> {
    match dir {
        WalkDir::Sub => store
            .table_set_for(id::pair(rel, seed))
            .into_iter()
            .flat_map(|rec| store.table_entities(rec.table).iter().copied())
            .collect(),
        WalkDir::Super => match store.table_of(seed) {
            Some(table) => store
                .table_type(table)
                .iter()
                .filter(|&&id| id::lo(id) == rel && !id::is_wildcard(id::hi(id)))
                .map(|&id| id::hi(id))
                .collect(),
            None => Vec::new(),
        },
    }
}

fn write_walk_output(state: &mut State, r_out: VarId, entity: Entity, store: &dyn StoreOracle) {
    let value = match store.record_of(entity) {
        Some((table, row)) => RegValue::Table { table, offset: row, count: 1 },
        None => RegValue::Entity(entity),
    };
    state.registers[r_out as usize] = value;
}

fn find_match(ty: &[id::Id], start: usize, filter: &Filter) -> Option<usize> {
    ty.iter().skip(start).position(|&id| filter.matches(id)).map(|p| p + start)
}

/// Advance a `Select` cursor to the next row across its `table_set` that
/// actually satisfies `filter` — `table_set_for`'s own probe only ever sees
/// the bare predicate/object mask (no `same_var` or register information), so
/// its `first_matching_column` hint is a starting point for the scan, never a
/// verdict on its own. `fresh_table` is `true` on the very first call for a
/// given `table_set` and each time the scan rolls onto a new table; it tells
/// the scan to start from that table's hinted column rather than resuming
/// just past the previously accepted one.
fn advance_select_row(cursor: &mut Cursor, store: &dyn StoreOracle, filter: &Filter, fresh_table: bool) -> bool {
    let mut fresh_table = fresh_table;
    loop {
        let Some(rec) = cursor.table_set.get(cursor.ts_idx).copied() else {
            return false;
        };
        let ty = store.table_type(rec.table);
        let start = if fresh_table { rec.first_matching_column } else { cursor.type_idx + 1 };
        match find_match(ty, start, filter) {
            Some(p) => {
                cursor.type_idx = p;
                return true;
            }
            None => {
                cursor.ts_idx += 1;
                fresh_table = true;
            }
        }
    }
}

fn reify(state: &mut State, filter: &Filter, matched: id::Id) {
    if let Some(v) = filter.lo_var {
        state.registers[v as usize] = RegValue::Entity(id::lo(matched));
    }
    if let Some(v) = filter.hi_var {
        state.registers[v as usize] = RegValue::Entity(id::hi(matched));
    }
}

impl crate::program::Op {
    fn clone_cheap(&self) -> crate::program::Op {
        self.clone()
    }
}

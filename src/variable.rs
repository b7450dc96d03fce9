//! Variable planner (spec.md §4.2, component C).
//!
//! Discovers variables, elects the root, computes dependency depths, detects
//! unconstrained variables, and produces the emission order the compiler
//! walks in §4.3.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult, MAX_VARIABLES};
use crate::term::{Clause, Term};

/// Index into [`Program::variables`](crate::program::Program::variables).
/// A wider-than-`u8` type so the sentinel (`VarId::MAX`) is always distinct
/// from any real index even though the variable *count* is capped at
/// [`MAX_VARIABLES`] (spec.md §9: "the 256-variable and single-byte register
/// id limit is a concrete cap, not an artifact of the source language...
/// implementations may choose a wider index but must keep a sentinel
/// distinct from any valid id").
pub type VarId = u16;

/// Sentinel meaning "no variable" (unused register slot, no root, etc).
pub const NONE: VarId = VarId::MAX;

/// Depth sentinel for "not yet computed" / "unreachable".
const UNSET_DEPTH: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Can match a whole table of entities at once (subject position).
    Table,
    /// Always refers to a single entity (predicate/object position).
    Entity,
    /// Transient kind used only while the planner is still discovering
    /// variables; never present in a finished [`Variable`].
    Unknown,
}

/// One planned variable (spec.md §3.3).
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
    /// Index of this variable in the planner's (pre-sort) table; becomes its
    /// register index once [`VariablePlan::sorted_order`] is applied.
    pub id: VarId,
    /// Number of subject occurrences (only meaningful for `Table` kind).
    pub occurs: u32,
    pub depth: u32,
    /// DFS cycle-guard flag (spec.md §4.2 step 5); left `false` once
    /// planning completes.
    pub marked: bool,
}

impl Variable {
    fn is_unconstrained(&self) -> bool {
        self.depth == UNSET_DEPTH
    }
}

/// Reserved name for the implicit-subject variable.
pub const THIS_NAME: &str = "@this";

/// The result of planning: the final, sorted variable table plus the
/// elected root (if any).
#[derive(Debug, Clone)]
pub struct VariablePlan {
    pub variables: Vec<Variable>,
    pub root: Option<VarId>,
    /// Number of `Table`-kind variables discovered in the initial subject
    /// scan (spec.md §4.2 step 2), before predicate/object variables are
    /// appended to the table.
    pub subject_variable_count: usize,
}

impl VariablePlan {
    pub fn find(&self, name: &str, kind: VarKind) -> Option<VarId> {
        self.variables
            .iter()
            .find(|v| v.name == name && v.kind == kind)
            .map(|v| v.id)
    }
}

#[derive(Default)]
struct Builder {
    vars: Vec<Variable>,
    by_key: HashMap<(VarKind, String), VarId>,
    anon_counter: u32,
}

impl Builder {
    fn get_or_create(&mut self, kind: VarKind, name: &str) -> VarId {
        if let Some(&id) = self.by_key.get(&(kind, name.to_string())) {
            return id;
        }
        let id = self.vars.len() as VarId;
        self.vars.push(Variable {
            name: name.to_string(),
            kind,
            id,
            occurs: 0,
            depth: UNSET_DEPTH,
            marked: false,
        });
        self.by_key.insert((kind, name.to_string()), id);
        id
    }

    fn fresh_anonymous(&mut self, kind: VarKind) -> VarId {
        self.anon_counter += 1;
        let name = format!("@anon{}", self.anon_counter);
        self.get_or_create(kind, &name)
    }
}

/// One resolved clause slot: either a variable id or a literal/absent value.
#[derive(Debug, Clone, Copy)]
pub enum Slot {
    Var(VarId),
    Literal(u32),
    Absent,
}

/// A clause with its subject/predicate/object resolved to [`Slot`]s, the
/// form the compiler (§4.3) and the pair builder (§4.1) both consume.
#[derive(Debug, Clone)]
pub struct PlannedClause {
    pub subject: Slot,
    pub predicate: Slot,
    pub object: Slot,
}

pub struct VariablePlanner;

impl VariablePlanner {
    /// Run the full planning algorithm (spec.md §4.2 steps 1-8) against the
    /// default [`crate::config::EngineConfig`] ceiling.
    pub fn plan(clauses: &[Clause]) -> CompileResult<(VariablePlan, Vec<PlannedClause>)> {
        Self::plan_with_limit(clauses, MAX_VARIABLES)
    }

    /// Same as [`Self::plan`], but with the variable-count ceiling taken
    /// from a host-supplied [`crate::config::EngineConfig::max_variables`]
    /// rather than the hardcoded default.
    pub fn plan_with_limit(clauses: &[Clause], max_variables: usize) -> CompileResult<(VariablePlan, Vec<PlannedClause>)> {
        if let Some(bad) = clauses.iter().find(|c| c.arg_count() > 2) {
            return Err(CompileError::TooManyArguments {
                clause: bad.clone(),
            });
        }

        let mut b = Builder::default();

        // Step 1: scan subjects.
        for clause in clauses {
            match &clause.subject {
                Term::Var(name) => {
                    let id = b.get_or_create(VarKind::Table, name);
                    b.vars[id as usize].occurs += 1;
                }
                Term::This => {
                    let id = b.get_or_create(VarKind::Table, THIS_NAME);
                    b.vars[id as usize].occurs += 1;
                }
                Term::Wildcard => {
                    let id = b.fresh_anonymous(VarKind::Table);
                    b.vars[id as usize].occurs += 1;
                }
                Term::Id(_) => {}
            }
        }

        // Step 2: subject_variable_count.
        let subject_variable_count = b.vars.len();

        // Step 3: ensure predicate/object variables exist as Entity-kind.
        // We resolve each clause's slots to `Slot`s in the same pass so the
        // rest of the pipeline never has to re-walk `Term`s.
        let mut planned = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let subject = match &clause.subject {
                Term::Var(name) => Slot::Var(b.get_or_create(VarKind::Table, name)),
                Term::This => Slot::Var(b.get_or_create(VarKind::Table, THIS_NAME)),
                Term::Wildcard => Slot::Var(b.fresh_anonymous(VarKind::Table)),
                Term::Id(id) => Slot::Literal(*id),
            };
            let predicate = resolve_entity_slot(&mut b, &clause.predicate);
            let object = match &clause.object {
                Some(t) => resolve_entity_slot(&mut b, t),
                None => Slot::Absent,
            };
            planned.push(PlannedClause {
                subject,
                predicate,
                object,
            });
        }

        if b.vars.len() > max_variables {
            return Err(CompileError::TooManyVariables);
        }

        // Step 4: elect root.
        let this_id = b.by_key.get(&(VarKind::Table, THIS_NAME.to_string())).copied();
        let root = this_id.or_else(|| {
            b.vars
                .iter()
                .filter(|v| v.kind == VarKind::Table && v.name != THIS_NAME)
                .max_by_key(|v| v.occurs)
                .map(|v| v.id)
        });

        // Steps 5-6: compute depths via a worklist relaxation (spec.md §9
        // explicitly permits a marked-set or an explicit worklist in place
        // of literal recursive DFS; we use the latter).
        compute_depths(&mut b.vars, &planned, root);

        // Step 7: any subject variable still unreached is an error.
        if let Some(bad) = b
            .vars
            .iter()
            .find(|v| v.kind == VarKind::Table && v.is_unconstrained())
        {
            return Err(CompileError::UnconstrainedVariable {
                name: display_name(&bad.name),
            });
        }
        // Entity-only variables that never got reached (e.g. a predicate
        // variable that is never anyone's subject and whose clause's
        // subject was itself unreachable — impossible given the check
        // above, but an anonymous variable with no occurrence elsewhere)
        // are harmless: they are always bound the moment their own clause
        // executes. Give them a depth past everything else purely so the
        // sort in step 8 is stable.
        let max_depth = b.vars.iter().map(|v| v.depth).filter(|&d| d != UNSET_DEPTH).max().unwrap_or(0);
        for v in b.vars.iter_mut() {
            if v.depth == UNSET_DEPTH {
                v.depth = max_depth + 1;
            }
        }

        // Step 8: sort by (kind, depth asc, occurs desc); remap ids.
        let plan = sort_and_remap(b.vars, root, &mut planned, subject_variable_count);
        tracing::debug!(
            variables = plan.variables.len(),
            root = ?plan.root,
            clauses = clauses.len(),
            "planned variables"
        );
        Ok((plan, planned))
    }
}

fn resolve_entity_slot(b: &mut Builder, term: &Term) -> Slot {
    match term {
        Term::Var(name) => Slot::Var(b.get_or_create(VarKind::Entity, name)),
        Term::Wildcard => Slot::Var(b.fresh_anonymous(VarKind::Entity)),
        Term::Id(id) => Slot::Literal(*id),
        Term::This => Slot::Absent, // not a legal entity-slot term; caller's problem
    }
}

fn display_name(name: &str) -> String {
    if name == THIS_NAME {
        "This".to_string()
    } else {
        name.to_string()
    }
}

/// Weight-1 edges (subject -> co-occurring entity var) plus weight-0 twin
/// edges (Table <-> Entity variable sharing a name), relaxed to a fixpoint.
fn compute_depths(vars: &mut [Variable], clauses: &[PlannedClause], root: Option<VarId>) {
    if let Some(root) = root {
        vars[root as usize].depth = 0;
    }

    // Multi-source seeding: any subject variable with an all-literal
    // predicate/object term is depth-0 regardless of root reachability
    // (spec.md §4.2 step 5: "terms referencing only literals give depth 0").
    for clause in clauses {
        if let Slot::Var(subj) = clause.subject {
            let literal_only = matches!(clause.predicate, Slot::Literal(_))
                && matches!(clause.object, Slot::Literal(_) | Slot::Absent);
            if literal_only && vars[subj as usize].depth > 0 {
                vars[subj as usize].depth = 0;
            }
        }
    }

    let twin_of = |v: &[Variable], id: VarId| -> Option<VarId> {
        let (name, kind) = (v[id as usize].name.clone(), v[id as usize].kind);
        let other_kind = match kind {
            VarKind::Table => VarKind::Entity,
            VarKind::Entity => VarKind::Table,
            VarKind::Unknown => return None,
        };
        v.iter()
            .find(|o| o.kind == other_kind && o.name == name)
            .map(|o| o.id)
    };

    let mut changed = true;
    let mut guard = 0usize;
    while changed && guard <= vars.len() + 1 {
        changed = false;
        guard += 1;

        // Crawl: subject (known depth) -> co-occurring entity vars (+1).
        for clause in clauses {
            if let Slot::Var(subj) = clause.subject {
                let d = vars[subj as usize].depth;
                if d == UNSET_DEPTH {
                    continue;
                }
                for slot in [clause.predicate, clause.object] {
                    if let Slot::Var(v) = slot {
                        if vars[v as usize].depth > d + 1 {
                            vars[v as usize].depth = d + 1;
                            changed = true;
                        }
                    }
                }
            }
        }

        // Twin propagation (weight 0): Table/Entity sharing a name are the
        // same logical variable at different granularity.
        let ids: Vec<VarId> = vars.iter().map(|v| v.id).collect();
        for id in ids {
            if let Some(twin) = twin_of(vars, id) {
                let d = vars[id as usize].depth.min(vars[twin as usize].depth);
                if vars[id as usize].depth > d {
                    vars[id as usize].depth = d;
                    changed = true;
                }
                if vars[twin as usize].depth > d {
                    vars[twin as usize].depth = d;
                    changed = true;
                }
            }
        }
    }
}

fn sort_and_remap(
    mut vars: Vec<Variable>,
    root: Option<VarId>,
    planned: &mut [PlannedClause],
    _subject_variable_count: usize,
) -> VariablePlan {
    let root_name = root.map(|r| (vars[r as usize].kind, vars[r as usize].name.clone()));

    let mut order: Vec<VarId> = (0..vars.len() as VarId).collect();
    order.sort_by(|&a, &b| {
        let va = &vars[a as usize];
        let vb = &vars[b as usize];
        kind_rank(va.kind)
            .cmp(&kind_rank(vb.kind))
            .then(va.depth.cmp(&vb.depth))
            .then(vb.occurs.cmp(&va.occurs))
            .then(a.cmp(&b))
    });

    let mut remap = vec![0 as VarId; vars.len()];
    for (new_id, &old_id) in order.iter().enumerate() {
        remap[old_id as usize] = new_id as VarId;
    }

    // Rewrite every id-referring field (spec.md §4.2 step 8).
    let mut new_vars = vec![
        Variable {
            name: String::new(),
            kind: VarKind::Unknown,
            id: 0,
            occurs: 0,
            depth: 0,
            marked: false,
        };
        vars.len()
    ];
    for (old_id, v) in vars.drain(..).enumerate() {
        let new_id = remap[old_id];
        new_vars[new_id as usize] = Variable { id: new_id, ..v };
    }

    for clause in planned.iter_mut() {
        for slot in [
            &mut clause.subject,
            &mut clause.predicate,
            &mut clause.object,
        ] {
            if let Slot::Var(id) = slot {
                *id = remap[*id as usize];
            }
        }
    }

    let new_root = root_name.map(|(kind, name)| {
        new_vars
            .iter()
            .find(|v| v.kind == kind && v.name == name)
            .expect("root variable survives remap")
            .id
    });

    VariablePlan {
        variables: new_vars,
        root: new_root,
        subject_variable_count: _subject_variable_count,
    }
}

fn kind_rank(kind: VarKind) -> u8 {
    match kind {
        VarKind::Table => 0,
        VarKind::Entity => 1,
        VarKind::Unknown => 2,
    }
}

//! Pair & Filter builder (spec.md §4.1, component B).
//!
//! A [`Pair`] is the compile-time encoding of a term's `(predicate, object)`
//! portion; a [`Filter`] is its run-time, register-substituted form used by
//! the VM's `Select`/`With`/`SubSet`/`SuperSet` handlers.

use bitflags::bitflags;

use crate::id::{self, Entity, Id, WILDCARD};
use crate::store::{Role, StoreOracle};
use crate::variable::{Slot, VarId};

bitflags! {
    /// Which slots of a [`Pair`] are variables rather than literals.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegMask: u8 {
        const PRED = 0b01;
        const OBJ  = 0b10;
    }
}

/// One slot of a [`Pair`]: a literal id fixed at compile time, or a variable
/// resolved from a register at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSlot {
    Literal(Entity),
    Variable(VarId),
}

impl PairSlot {
    fn from_slot(slot: Slot) -> Self {
        match slot {
            Slot::Literal(id) => PairSlot::Literal(id),
            Slot::Var(id) => PairSlot::Variable(id),
            // An absent object slot (1-arg term) behaves as an unconstrained
            // don't-care, identical to an explicit wildcard.
            Slot::Absent => PairSlot::Literal(WILDCARD),
        }
    }
}

/// Compile-time encoding of a term's `(pred, obj)` portion (spec.md §3.2).
/// Immutable after compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub pred: PairSlot,
    pub obj: PairSlot,
    pub reg_mask: RegMask,
    pub transitive: bool,
    pub final_: bool,
}

impl Pair {
    /// Encode a planned clause's predicate/object slots into a `Pair`,
    /// tagging transitivity/finality from store metadata on the predicate
    /// (spec.md §4.1). A predicate that is itself a variable (its identity
    /// is not known until run time) is conservatively treated as final and
    /// non-transitive — there is no subtype tree to consult at compile time.
    pub fn encode(predicate: Slot, object: Slot, store: &dyn StoreOracle) -> Pair {
        let pred = PairSlot::from_slot(predicate);
        let obj = PairSlot::from_slot(object);

        let mut reg_mask = RegMask::empty();
        if matches!(pred, PairSlot::Variable(_)) {
            reg_mask |= RegMask::PRED;
        }
        if matches!(obj, PairSlot::Variable(_)) {
            reg_mask |= RegMask::OBJ;
        }

        let (transitive, final_) = match pred {
            PairSlot::Literal(id) if !id::is_wildcard(id) => (
                store.has_role(id, Role::Transitive),
                store.has_role(id, Role::Final),
            ),
            _ => (false, true),
        };

        Pair {
            pred,
            obj,
            reg_mask,
            transitive,
            final_,
        }
    }

    /// Substitute variable slots from `registers`, producing the run-time
    /// filter (spec.md §4.1 `materialize`).
    pub fn materialize(&self, registers: &[Entity]) -> Filter {
        let (pred_val, pred_var) = self.resolve(self.pred, registers);
        let (obj_val, obj_var) = self.resolve(self.obj, registers);

        let lo_var = if id::is_wildcard(pred_val) { pred_var } else { None };
        let hi_var = if id::is_wildcard(obj_val) { obj_var } else { None };

        let same_var = matches!((lo_var, hi_var), (Some(a), Some(b)) if a == b);

        let (pred_mask, pred_match) = half_mask(pred_val);
        let (obj_mask, obj_match) = half_mask(obj_val);

        Filter {
            mask: id::pair(pred_val, obj_val),
            expr_mask: id::pair(pred_mask, obj_mask),
            expr_match: id::pair(pred_match, obj_match),
            lo_var,
            hi_var,
            same_var,
            transitive: self.transitive,
            final_: self.final_,
        }
    }

    fn resolve(&self, slot: PairSlot, registers: &[Entity]) -> (Entity, Option<VarId>) {
        match slot {
            PairSlot::Literal(v) => (v, None),
            PairSlot::Variable(id) => (registers[id as usize], Some(id)),
        }
    }
}

/// Full 32-bit exact match for a concrete half, or a pure don't-care for a
/// wildcard half (spec.md §4.1: "Role bits are preserved; wildcard halves
/// become don't-cares").
fn half_mask(value: Entity) -> (Entity, Entity) {
    if id::is_wildcard(value) {
        (0, 0)
    } else {
        (u32::MAX, value)
    }
}

/// Run-time, register-substituted form of a [`Pair`] (spec.md §3.2, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    /// `pair(pred, obj)` after substitution; unresolved slots remain wildcard.
    pub mask: Id,
    /// AND-mask: `(id & expr_mask) == expr_match` iff `id` matches.
    pub expr_mask: Id,
    pub expr_match: Id,
    /// Variable to reify from the predicate slot once a match is found.
    pub lo_var: Option<VarId>,
    /// Variable to reify from the object slot once a match is found.
    pub hi_var: Option<VarId>,
    /// Both slots are the same still-unbound variable (spec.md §8 property 7).
    pub same_var: bool,
    pub transitive: bool,
    pub final_: bool,
}

impl Filter {
    /// Does `candidate` satisfy this filter's mask?
    pub fn matches(&self, candidate: Id) -> bool {
        if (candidate & self.expr_mask) != self.expr_match {
            return false;
        }
        if self.same_var && id::lo(candidate) != id::hi(candidate) {
            return false;
        }
        true
    }
}

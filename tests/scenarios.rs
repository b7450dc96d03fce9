//! End-to-end scenario tests (spec.md §8) plus a few of its cross-cutting
//! testable properties. Each scenario builds its own small [`FakeStore`],
//! compiles an [`Expression`], and drains a [`QueryIter`] to a sorted `Vec`
//! so assertions are independent of enumeration order (spec.md §5 only
//! promises determinism for a fixed store, not a specific order).

mod support;

use support::fake_store::FakeStore;

use queryvm::term::{ClauseBuilder, Expression, Term};
use queryvm::{compile, iter, variable, Entity};

const JEDI: Entity = 1;
const SITH: Entity = 2;
const YODA: Entity = 100;

#[test]
fn s1_ground_fact_query_succeeds_once_and_fails_for_the_wrong_predicate() {
    let mut store = FakeStore::new();
    store.entity(YODA, &[(JEDI, 0)]);

    let jedi_query = Expression::new(vec![ClauseBuilder::new(JEDI).subject(YODA).build()]);
    let program = compile(&jedi_query, &store).expect("compiles");
    let mut it = iter(&program, &store);
    assert!(it.next());
    assert!(!it.next());

    let sith_query = Expression::new(vec![ClauseBuilder::new(SITH).subject(YODA).build()]);
    let program = compile(&sith_query, &store).expect("compiles");
    let mut it = iter(&program, &store);
    assert!(!it.next());
}

const HOME_PLANET: Entity = 10;
const TATOOINE: Entity = 200;
const DAGOBAH: Entity = 201;
const LUKE: Entity = 101;
const REY: Entity = 102;
const BB8: Entity = 103;

#[test]
fn s2_implicit_subject_streams_every_matching_member() {
    let mut store = FakeStore::new();
    store.entity(LUKE, &[(HOME_PLANET, TATOOINE)]);
    store.entity(REY, &[(HOME_PLANET, TATOOINE)]);
    store.entity(BB8, &[(HOME_PLANET, TATOOINE)]);
    store.entity(YODA, &[(HOME_PLANET, DAGOBAH)]);

    let query = Expression::new(vec![ClauseBuilder::new(HOME_PLANET).object(TATOOINE).build()]);
    let program = compile(&query, &store).expect("compiles");
    let root = program.root.expect("This elects a root");

    let mut it = iter(&program, &store);
    let mut seen = Vec::new();
    while it.next() {
        seen.push(variable(&it, root).expect("root is entity-promoted"));
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![BB8, LUKE, REY]);
}

const LIKES: Entity = 11;
const LEIA: Entity = 104;
const HAN: Entity = 105;
const BEN: Entity = 106;
const FIN: Entity = 107;

#[test]
fn s3_mutual_reference_join_finds_only_reciprocal_pairs() {
    let mut store = FakeStore::new();
    store.entity(LEIA, &[(LIKES, HAN)]);
    store.entity(HAN, &[(LIKES, LEIA)]);
    store.entity(REY, &[(LIKES, BEN)]);
    store.entity(FIN, &[(LIKES, REY)]);
    // Ben never likes anyone back, but still needs a storage location.
    store.entity(BEN, &[]);

    // Likes(., X), Likes(X, .) — "." in clause 2's object position refers
    // back to the same entity queried at the top (the "@this" twin of the
    // implicit subject), not a fresh wildcard.
    let query = Expression::new(vec![
        ClauseBuilder::new(LIKES).object(Term::var("X")).build(),
        ClauseBuilder::new(LIKES)
            .subject(Term::var("X"))
            .object(Term::var(queryvm::variable::THIS_NAME))
            .build(),
    ]);
    let program = compile(&query, &store).expect("compiles");
    let x = program.find_variable("X").expect("X is user-visible");
    let this = program.find_variable(queryvm::variable::THIS_NAME).expect("@this is always bound");

    let mut it = iter(&program, &store);
    let mut pairs = Vec::new();
    while it.next() {
        let binding = it.binding();
        pairs.push((binding.variable(x).unwrap(), binding.variable(this).unwrap()));
    }
    pairs.sort_unstable();

    let mut expected = vec![(HAN, LEIA), (LEIA, HAN)];
    expected.sort_unstable();
    assert_eq!(pairs, expected);
}

const ISA: Entity = 20;
const XWING: Entity = 300;
const SPACESHIP: Entity = 301;
const TRANSPORT: Entity = 302;
const VEHICLE: Entity = 303;
const MACHINE: Entity = 304;
const THING: Entity = 305;

fn vehicle_chain_store() -> FakeStore {
    let mut store = FakeStore::new();
    store.entity(XWING, &[(ISA, SPACESHIP)]);
    store.entity(SPACESHIP, &[(ISA, TRANSPORT)]);
    store.entity(TRANSPORT, &[(ISA, VEHICLE)]);
    store.entity(VEHICLE, &[(ISA, MACHINE)]);
    store.entity(MACHINE, &[(ISA, THING)]);
    store.entity(THING, &[]);
    store.mark_transitive(ISA);
    store
}

#[test]
fn s4_transitive_chain_reaches_a_distant_ancestor() {
    let store = vehicle_chain_store();
    let query = Expression::new(vec![ClauseBuilder::new(ISA).subject(XWING).object(THING).build()]);
    let program = compile(&query, &store).expect("compiles");
    let mut it = iter(&program, &store);
    assert!(it.next());
}

#[test]
fn transitive_query_includes_the_subject_itself_reflexively() {
    // Property 6: P(A, .) always yields A itself among the objects.
    let store = vehicle_chain_store();
    let query = Expression::new(vec![
        ClauseBuilder::new(ISA).subject(SPACESHIP).object(Term::Wildcard).build(),
    ]);
    let program = compile(&query, &store).expect("compiles");
    let obj = program.find_variable("@anon1").expect("the wildcard object is the first anonymous variable");

    let mut it = iter(&program, &store);
    let mut seen = Vec::new();
    while it.next() {
        seen.push(variable(&it, obj).unwrap());
    }
    assert!(seen.contains(&SPACESHIP), "reflexive case missing from {seen:?}");
}

const CHARACTER: Entity = 400;
const CREATURE: Entity = 401;
const WOOKIE: Entity = 402;
const DROID: Entity = 403;
const HUMAN: Entity = 404;
const CYBORG: Entity = 405;

#[test]
fn s5_subset_query_yields_the_subject_plus_its_whole_subtree() {
    let mut store = FakeStore::new();
    store.entity(CHARACTER, &[]);
    store.entity(CREATURE, &[(ISA, CHARACTER)]);
    store.entity(DROID, &[(ISA, CHARACTER)]);
    store.entity(WOOKIE, &[(ISA, CREATURE)]);
    store.entity(HUMAN, &[(ISA, CREATURE)]);
    store.entity(CYBORG, &[(ISA, HUMAN)]);
    store.mark_transitive(ISA);

    let query = Expression::new(vec![ClauseBuilder::new(ISA).object(CHARACTER).build()]);
    let program = compile(&query, &store).expect("compiles");
    let root = program.root.expect("This elects a root");

    let mut it = iter(&program, &store);
    let mut seen = Vec::new();
    while it.next() {
        seen.push(variable(&it, root).expect("root is entity-promoted"));
    }
    seen.sort_unstable();
    let mut expected = vec![CHARACTER, CREATURE, WOOKIE, DROID, HUMAN, CYBORG];
    expected.sort_unstable();
    assert_eq!(seen, expected);
}

const BAR: Entity = 30;
const FOO: Entity = 31;
const E1: Entity = 500;
const E2: Entity = 501;

#[test]
fn s6_same_variable_in_predicate_and_object_requires_equal_halves() {
    let mut store = FakeStore::new();
    store.entity(E1, &[(BAR, FOO)]);
    store.entity(E2, &[(FOO, FOO)]);

    let query = Expression::new(vec![ClauseBuilder::new(Term::var("X")).object(Term::var("X")).build()]);
    let program = compile(&query, &store).expect("compiles");
    let root = program.root.expect("This elects a root");

    let mut it = iter(&program, &store);
    let mut seen = Vec::new();
    while it.next() {
        seen.push(variable(&it, root).expect("root is entity-promoted"));
    }
    assert_eq!(seen, vec![E2]);
}

#[test]
fn determinism_two_iterators_over_the_same_program_agree() {
    let mut store = FakeStore::new();
    store.entity(LUKE, &[(HOME_PLANET, TATOOINE)]);
    store.entity(REY, &[(HOME_PLANET, TATOOINE)]);
    store.entity(BB8, &[(HOME_PLANET, TATOOINE)]);

    let query = Expression::new(vec![ClauseBuilder::new(HOME_PLANET).object(TATOOINE).build()]);
    let program = compile(&query, &store).expect("compiles");
    let root = program.root.expect("This elects a root");

    let drain = |store: &FakeStore| {
        let mut it = iter(&program, store);
        let mut seen = Vec::new();
        while it.next() {
            seen.push(variable(&it, root).unwrap());
        }
        seen
    };
    assert_eq!(drain(&store), drain(&store));
}

#[test]
fn termination_next_eventually_returns_false() {
    let store = vehicle_chain_store();
    let query = Expression::new(vec![ClauseBuilder::new(ISA).subject(XWING).object(Term::Wildcard).build()]);
    let program = compile(&query, &store).expect("compiles");
    let mut it = iter(&program, &store);

    let mut calls = 0;
    while it.next() {
        calls += 1;
        assert!(calls < 1_000, "query did not terminate within a generous bound");
    }
}

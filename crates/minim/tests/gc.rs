//! Observable memory reclamation: prompt reference-count sweeps between
//! top-level expressions, cycle collection, and the `#inf#` repr marker.

use minim::{Interp, Limits, NoPrint};
use pretty_assertions::assert_eq;

fn run(interp: &mut Interp, src: &str) {
    if let Some(v) = interp.run_source(src, &mut NoPrint).unwrap() {
        interp.drop_value(v);
    }
}

fn pair_count(interp: &Interp) -> usize {
    interp
        .heap_stats()
        .objects_by_type
        .get("Pair")
        .copied()
        .unwrap_or(0)
}

#[test]
fn fresh_interpreter_holds_only_the_top_frame() {
    let interp = Interp::new();
    let stats = interp.heap_stats();
    assert_eq!(stats.live_objects, 1);
    assert_eq!(stats.objects_by_type.get("Env"), Some(&1));
}

#[test]
fn garbage_is_reclaimed_before_the_next_expression() {
    let mut interp = Interp::new();
    // The intermediate list dies inside the expression; the sweep at the
    // end of the top level frees it.
    run(&mut interp, "(begin (reverse (list 1 2 3)) 0)");
    assert_eq!(pair_count(&interp), 0);
    assert_eq!(interp.heap_stats().objects_by_type.get("Env"), Some(&1));
}

#[test]
fn rebinding_frees_the_old_value() {
    let mut interp = Interp::new();
    run(&mut interp, "(define l (list 1 2 3))");
    assert_eq!(pair_count(&interp), 3);
    run(&mut interp, "(define l #f)");
    assert_eq!(pair_count(&interp), 0);
}

#[test]
fn self_referential_pair_prints_finitely_and_is_collected() {
    let mut interp = Interp::new();
    run(&mut interp, "(define x (cons 1 2)) (set-car! x x)");
    let v = interp
        .run_source("x", &mut NoPrint)
        .unwrap()
        .expect("x is bound");
    assert_eq!(interp.repr(&v).unwrap(), "(#inf# . 2)");
    interp.drop_value(v);

    // Unroot the cycle; plain reference counting cannot reclaim it.
    run(&mut interp, "(define x 0)");
    interp.collect().unwrap();
    assert_eq!(pair_count(&interp), 1, "the cycle survives the sweep");

    interp.collect_full().unwrap();
    assert_eq!(pair_count(&interp), 0, "the cycle pass reclaims it");
}

#[test]
fn cycle_threshold_triggers_collection_automatically() {
    let mut interp = Interp::with_limits(Limits::default().with_cycle_threshold(1));
    run(
        &mut interp,
        "(define x (list 1 2)) (set-cdr! (cdr x) x) (define x 0)",
    );
    // The collect at the end of the top level crossed the threshold and ran
    // the cycle pass on its own.
    assert_eq!(pair_count(&interp), 0);
}

#[test]
fn mutually_referential_pairs_are_collected_together() {
    let mut interp = Interp::new();
    run(
        &mut interp,
        "(define a (cons 1 '()))
         (define b (cons 2 '()))
         (set-cdr! a b)
         (set-cdr! b a)",
    );
    assert_eq!(pair_count(&interp), 2);
    run(&mut interp, "(define a 0) (define b 0)");
    interp.collect_full().unwrap();
    assert_eq!(pair_count(&interp), 0);
}

#[test]
fn rooted_cycles_survive_collection() {
    let mut interp = Interp::new();
    run(&mut interp, "(define x (cons 1 2)) (set-car! x x)");
    interp.collect_full().unwrap();
    assert_eq!(pair_count(&interp), 1, "x is still bound");
    let v = interp.run_source("(cdr x)", &mut NoPrint).unwrap().unwrap();
    assert_eq!(interp.repr(&v).unwrap(), "2");
    interp.drop_value(v);
}

#[test]
fn cyclic_vectors_are_collected() {
    let mut interp = Interp::new();
    run(
        &mut interp,
        "(define v (make-vector 2 0)) (vector-set! v 0 v)",
    );
    assert_eq!(interp.heap_stats().objects_by_type.get("Vector"), Some(&1));
    run(&mut interp, "(define v 0)");
    interp.collect_full().unwrap();
    assert_eq!(interp.heap_stats().objects_by_type.get("Vector"), None);
}

#[test]
fn cyclic_vector_repr_terminates() {
    let mut interp = Interp::new();
    run(
        &mut interp,
        "(define v (make-vector 2 7)) (vector-set! v 1 v)",
    );
    let v = interp.run_source("v", &mut NoPrint).unwrap().unwrap();
    assert_eq!(interp.repr(&v).unwrap(), "#(7 #inf#)");
    interp.drop_value(v);
}

#[test]
fn closures_keep_their_environment_alive() {
    let mut interp = Interp::new();
    run(
        &mut interp,
        "(define f (let ((hidden (list 1 2 3))) (lambda () hidden)))",
    );
    interp.collect_full().unwrap();
    // The captured frame and its three-pair list survive while f is bound,
    // along with the one retained body node of the closure.
    assert_eq!(pair_count(&interp), 4);
    let v = interp.run_source("(length (f))", &mut NoPrint).unwrap().unwrap();
    assert_eq!(interp.repr(&v).unwrap(), "3");
    interp.drop_value(v);

    run(&mut interp, "(define f 0)");
    interp.collect_full().unwrap();
    assert_eq!(pair_count(&interp), 0, "dropping f frees the capture");
}

#[test]
fn shared_structure_is_not_double_collected() {
    let mut interp = Interp::new();
    run(
        &mut interp,
        "(define shared (list 1 2))
         (define a (cons shared shared))
         (define a 0)",
    );
    // The shared list is still reachable through its own binding.
    assert_eq!(pair_count(&interp), 2);
    let v = interp.run_source("shared", &mut NoPrint).unwrap().unwrap();
    assert_eq!(interp.repr(&v).unwrap(), "(1 2)");
    interp.drop_value(v);
}

//! Special forms: evaluation order, short-circuiting, binding forms, and
//! the delayed-evaluation pair `delay`/`force`.

use minim::{CollectStringPrint, ErrorKind, Interp, NoPrint};
use pretty_assertions::assert_eq;

fn eval_repr(interp: &mut Interp, src: &str) -> String {
    let v = interp
        .run_source(src, &mut NoPrint)
        .unwrap()
        .expect("expected a value");
    let text = interp.repr(&v).unwrap();
    interp.drop_value(v);
    text
}

fn eval_one(src: &str) -> String {
    let mut interp = Interp::new();
    eval_repr(&mut interp, src)
}

fn eval_err(src: &str) -> ErrorKind {
    let mut interp = Interp::new();
    interp.run_source(src, &mut NoPrint).unwrap_err().kind
}

#[test]
fn if_selects_a_branch_and_skips_the_other() {
    assert_eq!(eval_one("(if #t 1 2)"), "1");
    assert_eq!(eval_one("(if #f 1 2)"), "2");
    // Everything but #f is true.
    assert_eq!(eval_one("(if 0 'zero 'other)"), "zero");
    assert_eq!(eval_one("(if '() 'empty 'other)"), "empty");
    assert_eq!(eval_one("(if #f 'only-branch)"), "#<Unspecified>");
    // The unchosen branch must not run.
    assert_eq!(
        eval_one("(define x 0) (if #t 'ok (set! x 1)) x"),
        "0"
    );
}

#[test]
fn if_works_in_argument_position() {
    assert_eq!(eval_one("(+ (if #t 1 2) 10)"), "11");
    assert_eq!(eval_one("(* (if #f 1 2) (if #t 3 4))"), "6");
}

#[test]
fn lambda_and_application() {
    assert_eq!(eval_one("((lambda (x y) (* x x)) 5 99)"), "25");
    assert_eq!(eval_one("((lambda () 42))"), "42");
    assert_eq!(eval_one("((lambda args args) 1 2 3)"), "(1 2 3)");
    assert_eq!(eval_one("((lambda (a . rest) rest) 1 2 3)"), "(2 3)");
    assert_eq!(eval_one("((lambda (a . rest) a) 1)"), "1");
    // Body expressions run in order; the last one is the result.
    assert_eq!(
        eval_one("(define x 0) ((lambda () (set! x 7) (+ x 1)))"),
        "8"
    );
}

#[test]
fn closures_capture_their_environment() {
    assert_eq!(
        eval_one(
            "(define (adder n) (lambda (x) (+ x n)))
             (define add3 (adder 3))
             (add3 4)"
        ),
        "7"
    );
    assert_eq!(
        eval_one(
            "(define (counter)
               (define n 0)
               (lambda () (set! n (+ n 1)) n))
             (define c (counter))
             (c) (c) (c)"
        ),
        "3"
    );
}

#[test]
fn define_sugar_and_recursion() {
    assert_eq!(
        eval_one(
            "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))
             (fact 10)"
        ),
        "3628800"
    );
    assert_eq!(
        eval_one("(define (rest-of . xs) xs) (rest-of 1 2)"),
        "(1 2)"
    );
}

#[test]
fn set_rebinds_the_nearest_binding() {
    assert_eq!(eval_one("(define x 1) (set! x 2) x"), "2");
    assert_eq!(
        eval_one(
            "(define x 1)
             (define (bump) (set! x (+ x 1)))
             (bump) (bump) x"
        ),
        "3"
    );
    assert_eq!(eval_err("(set! nowhere 1)"), ErrorKind::UnboundVariable);
}

#[test]
fn quote_returns_the_datum_verbatim() {
    assert_eq!(eval_one("'a"), "a");
    assert_eq!(eval_one("(quote (1 2 3))"), "(1 2 3)");
    assert_eq!(eval_one("'(1 (2 . 3))"), "(1 (2 . 3))");
    assert_eq!(eval_one("''x"), "(quote x)");
}

#[test]
fn and_or_short_circuit() {
    assert_eq!(eval_one("(and)"), "#t");
    assert_eq!(eval_one("(or)"), "#f");
    assert_eq!(eval_one("(and 1 2 3)"), "3");
    assert_eq!(eval_one("(and 1 #f 3)"), "#f");
    assert_eq!(eval_one("(or #f 2 3)"), "2");
    assert_eq!(eval_one("(or #f #f)"), "#f");
    // A conclusive value stops evaluation of the remaining operands.
    assert_eq!(eval_one("(define x 0) (and #f (set! x 1)) x"), "0");
    assert_eq!(eval_one("(define x 0) (or 'hit (set! x 1)) x"), "0");
}

#[test]
fn cond_walks_clauses_in_order() {
    assert_eq!(eval_one("(cond (#f 1) ((= 1 1) 2) (else 3))"), "2");
    assert_eq!(eval_one("(cond (#f 1) (else 3))"), "3");
    assert_eq!(eval_one("(cond (42))"), "42");
    assert_eq!(eval_one("(cond (#f 1))"), "#<Unspecified>");
    assert_eq!(eval_one("(cond (#t 1 2 3))"), "3");
    // Later tests must not run once a clause matches.
    assert_eq!(
        eval_one("(define x 0) (cond (#t 'hit) ((set! x 1) 'no)) x"),
        "0"
    );
}

#[test]
fn begin_sequences_left_to_right() {
    assert_eq!(eval_one("(begin 1 2 3)"), "3");
    assert_eq!(eval_one("(begin)"), "#<Unspecified>");
    assert_eq!(eval_one("(define x 0) (begin (set! x 5) (+ x 1))"), "6");
}

#[test]
fn let_family() {
    assert_eq!(eval_one("(let ((x 2) (y 3)) (+ x y))"), "5");
    assert_eq!(eval_one("(let () 42)"), "42");
    // Plain let evaluates the init expressions in the outer environment.
    assert_eq!(eval_one("(let ((x 2)) (let ((x 7) (y x)) y))"), "2");
    // let* sees earlier bindings.
    assert_eq!(eval_one("(let* ((x 2) (y (* x 10))) y)"), "20");
    // letrec supports mutual recursion.
    assert_eq!(
        eval_one(
            "(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1)))))
                      (odd?  (lambda (n) (if (= n 0) #f (even? (- n 1))))))
               (even? 10))"
        ),
        "#t"
    );
    // The body can have several expressions.
    assert_eq!(eval_one("(define x 0) (let ((y 1)) (set! x y) (+ x 1))"), "2");
}

#[test]
fn eval_reenters_in_the_current_environment() {
    assert_eq!(eval_one("(eval '(+ 1 2))"), "3");
    assert_eq!(eval_one("(eval 5)"), "5");
    assert_eq!(eval_one("(define y 10) (eval 'y)"), "10");
    assert_eq!(
        eval_one("(define e (list '+ 1 2)) (eval e)"),
        "3"
    );
    assert_eq!(
        eval_one("(define (f) (define local 1) (eval '(+ local 1))) (f)"),
        "2"
    );
}

#[test]
fn delay_and_force_memoise() {
    assert_eq!(eval_one("(force (delay (+ 1 2)))"), "3");
    // The entry point runs once; the result is memoised.
    assert_eq!(
        eval_one(
            "(define n 0)
             (define p (delay (begin (set! n (+ n 1)) n)))
             (force p) (force p) (force p)"
        ),
        "1"
    );
    // Forcing a non-promise yields the value itself.
    assert_eq!(eval_one("(force 42)"), "42");
    assert_eq!(eval_one("(define p (delay 1)) p"), "#<Promise>");
}

#[test]
fn display_and_newline_write_through_the_print_writer() {
    let mut interp = Interp::new();
    let mut out = CollectStringPrint::new();
    let v = interp
        .run_source(
            "(display \"sum: \") (display (+ 1 2)) (newline) (display '(a \"b\"))",
            &mut out,
        )
        .unwrap()
        .unwrap();
    interp.drop_value(v);
    assert_eq!(out.take_output(), "sum: 3\n(a b)");
}

#[test]
fn malformed_special_forms_are_syntax_errors() {
    assert_eq!(eval_err("(if)"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(lambda)"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(lambda (x))"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(lambda (x 3) x)"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(define)"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(define 3 4)"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(quote)"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(let ((x)) x)"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(let ((x 1)))"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(cond (else 1) (#t 2))"), ErrorKind::SyntaxError);
    assert_eq!(eval_err("(delay)"), ErrorKind::SyntaxError);
}

#[test]
fn deep_recursion_uses_the_explicit_stack() {
    // Far deeper than any host call stack would allow for a recursive
    // tree-walker; the iterative design only grows the value stack.
    assert_eq!(
        eval_one(
            "(define (count n) (if (= n 0) 'done (count (- n 1))))
             (count 20000)"
        ),
        "done"
    );
}

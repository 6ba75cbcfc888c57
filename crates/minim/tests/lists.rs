//! Pairs, lists, vectors, strings, and the three equivalence predicates.

use minim::{ErrorKind, Interp, NoPrint};
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
fn cons_car_cdr_identity() {
    assert_eq!(eval_one("(car (cons 1 2))"), "1");
    assert_eq!(eval_one("(cdr (cons 1 2))"), "2");
    assert_eq!(eval_one("(cons 1 2)"), "(1 . 2)");
    assert_eq!(eval_one("(cons 1 (cons 2 '()))"), "(1 2)");
    // Identity, not a copy: the stored value is the same object.
    assert_eq!(
        eval_one("(define v (list 9)) (define p (cons v 0)) (eq? (car p) v)"),
        "#t"
    );
}

#[test]
fn pair_mutation() {
    assert_eq!(
        eval_one("(define p (cons 1 2)) (set-car! p 10) p"),
        "(10 . 2)"
    );
    assert_eq!(
        eval_one("(define p (cons 1 2)) (set-cdr! p '(5)) p"),
        "(1 5)"
    );
    assert_eq!(eval_err("(set-car! 5 1)"), ErrorKind::WrongArgType);
}

#[test]
fn list_operations() {
    assert_eq!(eval_one("(list 1 2 3)"), "(1 2 3)");
    assert_eq!(eval_one("(list)"), "()");
    assert_eq!(eval_one("(length '(a b c))"), "3");
    assert_eq!(eval_one("(length '())"), "0");
    assert_eq!(eval_one("(append '(1 2) '(3 4))"), "(1 2 3 4)");
    assert_eq!(eval_one("(append)"), "()");
    assert_eq!(eval_one("(append '(1) '(2) '(3))"), "(1 2 3)");
    assert_eq!(eval_one("(append '(1 2) 3)"), "(1 2 . 3)");
    assert_eq!(eval_one("(reverse '(1 2 3))"), "(3 2 1)");
    assert_eq!(eval_one("(list-tail '(1 2 3 4) 2)"), "(3 4)");
    assert_eq!(eval_one("(list-tail '(1 2) 0)"), "(1 2)");
}

#[test]
fn list_laws() {
    assert_eq!(
        eval_one("(equal? (reverse (reverse '(1 2 3 4))) '(1 2 3 4))"),
        "#t"
    );
    assert_eq!(
        eval_one("(= (length (append '(1 2) '(3 4 5))) (+ (length '(1 2)) (length '(3 4 5))))"),
        "#t"
    );
}

#[test]
fn improper_lists_are_rejected_where_proper_is_required() {
    assert_eq!(eval_err("(length '(1 2 . 3))"), ErrorKind::WrongArgType);
    assert_eq!(eval_err("(reverse '(1 . 2))"), ErrorKind::WrongArgType);
    assert_eq!(
        eval_err("(define l (list 1 2)) (set-cdr! (cdr l) l) (length l)"),
        ErrorKind::WrongArgType
    );
}

#[test]
fn type_predicates() {
    assert_eq!(eval_one("(pair? '(1))"), "#t");
    assert_eq!(eval_one("(pair? '())"), "#f");
    assert_eq!(eval_one("(null? '())"), "#t");
    assert_eq!(eval_one("(null? '(1))"), "#f");
    assert_eq!(eval_one("(list? '(1 2))"), "#t");
    assert_eq!(eval_one("(list? '(1 . 2))"), "#f");
    assert_eq!(
        eval_one("(define l (list 1 2)) (set-cdr! (cdr l) l) (list? l)"),
        "#f"
    );
    assert_eq!(eval_one("(symbol? 'a)"), "#t");
    assert_eq!(eval_one("(string? \"a\")"), "#t");
    assert_eq!(eval_one("(char? #\\a)"), "#t");
    assert_eq!(eval_one("(boolean? #f)"), "#t");
    assert_eq!(eval_one("(vector? #(1))"), "#t");
    assert_eq!(eval_one("(procedure? car)"), "#t");
    assert_eq!(eval_one("(procedure? (lambda (x) x))"), "#t");
    assert_eq!(eval_one("(procedure? 'car)"), "#f");
}

#[test]
fn equivalence_predicates() {
    assert_eq!(eval_one("(eqv? 'a 'a)"), "#t");
    assert_eq!(eval_one("(eq? 'a 'b)"), "#f");
    assert_eq!(eval_one("(eqv? 1 1)"), "#t");
    assert_eq!(eval_one("(eqv? 1 1.0)"), "#f");
    assert_eq!(eval_one("(eqv? 1/2 0.5)"), "#f");
    assert_eq!(eval_one("(eq? (list 1 2) (list 1 2))"), "#f");
    assert_eq!(eval_one("(equal? (list 1 2) (list 1 2))"), "#t");
    assert_eq!(eval_one("(equal? '(1 (2 3)) '(1 (2 3)))"), "#t");
    assert_eq!(eval_one("(equal? '(1 2) '(1 2 3))"), "#f");
    assert_eq!(eval_one("(equal? \"abc\" \"abc\")"), "#t");
    assert_eq!(eval_one("(eq? \"abc\" \"abc\")"), "#f");
    assert_eq!(eval_one("(equal? #(1 2) #(1 2))"), "#t");
    assert_eq!(eval_one("(equal? #(1 2) #(1 3))"), "#f");
    assert_eq!(eval_one("(define x '(a)) (eq? x x)"), "#t");
}

#[test]
fn strings_compare_lexicographically() {
    assert_eq!(eval_one("(string=? \"abc\" \"abc\")"), "#t");
    assert_eq!(eval_one("(string<? \"abc\" \"abd\")"), "#t");
    assert_eq!(eval_one("(string<? \"b\" \"ab\")"), "#f");
    assert_eq!(eval_one("(string>=? \"b\" \"ab\" \"aa\")"), "#t");
    assert_eq!(eval_one("(string-length \"hello\")"), "5");
    assert_eq!(eval_err("(string<? \"a\" 5)"), ErrorKind::WrongArgType);
}

#[test]
fn vectors() {
    assert_eq!(eval_one("(vector 1 2 3)"), "#(1 2 3)");
    assert_eq!(eval_one("(make-vector 3 'x)"), "#(x x x)");
    assert_eq!(eval_one("(vector-length #(1 2 3))"), "3");
    assert_eq!(eval_one("(vector-ref #(a b c) 1)"), "b");
    assert_eq!(
        eval_one("(define v (make-vector 2 0)) (vector-set! v 1 'y) v"),
        "#(0 y)"
    );
    assert_eq!(eval_err("(vector-ref #(1) 5)"), ErrorKind::NumericError);
    assert_eq!(eval_err("(vector-ref #(1) -1)"), ErrorKind::NumericError);
}

#[test]
fn repr_reader_roundtrip() {
    let mut interp = Interp::new();
    for src in [
        "42",
        "-7/3",
        "0.5",
        "#t",
        "#\\a",
        "\"hi \\\"there\\\"\"",
        "(1 2 3)",
        "(1 (2 . 3) #(4 \"s\") #\\x)",
        "()",
    ] {
        let mut first = interp.read(src).unwrap();
        assert_eq!(first.len(), 1);
        let original = first.pop().unwrap();
        let printed = interp.repr(&original).unwrap();
        let mut second = interp.read(&printed).unwrap();
        assert_eq!(second.len(), 1, "reparsing {printed:?}");
        let reparsed = second.pop().unwrap();
        assert!(
            interp.values_equal(&original, &reparsed),
            "round trip changed {src:?} -> {printed:?}"
        );
        interp.drop_value(original);
        interp.drop_value(reparsed);
    }
}

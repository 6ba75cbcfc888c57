//! Numeric tower behavior through the interpreter: promotion, exactness,
//! rational arithmetic, and the arithmetic error surface.

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
fn integer_arithmetic() {
    assert_eq!(eval_one("(+ 1 2 3)"), "6");
    assert_eq!(eval_one("(- 10 3 2)"), "5");
    assert_eq!(eval_one("(- 4)"), "-4");
    assert_eq!(eval_one("(* 2 3 4)"), "24");
    assert_eq!(eval_one("(+)"), "0");
    assert_eq!(eval_one("(*)"), "1");
}

#[test]
fn division_produces_exact_rationals() {
    assert_eq!(eval_one("(/ 1 3)"), "1/3");
    assert_eq!(eval_one("(/ 6 3)"), "2");
    assert_eq!(eval_one("(/ 2)"), "1/2");
    assert_eq!(eval_one("(+ 1/3 1/6)"), "1/2");
    assert_eq!(eval_one("(* 1/3 3)"), "1");
}

#[test]
fn inexactness_spreads_through_promotion() {
    let r = eval_one("(+ 1/3 0.5)");
    assert!(r.starts_with("0.83333333"), "got {r}");
    assert_eq!(eval_one("(exact? (+ 1/3 1/6))"), "#t");
    assert_eq!(eval_one("(exact? (+ 1/3 0.5))"), "#f");
    assert_eq!(eval_one("(inexact? 1.5)"), "#t");
}

#[test]
fn arbitrary_precision_integers() {
    assert_eq!(
        eval_one("(* 1000000000000 1000000000000)"),
        "1000000000000000000000000"
    );
    assert_eq!(
        eval_one(
            "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))
             (fact 30)"
        ),
        "265252859812191058636308480000000"
    );
}

#[test]
fn comparisons_chain() {
    assert_eq!(eval_one("(< 1 2 3)"), "#t");
    assert_eq!(eval_one("(< 1 3 2)"), "#f");
    assert_eq!(eval_one("(<= 1 1 2)"), "#t");
    assert_eq!(eval_one("(> 3 2 1)"), "#t");
    assert_eq!(eval_one("(>= 3 3 1)"), "#t");
    assert_eq!(eval_one("(= 2 2 2)"), "#t");
    assert_eq!(eval_one("(= 1 1.0)"), "#t");
    assert_eq!(eval_one("(< 1/3 1/2)"), "#t");
}

#[test]
fn integer_only_operations() {
    assert_eq!(eval_one("(modulo 7 3)"), "1");
    assert_eq!(eval_one("(modulo -7 3)"), "2");
    assert_eq!(eval_one("(remainder -7 3)"), "-1");
    assert_eq!(eval_one("(quotient 7 2)"), "3");
    assert_eq!(eval_one("(gcd 12 18)"), "6");
    assert_eq!(eval_one("(lcm 4 6)"), "12");
    assert_eq!(eval_one("(gcd)"), "0");
    assert_eq!(eval_one("(lcm)"), "1");
    assert_eq!(eval_one("(abs -5)"), "5");
    assert_eq!(eval_one("(abs -1/2)"), "1/2");
}

#[test]
fn numeric_predicates() {
    assert_eq!(eval_one("(number? 3)"), "#t");
    assert_eq!(eval_one("(number? 'a)"), "#f");
    assert_eq!(eval_one("(integer? 2)"), "#t");
    assert_eq!(eval_one("(integer? 2.0)"), "#t");
    assert_eq!(eval_one("(integer? 1/2)"), "#f");
    assert_eq!(eval_one("(rational? 1/2)"), "#t");
    assert_eq!(eval_one("(rational? 0.5)"), "#f");
    assert_eq!(eval_one("(real? 0.5)"), "#t");
    assert_eq!(eval_one("(complex? 3+4i)"), "#t");
    assert_eq!(eval_one("(real? 3+4i)"), "#f");
}

#[test]
fn addition_and_multiplication_laws() {
    assert_eq!(eval_one("(= (+ 2 3) (+ 3 2))"), "#t");
    assert_eq!(eval_one("(= (* 2 (* 3 4)) (* (* 2 3) 4))"), "#t");
    assert_eq!(eval_one("(= (+ 7 0) 7)"), "#t");
    assert_eq!(eval_one("(= (* 7 1) 7)"), "#t");
}

#[test]
fn rational_with_unit_denominator_is_its_numerator() {
    assert_eq!(eval_one("(= 4/2 2)"), "#t");
    assert_eq!(eval_one("(integer? 4/2)"), "#t");
}

#[test]
fn division_by_exact_zero_is_an_error() {
    assert_eq!(eval_err("(/ 1 0)"), ErrorKind::NumericError);
    assert_eq!(eval_err("(modulo 7 0)"), ErrorKind::NumericError);
    assert_eq!(eval_err("(quotient 7 0)"), ErrorKind::NumericError);
    assert_eq!(eval_err("(modulo 7 3.0)"), ErrorKind::NumericError);
}

#[test]
fn division_by_inexact_zero_follows_ieee() {
    assert_eq!(eval_one("(/ 1 0.0)"), "+inf.0");
    assert_eq!(eval_one("(/ -1 0.0)"), "-inf.0");
}

#[test]
fn complex_numbers_participate() {
    assert_eq!(eval_one("(+ 3+4i 1)"), "4.0+4.0i");
    assert_eq!(eval_one("(* 1+2i 3-1i)"), "5.0+5.0i");
    assert_eq!(eval_one("(= 3+0i 3.0)"), "#t");
    assert_eq!(eval_err("(< 1+2i 3)"), ErrorKind::NumericError);
}

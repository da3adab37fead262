use super::*;

fn lookup_xy(name: &str) -> Option<f64> {
    match name {
        "x" => Some(3.0),
        "y" => Some(4.0),
        _ => None,
    }
}

#[test]
fn test_math_eval() {
    // x * y + 2
    let term = MathTerm::bin(
        BinOp::Add,
        MathTerm::bin(BinOp::Mul, MathTerm::variable("x"), MathTerm::variable("y")),
        MathTerm::number(2.0),
    );
    assert_eq!(term.eval(&lookup_xy).unwrap(), 14.0);

    let term = MathTerm::func2(
        Func2::Pow,
        MathTerm::variable("x"),
        MathTerm::number(2.0),
    );
    assert_eq!(term.eval(&lookup_xy).unwrap(), 9.0);

    let term = MathTerm::neg(MathTerm::variable("y"));
    assert_eq!(term.eval(&lookup_xy).unwrap(), -4.0);

    let term = MathTerm::bin(BinOp::Rem, MathTerm::variable("y"), MathTerm::number(3.0));
    assert_eq!(term.eval(&lookup_xy).unwrap(), 1.0);

    let term = MathTerm::bin(
        BinOp::BitAnd,
        MathTerm::number(6.0),
        MathTerm::number(3.0),
    );
    assert_eq!(term.eval(&lookup_xy).unwrap(), 2.0);

    let term = MathTerm::variable("z");
    assert!(matches!(term.eval(&lookup_xy), Err(Error::UnknownColumn(_, _))));
}

#[test]
fn test_math_variables() {
    let term = MathTerm::bin(
        BinOp::Sub,
        MathTerm::func1(Func1::Sqrt, MathTerm::variable("a")),
        MathTerm::bin(BinOp::Mul, MathTerm::variable("b"), MathTerm::variable("a")),
    );
    let vars: Vec<String> = term.variables().into_iter().collect();
    assert_eq!(vars, vec!["a".to_string(), "b".to_string()]);
    assert!(!term.is_constant());
    assert!(MathTerm::number(4.0).is_constant());
}

#[test]
fn test_math_fold_constants() {
    // (2 + 3) * 4 folds to 20
    let term = MathTerm::bin(
        BinOp::Mul,
        MathTerm::bin(BinOp::Add, MathTerm::number(2.0), MathTerm::number(3.0)),
        MathTerm::number(4.0),
    );
    assert_eq!(term.fold(false), MathTerm::Number(20.0));

    // variables block folding of their subtree only
    let term = MathTerm::bin(
        BinOp::Add,
        MathTerm::variable("x"),
        MathTerm::bin(BinOp::Mul, MathTerm::number(2.0), MathTerm::number(5.0)),
    );
    let folded = term.fold(false);
    assert_eq!(
        folded,
        MathTerm::bin(BinOp::Add, MathTerm::variable("x"), MathTerm::number(10.0))
    );
}

#[test]
fn test_math_fold_inverse() {
    let wrapped = MathTerm::func1(
        Func1::Cos,
        MathTerm::func1(Func1::Acos, MathTerm::variable("x")),
    );
    assert_eq!(wrapped.clone().fold(false), MathTerm::variable("x"));
    // preservation keeps the written expression
    assert_eq!(wrapped.clone().fold(true), wrapped);

    let wrapped = MathTerm::func1(
        Func1::Exp,
        MathTerm::func1(Func1::Log, MathTerm::variable("x")),
    );
    assert_eq!(wrapped.fold(false), MathTerm::variable("x"));

    // not an inverse pair
    let wrapped = MathTerm::func1(
        Func1::Sin,
        MathTerm::func1(Func1::Acos, MathTerm::variable("x")),
    );
    assert_eq!(wrapped.clone().fold(false), wrapped);

    let double_neg = MathTerm::neg(MathTerm::neg(MathTerm::variable("x")));
    assert_eq!(double_neg.fold(false), MathTerm::variable("x"));
}

#[test]
fn test_math_affine() {
    // 2*x + 3
    let term = MathTerm::bin(
        BinOp::Add,
        MathTerm::bin(BinOp::Mul, MathTerm::number(2.0), MathTerm::variable("x")),
        MathTerm::number(3.0),
    );
    assert_eq!(term.as_affine(), Some(("x".to_string(), 2.0, 3.0)));

    // 1 + f5
    let term = MathTerm::bin(
        BinOp::Add,
        MathTerm::number(1.0),
        MathTerm::variable("f5"),
    );
    assert_eq!(term.as_affine(), Some(("f5".to_string(), 1.0, 1.0)));

    // (x - 4) / 2
    let term = MathTerm::bin(
        BinOp::Div,
        MathTerm::bin(BinOp::Sub, MathTerm::variable("x"), MathTerm::number(4.0)),
        MathTerm::number(2.0),
    );
    assert_eq!(term.as_affine(), Some(("x".to_string(), 0.5, -2.0)));

    // -x
    let term = MathTerm::neg(MathTerm::variable("x"));
    assert_eq!(term.as_affine(), Some(("x".to_string(), -1.0, 0.0)));

    // x * y is not affine, x - x has a zero multiplier
    let term =
        MathTerm::bin(BinOp::Mul, MathTerm::variable("x"), MathTerm::variable("y"));
    assert_eq!(term.as_affine(), None);
    let term =
        MathTerm::bin(BinOp::Sub, MathTerm::variable("x"), MathTerm::variable("x"));
    assert_eq!(term.as_affine(), None);
    assert_eq!(MathTerm::number(5.0).as_affine(), None);
}

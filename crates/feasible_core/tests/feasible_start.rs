use approx::assert_relative_eq;
use feasible_core::traits::ConstraintProblem;
use feasible_core::{
    find_feasible_start, parse_equation, parse_expression, BinaryOp, EquationProblem, Expr,
    FeasibleAssignment, FeasibleError, FeasibleSettings, GradientMode, ParseError, SearchError,
    VariableSet,
};
use proptest::prelude::*;

const PARABOLOID: &str = "f = (x-3)**2 + x*y + (y+4)**2 - 3";

fn paraboloid(x: f64, y: f64) -> f64 {
    (x - 3.0).powi(2) + x * y + (y + 4.0).powi(2) - 3.0
}

#[test]
fn paraboloid_reaches_target_level_set() -> anyhow::Result<()> {
    for gradient in [GradientMode::Symbolic, GradientMode::Dual] {
        let settings = FeasibleSettings {
            gradient,
            ..FeasibleSettings::default()
        };
        let start = find_feasible_start(PARABOLOID, 0.0, &settings)?;
        let x = start.assignment.get("x").expect("x assigned");
        let y = start.assignment.get("y").expect("y assigned");
        assert!(paraboloid(x, y).abs() <= 1e-6, "f({x}, {y}) = {}", paraboloid(x, y));
        assert!(start.iterations <= settings.max_iterations);
        assert_eq!(start.assignment.variables().names(), &["x", "y"]);
    }
    Ok(())
}

#[test]
fn paraboloid_below_minimum_fails_with_best_point() {
    // The minimum of f is -82/3, so -100 is unreachable.
    let settings = FeasibleSettings {
        max_iterations: 25,
        ..FeasibleSettings::default()
    };
    let err = find_feasible_start(PARABOLOID, -100.0, &settings).unwrap_err();
    let FeasibleError::Search(failure) = err else {
        panic!("expected search failure, got {err:?}");
    };
    assert!(matches!(
        failure.error,
        SearchError::NotConverged { .. }
            | SearchError::Stalled { .. }
            | SearchError::Eval { .. }
    ));
    let best = failure.best_residual.expect("initial point evaluates");
    let x = failure.best.get("x").unwrap();
    let y = failure.best.get("y").unwrap();
    assert_relative_eq!(paraboloid(x, y) + 100.0, best, epsilon = 1e-9);
    // Never worse than the starting point f(1, 1) = 27.
    assert!(best.abs() <= 127.0);
}

#[test]
fn symbolic_and_dual_gradients_agree() -> anyhow::Result<()> {
    let mut symbolic_eq = parse_equation(PARABOLOID)?;
    let mut dual_eq = parse_equation(PARABOLOID)?;
    let mut symbolic = EquationProblem::new(&mut symbolic_eq, 0.0, GradientMode::Symbolic)?;
    let mut dual = EquationProblem::new(&mut dual_eq, 0.0, GradientMode::Dual)?;

    for point in [[1.0, 1.0], [-2.5, 0.5], [6.0, -7.0]] {
        let mut gs = [0.0; 2];
        let mut gd = [0.0; 2];
        symbolic.gradient(&point, &mut gs)?;
        dual.gradient(&point, &mut gd)?;
        let [x, y] = point;
        assert_relative_eq!(gs[0], 2.0 * (x - 3.0) + y, epsilon = 1e-12);
        assert_relative_eq!(gs[1], x + 2.0 * (y + 4.0), epsilon = 1e-12);
        assert_relative_eq!(gs[0], gd[0], epsilon = 1e-12);
        assert_relative_eq!(gs[1], gd[1], epsilon = 1e-12);
        assert_relative_eq!(symbolic.residual(&point)?, paraboloid(x, y), epsilon = 1e-12);
    }
    Ok(())
}

#[test]
fn parse_errors_report_positions() {
    assert_eq!(
        parse_equation("y = (x + 1").unwrap_err(),
        ParseError::UnbalancedParens { position: 4 }
    );
    assert_eq!(parse_equation("x + 1").unwrap_err(), ParseError::MissingEquals);
    assert!(matches!(
        parse_equation("2y = x").unwrap_err(),
        ParseError::InvalidLhs { .. }
    ));
}

#[test]
fn evaluation_is_pure() -> anyhow::Result<()> {
    let equation = parse_equation("y = (a - b) * c / (a + 2)")?;
    let snapshot = equation.rhs().clone();
    let at = FeasibleAssignment::from_pairs([("a", 1.5), ("b", -0.25), ("c", 3.0)]);
    let first = equation.evaluate(&at)?;
    let second = equation.evaluate(&at)?;
    assert_eq!(first.to_bits(), second.to_bits());
    assert_eq!(equation.rhs(), &snapshot);

    let elsewhere = FeasibleAssignment::from_pairs([("a", -4.0), ("b", 7.5), ("c", 0.5)]);
    let other = equation.evaluate(&elsewhere)?;
    assert_relative_eq!(other, (-4.0 - 7.5) * 0.5 / (-4.0 + 2.0));
    assert_eq!(equation.rhs(), &snapshot);
    assert_eq!(equation.evaluate(&at)?.to_bits(), first.to_bits());
    Ok(())
}

#[test]
fn display_round_trips_through_parser() -> anyhow::Result<()> {
    let sources = [
        "y = 2*x + 3",
        "y = (a - b) * c",
        "y = x^2 - 4*x + 4",
        PARABOLOID,
        "y = (-2)^2 + x",
        "y = (-x)^3 - (-1.5)^2",
    ];
    for source in sources {
        let equation = parse_equation(source)?;
        let printed = format!("{} = {}", equation.lhs(), equation.rhs());
        let reparsed = parse_equation(&printed)?;
        assert_eq!(reparsed.rhs(), equation.rhs(), "round trip of {source}");
        for x in [-1.25, 0.0, 0.3, 2.0] {
            let point = at(&[("x", x), ("y", x), ("a", x), ("b", 1.0), ("c", 2.0)]);
            assert_eq!(
                reparsed.evaluate(&point),
                equation.evaluate(&point),
                "{printed} at x = {x}"
            );
        }
    }
    Ok(())
}

#[test]
fn settings_load_from_json() -> anyhow::Result<()> {
    let settings: FeasibleSettings = serde_json::from_str(
        r#"{ "max_iterations": 10, "initial_values": { "x": 0.0 }, "gradient": "dual" }"#,
    )?;
    let start = find_feasible_start("y = x - 5", 0.0, &settings)?;
    assert_relative_eq!(start.assignment.get("x").unwrap(), 5.0, epsilon = 1e-6);
    let json = serde_json::to_value(&start)?;
    assert_eq!(json["iterations"], 1);
    Ok(())
}

fn at(pairs: &[(&str, f64)]) -> FeasibleAssignment {
    FeasibleAssignment::from_pairs(pairs.iter().copied())
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (-5.0f64..5.0).prop_map(Expr::literal),
        prop_oneof![Just("x"), Just("y")].prop_map(|name| Expr::variable(name)),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        let op = prop_oneof![
            Just(BinaryOp::Add),
            Just(BinaryOp::Sub),
            Just(BinaryOp::Mul),
            Just(BinaryOp::Div),
            Just(BinaryOp::Pow),
        ];
        prop_oneof![
            inner.clone().prop_map(Expr::neg),
            (op, inner.clone(), inner).prop_map(|(op, l, r)| Expr::binary(op, l, r)),
        ]
    })
}

proptest! {
    #[test]
    fn printed_trees_evaluate_identically(
        expr in arb_expr(),
        x in -3.0f64..3.0,
        y in -3.0f64..3.0,
    ) {
        let printed = expr.to_string();
        let reparsed = parse_expression(&printed).unwrap();
        let point = at(&[("x", x), ("y", y)]);
        // Debug text, so NaN payloads from overflowing subtrees compare equal.
        prop_assert_eq!(
            format!("{:?}", reparsed.evaluate(&point)),
            format!("{:?}", expr.evaluate(&point)),
            "{}",
            printed
        );
    }

    #[test]
    fn curated_equations_match_closed_forms(
        a in -10.0f64..10.0,
        b in -10.0f64..10.0,
        c in -10.0f64..10.0,
    ) {
        let linear = parse_equation("y = 2*x + 3").unwrap();
        prop_assert!((linear.evaluate(&at(&[("x", a)])).unwrap() - (2.0 * a + 3.0)).abs() < 1e-9);

        let product = parse_equation("y = (a - b) * c").unwrap();
        let value = product.evaluate(&at(&[("a", a), ("b", b), ("c", c)])).unwrap();
        prop_assert!((value - (a - b) * c).abs() < 1e-9);

        let mut quadratic = parse_equation("y = x^2 - 4*x + 4").unwrap();
        let value = quadratic.evaluate(&at(&[("x", a)])).unwrap();
        prop_assert!((value - (a - 2.0).powi(2)).abs() < 1e-9 * (1.0 + value.abs()));
        let slope = quadratic.partial("x").unwrap().evaluate(&at(&[("x", a)])).unwrap();
        prop_assert!((slope - (2.0 * a - 4.0)).abs() < 1e-9);
    }

    #[test]
    fn linear_targets_are_always_reachable(target in -50.0f64..50.0, start in -5.0f64..5.0) {
        let settings = FeasibleSettings {
            initial_values: [("x".to_string(), start)].into_iter().collect(),
            ..FeasibleSettings::default()
        };
        let found = find_feasible_start("y = 3*x - 7", target, &settings).unwrap();
        let x = found.assignment.get("x").unwrap();
        prop_assert!((3.0 * x - 7.0 - target).abs() <= 1e-6);
        prop_assert!(found.iterations <= 2);
    }
}

#[test]
fn literal_expression_has_no_variables() -> anyhow::Result<()> {
    let equation = parse_equation("k = 2 * (3 + 4)")?;
    assert!(equation.variables().is_empty());
    assert!(matches!(equation.rhs(), Expr::Binary(..)));
    let empty = FeasibleAssignment::uniform(VariableSet::new(), 0.0);
    assert_relative_eq!(equation.evaluate(&empty)?, 14.0);
    Ok(())
}

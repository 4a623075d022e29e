//! End-to-end acceleration scenarios.

use cadenza_accel::accelerate::{accelerate, AccelerationResult, Status};
use cadenza_accel::recurrence::PolySolver;
use cadenza_accel::rule::{Cost, Loc, Rule, Update};
use cadenza_base::{Config, Deadline, Variable, VariableManager};
use cadenza_smt::{Encoder, LinearFactory, SmtResult, SmtSolver, SolverFactory};
use cadenza_term::{BoolExpr, Expr, Guard, Rel, Subs};

const SINK: Loc = Loc(99);

fn run(vars: &mut VariableManager, config: &Config, rule: &Rule) -> AccelerationResult {
    accelerate(
        vars,
        config,
        &LinearFactory,
        &PolySolver,
        rule,
        SINK,
        Deadline::none(),
    )
}

fn no_instantiation() -> Config {
    Config {
        replace_temp_var_by_upperbounds: false,
        ..Config::default()
    }
}

/// The fresh iteration counter of an accelerated rule: the only temporary
/// in its guard.
fn counter_of(vars: &VariableManager, rule: &Rule) -> Variable {
    let temps: Vec<Variable> = rule
        .guard()
        .vars()
        .into_iter()
        .filter(|v| vars.is_temp(*v))
        .collect();
    assert_eq!(temps.len(), 1, "expected exactly one counter");
    temps[0]
}

/// Checks `premise ⇒ conclusion` with the built-in solver.
fn implies(vars: &VariableManager, config: &Config, premise: &Guard, conclusion: &Guard) -> bool {
    let encoder = Encoder::new(vars, config);
    let mut solver = LinearFactory.solver();
    solver.add(encoder.encode_guard(premise).unwrap());
    solver.add(
        encoder
            .encode_bool(&BoolExpr::from_guard(conclusion).negation())
            .unwrap(),
    );
    solver.check() == SmtResult::Unsat
}

#[test]
fn linear_counting_accelerates() {
    // loc(x, y) -> loc(x + 1, y) [x < y]
    let mut vars = VariableManager::new();
    let config = no_instantiation();
    let x = vars.add_program_var("x");
    let y = vars.add_program_var("y");
    let mut update = Update::new();
    update.insert(x, Expr::var(x) + Expr::one());
    let guard: Guard = vec![Rel::lt(Expr::var(x), Expr::var(y))].into();
    let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);

    let result = run(&mut vars, &config, &rule);
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.rules.len(), 1);

    let accel = &result.rules[0];
    let n = counter_of(&vars, accel);
    // update x := x + n, cost n
    assert!(accel
        .update()
        .get(x)
        .unwrap()
        .equals(&(Expr::var(x) + Expr::var(n))));
    assert!(accel.cost().as_expr().unwrap().equals(&Expr::var(n)));
    // guard is x + n - 1 < y together with n > 1
    assert!(accel.guard().contains(&Rel::gt(Expr::var(n), Expr::one())));
    let expected = (Expr::var(y) - Expr::var(x) - Expr::var(n) + Expr::one()).expand();
    assert!(accel
        .guard()
        .iter()
        .any(|r| (r.lhs().clone() - r.rhs().clone()).expand().equals(&expected)));

    // taking n = 3 steps symbolically agrees with three single steps
    let three = Subs::single(n, Expr::int(3));
    assert!(accel
        .update()
        .get(x)
        .unwrap()
        .subs(&three)
        .equals(&(Expr::var(x) + Expr::int(3))));

    // the accelerated guard at any n > 1 implies the original guard
    let instantiated = accel.guard().subs(&Subs::single(n, Expr::int(2)));
    assert!(implies(&vars, &config, &instantiated, rule.guard()));
}

#[test]
fn bounded_decrease_accelerates() {
    // loc(x) -> loc(x - 1) [x > 0 && x <= 10]
    let mut vars = VariableManager::new();
    let config = no_instantiation();
    let x = vars.add_program_var("x");
    let mut update = Update::new();
    update.insert(x, Expr::var(x) - Expr::one());
    let guard: Guard = vec![
        Rel::gt(Expr::var(x), Expr::int(0)),
        Rel::le(Expr::var(x), Expr::int(10)),
    ]
    .into();
    let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);

    let result = run(&mut vars, &config, &rule);
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.rules.len(), 1);

    let accel = &result.rules[0];
    let n = counter_of(&vars, accel);
    assert!(accel
        .update()
        .get(x)
        .unwrap()
        .equals(&(Expr::var(x) - Expr::var(n))));
    // guard carries x - (n - 1) > 0, the upper bound, and n > 1
    let decreasing = (Expr::var(x) - Expr::var(n) + Expr::one()).expand();
    assert!(accel
        .guard()
        .iter()
        .any(|r| (r.lhs().clone() - r.rhs().clone()).expand().equals(&decreasing)));
    assert!(accel.guard().contains(&Rel::gt(Expr::var(n), Expr::one())));
    // x <= 10 survives in its normalised form 11 - x > 0
    let bound = (Expr::int(11) - Expr::var(x)).expand();
    assert!(accel
        .guard()
        .iter()
        .any(|r| (r.lhs().clone() - r.rhs().clone()).expand().equals(&bound)));
}

#[test]
fn recurrent_guard_proves_nontermination() {
    // loc(x, y) -> loc(x + 1, y) [y >= 0]
    let mut vars = VariableManager::new();
    let config = Config::default();
    let x = vars.add_program_var("x");
    let y = vars.add_program_var("y");
    let mut update = Update::new();
    update.insert(x, Expr::var(x) + Expr::one());
    let guard: Guard = vec![Rel::ge(Expr::var(y), Expr::int(0))].into();
    let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);

    let result = run(&mut vars, &config, &rule);
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.rules.len(), 1);

    let witness = &result.rules[0];
    assert!(witness.cost().is_nonterm());
    assert!(witness.update().is_empty());
    assert_eq!(witness.target(), SINK);
    // guard is y >= 0 in its normalised form y + 1 > 0
    assert_eq!(witness.guard().len(), 1);
    let rel = witness.guard().iter().next().unwrap();
    assert!((rel.lhs().clone() - rel.rhs().clone())
        .expand()
        .equals(&(Expr::var(y) + Expr::one())));
}

#[test]
fn rising_then_falling_guard_needs_split() {
    // loc(x, y) -> loc(x + y, y + 1) [x > 0]: x falls while y < 0 and
    // rises forever once y > 0, so the calculus splits on y
    let mut vars = VariableManager::new();
    let config = no_instantiation();
    let x = vars.add_program_var("x");
    let y = vars.add_program_var("y");
    let mut update = Update::new();
    update.insert(x, Expr::var(x) + Expr::var(y));
    update.insert(y, Expr::var(y) + Expr::one());
    let guard: Guard = vec![Rel::gt(Expr::var(x), Expr::int(0))].into();
    let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);

    let result = run(&mut vars, &config, &rule);
    // splits are not equivalence-preserving
    assert_eq!(result.status, Status::PartialSuccess);
    // the split also yields a one-sided nontermination witness (y > 0 keeps
    // x growing forever), then the merged family and the two one-sided
    // families of the finite acceleration
    assert_eq!(result.rules.len(), 4);
    assert!(result.rules[0].cost().is_nonterm());
    let merged = &result.rules[1];
    assert!(
        merged.guard().iter().any(|r| r.is_eq()),
        "merged guard relates the counters additively"
    );
    assert!(result.proof.to_string().contains("splitting"));
}

#[test]
fn upper_bound_instantiation_collapses_counter() {
    // the counting loop again, now with counter elimination enabled
    let mut vars = VariableManager::new();
    let config = Config {
        max_upperbounds_for_propagation: 2,
        ..Config::default()
    };
    let x = vars.add_program_var("x");
    let y = vars.add_program_var("y");
    let mut update = Update::new();
    update.insert(x, Expr::var(x) + Expr::one());
    let guard: Guard = vec![Rel::lt(Expr::var(x), Expr::var(y))].into();
    let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);

    let result = run(&mut vars, &config, &rule);
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.rules.len(), 1);

    let inst = &result.rules[0];
    // n was replaced by its only upper bound y - x
    assert!(inst.update().get(x).unwrap().equals(&Expr::var(y)));
    assert!(inst
        .cost()
        .as_expr()
        .unwrap()
        .equals(&(Expr::var(y) - Expr::var(x))));
    for rel in inst.guard() {
        assert!(!rel.vars().iter().any(|v| vars.is_temp(*v)));
    }
}

#[test]
fn nonlinear_guard_falls_back_to_metering() {
    // loc(x, y) -> loc(x, y + 1) [y < x^2]: the calculus cannot reason
    // about x^2, the metering function x^2 - y can
    let mut vars = VariableManager::new();
    let config = Config::default();
    let x = vars.add_program_var("x");
    let y = vars.add_program_var("y");
    let mut update = Update::new();
    update.insert(y, Expr::var(y) + Expr::one());
    let guard: Guard = vec![Rel::lt(
        Expr::var(y),
        Expr::pow(Expr::var(x), Expr::int(2)),
    )]
    .into();
    let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);

    let result = run(&mut vars, &config, &rule);
    assert_eq!(result.status, Status::Success);
    assert!(result.proof.to_string().contains("metering"));
    assert_eq!(result.rules.len(), 1);

    // the counter was eliminated through its bound x^2 - y
    let accel = &result.rules[0];
    let expected = (Expr::pow(Expr::var(x), Expr::int(2)) - Expr::var(y)).expand();
    assert!(accel.cost().as_expr().unwrap().equals(&expected));
    assert!(accel.update().get(y).unwrap().equals(&Expr::pow(Expr::var(x), Expr::int(2))));
}

#[test]
fn nonterm_mode_skips_finite_acceleration() {
    let mut vars = VariableManager::new();
    let config = Config {
        nonterm_mode: true,
        ..Config::default()
    };
    let x = vars.add_program_var("x");
    let y = vars.add_program_var("y");
    let mut update = Update::new();
    update.insert(x, Expr::var(x) + Expr::one());
    let guard: Guard = vec![Rel::lt(Expr::var(x), Expr::var(y))].into();
    let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);

    // the loop terminates: no nonterm witness, and the equivalence phase
    // is skipped by configuration
    let result = run(&mut vars, &config, &rule);
    assert_eq!(result.status, Status::Failure);
    assert!(result.rules.is_empty());
}

#[test]
fn config_round_trips_through_json() {
    let config = Config {
        max_upperbounds_for_propagation: 5,
        smt_timeout_millis: 250,
        nonterm_mode: true,
        ..Config::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back.max_upperbounds_for_propagation, 5);
    assert_eq!(back.smt_timeout_millis, 250);
    assert!(back.nonterm_mode);

    // partial configs fall back to defaults
    let partial: Config = serde_json::from_str("{\"nonterm_mode\": true}").unwrap();
    assert!(partial.nonterm_mode);
    assert!(partial.replace_temp_var_by_upperbounds);
}

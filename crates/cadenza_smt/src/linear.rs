//! Built-in decision procedure for linear arithmetic.
//!
//! Satisfiability by disjunct: the asserted formulas are brought into
//! negation normal form, expanded into disjuncts, and each disjunct is
//! decided by Fourier–Motzkin elimination over the rationals. Constraints
//! whose variables are all integer-sorted are tightened first: coefficients
//! are scaled integral, strict bounds shifted by one, and the gcd divided
//! out with a floored constant. Tightening and elimination both preserve
//! integer solutions, so `Unsat` verdicts are sound; `Sat` verdicts may rest
//! on a rational witness, which is the usual one-sided precision of a
//! rational procedure and exactly the role the engine assigns to them.
//!
//! Models are reconstructed by substituting bounds back in reverse
//! elimination order and are only reported when they verify against the
//! original constraints.
//!
//! A disjunct containing a nonlinear atom is never decided; it degrades the
//! verdict to `Unknown` unless some other disjunct is satisfiable.

use std::collections::{BTreeMap, BTreeSet};

use cadenza_base::Variable;
use cadenza_term::Rational;
use log::trace;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::ir::{SmtExpr, SmtOp, SmtSort};
use crate::solver::{Model, SmtResult, SmtSolver, SolverFactory};

/// Upper limit on the number of disjuncts explored per check.
const MAX_DISJUNCTS: usize = 4096;

/// A linear term `constant + Σ coeffᵢ · varᵢ`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct LinTerm {
    constant: Rational,
    coeffs: BTreeMap<Variable, Rational>,
}

impl LinTerm {
    fn constant(c: Rational) -> Self {
        LinTerm {
            constant: c,
            coeffs: BTreeMap::new(),
        }
    }

    fn var(v: Variable) -> Self {
        let mut coeffs = BTreeMap::new();
        coeffs.insert(v, Rational::one());
        LinTerm {
            constant: Rational::zero(),
            coeffs,
        }
    }

    fn add(&self, other: &LinTerm) -> LinTerm {
        let mut res = self.clone();
        res.constant += &other.constant;
        for (v, c) in &other.coeffs {
            let entry = res.coeffs.entry(*v).or_insert_with(Rational::zero);
            *entry += c;
            if entry.is_zero() {
                res.coeffs.remove(v);
            }
        }
        res
    }

    fn scale(&self, k: &Rational) -> LinTerm {
        if k.is_zero() {
            return LinTerm::constant(Rational::zero());
        }
        LinTerm {
            constant: &self.constant * k,
            coeffs: self.coeffs.iter().map(|(v, c)| (*v, c * k)).collect(),
        }
    }

    fn sub(&self, other: &LinTerm) -> LinTerm {
        self.add(&other.scale(&-Rational::one()))
    }

    fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    fn coeff(&self, v: Variable) -> Rational {
        self.coeffs.get(&v).cloned().unwrap_or_else(Rational::zero)
    }

    fn without(&self, v: Variable) -> LinTerm {
        let mut res = self.clone();
        res.coeffs.remove(&v);
        res
    }

    fn eval(&self, model: &Model) -> Option<Rational> {
        let mut acc = self.constant.clone();
        for (v, c) in &self.coeffs {
            acc += c * model.get(*v)?;
        }
        Some(acc)
    }
}

/// A constraint `term ≤ 0` (or `< 0` when strict).
#[derive(Clone, Debug)]
struct Constraint {
    term: LinTerm,
    strict: bool,
}

impl Constraint {
    /// `true` iff a constant constraint holds.
    fn holds_constant(&self) -> bool {
        debug_assert!(self.term.is_constant());
        if self.strict {
            self.term.constant.is_negative()
        } else {
            !self.term.constant.is_positive()
        }
    }

    /// Integer tightening: scale the coefficients integral, turn strict into
    /// non-strict by a unit shift, and divide out the coefficient gcd with a
    /// floored constant. Only sound when every variable is integer-sorted.
    fn tighten_int(&mut self) {
        // clear denominators
        let mut lcm = self.term.constant.denom().clone();
        for c in self.term.coeffs.values() {
            lcm = lcm.lcm(c.denom());
        }
        if !lcm.is_one() {
            let factor = Rational::from_integer(lcm);
            self.term = self.term.scale(&factor);
        }
        // strict to non-strict over the integers
        if self.strict {
            self.term.constant += Rational::one();
            self.strict = false;
        }
        // gcd normalisation with floored constant
        let mut gcd = BigInt::zero();
        for c in self.term.coeffs.values() {
            gcd = gcd.gcd(&c.numer().abs());
        }
        if gcd > BigInt::one() {
            let mut coeffs = BTreeMap::new();
            for (v, c) in &self.term.coeffs {
                coeffs.insert(*v, Rational::from_integer(c.numer() / &gcd));
            }
            // c + Σ a·g·x ≤ 0  ⇔  Σ a·x ≤ floor(−c / g)
            let bound = (-self.term.constant.numer()).div_floor(&gcd);
            self.term = LinTerm {
                constant: Rational::from_integer(-bound),
                coeffs,
            };
        }
    }
}

/// Negation-normal-form formula with comparison atoms.
enum Nnf {
    Bool(bool),
    Atom(Box<Constraint>),
    /// A conjunction of equality halves produced from a single `=` atom.
    Pair(Box<Constraint>, Box<Constraint>),
    Nonlinear,
    And(Vec<Nnf>),
    Or(Vec<Nnf>),
}

fn linearize(e: &SmtExpr, sorts: &mut BTreeMap<Variable, SmtSort>) -> Option<LinTerm> {
    match e {
        SmtExpr::Int(n) => Some(LinTerm::constant(Rational::from_integer(BigInt::from(*n)))),
        SmtExpr::Real(n, d) => Some(LinTerm::constant(Rational::new(
            BigInt::from(*n),
            BigInt::from(*d),
        ))),
        SmtExpr::Var(v, sort) => {
            sorts.insert(*v, *sort);
            Some(LinTerm::var(*v))
        }
        SmtExpr::Binary { op, left, right } => {
            let l = linearize(left, sorts)?;
            let r = linearize(right, sorts)?;
            match op {
                SmtOp::Add => Some(l.add(&r)),
                SmtOp::Sub => Some(l.sub(&r)),
                SmtOp::Mul => {
                    if l.is_constant() {
                        Some(r.scale(&l.constant))
                    } else if r.is_constant() {
                        Some(l.scale(&r.constant))
                    } else {
                        None
                    }
                }
                SmtOp::Pow => None,
                _ => None,
            }
        }
        SmtExpr::Bool(_) | SmtExpr::Not(_) => None,
    }
}

/// Builds `l − r ⋈ 0` constraints for a comparison atom under a polarity.
fn atom(
    op: SmtOp,
    left: &SmtExpr,
    right: &SmtExpr,
    negated: bool,
    sorts: &mut BTreeMap<Variable, SmtSort>,
) -> Nnf {
    let op = if negated {
        match op {
            SmtOp::Lt => SmtOp::Ge,
            SmtOp::Le => SmtOp::Gt,
            SmtOp::Gt => SmtOp::Le,
            SmtOp::Ge => SmtOp::Lt,
            SmtOp::Eq => SmtOp::Ne,
            SmtOp::Ne => SmtOp::Eq,
            other => other,
        }
    } else {
        op
    };
    let (l, r) = match (linearize(left, sorts), linearize(right, sorts)) {
        (Some(l), Some(r)) => (l, r),
        _ => return Nnf::Nonlinear,
    };
    let diff = l.sub(&r);
    let flipped = r.sub(&l);
    match op {
        SmtOp::Lt => Nnf::Atom(Box::new(Constraint { term: diff, strict: true })),
        SmtOp::Le => Nnf::Atom(Box::new(Constraint { term: diff, strict: false })),
        SmtOp::Gt => Nnf::Atom(Box::new(Constraint { term: flipped, strict: true })),
        SmtOp::Ge => Nnf::Atom(Box::new(Constraint { term: flipped, strict: false })),
        SmtOp::Eq => Nnf::Pair(
            Box::new(Constraint { term: diff, strict: false }),
            Box::new(Constraint { term: flipped, strict: false }),
        ),
        SmtOp::Ne => Nnf::Or(vec![
            Nnf::Atom(Box::new(Constraint { term: diff.clone(), strict: true })),
            Nnf::Atom(Box::new(Constraint { term: flipped, strict: true })),
        ]),
        _ => Nnf::Nonlinear,
    }
}

fn to_nnf(e: &SmtExpr, negated: bool, sorts: &mut BTreeMap<Variable, SmtSort>) -> Nnf {
    match e {
        SmtExpr::Bool(b) => Nnf::Bool(*b != negated),
        SmtExpr::Not(inner) => to_nnf(inner, !negated, sorts),
        SmtExpr::Binary { op, left, right } if op.is_comparison() => {
            atom(*op, left, right, negated, sorts)
        }
        SmtExpr::Binary { op: SmtOp::And, left, right } => {
            let l = to_nnf(left, negated, sorts);
            let r = to_nnf(right, negated, sorts);
            if negated {
                Nnf::Or(vec![l, r])
            } else {
                Nnf::And(vec![l, r])
            }
        }
        SmtExpr::Binary { op: SmtOp::Or, left, right } => {
            let l = to_nnf(left, negated, sorts);
            let r = to_nnf(right, negated, sorts);
            if negated {
                Nnf::And(vec![l, r])
            } else {
                Nnf::Or(vec![l, r])
            }
        }
        // arithmetic in boolean position
        _ => Nnf::Nonlinear,
    }
}

/// A conjunction of constraints, or unknown due to a nonlinear atom.
enum Disjunct {
    Linear(Vec<Constraint>),
    Unknown,
    False,
}

fn dnf(e: &Nnf) -> Vec<Disjunct> {
    match e {
        Nnf::Bool(true) => vec![Disjunct::Linear(Vec::new())],
        Nnf::Bool(false) => vec![Disjunct::False],
        Nnf::Atom(c) => vec![Disjunct::Linear(vec![(**c).clone()])],
        Nnf::Pair(a, b) => vec![Disjunct::Linear(vec![(**a).clone(), (**b).clone()])],
        Nnf::Nonlinear => vec![Disjunct::Unknown],
        Nnf::Or(xs) => {
            let mut out = Vec::new();
            for x in xs {
                out.extend(dnf(x));
                if out.len() > MAX_DISJUNCTS {
                    return vec![Disjunct::Unknown];
                }
            }
            out
        }
        Nnf::And(xs) => {
            let mut acc = vec![Disjunct::Linear(Vec::new())];
            for x in xs {
                let child = dnf(x);
                let mut next = Vec::new();
                for a in &acc {
                    for b in &child {
                        next.push(match (a, b) {
                            (Disjunct::False, _) | (_, Disjunct::False) => Disjunct::False,
                            (Disjunct::Unknown, _) | (_, Disjunct::Unknown) => Disjunct::Unknown,
                            (Disjunct::Linear(xs), Disjunct::Linear(ys)) => {
                                let mut cs = xs.clone();
                                cs.extend(ys.iter().cloned());
                                Disjunct::Linear(cs)
                            }
                        });
                        if next.len() > MAX_DISJUNCTS {
                            return vec![Disjunct::Unknown];
                        }
                    }
                }
                acc = next;
            }
            acc
        }
    }
}

/// One elimination step, kept for model reconstruction.
struct Elimination {
    var: Variable,
    /// `(rest, coeff > 0, strict)` with meaning `var ≥ eval(rest) / coeff`.
    lowers: Vec<(LinTerm, Rational, bool)>,
    /// `(rest, coeff > 0, strict)` with meaning `var ≤ −eval(rest) / coeff`.
    uppers: Vec<(LinTerm, Rational, bool)>,
}

fn fourier_motzkin(
    mut constraints: Vec<Constraint>,
    sorts: &BTreeMap<Variable, SmtSort>,
) -> Option<Vec<Elimination>> {
    // integer tightening where sound
    for c in constraints.iter_mut() {
        let all_int = c
            .term
            .coeffs
            .keys()
            .all(|v| sorts.get(v) == Some(&SmtSort::Int));
        if all_int && !c.term.coeffs.is_empty() {
            c.tighten_int();
        }
    }

    let vars: BTreeSet<Variable> = constraints
        .iter()
        .flat_map(|c| c.term.coeffs.keys().copied())
        .collect();

    let mut steps = Vec::new();
    for var in vars {
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        let mut rest_constraints = Vec::new();
        for c in &constraints {
            let a = c.term.coeff(var);
            if a.is_zero() {
                rest_constraints.push(c.clone());
            } else if a.is_positive() {
                // a·var + rest ≤ 0  ⇔  var ≤ −rest/a
                uppers.push((c.term.without(var), a, c.strict));
            } else {
                // a·var + rest ≤ 0, a < 0  ⇔  var ≥ rest/(−a)
                lowers.push((c.term.without(var), -a, c.strict));
            }
        }
        // combine each lower with each upper:
        // rest_l/b ≤ var ≤ −rest_u/a  ⇒  a·rest_l + b·rest_u ≤ 0
        for (rest_l, b, strict_l) in &lowers {
            for (rest_u, a, strict_u) in &uppers {
                let term = rest_l.scale(a).add(&rest_u.scale(b));
                let mut combined = Constraint {
                    term,
                    strict: *strict_l || *strict_u,
                };
                let all_int = combined
                    .term
                    .coeffs
                    .keys()
                    .all(|v| sorts.get(v) == Some(&SmtSort::Int));
                if all_int && !combined.term.coeffs.is_empty() {
                    combined.tighten_int();
                }
                if combined.term.is_constant() {
                    if !combined.holds_constant() {
                        return None;
                    }
                } else {
                    rest_constraints.push(combined);
                }
            }
        }
        steps.push(Elimination { var, lowers, uppers });
        constraints = rest_constraints;

        for c in &constraints {
            if c.term.is_constant() && !c.holds_constant() {
                return None;
            }
        }
    }

    for c in &constraints {
        debug_assert!(c.term.is_constant());
        if !c.holds_constant() {
            return None;
        }
    }
    Some(steps)
}

fn reconstruct_model(
    steps: &[Elimination],
    sorts: &BTreeMap<Variable, SmtSort>,
    original: &[Constraint],
) -> Option<Model> {
    let mut model = Model::new();
    for step in steps.iter().rev() {
        let mut lower: Option<(Rational, bool)> = None;
        for (rest, b, strict) in &step.lowers {
            let value = rest.eval(&model)? / b;
            let better = match &lower {
                None => true,
                Some((current, _)) => value > *current,
            };
            if better {
                lower = Some((value, *strict));
            }
        }
        let mut upper: Option<(Rational, bool)> = None;
        for (rest, a, strict) in &step.uppers {
            let value = -(rest.eval(&model)?) / a;
            let better = match &upper {
                None => true,
                Some((current, _)) => value < *current,
            };
            if better {
                upper = Some((value, *strict));
            }
        }
        let value = pick_value(&lower, &upper, sorts.get(&step.var) == Some(&SmtSort::Int));
        model.set(step.var, value);
    }
    // only hand out verified models
    for c in original {
        let v = c.term.eval(&model)?;
        let ok = if c.strict {
            v.is_negative()
        } else {
            !v.is_positive()
        };
        if !ok {
            trace!("discarding unverified model candidate");
            return None;
        }
    }
    Some(model)
}

fn pick_value(
    lower: &Option<(Rational, bool)>,
    upper: &Option<(Rational, bool)>,
    is_int: bool,
) -> Rational {
    match (lower, upper) {
        (None, None) => Rational::zero(),
        (Some((l, strict)), None) => {
            if is_int {
                int_above(l, *strict)
            } else if *strict {
                l + Rational::one()
            } else {
                l.clone()
            }
        }
        (None, Some((u, strict))) => {
            if is_int {
                int_below(u, *strict)
            } else if *strict {
                u - Rational::one()
            } else {
                u.clone()
            }
        }
        (Some((l, sl)), Some((u, su))) => {
            if is_int {
                let lo = int_above(l, *sl);
                if &lo <= u {
                    lo
                } else {
                    int_below(u, *su)
                }
            } else if l == u {
                l.clone()
            } else {
                (l + u) / Rational::from_integer(BigInt::from(2))
            }
        }
    }
}

fn int_above(l: &Rational, strict: bool) -> Rational {
    let c = l.ceil();
    if strict && &c == l {
        c + Rational::one()
    } else {
        c
    }
}

fn int_below(u: &Rational, strict: bool) -> Rational {
    let f = u.floor();
    if strict && &f == u {
        f - Rational::one()
    } else {
        f
    }
}

/// The built-in linear-arithmetic solver.
pub struct LinearSolver {
    frames: Vec<Vec<SmtExpr>>,
    model: Option<Model>,
}

impl LinearSolver {
    /// A fresh solver with one open frame and no assertions.
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
            model: None,
        }
    }
}

impl Default for LinearSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for LinearSolver {
    fn add(&mut self, e: SmtExpr) {
        self.model = None;
        self.frames
            .last_mut()
            .expect("solver always has a base frame")
            .push(e);
    }

    fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
            self.model = None;
        }
    }

    fn check(&mut self) -> SmtResult {
        let mut sorts = BTreeMap::new();
        let parts: Vec<Nnf> = self
            .frames
            .iter()
            .flatten()
            .map(|e| to_nnf(e, false, &mut sorts))
            .collect();
        let disjuncts = dnf(&Nnf::And(parts));

        let mut any_unknown = false;
        for d in &disjuncts {
            match d {
                Disjunct::False => {}
                Disjunct::Unknown => any_unknown = true,
                Disjunct::Linear(constraints) => {
                    if let Some(steps) = fourier_motzkin(constraints.clone(), &sorts) {
                        self.model = reconstruct_model(&steps, &sorts, constraints);
                        return SmtResult::Sat;
                    }
                }
            }
        }
        if any_unknown {
            SmtResult::Unknown
        } else {
            SmtResult::Unsat
        }
    }

    fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    fn set_timeout(&mut self, _millis: u64) {
        // the procedure is exact and fast on the fragments the engine emits
    }
}

/// Factory for [`LinearSolver`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearFactory;

impl SolverFactory for LinearFactory {
    type Solver = LinearSolver;

    fn solver(&self) -> LinearSolver {
        LinearSolver::new()
    }
}

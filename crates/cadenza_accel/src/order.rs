//! Dependency ordering of updated variables.
//!
//! The recurrence driver solves one scalar recurrence per updated variable
//! and substitutes earlier solutions into later right-hand sides, so it
//! needs an order in which every right-hand side only mentions updated
//! variables that come earlier (self-references are fine). The core pass is
//! a fixpoint; when it gets stuck on mutually dependent variables, a
//! one-shot heuristic tries to equate them.

use std::collections::BTreeSet;

use cadenza_base::Variable;
use cadenza_term::{Expr, Guard, Rel, Subs};

use crate::rule::Update;

/// Successively schedules variables whose dependencies are all scheduled.
/// Stops when no further variable can be added: either everything is
/// scheduled or the remaining variables depend on each other.
fn order_until_conflict(
    update: &Update,
    ordering: &mut Vec<Variable>,
    ordered: &mut BTreeSet<Variable>,
) {
    let mut changed = true;
    while changed && ordering.len() < update.len() {
        changed = false;
        for (v, rhs) in update.iter() {
            if ordered.contains(v) {
                continue;
            }
            let ready = rhs
                .vars()
                .into_iter()
                .all(|dep| dep == *v || !update.contains(dep) || ordered.contains(&dep));
            if ready {
                ordered.insert(*v);
                ordering.push(*v);
                changed = true;
            }
        }
    }
}

/// Finds a dependency order, or `None` when the update has a genuine cycle.
pub fn find_order(update: &Update) -> Option<Vec<Variable>> {
    let mut ordering = Vec::new();
    let mut ordered = BTreeSet::new();
    order_until_conflict(update, &mut ordering, &mut ordered);
    if ordering.len() == update.len() {
        Some(ordering)
    } else {
        None
    }
}

/// Like [`find_order`], but with a one-shot repair for conflicts.
///
/// When variables depend on each other, one of them is chosen as the
/// representative: every other conflicting variable is equated with it
/// (the equations go into the guard) and substituted away in the remaining
/// right-hand sides. This is only sound when all rewritten right-hand sides
/// literally coincide afterwards — e.g. `A' = A + B, B' = A + B` under
/// `A = B` — so the repair gives up otherwise.
///
/// On success the update and guard are modified in place and the complete
/// order is returned.
pub fn find_order_with_heuristic(update: &mut Update, guard: &mut Guard) -> Option<Vec<Variable>> {
    let mut ordering = Vec::new();
    let mut ordered = BTreeSet::new();
    order_until_conflict(update, &mut ordering, &mut ordered);

    if ordering.len() == update.len() {
        return Some(ordering);
    }

    // Pick a representative among the conflicting variables.
    let target = update
        .domain()
        .find(|v| !ordered.contains(v))
        .expect("conflict implies an unordered variable");
    let target_rhs = update.get(target).expect("target is updated").clone();

    // Equate every remaining conflicting variable with the representative.
    let mut sigma = Subs::new();
    for v in update.domain().collect::<Vec<_>>() {
        if ordered.contains(&v) || v == target {
            continue;
        }
        sigma.insert(v, Expr::var(target));
        guard.push(Rel::eq(Expr::var(v), Expr::var(target)));
    }

    // Substitute and check that all conflicting right-hand sides coincide;
    // A' = B + 1, B' = A + 2 under A = B would not, and must be rejected.
    let rewritten_target = target_rhs.subs(&sigma);
    let mut rewritten = update.clone();
    for (v, rhs) in rewritten.iter_mut() {
        if ordered.contains(v) {
            continue;
        }
        *rhs = rhs.subs(&sigma);
        if !rhs.equals(&rewritten_target) {
            return None;
        }
    }
    *update = rewritten;

    order_until_conflict(update, &mut ordering, &mut ordered);
    debug_assert_eq!(ordering.len(), update.len());
    Some(ordering)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_base::VariableManager;

    fn vars3() -> (VariableManager, Variable, Variable, Variable) {
        let mut vars = VariableManager::new();
        let a = vars.add_program_var("a");
        let b = vars.add_program_var("b");
        let c = vars.add_program_var("c");
        (vars, a, b, c)
    }

    #[test]
    fn independent_updates_order_trivially() {
        let (_, a, b, _) = vars3();
        let mut update = Update::new();
        update.insert(a, Expr::var(a) + Expr::int(1));
        update.insert(b, Expr::var(b) - Expr::int(2));
        let order = find_order(&update).unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn chains_are_ordered_topologically() {
        let (_, a, b, c) = vars3();
        // a' = a + b, b' = b + c, c' = c + 1
        let mut update = Update::new();
        update.insert(a, Expr::var(a) + Expr::var(b));
        update.insert(b, Expr::var(b) + Expr::var(c));
        update.insert(c, Expr::var(c) + Expr::int(1));
        let order = find_order(&update).unwrap();
        let pos = |v: Variable| order.iter().position(|w| *w == v).unwrap();
        assert!(pos(c) < pos(b));
        assert!(pos(b) < pos(a));
    }

    #[test]
    fn cycles_have_no_order() {
        let (_, a, b, _) = vars3();
        let mut update = Update::new();
        update.insert(a, Expr::var(b));
        update.insert(b, Expr::var(a));
        assert!(find_order(&update).is_none());
    }

    #[test]
    fn heuristic_equates_coinciding_rhss() {
        let (_, a, b, _) = vars3();
        // a' = a + b, b' = a + b: equal after a = b
        let mut update = Update::new();
        update.insert(a, Expr::var(a) + Expr::var(b));
        update.insert(b, Expr::var(a) + Expr::var(b));
        let mut guard = Guard::new();
        let order = find_order_with_heuristic(&mut update, &mut guard).unwrap();
        assert_eq!(order.len(), 2);
        // side condition a == b was added
        assert_eq!(guard.len(), 1);
        assert!(guard.iter().next().unwrap().is_eq());
        // the rewritten right-hand sides no longer mention b
        assert!(!update.get(a).unwrap().has(b));
    }

    #[test]
    fn heuristic_rejects_diverging_rhss() {
        let (_, a, b, _) = vars3();
        // a' = b + 1, b' = a + 2: a == b does not make these equal
        let mut update = Update::new();
        update.insert(a, Expr::var(b) + Expr::int(1));
        update.insert(b, Expr::var(a) + Expr::int(2));
        let mut guard = Guard::new();
        assert!(find_order_with_heuristic(&mut update, &mut guard).is_none());
    }
}

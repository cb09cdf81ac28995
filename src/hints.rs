//! User-extensible unification hints.
//!
//! A hint teaches the definitional checker how to solve an equation that is
//! stuck on two constant-headed terms, e.g. that `pow_fn n` and `monoid_pow`
//! unify once their carrier arguments do. Hints are declared as ordinary
//! definitions of a fixed shape and registered here by name, so the
//! persistent environment only ever stores `(name, priority)` pairs.
//!
//! A hint declaration's value must be a lambda telescope of pattern
//! variables over an application `unification_hint.mk lhs rhs a1 b1 ... ak bk`
//! where `lhs` and `rhs` are the two constant-headed patterns and the
//! trailing pairs are side constraints checked in order after the patterns
//! match.

use std::fmt;

use log::debug;

use crate::env::{Checker, Environment, Transparency};
use crate::expr::{LocalContext, Term, TermKind};
use crate::mctx::{MVarKind, MetavarContext};
use crate::util::Name;

/// The head constant of a hint declaration's value.
pub const HINT_MK: &str = "unification_hint.mk";

/// Errors from hint registration.
#[derive(Clone, Debug)]
pub enum HintError {
  /// The named declaration does not exist.
  Unknown(Name),
  /// The declaration's value does not have the hint shape.
  BadShape(Name, &'static str),
}

impl fmt::Display for HintError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HintError::Unknown(n) => write!(f, "unknown declaration '{n}'"),
      HintError::BadShape(n, why) => write!(f, "invalid unification hint '{n}': {why}"),
    }
  }
}

impl std::error::Error for HintError {}

/// A validated unification hint. Bound variables in `lhs`, `rhs` and the
/// constraints are pattern variables, instantiated with fresh metavariables
/// at application time.
#[derive(Clone, Debug)]
pub struct UnificationHint {
  /// The declaration the hint came from.
  pub decl: Name,
  /// Higher priorities are tried first.
  pub priority: u32,
  /// Pattern variable types, in telescope order.
  binders: Vec<Term>,
  lhs: Term,
  rhs: Term,
  constraints: Vec<(Term, Term)>,
}

impl UnificationHint {
  /// The number of pattern variables.
  #[must_use]
  pub fn num_vars(&self) -> usize { self.binders.len() }
}

fn head_name(t: &Term, decl: &Name, side: &'static str) -> Result<Name, HintError> {
  t.head_const().cloned().ok_or(HintError::BadShape(decl.clone(), side))
}

/// The registry of unification hints, keyed by the (unordered) pair of head
/// constants. No finer index is kept: the checker unifies up to reduction,
/// so any syntactic filter over the patterns can drop applicable hints.
#[derive(Clone, Debug, Default)]
pub struct HintDb {
  buckets: im::HashMap<(Name, Name), im::Vector<UnificationHint>>,
}

impl HintDb {
  /// An empty registry.
  #[must_use]
  pub fn new() -> HintDb { HintDb::default() }

  /// Validate the declaration `decl` as a hint and register it at the given
  /// priority.
  pub fn add(&mut self, env: &dyn Environment, decl: &Name, priority: u32)
      -> Result<(), HintError> {
    let d = env.find(decl).ok_or_else(|| HintError::Unknown(decl.clone()))?;
    let Some(mut val) = d.value else {
      return Err(HintError::BadShape(decl.clone(), "declaration has no value"))
    };
    let mut binders = vec![];
    loop {
      let TermKind::Lam(b, body) = &*val else { break };
      let (ty, next) = (b.ty.clone(), body.clone());
      binders.push(ty);
      val = next;
    }
    let (head, args) = val.unapply();
    match &*head {
      TermKind::Const(n, _) if n.as_str() == HINT_MK => {}
      _ => return Err(HintError::BadShape(decl.clone(), "value must be a 'unification_hint.mk' application")),
    }
    if args.len() < 2 || (args.len() - 2) % 2 != 0 {
      return Err(HintError::BadShape(decl.clone(), "expected patterns and constraint pairs"))
    }
    let lhs = args[0].clone();
    let rhs = args[1].clone();
    let constraints =
      args[2..].chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect::<Vec<_>>();
    let k1 = head_name(&lhs, decl, "left pattern must be constant-headed")?;
    let k2 = head_name(&rhs, decl, "right pattern must be constant-headed")?;
    let hint = UnificationHint { decl: decl.clone(), priority, binders, lhs, rhs, constraints };
    let key = if k1 <= k2 { (k1, k2) } else { (k2, k1) };
    let bucket = self.buckets.entry(key).or_default();
    // stable order: higher priority first, ties by insertion
    let pos = bucket.iter().position(|h| h.priority < priority).unwrap_or(bucket.len());
    bucket.insert(pos, hint);
    Ok(())
  }

  /// The hints registered for the two head constants, in priority order.
  pub fn hints_for(&self, a: &Name, b: &Name) -> impl Iterator<Item = &UnificationHint> {
    let key = if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
    self.buckets.get(&key).into_iter().flatten()
  }

  /// Try to resolve the stuck equation `lhs =?= rhs`, where both sides are
  /// constant-headed. Hints for the head pair are tried in priority order;
  /// the first whose patterns and side constraints all unify wins, keeping
  /// its metavariable assignments. Failed attempts leave no trace.
  pub fn resolve_stuck(&self, env: &dyn Environment, ck: &dyn Checker,
      mctx: &mut MetavarContext, lctx: &LocalContext, lhs: &Term, rhs: &Term) -> bool {
    let (Some(h1), Some(h2)) = (lhs.head_const(), rhs.head_const()) else { return false };
    let (h1, h2) = (h1.clone(), h2.clone());
    for hint in self.hints_for(&h1, &h2) {
      let oriented = hint.lhs.head_const() == Some(&h1);
      let (a, b) = if oriented { (lhs, rhs) } else { (rhs, lhs) };
      if self.try_hint(hint, env, ck, mctx, lctx, a, b) {
        debug!("stuck equation {lhs} =?= {rhs} resolved by hint {}", hint.decl);
        return true
      }
    }
    false
  }

  fn try_hint(&self, hint: &UnificationHint, env: &dyn Environment, ck: &dyn Checker,
      mctx: &mut MetavarContext, lctx: &LocalContext, lhs: &Term, rhs: &Term) -> bool {
    let saved = mctx.clone();
    // pattern variables become fresh metavariables; subst is innermost first
    let mut subst: Vec<Term> = vec![];
    for ty in &hint.binders {
      let ty = ty.instantiate_vars(&subst);
      let m = mctx.mk_mvar(lctx.clone(), ty, MVarKind::Natural);
      subst.insert(0, Term::mvar(m));
    }
    let inst = |t: &Term| t.instantiate_vars(&subst);
    let tr = Transparency::Reducible;
    let ok = ck.is_def_eq(env, mctx, lctx, &inst(&hint.lhs), lhs, tr)
      && ck.is_def_eq(env, mctx, lctx, &inst(&hint.rhs), rhs, tr)
      && hint.constraints.iter().all(|(a, b)|
           ck.is_def_eq(env, mctx, lctx, &inst(a), &inst(b), tr));
    if !ok { *mctx = saved }
    ok
  }

  /// Is the registry empty?
  #[must_use]
  pub fn is_empty(&self) -> bool { self.buckets.is_empty() }
}

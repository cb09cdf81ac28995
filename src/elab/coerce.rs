//! Coercion insertion.
//!
//! [`Elaborator::ensure_has_type`] is the single choke point where an
//! elaborated term meets its expected type: definitional equality first,
//! then the decision coercion from propositions to `bool`, then a general
//! coercion through a `has_coe_t` instance. Class search needs closed types,
//! so when exactly one side still has metavariables a monad-shape heuristic
//! first unifies the inner type arguments and coerces between the closed
//! types that result. Every failure here is "no coercion"; nothing raises
//! except the final mismatch report.

use log::debug;

use crate::elab::{ElabError, ElabFlags, Elaborator, Result};
use crate::env::Transparency;
use crate::expr::{Term, TermKind};

/// The class used for general coercions.
pub const HAS_COE_T: &str = "has_coe_t";
/// The general coercion function.
pub const COE: &str = "coe";
/// The decidability class.
pub const DECIDABLE: &str = "decidable";
/// The decision coercion from `Prop` to `bool`.
pub const TO_BOOL: &str = "decidable.to_bool";
/// The booleans.
pub const BOOL: &str = "bool";

impl Elaborator<'_> {
  /// Check that `e` has type `expected`, inserting a coercion if necessary.
  /// Returns `e` or a coercion wrapped around it.
  pub(crate) fn ensure_has_type(&mut self, e: &Term, expected: &Term) -> Result<Term> {
    let inferred = self.infer_type(e)?;
    let snap = self.snapshot();
    if self.is_def_eq(&inferred, expected) {
      return Ok(e.clone())
    }
    self.restore(snap);
    let inferred = self.instantiate(&inferred);
    let expected = self.instantiate(expected);
    if self.flags.contains(ElabFlags::COERCE) {
      if let Some(r) = self.try_coercion(e, &inferred, &expected) {
        debug!("coerced {e} : {inferred} to {expected}");
        return Ok(r)
      }
    }
    Err(ElabError::type_mismatch(e.clone(), inferred, expected))
  }

  /// Try to coerce `e : inferred` to `expected`. `None` means no coercion
  /// applies; this never raises.
  fn try_coercion(&mut self, e: &Term, inferred: &Term, expected: &Term) -> Option<Term> {
    let (inferred, expected) = match (inferred.has_expr_mvar(), expected.has_expr_mvar()) {
      (false, false) => (inferred.clone(), expected.clone()),
      // with both sides open there is nothing to anchor a coercion search on
      (true, true) => return None,
      _ => self.close_monad_types(inferred, expected)?,
    };
    if let Some(r) = self.try_decision_coercion(e, &inferred, &expected) {
      return Some(r)
    }
    self.try_coe_instance(e, &inferred, &expected)
  }

  /// The `tactic name =?= solver ?a` heuristic: when both types are
  /// applications with metavariable-free heads and a bare metavariable as
  /// the inner argument on the open side, unifying the inner arguments can
  /// close both types, and the ordinary coercion ladder gets a second
  /// chance on the result. Returns the closed pair, or `None` when the
  /// heuristic does not apply.
  fn close_monad_types(&mut self, inferred: &Term, expected: &Term) -> Option<(Term, Term)> {
    let (TermKind::App(f1, a1), TermKind::App(f2, a2)) = (&**inferred, &**expected) else {
      return None
    };
    if f1.has_expr_mvar() || f2.has_expr_mvar() {
      return None
    }
    if !matches!(&**a1, TermKind::MVar(_)) && !matches!(&**a2, TermKind::MVar(_)) {
      return None
    }
    let (a1, a2) = (a1.clone(), a2.clone());
    let snap = self.snapshot();
    if !self.is_def_eq(&a1, &a2) {
      self.restore(snap);
      return None
    }
    let inferred = self.instantiate(inferred);
    let expected = self.instantiate(expected);
    if inferred.has_expr_mvar() || expected.has_expr_mvar() {
      self.restore(snap);
      return None
    }
    Some((inferred, expected))
  }

  /// Coerce a proposition to `bool` through its `decidable` instance.
  fn try_decision_coercion(&mut self, e: &Term, inferred: &Term, expected: &Term)
      -> Option<Term> {
    let inferred = self.whnf(inferred, Transparency::All);
    if !matches!(&*inferred, TermKind::Sort(l) if l.is_zero()) {
      return None
    }
    let expected = self.whnf(expected, Transparency::Definitions);
    if expected.head_const().is_none_or(|n| n.as_str() != BOOL) {
      return None
    }
    let class_ty = Term::const_(DECIDABLE, vec![]).apply([e.clone()]);
    let inst = self.find_instance(&class_ty)?;
    Some(Term::const_(TO_BOOL, vec![]).apply([e.clone(), inst]))
  }

  /// Coerce through a `has_coe_t inferred expected` instance.
  fn try_coe_instance(&mut self, e: &Term, inferred: &Term, expected: &Term) -> Option<Term> {
    let u = self.mctx.mk_level_mvar();
    let v = self.mctx.mk_level_mvar();
    let class_ty = Term::const_(HAS_COE_T, vec![u.clone(), v.clone()])
      .apply([inferred.clone(), expected.clone()]);
    let snap = self.snapshot();
    match self.find_instance(&class_ty) {
      Some(inst) => Some(Term::const_(COE, vec![u, v])
        .apply([inferred.clone(), expected.clone(), inst, e.clone()])),
      None => {
        self.restore(snap);
        None
      }
    }
  }
}

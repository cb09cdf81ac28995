//! Application elaboration.
//!
//! Constant-headed applications with a known expected type go through a
//! two-pass strategy: the first pass walks the function type filling
//! implicit and instance arguments with metavariables, postpones the
//! explicit arguments behind fresh metavariables, and unifies the result
//! type with the expected type; the second pass then elaborates the
//! postponed arguments left to right against domains that unification has
//! already refined. If the first pass fails the application is retried with
//! the plain one-pass elaborator, keeping the first failure as context.
//!
//! Overloaded heads are resolved by trying every candidate under a snapshot:
//! exactly one success commits, zero or several is an error.

use if_chain::if_chain;
use log::debug;

use crate::elab::{ElabError, ElabErrorKind, Elaborator, Result, Snapshot};
use crate::expr::{Binder, BinderInfo, ExtKind, Term, TermKind};
use crate::env::Transparency;
use crate::mctx::MVarKind;

/// Marker for optional parameters: `opt_param ty default`.
pub const OPT_PARAM: &str = "opt_param";
/// Marker for tactic-synthesized parameters: `auto_param ty tac`.
pub const AUTO_PARAM: &str = "auto_param";

/// How binder annotations are interpreted at an application site.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ArgMask {
  /// Respect the annotations.
  Default,
  /// `@f`: every binder is explicit.
  AllExplicit,
}

fn as_marker(t: &Term, marker: &str) -> Option<(Term, Term)> {
  let (head, args) = t.unapply();
  if_chain! {
    if let TermKind::Const(n, _) = &*head;
    if n.as_str() == marker;
    if args.len() == 2;
    then { Some((args[0].clone(), args[1].clone())) }
    else { None }
  }
}

struct FirstPassInfo {
  /// Every argument of the final application, in order. Postponed explicit
  /// arguments are represented by their placeholder metavariables.
  new_args: Vec<Term>,
  /// `(index into new_args, surface argument, domain)` for each postponed
  /// explicit argument.
  postponed: Vec<(usize, Term, Term)>,
  /// Instance metavariables created along the way, retried between
  /// second-pass positions.
  instances: Vec<Term>,
}

/// Outcome of one overload trial round.
enum RoundOutcome {
  Resolved(Term),
  NoneApply,
  Ambiguous(Vec<Term>),
}

impl Elaborator<'_> {
  /// Elaborate a term whose head position may be an application spine:
  /// constants, locals, applications, overloaded heads, and `@f` markers.
  pub(crate) fn visit_app_like(&mut self, t: &Term, expected: Option<&Term>) -> Result<Term> {
    let (head, args) = t.unapply();
    match &*head {
      TermKind::Ext(ExtKind::Choice, cands) => {
        let cands = cands.clone();
        self.visit_overloads(&cands, &args, expected)
      }
      TermKind::Ext(ExtKind::Explicit, inner) => {
        let f = inner[0].clone();
        let fn_e = self.visit_fn(&f)?;
        self.visit_base_app(&fn_e, ArgMask::AllExplicit, &args, expected)
      }
      TermKind::Ext(ExtKind::Hole, _) if !args.is_empty() =>
        Err(ElabError::new(
          "placeholders cannot be used as functions, the function must be known")),
      _ => {
        let fn_e = self.visit_fn(&head)?;
        if_chain! {
          if let TermKind::Const(n, _) = &*fn_e;
          if self.co.env.is_eliminator(n);
          if let Some(exp) = expected;
          if let Some(info) = self.elim_info(n);
          then {
            let exp = exp.clone();
            let snap = self.snapshot();
            match self.try_elim_app(&fn_e, &info, &args, &exp)? {
              Some(r) => return Ok(r),
              None => self.restore(snap),
            }
          }
        }
        self.visit_base_app(&fn_e, ArgMask::Default, &args, expected)
      }
    }
  }

  fn visit_fn(&mut self, f: &Term) -> Result<Term> {
    match &**f {
      TermKind::Const(n, ls) => self.visit_const(n, ls),
      TermKind::Local(_) | TermKind::MVar(_) => Ok(f.clone()),
      TermKind::Ext(ExtKind::Hole, _) =>
        Err(ElabError::new(
          "placeholders cannot be used as functions, the function must be known")),
      _ => self.visit(f, None),
    }
  }

  /// Reduce a function type to a Pi. A metavariable head is solved into a
  /// fresh non-dependent function type so elaboration can keep walking.
  pub(crate) fn whnf_pi(&mut self, ty: &Term) -> Term {
    let ty = self.instantiate(ty);
    let w = self.whnf(&ty, Transparency::Definitions);
    if let TermKind::Pi(..) = &*w { return w }
    if let TermKind::MVar(_) = &*w {
      let dom = self.mk_type_mvar();
      let cod = self.mk_type_mvar();
      let pi = Term::pi(Binder::new("a", dom), cod);
      if self.is_def_eq(&w, &pi) { return pi }
    }
    w
  }

  fn strip_param_markers(&mut self, ty: &Term) -> Term {
    let t = self.instantiate(ty);
    if let Some((t, _)) = as_marker(&t, OPT_PARAM) { return t }
    if let Some((t, _)) = as_marker(&t, AUTO_PARAM) { return t }
    t
  }

  /// When the arguments have run out, an optional or auto param domain
  /// still produces an argument: its declared default, or a metavariable
  /// discharged by the declared tactic.
  fn fill_default_param(&mut self, dom: &Term) -> Option<Term> {
    let dom = self.instantiate(dom);
    if let Some((_, v)) = as_marker(&dom, OPT_PARAM) { return Some(v) }
    if let Some((t, tac)) = as_marker(&dom, AUTO_PARAM) {
      let id = self.mctx.mk_mvar(self.lctx.clone(), t, MVarKind::Natural);
      self.tactic_worklist.push((id, tac));
      return Some(Term::mvar(id))
    }
    None
  }

  pub(crate) fn visit_base_app(&mut self, fn_e: &Term, mask: ArgMask, args: &[Term],
      expected: Option<&Term>) -> Result<Term> {
    if let Some(exp) = expected {
      // with no arguments there is nothing to postpone, and the simple
      // path gives the better mismatch report
      if mask == ArgMask::Default && !args.is_empty()
        && fn_e.head_const().is_some_and(|n| self.co.env.uses_expected_type(n)) {
        let exp = exp.clone();
        let snap = self.snapshot();
        // only the first pass is speculative; once it commits, argument
        // errors are reported at their positions, not retried
        let info = match self.without_recovery(|el| el.first_pass(fn_e, args, &exp)) {
          Ok(info) => info,
          Err(e) if e.recoverable() => {
            debug!("first pass failed, retrying without expected type: {e}");
            self.restore(snap);
            return match self.visit_base_app_simple(fn_e, mask, args, expected) {
              Ok(r) => Ok(r),
              Err(e2) => Err(ElabError::nested(
                format!("elaboration of application failed (the expected-type-directed pass \
                         failed with: {e})"), e2)),
            }
          }
          Err(e) => return Err(e),
        };
        return self.second_pass(fn_e, info)
      }
    }
    self.visit_base_app_simple(fn_e, mask, args, expected)
  }

  /// First pass of the two-pass strategy: walk the function type, fill
  /// non-explicit binders with metavariables, postpone explicit arguments
  /// (except as-is ones, which are checked eagerly), then unify the result
  /// type with the expected type.
  fn first_pass(&mut self, fn_e: &Term, args: &[Term], expected: &Term)
      -> Result<FirstPassInfo> {
    let mut ty = self.infer_type(fn_e)?;
    let mut info = FirstPassInfo { new_args: vec![], postponed: vec![], instances: vec![] };
    let mut i = 0;
    loop {
      ty = self.whnf_pi(&ty);
      let TermKind::Pi(b, cod) = &*ty else { break };
      let (b, cod) = (b.clone(), cod.clone());
      let has_args = i < args.len();
      let arg = match b.info {
        BinderInfo::InstImplicit => {
          let m = self.mk_instance_mvar(b.ty.clone());
          info.instances.push(m.clone());
          m
        }
        BinderInfo::Implicit => self.mk_mvar_term(b.ty.clone(), MVarKind::Natural),
        BinderInfo::StrictImplicit if has_args =>
          self.mk_mvar_term(b.ty.clone(), MVarKind::Natural),
        BinderInfo::StrictImplicit => break,
        BinderInfo::Default => {
          if !has_args {
            match self.fill_default_param(&b.ty) {
              Some(v) => v,
              None => break,
            }
          } else {
            let dom = self.strip_param_markers(&b.ty);
            let arg = &args[i];
            i += 1;
            if let TermKind::Ext(ExtKind::AsIs | ExtKind::Sorry, _) = &**arg {
              // already elaborated: check it now, it cannot benefit from
              // postponement
              let arg_e = self.visit(arg, Some(&dom))?;
              self.ensure_has_type(&arg_e, &dom)?
            } else {
              let m = self.mk_mvar_term(dom.clone(), MVarKind::Natural);
              info.postponed.push((info.new_args.len(), arg.clone(), dom));
              m
            }
          }
        }
      };
      info.new_args.push(arg.clone());
      ty = cod.instantiate(&arg);
    }
    if i < args.len() {
      return Err(ElabError::new(format!(
        "too many arguments to {fn_e}, term has type\n  {}", self.instantiate(&ty))))
    }
    let result_ty = self.instantiate(&ty);
    if !self.is_def_eq(&result_ty, expected) {
      let partial = fn_e.clone().apply(info.new_args.iter().cloned());
      return Err(ElabError::type_mismatch(partial,
        self.instantiate(&result_ty), self.instantiate(expected)))
    }
    Ok(info)
  }

  /// Second pass: elaborate the postponed arguments left to right against
  /// their (now refined) domains, and retry instance metavariables that
  /// become ready in between.
  fn second_pass(&mut self, fn_e: &Term, info: FirstPassInfo) -> Result<Term> {
    let FirstPassInfo { mut new_args, postponed, instances } = info;
    for (idx, arg, dom) in postponed {
      let dom = self.instantiate(&dom);
      let arg_e = self.visit(&arg, Some(&dom))?;
      let arg_e = self.ensure_has_type(&arg_e, &dom)?;
      let m = new_args[idx].clone();
      if let TermKind::MVar(mid) = &*m {
        if self.mctx.is_assigned(*mid) {
          // unification with the expected type already determined this
          // argument; the elaborated one must agree
          let cur = self.instantiate(&m);
          if !self.is_def_eq(&arg_e, &cur) {
            return Err(ElabError::new(format!(
              "argument {arg_e} does not agree with {cur}, the value determined by the \
               expected type")))
          }
        } else {
          self.mctx.assign(*mid, arg_e.clone())?;
        }
      }
      new_args[idx] = arg_e;
      for inst in &instances {
        if let TermKind::MVar(im) = &**inst {
          if !self.mctx.is_assigned(*im) && self.instance_ready(*im) {
            match self.try_synth_instance(*im) {
              Ok(()) => {}
              // not found yet: the worklist retries after more unification
              Err(e) if e.recoverable() => {}
              Err(e) => return Err(e),
            }
          }
        }
      }
    }
    Ok(fn_e.clone().apply(new_args))
  }

  /// The plain one-pass elaborator: arguments are visited eagerly against
  /// the current domain, and the expected type is enforced at the end.
  pub(crate) fn visit_base_app_simple(&mut self, fn_e: &Term, mask: ArgMask, args: &[Term],
      expected: Option<&Term>) -> Result<Term> {
    let mut r = fn_e.clone();
    let mut ty = self.infer_type(fn_e)?;
    let mut i = 0;
    loop {
      let ty_before = self.instantiate(&ty);
      ty = self.whnf_pi(&ty);
      let TermKind::Pi(b, cod) = &*ty else {
        if i < args.len() {
          // report the type before whnf, which is usually more readable
          return Err(ElabError::new(format!(
            "function expected at\n  {r}\nterm has type\n  {ty_before}")))
        }
        break
      };
      let (b, cod) = (b.clone(), cod.clone());
      let explicit = mask == ArgMask::AllExplicit || b.info.is_explicit();
      let arg = if explicit {
        if i >= args.len() {
          match self.fill_default_param(&b.ty) {
            Some(v) => v,
            None => break,
          }
        } else {
          let dom = self.strip_param_markers(&b.ty);
          let arg = &args[i];
          i += 1;
          if b.info == BinderInfo::InstImplicit
              && matches!(&**arg, TermKind::Ext(ExtKind::Hole, _)) {
            // under `@f`, a `_` in an instance position still goes through
            // class resolution
            self.mk_instance_mvar(dom)
          } else {
            let arg_e = self.visit(arg, Some(&dom))?;
            self.ensure_has_type(&arg_e, &dom)?
          }
        }
      } else if b.info == BinderInfo::InstImplicit {
        self.mk_instance_mvar(b.ty.clone())
      } else if b.info == BinderInfo::StrictImplicit && i >= args.len() {
        break
      } else {
        self.mk_mvar_term(b.ty.clone(), MVarKind::Natural)
      };
      r = Term::app(r, arg.clone());
      ty = cod.instantiate(&arg);
    }
    match expected {
      Some(exp) => self.ensure_has_type(&r, exp),
      None => Ok(r),
    }
  }

  /// Resolve an overloaded application. Candidates are tried under
  /// snapshots, first propagating the expected type and then (if nothing
  /// succeeded) without propagation, coercing afterwards. Exactly one
  /// success commits its snapshot.
  pub(crate) fn visit_overloads(&mut self, cands: &[Term], args: &[Term],
      expected: Option<&Term>) -> Result<Term> {
    for c in cands {
      if let TermKind::Const(n, _) = &**c.get_app_fn() {
        if self.co.env.is_eliminator(n) {
          return Err(ElabError::new(format!(
            "invalid overloaded symbol: '{n}' is elaborated using its expected type and \
             cannot be an overload candidate")))
        }
      }
    }
    let start = self.snapshot();
    let mut failures = vec![];
    let first = self.overload_round(cands, args, expected, true, &mut failures)?;
    if let RoundOutcome::Resolved(r) = first { return Ok(r) }
    // expected-type-directed resolution has priority but not final
    // authority: an ambiguous or empty round is retried without
    // propagation before an error is declared
    if expected.is_some() {
      let mut retry_failures = vec![];
      match self.overload_round(cands, args, expected, false, &mut retry_failures)? {
        RoundOutcome::Resolved(r) => return Ok(r),
        RoundOutcome::Ambiguous(ts) => {
          self.restore(start);
          return Err(ElabError { kind: ElabErrorKind::AmbiguousOverload(ts) })
        }
        RoundOutcome::NoneApply => failures = retry_failures,
      }
    }
    self.restore(start);
    match first {
      RoundOutcome::Ambiguous(ts) =>
        Err(ElabError { kind: ElabErrorKind::AmbiguousOverload(ts) }),
      _ => Err(ElabError { kind: ElabErrorKind::NoOverloadApplies(failures) }),
    }
  }

  fn overload_round(&mut self, cands: &[Term], args: &[Term], expected: Option<&Term>,
      propagate: bool, failures: &mut Vec<(Term, ElabError)>) -> Result<RoundOutcome> {
    let start = self.snapshot();
    let mut successes: Vec<(Term, Snapshot)> = vec![];
    for c in cands {
      self.restore(start.clone());
      let app = c.clone().apply(args.iter().cloned());
      let attempt = self.without_recovery(|el| {
        if propagate {
          el.visit_app_like(&app, expected)
        } else {
          let r = el.visit_app_like(&app, None)?;
          match expected {
            Some(exp) => el.ensure_has_type(&r, exp),
            None => Ok(r),
          }
        }
      });
      match attempt {
        Ok(r) => successes.push((r, self.snapshot())),
        Err(e) if e.recoverable() => failures.push((c.clone(), e)),
        Err(e) => return Err(e),
      }
    }
    if successes.len() == 1 {
      let (r, snap) = successes.remove(0);
      debug!("overload resolved to {r}");
      self.restore(snap);
      return Ok(RoundOutcome::Resolved(r))
    }
    self.restore(start);
    if successes.is_empty() {
      Ok(RoundOutcome::NoneApply)
    } else {
      Ok(RoundOutcome::Ambiguous(successes.into_iter().map(|(r, _)| r).collect()))
    }
  }
}

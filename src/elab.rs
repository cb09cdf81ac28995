//! The elaboration session.
//!
//! [`Elaborator::visit`] is the bidirectional entry point: it takes a surface
//! term and an optional expected type and produces a fully explicit term,
//! deferring class instances, numeral defaulting, and tactic blocks to
//! worklists that [`Elaborator::synthesize`] drains. Backtracking (overloads,
//! coercion attempts, unification hints) is done by [`Snapshot`] copy and
//! restore, never by unwinding.

pub mod app;
pub mod coerce;
pub mod elim;
pub mod extension;
pub mod worklist;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use itertools::Itertools;
use log::{debug, trace};

use crate::env::{CheckError, Checker, Declaration, Environment, EquationCompiler, InstanceSearch,
  StructureInfo, TacticEngine, Transparency};
use crate::expr::{Binder, BinderInfo, Level, LocalContext, LocalDecl, Term, TermKind};
use crate::mctx::{MVarKind, MetavarContext};
use crate::util::{BoxError, LocalId, MVarId, Name};

use self::elim::ElimInfo;

/// The result type for elaboration.
pub type Result<T, E = ElabError> = std::result::Result<T, E>;

/// An elaboration error.
#[derive(Debug)]
pub struct ElabError {
  /// The kind of error.
  pub kind: ElabErrorKind,
}

/// The different kinds of elaboration error. All are recoverable (reported
/// and replaced by a typed placeholder when recovery is on) except
/// [`Internal`](ElabErrorKind::Internal), which indicates a broken invariant
/// and always propagates.
#[derive(Debug)]
pub enum ElabErrorKind {
  /// A general error message.
  Msg(BoxError),
  /// A term's inferred type does not match (and cannot be coerced to) the
  /// expected type.
  TypeMismatch {
    /// The offending term.
    term: Term,
    /// Its inferred type.
    inferred: Term,
    /// The expected type.
    expected: Term,
  },
  /// A reference to a constant that is not in the environment.
  UnknownConstant(Name),
  /// More than one overload candidate elaborates successfully.
  AmbiguousOverload(Vec<Term>),
  /// No overload candidate elaborates; carries each candidate's failure.
  NoOverloadApplies(Vec<(Term, ElabError)>),
  /// A placeholder that synthesis could not determine.
  SynthFailed(MVarId, Term),
  /// An error with an outer context message attached.
  Nested(String, Box<ElabError>),
  /// A failure from the external checker.
  Check(CheckError),
  /// A broken internal invariant; never downgraded to a recoverable error.
  Internal(BoxError),
}

impl ElabError {
  /// A general error.
  pub fn new(msg: impl Into<BoxError>) -> ElabError {
    ElabError { kind: ElabErrorKind::Msg(msg.into()) }
  }
  /// An internal consistency error.
  pub fn internal(msg: impl Into<BoxError>) -> ElabError {
    ElabError { kind: ElabErrorKind::Internal(msg.into()) }
  }
  /// Attach an outer context message to an inner error.
  #[must_use]
  pub fn nested(msg: impl Into<String>, inner: ElabError) -> ElabError {
    ElabError { kind: ElabErrorKind::Nested(msg.into(), Box::new(inner)) }
  }
  /// A type mismatch.
  #[must_use]
  pub fn type_mismatch(term: Term, inferred: Term, expected: Term) -> ElabError {
    ElabError { kind: ElabErrorKind::TypeMismatch { term, inferred, expected } }
  }

  /// Can this error be recovered from by inserting a typed placeholder?
  #[must_use]
  pub fn recoverable(&self) -> bool {
    match &self.kind {
      ElabErrorKind::Internal(_) => false,
      ElabErrorKind::Nested(_, inner) => inner.recoverable(),
      _ => true,
    }
  }
}

impl fmt::Display for ElabError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      ElabErrorKind::Msg(e) => e.fmt(f),
      ElabErrorKind::TypeMismatch { term, inferred, expected } =>
        write!(f, "type mismatch at {term}\nhas type {inferred}\nexpected {expected}"),
      ElabErrorKind::UnknownConstant(n) => write!(f, "unknown constant '{n}'"),
      ElabErrorKind::AmbiguousOverload(ts) =>
        write!(f, "ambiguous overload, possible interpretations:\n  {}",
          ts.iter().format("\n  ")),
      ElabErrorKind::NoOverloadApplies(es) =>
        write!(f, "none of the overloads apply:\n  {}",
          es.iter().format_with("\n  ", |(t, e), f| f(&format_args!("{t}: {e}")))),
      ElabErrorKind::SynthFailed(m, ty) =>
        write!(f, "don't know how to synthesize placeholder {m} : {ty}"),
      ElabErrorKind::Nested(msg, inner) => write!(f, "{msg}\n{inner}"),
      ElabErrorKind::Check(e) => e.fmt(f),
      ElabErrorKind::Internal(e) => write!(f, "internal: {e}"),
    }
  }
}

impl std::error::Error for ElabError {}

impl From<CheckError> for ElabError {
  fn from(e: CheckError) -> ElabError { ElabError { kind: ElabErrorKind::Check(e) } }
}

impl From<crate::mctx::AssignError> for ElabError {
  fn from(e: crate::mctx::AssignError) -> ElabError { ElabError::internal(e.to_string()) }
}

bitflags! {
  /// Session mode flags.
  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  pub struct ElabFlags: u8 {
    /// Recover from recoverable errors by reporting a diagnostic and
    /// inserting a typed placeholder.
    const RECOVER = 1;
    /// Allow coercion insertion in `ensure_has_type`.
    const COERCE = 2;
    /// Elaborating the left-hand side of an equation.
    const IN_PATTERN = 4;
    /// Inside a quotation.
    const IN_QUOTE = 8;
  }
}

/// The external engines a session talks to.
#[derive(Copy, Clone)]
pub struct Collaborators<'a> {
  /// The declaration environment.
  pub env: &'a dyn Environment,
  /// The definitional checker.
  pub checker: &'a dyn Checker,
  /// Class instance search.
  pub instances: &'a dyn InstanceSearch,
  /// The tactic engine.
  pub tactics: &'a dyn TacticEngine,
  /// The pattern-match compiler.
  pub equations: &'a dyn EquationCompiler,
}

/// The base environment extended with declarations produced by tactics
/// during this session.
pub(crate) struct EnvWith<'a> {
  pub(crate) base: &'a dyn Environment,
  pub(crate) extra: &'a [Declaration],
}

impl Environment for EnvWith<'_> {
  fn find(&self, n: &Name) -> Option<Declaration> {
    self.extra.iter().rev().find(|d| &d.name == n).cloned().or_else(|| self.base.find(n))
  }
  fn is_eliminator(&self, n: &Name) -> bool { self.base.is_eliminator(n) }
  fn structure_info(&self, n: &Name) -> Option<StructureInfo> { self.base.structure_info(n) }
  fn class_out_params(&self, n: &Name) -> Vec<usize> { self.base.class_out_params(n) }
  fn uses_expected_type(&self, n: &Name) -> bool { self.base.uses_expected_type(n) }
}

/// A saved backtrack point. Restoring one is plain data assignment.
#[derive(Clone)]
pub struct Snapshot {
  mctx: MetavarContext,
  instances: Vec<MVarId>,
  numerals: Vec<Term>,
  tactics: Vec<(MVarId, Term)>,
  inaccessible: Vec<(MVarId, Term)>,
}

const MAX_DEPTH: u32 = 1024;

/// An elaboration session for one declaration.
pub struct Elaborator<'a> {
  pub(crate) co: Collaborators<'a>,
  /// The declaration being elaborated, for diagnostics.
  pub decl_name: Name,
  /// Session mode flags.
  pub flags: ElabFlags,
  /// The type given to numerals whose type is otherwise unconstrained.
  pub numeral_default: Name,
  pub(crate) mctx: MetavarContext,
  pub(crate) lctx: LocalContext,
  pub(crate) instance_worklist: Vec<MVarId>,
  pub(crate) numeral_worklist: Vec<Term>,
  pub(crate) tactic_worklist: Vec<(MVarId, Term)>,
  pub(crate) inaccessible_stack: Vec<(MVarId, Term)>,
  pub(crate) new_decls: Vec<Declaration>,
  pub(crate) elim_cache: HashMap<Name, Option<Rc<ElimInfo>>>,
  /// Diagnostics reported during recovery.
  pub errors: Vec<ElabError>,
  depth: u32,
}

impl<'a> Elaborator<'a> {
  /// Start a session for the declaration `decl_name`.
  pub fn new(co: Collaborators<'a>, decl_name: impl Into<Name>) -> Elaborator<'a> {
    Elaborator {
      co,
      decl_name: decl_name.into(),
      flags: ElabFlags::RECOVER | ElabFlags::COERCE,
      numeral_default: "nat".into(),
      mctx: MetavarContext::new(),
      lctx: LocalContext::new(),
      instance_worklist: vec![],
      numeral_worklist: vec![],
      tactic_worklist: vec![],
      inaccessible_stack: vec![],
      new_decls: vec![],
      elim_cache: HashMap::new(),
      errors: vec![],
      depth: 0,
    }
  }

  /// The session's metavariable context.
  #[must_use]
  pub fn mctx(&self) -> &MetavarContext { &self.mctx }

  /// The session's current local context.
  #[must_use]
  pub fn lctx(&self) -> &LocalContext { &self.lctx }

  /// Substitute current metavariable assignments into `t`.
  #[must_use]
  pub fn instantiate(&self, t: &Term) -> Term { self.mctx.instantiate_mvars(t) }

  /// Save a backtrack point.
  #[must_use]
  pub fn snapshot(&self) -> Snapshot {
    Snapshot {
      mctx: self.mctx.clone(),
      instances: self.instance_worklist.clone(),
      numerals: self.numeral_worklist.clone(),
      tactics: self.tactic_worklist.clone(),
      inaccessible: self.inaccessible_stack.clone(),
    }
  }

  /// Restore a backtrack point.
  pub fn restore(&mut self, s: Snapshot) {
    self.mctx = s.mctx;
    self.instance_worklist = s.instances;
    self.numeral_worklist = s.numerals;
    self.tactic_worklist = s.tactics;
    self.inaccessible_stack = s.inaccessible;
  }

  // collaborator shims; all of them see tactic-produced declarations

  pub(crate) fn whnf(&mut self, t: &Term, tr: Transparency) -> Term {
    let env = EnvWith { base: self.co.env, extra: &self.new_decls };
    self.co.checker.whnf(&env, &mut self.mctx, &self.lctx, t, tr)
  }

  pub(crate) fn infer_type(&mut self, t: &Term) -> Result<Term> {
    let env = EnvWith { base: self.co.env, extra: &self.new_decls };
    Ok(self.co.checker.infer_type(&env, &mut self.mctx, &self.lctx, t)?)
  }

  pub(crate) fn is_def_eq_tr(&mut self, a: &Term, b: &Term, tr: Transparency) -> bool {
    let env = EnvWith { base: self.co.env, extra: &self.new_decls };
    self.co.checker.is_def_eq(&env, &mut self.mctx, &self.lctx, a, b, tr)
  }

  pub(crate) fn is_def_eq(&mut self, a: &Term, b: &Term) -> bool {
    self.is_def_eq_tr(a, b, Transparency::Definitions)
  }

  /// Look up a declaration, seeing tactic-produced ones first.
  #[must_use]
  pub fn get_decl(&self, n: &Name) -> Option<Declaration> {
    self.new_decls.iter().rev().find(|d| &d.name == n).cloned()
      .or_else(|| self.co.env.find(n))
  }

  // metavariable and local creation

  pub(crate) fn mk_mvar_term(&mut self, ty: Term, kind: MVarKind) -> Term {
    Term::mvar(self.mctx.mk_mvar(self.lctx.clone(), ty, kind))
  }

  /// A fresh metavariable `?t : Sort ?u`, for types that are not yet known.
  pub(crate) fn mk_type_mvar(&mut self) -> Term {
    let u = self.mctx.mk_level_mvar();
    self.mk_mvar_term(Term::sort(u), MVarKind::Natural)
  }

  /// A fresh instance metavariable, registered on the instance worklist.
  pub(crate) fn mk_instance_mvar(&mut self, ty: Term) -> Term {
    let m = self.mctx.mk_mvar(self.lctx.clone(), ty, MVarKind::Instance);
    self.instance_worklist.push(m);
    Term::mvar(m)
  }

  /// Push a local declaration onto the current context.
  pub fn push_local(&mut self, name: Name, ty: Term, info: BinderInfo) -> LocalId {
    let id = self.mctx.fresh_local_id();
    self.lctx.push(LocalDecl { id, name, ty, value: None, info });
    id
  }

  pub(crate) fn push_let_local(&mut self, name: Name, ty: Term, value: Term) -> LocalId {
    let id = self.mctx.fresh_local_id();
    self.lctx.push(LocalDecl { id, name, ty, value: Some(value), info: BinderInfo::Default });
    id
  }

  /// A typed placeholder standing for a missing subterm.
  pub(crate) fn mk_sorry(&mut self, expected: Option<&Term>) -> Term {
    let ty = match expected {
      Some(t) => t.clone(),
      None => self.mk_type_mvar(),
    };
    Term::sorry(ty)
  }

  /// Record a diagnostic.
  pub fn report(&mut self, e: ElabError) {
    debug!("{}: {e}", self.decl_name);
    self.errors.push(e);
  }

  /// Recovery point: report recoverable errors and continue with a typed
  /// placeholder when recovery is enabled.
  pub(crate) fn recover(&mut self, e: ElabError, expected: Option<&Term>) -> Result<Term> {
    if self.flags.contains(ElabFlags::RECOVER) && e.recoverable() {
      self.report(e);
      Ok(self.mk_sorry(expected))
    } else {
      Err(e)
    }
  }

  /// Run `f` with error recovery disabled, so failures propagate to the
  /// caller (used for speculative branches that backtrack on failure).
  pub(crate) fn without_recovery<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
    let saved = self.flags;
    self.flags.remove(ElabFlags::RECOVER);
    let r = f(self);
    self.flags = saved;
    r
  }

  /// Elaborate `t` against the optional expected type. This is the main
  /// entry point; it is re-entrant and is also the recovery boundary.
  pub fn visit(&mut self, t: &Term, expected: Option<&Term>) -> Result<Term> {
    if self.depth >= MAX_DEPTH {
      return Err(ElabError::new("maximum elaboration depth exceeded"))
    }
    trace!("visit {t}");
    self.depth += 1;
    let r = self.visit_core(t, expected);
    self.depth -= 1;
    match r {
      Err(e) => self.recover(e, expected),
      ok => ok,
    }
  }

  fn visit_core(&mut self, t: &Term, expected: Option<&Term>) -> Result<Term> {
    match &**t {
      TermKind::Var(_) => Err(ElabError::internal("loose bound variable in input")),
      TermKind::Sort(l) => self.visit_sort(l, expected),
      TermKind::MVar(_) => Ok(t.clone()),
      TermKind::Lam(b, body) => self.visit_lambda(b, body, expected),
      TermKind::Pi(b, body) => self.visit_pi(b, body),
      TermKind::Let(n, ty, v, body) => self.visit_let(n, ty, v, body, expected),
      TermKind::Ext(k, args) => self.visit_ext(t, k, args, expected),
      TermKind::Const(..) | TermKind::Local(_) | TermKind::App(..) =>
        self.visit_app_like(t, expected),
    }
  }

  fn visit_sort(&mut self, l: &Level, expected: Option<&Term>) -> Result<Term> {
    let l = l.replace_holes(&mut |one| {
      if one { Level::one() } else { self.mctx.mk_level_mvar() }
    });
    let r = Term::sort(l);
    match expected {
      Some(exp) => self.ensure_has_type(&r, exp),
      None => Ok(r),
    }
  }

  /// Fill in missing universe level arguments of a constant reference with
  /// fresh level metavariables; extra levels are an error.
  pub(crate) fn visit_const(&mut self, n: &Name, levels: &[Level]) -> Result<Term> {
    let d = self.get_decl(n)
      .ok_or(ElabError { kind: ElabErrorKind::UnknownConstant(n.clone()) })?;
    if levels.len() > d.univ_params.len() {
      return Err(ElabError::new(format!(
        "too many universe levels for '{n}' (expected at most {})", d.univ_params.len())))
    }
    let mut ls: Vec<Level> = levels.iter().map(|l| l.replace_holes(&mut |one| {
      if one { Level::one() } else { self.mctx.mk_level_mvar() }
    })).collect();
    while ls.len() < d.univ_params.len() {
      ls.push(self.mctx.mk_level_mvar())
    }
    Ok(Term::const_(n.clone(), ls))
  }

  fn visit_lambda(&mut self, b: &Binder, body: &Term, expected: Option<&Term>) -> Result<Term> {
    let dom = self.visit(&b.ty, None)?;
    self.ensure_is_type(&dom)?;
    // best-effort propagation of the expected domain and codomain
    let mut body_expected = None;
    if let Some(exp) = expected {
      let exp = self.instantiate(exp);
      let exp = self.whnf(&exp, Transparency::Definitions);
      if let TermKind::Pi(eb, ebody) = &*exp {
        let _ = self.is_def_eq(&dom, &eb.ty);
        body_expected = Some(ebody.clone());
      }
    }
    let saved = self.lctx.clone();
    let id = self.push_local(b.name.clone(), dom.clone(), b.info);
    let x = Term::local(id);
    let bexp = body_expected.map(|e| e.instantiate(&x));
    let body_e = self.visit(&body.instantiate(&x), bexp.as_ref());
    self.lctx = saved;
    let body_e = body_e?;
    let r = Term::lam(
      Binder { name: b.name.clone(), ty: dom, info: b.info },
      body_e.abstract_local(id));
    match expected {
      Some(exp) => self.ensure_has_type(&r, exp),
      None => Ok(r),
    }
  }

  fn visit_pi(&mut self, b: &Binder, body: &Term) -> Result<Term> {
    let dom = self.visit(&b.ty, None)?;
    self.ensure_is_type(&dom)?;
    let saved = self.lctx.clone();
    let id = self.push_local(b.name.clone(), dom.clone(), b.info);
    let cod = self.visit(&body.instantiate(&Term::local(id)), None)
      .and_then(|cod| { self.ensure_is_type(&cod)?; Ok(cod) });
    self.lctx = saved;
    let cod = cod?;
    Ok(Term::pi(
      Binder { name: b.name.clone(), ty: dom, info: b.info },
      cod.abstract_local(id)))
  }

  fn visit_let(&mut self, n: &Name, ty: &Term, val: &Term, body: &Term,
      expected: Option<&Term>) -> Result<Term> {
    let ty_e = self.visit(ty, None)?;
    self.ensure_is_type(&ty_e)?;
    let val_e = self.visit(val, Some(&ty_e))?;
    let val_e = self.ensure_has_type(&val_e, &ty_e)?;
    let saved = self.lctx.clone();
    let id = self.push_let_local(n.clone(), ty_e.clone(), val_e.clone());
    let body_e = self.visit(&body.instantiate(&Term::local(id)), expected);
    self.lctx = saved;
    let body_e = body_e?;
    Ok(Term::let_(n.clone(), ty_e, val_e, body_e.abstract_local(id)))
  }

  /// Check that `t` is a type (its type is a sort).
  pub(crate) fn ensure_is_type(&mut self, t: &Term) -> Result<()> {
    let ty = self.infer_type(t)?;
    let ty = self.whnf(&ty, Transparency::All);
    match &*ty {
      TermKind::Sort(_) => Ok(()),
      TermKind::MVar(_) => {
        let u = self.mctx.mk_level_mvar();
        if self.is_def_eq(&ty, &Term::sort(u)) {
          Ok(())
        } else {
          Err(ElabError::new(format!("type expected at {t}")))
        }
      }
      _ => Err(ElabError::new(format!("type expected at {t}, found {ty}"))),
    }
  }

  /// Elaborate, drain all worklists, and instantiate. The result may not
  /// contain unassigned metavariables.
  pub fn strict_visit(&mut self, t: &Term, expected: Option<&Term>) -> Result<Term> {
    let r = self.visit(t, expected)?;
    self.synthesize()?;
    let r = self.instantiate(&r);
    if r.has_expr_mvar() {
      return Err(ElabError::new(format!("term contains unresolved placeholders: {r}")))
    }
    Ok(r)
  }

  /// Finish elaborating a definition body or type: drain the worklists,
  /// optionally require all metavariables assigned (replacing holdouts with
  /// reported placeholders under recovery), and promote surviving level
  /// metavariables to fresh universe parameters, which are returned.
  pub fn finalize(&mut self, t: &Term, check_unassigned: bool) -> Result<(Term, Vec<Name>)> {
    self.synthesize()?;
    let mut t = self.instantiate(t);
    if check_unassigned && t.has_expr_mvar() {
      t = self.replace_unassigned(&t)?;
    }
    let params = self.promote_level_mvars(&mut t)?;
    Ok((t, params))
  }

  /// Finish elaborating a theorem proof. The theorem's type fixes the
  /// universe parameter set, so a proof that still needs a fresh universe
  /// parameter is a fatal leak, not a recoverable error.
  pub fn finalize_proof(&mut self, proof: &Term) -> Result<Term> {
    self.synthesize()?;
    let mut t = self.instantiate(proof);
    if t.has_expr_mvar() {
      t = self.replace_unassigned(&t)?;
    }
    let mut mvars = vec![];
    t.collect_level_mvars(&mut mvars);
    if !mvars.is_empty() {
      return Err(ElabError::internal(format!(
        "proof of '{}' leaks universe metavariables; the statement fixes the universe parameters",
        self.decl_name)))
    }
    Ok(t)
  }

  fn replace_unassigned(&mut self, t: &Term) -> Result<Term> {
    if !self.flags.contains(ElabFlags::RECOVER) {
      return Err(ElabError::new(format!("term contains unresolved placeholders: {t}")))
    }
    let mctx = &self.mctx;
    let errors = &mut self.errors;
    Ok(t.replace(&mut |t2, _| match **t2 {
      TermKind::MVar(m) => {
        let ty = mctx.mvar_type(m);
        errors.push(ElabError { kind: ElabErrorKind::SynthFailed(m, ty.clone()) });
        Some(Term::sorry(ty))
      }
      _ => None,
    }))
  }

  fn promote_level_mvars(&mut self, t: &mut Term) -> Result<Vec<Name>> {
    let mut mvars = vec![];
    t.collect_level_mvars(&mut mvars);
    if mvars.is_empty() { return Ok(vec![]) }
    let mut used = vec![];
    t.collect_level_params(&mut used);
    let mut new_params = vec![];
    let mut i = 0_u32;
    for u in mvars {
      let name = loop {
        let n = Name::from(format!("u_{i}"));
        i += 1;
        if !used.contains(&n) { break n }
      };
      self.mctx.assign_lvl(u, Level::param(name.clone()))?;
      used.push(name.clone());
      new_params.push(name);
    }
    *t = self.instantiate(t);
    Ok(new_params)
  }
}

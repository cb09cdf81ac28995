//! Terms, universe levels, binders, and local contexts of the core calculus.
//!
//! Terms are immutable trees behind shared pointers, so cloning a [`Term`] is
//! a pointer copy. Free variables are [`TermKind::Local`] nodes holding only a
//! [`LocalId`]; their binder data lives in a [`LocalContext`]. Bound variables
//! are de Bruijn indices and only appear underneath a binder.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::util::{LVarId, LocalId, MVarId, Name};

/// A universe level expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Level(Rc<LevelKind>);

/// The different kinds of universe level expression.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum LevelKind {
  /// Universe 0, the level of `Prop`.
  Zero,
  /// The successor of a level.
  Succ(Level),
  /// The maximum of two levels.
  Max(Level, Level),
  /// `imax l1 l2`, which is `0` when `l2 = 0` and `max l1 l2` otherwise.
  IMax(Level, Level),
  /// A universe parameter of the enclosing declaration.
  Param(Name),
  /// A universe metavariable.
  MVar(LVarId),
  /// A pre-elaboration placeholder, replaced by a fresh level metavariable.
  Hole,
  /// A pre-elaboration placeholder standing for the literal level 1.
  HoleOne,
}

impl Deref for Level {
  type Target = LevelKind;
  fn deref(&self) -> &LevelKind { &self.0 }
}

impl Level {
  /// Level 0.
  #[must_use]
  pub fn zero() -> Level { Level(Rc::new(LevelKind::Zero)) }
  /// Level 1.
  #[must_use]
  pub fn one() -> Level { Level::zero().succ() }
  /// The successor of this level.
  #[must_use]
  pub fn succ(self) -> Level { Level(Rc::new(LevelKind::Succ(self))) }
  /// The maximum of two levels.
  #[must_use]
  pub fn max(a: Level, b: Level) -> Level { Level(Rc::new(LevelKind::Max(a, b))) }
  /// The impredicative maximum of two levels.
  #[must_use]
  pub fn imax(a: Level, b: Level) -> Level { Level(Rc::new(LevelKind::IMax(a, b))) }
  /// A universe parameter.
  #[must_use]
  pub fn param(n: Name) -> Level { Level(Rc::new(LevelKind::Param(n))) }
  /// A universe metavariable.
  #[must_use]
  pub fn mvar(u: LVarId) -> Level { Level(Rc::new(LevelKind::MVar(u))) }
  /// The generic placeholder.
  #[must_use]
  pub fn hole() -> Level { Level(Rc::new(LevelKind::Hole)) }
  /// The "literal one" placeholder.
  #[must_use]
  pub fn hole_one() -> Level { Level(Rc::new(LevelKind::HoleOne)) }

  /// Is this syntactically level 0?
  #[must_use]
  pub fn is_zero(&self) -> bool { matches!(**self, LevelKind::Zero) }

  /// `Some(l)` if `self` is syntactically `l + 1`.
  #[must_use]
  pub fn dec(&self) -> Option<Level> {
    if let LevelKind::Succ(l) = &**self { Some(l.clone()) } else { None }
  }

  /// Peel off successors: `(l + n)` becomes `(l, n)`.
  #[must_use]
  pub fn to_offset(&self) -> (&Level, u32) {
    let (mut l, mut n) = (self, 0);
    while let LevelKind::Succ(l2) = &**l { l = l2; n += 1 }
    (l, n)
  }

  /// Does a level metavariable occur in this level?
  #[must_use]
  pub fn has_mvar(&self) -> bool {
    match &**self {
      LevelKind::MVar(_) => true,
      LevelKind::Succ(l) => l.has_mvar(),
      LevelKind::Max(a, b) | LevelKind::IMax(a, b) => a.has_mvar() || b.has_mvar(),
      _ => false,
    }
  }

  /// Does a pre-elaboration placeholder occur in this level?
  #[must_use]
  pub fn has_placeholder(&self) -> bool {
    match &**self {
      LevelKind::Hole | LevelKind::HoleOne => true,
      LevelKind::Succ(l) => l.has_placeholder(),
      LevelKind::Max(a, b) | LevelKind::IMax(a, b) => a.has_placeholder() || b.has_placeholder(),
      _ => false,
    }
  }

  /// Replace placeholders. The argument to `f` is true for the
  /// "literal one" placeholder.
  pub fn replace_holes(&self, f: &mut impl FnMut(bool) -> Level) -> Level {
    match &**self {
      LevelKind::Hole => f(false),
      LevelKind::HoleOne => f(true),
      LevelKind::Succ(l) => l.replace_holes(f).succ(),
      LevelKind::Max(a, b) => Level::max(a.replace_holes(f), b.replace_holes(f)),
      LevelKind::IMax(a, b) => Level::imax(a.replace_holes(f), b.replace_holes(f)),
      _ => self.clone(),
    }
  }

  /// Replace level metavariables; `f` returning `None` leaves the
  /// metavariable in place.
  pub fn replace_mvars(&self, f: &mut impl FnMut(LVarId) -> Option<Level>) -> Level {
    match &**self {
      LevelKind::MVar(u) => f(*u).unwrap_or_else(|| self.clone()),
      LevelKind::Succ(l) => l.replace_mvars(f).succ(),
      LevelKind::Max(a, b) => Level::max(a.replace_mvars(f), b.replace_mvars(f)),
      LevelKind::IMax(a, b) => Level::imax(a.replace_mvars(f), b.replace_mvars(f)),
      _ => self.clone(),
    }
  }

  /// Substitute universe parameters pointwise. `params` and `levels` are
  /// parallel; parameters not listed are left alone.
  #[must_use]
  pub fn instantiate_params(&self, params: &[Name], levels: &[Level]) -> Level {
    match &**self {
      LevelKind::Param(n) => match params.iter().position(|p| p == n) {
        Some(i) => levels[i].clone(),
        None => self.clone(),
      },
      LevelKind::Succ(l) => l.instantiate_params(params, levels).succ(),
      LevelKind::Max(a, b) =>
        Level::max(a.instantiate_params(params, levels), b.instantiate_params(params, levels)),
      LevelKind::IMax(a, b) =>
        Level::imax(a.instantiate_params(params, levels), b.instantiate_params(params, levels)),
      _ => self.clone(),
    }
  }

  /// Collect the metavariables occurring in this level.
  pub fn collect_mvars(&self, out: &mut Vec<LVarId>) {
    match &**self {
      LevelKind::MVar(u) => if !out.contains(u) { out.push(*u) },
      LevelKind::Succ(l) => l.collect_mvars(out),
      LevelKind::Max(a, b) | LevelKind::IMax(a, b) => { a.collect_mvars(out); b.collect_mvars(out) }
      _ => {}
    }
  }

  /// Collect the parameter names occurring in this level.
  pub fn collect_params(&self, out: &mut Vec<Name>) {
    match &**self {
      LevelKind::Param(n) => if !out.contains(n) { out.push(n.clone()) },
      LevelKind::Succ(l) => l.collect_params(out),
      LevelKind::Max(a, b) | LevelKind::IMax(a, b) => { a.collect_params(out); b.collect_params(out) }
      _ => {}
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (base, n) = self.to_offset();
    match &**base {
      LevelKind::Zero => write!(f, "{n}"),
      LevelKind::Succ(_) => unreachable!(),
      LevelKind::Max(a, b) if n == 0 => write!(f, "(max {a} {b})"),
      LevelKind::IMax(a, b) if n == 0 => write!(f, "(imax {a} {b})"),
      LevelKind::Param(p) if n == 0 => write!(f, "{p}"),
      LevelKind::MVar(u) if n == 0 => write!(f, "{u}"),
      LevelKind::Hole if n == 0 => write!(f, "_"),
      LevelKind::HoleOne if n == 0 => write!(f, "_1"),
      _ => write!(f, "({base}+{n})"),
    }
  }
}

/// How an argument at a binder is supplied at application sites.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinderInfo {
  /// `(x : A)`, supplied explicitly.
  Default,
  /// `{x : A}`, filled in by unification.
  Implicit,
  /// `{{x : A}}`, filled in by unification but only while explicit
  /// arguments remain to be consumed.
  StrictImplicit,
  /// `[x : A]`, filled in by class instance search.
  InstImplicit,
}

impl BinderInfo {
  /// Is this an explicit binder?
  #[must_use]
  pub fn is_explicit(self) -> bool { matches!(self, BinderInfo::Default) }
}

/// Binder data shared by `Lam` and `Pi` nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Binder {
  /// The bound variable's display name.
  pub name: Name,
  /// The bound variable's type.
  pub ty: Term,
  /// The binder annotation.
  pub info: BinderInfo,
}

impl Binder {
  /// An explicit binder.
  #[must_use]
  pub fn new(name: impl Into<Name>, ty: Term) -> Binder {
    Binder { name: name.into(), ty, info: BinderInfo::Default }
  }
}

/// Surface-only constructs, which ride on [`TermKind::Ext`] nodes and are
/// eliminated by elaboration (except [`ExtKind::Sorry`], which survives as a
/// typed placeholder for a missing subterm).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExtKind {
  /// `_`: a hole to be filled by unification. No children.
  Hole,
  /// `(e : ty)`: type ascription. Children `[ty, e]`.
  Ascription,
  /// `⟨a, ...⟩`: constructor of the expected one-constructor type.
  /// Children are the constructor's explicit arguments.
  AnonCtor,
  /// `{ x := v, ... }` or `{ src with x := v, ... }`: structure instance
  /// notation. Children are the field values listed in `fields` order,
  /// followed by the source term if `has_source`.
  StructInst {
    /// The structure name, if written explicitly; otherwise resolved from
    /// the expected type.
    name: Option<Name>,
    /// The names of the fields provided.
    fields: Vec<Name>,
    /// Whether an update source (`{ src with ... }`) is present.
    has_source: bool,
  },
  /// A pattern-matching definition by equations; children are
  /// [`ExtKind::Equation`] nodes.
  Equations {
    /// Number of mutually defined functions.
    num_fns: usize,
  },
  /// One defining equation. Children `[lhs, rhs]`.
  Equation,
  /// `.(e)`: an inaccessible pattern annotation. Child `[e]`.
  Inaccessible,
  /// A subterm that is already elaborated and must be taken as is.
  AsIs,
  /// A quotation; children are visited but the node is preserved.
  Quote,
  /// A numeric literal, expanded into `zero`/`one`/`bit0`/`bit1`
  /// applications.
  Numeral(u128),
  /// An overloaded head; children are the candidate interpretations.
  Choice,
  /// `by tac`: a tactic block run during synthesis. Child `[tac]`.
  By,
  /// `@f`: use `f` with all binders explicit. Child `[f]`.
  Explicit,
  /// A typed placeholder standing for a missing or failed subterm.
  /// Child `[ty]`.
  Sorry,
}

/// A term of the core calculus, with surface extensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Term(Rc<TermKind>);

/// The different kinds of term.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum TermKind {
  /// A bound variable (de Bruijn index).
  Var(u32),
  /// A sort, `Sort l`.
  Sort(Level),
  /// A reference to a declaration, with universe level arguments.
  Const(Name, Vec<Level>),
  /// A free variable, declared in some [`LocalContext`].
  Local(LocalId),
  /// An application.
  App(Term, Term),
  /// A lambda abstraction.
  Lam(Binder, Term),
  /// A dependent function type.
  Pi(Binder, Term),
  /// A let binding: name, type, value, body.
  Let(Name, Term, Term, Term),
  /// A metavariable, declared in a
  /// [`MetavarContext`](crate::mctx::MetavarContext).
  MVar(MVarId),
  /// A surface extension node.
  Ext(ExtKind, Vec<Term>),
}

impl Deref for Term {
  type Target = TermKind;
  fn deref(&self) -> &TermKind { &self.0 }
}

impl Term {
  /// A bound variable.
  #[must_use]
  pub fn var(i: u32) -> Term { Term(Rc::new(TermKind::Var(i))) }
  /// A sort.
  #[must_use]
  pub fn sort(l: Level) -> Term { Term(Rc::new(TermKind::Sort(l))) }
  /// `Prop`, i.e. `Sort 0`.
  #[must_use]
  pub fn prop() -> Term { Term::sort(Level::zero()) }
  /// A constant with universe level arguments.
  #[must_use]
  pub fn const_(n: impl Into<Name>, ls: Vec<Level>) -> Term {
    Term(Rc::new(TermKind::Const(n.into(), ls)))
  }
  /// A free variable.
  #[must_use]
  pub fn local(id: LocalId) -> Term { Term(Rc::new(TermKind::Local(id))) }
  /// An application.
  #[must_use]
  pub fn app(f: Term, a: Term) -> Term { Term(Rc::new(TermKind::App(f, a))) }
  /// A lambda abstraction.
  #[must_use]
  pub fn lam(b: Binder, body: Term) -> Term { Term(Rc::new(TermKind::Lam(b, body))) }
  /// A dependent function type.
  #[must_use]
  pub fn pi(b: Binder, body: Term) -> Term { Term(Rc::new(TermKind::Pi(b, body))) }
  /// A let binding.
  #[must_use]
  pub fn let_(n: impl Into<Name>, ty: Term, val: Term, body: Term) -> Term {
    Term(Rc::new(TermKind::Let(n.into(), ty, val, body)))
  }
  /// A metavariable.
  #[must_use]
  pub fn mvar(m: MVarId) -> Term { Term(Rc::new(TermKind::MVar(m))) }
  /// An extension node.
  #[must_use]
  pub fn ext(k: ExtKind, args: Vec<Term>) -> Term { Term(Rc::new(TermKind::Ext(k, args))) }
  /// A hole, `_`.
  #[must_use]
  pub fn hole() -> Term { Term::ext(ExtKind::Hole, vec![]) }
  /// A typed placeholder.
  #[must_use]
  pub fn sorry(ty: Term) -> Term { Term::ext(ExtKind::Sorry, vec![ty]) }

  /// Apply this term to a sequence of arguments.
  #[must_use]
  pub fn apply(self, args: impl IntoIterator<Item = Term>) -> Term {
    args.into_iter().fold(self, Term::app)
  }

  /// The head of the application spine.
  #[must_use]
  pub fn get_app_fn(&self) -> &Term {
    let mut t = self;
    while let TermKind::App(f, _) = &**t { t = f }
    t
  }

  /// Decompose an application spine into head and arguments.
  #[must_use]
  pub fn unapply(&self) -> (Term, Vec<Term>) {
    let mut args = vec![];
    let mut t = self;
    while let TermKind::App(f, a) = &**t {
      args.push(a.clone());
      t = f;
    }
    args.reverse();
    (t.clone(), args)
  }

  /// The name of the head constant, if the spine head is a constant.
  #[must_use]
  pub fn head_const(&self) -> Option<&Name> {
    if let TermKind::Const(n, _) = &**self.get_app_fn() { Some(n) } else { None }
  }

  /// Top-down rebuilding traversal. `f` receives each subterm together with
  /// the number of binders above it; returning `Some` replaces the subterm
  /// without descending further.
  pub fn replace(&self, f: &mut impl FnMut(&Term, u32) -> Option<Term>) -> Term {
    self.replace_core(0, f)
  }

  fn replace_core(&self, d: u32, f: &mut impl FnMut(&Term, u32) -> Option<Term>) -> Term {
    if let Some(r) = f(self, d) { return r }
    match &**self {
      TermKind::App(g, a) => Term::app(g.replace_core(d, f), a.replace_core(d, f)),
      TermKind::Lam(b, e) => Term::lam(
        Binder { name: b.name.clone(), ty: b.ty.replace_core(d, f), info: b.info },
        e.replace_core(d + 1, f)),
      TermKind::Pi(b, e) => Term::pi(
        Binder { name: b.name.clone(), ty: b.ty.replace_core(d, f), info: b.info },
        e.replace_core(d + 1, f)),
      TermKind::Let(n, ty, v, e) => Term::let_(n.clone(),
        ty.replace_core(d, f), v.replace_core(d, f), e.replace_core(d + 1, f)),
      TermKind::Ext(k, args) =>
        Term::ext(k.clone(), args.iter().map(|a| a.replace_core(d, f)).collect()),
      _ => self.clone(),
    }
  }

  /// Short-circuiting subterm predicate.
  pub fn any(&self, f: &mut impl FnMut(&Term) -> bool) -> bool {
    if f(self) { return true }
    match &**self {
      TermKind::App(g, a) => g.any(f) || a.any(f),
      TermKind::Lam(b, e) | TermKind::Pi(b, e) => b.ty.any(f) || e.any(f),
      TermKind::Let(_, ty, v, e) => ty.any(f) || v.any(f) || e.any(f),
      TermKind::Ext(_, args) => args.iter().any(|a| a.any(f)),
      _ => false,
    }
  }

  /// Substitute the innermost bound variable of a binder body. The value
  /// must not contain loose bound variables.
  #[must_use]
  pub fn instantiate(&self, e: &Term) -> Term {
    self.replace(&mut |t, d| match **t {
      TermKind::Var(i) if i == d => Some(e.clone()),
      TermKind::Var(i) if i > d => Some(Term::var(i - 1)),
      _ => None,
    })
  }

  /// Substitute the `subst.len()` innermost bound variables at once, with
  /// `subst[0]` the innermost. Values must not contain loose bound
  /// variables.
  #[must_use]
  pub fn instantiate_vars(&self, subst: &[Term]) -> Term {
    let n = u32::try_from(subst.len()).unwrap_or(u32::MAX);
    self.replace(&mut |t, d| match **t {
      TermKind::Var(i) if i >= d && i < d + n => Some(subst[(i - d) as usize].clone()),
      TermKind::Var(i) if i >= d + n => Some(Term::var(i - n)),
      _ => None,
    })
  }

  /// Replace occurrences of the local `id` by the variable bound at the
  /// abstraction point, in preparation for wrapping in a binder.
  #[must_use]
  pub fn abstract_local(&self, id: LocalId) -> Term {
    self.replace(&mut |t, d| match **t {
      TermKind::Local(l) if l == id => Some(Term::var(d)),
      _ => None,
    })
  }

  /// Keyed abstraction: replace syntactic occurrences of `key` (which must
  /// not contain loose bound variables) by the variable bound at the
  /// abstraction point.
  #[must_use]
  pub fn abstract_term(&self, key: &Term) -> Term {
    self.replace(&mut |t, d| if t == key { Some(Term::var(d)) } else { None })
  }

  /// Substitute universe parameters throughout the term.
  #[must_use]
  pub fn instantiate_level_params(&self, params: &[Name], levels: &[Level]) -> Term {
    if params.is_empty() { return self.clone() }
    self.replace(&mut |t, _| match &**t {
      TermKind::Sort(l) => Some(Term::sort(l.instantiate_params(params, levels))),
      TermKind::Const(n, ls) => Some(Term::const_(n.clone(),
        ls.iter().map(|l| l.instantiate_params(params, levels)).collect())),
      _ => None,
    })
  }

  /// Does any metavariable node occur in this term? (Whether it is assigned
  /// is the metavariable context's concern.)
  #[must_use]
  pub fn has_expr_mvar(&self) -> bool {
    self.any(&mut |t| matches!(**t, TermKind::MVar(_)))
  }

  /// Does the metavariable `m` occur in this term?
  #[must_use]
  pub fn occurs_mvar(&self, m: MVarId) -> bool {
    self.any(&mut |t| matches!(**t, TermKind::MVar(m2) if m2 == m))
  }

  /// Does the local `id` occur in this term?
  #[must_use]
  pub fn has_local(&self, id: LocalId) -> bool {
    self.any(&mut |t| matches!(**t, TermKind::Local(l) if l == id))
  }

  /// Does a level metavariable occur in any `Sort` or `Const` level?
  #[must_use]
  pub fn has_level_mvar(&self) -> bool {
    self.any(&mut |t| match &**t {
      TermKind::Sort(l) => l.has_mvar(),
      TermKind::Const(_, ls) => ls.iter().any(Level::has_mvar),
      _ => false,
    })
  }

  /// Collect all level metavariables occurring in the term.
  pub fn collect_level_mvars(&self, out: &mut Vec<LVarId>) {
    self.any(&mut |t| {
      match &**t {
        TermKind::Sort(l) => l.collect_mvars(out),
        TermKind::Const(_, ls) => for l in ls { l.collect_mvars(out) },
        _ => {}
      }
      false
    });
  }

  /// Collect all universe parameter names occurring in the term.
  pub fn collect_level_params(&self, out: &mut Vec<Name>) {
    self.any(&mut |t| {
      match &**t {
        TermKind::Sort(l) => l.collect_params(out),
        TermKind::Const(_, ls) => for l in ls { l.collect_params(out) },
        _ => {}
      }
      false
    });
  }
}

impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &**self {
      TermKind::Var(i) => write!(f, "#{i}"),
      TermKind::Sort(l) if l.is_zero() => write!(f, "Prop"),
      TermKind::Sort(l) => write!(f, "Sort {l}"),
      TermKind::Const(n, ls) if ls.is_empty() => write!(f, "{n}"),
      TermKind::Const(n, ls) => {
        write!(f, "{n}.{{")?;
        for (i, l) in ls.iter().enumerate() {
          if i != 0 { write!(f, " ")? }
          write!(f, "{l}")?
        }
        write!(f, "}}")
      }
      TermKind::Local(id) => write!(f, "{id}"),
      TermKind::App(..) => {
        let (h, args) = self.unapply();
        write!(f, "({h}")?;
        for a in &args { write!(f, " {a}")? }
        write!(f, ")")
      }
      TermKind::Lam(b, e) => write!(f, "(fun ({} : {}) => {e})", b.name, b.ty),
      TermKind::Pi(b, e) => write!(f, "(Pi ({} : {}), {e})", b.name, b.ty),
      TermKind::Let(n, ty, v, e) => write!(f, "(let {n} : {ty} := {v} in {e})"),
      TermKind::MVar(m) => write!(f, "{m}"),
      TermKind::Ext(ExtKind::Hole, _) => write!(f, "_"),
      TermKind::Ext(ExtKind::Sorry, _) => write!(f, "sorry"),
      TermKind::Ext(ExtKind::Numeral(n), _) => write!(f, "{n}"),
      TermKind::Ext(k, args) => {
        write!(f, "({k:?}")?;
        for a in args { write!(f, " {a}")? }
        write!(f, ")")
      }
    }
  }
}

/// A local variable declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalDecl {
  /// The id that [`TermKind::Local`] nodes refer to.
  pub id: LocalId,
  /// The display name.
  pub name: Name,
  /// The variable's type.
  pub ty: Term,
  /// The definiens, for let-bound locals.
  pub value: Option<Term>,
  /// The binder annotation the variable was introduced with.
  pub info: BinderInfo,
}

/// An ordered sequence of local declarations. Backed by a persistent vector,
/// so extending a child scope shares structure with the parent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalContext {
  decls: im::Vector<LocalDecl>,
}

impl LocalContext {
  /// An empty context.
  #[must_use]
  pub fn new() -> LocalContext { LocalContext::default() }

  /// Append a declaration.
  pub fn push(&mut self, d: LocalDecl) { self.decls.push_back(d) }

  /// Look up a declaration by id.
  #[must_use]
  pub fn find(&self, id: LocalId) -> Option<&LocalDecl> {
    self.decls.iter().rev().find(|d| d.id == id)
  }

  /// The number of declarations.
  #[must_use]
  pub fn len(&self) -> usize { self.decls.len() }

  /// Is the context empty?
  #[must_use]
  pub fn is_empty(&self) -> bool { self.decls.is_empty() }

  /// Iterate over the declarations in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = &LocalDecl> { self.decls.iter() }
}

//! The metavariable context: declarations, assignments, and snapshots.
//!
//! All tables are persistent (`im`), so `Clone` on a [`MetavarContext`] is a
//! cheap structural-sharing copy. Backtracking is implemented by cloning the
//! context up front and assigning the clone back on failure; nothing here
//! unwinds.

use std::fmt;

use crate::expr::{Level, LocalContext, Term, TermKind};
use crate::util::{LVarId, LocalId, MVarId};

/// Why a metavariable was created. Instance metavariables are resolved by
/// class instance search; natural ones by unification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MVarKind {
  /// Resolved by unification.
  Natural,
  /// Resolved by class instance search.
  Instance,
}

/// A metavariable declaration: the context it may refer to and its type.
#[derive(Clone, Debug)]
pub struct MVarDecl {
  /// The metavariable's id.
  pub id: MVarId,
  /// The local context the metavariable was created in. An assignment may
  /// only mention these locals.
  pub lctx: LocalContext,
  /// The metavariable's type.
  pub ty: Term,
  /// How the metavariable is to be resolved.
  pub kind: MVarKind,
}

/// Errors from [`MetavarContext::assign`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssignError {
  /// The metavariable already has an assignment.
  AlreadyAssigned(MVarId),
  /// The metavariable occurs in its own prospective value.
  Cycle(MVarId),
}

impl fmt::Display for AssignError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AssignError::AlreadyAssigned(m) => write!(f, "{m} is already assigned"),
      AssignError::Cycle(m) => write!(f, "cyclic assignment of {m}"),
    }
  }
}

impl std::error::Error for AssignError {}

/// The session's metavariable state. A clone of this value is a complete
/// backtrack point.
#[derive(Clone, Debug, Default)]
pub struct MetavarContext {
  decls: im::Vector<MVarDecl>,
  assignments: im::HashMap<MVarId, Term>,
  num_lvl_mvars: u32,
  lvl_assignments: im::HashMap<LVarId, Level>,
  next_local: u32,
}

impl MetavarContext {
  /// An empty context.
  #[must_use]
  pub fn new() -> MetavarContext { MetavarContext::default() }

  /// Create a fresh metavariable of type `ty` in local context `lctx`.
  pub fn mk_mvar(&mut self, lctx: LocalContext, ty: Term, kind: MVarKind) -> MVarId {
    let id = MVarId(u32::try_from(self.decls.len()).unwrap_or(u32::MAX));
    self.decls.push_back(MVarDecl { id, lctx, ty, kind });
    id
  }

  /// Create a fresh universe level metavariable.
  pub fn mk_level_mvar(&mut self) -> Level {
    let id = LVarId(self.num_lvl_mvars);
    self.num_lvl_mvars += 1;
    Level::mvar(id)
  }

  /// Allocate a fresh local variable id.
  pub fn fresh_local_id(&mut self) -> LocalId {
    let id = LocalId(self.next_local);
    self.next_local += 1;
    id
  }

  /// The declaration of a metavariable created by this context.
  #[must_use]
  pub fn decl(&self, m: MVarId) -> &MVarDecl { &self.decls[m.0 as usize] }

  /// Iterate over all declarations.
  pub fn decls(&self) -> impl Iterator<Item = &MVarDecl> { self.decls.iter() }

  /// Does `m` have an assignment?
  #[must_use]
  pub fn is_assigned(&self, m: MVarId) -> bool { self.assignments.contains_key(&m) }

  /// The assignment of `m`, if any. The value may itself contain assigned
  /// metavariables; see [`instantiate_mvars`](Self::instantiate_mvars).
  #[must_use]
  pub fn get_assignment(&self, m: MVarId) -> Option<&Term> { self.assignments.get(&m) }

  /// Is `u` assigned?
  #[must_use]
  pub fn is_lvl_assigned(&self, u: LVarId) -> bool { self.lvl_assignments.contains_key(&u) }

  /// Assign `m := val`. Fails if `m` is already assigned or `m` occurs in
  /// `val` after instantiation. (Scope checking against the metavariable's
  /// local context is the checker's job.)
  pub fn assign(&mut self, m: MVarId, val: Term) -> Result<(), AssignError> {
    if self.is_assigned(m) { return Err(AssignError::AlreadyAssigned(m)) }
    let val = self.instantiate_mvars(&val);
    if val.occurs_mvar(m) { return Err(AssignError::Cycle(m)) }
    self.assignments.insert(m, val);
    Ok(())
  }

  /// Assign the level metavariable `u := l`.
  pub fn assign_lvl(&mut self, u: LVarId, l: Level) -> Result<(), AssignError> {
    if self.is_lvl_assigned(u) { return Err(AssignError::AlreadyAssigned(MVarId(u.0))) }
    let l = self.instantiate_level(&l);
    let mut occ = vec![];
    l.collect_mvars(&mut occ);
    if occ.contains(&u) { return Err(AssignError::Cycle(MVarId(u.0))) }
    self.lvl_assignments.insert(u, l);
    Ok(())
  }

  /// Substitute all metavariable assignments in `t`, transitively.
  #[must_use]
  pub fn instantiate_mvars(&self, t: &Term) -> Term {
    t.replace(&mut |t, _| match &**t {
      TermKind::MVar(m) => self.assignments.get(m).map(|v| self.instantiate_mvars(v)),
      TermKind::Sort(l) if l.has_mvar() => Some(Term::sort(self.instantiate_level(l))),
      TermKind::Const(n, ls) if ls.iter().any(Level::has_mvar) =>
        Some(Term::const_(n.clone(), ls.iter().map(|l| self.instantiate_level(l)).collect())),
      _ => None,
    })
  }

  /// Substitute all level metavariable assignments in `l`, transitively.
  #[must_use]
  pub fn instantiate_level(&self, l: &Level) -> Level {
    l.replace_mvars(&mut |u| self.lvl_assignments.get(&u).map(|x| self.instantiate_level(x)))
  }

  /// Does `t` contain a metavariable without an assignment, after
  /// instantiation?
  #[must_use]
  pub fn has_unassigned_mvar(&self, t: &Term) -> bool {
    self.instantiate_mvars(t).has_expr_mvar()
  }

  /// The type of `m` with current assignments substituted.
  #[must_use]
  pub fn mvar_type(&self, m: MVarId) -> Term {
    self.instantiate_mvars(&self.decl(m).ty)
  }
}

//! Interfaces to the external collaborators: the definitional checker, the
//! declaration environment, class instance search, the tactic engine, and
//! the equation compiler. The elaborator only ever talks to these traits;
//! the implementations live with the kernel.

use std::fmt;

use crate::expr::{BinderInfo, LocalContext, Term};
use crate::mctx::MetavarContext;
use crate::util::{BoxError, Name};

/// How far the checker may unfold definitions during `whnf` and `is_def_eq`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transparency {
  /// Unfold everything.
  All,
  /// Unfold definitions but not theorems or opaque constants.
  Definitions,
  /// Unfold only constants marked reducible.
  Reducible,
  /// Unfold nothing.
  Opaque,
}

/// A failure reported by the checker or environment.
#[derive(Debug)]
pub struct CheckError(pub BoxError);

impl CheckError {
  /// Build a check error from a message.
  pub fn new(msg: impl Into<BoxError>) -> CheckError { CheckError(msg.into()) }
}

impl fmt::Display for CheckError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

impl std::error::Error for CheckError {}

/// A declaration in the environment.
#[derive(Clone, Debug)]
pub struct Declaration {
  /// The declaration's name.
  pub name: Name,
  /// The universe parameters of the declaration.
  pub univ_params: Vec<Name>,
  /// The declared type.
  pub ty: Term,
  /// The value, for definitions; `None` for axioms and opaque constants.
  pub value: Option<Term>,
}

/// One field of a structure.
#[derive(Clone, Debug)]
pub struct FieldInfo {
  /// The field name (without the structure prefix).
  pub name: Name,
  /// The constructor binder annotation for the field.
  pub info: BinderInfo,
  /// A default value, if declared. Bound variables in the default refer to
  /// the constructor telescope prefix before this field, innermost first:
  /// `var(0)` is the immediately preceding field or parameter.
  pub default: Option<Term>,
}

/// Constructor and field data for a one-constructor inductive.
#[derive(Clone, Debug)]
pub struct StructureInfo {
  /// The structure's name.
  pub name: Name,
  /// The (single) constructor's name.
  pub ctor: Name,
  /// The number of parameters before the fields in the constructor
  /// telescope.
  pub num_params: usize,
  /// The fields, in telescope order.
  pub fields: Vec<FieldInfo>,
}

impl StructureInfo {
  /// Look up a field by name.
  #[must_use]
  pub fn field(&self, n: &Name) -> Option<(usize, &FieldInfo)> {
    self.fields.iter().enumerate().find(|(_, f)| &f.name == n)
  }
}

/// The declaration environment.
pub trait Environment {
  /// Look up a declaration by name.
  fn find(&self, n: &Name) -> Option<Declaration>;

  /// Look up a declaration, failing if it is absent.
  fn get(&self, n: &Name) -> Result<Declaration, CheckError> {
    self.find(n).ok_or_else(|| CheckError::new(format!("unknown declaration '{n}'")))
  }

  /// Is `n` a recursor opted in for expected-type-directed eliminator
  /// elaboration?
  fn is_eliminator(&self, n: &Name) -> bool { let _ = n; false }

  /// Structure data for `n`, if `n` is a one-constructor inductive.
  fn structure_info(&self, n: &Name) -> Option<StructureInfo> { let _ = n; None }

  /// The output-parameter positions of the class `n`. Instance search for a
  /// goal headed by `n` may proceed even when arguments in these positions
  /// are still metavariables.
  fn class_out_params(&self, n: &Name) -> Vec<usize> { let _ = n; vec![] }

  /// Whether applications headed by `n` use the expected-type-directed
  /// two-pass elaboration strategy.
  fn uses_expected_type(&self, n: &Name) -> bool { let _ = n; true }
}

/// The definitional checker. All three operations may assign metavariables
/// through the mutable context; `is_def_eq` answers by boolean and never
/// raises.
pub trait Checker {
  /// Infer the type of an elaborated term.
  fn infer_type(&self, env: &dyn Environment, mctx: &mut MetavarContext,
    lctx: &LocalContext, t: &Term) -> Result<Term, CheckError>;

  /// Reduce to weak head normal form, unfolding according to `tr`.
  fn whnf(&self, env: &dyn Environment, mctx: &mut MetavarContext,
    lctx: &LocalContext, t: &Term, tr: Transparency) -> Term;

  /// Definitional equality test. May assign metavariables on success.
  fn is_def_eq(&self, env: &dyn Environment, mctx: &mut MetavarContext,
    lctx: &LocalContext, a: &Term, b: &Term, tr: Transparency) -> bool;
}

/// Class instance search.
pub trait InstanceSearch {
  /// Search for an instance of the class application `class_ty`. Returns
  /// the instance term, or `None` if none is found. May assign
  /// metavariables occurring in `class_ty` on success.
  fn find_instance(&self, env: &dyn Environment, ck: &dyn Checker,
    mctx: &mut MetavarContext, lctx: &LocalContext, class_ty: &Term) -> Option<Term>;
}

/// The goal handed to a tactic block.
#[derive(Clone, Debug)]
pub struct ProofState {
  /// The local context of the goal.
  pub lctx: LocalContext,
  /// The goal type.
  pub goal: Term,
}

/// The outcome of running a tactic block.
#[derive(Debug)]
pub enum TacticResult {
  /// The tactic closed the goal.
  Success {
    /// The proof term, which must not contain metavariables.
    proof: Term,
    /// Declarations the tactic added to the environment; the session makes
    /// them visible to later lookups.
    new_decls: Vec<Declaration>,
  },
  /// The tactic failed with a message.
  Failure(String),
}

/// The tactic engine. Invocations are synchronous and may re-enter the
/// elaborator.
pub trait TacticEngine {
  /// Run the tactic `tactic` against the given goal.
  fn run(&self, env: &dyn Environment, mctx: &mut MetavarContext,
    tactic: &Term, state: ProofState) -> TacticResult;
}

/// The pattern-match compiler, which turns elaborated equations into a
/// kernel term.
pub trait EquationCompiler {
  /// Compile an elaborated [`ExtKind::Equations`](crate::expr::ExtKind)
  /// node.
  fn compile(&self, env: &dyn Environment, mctx: &mut MetavarContext,
    lctx: &LocalContext, eqns: &Term) -> Result<Term, BoxError>;
}

/// Instance search that never finds anything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoInstances;

impl InstanceSearch for NoInstances {
  fn find_instance(&self, _: &dyn Environment, _: &dyn Checker,
    _: &mut MetavarContext, _: &LocalContext, _: &Term) -> Option<Term> { None }
}

/// A tactic engine that fails every invocation.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoTactics;

impl TacticEngine for NoTactics {
  fn run(&self, _: &dyn Environment, _: &mut MetavarContext,
    _: &Term, _: ProofState) -> TacticResult {
    TacticResult::Failure("no tactic engine installed".into())
  }
}

/// An equation compiler that rejects every input.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoEquations;

impl EquationCompiler for NoEquations {
  fn compile(&self, _: &dyn Environment, _: &mut MetavarContext,
    _: &LocalContext, _: &Term) -> Result<Term, BoxError> {
    Err("no equation compiler installed".into())
  }
}

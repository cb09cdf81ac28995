//! The deferred synthesis worklists.
//!
//! Three kinds of work are postponed during `visit` and drained here:
//! numeral type defaulting, class instance metavariables, and tactic blocks.
//! Instances run as a fixpoint: an item is attempted once its type either
//! has no metavariables or has them only in class output-parameter
//! positions, and the loop stops when a full round makes no progress.

use log::debug;

use crate::elab::{ElabError, ElabFlags, Elaborator, EnvWith, Result};
use crate::env::{ProofState, TacticResult};
use crate::expr::{Term, TermKind};
use crate::util::MVarId;

impl Elaborator<'_> {
  /// Search for a class instance of `class_ty` in the current local
  /// context.
  pub(crate) fn find_instance(&mut self, class_ty: &Term) -> Option<Term> {
    let env = EnvWith { base: self.co.env, extra: &self.new_decls };
    self.co.instances.find_instance(&env, self.co.checker, &mut self.mctx, &self.lctx, class_ty)
  }

  /// Drain all three worklists. Tactic execution can create new instance
  /// obligations, so instances get a second pass.
  pub fn synthesize(&mut self) -> Result<()> {
    self.synthesize_numeral_types();
    self.synthesize_instances()?;
    self.synthesize_using_tactics()?;
    self.synthesize_instances()
  }

  /// Drain the numeral and instance worklists but leave tactic blocks
  /// pending, for positions that must not run tactics yet.
  pub fn synthesize_no_tactics(&mut self) -> Result<()> {
    self.synthesize_numeral_types();
    self.synthesize_instances()
  }

  /// Force the designated default type onto numerals whose type is still
  /// undetermined. Failure is reported, not fatal.
  pub(crate) fn synthesize_numeral_types(&mut self) {
    for ty in std::mem::take(&mut self.numeral_worklist) {
      let t = self.instantiate(&ty);
      if matches!(&*t, TermKind::MVar(_)) {
        debug!("defaulting numeral type {t} to {}", self.numeral_default);
        let default = Term::const_(self.numeral_default.clone(), vec![]);
        if !self.is_def_eq(&t, &default) {
          self.report(ElabError::new(format!(
            "failed to assign default type '{}' to numeral", self.numeral_default)));
        }
      }
    }
  }

  /// Is this instance metavariable ready for search? Yes when its type has
  /// no metavariables, or has them only in output-parameter positions of
  /// the class.
  pub(crate) fn instance_ready(&self, m: MVarId) -> bool {
    let ty = self.mctx.mvar_type(m);
    if !ty.has_expr_mvar() { return true }
    let (head, args) = ty.unapply();
    let TermKind::Const(c, _) = &*head else { return false };
    let outs = self.co.env.class_out_params(c);
    args.iter().enumerate().all(|(i, a)| !a.has_expr_mvar() || outs.contains(&i))
  }

  /// Fixpoint over the instance worklist. Unready holdouts stay pending and
  /// surface later as unassigned metavariables.
  pub(crate) fn synthesize_instances(&mut self) -> Result<()> {
    loop {
      let pending = std::mem::take(&mut self.instance_worklist);
      if pending.is_empty() { return Ok(()) }
      let mut progress = false;
      let mut postponed = vec![];
      for m in pending {
        if self.mctx.is_assigned(m) || self.instance_ready(m) {
          match self.try_synth_instance(m) {
            Ok(()) => progress = true,
            Err(e) if e.recoverable() && self.flags.contains(ElabFlags::RECOVER) => {
              self.report(e);
              if !self.mctx.is_assigned(m) {
                let ty = self.mctx.mvar_type(m);
                self.mctx.assign(m, Term::sorry(ty))?;
              }
              progress = true;
            }
            Err(e) => return Err(e),
          }
        } else {
          postponed.push(m)
        }
      }
      // searches may have queued new obligations while we iterated
      postponed.extend(std::mem::take(&mut self.instance_worklist));
      self.instance_worklist = postponed;
      if !progress { return Ok(()) }
    }
  }

  /// Run instance search for `m` in its own local context. When unification
  /// already assigned `m`, the found instance must be definitionally equal
  /// to the assignment; a mismatch is an internal consistency error.
  pub(crate) fn try_synth_instance(&mut self, m: MVarId) -> Result<()> {
    let decl = self.mctx.decl(m).clone();
    let ty = self.mctx.instantiate_mvars(&decl.ty);
    let saved = std::mem::replace(&mut self.lctx, decl.lctx);
    let inst = self.find_instance(&ty);
    self.lctx = saved;
    let Some(v) = inst else {
      return Err(ElabError::new(format!("failed to synthesize class instance\n  {ty}")))
    };
    debug!("instance {m} : {ty} := {v}");
    if self.mctx.is_assigned(m) {
      let cur = self.instantiate(&Term::mvar(m));
      if !self.is_def_eq(&v, &cur) {
        return Err(ElabError::internal(format!(
          "synthesized class instance is not definitionally equal to the inferred one\n  \
           synthesized: {v}\n  inferred: {cur}")))
      }
    } else {
      self.mctx.assign(m, v)?;
    }
    Ok(())
  }

  /// Run all pending tactic blocks, in registration order. Tactics run
  /// synchronously and may queue further blocks.
  pub(crate) fn synthesize_using_tactics(&mut self) -> Result<()> {
    while !self.tactic_worklist.is_empty() {
      let batch = std::mem::take(&mut self.tactic_worklist);
      for (m, tac) in batch {
        self.invoke_tactic(m, &tac)?;
      }
    }
    Ok(())
  }

  fn invoke_tactic(&mut self, m: MVarId, tactic: &Term) -> Result<()> {
    if self.mctx.is_assigned(m) { return Ok(()) }
    let decl = self.mctx.decl(m).clone();
    let goal = self.mctx.instantiate_mvars(&decl.ty);
    debug!("running tactic block for {m} : {goal}");
    let state = ProofState { lctx: decl.lctx, goal: goal.clone() };
    let res = {
      let env = EnvWith { base: self.co.env, extra: &self.new_decls };
      self.co.tactics.run(&env, &mut self.mctx, tactic, state)
    };
    match res {
      TacticResult::Success { proof, new_decls } => {
        self.new_decls.extend(new_decls);
        let proof = self.instantiate(&proof);
        if proof.has_expr_mvar() {
          self.tactic_failed(m, &goal,
            ElabError::new(format!("tactic produced a term with metavariables: {proof}")))
        } else {
          self.mctx.assign(m, proof)?;
          Ok(())
        }
      }
      TacticResult::Failure(msg) => self.tactic_failed(m, &goal, ElabError::new(msg)),
    }
  }

  fn tactic_failed(&mut self, m: MVarId, goal: &Term, e: ElabError) -> Result<()> {
    if self.flags.contains(ElabFlags::RECOVER) {
      self.report(e);
      if !self.mctx.is_assigned(m) {
        self.mctx.assign(m, Term::sorry(goal.clone()))?;
      }
      Ok(())
    } else {
      Err(e)
    }
  }
}

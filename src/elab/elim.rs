//! Expected-type-directed elaboration of eliminator applications.
//!
//! Recursors (and constants flagged to elaborate like them) have a motive
//! argument that plain unification almost never determines: it must be
//! computed by abstracting the expected type over the values of the "key"
//! arguments, the explicit positions whose values appear in the recursor's
//! conclusion. Key arguments are elaborated strictly first, the motive is
//! built from the (now metavariable-free) expected type, and the remaining
//! explicit arguments are elaborated afterwards against domains the motive
//! assignment has refined.

use log::debug;

use crate::elab::{ElabError, Elaborator, Result};
use crate::elab::app::ArgMask;
use crate::env::Transparency;
use crate::expr::{Binder, BinderInfo, Term, TermKind};
use crate::mctx::MVarKind;
use crate::util::{LocalId, Name};

/// Argument layout of an eliminator-like constant, computed once per name
/// from its declared type and cached on the session.
#[derive(Debug)]
pub struct ElimInfo {
  /// Number of binders in the telescope.
  pub arity: usize,
  /// Telescope position of the motive.
  pub motive: usize,
  /// Telescope positions of the motive's arguments in the conclusion, in
  /// application order.
  pub motive_params: Vec<usize>,
  /// Telescope positions of the key arguments: the explicit positions whose
  /// values determine the motive.
  pub keys: Vec<usize>,
}

impl Elaborator<'_> {
  /// Argument layout for the eliminator `n`, or `None` if its type does not
  /// have the expected shape. Results are cached.
  pub(crate) fn elim_info(&mut self, n: &Name) -> Option<std::rc::Rc<ElimInfo>> {
    if let Some(i) = self.elim_cache.get(n) { return i.clone() }
    let info = self.compute_elim_info(n).map(std::rc::Rc::new);
    self.elim_cache.insert(n.clone(), info.clone());
    info
  }

  fn compute_elim_info(&mut self, n: &Name) -> Option<ElimInfo> {
    let d = self.get_decl(n)?;
    let saved = self.lctx.clone();
    let mut ty = d.ty.clone();
    let mut locals: Vec<(LocalId, BinderInfo, Term)> = vec![];
    loop {
      let w = self.whnf(&ty, Transparency::Definitions);
      let TermKind::Pi(b, cod) = &*w else { ty = w; break };
      let (b, cod) = (b.clone(), cod.clone());
      let id = self.push_local(b.name.clone(), b.ty.clone(), b.info);
      locals.push((id, b.info, b.ty));
      ty = cod.instantiate(&Term::local(id));
    }
    let info = Self::elim_info_of_telescope(&locals, &ty);
    self.lctx = saved;
    info
  }

  /// The conclusion must be a telescope-bound local (the motive) applied to
  /// telescope-bound locals. A key is an explicit position whose local
  /// occurs in the conclusion arguments, or in the type of a key found
  /// further right.
  fn elim_info_of_telescope(locals: &[(LocalId, BinderInfo, Term)], concl: &Term)
      -> Option<ElimInfo> {
    let (head, args) = concl.unapply();
    let TermKind::Local(c) = &*head else { return None };
    let motive = locals.iter().position(|(id, ..)| id == c)?;
    let mut motive_params = vec![];
    let mut needed: Vec<LocalId> = vec![];
    for a in &args {
      let TermKind::Local(l) = &**a else { return None };
      let p = locals.iter().position(|(id, ..)| id == l)?;
      if motive_params.contains(&p) { return None }
      motive_params.push(p);
      needed.push(*l);
    }
    let mut keys = vec![];
    for (i, (id, info, lty)) in locals.iter().enumerate().rev() {
      if i == motive { continue }
      if info.is_explicit() && needed.contains(id) {
        keys.push(i);
        for (id2, ..) in locals {
          if lty.has_local(*id2) && !needed.contains(id2) {
            needed.push(*id2)
          }
        }
      }
    }
    if keys.is_empty() { return None }
    keys.reverse();
    Some(ElimInfo { arity: locals.len(), motive, motive_params, keys })
  }

  /// Elaborate an application of the eliminator `fn_e` given a known
  /// expected type. Returns `Ok(None)` when the strategy does not apply
  /// (the expected type still has metavariables, or the eliminator is
  /// under-applied); the caller then restores its snapshot and falls back
  /// to the plain path.
  pub(crate) fn try_elim_app(&mut self, fn_e: &Term, info: &ElimInfo, args: &[Term],
      expected: &Term) -> Result<Option<Term>> {
    let mut exp = self.instantiate(expected);
    if exp.has_expr_mvar() {
      self.synthesize_no_tactics()?;
      exp = self.instantiate(&exp);
      if exp.has_expr_mvar() { return Ok(None) }
    }
    debug!("eliminator application {fn_e}, motive from expected type {exp}");
    let mut ty = self.infer_type(fn_e)?;
    let mut new_args: Vec<Term> = vec![];
    let mut postponed: Vec<(usize, Term)> = vec![];
    let mut motive_mvar = None;
    let mut i = 0;
    for pos in 0..info.arity {
      ty = self.whnf_pi(&ty);
      let TermKind::Pi(b, cod) = &*ty else {
        return Err(ElabError::internal(format!(
          "eliminator {fn_e} has fewer binders than its computed arity")))
      };
      let (b, cod) = (b.clone(), cod.clone());
      let arg = if pos == info.motive {
        let m = self.mk_mvar_term(b.ty.clone(), MVarKind::Natural);
        motive_mvar = Some(m.clone());
        m
      } else if b.info.is_explicit() {
        if i >= args.len() { return Ok(None) }
        let a = &args[i];
        i += 1;
        if info.keys.contains(&pos) {
          let dom = self.instantiate(&b.ty);
          let a_e = self.visit(a, Some(&dom))?;
          let a_e = self.ensure_has_type(&a_e, &dom)?;
          self.key_value(&a_e)?
        } else {
          let m = self.mk_mvar_term(b.ty.clone(), MVarKind::Natural);
          postponed.push((new_args.len(), a.clone()));
          m
        }
      } else if b.info == BinderInfo::InstImplicit {
        self.mk_instance_mvar(b.ty.clone())
      } else {
        self.mk_mvar_term(b.ty.clone(), MVarKind::Natural)
      };
      new_args.push(arg.clone());
      ty = cod.instantiate(&arg);
    }
    let Some(mm) = motive_mvar else {
      return Err(ElabError::internal(format!("eliminator {fn_e} has no motive position")))
    };

    // the motive abstracts the expected type over the conclusion argument
    // values, which the key arguments must have determined by now
    let mut params = vec![];
    for &p in &info.motive_params {
      params.push(self.key_value(&new_args[p])?)
    }
    let mut motive = exp;
    for v in params.iter().rev() {
      let vty = self.infer_type(v)?;
      let vty = self.instantiate(&vty);
      motive = Term::lam(Binder::new("x", vty), motive.abstract_term(v));
    }
    if !self.is_def_eq(&mm, &motive) {
      return Err(ElabError::new(format!(
        "failed to elaborate eliminator application, the computed motive\n  {motive}\n\
         is not accepted by {fn_e}")))
    }

    for (idx, a) in postponed {
      let m = new_args[idx].clone();
      let dom = self.infer_type(&m)?;
      let dom = self.instantiate(&dom);
      let a_e = self.visit(&a, Some(&dom))?;
      let a_e = self.ensure_has_type(&a_e, &dom)?;
      if let TermKind::MVar(mid) = &*m {
        if self.mctx.is_assigned(*mid) {
          let cur = self.instantiate(&m);
          if !self.is_def_eq(&a_e, &cur) {
            return Err(ElabError::new(format!(
              "argument {a_e} does not agree with {cur}, the value determined by the motive")))
          }
        } else {
          self.mctx.assign(*mid, a_e.clone())?;
        }
      }
      new_args[idx] = a_e;
    }

    let r = fn_e.clone().apply(new_args);
    // arguments beyond the eliminator's own telescope
    if i < args.len() {
      let rest = args[i..].to_vec();
      return Ok(Some(self.visit_base_app_simple(&r, ArgMask::Default, &rest, None)?))
    }
    Ok(Some(r))
  }

  /// Instantiate a key or conclusion argument, synthesizing pending
  /// instances if needed; the value must come out metavariable-free.
  fn key_value(&mut self, t: &Term) -> Result<Term> {
    let mut v = self.instantiate(t);
    if v.has_expr_mvar() {
      self.synthesize_no_tactics()?;
      v = self.instantiate(&v);
      if v.has_expr_mvar() {
        return Err(ElabError::new(format!(
          "eliminator argument {v} contains unresolved placeholders, the motive cannot be \
           computed")))
      }
    }
    Ok(v)
  }
}

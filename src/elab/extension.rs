//! Elaboration of the surface-only constructs riding on
//! [`TermKind::Ext`] nodes: holes, ascriptions, numerals, anonymous
//! constructors, structure instances, equations, inaccessible patterns,
//! quotations, and tactic blocks.

use log::debug;

use crate::elab::{ElabError, ElabFlags, Elaborator, EnvWith, Result};
use crate::env::{StructureInfo, Transparency};
use crate::expr::{ExtKind, Level, Term, TermKind};
use crate::mctx::MVarKind;
use crate::util::Name;

const ZERO: &str = "zero";
const ONE: &str = "one";
const BIT0: &str = "bit0";
const BIT1: &str = "bit1";
const HAS_ZERO: &str = "has_zero";
const HAS_ONE: &str = "has_one";
const HAS_ADD: &str = "has_add";

impl Elaborator<'_> {
  pub(crate) fn visit_ext(&mut self, t: &Term, k: &ExtKind, args: &[Term],
      expected: Option<&Term>) -> Result<Term> {
    match k {
      ExtKind::Hole => {
        let ty = match expected {
          Some(e) => e.clone(),
          None => self.mk_type_mvar(),
        };
        Ok(self.mk_mvar_term(ty, MVarKind::Natural))
      }
      ExtKind::Sorry => {
        let ty = self.visit(&args[0], None)?;
        self.ensure_is_type(&ty)?;
        let r = Term::sorry(ty);
        match expected {
          Some(exp) => self.ensure_has_type(&r, exp),
          None => Ok(r),
        }
      }
      ExtKind::Ascription => self.visit_ascription(&args[0], &args[1], expected),
      ExtKind::AsIs => Ok(args[0].clone()),
      ExtKind::Quote => self.visit_quote(args),
      ExtKind::Numeral(n) => self.visit_numeral(*n, expected),
      ExtKind::AnonCtor => self.visit_anon_ctor(args, expected),
      ExtKind::StructInst { name, fields, has_source } =>
        self.visit_struct_inst(name.as_ref(), fields, *has_source, args, expected),
      ExtKind::Equations { num_fns } => self.visit_equations(*num_fns, args, expected),
      ExtKind::Equation =>
        Err(ElabError::internal("equation node outside an equations block")),
      ExtKind::Inaccessible => self.visit_inaccessible(&args[0], expected),
      ExtKind::By => self.visit_by(&args[0], expected),
      ExtKind::Choice | ExtKind::Explicit => self.visit_app_like(t, expected),
    }
  }

  /// `(e : ty)`: the ascribed type is elaborated first and pending
  /// instances are synthesized so the inner term sees as concrete a type
  /// as possible.
  fn visit_ascription(&mut self, ty: &Term, e: &Term, expected: Option<&Term>) -> Result<Term> {
    let ty_e = self.visit(ty, None)?;
    self.ensure_is_type(&ty_e)?;
    self.synthesize_no_tactics()?;
    let ty_i = self.instantiate(&ty_e);
    let e_e = self.visit(e, Some(&ty_i))?;
    let e_e = self.ensure_has_type(&e_e, &ty_i)?;
    match expected {
      Some(exp) => self.ensure_has_type(&e_e, exp),
      None => Ok(e_e),
    }
  }

  fn visit_quote(&mut self, args: &[Term]) -> Result<Term> {
    let saved = self.flags;
    self.flags.insert(ElabFlags::IN_QUOTE);
    let r: Result<Vec<Term>> = args.iter().map(|a| self.visit(a, None)).collect();
    self.flags = saved;
    Ok(Term::ext(ExtKind::Quote, r?))
  }

  /// Expand a numeral into `zero`/`one`/`bit0`/`bit1` applications over the
  /// expected type. If the type is still a metavariable it goes on the
  /// numeral worklist, to be defaulted if nothing else determines it.
  fn visit_numeral(&mut self, n: u128, expected: Option<&Term>) -> Result<Term> {
    let ty = match expected {
      Some(e) => self.instantiate(e),
      None => self.mk_type_mvar(),
    };
    if let TermKind::MVar(_) = &*ty {
      self.numeral_worklist.push(ty.clone());
    }
    let u = self.mctx.mk_level_mvar();
    Ok(self.mk_numeral(n, &ty, &u))
  }

  fn numeral_lit(&mut self, cname: &str, classes: &[&str], ty: &Term, u: &Level) -> Term {
    let mut args = vec![ty.clone()];
    for class in classes {
      let goal = Term::const_(*class, vec![u.clone()]).apply([ty.clone()]);
      args.push(self.mk_instance_mvar(goal));
    }
    Term::const_(cname, vec![u.clone()]).apply(args)
  }

  fn mk_numeral(&mut self, n: u128, ty: &Term, u: &Level) -> Term {
    if n == 0 {
      self.numeral_lit(ZERO, &[HAS_ZERO], ty, u)
    } else if n == 1 {
      self.numeral_lit(ONE, &[HAS_ONE], ty, u)
    } else if n % 2 == 0 {
      let rec = self.mk_numeral(n / 2, ty, u);
      self.numeral_lit(BIT0, &[HAS_ADD], ty, u).apply([rec])
    } else {
      let rec = self.mk_numeral(n / 2, ty, u);
      self.numeral_lit(BIT1, &[HAS_ONE, HAS_ADD], ty, u).apply([rec])
    }
  }

  /// `by tac`: record a goal metavariable and queue the tactic; it runs
  /// when the worklists are drained.
  fn visit_by(&mut self, tac: &Term, expected: Option<&Term>) -> Result<Term> {
    let ty = match expected {
      Some(e) => e.clone(),
      None => self.mk_type_mvar(),
    };
    let m = self.mctx.mk_mvar(self.lctx.clone(), ty, MVarKind::Natural);
    self.tactic_worklist.push((m, tac.clone()));
    Ok(Term::mvar(m))
  }

  /// `.(e)`: the value is not matched on; it must come out definitionally
  /// equal to whatever pattern matching determines for this position.
  fn visit_inaccessible(&mut self, e: &Term, expected: Option<&Term>) -> Result<Term> {
    if !self.flags.contains(ElabFlags::IN_PATTERN) {
      return Err(ElabError::new(
        "invalid inaccessible pattern, it may only occur in equation left-hand sides"))
    }
    let e_e = self.visit(e, expected)?;
    let ty = match expected {
      Some(t) => t.clone(),
      None => self.infer_type(&e_e)?,
    };
    let m = self.mctx.mk_mvar(self.lctx.clone(), ty, MVarKind::Natural);
    self.inaccessible_stack.push((m, e_e));
    Ok(Term::mvar(m))
  }

  /// `⟨a, ...⟩`: resolve the constructor from the expected type and
  /// re-elaborate as a constructor application. Surplus arguments are
  /// re-nested into a trailing anonymous constructor, for right-nested
  /// types like tuples.
  fn visit_anon_ctor(&mut self, args: &[Term], expected: Option<&Term>) -> Result<Term> {
    let Some(exp) = expected else {
      return Err(ElabError::new(
        "invalid anonymous constructor, the expected type must be known"))
    };
    let exp_i = self.instantiate(exp);
    let exp_w = self.whnf(&exp_i, Transparency::Definitions);
    let Some(head) = exp_w.head_const().cloned() else {
      return Err(ElabError::new(format!(
        "invalid anonymous constructor, expected type {exp_w} is not an inductive type")))
    };
    let Some(info) = self.co.env.structure_info(&head) else {
      return Err(ElabError::new(format!(
        "invalid anonymous constructor, '{head}' is not a one-constructor inductive type")))
    };
    let nexplicit = info.fields.iter().filter(|f| f.info.is_explicit()).count();
    let mut args = args.to_vec();
    if args.len() > nexplicit && nexplicit > 0 {
      let rest = args.split_off(nexplicit - 1);
      args.push(Term::ext(ExtKind::AnonCtor, rest));
    }
    let app = Term::const_(info.ctor, vec![]).apply(args);
    self.visit(&app, expected)
  }

  /// `{ x := v, ... }` / `{ src with x := v, ... }`: walk the constructor
  /// telescope, filling parameters with metavariables and fields from the
  /// given values, the update source's projections, or declared defaults.
  fn visit_struct_inst(&mut self, name: Option<&Name>, fields: &[Name], has_source: bool,
      children: &[Term], expected: Option<&Term>) -> Result<Term> {
    let (field_vals, source) = if has_source {
      let (last, init) = children.split_last()
        .ok_or_else(|| ElabError::internal("structure instance with a source but no children"))?;
      (init, Some(last.clone()))
    } else {
      (children, None)
    };
    let sname = match name {
      Some(n) => n.clone(),
      None => {
        let Some(exp) = expected else {
          return Err(ElabError::new(
            "invalid structure value, the structure must be named or the expected type known"))
        };
        let exp_i = self.instantiate(exp);
        let exp_w = self.whnf(&exp_i, Transparency::Definitions);
        exp_w.head_const().cloned().ok_or_else(|| ElabError::new(format!(
          "invalid structure value, expected type {exp_w} is not a structure")))?
      }
    };
    let Some(info) = self.co.env.structure_info(&sname) else {
      return Err(ElabError::new(format!("invalid structure value, '{sname}' is not a structure")))
    };
    for f in fields {
      if info.field(f).is_none() {
        return Err(ElabError::new(format!(
          "invalid structure value, '{f}' is not a field of '{}'", info.name)))
      }
    }
    let source_e = match source {
      Some(s) => Some(self.visit(&s, None)?),
      None => None,
    };
    let ctor = self.visit_const(&info.ctor, &[])?;
    let mut ty = self.infer_type(&ctor)?;
    let total = info.num_params + info.fields.len();
    let mut values: Vec<Term> = vec![];
    let mut deferred: Vec<usize> = vec![];
    for pos in 0..total {
      ty = self.whnf_pi(&ty);
      let TermKind::Pi(b, cod) = &*ty else {
        return Err(ElabError::internal(format!(
          "constructor '{}' has fewer binders than its structure's field count", info.ctor)))
      };
      let (b, cod) = (b.clone(), cod.clone());
      let v = if pos < info.num_params {
        self.mk_mvar_term(b.ty.clone(), MVarKind::Natural)
      } else {
        let fi = &info.fields[pos - info.num_params];
        if let Some(j) = fields.iter().position(|f| f == &fi.name) {
          let dom = self.instantiate(&b.ty);
          let v = self.visit(&field_vals[j], Some(&dom))?;
          self.ensure_has_type(&v, &dom)?
        } else if let Some(src) = &source_e {
          // pull the field from the update source through its projection
          let proj = Term::const_(info.name.child(fi.name.as_str()), vec![]);
          let app = proj.apply([Term::ext(ExtKind::AsIs, vec![src.clone()])]);
          let dom = self.instantiate(&b.ty);
          let v = self.visit(&app, Some(&dom))?;
          self.ensure_has_type(&v, &dom)?
        } else if fi.default.is_some() {
          let m = self.mk_mvar_term(b.ty.clone(), MVarKind::Natural);
          deferred.push(pos);
          m
        } else {
          return Err(ElabError::new(format!(
            "invalid structure value, field '{}' is missing", fi.name)))
        }
      };
      values.push(v.clone());
      ty = cod.instantiate(&v);
    }
    let r = ctor.apply(values.iter().cloned());
    // checking against the expected type assigns the parameter
    // metavariables, which the defaults below may mention
    let r = match expected {
      Some(exp) => self.ensure_has_type(&r, exp)?,
      None => r,
    };
    self.fill_defaults(&info, &values, deferred)?;
    Ok(r)
  }

  /// Assign the placeholders of omitted defaulted fields. A default may
  /// mention earlier fields, which may themselves be defaulted, so this
  /// iterates until no more progress is made.
  fn fill_defaults(&mut self, info: &StructureInfo, values: &[Term],
      mut remaining: Vec<usize>) -> Result<()> {
    while !remaining.is_empty() {
      let mut progress = false;
      let mut next = vec![];
      for pos in remaining {
        let fi = &info.fields[pos - info.num_params];
        let Some(default) = &fi.default else {
          return Err(ElabError::internal("deferred field has no default value"))
        };
        // the default's bound variables refer to the telescope prefix,
        // innermost first
        let prefix: Vec<Term> =
          values[..pos].iter().rev().map(|v| self.instantiate(v)).collect();
        let v = self.instantiate(&default.instantiate_vars(&prefix));
        if v.has_expr_mvar() {
          next.push(pos);
          continue
        }
        if let TermKind::MVar(mid) = &*values[pos] {
          if !self.mctx.is_assigned(*mid) {
            debug!("default value for field '{}': {v}", fi.name);
            self.mctx.assign(*mid, v)?;
          }
        }
        progress = true;
      }
      if !progress {
        return Err(ElabError::new(format!(
          "invalid structure value, could not compute default values for omitted fields \
           of '{}'", info.name)))
      }
      remaining = next;
    }
    Ok(())
  }

  /// Elaborate a block of defining equations and hand the result to the
  /// equation compiler. Left-hand sides are elaborated in pattern mode,
  /// right-hand sides against the type the left-hand side settled on.
  fn visit_equations(&mut self, num_fns: usize, eqns: &[Term], expected: Option<&Term>)
      -> Result<Term> {
    let Some(exp) = expected else {
      return Err(ElabError::new(
        "invalid pattern-matching expression, the expected type must be known"))
    };
    let stack_base = self.inaccessible_stack.len();
    let mut eqs_e = vec![];
    for eq in eqns {
      let TermKind::Ext(ExtKind::Equation, lr) = &**eq else {
        return Err(ElabError::internal("expected an equation node"))
      };
      let saved = self.flags;
      self.flags.insert(ElabFlags::IN_PATTERN);
      let lhs = self.visit(&lr[0], None);
      self.flags = saved;
      let lhs = lhs?;
      let lhs_ty = self.infer_type(&lhs)?;
      let lhs_ty = self.instantiate(&lhs_ty);
      let rhs = self.visit(&lr[1], Some(&lhs_ty))?;
      let rhs = self.ensure_has_type(&rhs, &lhs_ty)?;
      eqs_e.push(Term::ext(ExtKind::Equation, vec![lhs, rhs]));
    }
    self.synthesize()?;
    self.check_inaccessible(stack_base)?;
    let mut out = vec![];
    for eq in eqs_e {
      let eq = self.instantiate(&eq);
      if eq.has_expr_mvar() {
        return Err(ElabError::new(format!(
          "equation contains unresolved placeholders: {eq}")))
      }
      out.push(eq);
    }
    let compiled = {
      let env = EnvWith { base: self.co.env, extra: &self.new_decls };
      self.co.equations.compile(&env, &mut self.mctx, &self.lctx,
        &Term::ext(ExtKind::Equations { num_fns }, out))
    };
    let r = compiled.map_err(|e|
      ElabError::nested("pattern match compilation failed", ElabError::new(e)))?;
    self.ensure_has_type(&r, exp)
  }

  /// Check the inaccessible patterns recorded since `from`: each must have
  /// been assigned by pattern unification, without leftovers, and agree
  /// with its annotation. An underdetermined value after a full synthesize
  /// is an internal consistency error and always propagates.
  fn check_inaccessible(&mut self, from: usize) -> Result<()> {
    for (m, e) in self.inaccessible_stack.split_off(from) {
      if !self.mctx.is_assigned(m) {
        return Err(ElabError::internal(format!(
          "inaccessible pattern {e} is not determined by the equation")))
      }
      let v = self.instantiate(&Term::mvar(m));
      if v.has_expr_mvar() {
        return Err(ElabError::internal(format!(
          "inaccessible pattern {e} has a value that is not fully determined")))
      }
      let e_i = self.instantiate(&e);
      if !self.is_def_eq(&v, &e_i) {
        return Err(ElabError::new(format!(
          "invalid inaccessible pattern: {e_i} is not definitionally equal to {v}, the \
           value determined by pattern matching")))
      }
    }
    Ok(())
  }
}

//! A small oracle kernel and environment for driving the elaborator in
//! tests: a first-order definitional checker with beta, zeta, and delta
//! reduction, a table-driven instance search, and a scripted tactic engine.

use std::cell::RefCell;

use corelab::env::{Checker, CheckError, Declaration, Environment, FieldInfo, InstanceSearch,
  ProofState, StructureInfo, TacticEngine, TacticResult, Transparency};
use corelab::{Binder, BinderInfo, Level, LocalContext, LocalDecl, Name, Term, TermKind};
use corelab::mctx::MetavarContext;

/// A constant with no universe parameters.
pub fn c(n: &str) -> Term { Term::const_(n, vec![]) }

/// An axiom declaration.
pub fn axiom(name: &str, ty: Term) -> Declaration {
  Declaration { name: name.into(), univ_params: vec![], ty, value: None }
}

/// An axiom with universe parameters.
pub fn poly_axiom(name: &str, univ_params: &[&str], ty: Term) -> Declaration {
  Declaration {
    name: name.into(),
    univ_params: univ_params.iter().map(|&p| Name::from(p)).collect(),
    ty,
    value: None,
  }
}

/// A non-dependent function type `a -> b`.
pub fn arrow(a: Term, b: Term) -> Term {
  Term::pi(Binder::new("a", a), b)
}

fn pi_with(name: &str, ty: Term, info: BinderInfo, body: Term) -> Term {
  Term::pi(Binder { name: name.into(), ty, info }, body)
}

/// `Sort 1`, the type of small types.
pub fn type0() -> Term { Term::sort(Level::one()) }

/// A vector-backed environment.
#[derive(Default)]
pub struct TestEnv {
  pub decls: Vec<Declaration>,
  pub eliminators: Vec<Name>,
  pub structures: Vec<StructureInfo>,
  pub out_params: Vec<(Name, Vec<usize>)>,
}

impl Environment for TestEnv {
  fn find(&self, n: &Name) -> Option<Declaration> {
    self.decls.iter().find(|d| &d.name == n).cloned()
  }
  fn is_eliminator(&self, n: &Name) -> bool { self.eliminators.contains(n) }
  fn structure_info(&self, n: &Name) -> Option<StructureInfo> {
    self.structures.iter().find(|s| &s.name == n).cloned()
  }
  fn class_out_params(&self, n: &Name) -> Vec<usize> {
    self.out_params.iter().find(|(m, _)| m == n).map(|(_, v)| v.clone()).unwrap_or_default()
  }
}

impl TestEnv {
  /// An environment with `nat`, `bool`, the numeral classes and their `nat`
  /// instances, coercion scaffolding, and a few polymorphic functions.
  pub fn prelude() -> TestEnv {
    let nat = || c("nat");
    let u = || Level::param(Name::from("u"));
    // Sort (u+1), the type of the carrier of a universe-polymorphic class
    let ty_u = || Term::sort(Level::succ(u()));
    let class1 = |class: &str| {
      Term::const_(class, vec![u()]).apply([Term::var(0)])
    };
    let decls = vec![
      axiom("nat", type0()),
      axiom("nat.zero", nat()),
      axiom("nat.succ", arrow(nat(), nat())),
      axiom("bool", type0()),
      axiom("bool.tt", c("bool")),
      axiom("int", type0()),
      // numeral scaffolding
      poly_axiom("has_zero", &["u"], arrow(ty_u(), ty_u())),
      poly_axiom("has_one", &["u"], arrow(ty_u(), ty_u())),
      poly_axiom("has_add", &["u"], arrow(ty_u(), ty_u())),
      poly_axiom("zero", &["u"],
        pi_with("A", ty_u(), BinderInfo::Default,
          pi_with("c", class1("has_zero"), BinderInfo::InstImplicit, Term::var(1)))),
      poly_axiom("one", &["u"],
        pi_with("A", ty_u(), BinderInfo::Default,
          pi_with("c", class1("has_one"), BinderInfo::InstImplicit, Term::var(1)))),
      poly_axiom("bit0", &["u"],
        pi_with("A", ty_u(), BinderInfo::Default,
          pi_with("c", class1("has_add"), BinderInfo::InstImplicit,
            arrow(Term::var(1), Term::var(2))))),
      poly_axiom("bit1", &["u"],
        pi_with("A", ty_u(), BinderInfo::Default,
          pi_with("c1", class1("has_one"), BinderInfo::InstImplicit,
            pi_with("c2", Term::const_("has_add", vec![u()]).apply([Term::var(1)]),
              BinderInfo::InstImplicit,
              arrow(Term::var(2), Term::var(3)))))),
      axiom("nat.has_zero", Term::const_("has_zero", vec![Level::zero()]).apply([nat()])),
      axiom("nat.has_one", Term::const_("has_one", vec![Level::zero()]).apply([nat()])),
      axiom("nat.has_add", Term::const_("has_add", vec![Level::zero()]).apply([nat()])),
      // coercion scaffolding
      poly_axiom("has_coe_t", &["u", "v"],
        pi_with("A", ty_u(), BinderInfo::Default,
          arrow(Term::sort(Level::succ(Level::param(Name::from("v")))), ty_u()))),
      poly_axiom("coe", &["u", "v"],
        pi_with("A", ty_u(), BinderInfo::Default,
          pi_with("B", Term::sort(Level::succ(Level::param(Name::from("v")))),
            BinderInfo::Default,
            pi_with("c",
              Term::const_("has_coe_t", vec![u(), Level::param(Name::from("v"))])
                .apply([Term::var(1), Term::var(0)]),
              BinderInfo::InstImplicit,
              arrow(Term::var(2), Term::var(2)))))),
      axiom("nat_to_int",
        Term::const_("has_coe_t", vec![Level::zero(), Level::zero()]).apply([nat(), c("int")])),
      // monad-like type constructors with a coercion between them
      axiom("m1", arrow(type0(), type0())),
      axiom("m2", arrow(type0(), type0())),
      axiom("m1_to_m2", Term::const_("has_coe_t", vec![Level::zero(), Level::zero()])
        .apply([c("m1").apply([nat()]), c("m2").apply([nat()])])),
      // decision coercion scaffolding
      axiom("decidable", arrow(Term::prop(), Term::prop())),
      axiom("decidable.to_bool",
        pi_with("p", Term::prop(), BinderInfo::Default,
          pi_with("d", c("decidable").apply([Term::var(0)]), BinderInfo::InstImplicit,
            c("bool")))),
      axiom("p", Term::prop()),
      axiom("p.dec", c("decidable").apply([c("p")])),
      // polymorphic helpers
      axiom("id1",
        pi_with("A", type0(), BinderInfo::Implicit,
          pi_with("a", Term::var(0), BinderInfo::Default, Term::var(1)))),
      axiom("list", arrow(type0(), type0())),
      axiom("single",
        pi_with("A", type0(), BinderInfo::Implicit,
          pi_with("a", Term::var(0), BinderInfo::Default,
            c("list").apply([Term::var(1)])))),
      axiom("f_nat", arrow(nat(), nat())),
      axiom("g_bool", arrow(c("bool"), c("bool"))),
      axiom("f_nat2", arrow(nat(), nat())),
      // a recursor: nat.rec {C : nat -> Sort u} (z : C nat.zero)
      //   (s : forall n, C n -> C (nat.succ n)) (n : nat) : C n
      poly_axiom("nat.rec", &["u"],
        pi_with("C", arrow(nat(), Term::sort(u())), BinderInfo::Implicit,
          pi_with("z", Term::var(0).apply([c("nat.zero")]), BinderInfo::Default,
            pi_with("s",
              pi_with("n", nat(), BinderInfo::Default,
                arrow(Term::var(2).apply([Term::var(0)]),
                  Term::var(3).apply([c("nat.succ").apply([Term::var(1)])]))),
              BinderInfo::Default,
              pi_with("n", nat(), BinderInfo::Default,
                Term::var(3).apply([Term::var(0)])))))),
      // the pair structure
      axiom("pair", type0()),
      axiom("pair.mk", arrow(nat(), arrow(nat(), c("pair")))),
      axiom("pair.x", arrow(c("pair"), nat())),
      axiom("pair.y", arrow(c("pair"), nat())),
      // tactic scaffolding
      axiom("triv", Term::prop()),
      axiom("triv.intro", c("triv")),
      axiom("triv_tac", type0()),
    ];
    TestEnv {
      decls,
      out_params: vec![],
      eliminators: vec!["nat.rec".into()],
      structures: vec![StructureInfo {
        name: "pair".into(),
        ctor: "pair.mk".into(),
        num_params: 0,
        fields: vec![
          FieldInfo { name: "x".into(), info: BinderInfo::Default, default: None },
          // y defaults to x
          FieldInfo { name: "y".into(), info: BinderInfo::Default,
            default: Some(Term::var(0)) },
        ],
      }],
    }
  }
}

/// A first-order kernel: beta, zeta, and delta reduction, syntactic
/// definitional equality with metavariable assignment, and type inference
/// for the kernel fragment.
pub struct Kernel;

impl Kernel {
  fn head_step(&self, env: &dyn Environment, lctx: &LocalContext, head: &Term,
      tr: Transparency) -> Option<Term> {
    match &**head {
      TermKind::Let(_, _, v, body) => Some(body.instantiate(v)),
      TermKind::Local(id) => lctx.find(*id).and_then(|d| d.value.clone()),
      TermKind::Const(n, ls) if tr != Transparency::Opaque => env.find(n)
        .and_then(|d| d.value.map(|v| v.instantiate_level_params(&d.univ_params, ls))),
      _ => None,
    }
  }

  fn whnf_core(&self, env: &dyn Environment, mctx: &MetavarContext, lctx: &LocalContext,
      t: &Term, tr: Transparency) -> Term {
    let mut t = mctx.instantiate_mvars(t);
    loop {
      let (head, args) = t.unapply();
      if let Some(h) = self.head_step(env, lctx, &head, tr) {
        t = mctx.instantiate_mvars(&h.apply(args));
        continue
      }
      if let TermKind::Lam(_, body) = &*head {
        if let Some((first, rest)) = args.split_first() {
          t = body.instantiate(first).apply(rest.iter().cloned());
          continue
        }
      }
      return t
    }
  }

  fn unify_level(&self, mctx: &mut MetavarContext, a: &Level, b: &Level) -> bool {
    let (a, b) = (mctx.instantiate_level(a), mctx.instantiate_level(b));
    if a == b { return true }
    match (&*a, &*b) {
      (corelab::LevelKind::MVar(u), _) => mctx.assign_lvl(*u, b.clone()).is_ok(),
      (_, corelab::LevelKind::MVar(u)) => mctx.assign_lvl(*u, a.clone()).is_ok(),
      (corelab::LevelKind::Succ(l1), corelab::LevelKind::Succ(l2)) =>
        self.unify_level(mctx, l1, l2),
      _ => false,
    }
  }

  fn assign_mvar(&self, env: &dyn Environment, mctx: &mut MetavarContext,
      lctx: &LocalContext, m: corelab::MVarId, val: &Term, tr: Transparency) -> bool {
    // keep the metavariable's declared type in sync with the value's type,
    // so universe levels get determined too
    let mty = mctx.mvar_type(m);
    if let Ok(vty) = self.infer(env, mctx, lctx, val) {
      let _ = self.unify(env, mctx, lctx, &mty, &vty, tr);
    }
    mctx.assign(m, val.clone()).is_ok()
  }

  fn unify(&self, env: &dyn Environment, mctx: &mut MetavarContext, lctx: &LocalContext,
      a: &Term, b: &Term, tr: Transparency) -> bool {
    let a = self.whnf_core(env, mctx, lctx, a, tr);
    let b = self.whnf_core(env, mctx, lctx, b, tr);
    if a == b { return true }
    match (&*a, &*b) {
      (TermKind::MVar(m), _) if !b.occurs_mvar(*m) =>
        self.assign_mvar(env, mctx, lctx, *m, &b, tr),
      (_, TermKind::MVar(m)) if !a.occurs_mvar(*m) =>
        self.assign_mvar(env, mctx, lctx, *m, &a, tr),
      (TermKind::Sort(l1), TermKind::Sort(l2)) => self.unify_level(mctx, l1, l2),
      (TermKind::Const(n1, ls1), TermKind::Const(n2, ls2)) =>
        n1 == n2 && ls1.len() == ls2.len()
          && ls1.iter().zip(ls2).all(|(l1, l2)| self.unify_level(mctx, l1, l2)),
      (TermKind::App(f1, a1), TermKind::App(f2, a2)) => {
        let (f1, a1, f2, a2) = (f1.clone(), a1.clone(), f2.clone(), a2.clone());
        self.unify(env, mctx, lctx, &f1, &f2, tr) && self.unify(env, mctx, lctx, &a1, &a2, tr)
      }
      (TermKind::Lam(b1, e1), TermKind::Lam(b2, e2))
      | (TermKind::Pi(b1, e1), TermKind::Pi(b2, e2)) => {
        let (t1, t2, e1, e2) = (b1.ty.clone(), b2.ty.clone(), e1.clone(), e2.clone());
        let name = b1.name.clone();
        if !self.unify(env, mctx, lctx, &t1, &t2, tr) { return false }
        let id = mctx.fresh_local_id();
        let mut lctx2 = lctx.clone();
        lctx2.push(LocalDecl { id, name, ty: t1, value: None, info: BinderInfo::Default });
        let x = Term::local(id);
        self.unify(env, mctx, &lctx2, &e1.instantiate(&x), &e2.instantiate(&x), tr)
      }
      _ => false,
    }
  }

  fn infer(&self, env: &dyn Environment, mctx: &mut MetavarContext, lctx: &LocalContext,
      t: &Term) -> Result<Term, CheckError> {
    match &**t {
      TermKind::Sort(l) => Ok(Term::sort(Level::succ(l.clone()))),
      TermKind::Const(n, ls) => {
        let d = env.get(n)?;
        if ls.len() != d.univ_params.len() {
          return Err(CheckError::new(format!("universe arity mismatch at '{n}'")))
        }
        Ok(d.ty.instantiate_level_params(&d.univ_params, ls))
      }
      TermKind::Local(id) => lctx.find(*id).map(|d| d.ty.clone())
        .ok_or_else(|| CheckError::new("local out of scope")),
      TermKind::MVar(m) => Ok(mctx.mvar_type(*m)),
      TermKind::App(f, a) => {
        let (f, a) = (f.clone(), a.clone());
        let fty = self.infer(env, mctx, lctx, &f)?;
        let fty = self.whnf_core(env, mctx, lctx, &fty, Transparency::Definitions);
        match &*fty {
          TermKind::Pi(_, cod) => Ok(cod.instantiate(&a)),
          _ => Err(CheckError::new(format!("function expected, found {fty}"))),
        }
      }
      TermKind::Lam(b, body) => {
        let id = mctx.fresh_local_id();
        let mut lctx2 = lctx.clone();
        lctx2.push(LocalDecl {
          id, name: b.name.clone(), ty: b.ty.clone(), value: None, info: b.info,
        });
        let bty = self.infer(env, mctx, &lctx2, &body.instantiate(&Term::local(id)))?;
        Ok(Term::pi(b.clone(), bty.abstract_local(id)))
      }
      TermKind::Pi(b, body) => {
        let dty = self.infer(env, mctx, lctx, &b.ty)?;
        let dty = self.whnf_core(env, mctx, lctx, &dty, Transparency::Definitions);
        let TermKind::Sort(u1) = &*dty else {
          return Err(CheckError::new("binder domain is not a type"))
        };
        let id = mctx.fresh_local_id();
        let mut lctx2 = lctx.clone();
        lctx2.push(LocalDecl {
          id, name: b.name.clone(), ty: b.ty.clone(), value: None, info: b.info,
        });
        let bty = self.infer(env, mctx, &lctx2, &body.instantiate(&Term::local(id)))?;
        let bty = self.whnf_core(env, mctx, &lctx2, &bty, Transparency::Definitions);
        let TermKind::Sort(u2) = &*bty else {
          return Err(CheckError::new("binder body is not a type"))
        };
        Ok(Term::sort(Level::imax(u1.clone(), u2.clone())))
      }
      TermKind::Let(_, _, v, body) => self.infer(env, mctx, lctx, &body.instantiate(v)),
      TermKind::Ext(corelab::ExtKind::Sorry, args) => Ok(args[0].clone()),
      _ => Err(CheckError::new(format!("cannot infer type of {t}"))),
    }
  }
}

impl Checker for Kernel {
  fn infer_type(&self, env: &dyn Environment, mctx: &mut MetavarContext,
      lctx: &LocalContext, t: &Term) -> Result<Term, CheckError> {
    self.infer(env, mctx, lctx, t)
  }
  fn whnf(&self, env: &dyn Environment, mctx: &mut MetavarContext,
      lctx: &LocalContext, t: &Term, tr: Transparency) -> Term {
    self.whnf_core(env, mctx, lctx, t, tr)
  }
  fn is_def_eq(&self, env: &dyn Environment, mctx: &mut MetavarContext,
      lctx: &LocalContext, a: &Term, b: &Term, tr: Transparency) -> bool {
    let saved = mctx.clone();
    let ok = self.unify(env, mctx, lctx, a, b, tr);
    if !ok { *mctx = saved }
    ok
  }
}

/// Instance search backed by a table of `(instance term, instance type)`
/// pairs, matched by unification.
#[derive(Default)]
pub struct TableInstances(pub Vec<(Term, Term)>);

impl TableInstances {
  /// The instances of the prelude environment.
  pub fn prelude() -> TableInstances {
    let inst = |n: &str| (c(n), Kernel.infer(&TestEnv::prelude(), &mut MetavarContext::new(),
      &LocalContext::new(), &c(n)));
    let mut table = vec![];
    for n in ["nat.has_zero", "nat.has_one", "nat.has_add", "nat_to_int", "m1_to_m2", "p.dec"] {
      let (tm, ty) = inst(n);
      if let Ok(ty) = ty { table.push((tm, ty)) }
    }
    TableInstances(table)
  }
}

impl InstanceSearch for TableInstances {
  fn find_instance(&self, env: &dyn Environment, ck: &dyn Checker,
      mctx: &mut MetavarContext, lctx: &LocalContext, class_ty: &Term) -> Option<Term> {
    for (tm, ty) in &self.0 {
      if ck.is_def_eq(env, mctx, lctx, ty, class_ty, Transparency::Definitions) {
        return Some(tm.clone())
      }
    }
    None
  }
}

/// A tactic engine that closes `triv` goals with `triv.intro` and fails
/// everything else.
#[derive(Default)]
pub struct TrivTactics {
  /// The goals the engine was invoked on.
  pub invocations: RefCell<Vec<Term>>,
  /// Declarations handed back on every success.
  pub decls_on_success: Vec<Declaration>,
}

impl TacticEngine for TrivTactics {
  fn run(&self, _: &dyn Environment, _: &mut MetavarContext,
      _: &Term, state: ProofState) -> TacticResult {
    self.invocations.borrow_mut().push(state.goal.clone());
    if state.goal == c("triv") {
      TacticResult::Success {
        proof: c("triv.intro"),
        new_decls: self.decls_on_success.clone(),
      }
    } else {
      TacticResult::Failure(format!("cannot prove {}", state.goal))
    }
  }
}

/// An equation compiler that records its input and returns a canned term.
pub struct CannedEquations {
  /// The canned result.
  pub result: Term,
  /// The equations nodes received.
  pub inputs: RefCell<Vec<Term>>,
}

impl corelab::env::EquationCompiler for CannedEquations {
  fn compile(&self, _: &dyn Environment, _: &mut MetavarContext,
      _: &LocalContext, eqns: &Term) -> Result<Term, corelab::BoxError> {
    self.inputs.borrow_mut().push(eqns.clone());
    Ok(self.result.clone())
  }
}

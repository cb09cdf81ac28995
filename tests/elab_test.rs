//! End-to-end elaboration tests against the oracle kernel in `common`.

mod common;

use std::cell::RefCell;

use common::{arrow, axiom, c, type0, CannedEquations, Kernel, TableInstances, TestEnv,
  TrivTactics};
use corelab::env::{Checker, Environment, EquationCompiler, InstanceSearch, NoEquations};
use corelab::mctx::MetavarContext;
use corelab::{Binder, BinderInfo, Collaborators, ElabErrorKind, ElabFlags, Elaborator, ExtKind,
  Level, LocalContext, Name, Term, TermKind};

fn session<'a>(env: &'a TestEnv, instances: &'a TableInstances, tactics: &'a TrivTactics,
    equations: &'a dyn EquationCompiler) -> Elaborator<'a> {
  Elaborator::new(Collaborators {
    env,
    checker: &Kernel,
    instances,
    tactics,
    equations,
  }, "test.decl")
}

macro_rules! fixture {
  ($el:ident) => {
    let env = TestEnv::prelude();
    let instances = TableInstances::prelude();
    let tactics = TrivTactics::default();
    let mut $el = session(&env, &instances, &tactics, &NoEquations);
  };
}

fn lvl0(n: &str) -> Term { Term::const_(n, vec![Level::zero()]) }

#[test]
fn explicit_app_fills_hole() {
  fixture!(el);
  // @id1 _ bool.tt
  let t = Term::ext(ExtKind::Explicit, vec![c("id1")])
    .apply([Term::hole(), c("bool.tt")]);
  let r = el.visit(&t, None).unwrap();
  let (r, params) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, c("id1").apply([c("bool"), c("bool.tt")]));
  assert!(params.is_empty());
}

#[test]
fn implicit_filled_by_unification() {
  fixture!(el);
  let t = c("id1").apply([c("bool.tt")]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, c("id1").apply([c("bool"), c("bool.tt")]));
}

#[test]
fn expected_type_reaches_arguments() {
  fixture!(el);
  // the expected type fixes the implicit carrier before the numeral
  // argument is elaborated, so the numeral never needs defaulting
  let expected = c("list").apply([c("nat")]);
  let t = c("single").apply([Term::ext(ExtKind::Numeral(1), vec![])]);
  let r = el.visit(&t, Some(&expected)).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, c("single").apply([c("nat"),
    lvl0("one").apply([c("nat"), c("nat.has_one")])]));
}

#[test]
fn numeral_expansion_and_defaulting() {
  fixture!(el);
  let t = Term::ext(ExtKind::Numeral(2), vec![]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, lvl0("bit0").apply([c("nat"), c("nat.has_add"),
    lvl0("one").apply([c("nat"), c("nat.has_one")])]));
}

#[test]
fn numeral_bit1() {
  fixture!(el);
  let t = Term::ext(ExtKind::Numeral(3), vec![]);
  let r = el.visit(&t, Some(&c("nat"))).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert_eq!(r, lvl0("bit1").apply([c("nat"), c("nat.has_one"), c("nat.has_add"),
    lvl0("one").apply([c("nat"), c("nat.has_one")])]));
}

#[test]
fn overload_resolution_is_order_independent() {
  let arg = c("nat.zero");
  let want = c("f_nat").apply([c("nat.zero")]);
  for cands in [vec![c("f_nat"), c("g_bool")], vec![c("g_bool"), c("f_nat")]] {
    fixture!(el);
    let t = Term::ext(ExtKind::Choice, cands).apply([arg.clone()]);
    let r = el.visit(&t, None).unwrap();
    let (r, _) = el.finalize(&r, true).unwrap();
    assert!(el.errors.is_empty(), "{:?}", el.errors);
    assert_eq!(r, want);
  }
}

#[test]
fn ambiguous_overload_is_an_error() {
  fixture!(el);
  el.flags.remove(ElabFlags::RECOVER);
  let t = Term::ext(ExtKind::Choice, vec![c("f_nat"), c("f_nat2")])
    .apply([c("nat.zero")]);
  let e = el.visit(&t, None).unwrap_err();
  assert!(matches!(e.kind, ElabErrorKind::AmbiguousOverload(ref ts) if ts.len() == 2));
}

#[test]
fn no_overload_applies_lists_failures() {
  fixture!(el);
  el.flags.remove(ElabFlags::RECOVER);
  let t = Term::ext(ExtKind::Choice, vec![c("f_nat"), c("f_nat2")])
    .apply([c("bool.tt")]);
  let e = el.visit(&t, None).unwrap_err();
  assert!(matches!(e.kind, ElabErrorKind::NoOverloadApplies(ref es) if es.len() == 2));
}

#[test]
fn missing_instance_reports_and_recovers() {
  fixture!(el);
  // there is no has_one instance for bool
  let t = Term::ext(ExtKind::Ascription,
    vec![c("bool"), Term::ext(ExtKind::Numeral(1), vec![])]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert_eq!(el.errors.len(), 1);
  assert!(el.errors[0].to_string().contains("class instance"));
  let (head, args) = r.unapply();
  assert_eq!(head.head_const(), Some(&Name::from("one")));
  assert_eq!(args[0], c("bool"));
  assert!(matches!(&*args[1], TermKind::Ext(ExtKind::Sorry, _)));
}

#[test]
fn coercion_through_instance() {
  fixture!(el);
  // (nat.zero : int) goes through the has_coe_t instance
  let t = Term::ext(ExtKind::Ascription, vec![c("int"), c("nat.zero")]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, Term::const_("coe", vec![Level::zero(), Level::zero()])
    .apply([c("nat"), c("int"), c("nat_to_int"), c("nat.zero")]));
}

#[test]
fn coercion_inserted_under_metavariable() {
  fixture!(el);
  // (av : m2 _) with av : m1 nat: unifying the inner arguments closes both
  // types, and the has_coe_t instance bridges them
  let av = el.push_local("av".into(), c("m1").apply([c("nat")]), BinderInfo::Default);
  let t = Term::ext(ExtKind::Ascription,
    vec![c("m2").apply([Term::hole()]), Term::local(av)]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, Term::const_("coe", vec![Level::zero(), Level::zero()])
    .apply([c("m1").apply([c("nat")]), c("m2").apply([c("nat")]),
      c("m1_to_m2"), Term::local(av)]));
}

#[test]
fn matching_types_insert_no_coercion() {
  fixture!(el);
  let t = Term::ext(ExtKind::Ascription, vec![c("nat"), c("nat.zero")]);
  let r = el.visit(&t, None).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, c("nat.zero"));
}

#[test]
fn decision_coercion_to_bool() {
  fixture!(el);
  // (p : bool) for a decidable proposition p
  let t = Term::ext(ExtKind::Ascription, vec![c("bool"), c("p")]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, c("decidable.to_bool").apply([c("p"), c("p.dec")]));
}

#[test]
fn mismatch_without_coercion_is_recovered() {
  fixture!(el);
  let t = Term::ext(ExtKind::Ascription, vec![c("bool"), c("nat.zero")]);
  let r = el.visit(&t, None).unwrap();
  assert!(matches!(&*r, TermKind::Ext(ExtKind::Sorry, _)));
  assert_eq!(el.errors.len(), 1);
  assert!(matches!(el.errors[0].kind, ElabErrorKind::TypeMismatch { .. }));
}

#[test]
fn second_pass_error_reports_argument() {
  fixture!(el);
  // the expected type matches the result type, so the two-pass strategy
  // commits; the bad argument is then reported at its position instead of
  // being retried through the plain elaborator
  let t = c("f_nat").apply([c("bool.tt")]);
  let r = el.visit(&t, Some(&c("nat"))).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert_eq!(el.errors.len(), 1);
  assert!(matches!(el.errors[0].kind,
    ElabErrorKind::TypeMismatch { ref term, .. } if *term == c("bool.tt")));
  assert_eq!(r, c("f_nat").apply([Term::sorry(c("nat"))]));
}

#[test]
fn expected_type_pass_falls_back_to_simple() {
  fixture!(el);
  // the result type nat can only meet the expected type int through a
  // coercion, which the first pass never inserts; the plain elaborator
  // picks it up
  let t = Term::ext(ExtKind::Ascription,
    vec![c("int"), c("f_nat").apply([c("nat.zero")])]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, Term::const_("coe", vec![Level::zero(), Level::zero()])
    .apply([c("nat"), c("int"), c("nat_to_int"), c("f_nat").apply([c("nat.zero")])]));
}

/// An instance search that counts its invocations.
struct CountingInstances<'a> {
  inner: &'a TableInstances,
  calls: RefCell<usize>,
}

impl InstanceSearch for CountingInstances<'_> {
  fn find_instance(&self, env: &dyn Environment, ck: &dyn Checker,
      mctx: &mut MetavarContext, lctx: &LocalContext, class_ty: &Term) -> Option<Term> {
    *self.calls.borrow_mut() += 1;
    self.inner.find_instance(env, ck, mctx, lctx, class_ty)
  }
}

#[test]
fn instance_chain_resolves_link_by_link() {
  // chain A B with B an output parameter; each link's input is the
  // previous link's output, so exactly one obligation becomes ready per
  // worklist round and each is searched exactly once
  let mut env = TestEnv::prelude();
  env.decls.push(axiom("chain", arrow(type0(), arrow(type0(), type0()))));
  env.decls.push(axiom("chain.nb", c("chain").apply([c("nat"), c("bool")])));
  env.decls.push(axiom("chain.bn", c("chain").apply([c("bool"), c("nat")])));
  env.decls.push(axiom("wrap", arrow(type0(), type0())));
  env.decls.push(axiom("lift",
    Term::pi(Binder { name: "A".into(), ty: type0(), info: BinderInfo::Implicit },
    Term::pi(Binder { name: "B".into(), ty: type0(), info: BinderInfo::Implicit },
    Term::pi(Binder {
        name: "c".into(),
        ty: c("chain").apply([Term::var(1), Term::var(0)]),
        info: BinderInfo::InstImplicit,
      },
      arrow(c("wrap").apply([Term::var(2)]), c("wrap").apply([Term::var(2)])))))));
  env.out_params.push(("chain".into(), vec![1]));
  let mut table = TableInstances::prelude();
  for n in ["chain.nb", "chain.bn"] {
    let d = env.find(&n.into()).unwrap();
    table.0.push((c(n), d.ty));
  }
  let instances = CountingInstances { inner: &table, calls: RefCell::new(0) };
  let tactics = TrivTactics::default();
  let mut el = Elaborator::new(Collaborators {
    env: &env,
    checker: &Kernel,
    instances: &instances,
    tactics: &tactics,
    equations: &NoEquations,
  }, "test.decl");
  let at_lift = |arg: Term| Term::ext(ExtKind::Explicit, vec![c("lift")])
    .apply([Term::hole(), Term::hole(), Term::hole(), arg]);
  let x = el.push_local("x".into(), c("wrap").apply([c("nat")]), BinderInfo::Default);
  let t = at_lift(at_lift(at_lift(Term::local(x))));
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(*instances.calls.borrow(), 3);
  assert_eq!(r, c("lift").apply([c("nat"), c("bool"), c("chain.nb"),
    c("lift").apply([c("bool"), c("nat"), c("chain.bn"),
      c("lift").apply([c("nat"), c("bool"), c("chain.nb"), Term::local(x)])])]));
}

#[test]
fn eliminator_motive_from_expected_type() {
  fixture!(el);
  let s_fun = Term::lam(Binder::new("n", c("nat")),
    Term::lam(Binder::new("ih", c("nat")), Term::var(0)));
  let t = c("nat.rec").apply([
    c("nat.zero"),
    s_fun.clone(),
    c("nat.succ").apply([c("nat.zero")]),
  ]);
  let r = el.visit(&t, Some(&c("nat"))).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  let (head, args) = r.unapply();
  assert_eq!(head, Term::const_("nat.rec", vec![Level::one()]));
  assert_eq!(args.len(), 4);
  // the motive is the expected type abstracted over the major premise
  assert_eq!(args[0], Term::lam(Binder::new("x", c("nat")), c("nat")));
  assert_eq!(args[1], c("nat.zero"));
  assert_eq!(args[2], s_fun);
  assert_eq!(args[3], c("nat.succ").apply([c("nat.zero")]));
}

#[test]
fn struct_instance_with_default_field() {
  fixture!(el);
  // { x := nat.zero } : pair, with y defaulting to x
  let t = Term::ext(ExtKind::StructInst {
    name: None,
    fields: vec!["x".into()],
    has_source: false,
  }, vec![c("nat.zero")]);
  let r = el.visit(&t, Some(&c("pair"))).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, c("pair.mk").apply([c("nat.zero"), c("nat.zero")]));
}

#[test]
fn struct_instance_with_update_source() {
  fixture!(el);
  let pr = el.push_local("pr".into(), c("pair"), BinderInfo::Default);
  // { pr with x := nat.zero }: y is pulled through its projection
  let t = Term::ext(ExtKind::StructInst {
    name: Some("pair".into()),
    fields: vec!["x".into()],
    has_source: true,
  }, vec![c("nat.zero"), Term::local(pr)]);
  let r = el.visit(&t, None).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, c("pair.mk").apply([c("nat.zero"),
    c("pair.y").apply([Term::local(pr)])]));
}

#[test]
fn missing_field_is_an_error() {
  fixture!(el);
  el.flags.remove(ElabFlags::RECOVER);
  let t = Term::ext(ExtKind::StructInst {
    name: Some("pair".into()),
    fields: vec![],
    has_source: false,
  }, vec![]);
  let e = el.visit(&t, Some(&c("pair"))).unwrap_err();
  assert!(e.to_string().contains("field 'x' is missing"));
}

#[test]
fn tactic_block_closes_goal() {
  let env = TestEnv::prelude();
  let instances = TableInstances::prelude();
  let tactics = TrivTactics {
    invocations: RefCell::new(vec![]),
    decls_on_success: vec![axiom("new.lemma", c("triv"))],
  };
  let mut el = session(&env, &instances, &tactics, &NoEquations);
  let t = Term::ext(ExtKind::By, vec![c("triv_tac")]);
  let r = el.visit(&t, Some(&c("triv"))).unwrap();
  assert!(matches!(&*r, TermKind::MVar(_)));
  let r = el.finalize_proof(&r).unwrap();
  assert_eq!(r, c("triv.intro"));
  assert_eq!(tactics.invocations.borrow().len(), 1);
  // declarations produced by the tactic are visible afterwards
  assert!(el.get_decl(&"new.lemma".into()).is_some());
}

#[test]
fn failed_tactic_recovers_with_placeholder() {
  fixture!(el);
  let t = Term::ext(ExtKind::By, vec![c("triv_tac")]);
  let r = el.visit(&t, Some(&c("p"))).unwrap();
  let (r, _) = el.finalize(&r, true).unwrap();
  assert_eq!(r, Term::sorry(c("p")));
  assert_eq!(el.errors.len(), 1);
}

#[test]
fn equations_are_compiled() {
  let env = TestEnv::prelude();
  let instances = TableInstances::prelude();
  let tactics = TrivTactics::default();
  let compiled = Term::lam(Binder::new("n", c("nat")), c("nat.zero"));
  let equations = CannedEquations {
    result: compiled.clone(),
    inputs: RefCell::new(vec![]),
  };
  let mut el = session(&env, &instances, &tactics, &equations);
  let f = el.push_local("f".into(), arrow(c("nat"), c("nat")), BinderInfo::Default);
  let eq = Term::ext(ExtKind::Equation,
    vec![Term::local(f).apply([c("nat.zero")]), c("nat.zero")]);
  let t = Term::ext(ExtKind::Equations { num_fns: 1 }, vec![eq]);
  let r = el.visit(&t, Some(&arrow(c("nat"), c("nat")))).unwrap();
  assert!(el.errors.is_empty(), "{:?}", el.errors);
  assert_eq!(r, compiled);
  assert_eq!(equations.inputs.borrow().len(), 1);
}

#[test]
fn inaccessible_outside_patterns_is_rejected() {
  fixture!(el);
  el.flags.remove(ElabFlags::RECOVER);
  let t = Term::ext(ExtKind::Inaccessible, vec![c("nat.zero")]);
  let e = el.visit(&t, None).unwrap_err();
  assert!(e.recoverable());
  assert!(e.to_string().contains("inaccessible"));
}

#[test]
fn strict_visit_requires_everything_solved() {
  fixture!(el);
  let t = c("id1").apply([c("bool.tt")]);
  let r = el.strict_visit(&t, None).unwrap();
  assert_eq!(r, c("id1").apply([c("bool"), c("bool.tt")]));
  // a bare hole has nothing to determine it
  let e = el.strict_visit(&Term::hole(), Some(&c("nat"))).unwrap_err();
  assert!(e.to_string().contains("unresolved placeholders"));
}

#[test]
fn unknown_constant_recovers() {
  fixture!(el);
  let r = el.visit(&c("nope"), Some(&c("nat"))).unwrap();
  assert_eq!(r, Term::sorry(c("nat")));
  assert_eq!(el.errors.len(), 1);
  assert!(matches!(el.errors[0].kind, ElabErrorKind::UnknownConstant(_)));
}

#[test]
fn finalize_promotes_level_metavariables() {
  fixture!(el);
  let r = el.visit(&Term::sort(Level::hole()), None).unwrap();
  let (r, params) = el.finalize(&r, true).unwrap();
  assert_eq!(params, vec![Name::from("u_0")]);
  assert_eq!(r, Term::sort(Level::param("u_0".into())));
}

#[test]
fn proofs_may_not_leak_universes() {
  fixture!(el);
  let r = el.visit(&Term::sort(Level::hole()), None).unwrap();
  let e = el.finalize_proof(&r).unwrap_err();
  assert!(!e.recoverable());
}

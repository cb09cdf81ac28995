//! An elaborator for a dependently typed core calculus.
//!
//! The input language is the kernel term language extended with surface
//! constructs: holes, overloaded heads, numerals, anonymous constructors,
//! structure instance notation, defining equations, and tactic blocks.
//! [`Elaborator::visit`] removes them, producing a fully explicit kernel
//! term: implicit arguments and universe levels are filled with
//! metavariables and solved by unification, class instances and numeral
//! types by worklists drained in [`Elaborator::synthesize`], and type
//! mismatches are mended by coercion where an instance provides one.
//!
//! The kernel itself stays outside: type inference, reduction, and
//! definitional equality are reached through the traits in [`env`], and the
//! heavyweight satellites (instance search, tactics, pattern-match
//! compilation) through their own traits there, so the crate can be tested
//! against small oracle implementations.

// rust lints we want
#![warn(bare_trait_objects, elided_lifetimes_in_paths,
  missing_copy_implementations, missing_debug_implementations, future_incompatible,
  rust_2018_idioms, trivial_numeric_casts, variant_size_differences, unreachable_pub,
  unused, missing_docs)]
// all the clippy
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
// all the clippy::restriction lints we want
#![warn(clippy::float_arithmetic,
  clippy::get_unwrap, clippy::inline_asm_x86_att_syntax, clippy::integer_division,
  clippy::rc_buffer, clippy::rest_pat_in_fully_bound_structs,
  clippy::string_add, clippy::unwrap_used)]
// all the clippy lints we don't want
#![allow(clippy::cognitive_complexity, clippy::comparison_chain,
  clippy::default_trait_access, clippy::enum_glob_use, clippy::inline_always,
  clippy::manual_map, clippy::map_err_ignore, clippy::missing_const_for_fn,
  clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::module_name_repetitions,
  clippy::multiple_crate_versions, clippy::option_if_let_else, clippy::redundant_pub_crate,
  clippy::semicolon_if_nothing_returned, clippy::shadow_unrelated, clippy::too_many_lines,
  clippy::use_self)]

pub mod util;
pub mod expr;
pub mod mctx;
pub mod env;
pub mod dtree;
pub mod hints;
pub mod elab;

pub use elab::{Collaborators, ElabError, ElabErrorKind, ElabFlags, Elaborator, Result, Snapshot};
pub use expr::{Binder, BinderInfo, ExtKind, Level, LevelKind, LocalContext, LocalDecl,
  Term, TermKind};
pub use util::{BoxError, LVarId, LocalId, MVarId, Name};

//! Utilities: newtyped indices, hierarchical names, and error plumbing.

use std::fmt;
use std::rc::Rc;

/// Newtype for `Box<dyn Error>`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

macro_rules! id_wrapper {
  ($id:ident: $ty:ty, $pre:expr, $svec:expr) => {
    #[doc=$svec]
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
    pub struct $id(pub $ty);

    impl $id {
      /// Convert this newtyped integer into its underlying integer.
      #[must_use]
      pub fn into_inner(self) -> $ty {
        self.0
      }
    }

    impl fmt::Debug for $id {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
    }

    impl fmt::Display for $id {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, concat!($pre, "{}"), self.0)
      }
    }
  };
}

id_wrapper!(MVarId: u32, "?m", "An index into the metavariable declarations of a [`MetavarContext`](crate::mctx::MetavarContext).");
id_wrapper!(LVarId: u32, "?u", "An index naming a universe level metavariable.");
id_wrapper!(LocalId: u32, "x!", "An index naming a local variable; its declaration lives in a [`LocalContext`](crate::expr::LocalContext).");

/// A hierarchical identifier such as `nat.rec`, stored as a dotted string.
/// Clones are cheap pointer copies.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Rc<str>);

impl Name {
  /// View the full dotted name as a string.
  #[must_use]
  pub fn as_str(&self) -> &str { &self.0 }

  /// The last component of the name: `base("nat.rec") = "rec"`.
  #[must_use]
  pub fn base(&self) -> &str { self.0.rsplit('.').next().unwrap_or("") }

  /// Extend the name by a component: `Name::from("nat").child("rec") = "nat.rec"`.
  #[must_use]
  pub fn child(&self, s: &str) -> Name { Name(format!("{}.{s}", self.0).into()) }
}

impl From<&str> for Name {
  fn from(s: &str) -> Name { Name(s.into()) }
}

impl From<String> for Name {
  fn from(s: String) -> Name { Name(s.into()) }
}

impl fmt::Display for Name {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

impl fmt::Debug for Name {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

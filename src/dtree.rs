//! Discrimination trees: an index from term patterns to values.
//!
//! Patterns are linearized into key paths by a preorder walk of the
//! application spine. A `Star` key stands for a whole subtree and is produced
//! for metavariables and holes; on retrieval it matches any query subterm,
//! and a metavariable in the query matches every stored pattern at that
//! position. Nodes are copy-on-write: cloning a tree is cheap and mutating a
//! clone does not disturb the original.
//!
//! Which argument subterms get indexed is decided by an injected relevance
//! predicate, so callers can skip e.g. proposition or instance arguments
//! without this module knowing about the type system.

use std::rc::Rc;

use crate::expr::{ExtKind, Term, TermKind};
use crate::util::{LocalId, Name};

/// An edge label. `Const` and `Local` record the number of indexed children
/// following them, so that retrieval can skip a whole subtree when matching
/// a query metavariable against stored patterns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
  /// An application headed by a constant, with the given number of indexed
  /// arguments.
  Const(Name, usize),
  /// An application headed by a local, with the given number of indexed
  /// arguments.
  Local(LocalId, usize),
  /// A wildcard standing for a whole subtree.
  Star,
  /// A term shape the index does not discriminate on.
  Unsupported,
}

impl Key {
  fn arity(&self) -> usize {
    match *self {
      Key::Const(_, n) | Key::Local(_, n) => n,
      Key::Star | Key::Unsupported => 0,
    }
  }
}

/// A relevance predicate: arguments rejected by it are not indexed.
pub type Relevance<'a> = &'a dyn Fn(&Term) -> bool;

/// Compute the key for a term and the child subterms to be indexed after it.
fn key_of(t: &Term, relevant: Relevance<'_>) -> (Key, Vec<Term>) {
  let (head, args) = t.unapply();
  match &*head {
    TermKind::Const(n, _) => {
      let kids: Vec<Term> = args.into_iter().filter(|a| relevant(a)).collect();
      (Key::Const(n.clone(), kids.len()), kids)
    }
    TermKind::Local(id) => {
      let kids: Vec<Term> = args.into_iter().filter(|a| relevant(a)).collect();
      (Key::Local(*id, kids.len()), kids)
    }
    TermKind::MVar(_) | TermKind::Var(_) | TermKind::Ext(ExtKind::Hole, _) => (Key::Star, vec![]),
    _ => (Key::Unsupported, vec![]),
  }
}

/// Linearize a pattern into its full key path.
fn linearize(t: &Term, relevant: Relevance<'_>) -> Vec<Key> {
  let mut keys = vec![];
  let mut todo = vec![t.clone()];
  while let Some(t) = todo.pop() {
    let (key, kids) = key_of(&t, relevant);
    keys.push(key);
    // children are processed left to right, so push them reversed
    todo.extend(kids.into_iter().rev());
  }
  keys
}

#[derive(Clone, Debug)]
struct Node<T>(Rc<NodeCell<T>>);

#[derive(Clone, Debug)]
struct NodeCell<T> {
  values: Vec<T>,
  children: im::HashMap<Key, Node<T>>,
}

impl<T: Clone> Node<T> {
  fn new() -> Node<T> {
    Node(Rc::new(NodeCell { values: vec![], children: im::HashMap::new() }))
  }
  fn cell(&mut self) -> &mut NodeCell<T> { Rc::make_mut(&mut self.0) }
  fn is_empty(&self) -> bool { self.0.values.is_empty() && self.0.children.is_empty() }
}

/// A discrimination tree mapping term patterns to values of type `T`.
#[derive(Clone, Debug)]
pub struct DTree<T> {
  roots: im::HashMap<Key, Node<T>>,
}

impl<T> Default for DTree<T> {
  fn default() -> DTree<T> { DTree { roots: im::HashMap::new() } }
}

impl<T: Clone + PartialEq> DTree<T> {
  /// An empty tree.
  #[must_use]
  pub fn new() -> DTree<T> { DTree::default() }

  /// Insert `value` under the pattern `key`. Duplicate (pattern, value)
  /// pairs are ignored.
  pub fn insert(&mut self, key: &Term, value: T, relevant: Relevance<'_>) {
    let keys = linearize(key, relevant);
    let node = self.roots.entry(keys[0].clone()).or_insert_with(Node::new);
    insert_rec(node, &keys[1..], value);
  }

  /// Remove `value` from the pattern `key`, pruning nodes that become
  /// empty. Returns whether the value was present.
  pub fn erase(&mut self, key: &Term, value: &T, relevant: Relevance<'_>) -> bool {
    let keys = linearize(key, relevant);
    let Some(root) = self.roots.get_mut(&keys[0]) else { return false };
    let found = erase_rec(root, &keys[1..], value);
    if found && self.roots[&keys[0]].is_empty() { self.roots.remove(&keys[0]); }
    found
  }

  /// Collect every value whose pattern generalizes or is generalized by
  /// `t`, i.e. both stored `Star`s and query metavariables match whole
  /// subtrees on the opposite side.
  pub fn retrieve(&self, t: &Term, relevant: Relevance<'_>, out: &mut Vec<T>) {
    retrieve_rec(&self.roots, vec![t.clone()], relevant, out);
  }

  /// Is the tree empty?
  #[must_use]
  pub fn is_empty(&self) -> bool { self.roots.is_empty() }
}

fn insert_rec<T: Clone + PartialEq>(node: &mut Node<T>, keys: &[Key], value: T) {
  match keys.split_first() {
    None => {
      let values = &mut node.cell().values;
      if !values.contains(&value) { values.push(value) }
    }
    Some((k, rest)) => {
      let child = node.cell().children.entry(k.clone()).or_insert_with(Node::new);
      insert_rec(child, rest, value);
    }
  }
}

fn erase_rec<T: Clone + PartialEq>(node: &mut Node<T>, keys: &[Key], value: &T) -> bool {
  match keys.split_first() {
    None => {
      let values = &mut node.cell().values;
      match values.iter().position(|v| v == value) {
        Some(i) => { values.remove(i); true }
        None => false,
      }
    }
    Some((k, rest)) => {
      let cell = node.cell();
      let Some(child) = cell.children.get_mut(k) else { return false };
      let found = erase_rec(child, rest, value);
      if found && cell.children[k].is_empty() { cell.children.remove(k); }
      found
    }
  }
}

/// Collect the nodes reachable after consuming `n` whole subtrees worth of
/// keys starting from the given edge map.
fn skip_subtrees<'a, T>(children: &'a im::HashMap<Key, Node<T>>, n: usize, out: &mut Vec<&'a Node<T>>) {
  debug_assert!(n > 0);
  for (k, child) in children {
    let rest = n - 1 + k.arity();
    if rest == 0 { out.push(child) } else { skip_subtrees(&child.0.children, rest, out) }
  }
}

fn retrieve_rec<T: Clone + PartialEq>(
  children: &im::HashMap<Key, Node<T>>, mut todo: Vec<Term>,
  relevant: Relevance<'_>, out: &mut Vec<T>,
) {
  let Some(t) = todo.pop() else { return };
  let (key, kids) = key_of(&t, relevant);
  if let Key::Star = key {
    // a metavariable in the query matches every stored subtree here
    let mut nodes = vec![];
    skip_subtrees(children, 1, &mut nodes);
    for node in nodes { finish_or_recurse(node, todo.clone(), relevant, out) }
    return;
  }
  // a stored Star matches the whole query subterm
  if let Some(node) = children.get(&Key::Star) {
    finish_or_recurse(node, todo.clone(), relevant, out);
  }
  if let Some(node) = children.get(&key) {
    todo.extend(kids.into_iter().rev());
    finish_or_recurse(node, todo, relevant, out);
  }
}

fn finish_or_recurse<T: Clone + PartialEq>(
  node: &Node<T>, todo: Vec<Term>, relevant: Relevance<'_>, out: &mut Vec<T>,
) {
  if todo.is_empty() {
    for v in &node.0.values {
      if !out.contains(v) { out.push(v.clone()) }
    }
  } else {
    retrieve_rec(&node.0.children, todo, relevant, out);
  }
}

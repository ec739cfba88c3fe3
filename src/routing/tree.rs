//! Namespace trees.
//!
//! Invokers and route metadata live in trees of the same shape. A leaf sits
//! at a dotted path (`nested.method`); intermediate namespaces are created on
//! insert. Trees are built once at startup and read-only afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::http::Verb;

/// A validated dotted path, e.g. `nestedMethods.deeplyNestedMethods.method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NamePath(Vec<String>);

impl NamePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted name. `None` for empty names and empty segments.
    pub fn parse(dotted: &str) -> Option<Self> {
        let segments: Vec<String> = dotted.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self(segments))
    }

    /// Append one segment. `None` if `name` is empty or contains `.`.
    pub fn child(&self, name: &str) -> Option<Self> {
        if name.is_empty() || name.contains('.') {
            return None;
        }
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Some(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Where an insert would collide with existing content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupied {
    /// A leaf already sits at the path.
    Leaf,
    /// A namespace already sits at the path.
    Namespace,
    /// A leaf sits at a prefix of the path.
    Prefix(NamePath),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node<L> {
    Leaf(L),
    Namespace(Tree<L>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Tree<L> {
    children: BTreeMap<String, Node<L>>,
}

impl<L> Default for Tree<L> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
        }
    }
}

impl<L> Tree<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaf at a dotted path.
    pub fn get(&self, dotted: &str) -> Option<&L> {
        match self.node(&NamePath::parse(dotted)?)? {
            Node::Leaf(leaf) => Some(leaf),
            Node::Namespace(_) => None,
        }
    }

    /// Namespace at a dotted path.
    pub fn namespace(&self, dotted: &str) -> Option<&Tree<L>> {
        match self.node(&NamePath::parse(dotted)?)? {
            Node::Namespace(tree) => Some(tree),
            Node::Leaf(_) => None,
        }
    }

    pub fn node(&self, path: &NamePath) -> Option<&Node<L>> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.children.get(first)?;
        for segment in rest {
            node = match node {
                Node::Namespace(tree) => tree.children.get(segment)?,
                Node::Leaf(_) => return None,
            };
        }
        Some(node)
    }

    /// Direct children in name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Node<L>)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Every leaf with its dotted path, depth first in name order.
    pub fn leaves(&self) -> Vec<(String, &L)> {
        let mut out = Vec::new();
        self.collect(&mut String::new(), &mut out);
        out
    }

    pub fn leaf_paths(&self) -> Vec<String> {
        self.leaves().into_iter().map(|(path, _)| path).collect()
    }

    pub fn len(&self) -> usize {
        self.leaves().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn collect<'a>(&'a self, prefix: &mut String, out: &mut Vec<(String, &'a L)>) {
        for (name, node) in &self.children {
            let mark = prefix.len();
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(name);
            match node {
                Node::Leaf(leaf) => out.push((prefix.clone(), leaf)),
                Node::Namespace(tree) => tree.collect(prefix, out),
            }
            prefix.truncate(mark);
        }
    }

    /// Check that `path` could take a new leaf.
    pub fn vacant(&self, path: &NamePath) -> Result<(), Occupied> {
        let segments = path.segments();
        let mut tree = self;
        for (depth, segment) in segments.iter().enumerate() {
            let last = depth + 1 == segments.len();
            match tree.children.get(segment) {
                None => return Ok(()),
                Some(Node::Leaf(_)) if last => return Err(Occupied::Leaf),
                Some(Node::Namespace(_)) if last => return Err(Occupied::Namespace),
                Some(Node::Leaf(_)) => {
                    return Err(Occupied::Prefix(NamePath(segments[..=depth].to_vec())))
                }
                Some(Node::Namespace(next)) => tree = next,
            }
        }
        Ok(())
    }

    /// Insert a leaf, creating namespaces along the way. Never overwrites.
    pub fn insert(&mut self, path: &NamePath, leaf: L) -> Result<(), Occupied> {
        self.vacant(path)?;
        let Some((last, parents)) = path.segments().split_last() else {
            return Err(Occupied::Namespace);
        };
        let mut tree = self;
        for segment in parents {
            let node = tree
                .children
                .entry(segment.clone())
                .or_insert_with(|| Node::Namespace(Tree::new()));
            tree = match node {
                Node::Namespace(next) => next,
                Node::Leaf(_) => return Err(Occupied::Prefix(path.clone())),
            };
        }
        tree.children.insert(last.clone(), Node::Leaf(leaf));
        Ok(())
    }

    /// Same leaf paths, ignoring leaf values.
    pub fn congruent<M>(&self, other: &Tree<M>) -> bool {
        self.leaf_paths() == other.leaf_paths()
    }
}

/// Metadata leaf: the wire method and path template of an endpoint.
/// Serializes as `["GET", "/users/:id"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMeta(pub Verb, pub String);

impl RouteMeta {
    pub fn new(verb: Verb, template: impl Into<String>) -> Self {
        Self(verb, template.into())
    }

    pub fn verb(&self) -> Verb {
        self.0
    }

    pub fn template(&self) -> &str {
        &self.1
    }
}

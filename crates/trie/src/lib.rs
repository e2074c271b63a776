//! Versioned Merkle-Patricia trie over the key-value store.
//!
//! [`Trie`] is a working copy rooted at a committed version: reads resolve
//! through an in-memory overlay down to persisted nodes in the store's
//! `Trie` namespace, writes build fresh in-memory nodes along the touched
//! path, and `commit(self)` *consumes* the handle, returning the new root
//! and the node batch. Consuming the handle is deliberate: a committed trie
//! must be reloaded from its new root before further mutation, so sealed
//! versions can never be written through a stale handle.
//!
//! Node hashing is `keccak256(rlp(node))` with standard sub-32-byte
//! inlining, so roots line up with what EVM-compatible tools compute.

mod nibbles;
mod node;

pub use nibbles::key_nibbles;

use ember_store::{KvStore, Namespace, StoreError};
use ember_types::{keccak256, Hash, EMPTY_ROOT};
use nibbles::{common_prefix_len, key_nibbles as to_nibbles};
use node::{decode_node, empty_children, encode_node, Link, Node};
use std::sync::Arc;
use thiserror::Error;

/// Errors from trie operations.
#[derive(Debug, Clone, Error)]
pub enum TrieError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("missing trie node {0}")]
    MissingNode(Hash),

    #[error("failed to decode trie node: {0}")]
    Decode(String),
}

/// A mutable working copy of one trie version.
#[derive(Clone)]
pub struct Trie {
    store: Arc<dyn KvStore>,
    root: Link,
}

impl Trie {
    /// Open a working copy rooted at `root`. The zero hash and [`EMPTY_ROOT`]
    /// both denote the empty trie.
    pub fn new(store: Arc<dyn KvStore>, root: Hash) -> Self {
        let root = if root.is_zero() || root == EMPTY_ROOT {
            Link::Empty
        } else {
            Link::Hash(root)
        };
        Trie { store, root }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let nibbles = to_nibbles(key);
        self.get_link(&self.root, &nibbles)
    }

    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        let nibbles = to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Link::Empty);
        self.root = self.insert_link(root, &nibbles, value)?;
        Ok(())
    }

    /// Root hash over the pending state, without persisting anything.
    pub fn root_hash(&self) -> Hash {
        match &self.root {
            Link::Empty => EMPTY_ROOT,
            Link::Hash(hash) => *hash,
            Link::Node(node) => {
                let mut sink = Vec::new();
                let body = encode_node(node, &mut sink);
                keccak256(&body)
            }
        }
    }

    /// Seal this version: returns the new root and every node that must be
    /// persisted for the root to be loadable. The handle is consumed; open a
    /// fresh [`Trie`] at the returned root to continue.
    pub fn commit(self) -> (Hash, Vec<(Hash, Vec<u8>)>) {
        match self.root {
            Link::Empty => (EMPTY_ROOT, Vec::new()),
            Link::Hash(hash) => (hash, Vec::new()),
            Link::Node(node) => {
                let mut sink = Vec::new();
                let body = encode_node(&node, &mut sink);
                let root = keccak256(&body);
                sink.push((root, body));
                (root, sink)
            }
        }
    }

    fn load(&self, hash: &Hash) -> Result<Node, TrieError> {
        let bytes = self
            .store
            .get(Namespace::Trie, hash.as_bytes())?
            .ok_or(TrieError::MissingNode(*hash))?;
        decode_node(&bytes)
    }

    fn get_link(&self, link: &Link, nibbles: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        match link {
            Link::Empty => Ok(None),
            Link::Hash(hash) => {
                let node = self.load(hash)?;
                self.get_node(&node, nibbles)
            }
            Link::Node(node) => self.get_node(node, nibbles),
        }
    }

    fn get_node(&self, node: &Node, nibbles: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        match node {
            Node::Leaf { path, value } => {
                if path.as_slice() == nibbles {
                    Ok(Some(value.clone()))
                } else {
                    Ok(None)
                }
            }
            Node::Extension { path, child } => match nibbles.strip_prefix(path.as_slice()) {
                Some(rest) => self.get_link(child, rest),
                None => Ok(None),
            },
            Node::Branch { children, value } => {
                if nibbles.is_empty() {
                    Ok(value.clone())
                } else {
                    self.get_link(&children[nibbles[0] as usize], &nibbles[1..])
                }
            }
        }
    }

    fn insert_link(&self, link: Link, nibbles: &[u8], value: Vec<u8>) -> Result<Link, TrieError> {
        let node = match link {
            Link::Empty => {
                return Ok(Link::Node(Box::new(Node::Leaf {
                    path: nibbles.to_vec(),
                    value,
                })))
            }
            Link::Hash(hash) => self.load(&hash)?,
            Link::Node(node) => *node,
        };
        Ok(Link::Node(Box::new(self.insert_node(node, nibbles, value)?)))
    }

    fn insert_node(&self, node: Node, nibbles: &[u8], value: Vec<u8>) -> Result<Node, TrieError> {
        match node {
            Node::Leaf {
                path,
                value: old_value,
            } => {
                if path.as_slice() == nibbles {
                    return Ok(Node::Leaf { path, value });
                }
                let common = common_prefix_len(&path, nibbles);
                let mut children = empty_children();
                let mut branch_value = None;

                let old_rest = &path[common..];
                if old_rest.is_empty() {
                    branch_value = Some(old_value);
                } else {
                    children[old_rest[0] as usize] = Link::Node(Box::new(Node::Leaf {
                        path: old_rest[1..].to_vec(),
                        value: old_value,
                    }));
                }

                let new_rest = &nibbles[common..];
                if new_rest.is_empty() {
                    branch_value = Some(value);
                } else {
                    children[new_rest[0] as usize] = Link::Node(Box::new(Node::Leaf {
                        path: new_rest[1..].to_vec(),
                        value,
                    }));
                }

                let branch = Node::Branch {
                    children,
                    value: branch_value,
                };
                Ok(wrap_with_extension(&nibbles[..common], branch))
            }
            Node::Extension { path, child } => {
                let common = common_prefix_len(&path, nibbles);
                if common == path.len() {
                    let child = self.insert_link(child, &nibbles[common..], value)?;
                    return Ok(Node::Extension { path, child });
                }

                let mut children = empty_children();
                let mut branch_value = None;

                let ext_rest = &path[common..];
                let existing = if ext_rest.len() == 1 {
                    child
                } else {
                    Link::Node(Box::new(Node::Extension {
                        path: ext_rest[1..].to_vec(),
                        child,
                    }))
                };
                children[ext_rest[0] as usize] = existing;

                let new_rest = &nibbles[common..];
                if new_rest.is_empty() {
                    branch_value = Some(value);
                } else {
                    children[new_rest[0] as usize] = Link::Node(Box::new(Node::Leaf {
                        path: new_rest[1..].to_vec(),
                        value,
                    }));
                }

                let branch = Node::Branch {
                    children,
                    value: branch_value,
                };
                Ok(wrap_with_extension(&path[..common], branch))
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                if nibbles.is_empty() {
                    return Ok(Node::Branch {
                        children,
                        value: Some(value),
                    });
                }
                let idx = nibbles[0] as usize;
                let link = std::mem::replace(&mut children[idx], Link::Empty);
                children[idx] = self.insert_link(link, &nibbles[1..], value)?;
                Ok(Node::Branch {
                    children,
                    value: branch_value,
                })
            }
        }
    }
}

fn wrap_with_extension(prefix: &[u8], node: Node) -> Node {
    if prefix.is_empty() {
        node
    } else {
        Node::Extension {
            path: prefix.to_vec(),
            child: Link::Node(Box::new(node)),
        }
    }
}

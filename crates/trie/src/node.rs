//! Trie node model and RLP codec.
//!
//! A node reference inside a parent is the node's RLP itself when that RLP
//! is shorter than 32 bytes, otherwise the keccak hash of the RLP. The root
//! node is always referenced by hash.

use crate::nibbles::{hp_decode, hp_encode};
use crate::TrieError;
use ember_types::{keccak256, Hash};

/// A reference to a child node.
#[derive(Debug, Clone)]
pub(crate) enum Link {
    /// No child.
    Empty,
    /// A persisted node, loaded from the store on demand.
    Hash(Hash),
    /// An in-memory node, not yet persisted.
    Node(Box<Node>),
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Link,
    },
    Branch {
        children: Box<[Link; 16]>,
        value: Option<Vec<u8>>,
    },
}

pub(crate) fn empty_children() -> Box<[Link; 16]> {
    Box::new(std::array::from_fn(|_| Link::Empty))
}

/// RLP-encode a node body. Hashed descendants are appended to `sink` as
/// `(hash, rlp)` pairs; inline descendants are embedded in the returned
/// bytes.
pub(crate) fn encode_node(node: &Node, sink: &mut Vec<(Hash, Vec<u8>)>) -> Vec<u8> {
    match node {
        Node::Leaf { path, value } => {
            let mut stream = rlp::RlpStream::new_list(2);
            stream.append(&hp_encode(path, true));
            stream.append(value);
            stream.out().to_vec()
        }
        Node::Extension { path, child } => {
            let mut stream = rlp::RlpStream::new_list(2);
            stream.append(&hp_encode(path, false));
            append_link(&mut stream, child, sink);
            stream.out().to_vec()
        }
        Node::Branch { children, value } => {
            let mut stream = rlp::RlpStream::new_list(17);
            for child in children.iter() {
                append_link(&mut stream, child, sink);
            }
            match value {
                Some(value) => stream.append(value),
                None => stream.append_empty_data(),
            };
            stream.out().to_vec()
        }
    }
}

fn append_link(stream: &mut rlp::RlpStream, link: &Link, sink: &mut Vec<(Hash, Vec<u8>)>) {
    match link {
        Link::Empty => {
            stream.append_empty_data();
        }
        Link::Hash(hash) => {
            stream.append(&hash.to_vec());
        }
        Link::Node(node) => {
            let body = encode_node(node, sink);
            if body.len() < 32 {
                stream.append_raw(&body, 1);
            } else {
                let hash = keccak256(&body);
                sink.push((hash, body));
                stream.append(&hash.to_vec());
            }
        }
    }
}

/// Decode a node from its RLP body.
pub(crate) fn decode_node(bytes: &[u8]) -> Result<Node, TrieError> {
    let rlp = rlp::Rlp::new(bytes);
    let items = rlp
        .item_count()
        .map_err(|e| TrieError::Decode(e.to_string()))?;
    match items {
        2 => {
            let hp: Vec<u8> = rlp
                .val_at(0)
                .map_err(|e| TrieError::Decode(e.to_string()))?;
            let (path, is_leaf) = hp_decode(&hp)?;
            if is_leaf {
                let value: Vec<u8> = rlp
                    .val_at(1)
                    .map_err(|e| TrieError::Decode(e.to_string()))?;
                Ok(Node::Leaf { path, value })
            } else {
                let child = decode_link(rlp.at(1).map_err(|e| TrieError::Decode(e.to_string()))?)?;
                Ok(Node::Extension { path, child })
            }
        }
        17 => {
            let mut children = empty_children();
            for (i, slot) in children.iter_mut().enumerate() {
                *slot = decode_link(rlp.at(i).map_err(|e| TrieError::Decode(e.to_string()))?)?;
            }
            let value_item = rlp.at(16).map_err(|e| TrieError::Decode(e.to_string()))?;
            let value_bytes = value_item
                .data()
                .map_err(|e| TrieError::Decode(e.to_string()))?;
            let value = if value_bytes.is_empty() {
                None
            } else {
                Some(value_bytes.to_vec())
            };
            Ok(Node::Branch { children, value })
        }
        n => Err(TrieError::Decode(format!("unexpected node arity {n}"))),
    }
}

fn decode_link(item: rlp::Rlp<'_>) -> Result<Link, TrieError> {
    if item.is_list() {
        // Inline node embedded in the parent.
        return Ok(Link::Node(Box::new(decode_node(item.as_raw())?)));
    }
    let data = item.data().map_err(|e| TrieError::Decode(e.to_string()))?;
    if data.is_empty() {
        Ok(Link::Empty)
    } else if data.len() == 32 {
        Ok(Link::Hash(
            Hash::from_slice(data).map_err(|e| TrieError::Decode(e.to_string()))?,
        ))
    } else {
        Err(TrieError::Decode(format!(
            "node reference of {} bytes is neither empty, a hash, nor inline",
            data.len()
        )))
    }
}

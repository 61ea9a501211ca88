//! Module `commitment` implement a deterministic trie over the current
//! account and storage state.
//!
//! The trie is a fixed-fanout nibble trie without path compression: a
//! branch node sits at every nibble prefix along a touched key's path,
//! holding one 32-byte child hash per nibble. Branch nodes persist as
//! values of the `commitment` column keyed by their nibble prefix, so
//! they version, prune and merge like any other domain value.
//!
//! Recomputing after a batch of touches loads only the branches along
//! the touched paths, rewrites them bottom-up and returns the changed
//! `prefix → encoding` set together with the new root. Identical input
//! sequences yield identical roots, the hash is not cryptographic.

use std::{
    collections::{BTreeMap, BTreeSet},
    convert::TryInto,
};

use crate::{Error, Result};

/// How the aggregator maintains the commitment column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitmentMode {
    /// No commitment is computed, the root stays zero.
    None,
    /// Recompute from the touched keys' current values at every step.
    Direct,
    /// Like Direct, with touched keys de-duplicated across one step.
    UpdateKeys,
}

/// Fanout of the trie's branch nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrieVariant {
    /// 16 children per branch, one hex nibble per level.
    HexNibble,
    /// 2 children per branch, one bit per level.
    BinNibble,
}

impl TrieVariant {
    pub fn fanout(&self) -> usize {
        match self {
            TrieVariant::HexNibble => 16,
            TrieVariant::BinNibble => 2,
        }
    }

    /// Decompose a key into its nibble path.
    pub fn nibbles(&self, key: &[u8]) -> Vec<u8> {
        let mut path = Vec::with_capacity(key.len() * 8);
        for byte in key.iter() {
            match self {
                TrieVariant::HexNibble => {
                    path.push(byte >> 4);
                    path.push(byte & 0x0f);
                }
                TrieVariant::BinNibble => {
                    for bit in (0..8).rev() {
                        path.push((byte >> bit) & 0x1);
                    }
                }
            }
        }
        path
    }
}

/// One branch node: a child hash per nibble.
#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    children: Vec<Option<[u8; 32]>>,
}

impl Branch {
    pub fn empty(fanout: usize) -> Branch {
        Branch {
            children: vec![None; fanout],
        }
    }

    /// The branch merger: fold one child update into the stored node.
    pub fn set(&mut self, child: usize, hash: Option<[u8; 32]>) {
        self.children[child] = hash;
    }

    pub fn get(&self, child: usize) -> Option<[u8; 32]> {
        self.children[child]
    }

    pub fn is_empty(&self) -> bool {
        self.children.iter().all(|child| child.is_none())
    }

    /// Wire format: a 16-bit child mask followed by the set children's
    /// hashes in child order.
    pub fn encode(&self) -> Vec<u8> {
        let mut mask = 0_u16;
        for (n, child) in self.children.iter().enumerate() {
            if child.is_some() {
                mask |= 1 << n;
            }
        }

        let mut out = Vec::with_capacity(2 + 32 * self.children.len());
        out.extend_from_slice(&mask.to_be_bytes());
        for child in self.children.iter().flatten() {
            out.extend_from_slice(child);
        }
        out
    }

    pub fn decode(data: &[u8], fanout: usize) -> Result<Branch> {
        if data.len() < 2 {
            err_at!(InvalidInput, msg: "branch {} bytes", data.len())?
        }
        let mask = u16::from_be_bytes([data[0], data[1]]);

        let mut branch = Branch::empty(fanout);
        let mut off = 2;
        for n in 0..fanout {
            if mask & (1 << n) != 0 {
                if off + 32 > data.len() {
                    err_at!(InvalidInput, msg: "short branch child {}", n)?
                }
                let mut hash = [0_u8; 32];
                hash.copy_from_slice(&data[off..off + 32]);
                branch.children[n] = Some(hash);
                off += 32;
            }
        }
        if off != data.len() {
            err_at!(InvalidInput, msg: "trailing branch bytes {}", data.len() - off)?
        }
        Ok(branch)
    }

    /// Hash of this node.
    pub fn hash(&self) -> [u8; 32] {
        hash32(&[&[0x01], &self.encode()])
    }
}

/// Hash of a leaf: the full key and its current value.
pub fn leaf_hash(key: &[u8], value: &[u8]) -> [u8; 32] {
    hash32(&[&[0x00], key, value])
}

/// Root of an empty trie.
pub fn empty_root() -> [u8; 32] {
    [0_u8; 32]
}

/// 32-byte digest from two seeded 128-bit city hashes.
pub fn hash32(parts: &[&[u8]]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
    buf.push(0xA5);
    for part in parts.iter() {
        buf.extend_from_slice(part);
    }
    let a = cityhash_rs::cityhash_110_128(&buf);
    buf[0] = 0x5A;
    let b = cityhash_rs::cityhash_110_128(&buf);

    let mut out = [0_u8; 32];
    out[..16].copy_from_slice(&a.to_be_bytes());
    out[16..].copy_from_slice(&b.to_be_bytes());
    out
}

/// One batch recomputation over the touched keys.
///
/// `leaves` maps each touched key to its current leaf hash, None for a
/// deleted key. `load_branch` resolves a nibble prefix to the stored
/// branch encoding, reading through the commitment column.
///
/// The key population must be prefix-free: no key may be a proper prefix
/// of another, or a leaf and a subtree would contend for one child slot.
/// The aggregator's tagged state keys satisfy this by construction.
///
/// Return the new root and the changed branches, `prefix → Some(encoding)`
/// for rewritten nodes and `prefix → None` for nodes that emptied out.
#[allow(clippy::type_complexity)]
pub fn compute_root<F>(
    variant: TrieVariant,
    leaves: &BTreeMap<Vec<u8>, Option<[u8; 32]>>,
    mut load_branch: F,
) -> Result<([u8; 32], BTreeMap<Vec<u8>, Option<Vec<u8>>>)>
where
    F: FnMut(&[u8]) -> Result<Option<Vec<u8>>>,
{
    let fanout = variant.fanout();

    let mut cache: BTreeMap<Vec<u8>, Branch> = BTreeMap::new();
    let mut dirty: BTreeSet<Vec<u8>> = BTreeSet::new();
    let mut load = |cache: &mut BTreeMap<Vec<u8>, Branch>,
                    prefix: &[u8]|
     -> Result<()> {
        if !cache.contains_key(prefix) {
            let branch = match load_branch(prefix)? {
                Some(data) => Branch::decode(&data, fanout)?,
                None => Branch::empty(fanout),
            };
            cache.insert(prefix.to_vec(), branch);
        }
        Ok(())
    };

    // set every touched leaf into its parent branch.
    for (key, leaf) in leaves.iter() {
        let path = variant.nibbles(key);
        let (parent, child) = match path.split_last() {
            Some((child, parent)) => (parent.to_vec(), *child as usize),
            None => continue, // empty key cannot be a leaf
        };
        load(&mut cache, &parent)?;
        cache.get_mut(&parent).unwrap().set(child, *leaf);
        dirty.insert(parent);
    }

    // rewrite bottom-up: longest prefixes first, parents become dirty
    // as their children's hashes move.
    let mut updates: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
    while let Some(prefix) = dirty.iter().max_by_key(|p| p.len()).cloned() {
        dirty.remove(&prefix);

        let branch = cache.get(&prefix).unwrap().clone();
        let (emptied, hash) = match branch.is_empty() {
            true => (true, None),
            false => (false, Some(branch.hash())),
        };
        updates.insert(
            prefix.clone(),
            match emptied {
                true => None,
                false => Some(branch.encode()),
            },
        );

        if let Some((child, parent)) = prefix.split_last() {
            let parent = parent.to_vec();
            load(&mut cache, &parent)?;
            cache.get_mut(&parent).unwrap().set(*child as usize, hash);
            dirty.insert(parent);
        }
    }

    // an untouched batch still answers with the standing root.
    load(&mut cache, &[])?;
    let root = match cache.get(&[][..]) {
        Some(branch) if !branch.is_empty() => branch.hash(),
        Some(_) | None => empty_root(),
    };
    Ok((root, updates))
}

/// Recovery marker persisted under the `state` key of the commitment
/// column: `(block_num, txnum, root)`.
pub const STATE_KEY: &[u8] = b"state";

pub fn encode_state(block_num: u64, txnum: u64, root: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(48);
    out.extend_from_slice(&block_num.to_be_bytes());
    out.extend_from_slice(&txnum.to_be_bytes());
    out.extend_from_slice(root);
    out
}

pub fn decode_state(data: &[u8]) -> Result<(u64, u64, [u8; 32])> {
    if data.len() != 48 {
        err_at!(InvalidInput, msg: "state marker {} bytes", data.len())?
    }
    let block_num = u64::from_be_bytes(data[..8].try_into().unwrap());
    let txnum = u64::from_be_bytes(data[8..16].try_into().unwrap());
    let mut root = [0_u8; 32];
    root.copy_from_slice(&data[16..]);
    Ok((block_num, txnum, root))
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;

//! Module `mph` implement a minimal perfect hash from keys to file offsets.
//!
//! The builder uses the hash-displace-and-probe construction: keys are
//! hashed into buckets, buckets are assigned, biggest first, a displacement
//! that steers each of their keys into a free slot. When a bucket cannot be
//! displaced the whole build is retried with a fresh random salt, such
//! collisions are never surfaced to the caller.
//!
//! Lookup of a key that was never inserted still lands on some slot and
//! returns that slot's offset. Callers must verify the key at the returned
//! offset against the probed key.

use cbordata::Cborize;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use std::{convert::TryFrom, ffi};

use crate::{util, Error, Result};

const MPH_VER: u32 = 0x00020001;

// marks the tail of a finished index file.
const FILE_MARKER: u64 = 0x5354_5241_4D50_0001;

// displacement search gives up at this bound, forcing a salt retry.
const DISPLACE_LIMIT: u64 = 1024;

// salt retries before declaring the key-set hostile.
const SALT_RETRIES: usize = 64;

/// Minimal perfect hash, key to u64 offset.
#[derive(Clone, Debug, Default, Cborize)]
pub struct Mph {
    salt: u64,
    n_slots: u64,
    n_buckets: u64,
    displace: Vec<u32>,
    offsets: Vec<u64>,
}

impl Mph {
    const ID: u32 = MPH_VER;

    /// Build from `(key, offset)` pairs. Keys must be unique.
    pub fn build<K>(pairs: &[(K, u64)]) -> Result<Mph>
    where
        K: AsRef<[u8]>,
    {
        let n_slots = u64::try_from(pairs.len()).unwrap();
        if n_slots == 0 {
            return Ok(Mph::default());
        }
        let n_buckets = (n_slots / 2) + 1;

        let mut rng = SmallRng::from_entropy();
        'salt: for _attempt in 0..SALT_RETRIES {
            let salt: u64 = rng.gen();

            let mut buckets: Vec<Vec<usize>> = vec![vec![]; n_buckets as usize];
            let mut hashes: Vec<(u64, u64)> = Vec::with_capacity(pairs.len());
            for (i, (key, _)) in pairs.iter().enumerate() {
                let (g, h1, h2) = hash_key(salt, key.as_ref(), n_buckets);
                buckets[g as usize].push(i);
                hashes.push((h1, h2));
            }

            let mut order: Vec<usize> = (0..buckets.len()).collect();
            order.sort_by_key(|g| std::cmp::Reverse(buckets[*g].len()));

            let mut displace = vec![0_u32; n_buckets as usize];
            let mut occupied = vec![false; n_slots as usize];
            let mut offsets = vec![0_u64; n_slots as usize];

            for g in order.into_iter() {
                if buckets[g].is_empty() {
                    continue;
                }
                let d = match displace_bucket(
                    &buckets[g],
                    &hashes,
                    &occupied,
                    n_slots,
                ) {
                    Some(d) => d,
                    None => continue 'salt,
                };
                displace[g] = u32::try_from(d).unwrap();
                for i in buckets[g].iter() {
                    let slot = slot_of(hashes[*i], d, n_slots);
                    occupied[slot as usize] = true;
                    offsets[slot as usize] = pairs[*i].1;
                }
            }

            let val = Mph {
                salt,
                n_slots,
                n_buckets,
                displace,
                offsets,
            };
            return Ok(val);
        }

        err_at!(Fatal, msg: "cannot displace {} keys, duplicates?", n_slots)
    }

    /// Return the offset stored for `key`. Returns None only on an empty
    /// index; for unknown keys an arbitrary member offset comes back, and
    /// the caller is expected to verify.
    pub fn lookup(&self, key: &[u8]) -> Option<u64> {
        if self.n_slots == 0 {
            return None;
        }
        let (g, h1, h2) = hash_key(self.salt, key, self.n_buckets);
        let d = u64::from(self.displace[g as usize]);
        let slot = slot_of((h1, h2), d, self.n_slots);
        Some(self.offsets[slot as usize])
    }

    pub fn len(&self) -> u64 {
        self.n_slots
    }

    pub fn is_empty(&self) -> bool {
        self.n_slots == 0
    }

    /// Persist into an index file at `loc`.
    pub fn write(&self, loc: &ffi::OsStr) -> Result<()> {
        util::write_tagged_file(loc, self.clone(), FILE_MARKER)
    }

    /// Load an index file written by [Mph::write].
    pub fn open(loc: &ffi::OsStr) -> Result<Mph> {
        util::read_tagged_file(loc, FILE_MARKER)
    }
}

fn hash_key(salt: u64, key: &[u8], n_buckets: u64) -> (u64, u64, u64) {
    let mut buf = Vec::with_capacity(8 + key.len());
    buf.extend_from_slice(&salt.to_le_bytes());
    buf.extend_from_slice(key);
    let h = cityhash_rs::cityhash_110_128(&buf);

    let h1 = h as u64;
    let h2 = ((h >> 64) as u64) | 1; // odd, never zero
    let g = h1.rotate_left(32).wrapping_mul(0x9E3779B97F4A7C15) % n_buckets;
    (g, h1, h2)
}

fn slot_of((h1, h2): (u64, u64), d: u64, n_slots: u64) -> u64 {
    h1.wrapping_add(d.wrapping_mul(h2)) % n_slots
}

fn displace_bucket(
    bucket: &[usize],
    hashes: &[(u64, u64)],
    occupied: &[bool],
    n_slots: u64,
) -> Option<u64> {
    'next_d: for d in 0..DISPLACE_LIMIT {
        let mut taken: Vec<u64> = Vec::with_capacity(bucket.len());
        for i in bucket.iter() {
            let slot = slot_of(hashes[*i], d, n_slots);
            if occupied[slot as usize] || taken.contains(&slot) {
                continue 'next_d;
            }
            taken.push(slot);
        }
        return Some(d);
    }
    None
}

#[cfg(test)]
#[path = "mph_test.rs"]
mod mph_test;

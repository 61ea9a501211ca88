//! Module `ef` implement the Elias-Fano codec for monotone integer lists.
//!
//! Posting lists of txnums are strictly increasing, which makes them a fit
//! for the classic upper/lower bits split: the low `l` bits of every value
//! are stored verbatim, the high bits are unary coded into a bit vector.
//! Total cost stays within `2n + n*ceil(log2(u/n))` bits for `n` values
//! drawn from universe `u`.

use std::convert::TryFrom;

use crate::{util, Error, Result};

/// Elias-Fano encoded list of monotonically increasing u64 values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EliasFano {
    n: u64,
    u: u64, // universe, max value + 1
    l: u32, // lower bit width
    lower: Vec<u64>,
    upper: Vec<u64>,
}

impl EliasFano {
    /// Encode `values`. Values must be monotonically increasing.
    pub fn from_values(values: &[u64]) -> Result<EliasFano> {
        let n = u64::try_from(values.len()).unwrap();
        if n == 0 {
            return Ok(EliasFano::default());
        }

        let u = match values[values.len() - 1].checked_add(1) {
            Some(u) => u,
            None => return err_at!(InvalidInput, msg: "universe overflow"),
        };
        let l = lower_width(u, n);

        let mut ef = EliasFano {
            n,
            u,
            l,
            lower: vec![0; ((values.len() * (l as usize)) / 64) + 1],
            upper: vec![0; (((u >> l) + n) as usize / 64) + 1],
        };

        let mut prev = 0;
        for (i, value) in values.iter().enumerate() {
            if *value < prev {
                err_at!(InvalidInput, msg: "not monotone {} after {}", value, prev)?
            }
            prev = *value;

            if l > 0 {
                let low = value & ((1 << l) - 1);
                set_bits(&mut ef.lower, i * (l as usize), l as usize, low);
            }
            let high = (value >> l) as usize;
            set_bit(&mut ef.upper, high + i);
        }

        Ok(ef)
    }

    /// Number of values in the list.
    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Largest value in the list.
    pub fn max(&self) -> Option<u64> {
        match self.n {
            0 => None,
            _ => Some(self.u - 1),
        }
    }

    /// Smallest value in the list.
    pub fn min(&self) -> Option<u64> {
        self.iter().next()
    }

    /// Iterate values in ascending order.
    pub fn iter(&self) -> Iter {
        Iter {
            ef: self,
            i: 0,
            bit: 0,
        }
    }

    /// Return the smallest value `>= lo`, if any.
    pub fn seek(&self, lo: u64) -> Option<u64> {
        self.iter().find(|value| *value >= lo)
    }

    /// Serialize into a byte-string.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![];
        util::encode_varint(self.n, &mut out);
        if self.n == 0 {
            return out;
        }
        util::encode_varint(self.u, &mut out);
        util::encode_varint(u64::from(self.l), &mut out);
        util::encode_varint(u64::try_from(self.lower.len()).unwrap(), &mut out);
        for word in self.lower.iter() {
            out.extend_from_slice(&word.to_le_bytes());
        }
        util::encode_varint(u64::try_from(self.upper.len()).unwrap(), &mut out);
        for word in self.upper.iter() {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Deserialize from a byte-string produced by [EliasFano::encode].
    pub fn decode(data: &[u8]) -> Result<EliasFano> {
        let (n, mut m) = util::decode_varint(data)?;
        if n == 0 {
            return Ok(EliasFano::default());
        }

        let (u, k) = util::decode_varint(&data[m..])?;
        m += k;
        let (l, k) = util::decode_varint(&data[m..])?;
        m += k;

        let mut read_words = |m: &mut usize| -> Result<Vec<u64>> {
            let (len, k) = util::decode_varint(&data[*m..])?;
            *m += k;
            let len = usize::try_from(len).unwrap();
            let mut words = Vec::with_capacity(len);
            for _ in 0..len {
                if *m + 8 > data.len() {
                    return err_at!(InvalidInput, msg: "truncated elias-fano");
                }
                let mut buf = [0_u8; 8];
                buf.copy_from_slice(&data[*m..*m + 8]);
                words.push(u64::from_le_bytes(buf));
                *m += 8;
            }
            Ok(words)
        };

        let lower = read_words(&mut m)?;
        let upper = read_words(&mut m)?;

        let val = EliasFano {
            n,
            u,
            l: u32::try_from(l).unwrap(),
            lower,
            upper,
        };
        Ok(val)
    }
}

/// Ascending iterator over an [EliasFano] list.
pub struct Iter<'a> {
    ef: &'a EliasFano,
    i: u64,      // values yielded so far
    bit: usize,  // scan position in upper bits
}

impl<'a> Iterator for Iter<'a> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.i >= self.ef.n {
            return None;
        }
        let nbits = self.ef.upper.len() * 64;
        while self.bit < nbits {
            let bit = self.bit;
            self.bit += 1;
            if get_bit(&self.ef.upper, bit) {
                let i = self.i;
                self.i += 1;
                let high = (bit as u64) - i;
                let low = match self.ef.l {
                    0 => 0,
                    l => get_bits(
                        &self.ef.lower,
                        (i as usize) * (l as usize),
                        l as usize,
                    ),
                };
                return Some((high << self.ef.l) | low);
            }
        }
        None
    }
}

fn lower_width(u: u64, n: u64) -> u32 {
    match u / n {
        q if q <= 1 => 0,
        q => 63 - q.leading_zeros(),
    }
}

fn set_bit(words: &mut [u64], bit: usize) {
    words[bit / 64] |= 1 << (bit % 64);
}

fn get_bit(words: &[u64], bit: usize) -> bool {
    (words[bit / 64] >> (bit % 64)) & 0x1 == 0x1
}

// `len` is always < 64 here, values span at most two words.
fn set_bits(words: &mut [u64], pos: usize, len: usize, value: u64) {
    let (w, o) = (pos / 64, pos % 64);
    words[w] |= value << o;
    if o + len > 64 {
        words[w + 1] |= value >> (64 - o);
    }
}

fn get_bits(words: &[u64], pos: usize, len: usize) -> u64 {
    let (w, o) = (pos / 64, pos % 64);
    let mut value = words[w] >> o;
    if o + len > 64 {
        value |= words[w + 1] << (64 - o);
    }
    value & ((1 << len) - 1)
}

#[cfg(test)]
#[path = "ef_test.rs"]
mod ef_test;

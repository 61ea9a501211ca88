//! Module `account` implement the packed wire format for account state.
//!
//! The record is a variable-length concatenation of four fields, each
//! prefixed with a one-byte length: nonce, balance, code hash, incarnation.
//! Nonce and incarnation are big-endian integers with leading zeros
//! trimmed, the balance is an unsigned big-endian number of up to 32
//! bytes, the code hash is either absent or exactly 32 bytes. Zero valued
//! fields encode with length ZERO.

use arbitrary::Arbitrary;

use std::{convert::TryFrom, fmt, result};

use crate::{Error, Result};

/// Unsigned 256-bit balance, big-endian.
#[derive(Clone, Copy, Default, PartialEq, Eq, Arbitrary)]
pub struct Balance(pub [u8; 32]);

impl Balance {
    pub fn from_u64(value: u64) -> Balance {
        let mut balance = Balance::default();
        balance.0[24..].copy_from_slice(&value.to_be_bytes());
        balance
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    // big-endian bytes with leading zeros trimmed, empty when zero.
    fn to_trimmed_bytes(self) -> Vec<u8> {
        let n = self.0.iter().take_while(|b| **b == 0).count();
        self.0[n..].to_vec()
    }

    fn from_trimmed_bytes(data: &[u8]) -> Result<Balance> {
        if data.len() > 32 {
            err_at!(InvalidInput, msg: "balance {} bytes", data.len())?
        }
        let mut balance = Balance::default();
        balance.0[32 - data.len()..].copy_from_slice(data);
        Ok(balance)
    }
}

impl fmt::Debug for Balance {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let mut val = String::new();
        for b in self.0.iter() {
            val.push_str(&format!("{:02x}", b));
        }
        write!(f, "0x{}", val)
    }
}

/// Account state as understood by the accounts column.
#[derive(Clone, Debug, Default, PartialEq, Arbitrary)]
pub struct Account {
    pub nonce: u64,
    pub balance: Balance,
    pub code_hash: Option<[u8; 32]>,
    pub incarnation: u64,
}

impl Account {
    pub fn new(
        nonce: u64,
        balance: Balance,
        code_hash: Option<[u8; 32]>,
        incarnation: u64,
    ) -> Account {
        Account {
            nonce,
            balance,
            code_hash,
            incarnation,
        }
    }

    /// Pack into the wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(80);

        let nonce = trim_u64(self.nonce);
        out.push(u8::try_from(nonce.len()).unwrap());
        out.extend_from_slice(&nonce);

        let balance = self.balance.to_trimmed_bytes();
        out.push(u8::try_from(balance.len()).unwrap());
        out.extend_from_slice(&balance);

        match &self.code_hash {
            Some(hash) => {
                out.push(32);
                out.extend_from_slice(hash);
            }
            None => out.push(0),
        }

        let incarnation = trim_u64(self.incarnation);
        out.push(u8::try_from(incarnation.len()).unwrap());
        out.extend_from_slice(&incarnation);

        out
    }

    /// Unpack from the wire format. Inverse of [Account::encode] on every
    /// field, the code hash included.
    pub fn decode(data: &[u8]) -> Result<Account> {
        let mut dec = Dec { data, off: 0 };

        let nonce = untrim_u64(dec.field(8, "nonce")?)?;
        let balance = Balance::from_trimmed_bytes(dec.field(32, "balance")?)?;
        let code_hash = match dec.field(32, "code-hash")? {
            hash if hash.is_empty() => None,
            hash if hash.len() == 32 => {
                let mut out = [0_u8; 32];
                out.copy_from_slice(hash);
                Some(out)
            }
            hash => err_at!(InvalidInput, msg: "code-hash {} bytes", hash.len())?,
        };
        let incarnation = untrim_u64(dec.field(8, "incarnation")?)?;

        if dec.off != data.len() {
            err_at!(InvalidInput, msg: "trailing {} bytes", data.len() - dec.off)?
        }

        let val = Account {
            nonce,
            balance,
            code_hash,
            incarnation,
        };
        Ok(val)
    }
}

struct Dec<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Dec<'a> {
    fn field(&mut self, max: usize, what: &str) -> Result<&'a [u8]> {
        if self.off >= self.data.len() {
            err_at!(InvalidInput, msg: "missing {} length", what)?
        }
        let n = self.data[self.off] as usize;
        self.off += 1;
        if n > max {
            err_at!(InvalidInput, msg: "{} length {}", what, n)?
        }
        if self.off + n > self.data.len() {
            err_at!(InvalidInput, msg: "short {} field {}", what, n)?
        }
        let field = &self.data[self.off..self.off + n];
        self.off += n;
        Ok(field)
    }
}

fn trim_u64(value: u64) -> Vec<u8> {
    let data = value.to_be_bytes();
    let n = data.iter().take_while(|b| **b == 0).count();
    data[n..].to_vec()
}

fn untrim_u64(data: &[u8]) -> Result<u64> {
    let mut out = [0_u8; 8];
    out[8 - data.len()..].copy_from_slice(data);
    Ok(u64::from_be_bytes(out))
}

#[cfg(test)]
#[path = "account_test.rs"]
mod account_test;

//! 256-bit unsigned word, the only value type the VM operates on.
//!
//! All arithmetic is exact-width: callers choose between `checked_*` (the
//! EVM's reverting semantics) and `saturating_*` (clamping) variants. Nothing
//! here wraps silently except the explicit `wrapping_sub` used by division.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, read_bytes};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not, Shl, Shr};
use std::str::FromStr;

/// Encoded width of a word in bytes.
pub const WORD_LEN: usize = 32;

/// Largest power of ten that fits in a `u64`, used to render decimals in chunks.
const DECIMAL_CHUNK: u64 = 10_000_000_000_000_000_000;

/// Unsigned 256-bit integer stored as four little-endian `u64` limbs.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct U256([u64; 4]);

/// Errors produced while parsing a word from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseU256Error {
    #[error("empty number literal")]
    Empty,
    #[error("invalid digit '{digit}' in number literal '{input}'")]
    InvalidDigit { input: String, digit: char },
    #[error("number literal '{0}' does not fit in 256 bits")]
    Overflow(String),
}

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);
    pub const ONE: U256 = U256([1, 0, 0, 0]);
    pub const MAX: U256 = U256([u64::MAX; 4]);

    pub const fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    pub const fn from_u128(value: u128) -> Self {
        U256([value as u64, (value >> 64) as u64, 0, 0])
    }

    /// Builds a word from big-endian bytes, the EVM's memory layout.
    pub fn from_be_bytes(bytes: [u8; WORD_LEN]) -> Self {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let start = WORD_LEN - (i + 1) * 8;
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[start..start + 8]);
            *limb = u64::from_be_bytes(chunk);
        }
        U256(limbs)
    }

    pub fn to_be_bytes(&self) -> [u8; WORD_LEN] {
        let mut out = [0u8; WORD_LEN];
        for (i, limb) in self.0.iter().enumerate() {
            let start = WORD_LEN - (i + 1) * 8;
            out[start..start + 8].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&limb| limb == 0)
    }

    /// Number of significant bits (0 for zero).
    pub fn bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i as u32 + (64 - self.0[i].leading_zeros());
            }
        }
        0
    }

    /// Returns bit `index` (0 = least significant).
    pub fn bit(&self, index: u32) -> bool {
        if index >= 256 {
            return false;
        }
        (self.0[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: u32) {
        self.0[(index / 64) as usize] |= 1 << (index % 64);
    }

    /// Truncates to the low 32 bits, as `uint32(x)` does on-chain.
    pub fn low_u32(&self) -> u32 {
        self.0[0] as u32
    }

    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    /// Returns the value as `u64` if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[1..].iter().all(|&limb| limb == 0) {
            Some(self.0[0])
        } else {
            None
        }
    }

    /// Returns the value as `usize` if it fits.
    pub fn to_usize(&self) -> Option<usize> {
        self.to_u64().and_then(|v| usize::try_from(v).ok())
    }

    /// Mask with the low `bits` bits set.
    pub fn low_mask(bits: u32) -> Self {
        if bits >= 256 {
            U256::MAX
        } else {
            (U256::ONE << bits).wrapping_sub(U256::ONE)
        }
    }

    pub fn overflowing_add(self, rhs: Self) -> (Self, bool) {
        let mut out = [0u64; 4];
        let mut carry = false;
        for (i, limb) in out.iter_mut().enumerate() {
            let (sum, c1) = self.0[i].overflowing_add(rhs.0[i]);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            *limb = sum;
            carry = c1 || c2;
        }
        (U256(out), carry)
    }

    pub fn overflowing_sub(self, rhs: Self) -> (Self, bool) {
        let mut out = [0u64; 4];
        let mut borrow = false;
        for (i, limb) in out.iter_mut().enumerate() {
            let (diff, b1) = self.0[i].overflowing_sub(rhs.0[i]);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            *limb = diff;
            borrow = b1 || b2;
        }
        (U256(out), borrow)
    }

    pub fn overflowing_mul(self, rhs: Self) -> (Self, bool) {
        let mut wide = [0u64; 8];
        for i in 0..4 {
            let mut carry: u128 = 0;
            for j in 0..4 {
                let cur = wide[i + j] as u128 + (self.0[i] as u128) * (rhs.0[j] as u128) + carry;
                wide[i + j] = cur as u64;
                carry = cur >> 64;
            }
            wide[i + 4] = carry as u64;
        }
        let overflow = wide[4..].iter().any(|&limb| limb != 0);
        (U256([wide[0], wide[1], wide[2], wide[3]]), overflow)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.overflowing_add(rhs) {
            (v, false) => Some(v),
            _ => None,
        }
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.overflowing_sub(rhs) {
            (v, false) => Some(v),
            _ => None,
        }
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        match self.overflowing_mul(rhs) {
            (v, false) => Some(v),
            _ => None,
        }
    }

    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        self.div_rem(rhs).map(|(q, _)| q)
    }

    pub fn checked_rem(self, rhs: Self) -> Option<Self> {
        self.div_rem(rhs).map(|(_, r)| r)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        self.checked_add(rhs).unwrap_or(U256::MAX)
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).unwrap_or(U256::ZERO)
    }

    pub fn saturating_mul(self, rhs: Self) -> Self {
        self.checked_mul(rhs).unwrap_or(U256::MAX)
    }

    pub fn wrapping_sub(self, rhs: Self) -> Self {
        self.overflowing_sub(rhs).0
    }

    /// Exponentiation by squaring. `0^0 == 1`, matching the EVM `EXP` opcode.
    ///
    /// Every intermediate square is a prefix power of the final result, so an
    /// intermediate overflow implies the final result overflows too.
    pub fn checked_pow(self, exp: Self) -> Option<Self> {
        if exp.is_zero() {
            return Some(U256::ONE);
        }
        if self.is_zero() || self == U256::ONE {
            return Some(self);
        }
        let mut acc = U256::ONE;
        for i in (0..exp.bits()).rev() {
            acc = acc.checked_mul(acc)?;
            if exp.bit(i) {
                acc = acc.checked_mul(self)?;
            }
        }
        Some(acc)
    }

    /// `10^exp`, or `None` when it exceeds 256 bits.
    pub fn pow10(exp: u32) -> Option<Self> {
        U256::from_u64(10).checked_pow(U256::from(exp))
    }

    /// Quotient and remainder, `None` on a zero divisor.
    pub fn div_rem(self, rhs: Self) -> Option<(Self, Self)> {
        if rhs.is_zero() {
            return None;
        }
        if self < rhs {
            return Some((U256::ZERO, self));
        }
        if let (Some(a), Some(b)) = (self.to_u128(), rhs.to_u128()) {
            return Some((U256::from_u128(a / b), U256::from_u128(a % b)));
        }

        let mut quotient = U256::ZERO;
        let mut rem = U256::ZERO;
        for i in (0..self.bits()).rev() {
            let carry = rem.bit(255);
            rem = rem << 1;
            if self.bit(i) {
                rem.0[0] |= 1;
            }
            if carry || rem >= rhs {
                rem = rem.wrapping_sub(rhs);
                quotient.set_bit(i);
            }
        }
        Some((quotient, rem))
    }

    fn to_u128(self) -> Option<u128> {
        if self.0[2] == 0 && self.0[3] == 0 {
            Some(((self.0[1] as u128) << 64) | self.0[0] as u128)
        } else {
            None
        }
    }

    /// Divides by a non-zero `u64`, returning quotient and remainder.
    fn div_rem_u64(self, divisor: u64) -> (Self, u64) {
        let mut out = [0u64; 4];
        let mut rem: u128 = 0;
        for i in (0..4).rev() {
            let cur = (rem << 64) | self.0[i] as u128;
            out[i] = (cur / divisor as u128) as u64;
            rem = cur % divisor as u128;
        }
        (U256(out), rem as u64)
    }

    /// Parses a decimal literal or a `0x`-prefixed hex literal.
    pub fn from_str_radix(input: &str, radix: u32) -> Result<Self, ParseU256Error> {
        if input.is_empty() {
            return Err(ParseU256Error::Empty);
        }
        let base = U256::from(radix);
        let mut acc = U256::ZERO;
        for ch in input.chars() {
            let digit = ch.to_digit(radix).ok_or_else(|| ParseU256Error::InvalidDigit {
                input: input.to_string(),
                digit: ch,
            })?;
            acc = acc
                .checked_mul(base)
                .and_then(|v| v.checked_add(U256::from(digit)))
                .ok_or_else(|| ParseU256Error::Overflow(input.to_string()))?;
        }
        Ok(acc)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl Shl<u32> for U256 {
    type Output = U256;

    fn shl(self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let limb_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        let mut out = [0u64; 4];
        for i in limb_shift..4 {
            out[i] = self.0[i - limb_shift] << bit_shift;
            if bit_shift > 0 && i > limb_shift {
                out[i] |= self.0[i - limb_shift - 1] >> (64 - bit_shift);
            }
        }
        U256(out)
    }
}

impl Shr<u32> for U256 {
    type Output = U256;

    fn shr(self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let limb_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        let mut out = [0u64; 4];
        for i in 0..(4 - limb_shift) {
            out[i] = self.0[i + limb_shift] >> bit_shift;
            if bit_shift > 0 && i + limb_shift + 1 < 4 {
                out[i] |= self.0[i + limb_shift + 1] << (64 - bit_shift);
            }
        }
        U256(out)
    }
}

impl BitAnd for U256 {
    type Output = U256;

    fn bitand(self, rhs: U256) -> U256 {
        U256([
            self.0[0] & rhs.0[0],
            self.0[1] & rhs.0[1],
            self.0[2] & rhs.0[2],
            self.0[3] & rhs.0[3],
        ])
    }
}

impl BitOr for U256 {
    type Output = U256;

    fn bitor(self, rhs: U256) -> U256 {
        U256([
            self.0[0] | rhs.0[0],
            self.0[1] | rhs.0[1],
            self.0[2] | rhs.0[2],
            self.0[3] | rhs.0[3],
        ])
    }
}

impl Not for U256 {
    type Output = U256;

    fn not(self) -> U256 {
        U256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }
}

macro_rules! impl_from_uint {
    ($($t:ty),*) => {
        $(
            impl From<$t> for U256 {
                fn from(value: $t) -> Self {
                    U256::from_u64(value as u64)
                }
            }
        )*
    };
}

impl_from_uint!(u8, u16, u32, u64, usize);

impl From<u128> for U256 {
    fn from(value: u128) -> Self {
        U256::from_u128(value)
    }
}

impl From<bool> for U256 {
    fn from(value: bool) -> Self {
        if value { U256::ONE } else { U256::ZERO }
    }
}

impl FromStr for U256 {
    type Err = ParseU256Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => U256::from_str_radix(hex, 16),
            None => U256::from_str_radix(s, 10),
        }
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let mut chunks = Vec::with_capacity(4);
        let mut rest = *self;
        while !rest.is_zero() {
            let (q, r) = rest.div_rem_u64(DECIMAL_CHUNK);
            chunks.push(r);
            rest = q;
        }
        let mut iter = chunks.iter().rev();
        if let Some(first) = iter.next() {
            write!(f, "{first}")?;
        }
        for chunk in iter {
            write!(f, "{chunk:019}")?;
        }
        Ok(())
    }
}

impl fmt::LowerHex for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        let top = match (0..4).rev().find(|&i| self.0[i] != 0) {
            Some(i) => i,
            None => return write!(f, "0"),
        };
        write!(f, "{:x}", self.0[top])?;
        for i in (0..top).rev() {
            write!(f, "{:016x}", self.0[i])?;
        }
        Ok(())
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Encode for U256 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_be_bytes());
    }
}

impl Decode for U256 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, WORD_LEN)?;
        let mut word = [0u8; WORD_LEN];
        word.copy_from_slice(bytes);
        Ok(U256::from_be_bytes(word))
    }
}

impl serde::Serialize for U256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{self:#x}"))
    }
}

impl<'de> serde::Deserialize<'de> for U256 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Repr::Number(n) => Ok(U256::from(n)),
        }
    }
}

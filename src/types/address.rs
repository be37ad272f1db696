//! 20-byte account addresses, carried on the VM stack as words.

use crate::types::u256::U256;
use std::fmt;
use std::str::FromStr;

pub const ADDRESS_LEN: usize = 20;

/// Account or contract address.
///
/// On the stack an address occupies the low 160 bits of a word; converting
/// back truncates the high 96 bits, as `address(uint160(x))` does.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseAddressError {
    #[error("address must be 0x followed by 40 hex digits, got '{0}'")]
    Malformed(String),
}

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub fn from_word(word: U256) -> Self {
        let bytes = word.to_be_bytes();
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&bytes[32 - ADDRESS_LEN..]);
        Address(out)
    }

    pub fn to_word(self) -> U256 {
        let mut bytes = [0u8; 32];
        bytes[32 - ADDRESS_LEN..].copy_from_slice(&self.0);
        U256::from_be_bytes(bytes)
    }
}

impl From<Address> for U256 {
    fn from(address: Address) -> Self {
        address.to_word()
    }
}

impl From<U256> for Address {
    fn from(word: U256) -> Self {
        Address::from_word(word)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseAddressError::Malformed(s.to_string());
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(malformed)?;
        if hex.len() != ADDRESS_LEN * 2 || !hex.is_ascii() {
            return Err(malformed());
        }
        let mut out = [0u8; ADDRESS_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).map_err(|_| malformed())?;
        }
        Ok(Address(out))
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_round_trip_keeps_low_160_bits() {
        let addr: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(addr.to_word(), U256::from(255u32));

        let dirty = U256::MAX;
        let truncated = Address::from_word(dirty);
        assert_eq!(truncated.0, [0xff; ADDRESS_LEN]);
        assert_eq!(truncated.to_word(), U256::low_mask(160));
    }

    #[test]
    fn display_is_lowercase_hex() {
        let addr = Address([0xAB; ADDRESS_LEN]);
        assert_eq!(addr.to_string(), format!("0x{}", "ab".repeat(20)));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("1234567890123456789012345678901234567890".parse::<Address>().is_err());
    }
}

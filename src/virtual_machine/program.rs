//! Program representation and its binary and JSON formats.
//!
//! A [`Program`] is the interpreter's input: sources of `(opcode, operand)`
//! pairs, a constant pool, and the stack/arguments sizing hints the on-chain
//! deployer uses to allocate memory.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use crate::types::u256::U256;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{ConstantOperand, ZipmapOperand};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a serialized program.
const MAGIC: &[u8; 5] = b"RAINP";

const CURRENT_VERSION: Version = Version::new(0, 1, 0);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Version {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Version {
    const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Encode for Version {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[self.major, self.minor, self.patch]);
    }
}

impl Decode for Version {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Version::new(
            u8::decode(input)?,
            u8::decode(input)?,
            u8::decode(input)?,
        ))
    }
}

/// A compiled script (the on-chain `StateConfig`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    #[serde(with = "source_format")]
    pub sources: Vec<Vec<u8>>,
    pub constants: Vec<U256>,
    #[serde(default)]
    pub stack_length: usize,
    #[serde(default)]
    pub arguments_length: usize,
}

/// Iterates the `(opcode, operand)` pairs of a source. A trailing odd byte
/// is not yielded; use [`Program::validate`] to reject it.
pub fn instructions(source: &[u8]) -> impl Iterator<Item = (u8, u8)> + '_ {
    source.chunks_exact(2).map(|pair| (pair[0], pair[1]))
}

impl Program {
    pub fn new(
        sources: Vec<Vec<u8>>,
        constants: Vec<U256>,
        stack_length: usize,
        arguments_length: usize,
    ) -> Self {
        Self {
            sources,
            constants,
            stack_length,
            arguments_length,
        }
    }

    /// Checks the structural invariants the interpreter relies on: even-length
    /// sources, constant references inside the pool and ZIPMAP sources that
    /// exist. Reports the first violation found.
    ///
    /// A constant index past the pool reads the argument frame, so it is only
    /// accepted in sources some ZIPMAP runs.
    pub fn validate(&self) -> Result<(), VMError> {
        let zipmap_targets: Vec<usize> = self
            .sources
            .iter()
            .flat_map(|source| instructions(source))
            .filter(|&(opcode, _)| opcode == Instruction::Zipmap.opcode())
            .map(|(_, operand)| ZipmapOperand::decode(operand).source as usize)
            .collect();

        for (index, source) in self.sources.iter().enumerate() {
            if source.len() % 2 != 0 {
                return Err(VMError::UnexpectedEndOfBytecode {
                    source_index: index,
                    offset: source.len() - 1,
                });
            }
            for (opcode, operand) in instructions(source) {
                if opcode == Instruction::Constant.opcode() {
                    if ConstantOperand::is_extended(operand, self.constants.len())
                        && !zipmap_targets.contains(&index)
                    {
                        return Err(VMError::invalid_operand(
                            Instruction::Constant.mnemonic(),
                            operand,
                            format!(
                                "constant {operand} out of range in source {index} ({} constant(s))",
                                self.constants.len()
                            ),
                        ));
                    }
                } else if opcode == Instruction::Zipmap.opcode() {
                    let zipmap = ZipmapOperand::decode(operand);
                    if zipmap.source as usize >= self.sources.len() {
                        return Err(VMError::invalid_operand(
                            Instruction::Zipmap.mnemonic(),
                            operand,
                            format!(
                                "sub-source {} out of range in source {index} ({} source(s))",
                                zipmap.source,
                                self.sources.len()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// SHA3-256 over the canonical encoding.
    pub fn fingerprint(&self) -> Hash {
        let mut hasher = Hash::sha3();
        self.encode(&mut hasher);
        hasher.finalize()
    }

    /// Serializes with a magic header and format version.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write(MAGIC);
        CURRENT_VERSION.encode(&mut out);
        self.encode(&mut out);
        out
    }

    /// Parses the output of [`Program::to_bytes`], rejecting other versions.
    pub fn from_bytes(mut input: &[u8]) -> Result<Self, VMError> {
        if input.len() < MAGIC.len() {
            return Err(VMError::DecodeError {
                reason: "truncated".to_string(),
            });
        }
        let (magic, rest) = input.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(VMError::DecodeError {
                reason: "bad magic".to_string(),
            });
        }
        input = rest;

        if Version::decode(&mut input)? != CURRENT_VERSION {
            return Err(VMError::DecodeError {
                reason: "unsupported version".to_string(),
            });
        }

        let program = Program::decode(&mut input)?;
        if !input.is_empty() {
            return Err(VMError::DecodeError {
                reason: "trailing bytes".to_string(),
            });
        }
        Ok(program)
    }

    pub fn from_json(text: &str) -> Result<Self, VMError> {
        serde_json::from_str(text).map_err(|e| VMError::DecodeError {
            reason: format!("invalid program JSON: {e}"),
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, VMError> {
        serde_json::to_string_pretty(self).map_err(|e| VMError::DecodeError {
            reason: e.to_string(),
        })
    }

    /// Loads either encoding, sniffing the magic header.
    pub fn from_any(data: &[u8]) -> Result<Self, VMError> {
        if data.starts_with(MAGIC) {
            return Self::from_bytes(data);
        }
        let text = std::str::from_utf8(data).map_err(|_| VMError::DecodeError {
            reason: "neither a binary program nor UTF-8 JSON".to_string(),
        })?;
        Self::from_json(text)
    }
}

impl Encode for Program {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.sources.encode(out);
        self.constants.encode(out);
        self.stack_length.encode(out);
        self.arguments_length.encode(out);
    }
}

impl Decode for Program {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Program {
            sources: Vec::<Vec<u8>>::decode(input)?,
            constants: Vec::<U256>::decode(input)?,
            stack_length: usize::decode(input)?,
            arguments_length: usize::decode(input)?,
        })
    }
}

/// Sources serialize as `0x` hex strings and deserialize from hex strings or
/// plain byte arrays.
mod source_format {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Hex(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(sources: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(sources.iter().map(|source| {
            let mut hex = String::with_capacity(2 + source.len() * 2);
            hex.push_str("0x");
            for byte in source {
                hex.push_str(&format!("{byte:02x}"));
            }
            hex
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(|repr| match repr {
                Repr::Bytes(bytes) => Ok(bytes),
                Repr::Hex(text) => decode_hex(&text).map_err(D::Error::custom),
            })
            .collect()
    }

    fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
        let hex = text.strip_prefix("0x").unwrap_or(text);
        if hex.len() % 2 != 0 || !hex.is_ascii() {
            return Err(format!("source '{text}' is not an even-length hex string"));
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map_err(|_| format!("source '{text}' contains a non-hex digit"))
            })
            .collect()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn sample_program() -> Program {
        Program::new(
            vec![vec![0, 0, 0, 1, 33, 2], vec![0, 0x80]],
            vec![U256::from(3u8), U256::from(4u8)],
            3,
            1,
        )
    }

    #[test]
    fn binary_round_trip() {
        let program = sample_program();
        let bytes = program.to_bytes();
        assert_eq!(&bytes[..5], MAGIC);
        assert_eq!(Program::from_bytes(&bytes).unwrap(), program);
    }

    #[test]
    fn from_bytes_rejects_bad_headers() {
        let mut bytes = sample_program().to_bytes();
        assert!(matches!(
            Program::from_bytes(&bytes[..3]),
            Err(VMError::DecodeError { reason }) if reason == "truncated"
        ));

        bytes[6] = 9;
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(VMError::DecodeError { reason }) if reason == "unsupported version"
        ));

        bytes[0] = b'X';
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(VMError::DecodeError { reason }) if reason == "bad magic"
        ));
    }

    #[test]
    fn from_bytes_rejects_trailing_bytes() {
        let mut bytes = sample_program().to_bytes();
        bytes.push(0);
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(VMError::DecodeError { reason }) if reason == "trailing bytes"
        ));
    }

    #[test]
    fn json_accepts_hex_and_byte_sources() {
        let program = Program::from_json(
            r#"{
                "sources": ["0x000000012102", [0, 128]],
                "constants": ["3", 4],
                "stackLength": 3,
                "argumentsLength": 1
            }"#,
        )
        .unwrap();
        assert_eq!(program, sample_program());

        let text = program.to_json_pretty().unwrap();
        assert!(text.contains("\"0x000000012102\""));
        assert_eq!(Program::from_json(&text).unwrap(), program);
    }

    #[test]
    fn from_any_sniffs_format() {
        let program = sample_program();
        assert_eq!(Program::from_any(&program.to_bytes()).unwrap(), program);
        let json = program.to_json_pretty().unwrap();
        assert_eq!(Program::from_any(json.as_bytes()).unwrap(), program);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = sample_program();
        let mut b = sample_program();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.constants[0] = U256::from(5u8);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn validate_reports_first_violation() {
        assert!(sample_program().validate().is_ok());

        let mut odd = sample_program();
        odd.sources[1].push(0);
        assert!(matches!(
            odd.validate(),
            Err(VMError::UnexpectedEndOfBytecode { source_index: 1, offset: 2 })
        ));

        let mut bad_constant = sample_program();
        bad_constant.sources[0][1] = 2;
        assert!(matches!(bad_constant.validate(), Err(VMError::InvalidOperand { op: "CONSTANT", .. })));

        // past the pool is an argument read, fine once a ZIPMAP runs the source
        let mut extended = sample_program();
        extended.sources[1] = vec![0, 2];
        assert!(matches!(extended.validate(), Err(VMError::InvalidOperand { op: "CONSTANT", .. })));
        extended.sources[0].extend_from_slice(&[4, 0x01]);
        assert!(extended.validate().is_ok());

        let mut bad_zipmap = sample_program();
        bad_zipmap.sources[0].extend_from_slice(&[4, 0x05]);
        assert!(matches!(bad_zipmap.validate(), Err(VMError::InvalidOperand { op: "ZIPMAP", .. })));
    }
}

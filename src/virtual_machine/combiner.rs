//! Program linking.
//!
//! [`combine`] appends one program's sources onto another's, relocating the
//! appended constant indices and ZIPMAP sub-source indices so every reference
//! still lands on the same data. [`pair`] and [`multi`] are the two shapes the
//! combinator library builds on. All functions borrow their inputs and return
//! a new [`Program`].

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{ConstantOperand, MAX_CONSTANT_INDEX, MAX_ZIPMAP_SOURCE, ZipmapOperand};
use crate::virtual_machine::program::{Program, instructions};

/// Where the appended program's leading sources are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombineOptions {
    /// First source of the base program that receives appended code.
    pub splice_at: usize,
    /// Leading sources of the appended program merged into the base.
    pub number_of_sources: usize,
    /// Byte offsets to insert at, one per merged source. `None` appends.
    pub position: Option<Vec<usize>>,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            splice_at: 0,
            number_of_sources: 1,
            position: None,
        }
    }
}

/// Rewrites every pair of `source` through `f`.
fn map_pairs(
    source: &[u8],
    index: usize,
    mut f: impl FnMut(u8, u8) -> Result<u8, VMError>,
) -> Result<Vec<u8>, VMError> {
    if source.len() % 2 != 0 {
        return Err(VMError::shape(format!(
            "source {index} is truncated ({} bytes)",
            source.len()
        )));
    }
    let mut out = Vec::with_capacity(source.len());
    for (opcode, operand) in instructions(source) {
        out.push(opcode);
        out.push(f(opcode, operand)?);
    }
    Ok(out)
}

/// Rewrites a CONSTANT operand past `pool_len` into the flagged argument
/// form, which keeps its meaning once the pool grows.
fn pin_argument(operand: u8, pool_len: usize) -> Result<u8, VMError> {
    match ConstantOperand::resolve(operand, pool_len) {
        ConstantOperand::Argument(i) => ConstantOperand::Argument(i).encode(),
        ConstantOperand::Constant(_) => Ok(operand),
    }
}

/// Pins the argument reads of a base source.
fn pin_base(source: &[u8], index: usize, pool_len: usize) -> Result<Vec<u8>, VMError> {
    map_pairs(source, index, |opcode, operand| {
        if opcode == Instruction::Constant.opcode() {
            pin_argument(operand, pool_len)
        } else {
            Ok(operand)
        }
    })
}

/// Rewrites one source of the appended program for its new home.
fn relocate(
    source: &[u8],
    index: usize,
    (constant_offset, pool_len): (usize, usize),
    splice_at: usize,
    number_of_sources: usize,
    base_sources: usize,
) -> Result<Vec<u8>, VMError> {
    map_pairs(source, index, |opcode, operand| {
        if opcode == Instruction::Constant.opcode() {
            match ConstantOperand::resolve(operand, pool_len) {
                ConstantOperand::Argument(_) => pin_argument(operand, pool_len),
                ConstantOperand::Constant(i) => {
                    let relocated = i as usize + constant_offset;
                    if relocated > MAX_CONSTANT_INDEX {
                        return Err(VMError::shape(format!(
                            "constant {i} of source {index} relocates to {relocated}, past {MAX_CONSTANT_INDEX}"
                        )));
                    }
                    Ok(relocated as u8)
                }
            }
        } else if opcode == Instruction::Zipmap.opcode() {
            let mut zipmap = ZipmapOperand::decode(operand);
            let target = zipmap.source as usize;
            let relocated = if target < number_of_sources {
                target + splice_at
            } else {
                target + base_sources - number_of_sources
            };
            if relocated > MAX_ZIPMAP_SOURCE {
                return Err(VMError::shape(format!(
                    "zipmap sub-source {target} of source {index} relocates to {relocated}, past {MAX_ZIPMAP_SOURCE}"
                )));
            }
            zipmap.source = relocated as u8;
            zipmap.encode()
        } else {
            Ok(operand)
        }
    })
}

/// Links `b` onto `a`.
///
/// The first `number_of_sources` sources of `b` are merged into
/// `a.sources[splice_at..]`, either appended or inserted at the given byte
/// offsets; the rest become new sources after `a`'s. Constants are
/// concatenated and the sizing hints summed.
pub fn combine(a: &Program, b: &Program, options: &CombineOptions) -> Result<Program, VMError> {
    let CombineOptions {
        splice_at,
        number_of_sources,
        ref position,
    } = *options;

    if number_of_sources > b.sources.len() {
        return Err(VMError::shape(format!(
            "cannot merge {number_of_sources} source(s) from a program with {}",
            b.sources.len()
        )));
    }
    if splice_at + number_of_sources > a.sources.len() {
        return Err(VMError::shape(format!(
            "splice at {splice_at} of {number_of_sources} source(s) runs past the {} base source(s)",
            a.sources.len()
        )));
    }
    if let Some(position) = position {
        if position.len() != number_of_sources {
            return Err(VMError::shape(format!(
                "{} position(s) given for {number_of_sources} merged source(s)",
                position.len()
            )));
        }
    }

    let mut sources = a
        .sources
        .iter()
        .enumerate()
        .map(|(index, source)| pin_base(source, index, a.constants.len()))
        .collect::<Result<Vec<_>, _>>()?;

    let base_sources = a.sources.len();
    let relocated = b
        .sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            relocate(
                source,
                index,
                (a.constants.len(), b.constants.len()),
                splice_at,
                number_of_sources,
                base_sources,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut relocated = relocated.into_iter();
    for i in 0..number_of_sources {
        let Some(code) = relocated.next() else { break };
        let target = &mut sources[splice_at + i];
        match position {
            None => target.extend_from_slice(&code),
            Some(position) => {
                let offset = position[i];
                if offset % 2 != 0 || offset > target.len() {
                    return Err(VMError::shape(format!(
                        "position {offset} is not an instruction boundary of source {} ({} bytes)",
                        splice_at + i,
                        target.len()
                    )));
                }
                target.splice(offset..offset, code);
            }
        }
    }
    sources.extend(relocated);

    let mut constants = a.constants.clone();
    constants.extend_from_slice(&b.constants);

    Ok(Program::new(
        sources,
        constants,
        a.stack_length + b.stack_length,
        a.arguments_length + b.arguments_length,
    ))
}

/// Adds `offset` to every `STACK` index, so a program keeps reading its own
/// values once `offset` values sit below them.
pub fn reassign_stack(program: &Program, offset: usize) -> Result<Program, VMError> {
    if offset == 0 {
        return Ok(program.clone());
    }
    let sources = program
        .sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            map_pairs(source, index, |opcode, operand| {
                if opcode != Instruction::Stack.opcode() {
                    return Ok(operand);
                }
                u8::try_from(operand as usize + offset).map_err(|_| {
                    VMError::shape(format!(
                        "stack index {operand} of source {index} cannot move up by {offset}"
                    ))
                })
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Program {
        sources,
        ..program.clone()
    })
}

/// Appends `price` after `amount`, for configs that yield an amount and a price.
pub fn pair(amount: &Program, price: &Program, reassign: bool) -> Result<Program, VMError> {
    let price = if reassign {
        reassign_stack(price, 1)?
    } else {
        price.clone()
    };
    combine(amount, &price, &CombineOptions::default())
}

/// Chains `configs` so each leaves its value on the stack in order.
pub fn multi(configs: &[Program], reassign: bool) -> Result<Program, VMError> {
    let (first, rest) = configs
        .split_first()
        .ok_or_else(|| VMError::shape("multi needs at least one program"))?;
    let mut combined = first.clone();
    for (i, config) in rest.iter().enumerate() {
        let config = if reassign {
            reassign_stack(config, i + 1)?
        } else {
            config.clone()
        };
        combined = combine(&combined, &config, &CombineOptions::default())?;
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::u256::U256;

    const CONSTANT: u8 = Instruction::Constant as u8;
    const STACK: u8 = Instruction::Stack as u8;
    const ZIPMAP: u8 = Instruction::Zipmap as u8;
    const ADD: u8 = Instruction::Add as u8;

    fn words(values: &[u64]) -> Vec<U256> {
        values.iter().map(|&v| U256::from(v)).collect()
    }

    fn single(constant: u64) -> Program {
        Program::new(vec![vec![CONSTANT, 0]], words(&[constant]), 1, 0)
    }

    #[test]
    fn combine_concatenates_and_relocates_constants() {
        let combined = combine(&single(5), &single(9), &CombineOptions::default()).unwrap();
        assert_eq!(combined.sources, vec![vec![CONSTANT, 0, CONSTANT, 1]]);
        assert_eq!(combined.constants, words(&[5, 9]));
        assert_eq!(combined.stack_length, 2);
    }

    #[test]
    fn combine_is_associative_on_constants() {
        let ab = combine(&single(1), &single(2), &CombineOptions::default()).unwrap();
        let abc = combine(&ab, &single(3), &CombineOptions::default()).unwrap();
        assert_eq!(abc.constants, words(&[1, 2, 3]));
        assert_eq!(abc.sources, vec![vec![CONSTANT, 0, CONSTANT, 1, CONSTANT, 2]]);
    }

    #[test]
    fn argument_fetches_are_not_relocated() {
        let b = Program::new(vec![vec![CONSTANT, 0x81]], vec![], 1, 2);
        let combined = combine(&single(5), &b, &CombineOptions::default()).unwrap();
        assert_eq!(combined.sources[0], vec![CONSTANT, 0, CONSTANT, 0x81]);
        assert_eq!(combined.arguments_length, 2);
    }

    #[test]
    fn reads_past_the_pool_stay_argument_reads() {
        // both sub-sources read argument 0 through an index just past their pool
        let a = Program::new(vec![vec![ZIPMAP, 1], vec![CONSTANT, 1]], words(&[1]), 1, 1);
        let b = Program::new(vec![vec![], vec![CONSTANT, 2, CONSTANT, 0]], words(&[8, 9]), 1, 1);
        let combined = combine(&a, &b, &CombineOptions::default()).unwrap();
        assert_eq!(combined.constants, words(&[1, 8, 9]));
        assert_eq!(combined.sources[1], vec![CONSTANT, 0x80]);
        assert_eq!(combined.sources[2], vec![CONSTANT, 0x80, CONSTANT, 1]);
    }

    #[test]
    fn zipmap_sources_follow_their_new_position() {
        let a = Program::new(vec![vec![CONSTANT, 0], vec![CONSTANT, 0x80]], words(&[1]), 1, 1);
        // source 0 zips source 1, which is a tail source of `b`
        let b = Program::new(
            vec![vec![ZIPMAP, 1, ZIPMAP, 0], vec![CONSTANT, 0x80]],
            vec![],
            1,
            1,
        );
        let combined = combine(&a, &b, &CombineOptions::default()).unwrap();
        assert_eq!(combined.sources.len(), 3);
        assert_eq!(
            combined.sources[0],
            vec![CONSTANT, 0, ZIPMAP, 2, ZIPMAP, 0]
        );
        assert_eq!(combined.sources[2], vec![CONSTANT, 0x80]);
    }

    #[test]
    fn position_inserts_mid_source() {
        let a = Program::new(vec![vec![CONSTANT, 0, CONSTANT, 0, ADD, 2]], words(&[2]), 3, 0);
        let options = CombineOptions {
            position: Some(vec![4]),
            ..CombineOptions::default()
        };
        let combined = combine(&a, &single(7), &options).unwrap();
        assert_eq!(
            combined.sources[0],
            vec![CONSTANT, 0, CONSTANT, 0, CONSTANT, 1, ADD, 2]
        );
    }

    #[test]
    fn splice_into_later_source() {
        let a = Program::new(vec![vec![], vec![CONSTANT, 0]], words(&[1]), 1, 0);
        let options = CombineOptions {
            splice_at: 1,
            ..CombineOptions::default()
        };
        let combined = combine(&a, &single(4), &options).unwrap();
        assert_eq!(combined.sources, vec![vec![], vec![CONSTANT, 0, CONSTANT, 1]]);
    }

    #[test]
    fn shape_errors() {
        let a = single(1);
        let too_many = CombineOptions {
            number_of_sources: 2,
            ..CombineOptions::default()
        };
        assert!(matches!(
            combine(&a, &single(2), &too_many),
            Err(VMError::CombinerShapeMismatch { .. })
        ));

        let past_end = CombineOptions {
            splice_at: 1,
            ..CombineOptions::default()
        };
        assert!(matches!(
            combine(&a, &single(2), &past_end),
            Err(VMError::CombinerShapeMismatch { .. })
        ));

        for position in [vec![1], vec![4], vec![0, 0]] {
            let options = CombineOptions {
                position: Some(position),
                ..CombineOptions::default()
            };
            assert!(matches!(
                combine(&a, &single(2), &options),
                Err(VMError::CombinerShapeMismatch { .. })
            ));
        }

        let truncated = Program::new(vec![vec![CONSTANT]], vec![], 0, 0);
        assert!(matches!(
            combine(&a, &truncated, &CombineOptions::default()),
            Err(VMError::CombinerShapeMismatch { .. })
        ));
    }

    #[test]
    fn constant_relocation_must_fit_seven_bits() {
        let a = Program::new(vec![vec![]], vec![U256::ZERO; 0x80], 0, 0);
        assert!(matches!(
            combine(&a, &single(1), &CombineOptions::default()),
            Err(VMError::CombinerShapeMismatch { .. })
        ));
    }

    #[test]
    fn pair_shifts_price_stack_reads() {
        let amount = single(10);
        let price = Program::new(vec![vec![CONSTANT, 0, STACK, 0, ADD, 2]], words(&[3]), 3, 0);
        let paired = pair(&amount, &price, true).unwrap();
        assert_eq!(
            paired.sources[0],
            vec![CONSTANT, 0, CONSTANT, 1, STACK, 1, ADD, 2]
        );
        let raw = pair(&amount, &price, false).unwrap();
        assert_eq!(raw.sources[0][5], 0);
    }

    #[test]
    fn multi_offsets_each_config_by_its_position() {
        let reader = Program::new(vec![vec![STACK, 0]], vec![], 1, 0);
        let combined = multi(&[single(1), reader.clone(), reader], true).unwrap();
        assert_eq!(
            combined.sources[0],
            vec![CONSTANT, 0, STACK, 1, STACK, 2]
        );
        assert!(matches!(
            multi(&[], true),
            Err(VMError::CombinerShapeMismatch { .. })
        ));
    }

    #[test]
    fn reassign_rejects_overflowing_index() {
        let reader = Program::new(vec![vec![STACK, 255]], vec![], 1, 0);
        assert!(reassign_stack(&reader, 1).is_err());
    }
}

//! Arithmetic, logic, comparison and fixed-point opcode bodies.

use super::RainVM;
use crate::types::u256::U256;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::window;

/// Decimals of the fixed-point "one".
const FP_DECIMALS: u8 = 18;
const FP_ONE: U256 = U256::from_u64(1_000_000_000_000_000_000);

fn overflow(instr: Instruction) -> VMError {
    VMError::ArithmeticOverflow {
        op: instr.mnemonic(),
    }
}

fn pow10(instr: Instruction, exponent: u32) -> Result<U256, VMError> {
    U256::pow10(exponent).ok_or_else(|| overflow(instr))
}

/// Divides by `10^exponent`; a power beyond 256 bits always truncates to zero.
fn div_pow10(value: U256, exponent: u32) -> U256 {
    match U256::pow10(exponent) {
        Some(divisor) => value.checked_div(divisor).unwrap_or_default(),
        None => U256::ZERO,
    }
}

fn mul_pow10(instr: Instruction, value: U256, exponent: u32) -> Result<U256, VMError> {
    if value.is_zero() {
        return Ok(U256::ZERO);
    }
    value.checked_mul(pow10(instr, exponent)?).ok_or_else(|| overflow(instr))
}

/// Rescales `value` from `decimals` to 18 decimals.
pub fn scale18(value: U256, decimals: u8) -> Result<U256, VMError> {
    let instr = Instruction::Scale18;
    match decimals.cmp(&FP_DECIMALS) {
        std::cmp::Ordering::Equal => Ok(value),
        std::cmp::Ordering::Less => mul_pow10(instr, value, (FP_DECIMALS - decimals) as u32),
        std::cmp::Ordering::Greater => Ok(div_pow10(value, (decimals - FP_DECIMALS) as u32)),
    }
}

/// Rescales an 18-decimal `value` to `decimals`.
pub fn scale_n(value: U256, decimals: u8) -> Result<U256, VMError> {
    let instr = Instruction::ScaleN;
    match decimals.cmp(&FP_DECIMALS) {
        std::cmp::Ordering::Equal => Ok(value),
        std::cmp::Ordering::Less => Ok(div_pow10(value, (FP_DECIMALS - decimals) as u32)),
        std::cmp::Ordering::Greater => mul_pow10(instr, value, (decimals - FP_DECIMALS) as u32),
    }
}

/// Multiplies by `10^scale` for non-negative `scale`, divides otherwise.
pub fn scale_by(value: U256, scale: i8) -> Result<U256, VMError> {
    if scale >= 0 {
        mul_pow10(Instruction::ScaleBy, value, scale as u32)
    } else {
        Ok(div_pow10(value, scale.unsigned_abs() as u32))
    }
}

/// `a * b / 1e18`.
pub fn fixed_point_mul(a: U256, b: U256) -> Result<U256, VMError> {
    let product = a.checked_mul(b).ok_or_else(|| overflow(Instruction::Scale18Mul))?;
    Ok(product.checked_div(FP_ONE).unwrap_or_default())
}

/// `a * 1e18 / b`.
pub fn fixed_point_div(a: U256, b: U256) -> Result<U256, VMError> {
    let instr = Instruction::Scale18Div;
    let scaled = a.checked_mul(FP_ONE).ok_or_else(|| overflow(instr))?;
    scaled
        .checked_div(b)
        .ok_or(VMError::DivisionByZero { op: instr.mnemonic() })
}

/// One step of an N-ary fold.
fn fold_step(instr: Instruction, acc: U256, value: U256) -> Result<U256, VMError> {
    let op = instr.mnemonic();
    match instr {
        Instruction::Add => acc.checked_add(value).ok_or(VMError::ArithmeticOverflow { op }),
        Instruction::Sub => acc.checked_sub(value).ok_or(VMError::NegativeResult { op }),
        Instruction::Mul => acc.checked_mul(value).ok_or(VMError::ArithmeticOverflow { op }),
        Instruction::Div => acc.checked_div(value).ok_or(VMError::DivisionByZero { op }),
        Instruction::Mod => acc.checked_rem(value).ok_or(VMError::DivisionByZero { op }),
        Instruction::Exp => acc.checked_pow(value).ok_or(VMError::ArithmeticOverflow { op }),
        Instruction::Min => Ok(acc.min(value)),
        Instruction::Max => Ok(acc.max(value)),
        Instruction::SaturatingAdd => Ok(acc.saturating_add(value)),
        Instruction::SaturatingSub => Ok(acc.saturating_sub(value)),
        Instruction::SaturatingMul => Ok(acc.saturating_mul(value)),
        other => Err(VMError::UnknownOpcode {
            opcode: other.opcode(),
            operand: 0,
        }),
    }
}

impl RainVM {
    /// N-ary arithmetic: seeds from the deepest value and folds upward.
    pub(super) fn op_fold(&mut self, instr: Instruction, operand: u8) -> Result<(), VMError> {
        let n = window(instr.mnemonic(), operand)?;
        let values = self.state.pop_n(n)?;
        let mut acc = values[0];
        for &value in &values[1..] {
            acc = fold_step(instr, acc, value)?;
        }
        self.state.push(acc);
        Ok(())
    }

    /// First non-zero value from the deepest up, else zero.
    pub(super) fn op_any(&mut self, instr: Instruction, operand: u8) -> Result<(), VMError> {
        let n = window(instr.mnemonic(), operand)?;
        let values = self.state.pop_n(n)?;
        let result = values.into_iter().find(|v| !v.is_zero()).unwrap_or_default();
        self.state.push(result);
        Ok(())
    }

    /// Zero if any value is zero, else the last value scanned.
    pub(super) fn op_every(&mut self, instr: Instruction, operand: u8) -> Result<(), VMError> {
        let n = window(instr.mnemonic(), operand)?;
        let values = self.state.pop_n(n)?;
        let result = if values.iter().any(U256::is_zero) {
            U256::ZERO
        } else {
            values[n - 1]
        };
        self.state.push(result);
        Ok(())
    }

    pub(super) fn op_eager_if(&mut self, _instr: Instruction, _operand: u8) -> Result<(), VMError> {
        let [condition, when_true, when_false] = self.state.pop_array::<3>()?;
        self.state.push(if condition.is_zero() { when_false } else { when_true });
        Ok(())
    }

    pub(super) fn op_compare(&mut self, instr: Instruction, _operand: u8) -> Result<(), VMError> {
        let [a, b] = self.state.pop_array::<2>()?;
        let result = match instr {
            Instruction::EqualTo => a == b,
            Instruction::GreaterThan => a > b,
            _ => a < b,
        };
        self.state.push(U256::from(result));
        Ok(())
    }

    pub(super) fn op_is_zero(&mut self, _instr: Instruction, _operand: u8) -> Result<(), VMError> {
        let a = self.state.pop()?;
        self.state.push(U256::from(a.is_zero()));
        Ok(())
    }

    /// SCALE18, SCALEN and SCALE_BY: one value in, one out.
    pub(super) fn op_scale(&mut self, instr: Instruction, operand: u8) -> Result<(), VMError> {
        let value = self.state.pop()?;
        let scaled = match instr {
            Instruction::Scale18 => scale18(value, operand)?,
            Instruction::ScaleN => scale_n(value, operand)?,
            _ => scale_by(value, operand as i8)?,
        };
        self.state.push(scaled);
        Ok(())
    }

    /// SCALE18_MUL and SCALE18_DIV: rescale the deeper value, then combine.
    pub(super) fn op_scale18_binary(&mut self, instr: Instruction, operand: u8) -> Result<(), VMError> {
        let [a, b] = self.state.pop_array::<2>()?;
        let a = scale18(a, operand)?;
        let result = match instr {
            Instruction::Scale18Mul => fixed_point_mul(a, b)?,
            _ => fixed_point_div(a, b)?,
        };
        self.state.push(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn scale18_both_directions() {
        assert_eq!(scale18(w(5), 6).unwrap(), w(5_000_000_000_000));
        assert_eq!(scale18(w(12_345), 20).unwrap(), w(123));
        assert_eq!(scale18(w(123), 18).unwrap(), w(123));
        assert_eq!(scale18(U256::MAX, 255).unwrap(), U256::ZERO);
    }

    #[test]
    fn scale18_overflow() {
        assert!(matches!(
            scale18(U256::MAX, 0),
            Err(VMError::ArithmeticOverflow { op: "SCALE18" })
        ));
    }

    #[test]
    fn scale_n_inverts_scale18() {
        let scaled = scale18(w(42), 6).unwrap();
        assert_eq!(scale_n(scaled, 6).unwrap(), w(42));
        assert_eq!(scale_n(w(1), 20).unwrap(), w(100));
    }

    #[test]
    fn scale_by_signed() {
        assert_eq!(scale_by(w(7), 2).unwrap(), w(700));
        assert_eq!(scale_by(w(799), -2).unwrap(), w(7));
        assert_eq!(scale_by(w(7), -128).unwrap(), U256::ZERO);
        assert_eq!(scale_by(U256::ZERO, 127).unwrap(), U256::ZERO);
        assert!(scale_by(w(1), 127).is_err());
    }

    #[test]
    fn fixed_point_ops() {
        let half = w(500_000_000_000_000_000);
        assert_eq!(fixed_point_mul(w(10), half).unwrap(), w(5));
        assert_eq!(fixed_point_div(w(1), w(4)).unwrap(), w(250_000_000_000_000_000));
        assert!(matches!(
            fixed_point_div(w(1), U256::ZERO),
            Err(VMError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn fold_step_errors() {
        assert!(matches!(
            fold_step(Instruction::Sub, w(1), w(2)),
            Err(VMError::NegativeResult { op: "SUB" })
        ));
        assert!(matches!(
            fold_step(Instruction::Mod, w(1), U256::ZERO),
            Err(VMError::DivisionByZero { op: "MOD" })
        ));
        assert_eq!(fold_step(Instruction::Exp, U256::ZERO, U256::ZERO).unwrap(), U256::ONE);
    }
}

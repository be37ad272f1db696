//! Ready-made program shapes built from [`combine`], [`pair`] and [`multi`].
//!
//! Each combinator takes one or more configs, each leaving a single value on
//! the stack, and returns a program leaving a single derived value. They only
//! ever link whole programs and append trailing opcodes, so every relocation
//! rule of the combiner gets exercised by them.

use crate::types::address::Address;
use crate::types::u256::U256;
use crate::virtual_machine::combiner::{CombineOptions, combine, multi, pair};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{ARGUMENT_FLAG, TIER_COUNT, ZipmapOperand};
use crate::virtual_machine::program::Program;
use crate::virtual_machine::tier_report::{self, NEVER};

/// Largest discount, in percent.
pub const MAX_DISCOUNT: u32 = 100;

fn code(ops: &[(Instruction, u8)]) -> Vec<u8> {
    ops.iter().flat_map(|&(instr, operand)| [instr.opcode(), operand]).collect()
}

const fn arg(index: u8) -> u8 {
    ARGUMENT_FLAG | index
}

/// Appends `ops` to source 0 of `program`.
fn then(program: &Program, ops: &[(Instruction, u8)]) -> Result<Program, VMError> {
    let tail = Program::new(vec![code(ops)], vec![], 0, 0);
    combine(program, &tail, &CombineOptions::default())
}

/// A program pushing `value`.
pub fn value(value: U256) -> Program {
    Program::new(vec![code(&[(Instruction::Constant, 0)])], vec![value], 1, 0)
}

fn window(instr: Instruction, count: usize) -> Result<u8, VMError> {
    match u8::try_from(count) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(VMError::shape(format!(
            "{instr} cannot reduce {count} program(s)"
        ))),
    }
}

/// Runs every config, then folds their values with `instr`.
fn reduce(configs: &[Program], instr: Instruction) -> Result<Program, VMError> {
    let n = window(instr, configs.len())?;
    then(&multi(configs, true)?, &[(instr, n)])
}

pub fn add_together(configs: &[Program]) -> Result<Program, VMError> {
    reduce(configs, Instruction::Add)
}

pub fn mul_together(configs: &[Program]) -> Result<Program, VMError> {
    reduce(configs, Instruction::Mul)
}

pub fn min(configs: &[Program]) -> Result<Program, VMError> {
    reduce(configs, Instruction::Min)
}

pub fn max(configs: &[Program]) -> Result<Program, VMError> {
    reduce(configs, Instruction::Max)
}

/// Zero if any config yields zero, else the last config's value.
pub fn and(configs: &[Program]) -> Result<Program, VMError> {
    reduce(configs, Instruction::Every)
}

/// The first non-zero config value, else zero.
pub fn or(configs: &[Program]) -> Result<Program, VMError> {
    reduce(configs, Instruction::Any)
}

pub fn nand(configs: &[Program]) -> Result<Program, VMError> {
    then(&and(configs)?, &[(Instruction::IsZero, 0)])
}

pub fn nor(configs: &[Program]) -> Result<Program, VMError> {
    then(&or(configs)?, &[(Instruction::IsZero, 0)])
}

/// Truthiness of both sides, compared for equality.
fn truth_eq(a: &Program, b: &Program) -> Result<Program, VMError> {
    let a = then(a, &[(Instruction::IsZero, 0)])?;
    let b = then(b, &[(Instruction::IsZero, 0)])?;
    then(&pair(&a, &b, true)?, &[(Instruction::EqualTo, 0)])
}

pub fn xor(a: &Program, b: &Program) -> Result<Program, VMError> {
    then(&truth_eq(a, b)?, &[(Instruction::IsZero, 0)])
}

pub fn xnor(a: &Program, b: &Program) -> Result<Program, VMError> {
    truth_eq(a, b)
}

fn compare(a: &Program, b: &Program, ops: &[(Instruction, u8)]) -> Result<Program, VMError> {
    then(&pair(a, b, true)?, ops)
}

pub fn eq(a: &Program, b: &Program) -> Result<Program, VMError> {
    compare(a, b, &[(Instruction::EqualTo, 0)])
}

pub fn gt(a: &Program, b: &Program) -> Result<Program, VMError> {
    compare(a, b, &[(Instruction::GreaterThan, 0)])
}

pub fn lt(a: &Program, b: &Program) -> Result<Program, VMError> {
    compare(a, b, &[(Instruction::LessThan, 0)])
}

pub fn gte(a: &Program, b: &Program) -> Result<Program, VMError> {
    compare(a, b, &[(Instruction::LessThan, 0), (Instruction::IsZero, 0)])
}

pub fn lte(a: &Program, b: &Program) -> Result<Program, VMError> {
    compare(a, b, &[(Instruction::GreaterThan, 0), (Instruction::IsZero, 0)])
}

pub fn not(config: &Program) -> Result<Program, VMError> {
    then(config, &[(Instruction::IsZero, 0)])
}

/// `condition` selects `when_true`, else `when_false`. All three are evaluated.
pub fn if_else(condition: &Program, when_true: &Program, when_false: &Program) -> Result<Program, VMError> {
    then(
        &multi(
            &[condition.clone(), when_true.clone(), when_false.clone()],
            true,
        )?,
        &[(Instruction::EagerIf, 0)],
    )
}

/// Yields `config` while the block timestamp is inside `[start, end]`, else
/// zero. A missing bound is open.
pub fn set_timer(config: &Program, start: Option<U256>, end: Option<U256>) -> Result<Program, VMError> {
    let mut gates = Vec::new();
    if let Some(start) = start {
        gates.push(Program::new(
            vec![code(&[
                (Instruction::BlockTimestamp, 0),
                (Instruction::Constant, 0),
                (Instruction::LessThan, 0),
                (Instruction::IsZero, 0),
            ])],
            vec![start],
            2,
            0,
        ));
    }
    if let Some(end) = end {
        gates.push(Program::new(
            vec![code(&[
                (Instruction::BlockTimestamp, 0),
                (Instruction::Constant, 0),
                (Instruction::GreaterThan, 0),
                (Instruction::IsZero, 0),
            ])],
            vec![end],
            2,
            0,
        ));
    }
    if gates.is_empty() {
        return Ok(config.clone());
    }
    if_else(&and(&gates)?, config, &value(U256::ZERO))
}

/// Yields `config` when the signer is `owner`, else `fallback`.
pub fn set_ownership(config: &Program, owner: Address, fallback: U256) -> Result<Program, VMError> {
    let condition = Program::new(
        vec![code(&[
            (Instruction::Sender, 0),
            (Instruction::Constant, 0),
            (Instruction::EqualTo, 0),
        ])],
        vec![owner.to_word()],
        2,
        0,
    );
    if_else(&condition, config, &value(fallback))
}

/// Source 1 of the tier tails: `arguments = [per-tier value, report lane]`.
/// Yields the per-tier value if the tier is held, else `constants[otherwise]`.
fn held_tier_lane(otherwise: u8) -> Vec<u8> {
    code(&[
        (Instruction::Constant, arg(1)),
        (Instruction::Constant, 3),
        (Instruction::LessThan, 0),
        (Instruction::Constant, arg(0)),
        (Instruction::Constant, otherwise),
        (Instruction::EagerIf, 0),
    ])
}

fn zip_tiers() -> Result<u8, VMError> {
    ZipmapOperand::from_lane_bits(1, tier_report::LANE_BITS as u16, 2)?.encode()
}

/// Constants shared by the tier tails: 100, the packed per-tier values, the
/// tier contract, the never-held lane and zero.
fn tier_constants(packed: [u32; TIER_COUNT as usize], tier_contract: Address) -> Vec<U256> {
    vec![
        U256::from(100u8),
        tier_report::from_lanes(packed),
        tier_contract.to_word(),
        U256::from(NEVER),
        U256::ZERO,
    ]
}

/// Reduces `config` by the largest percentage in `discounts` among the tiers
/// the signer holds on `tier_contract`. `discounts[i]` applies to tier `i + 1`.
pub fn set_discount_for_tiers(
    config: &Program,
    tier_contract: Address,
    discounts: [u32; TIER_COUNT as usize],
) -> Result<Program, VMError> {
    if let Some(d) = discounts.iter().find(|&&d| d > MAX_DISCOUNT) {
        return Err(VMError::shape(format!(
            "discount {d} exceeds {MAX_DISCOUNT} percent"
        )));
    }
    let main = code(&[
        (Instruction::Constant, 0),
        (Instruction::Constant, 1),
        (Instruction::Constant, 2),
        (Instruction::Sender, 0),
        (Instruction::ITierV2Report, 0),
        (Instruction::Zipmap, zip_tiers()?),
        (Instruction::Max, TIER_COUNT),
        (Instruction::Sub, 2),
        (Instruction::Mul, 2),
        (Instruction::Constant, 0),
        (Instruction::Div, 2),
    ]);
    let tail = Program::new(
        vec![main, held_tier_lane(4)],
        tier_constants(discounts, tier_contract),
        11,
        2,
    );
    combine(config, &tail, &CombineOptions::default())
}

/// Scales `config` by the largest percentage in `multipliers` among the tiers
/// the signer holds, or leaves it unchanged if none is held.
pub fn set_multiplier_for_tiers(
    config: &Program,
    tier_contract: Address,
    multipliers: [u32; TIER_COUNT as usize],
) -> Result<Program, VMError> {
    let main = code(&[
        (Instruction::Constant, 1),
        (Instruction::Constant, 2),
        (Instruction::Sender, 0),
        (Instruction::ITierV2Report, 0),
        (Instruction::Zipmap, zip_tiers()?),
        (Instruction::Max, TIER_COUNT),
        (Instruction::Mul, 2),
        (Instruction::Constant, 0),
        (Instruction::Div, 2),
    ]);
    let tail = Program::new(
        vec![main, held_tier_lane(0)],
        tier_constants(multipliers, tier_contract),
        10,
        2,
    );
    combine(config, &tail, &CombineOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::collaborator::{ExecContext, MemoryProvider, StaticSigner};
    use crate::virtual_machine::vm::RainVM;
    use std::sync::Arc;

    const TIER: Address = Address([0x11; 20]);
    const ALICE: Address = Address([0xa1; 20]);
    const BOB: Address = Address([0xb0; 20]);

    fn v(n: u64) -> Program {
        value(U256::from(n))
    }

    fn ctx_for(signer: Address) -> ExecContext {
        let provider = MemoryProvider::new()
            .at_block(U256::from(10u8), U256::from(1_000u32))
            .with_tier_report(
                TIER,
                ALICE,
                tier_report::from_lanes([5, 7, NEVER, NEVER, NEVER, NEVER, NEVER, NEVER]),
            );
        ExecContext::new()
            .with_provider(Arc::new(provider))
            .with_signer(Arc::new(StaticSigner(signer)))
    }

    async fn eval_with(program: &Program, ctx: &ExecContext) -> Result<U256, VMError> {
        program.validate()?;
        let stack = RainVM::new(program).run(ctx, 0).await?;
        assert_eq!(stack.len(), 1, "combinator left {stack:?}");
        Ok(stack[0])
    }

    async fn eval(program: Result<Program, VMError>) -> u64 {
        let value = eval_with(&program.unwrap(), &ctx_for(ALICE)).await.unwrap();
        value.to_u64().unwrap()
    }

    #[tokio::test]
    async fn reducers() {
        let configs = [v(2), v(3), v(4)];
        assert_eq!(eval(add_together(&configs)).await, 9);
        assert_eq!(eval(mul_together(&configs)).await, 24);
        assert_eq!(eval(min(&configs)).await, 2);
        assert_eq!(eval(max(&configs)).await, 4);
        assert!(add_together(&[]).is_err());
    }

    #[tokio::test]
    async fn logic_passes_values_through() {
        assert_eq!(eval(and(&[v(2), v(3)])).await, 3);
        assert_eq!(eval(and(&[v(2), v(0), v(3)])).await, 0);
        assert_eq!(eval(or(&[v(0), v(4), v(5)])).await, 4);
        assert_eq!(eval(or(&[v(0), v(0)])).await, 0);
        assert_eq!(eval(nand(&[v(2), v(0)])).await, 1);
        assert_eq!(eval(nand(&[v(2), v(3)])).await, 0);
        assert_eq!(eval(nor(&[v(0), v(0)])).await, 1);
        assert_eq!(eval(not(&v(9))).await, 0);
    }

    #[tokio::test]
    async fn xor_and_xnor_truth_tables() {
        for (a, b, expected) in [(0, 0, 0), (0, 7, 1), (7, 0, 1), (7, 9, 0)] {
            assert_eq!(eval(xor(&v(a), &v(b))).await, expected, "xor({a}, {b})");
            assert_eq!(eval(xnor(&v(a), &v(b))).await, 1 - expected, "xnor({a}, {b})");
        }
    }

    #[tokio::test]
    async fn comparisons() {
        assert_eq!(eval(eq(&v(4), &v(4))).await, 1);
        assert_eq!(eval(gt(&v(5), &v(4))).await, 1);
        assert_eq!(eval(lt(&v(5), &v(4))).await, 0);
        assert_eq!(eval(gte(&v(4), &v(4))).await, 1);
        assert_eq!(eval(lte(&v(5), &v(4))).await, 0);
    }

    #[tokio::test]
    async fn if_else_selects_branch() {
        assert_eq!(eval(if_else(&v(1), &v(10), &v(20))).await, 10);
        assert_eq!(eval(if_else(&v(0), &v(10), &v(20))).await, 20);
    }

    #[tokio::test]
    async fn stack_reads_survive_combination() {
        // reads its own first value back through STACK
        let dup = Program::new(
            vec![code(&[(Instruction::Constant, 0), (Instruction::Stack, 0), (Instruction::Add, 2)])],
            vec![U256::from(6u8)],
            3,
            0,
        );
        assert_eq!(eval(add_together(&[v(1), dup])).await, 13);
    }

    #[tokio::test]
    async fn timer_window() {
        let ts = |n: u32| Some(U256::from(n));
        assert_eq!(eval(set_timer(&v(42), ts(500), ts(2_000))).await, 42);
        assert_eq!(eval(set_timer(&v(42), ts(1_000), ts(1_000))).await, 42);
        assert_eq!(eval(set_timer(&v(42), ts(1_500), None)).await, 0);
        assert_eq!(eval(set_timer(&v(42), None, ts(999))).await, 0);
        assert_eq!(eval(set_timer(&v(42), None, None)).await, 42);
    }

    #[tokio::test]
    async fn ownership_gate() {
        let gated = set_ownership(&v(42), ALICE, U256::from(7u8)).unwrap();
        assert_eq!(eval_with(&gated, &ctx_for(ALICE)).await.unwrap(), U256::from(42u8));
        assert_eq!(eval_with(&gated, &ctx_for(BOB)).await.unwrap(), U256::from(7u8));
    }

    #[tokio::test]
    async fn discount_uses_best_held_tier() {
        let discounts = [10, 20, 30, 40, 50, 60, 70, 80];
        let priced = set_discount_for_tiers(&v(1_000), TIER, discounts).unwrap();
        assert_eq!(priced.sources.len(), 2);
        assert_eq!(eval_with(&priced, &ctx_for(ALICE)).await.unwrap(), U256::from(800u32));
        assert_eq!(eval_with(&priced, &ctx_for(BOB)).await.unwrap(), U256::from(1_000u32));

        let mut too_big = discounts;
        too_big[3] = 101;
        assert!(matches!(
            set_discount_for_tiers(&v(1_000), TIER, too_big),
            Err(VMError::CombinerShapeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn multiplier_relocates_past_existing_sources() {
        let multipliers = [110, 150, 300, 300, 300, 300, 300, 300];
        // a price that already zips, so the tail's sub-source lands at index 2
        let base = set_multiplier_for_tiers(&v(1_000), TIER, multipliers).unwrap();
        let twice = set_multiplier_for_tiers(&base, TIER, multipliers).unwrap();
        assert_eq!(twice.sources.len(), 3);
        assert_eq!(eval_with(&base, &ctx_for(ALICE)).await.unwrap(), U256::from(1_500u32));
        assert_eq!(eval_with(&twice, &ctx_for(ALICE)).await.unwrap(), U256::from(2_250u32));
        assert_eq!(eval_with(&twice, &ctx_for(BOB)).await.unwrap(), U256::from(1_000u32));
    }

    #[tokio::test]
    async fn tier_tails_need_a_signer() {
        let priced = set_discount_for_tiers(&v(1_000), TIER, [0; 8]).unwrap();
        let ctx = ExecContext::new().with_provider(Arc::new(MemoryProvider::new()));
        assert!(matches!(
            eval_with(&priced, &ctx).await,
            Err(VMError::CollaboratorFailure { .. })
        ));
    }
}

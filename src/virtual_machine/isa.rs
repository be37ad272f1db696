//! Standard opcode table.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical opcode list and invokes a callback macro for code generation, so
//! the interpreter, the assembler and the ISA hash check all read one table.
//!
//! # Bytecode Format
//!
//! A source is a flat sequence of `(opcode: u8, operand: u8)` pairs. Opcodes
//! `0..LOCAL_OPS_START` are standard; anything above is resolved through the
//! domain table injected into the interpreter.

use crate::virtual_machine::errors::VMError;

/// First opcode available to domain-appended handlers.
pub const LOCAL_OPS_START: u8 = 46;

/// Invokes a callback macro with the complete opcode list.
///
/// Each entry is `Variant = opcode, "MNEMONIC" => OperandKind`.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Core
            // =========================
            /// CONSTANT index ; push constants[index], or arguments[index & 0x7f] when bit 7 is set
            Constant = 0, "CONSTANT" => Constant,
            /// STACK index ; push a copy of stack[index]
            Stack = 1, "STACK" => StackIndex,
            /// CONTEXT key ; run the CONTEXT extension handler registered under key
            Context = 2, "CONTEXT" => Extension,
            /// STORAGE key ; run the STORAGE extension handler registered under key
            Storage = 3, "STORAGE" => Extension,
            /// ZIPMAP fields ; evaluate a sub-source once per lane of the popped values
            Zipmap = 4, "ZIPMAP" => Zipmap,
            /// DEBUG what ; log part of the runtime state
            Debug = 5, "DEBUG" => Debug,
            // =========================
            // Token reads
            // =========================
            /// IERC20_BALANCE_OF ; token, account -> balance
            IErc20BalanceOf = 6, "IERC20_BALANCE_OF" => None,
            /// IERC20_TOTAL_SUPPLY ; token -> supply
            IErc20TotalSupply = 7, "IERC20_TOTAL_SUPPLY" => None,
            /// IERC20_SNAPSHOT_BALANCE_OF_AT ; token, account, snapshot -> balance
            IErc20SnapshotBalanceOfAt = 8, "IERC20_SNAPSHOT_BALANCE_OF_AT" => None,
            /// IERC20_SNAPSHOT_TOTAL_SUPPLY_AT ; token, snapshot -> supply
            IErc20SnapshotTotalSupplyAt = 9, "IERC20_SNAPSHOT_TOTAL_SUPPLY_AT" => None,
            /// IERC721_BALANCE_OF ; token, account -> balance
            IErc721BalanceOf = 10, "IERC721_BALANCE_OF" => None,
            /// IERC721_OWNER_OF ; token, id -> owner
            IErc721OwnerOf = 11, "IERC721_OWNER_OF" => None,
            /// IERC1155_BALANCE_OF ; token, account, id -> balance
            IErc1155BalanceOf = 12, "IERC1155_BALANCE_OF" => None,
            /// IERC1155_BALANCE_OF_BATCH n ; token, accounts[n], ids[n] -> balances[n]
            IErc1155BalanceOfBatch = 13, "IERC1155_BALANCE_OF_BATCH" => Length,
            // =========================
            // Environment
            // =========================
            /// BLOCK_NUMBER ; push the current block number
            BlockNumber = 14, "BLOCK_NUMBER" => None,
            /// SENDER ; push the signer address
            Sender = 15, "SENDER" => None,
            /// THIS_ADDRESS ; push the evaluating contract's address
            ThisAddress = 16, "THIS_ADDRESS" => None,
            /// BLOCK_TIMESTAMP ; push the current block timestamp
            BlockTimestamp = 17, "BLOCK_TIMESTAMP" => None,
            // =========================
            // Fixed point
            // =========================
            /// SCALE18 decimals ; a -> a rescaled to 18 decimals
            Scale18 = 18, "SCALE18" => Decimals,
            /// SCALE18_DIV decimals ; a, b -> scale18(a) * 1e18 / b
            Scale18Div = 19, "SCALE18_DIV" => Decimals,
            /// SCALE18_MUL decimals ; a, b -> scale18(a) * b / 1e18
            Scale18Mul = 20, "SCALE18_MUL" => Decimals,
            /// SCALE_BY exponent ; a -> a * 10^exponent (signed)
            ScaleBy = 21, "SCALE_BY" => SignedExponent,
            /// SCALEN decimals ; a -> a rescaled from 18 decimals
            ScaleN = 22, "SCALEN" => Decimals,
            // =========================
            // Logic
            // =========================
            /// ANY n ; first non-zero of the window, else 0
            Any = 23, "ANY" => Window,
            /// EAGER_IF ; cond, t, f -> cond > 0 ? t : f
            EagerIf = 24, "EAGER_IF" => None,
            /// EQUAL_TO ; a, b -> a == b
            EqualTo = 25, "EQUAL_TO" => None,
            /// EVERY n ; first zero of the window, else the last value
            Every = 26, "EVERY" => Window,
            /// GREATER_THAN ; a, b -> a > b
            GreaterThan = 27, "GREATER_THAN" => None,
            /// ISZERO ; a -> a == 0
            IsZero = 28, "ISZERO" => None,
            /// LESS_THAN ; a, b -> a < b
            LessThan = 29, "LESS_THAN" => None,
            // =========================
            // Math
            // =========================
            /// SATURATING_ADD n ; clamped sum of the window
            SaturatingAdd = 30, "SATURATING_ADD" => Window,
            /// SATURATING_MUL n ; clamped product of the window
            SaturatingMul = 31, "SATURATING_MUL" => Window,
            /// SATURATING_SUB n ; clamped difference of the window
            SaturatingSub = 32, "SATURATING_SUB" => Window,
            /// ADD n
            Add = 33, "ADD" => Window,
            /// DIV n
            Div = 34, "DIV" => Window,
            /// EXP n
            Exp = 35, "EXP" => Window,
            /// MAX n
            Max = 36, "MAX" => Window,
            /// MIN n
            Min = 37, "MIN" => Window,
            /// MOD n
            Mod = 38, "MOD" => Window,
            /// MUL n
            Mul = 39, "MUL" => Window,
            /// SUB n
            Sub = 40, "SUB" => Window,
            // =========================
            // Tier
            // =========================
            /// ITIERV2_REPORT c ; tier, account, ctx[c] -> report
            ITierV2Report = 41, "ITIERV2_REPORT" => Length,
            /// ITIERV2_REPORT_TIME_FOR_TIER c ; tier, account, tierN, ctx[c] -> time
            ITierV2ReportTimeForTier = 42, "ITIERV2_REPORT_TIME_FOR_TIER" => Length,
            /// SATURATING_DIFF ; a, b -> lane-wise a - b clamped at 0
            SaturatingDiff = 43, "SATURATING_DIFF" => None,
            /// SELECT_LTE fields ; reports[len], threshold -> report
            SelectLte = 44, "SELECT_LTE" => SelectLte,
            /// UPDATE_TIMES_FOR_TIER_RANGE range ; report, value -> report
            UpdateTimesForTierRange = 45, "UPDATE_TIMES_FOR_TIER_RANGE" => TierRange,
        }
    };
}

/// How an opcode interprets its operand byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandKind {
    /// Ignored; assembled as zero.
    None,
    Constant,
    StackIndex,
    Extension,
    Zipmap,
    Debug,
    /// N-ary window size, must be non-zero.
    Window,
    /// Count of values read alongside the fixed inputs.
    Length,
    Decimals,
    SignedExponent,
    SelectLte,
    TierRange,
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => $kind:ident
        ),* $(,)?
    ) => {
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::UnknownOpcode {
                        opcode: value,
                        operand: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every standard opcode in numbering order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            pub const fn opcode(self) -> u8 {
                self as u8
            }

            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            pub const fn operand_kind(&self) -> OperandKind {
                match self {
                    $( Instruction::$name => OperandKind::$kind, )*
                }
            }

            /// Resolves a mnemonic, accepting `DUP` as an alias of `STACK`.
            pub fn from_mnemonic(name: &str) -> Option<Instruction> {
                match name {
                    $( $mnemonic => Some(Instruction::$name), )*
                    "DUP" => Some(Instruction::Stack),
                    _ => None,
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Mnemonic for any opcode, including domain-appended ones.
pub fn opcode_name(opcode: u8) -> &'static str {
    match Instruction::try_from(opcode) {
        Ok(instr) => instr.mnemonic(),
        Err(_) => "OP",
    }
}

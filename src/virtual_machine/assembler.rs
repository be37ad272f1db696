//! Script assembler.
//!
//! Compiles a line-oriented text format into a [`Program`]. Mnemonics come
//! from [`for_each_instruction!`](crate::for_each_instruction), so the
//! assembler always accepts exactly the interpreter's opcode table.
//!
//! # Syntax
//!
//! ```text
//! .stack_length 4          # optional sizing directives
//! [ source 0 ]
//! VAL 3                    # intern a literal, emit CONSTANT idx
//! VAL 0x04
//! ADD 2
//! ZIPMAP 1, 32, 2          # source, lane bits, value count
//! [ source 1 ]
//! ARG 0                    # argument-addressed CONSTANT
//! OP 46 0                  # raw pair for a domain opcode
//! ```
//!
//! - Comments start with `#`; commas between operands are optional
//! - Numbers are decimal or `0x` hex
//! - Lines before the first `[ source N ]` marker belong to source 0
//! - `SELECT_LTE every|any, min|max|first, length`
//! - `UPDATE_TIMES_FOR_TIER_RANGE start, end`
//! - `SCALE_BY` takes a signed exponent

use crate::types::u256::U256;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, OperandKind};
use crate::virtual_machine::operand::{
    ConstantOperand, DebugOperand, MAX_CONSTANT_INDEX, SelectLogic, SelectLteOperand, SelectMode, TierRange,
    ZipmapOperand, window,
};
use crate::virtual_machine::program::Program;
use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;

const COMMENT_CHAR: char = '#';
const DIRECTIVE_PREFIX: char = '.';
const SOURCE_KEYWORD: &str = "source";

/// Return the line/column/message triple for assembly errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, &str)> {
    match err {
        VMError::AssemblyError {
            line,
            column,
            message,
        } => Some((*line, *column, message.as_str())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for an assembly failure.
pub fn render_assembly_diagnostic(file: &str, source: &str, err: &VMError) -> String {
    let Some((line, column, message)) = assembly_error_location(err) else {
        return format!("error: {err}");
    };
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{column}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(column.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

fn error_at(line: usize, column: usize, message: impl Into<String>) -> VMError {
    VMError::AssemblyError {
        line,
        column,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column in the line.
    column: usize,
}

/// Splits a line into tokens. `#` starts a comment; commas and whitespace
/// separate tokens.
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let code = match line.find(COMMENT_CHAR) {
        Some(i) => &line[..i],
        None => line,
    };
    let mut out = Vec::with_capacity(4);
    let mut start: Option<usize> = None;
    for (i, c) in code.char_indices() {
        let separator = c == ',' || c.is_whitespace();
        match (separator, start) {
            (true, Some(s)) => {
                out.push(Token {
                    text: &code[s..i],
                    column: s + 1,
                });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(Token {
            text: &code[s..],
            column: s + 1,
        });
    }
    out
}

/// Parses a `[ source N ]` marker. `None` if the line is not a marker.
fn parse_source_marker(line_no: usize, line: &str) -> Option<Result<usize, VMError>> {
    let code = line.split(COMMENT_CHAR).next().unwrap_or_default().trim();
    let inner = code.strip_prefix('[')?.strip_suffix(']')?;
    let column = line.find('[').map_or(1, |i| i + 1);
    let mut words = inner.split_whitespace();
    let parsed = match (words.next(), words.next(), words.next()) {
        (Some(keyword), Some(index), None) if keyword.eq_ignore_ascii_case(SOURCE_KEYWORD) => {
            index.parse::<usize>().ok()
        }
        _ => None,
    };
    Some(parsed.ok_or_else(|| error_at(line_no, column, format!("malformed section marker '{code}'"))))
}

/// One tokenized line with operand accessors that report positions.
struct Line<'a> {
    number: usize,
    head: Token<'a>,
    operands: Vec<Token<'a>>,
}

impl<'a> Line<'a> {
    fn arity(&self, expected: usize) -> Result<(), VMError> {
        if self.operands.len() == expected {
            return Ok(());
        }
        let column = self
            .operands
            .get(expected)
            .map_or(self.head.column, |t| t.column);
        Err(error_at(
            self.number,
            column,
            format!(
                "{} takes {expected} operand(s), found {}",
                self.head.text,
                self.operands.len()
            ),
        ))
    }

    fn error(&self, index: usize, message: impl Into<String>) -> VMError {
        let column = self.operands.get(index).map_or(self.head.column, |t| t.column);
        error_at(self.number, column, message)
    }

    fn text(&self, index: usize) -> &'a str {
        self.operands[index].text
    }

    fn word(&self, index: usize) -> Result<U256, VMError> {
        let text = self.text(index);
        text.parse::<U256>()
            .map_err(|e| self.error(index, format!("invalid number '{text}': {e}")))
    }

    fn byte(&self, index: usize) -> Result<u8, VMError> {
        let word = self.word(index)?;
        word.to_u64()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| self.error(index, format!("{word} does not fit in one byte")))
    }

    fn size(&self, index: usize) -> Result<usize, VMError> {
        let word = self.word(index)?;
        word.to_usize()
            .ok_or_else(|| self.error(index, format!("{word} is too large")))
    }

    fn signed_byte(&self, index: usize) -> Result<i8, VMError> {
        let text = self.text(index);
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let magnitude = digits
            .parse::<U256>()
            .ok()
            .and_then(|w| w.to_u64())
            .map(|m| if negative { -(m as i128) } else { m as i128 });
        magnitude
            .and_then(|v| i8::try_from(v).ok())
            .ok_or_else(|| self.error(index, format!("'{text}' is not in -128..=127")))
    }

    /// Attaches this line's position to an operand codec error.
    fn locate(&self, index: usize, err: VMError) -> VMError {
        match err {
            VMError::InvalidOperand { op, reason, .. } => self.error(index, format!("{op}: {reason}")),
            other => self.error(index, other.to_string()),
        }
    }
}

/// Accumulates sources and the interned constant pool.
#[derive(Default)]
struct Assembler {
    sources: Vec<Vec<u8>>,
    constants: Vec<U256>,
    interned: HashMap<U256, u8>,
    current: usize,
    seen_marker: bool,
    instructions: usize,
    max_argument: Option<u8>,
    stack_length: Option<usize>,
    arguments_length: Option<usize>,
}

impl Assembler {
    fn emit(&mut self, opcode: u8, operand: u8) {
        if self.sources.len() <= self.current {
            self.sources.resize_with(self.current + 1, Vec::new);
        }
        self.sources[self.current].extend_from_slice(&[opcode, operand]);
        self.instructions += 1;
    }

    fn intern(&mut self, value: U256) -> Option<u8> {
        if let Some(&index) = self.interned.get(&value) {
            return Some(index);
        }
        let index = self.constants.len();
        if index > MAX_CONSTANT_INDEX {
            return None;
        }
        self.constants.push(value);
        self.interned.insert(value, index as u8);
        Some(index as u8)
    }

    /// Handles `[ source N ]`. Sources must appear in order.
    fn open_source(&mut self, line_no: usize, index: usize) -> Result<(), VMError> {
        let expected = if self.seen_marker { self.current + 1 } else { 0 };
        if index != expected {
            return Err(error_at(
                line_no,
                1,
                format!("expected [ source {expected} ], found [ source {index} ]"),
            ));
        }
        self.seen_marker = true;
        self.current = index;
        if self.sources.len() <= index {
            self.sources.resize_with(index + 1, Vec::new);
        }
        Ok(())
    }

    fn directive(&mut self, line: &Line<'_>) -> Result<(), VMError> {
        line.arity(1)?;
        let value = line.size(0)?;
        match line.head.text {
            ".stack_length" => self.stack_length = Some(value),
            ".arguments_length" => self.arguments_length = Some(value),
            other => {
                return Err(error_at(
                    line.number,
                    line.head.column,
                    format!("unknown directive '{other}'"),
                ));
            }
        }
        Ok(())
    }

    fn statement(&mut self, line: &Line<'_>) -> Result<(), VMError> {
        let name = line.head.text.to_ascii_uppercase();
        match name.as_str() {
            "VAL" => {
                line.arity(1)?;
                let value = line.word(0)?;
                let index = self.intern(value).ok_or_else(|| {
                    line.error(0, format!("constant pool is full ({} entries)", MAX_CONSTANT_INDEX + 1))
                })?;
                self.emit(Instruction::Constant.opcode(), index);
            }
            "ARG" => {
                line.arity(1)?;
                let index = line.byte(0)?;
                let operand = ConstantOperand::Argument(index)
                    .encode()
                    .map_err(|e| line.locate(0, e))?;
                self.max_argument = self.max_argument.max(Some(index));
                self.emit(Instruction::Constant.opcode(), operand);
            }
            "OP" => {
                line.arity(2)?;
                let (opcode, operand) = (line.byte(0)?, line.byte(1)?);
                self.emit(opcode, operand);
            }
            _ => {
                let instr = Instruction::from_mnemonic(&name).ok_or_else(|| {
                    error_at(
                        line.number,
                        line.head.column,
                        format!("unknown instruction '{}'", line.head.text),
                    )
                })?;
                let operand = encode_operand(instr, line)?;
                self.emit(instr.opcode(), operand);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Program {
        if self.sources.is_empty() {
            self.sources.push(Vec::new());
        }
        let arguments_length = self
            .arguments_length
            .unwrap_or_else(|| self.max_argument.map_or(0, |a| a as usize + 1));
        Program::new(
            self.sources,
            self.constants,
            self.stack_length.unwrap_or(self.instructions),
            arguments_length,
        )
    }
}

fn parse_logic(line: &Line<'_>, index: usize) -> Result<SelectLogic, VMError> {
    match line.text(index).to_ascii_lowercase().as_str() {
        "every" => Ok(SelectLogic::Every),
        "any" => Ok(SelectLogic::Any),
        other => Err(line.error(index, format!("expected every or any, found '{other}'"))),
    }
}

fn parse_mode(line: &Line<'_>, index: usize) -> Result<SelectMode, VMError> {
    match line.text(index).to_ascii_lowercase().as_str() {
        "min" => Ok(SelectMode::Min),
        "max" => Ok(SelectMode::Max),
        "first" => Ok(SelectMode::First),
        other => Err(line.error(index, format!("expected min, max or first, found '{other}'"))),
    }
}

/// Encodes the operand of a standard instruction from its text form.
fn encode_operand(instr: Instruction, line: &Line<'_>) -> Result<u8, VMError> {
    match instr.operand_kind() {
        OperandKind::None => {
            line.arity(0)?;
            Ok(0)
        }
        OperandKind::Constant
        | OperandKind::StackIndex
        | OperandKind::Extension
        | OperandKind::Length
        | OperandKind::Decimals => {
            line.arity(1)?;
            line.byte(0)
        }
        OperandKind::Window => {
            line.arity(1)?;
            let n = line.byte(0)?;
            window(instr.mnemonic(), n).map_err(|e| line.locate(0, e))?;
            Ok(n)
        }
        OperandKind::Debug => {
            line.arity(1)?;
            let what = line.byte(0)?;
            DebugOperand::decode(what)
                .map(DebugOperand::encode)
                .map_err(|e| line.locate(0, e))
        }
        OperandKind::SignedExponent => {
            line.arity(1)?;
            Ok(line.signed_byte(0)? as u8)
        }
        OperandKind::Zipmap => {
            line.arity(3)?;
            let source = line.byte(0)?;
            let lane_bits = u16::try_from(line.size(1)?).map_err(|_| line.error(1, "lane width too large"))?;
            let count = line.byte(2)?;
            ZipmapOperand::from_lane_bits(source, lane_bits, count)
                .and_then(ZipmapOperand::encode)
                .map_err(|e| line.locate(0, e))
        }
        OperandKind::SelectLte => {
            line.arity(3)?;
            SelectLteOperand {
                logic: parse_logic(line, 0)?,
                mode: parse_mode(line, 1)?,
                length: line.byte(2)?,
            }
            .encode()
            .map_err(|e| line.locate(2, e))
        }
        OperandKind::TierRange => {
            line.arity(2)?;
            let range = TierRange::new(line.byte(0)?, line.byte(1)?).map_err(|e| line.locate(0, e))?;
            Ok(range.encode())
        }
    }
}

/// Assembles a full source string into a program.
///
/// Errors carry the line and column of the offending token. Sources are not
/// cross-checked beyond their operand encodings; call [`Program::validate`]
/// for raw `CONSTANT` indices and ZIPMAP targets.
pub fn assemble_source(source: &str) -> Result<Program, VMError> {
    let mut asm = Assembler::default();
    for (i, raw) in source.lines().enumerate() {
        let line_no = i + 1;
        if let Some(marker) = parse_source_marker(line_no, raw) {
            asm.open_source(line_no, marker?)?;
            continue;
        }
        let mut tokens = tokenize(raw).into_iter();
        let Some(head) = tokens.next() else { continue };
        let line = Line {
            number: line_no,
            head,
            operands: tokens.collect(),
        };
        if head.text.starts_with(DIRECTIVE_PREFIX) {
            asm.directive(&line)?;
        } else {
            asm.statement(&line)?;
        }
    }
    Ok(asm.finish())
}

/// Assembles `source`, logging a diagnostic named after `source_name` on failure.
pub fn assemble_source_with_name(source: &str, source_name: &str) -> Result<Program, VMError> {
    let result = assemble_source(source);
    if let Err(err) = &result {
        crate::error!("{}", render_assembly_diagnostic(source_name, source, err));
    }
    result
}

/// Convenience: assemble directly from a file path.
pub async fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Program, VMError> {
    let path = path.as_ref();
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| VMError::IoError(format!("{}: {e}", path.display())))?;
    assemble_source_with_name(&source, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u64]) -> Vec<U256> {
        values.iter().map(|&v| U256::from(v)).collect()
    }

    fn op(instr: Instruction, operand: u8) -> [u8; 2] {
        [instr.opcode(), operand]
    }

    fn assembly_error(source: &str) -> (usize, usize, String) {
        match assemble_source(source) {
            Err(VMError::AssemblyError {
                line,
                column,
                message,
            }) => (line, column, message),
            other => panic!("expected an assembly error, got {other:?}"),
        }
    }

    #[test]
    fn tokenize_ignores_commas_and_comments() {
        let tokens = tokenize("ZIPMAP 1,32, 2 # lanes");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text).collect();
        assert_eq!(texts, ["ZIPMAP", "1", "32", "2"]);
        assert_eq!(tokens[2].column, 10);
    }

    #[test]
    fn assemble_empty_source() {
        let program = assemble_source("# nothing\n\n").unwrap();
        assert_eq!(program.sources, vec![Vec::<u8>::new()]);
        assert!(program.constants.is_empty());
    }

    #[test]
    fn matches_hand_built_sum() {
        let program = assemble_source("VAL 3\nVAL 0x4\nADD 2\n").unwrap();
        let expected = Program::new(
            vec![[op(Instruction::Constant, 0), op(Instruction::Constant, 1), op(Instruction::Add, 2)].concat()],
            words(&[3, 4]),
            3,
            0,
        );
        assert_eq!(program, expected);
    }

    #[test]
    fn val_interns_repeated_literals() {
        let program = assemble_source("VAL 7\nVAL 8\nVAL 7").unwrap();
        assert_eq!(program.constants, words(&[7, 8]));
        assert_eq!(program.sources[0], [0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn sections_and_arguments() {
        let source = "\
            .stack_length 12
            [ source 0 ]
            VAL 1
            VAL 2
            ZIPMAP 1, 128, 2
            [ source 1 ]
            ARG 0
            ARG 1
            MUL 2
        ";
        let program = assemble_source(source).unwrap();
        assert_eq!(program.sources.len(), 2);
        assert_eq!(program.sources[0][4..], [Instruction::Zipmap.opcode(), 0b001_01_001]);
        assert_eq!(program.sources[1], [0, 0x80, 0, 0x81, Instruction::Mul.opcode(), 2]);
        assert_eq!(program.stack_length, 12);
        assert_eq!(program.arguments_length, 2);
        program.validate().unwrap();
    }

    #[test]
    fn structured_operands() {
        let program = assemble_source(
            "SELECT_LTE any, first, 3\nUPDATE_TIMES_FOR_TIER_RANGE 0, 8\nSCALE_BY -2\nDUP 1\nOP 46 7\nDEBUG 1",
        )
        .unwrap();
        assert_eq!(
            program.sources[0],
            [
                op(Instruction::SelectLte, 0x80 | (2 << 5) | 3),
                op(Instruction::UpdateTimesForTierRange, 0x80),
                op(Instruction::ScaleBy, 0xfe),
                op(Instruction::Stack, 1),
                [46, 7],
                op(Instruction::Debug, 1),
            ]
            .concat()
        );
    }

    #[test]
    fn lowercase_mnemonics_are_accepted() {
        let program = assemble_source("val 1\nisZero").unwrap();
        assert_eq!(program.sources[0], [0, 0, Instruction::IsZero.opcode(), 0]);
    }

    #[test]
    fn unknown_instruction_reports_position() {
        let (line, column, message) = assembly_error("VAL 1\n   FROB 2");
        assert_eq!((line, column), (2, 4));
        assert!(message.contains("FROB"));
    }

    #[test]
    fn wrong_arity() {
        let (line, column, _) = assembly_error("ADD 2 3");
        assert_eq!((line, column), (1, 7));
        let (_, _, message) = assembly_error("ZIPMAP 1 32");
        assert!(message.contains("3 operand(s)"));
    }

    #[test]
    fn operand_range_errors() {
        let (_, column, message) = assembly_error("ZIPMAP 1, 48, 1");
        assert_eq!(column, 8);
        assert!(message.contains("ZIPMAP"));
        assert_eq!(assembly_error("ADD 0").1, 5);
        assert_eq!(assembly_error("STACK 256").1, 7);
        assert_eq!(assembly_error("SCALE_BY -129").1, 10);
        assert_eq!(assembly_error("SELECT_LTE most, min, 1").1, 12);
        assert_eq!(assembly_error("UPDATE_TIMES_FOR_TIER_RANGE 0 9").0, 1);
        assert_eq!(assembly_error("ARG 128").1, 5);
    }

    #[test]
    fn sources_must_be_in_order() {
        let (line, _, message) = assembly_error("[ source 0 ]\nVAL 1\n[ source 2 ]");
        assert_eq!(line, 3);
        assert!(message.contains("source 1"));
        assert_eq!(assembly_error("[ source ]").0, 1);
    }

    #[test]
    fn unknown_directive() {
        let (_, _, message) = assembly_error(".heap 3");
        assert!(message.contains(".heap"));
    }

    #[test]
    fn diagnostic_points_at_column() {
        let source = "VAL 1\nADD x";
        let err = assemble_source(source).unwrap_err();
        let diag = render_assembly_diagnostic("sum.rain", source, &err);
        assert!(diag.contains(" --> sum.rain:2:5"));
        assert!(diag.contains("   2 | ADD x"));
        assert!(diag.ends_with("  |     ^\n"));
    }

    #[tokio::test]
    async fn assemble_missing_file() {
        let err = assemble_file("/nonexistent/script.rain").await.unwrap_err();
        assert!(matches!(err, VMError::IoError(_)));
    }
}

//! Moon assembly text.
//!
//! Lines are laid out in two columns: a label column nine characters wide
//! plus a separating space, then the instruction.

use std::fmt;

use crate::error::{CompileError, CompileResult};

const LABEL_WIDTH: usize = 9;

/// Size of the scratch buffer `put` formats integers into.
pub const PUT_BUFFER_SIZE: u32 = 20;

/// Which code section a callable scope emits into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Out {
    Main,
    Routines,
}

#[derive(Debug, Default, Clone)]
pub struct Section {
    lines: Vec<String>,
}

impl Section {
    pub fn comment(&mut self, text: impl fmt::Display) {
        self.push("", format!("% {text}"));
    }

    pub fn op(&mut self, mnemonic: &str, operands: impl fmt::Display) {
        self.push("", format!("{mnemonic} {operands}"));
    }

    pub fn labeled(&mut self, label: &str, mnemonic: &str, operands: impl fmt::Display) {
        self.push(label, format!("{mnemonic} {operands}"));
    }

    pub fn bare(&mut self, mnemonic: &str) {
        self.push("", mnemonic.to_string());
    }

    pub fn reserve(&mut self, label: &str, size: u32) {
        self.labeled(label, "res", size);
    }

    fn push(&mut self, label: &str, text: String) {
        self.lines
            .push(format!("{label:<LABEL_WIDTH$} {text}").trim_end().to_string());
    }
}

/// A whole program: entry code ending in `hlt`, routines, then data.
#[derive(Debug, Default, Clone)]
pub struct Assembly {
    pub main: Section,
    pub routines: Section,
    pub data: Section,
}

impl Assembly {
    pub fn code(&mut self, out: Out) -> &mut Section {
        match out {
            Out::Main => &mut self.main,
            Out::Routines => &mut self.routines,
        }
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tail = Section::default();
        tail.bare("hlt");

        let mut buffer = Section::default();
        buffer.reserve("buf", PUT_BUFFER_SIZE);

        for section in [&self.main, &tail, &self.routines, &self.data, &buffer] {
            for line in &section.lines {
                writeln!(f, "{line}")?;
            }
        }
        Ok(())
    }
}

/// Mnemonic for a binary operator.
pub fn mnemonic(operator: &str) -> CompileResult<&'static str> {
    match operator {
        "+" => Ok("add"),
        "-" => Ok("sub"),
        "*" => Ok("mul"),
        "/" => Ok("div"),
        _ => Err(CompileError::UnsupportedOperator {
            operator: operator.to_string(),
        }),
    }
}

/// Entry label of a function's routine.
///
/// User names only ever appear behind this prefix, so a function called `t1`,
/// `buf` or `intstr` cannot clash with a temporary, the `put` buffer or a
/// library routine.
pub fn routine_label(name: &str) -> String {
    format!("fn_{name}")
}

/// Integer immediate for a literal.
///
/// Moon has no floating point, so a float literal is truncated toward zero
/// (saturating at the `i32` range). Text that is not a number is rejected.
pub fn immediate(literal: &str) -> CompileResult<i32> {
    let text = literal.trim();
    if let Ok(value) = text.parse::<i32>() {
        return Ok(value);
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value.trunc() as i32),
        _ => Err(CompileError::UnsupportedLiteral {
            literal: literal.to_string(),
        }),
    }
}

/// Prints the word at `slot` through the `intstr`/`putstr` library routines.
///
/// Both routines take their arguments just below `r14`, which is scratch
/// space while no call is in progress.
pub fn put(code: &mut Section, slot: &str) {
    code.op("lw", format_args!("r1,{slot}"));
    code.op("sw", "-8(r14),r1");
    code.op("addi", "r1,r0,buf");
    code.op("sw", "-12(r14),r1");
    code.op("jl", "r15,intstr");
    code.op("sw", "-8(r14),r13");
    code.op("jl", "r15,putstr");
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_sections_in_order() {
        let mut asm = Assembly::default();
        asm.main.bare("entry");
        asm.main.comment("processing: t1 := 7");
        asm.main.op("addi", "r1,r0,7");
        asm.routines.labeled(&routine_label("f"), "sw", "link_f(r0),r15");
        asm.data.reserve("t1", 4);
        asm.data.reserve("program_alpha", 4);

        assert_eq!(
            asm.to_string(),
            indoc! {"
                          entry
                          % processing: t1 := 7
                          addi r1,r0,7
                          hlt
                fn_f      sw link_f(r0),r15
                t1        res 4
                program_alpha res 4
                buf       res 20
            "}
        );
    }

    #[test]
    fn maps_operators_and_literals() {
        assert_eq!(mnemonic("*"), Ok("mul"));
        assert_eq!(
            mnemonic("and").expect_err("no logical ops").to_string(),
            "Unsupported operator 'and'"
        );
        assert_eq!(immediate("-12"), Ok(-12));
    }

    #[test]
    fn float_literals_are_truncated() {
        assert_eq!(immediate("1.5"), Ok(1));
        assert_eq!(immediate("-2.75"), Ok(-2));
        assert_eq!(immediate("3e2"), Ok(300));
        assert_eq!(immediate("1e12"), Ok(i32::MAX));
        assert_eq!(
            immediate("x1").expect_err("not a number").to_string(),
            "Literal 'x1' cannot be loaded as an integer immediate"
        );
        assert!(immediate("inf").is_err());
        assert!(immediate("NaN").is_err());
    }
}

//! Simulator for the Moon subset emitted by the backends.
//!
//! Source is assembled in two passes: the first assigns an address to every
//! label (instructions are one word, `res` blocks are rounded up to whole
//! words), the second decodes instructions with all labels known. Code is
//! kept apart from data memory; only `res` blocks and the stack live in
//! `memory`. The `intstr` and `putstr` library routines are built in.

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Bytes of data memory; `topaddr` evaluates to this.
pub const MEMORY_SIZE: u32 = 64 * 1024;
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

const WORD: u32 = 4;
const REGISTER_COUNT: usize = 16;
/// Register the library routines answer in.
const RESULT_REGISTER: usize = 13;
const FRAME_REGISTER: usize = 14;

pub type VmResult<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Line {line}: unknown instruction '{mnemonic}'")]
    UnknownInstruction { line: usize, mnemonic: String },
    #[error("Line {line}: malformed operands '{operands}' for {mnemonic}")]
    MalformedOperands {
        line: usize,
        mnemonic: String,
        operands: String,
    },
    #[error("Line {line}: label '{label}' is defined twice")]
    DuplicateLabel { line: usize, label: String },
    #[error("Line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },
    #[error("Program does not fit in memory")]
    ProgramTooLarge,
    #[error("Program has no entry point")]
    MissingEntry,
    #[error("Memory access at {address} is out of bounds")]
    OutOfBounds { address: i64 },
    #[error("Misaligned word access at {address}")]
    MisalignedAccess { address: i64 },
    #[error("Division by zero at address {pc}")]
    DivisionByZero { pc: u32 },
    #[error("No instruction at address {pc}")]
    InvalidJumpTarget { pc: i64 },
    #[error("Step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn apply(self, left: i32, right: i32, pc: u32) -> VmResult<i32> {
        match self {
            ArithOp::Add => Ok(left.wrapping_add(right)),
            ArithOp::Sub => Ok(left.wrapping_sub(right)),
            ArithOp::Mul => Ok(left.wrapping_mul(right)),
            ArithOp::Div => {
                if right == 0 {
                    return Err(VmError::DivisionByZero { pc });
                }
                Ok(left.wrapping_div(right))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routine {
    IntStr,
    PutStr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instruction {
    Load {
        dst: usize,
        base: usize,
        offset: i32,
    },
    Store {
        base: usize,
        offset: i32,
        src: usize,
    },
    Arith {
        op: ArithOp,
        dst: usize,
        left: usize,
        right: usize,
    },
    ArithImmediate {
        op: ArithOp,
        dst: usize,
        left: usize,
        value: i32,
    },
    Jump {
        target: i32,
    },
    JumpLink {
        link: usize,
        target: i32,
    },
    JumpRegister {
        reg: usize,
    },
    Library {
        link: usize,
        routine: Routine,
    },
    Halt,
}

struct Line<'a> {
    number: usize,
    label: Option<&'a str>,
    mnemonic: &'a str,
    operands: String,
}

impl<'a> Line<'a> {
    fn parse(number: usize, raw: &'a str) -> Option<Self> {
        let text = match raw.find('%') {
            Some(index) => &raw[..index],
            None => raw,
        };
        if text.trim().is_empty() {
            return None;
        }

        let mut tokens = text.split_whitespace();
        let label = if text.starts_with(char::is_whitespace) {
            None
        } else {
            tokens.next()
        };
        let mnemonic = tokens.next().unwrap_or("");
        let operands = tokens.collect::<String>();
        Some(Self {
            number,
            label,
            mnemonic,
            operands,
        })
    }

    fn malformed(&self) -> VmError {
        VmError::MalformedOperands {
            line: self.number,
            mnemonic: self.mnemonic.to_string(),
            operands: self.operands.clone(),
        }
    }
}

fn round_to_word(size: u32) -> u32 {
    size.div_ceil(WORD) * WORD
}

/// A loaded program, ready to run.
pub struct Machine {
    instructions: FxHashMap<u32, Instruction>,
    entry: u32,
    memory: Vec<u8>,
    registers: [i32; REGISTER_COUNT],
    output: String,
}

/// Assembles `source` and runs it with the default step limit, returning
/// everything it printed.
pub fn run(source: &str) -> VmResult<String> {
    Machine::load(source)?.run(DEFAULT_STEP_LIMIT)
}

impl Machine {
    pub fn load(source: &str) -> VmResult<Self> {
        let lines: Vec<Line<'_>> = source
            .lines()
            .enumerate()
            .filter_map(|(index, raw)| Line::parse(index + 1, raw))
            .collect();

        let mut labels = FxHashMap::default();
        let mut addresses = Vec::with_capacity(lines.len());
        let mut entry = None;
        let mut address: u32 = 0;
        for line in &lines {
            if let Some(label) = line.label
                && labels.insert(label.to_string(), address).is_some()
            {
                return Err(VmError::DuplicateLabel {
                    line: line.number,
                    label: label.to_string(),
                });
            }
            addresses.push(address);
            let size = match line.mnemonic {
                "" => 0,
                "entry" => {
                    entry = Some(address);
                    0
                }
                "align" => round_to_word(address) - address,
                "res" => round_to_word(line.operands.parse().map_err(|_| line.malformed())?),
                _ => WORD,
            };
            address = address
                .checked_add(size)
                .filter(|end| *end <= MEMORY_SIZE)
                .ok_or(VmError::ProgramTooLarge)?;
        }

        let assembler = Assembler { labels: &labels };
        let mut instructions = FxHashMap::default();
        for (line, address) in lines.iter().zip(addresses) {
            if let Some(instruction) = assembler.decode(line)? {
                instructions.insert(address, instruction);
            }
        }

        Ok(Self {
            instructions,
            entry: entry.ok_or(VmError::MissingEntry)?,
            memory: vec![0; MEMORY_SIZE as usize],
            registers: [0; REGISTER_COUNT],
            output: String::new(),
        })
    }

    pub fn run(mut self, step_limit: u64) -> VmResult<String> {
        let mut pc = i64::from(self.entry);
        let mut steps = 0;
        loop {
            if steps == step_limit {
                return Err(VmError::StepLimitExceeded { limit: step_limit });
            }
            steps += 1;

            let address = u32::try_from(pc).map_err(|_| VmError::InvalidJumpTarget { pc })?;
            let instruction = *self
                .instructions
                .get(&address)
                .ok_or(VmError::InvalidJumpTarget { pc })?;
            pc += i64::from(WORD);

            match instruction {
                Instruction::Load { dst, base, offset } => {
                    let value = self.load_word(self.effective(base, offset))?;
                    self.set(dst, value);
                }
                Instruction::Store { base, offset, src } => {
                    self.store_word(self.effective(base, offset), self.registers[src])?;
                }
                Instruction::Arith {
                    op,
                    dst,
                    left,
                    right,
                } => {
                    let value = op.apply(self.registers[left], self.registers[right], address)?;
                    self.set(dst, value);
                }
                Instruction::ArithImmediate {
                    op,
                    dst,
                    left,
                    value,
                } => {
                    let value = op.apply(self.registers[left], value, address)?;
                    self.set(dst, value);
                }
                Instruction::Jump { target } => pc = i64::from(target),
                Instruction::JumpLink { link, target } => {
                    self.set_address(link, pc);
                    pc = i64::from(target);
                }
                Instruction::JumpRegister { reg } => pc = i64::from(self.registers[reg]),
                Instruction::Library { link, routine } => {
                    self.set_address(link, pc);
                    self.library(routine)?;
                }
                Instruction::Halt => return Ok(self.output),
            }
        }
    }

    fn set(&mut self, reg: usize, value: i32) {
        if reg != 0 {
            self.registers[reg] = value;
        }
    }

    fn set_address(&mut self, reg: usize, address: i64) {
        // Addresses are bounded by MEMORY_SIZE, well inside i32.
        self.set(reg, address as i32);
    }

    fn effective(&self, base: usize, offset: i32) -> i64 {
        i64::from(self.registers[base]) + i64::from(offset)
    }

    fn checked(&self, address: i64, width: u32) -> VmResult<usize> {
        if address < 0 || address + i64::from(width) > i64::from(MEMORY_SIZE) {
            return Err(VmError::OutOfBounds { address });
        }
        Ok(address as usize)
    }

    fn load_word(&self, address: i64) -> VmResult<i32> {
        if address % i64::from(WORD) != 0 {
            return Err(VmError::MisalignedAccess { address });
        }
        let start = self.checked(address, WORD)?;
        let mut bytes = [0; WORD as usize];
        bytes.copy_from_slice(&self.memory[start..start + WORD as usize]);
        Ok(i32::from_be_bytes(bytes))
    }

    fn store_word(&mut self, address: i64, value: i32) -> VmResult<()> {
        if address % i64::from(WORD) != 0 {
            return Err(VmError::MisalignedAccess { address });
        }
        let start = self.checked(address, WORD)?;
        self.memory[start..start + WORD as usize].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn library(&mut self, routine: Routine) -> VmResult<()> {
        let frame = i64::from(self.registers[FRAME_REGISTER]);
        match routine {
            // Formats the integer at -8(r14) into the buffer whose address is
            // at -12(r14); answers the string's address in r13.
            Routine::IntStr => {
                let value = self.load_word(frame - 8)?;
                let buffer = i64::from(self.load_word(frame - 12)?);
                let text = value.to_string();
                let start = self.checked(buffer, text.len() as u32 + 1)?;
                self.memory[start..start + text.len()].copy_from_slice(text.as_bytes());
                self.memory[start + text.len()] = 0;
                self.set(RESULT_REGISTER, buffer as i32);
            }
            // Prints the NUL-terminated string whose address is at -8(r14).
            Routine::PutStr => {
                let mut address = i64::from(self.load_word(frame - 8)?);
                loop {
                    let byte = self.memory[self.checked(address, 1)?];
                    if byte == 0 {
                        break;
                    }
                    self.output.push(char::from(byte));
                    address += 1;
                }
            }
        }
        Ok(())
    }
}

struct Assembler<'a> {
    labels: &'a FxHashMap<String, u32>,
}

impl Assembler<'_> {
    fn decode(&self, line: &Line<'_>) -> VmResult<Option<Instruction>> {
        let operands: Vec<&str> = if line.operands.is_empty() {
            Vec::new()
        } else {
            line.operands.split(',').collect()
        };
        let arith = |op| -> VmResult<Instruction> {
            let [dst, left, right] = operands[..] else {
                return Err(line.malformed());
            };
            Ok(Instruction::Arith {
                op,
                dst: self.register(line, dst)?,
                left: self.register(line, left)?,
                right: self.register(line, right)?,
            })
        };
        let immediate = |op| -> VmResult<Instruction> {
            let [dst, left, value] = operands[..] else {
                return Err(line.malformed());
            };
            Ok(Instruction::ArithImmediate {
                op,
                dst: self.register(line, dst)?,
                left: self.register(line, left)?,
                value: self.value(line, value)?,
            })
        };

        let instruction = match line.mnemonic {
            "" | "entry" | "align" | "res" => return Ok(None),
            "add" => arith(ArithOp::Add)?,
            "sub" => arith(ArithOp::Sub)?,
            "mul" => arith(ArithOp::Mul)?,
            "div" => arith(ArithOp::Div)?,
            "addi" => immediate(ArithOp::Add)?,
            "subi" => immediate(ArithOp::Sub)?,
            "muli" => immediate(ArithOp::Mul)?,
            "divi" => immediate(ArithOp::Div)?,
            "lw" => {
                let [dst, address] = operands[..] else {
                    return Err(line.malformed());
                };
                let (offset, base) = self.indexed(line, address)?;
                Instruction::Load {
                    dst: self.register(line, dst)?,
                    base,
                    offset,
                }
            }
            "sw" => {
                let [address, src] = operands[..] else {
                    return Err(line.malformed());
                };
                let (offset, base) = self.indexed(line, address)?;
                Instruction::Store {
                    base,
                    offset,
                    src: self.register(line, src)?,
                }
            }
            "j" => {
                let [target] = operands[..] else {
                    return Err(line.malformed());
                };
                Instruction::Jump {
                    target: self.value(line, target)?,
                }
            }
            "jl" => {
                let [link, target] = operands[..] else {
                    return Err(line.malformed());
                };
                let link = self.register(line, link)?;
                match (self.labels.contains_key(target), target) {
                    (false, "intstr") => Instruction::Library {
                        link,
                        routine: Routine::IntStr,
                    },
                    (false, "putstr") => Instruction::Library {
                        link,
                        routine: Routine::PutStr,
                    },
                    _ => Instruction::JumpLink {
                        link,
                        target: self.value(line, target)?,
                    },
                }
            }
            "jr" => {
                let [reg] = operands[..] else {
                    return Err(line.malformed());
                };
                Instruction::JumpRegister {
                    reg: self.register(line, reg)?,
                }
            }
            "hlt" => Instruction::Halt,
            other => {
                return Err(VmError::UnknownInstruction {
                    line: line.number,
                    mnemonic: other.to_string(),
                });
            }
        };
        Ok(Some(instruction))
    }

    fn register(&self, line: &Line<'_>, text: &str) -> VmResult<usize> {
        text.strip_prefix('r')
            .and_then(|index| index.parse::<usize>().ok())
            .filter(|index| *index < REGISTER_COUNT)
            .ok_or_else(|| line.malformed())
    }

    /// `K(rj)`
    fn indexed(&self, line: &Line<'_>, text: &str) -> VmResult<(i32, usize)> {
        let (offset, rest) = text.split_once('(').ok_or_else(|| line.malformed())?;
        let base = rest.strip_suffix(')').ok_or_else(|| line.malformed())?;
        Ok((self.value(line, offset)?, self.register(line, base)?))
    }

    /// Integer literal, label or `topaddr`.
    fn value(&self, line: &Line<'_>, text: &str) -> VmResult<i32> {
        if let Ok(value) = text.parse::<i32>() {
            return Ok(value);
        }
        if text == "topaddr" {
            return Ok(MEMORY_SIZE as i32);
        }
        if text.is_empty() || text.starts_with(|first: char| first.is_ascii_digit() || first == '-') {
            return Err(line.malformed());
        }
        self.labels
            .get(text)
            .map(|address| *address as i32)
            .ok_or_else(|| VmError::UndefinedLabel {
                line: line.number,
                label: text.to_string(),
            })
    }
}

//! Code generation with one activation record per call.
//!
//! `r14` points at the bottom of the active record and records grow down
//! from `topaddr`. A callable scope with frame size `S` has a record of
//! `S + 8` bytes: its variables at their layout offsets, the return value at
//! `S` and the return address at `S + 4`.

use crate::ast::{Node, NodeKind};
use crate::backend::Backend;
use crate::backend::asm::{self, Assembly, Section};
use crate::backend::lower::{self, Storage};
use crate::error::{CompileError, CompileResult};
use crate::semantic::symbol_table::{EntryId, FuncEntry, SymbolTable};

/// Return value and return address slots on top of the frame.
pub const LINKAGE_SIZE: u32 = 8;

pub struct StackBackend;

impl Backend for StackBackend {
    fn name(&self) -> &'static str {
        "stack"
    }

    fn generate(&self, program: &Node, table: &SymbolTable) -> CompileResult<String> {
        lower::lower(self, program, table)
    }
}

fn frame_size(func: &FuncEntry) -> CompileResult<u32> {
    func.frame_size
        .ok_or_else(|| CompileError::MissingAttribute {
            kind: NodeKind::FuncDef,
            data: func.name.clone(),
            attribute: "frame size",
        })
}

/// Size of one activation record of `func`.
pub fn record_size(func: &FuncEntry) -> CompileResult<u32> {
    Ok(frame_size(func)? + LINKAGE_SIZE)
}

impl Storage for StackBackend {
    fn slot(&self, table: &SymbolTable, frame: &FuncEntry, id: EntryId) -> CompileResult<String> {
        let entry = table.entry(id);
        let var = entry.as_var().ok_or_else(|| CompileError::NotAVariable {
            name: entry.name().to_string(),
        })?;
        if id.scope != frame.local_scope {
            return Err(CompileError::NonLocalVariable {
                name: var.name.clone(),
                scope: frame.name.clone(),
            });
        }
        let offset = var.offset.ok_or_else(|| CompileError::MissingAttribute {
            kind: NodeKind::VarDecl,
            data: var.name.clone(),
            attribute: "offset",
        })?;
        Ok(format!("{offset}(r14)"))
    }

    fn start(&self, code: &mut Section, program: &FuncEntry) -> CompileResult<()> {
        code.op("subi", format_args!("r14,r14,{}", record_size(program)?));
        Ok(())
    }

    fn declare(&self, _asm: &mut Assembly, _table: &SymbolTable, _id: EntryId) -> CompileResult<()> {
        Ok(())
    }

    fn enter(&self, asm: &mut Assembly, func: &FuncEntry) -> CompileResult<()> {
        let link = frame_size(func)? + 4;
        asm.routines.labeled(
            &asm::routine_label(&func.name),
            "subi",
            format_args!("r14,r14,{}", record_size(func)?),
        );
        asm.routines.op("sw", format_args!("{link}(r14),r15"));
        Ok(())
    }

    fn leave(
        &self,
        code: &mut Section,
        func: &FuncEntry,
        value: Option<&str>,
    ) -> CompileResult<()> {
        let size = frame_size(func)?;
        if let Some(value) = value {
            code.op("lw", format_args!("r1,{value}"));
            code.op("sw", format_args!("{size}(r14),r1"));
        }
        code.op("lw", format_args!("r15,{}(r14)", size + 4));
        code.op("addi", format_args!("r14,r14,{}", size + LINKAGE_SIZE));
        code.op("jr", "r15");
        Ok(())
    }

    fn call(
        &self,
        code: &mut Section,
        _table: &SymbolTable,
        callee: &FuncEntry,
        args: &[String],
        result: &str,
    ) -> CompileResult<()> {
        let record = i64::from(record_size(callee)?);
        for (param, arg) in callee.parameters.iter().zip(args) {
            let offset = param.offset.ok_or_else(|| CompileError::MissingAttribute {
                kind: NodeKind::VarDecl,
                data: param.name.clone(),
                attribute: "offset",
            })?;
            code.op("lw", format_args!("r1,{arg}"));
            code.op("sw", format_args!("{}(r14),r1", i64::from(offset) - record));
        }
        code.op("jl", format_args!("r15,{}", asm::routine_label(&callee.name)));
        // The callee's return slot sits just below the restored frame.
        code.op("lw", format_args!("r1,-{LINKAGE_SIZE}(r14)"));
        code.op("sw", format_args!("{result},r1"));
        Ok(())
    }
}

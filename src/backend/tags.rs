//! Code generation with one global label per variable.
//!
//! Every variable owns a `res` block for the whole run, so storage cannot be
//! shared between activations and a function called while it is already
//! active overwrites its own locals and its single `link_<name>` slot. Recursive
//! programs are therefore not supported by this backend.

use crate::ast::Node;
use crate::backend::Backend;
use crate::backend::asm::{self, Assembly, Section};
use crate::backend::lower::{self, Storage};
use crate::error::{CompileError, CompileResult};
use crate::semantic::layout;
use crate::semantic::symbol_table::{EntryId, FuncEntry, SymbolTable};

pub struct TagBackend;

impl Backend for TagBackend {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn generate(&self, program: &Node, table: &SymbolTable) -> CompileResult<String> {
        lower::lower(self, program, table)
    }
}

/// Label of variable `id`: temporaries keep their `tN` name, declared
/// variables become `v<len>_<scope>_<name>`.
pub fn tag(table: &SymbolTable, id: EntryId) -> CompileResult<String> {
    let entry = table.entry(id);
    let var = entry.as_var().ok_or_else(|| CompileError::NotAVariable {
        name: entry.name().to_string(),
    })?;
    if var.kind.is_generated() {
        Ok(var.name.clone())
    } else {
        let scope = &table.scope(id.scope).name;
        Ok(format!("v{}_{scope}_{}", scope.len(), var.name))
    }
}

fn return_tag(func: &FuncEntry) -> String {
    format!("ret_{}", func.name)
}

fn link_tag(func: &FuncEntry) -> String {
    format!("link_{}", func.name)
}

fn var_size(table: &SymbolTable, id: EntryId) -> CompileResult<u32> {
    let entry = table.entry(id);
    let var = entry.as_var().ok_or_else(|| CompileError::NotAVariable {
        name: entry.name().to_string(),
    })?;
    var.size().ok_or_else(|| CompileError::FrameTooLarge {
        name: var.name.clone(),
        scope: table.scope(id.scope).name.clone(),
    })
}

impl Storage for TagBackend {
    fn slot(&self, table: &SymbolTable, _frame: &FuncEntry, id: EntryId) -> CompileResult<String> {
        Ok(format!("{}(r0)", tag(table, id)?))
    }

    fn start(&self, _code: &mut Section, _program: &FuncEntry) -> CompileResult<()> {
        Ok(())
    }

    fn declare(&self, asm: &mut Assembly, table: &SymbolTable, id: EntryId) -> CompileResult<()> {
        asm.data.reserve(&tag(table, id)?, var_size(table, id)?);
        Ok(())
    }

    fn enter(&self, asm: &mut Assembly, func: &FuncEntry) -> CompileResult<()> {
        let link = link_tag(func);
        asm.routines.labeled(
            &asm::routine_label(&func.name),
            "sw",
            format_args!("{link}(r0),r15"),
        );
        asm.data
            .reserve(&return_tag(func), layout::scalar_size(func.return_type));
        asm.data.reserve(&link, layout::WORD_SIZE);
        Ok(())
    }

    fn leave(
        &self,
        code: &mut Section,
        func: &FuncEntry,
        value: Option<&str>,
    ) -> CompileResult<()> {
        if let Some(value) = value {
            code.op("lw", format_args!("r1,{value}"));
            code.op("sw", format_args!("{}(r0),r1", return_tag(func)));
        }
        code.op("lw", format_args!("r15,{}(r0)", link_tag(func)));
        code.op("jr", "r15");
        Ok(())
    }

    fn call(
        &self,
        code: &mut Section,
        table: &SymbolTable,
        callee: &FuncEntry,
        args: &[String],
        result: &str,
    ) -> CompileResult<()> {
        for (index, arg) in args.iter().enumerate() {
            let param = tag(
                table,
                EntryId {
                    scope: callee.local_scope,
                    index,
                },
            )?;
            code.op("lw", format_args!("r1,{arg}"));
            code.op("sw", format_args!("{param}(r0),r1"));
        }
        code.op("jl", format_args!("r15,{}", asm::routine_label(&callee.name)));
        code.op("lw", format_args!("r1,{}(r0)", return_tag(callee)));
        code.op("sw", format_args!("{result},r1"));
        Ok(())
    }
}

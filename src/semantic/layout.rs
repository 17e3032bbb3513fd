//! Memory layout: byte offsets for variables and frame sizes for scopes.
//!
//! Offsets are a running sum over a scope's own variables, in insertion
//! order. A scope's frame size covers only what it declares directly; nested
//! function and class scopes are sized on their own.

use log::debug;

use crate::ast::{Node, NodeKind, Type};
use crate::error::{CompileError, CompileResult};
use crate::semantic::symbol_table::{Entry, ScopeId, SymbolTable};

pub const INT_SIZE: u32 = 4;
pub const FLOAT_SIZE: u32 = 8;
/// Slot width for anything without a natural size (`void` results and
/// error-typed temporaries), so that every entry owns at least one word.
pub const WORD_SIZE: u32 = 4;

pub fn scalar_size(ty: Type) -> u32 {
    match ty {
        Type::Int => INT_SIZE,
        Type::Float => FLOAT_SIZE,
        Type::Void | Type::Error => WORD_SIZE,
    }
}

/// Assigns offsets and frame sizes to every scope reachable from `program`.
///
/// Running it again over an already laid-out table changes nothing.
pub fn compute_layout(program: &Node, table: &mut SymbolTable) -> CompileResult<()> {
    LayoutPass { table }.visit(program)
}

struct LayoutPass<'a> {
    table: &'a mut SymbolTable,
}

/// Frame information copied from a function's local scope onto its entry.
struct Signature {
    frame_size: Option<u32>,
    parameter_offsets: Vec<Option<u32>>,
}

impl LayoutPass<'_> {
    fn visit(&mut self, node: &Node) -> CompileResult<()> {
        // Children first, so nested scopes are sized before the scope that
        // holds their function entries.
        for child in &node.children {
            self.visit(child)?;
        }
        match node.kind {
            NodeKind::Program | NodeKind::ProgramBlock | NodeKind::Class | NodeKind::FuncDef => {
                self.lay_out(node.scope_id()?)?;
            }
            NodeKind::ClassList
            | NodeKind::FuncDefList
            | NodeKind::ParamList
            | NodeKind::StatBlock
            | NodeKind::VarDecl
            | NodeKind::DimList
            | NodeKind::Dim
            | NodeKind::Type
            | NodeKind::Id
            | NodeKind::Num
            | NodeKind::AddOp
            | NodeKind::MultOp
            | NodeKind::AssignStat
            | NodeKind::PutStat
            | NodeKind::ReturnStat
            | NodeKind::FuncCall => {}
        }
        Ok(())
    }

    fn lay_out(&mut self, id: ScopeId) -> CompileResult<()> {
        let signatures: Vec<Option<Signature>> = self
            .table
            .scope(id)
            .entries()
            .iter()
            .map(|entry| match entry {
                Entry::Func(func) => Some(self.signature(func.local_scope, func.parameters.len())),
                Entry::Var(_) | Entry::Class(_) => None,
            })
            .collect();

        let scope = self.table.scope_mut(id);
        let scope_name = scope.name.clone();
        let mut offset: u32 = 0;
        for (entry, signature) in scope.entries_mut().iter_mut().zip(signatures) {
            match entry {
                Entry::Var(var) => {
                    var.offset = Some(offset);
                    offset = var
                        .size()
                        .and_then(|size| offset.checked_add(size))
                        .ok_or_else(|| CompileError::FrameTooLarge {
                            name: var.name.clone(),
                            scope: scope_name.clone(),
                        })?;
                }
                Entry::Func(func) => {
                    if let Some(signature) = signature {
                        func.frame_size = signature.frame_size;
                        for (param, param_offset) in
                            func.parameters.iter_mut().zip(signature.parameter_offsets)
                        {
                            param.offset = param_offset;
                        }
                    }
                }
                Entry::Class(_) => {}
            }
        }
        scope.frame_size = Some(offset);
        debug!("Laid out scope {} with frame size {offset}", scope.name);
        Ok(())
    }

    fn signature(&self, local: ScopeId, parameter_count: usize) -> Signature {
        let scope = self.table.scope(local);
        Signature {
            frame_size: scope.frame_size,
            parameter_offsets: scope
                .entries()
                .iter()
                .take(parameter_count)
                .map(|entry| entry.as_var().and_then(|var| var.offset))
                .collect(),
        }
    }
}

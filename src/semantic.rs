//! Semantic passes: type check, symbol table construction and memory layout.

pub mod builder;
pub mod layout;
pub mod symbol_table;
pub mod type_check;

use log::debug;

use crate::ast::Node;
use crate::error::CompileResult;
use symbol_table::SymbolTable;
use type_check::TypeDiagnostic;

/// Everything the code generators need besides the annotated tree.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub table: SymbolTable,
    pub diagnostics: Vec<TypeDiagnostic>,
}

/// Runs the semantic passes in order over `program`, annotating it in place.
///
/// Type mismatches do not stop analysis; they are returned in
/// [`Analysis::diagnostics`]. Structural problems in the tree do.
pub fn analyze(program: &mut Node) -> CompileResult<Analysis> {
    let diagnostics = type_check::check(program)?;
    debug!("Type check produced {} diagnostics", diagnostics.len());

    let mut table = builder::build(program)?;
    layout::compute_layout(program, &mut table)?;
    Ok(Analysis { table, diagnostics })
}

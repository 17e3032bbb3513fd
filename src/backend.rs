use anyhow::Result;

use crate::ast::Node;
use crate::error::CompileResult;
use crate::semantic::symbol_table::SymbolTable;
use crate::vm;

pub mod asm;
mod lower;
pub mod stack;
pub mod tags;

pub use stack::StackBackend;
pub use tags::TagBackend;

/// Common interface implemented by each code generator.
///
/// `generate` turns an analyzed tree into Moon assembly, while `run` offers
/// the convenience path of generating and executing it on the simulator.
pub trait Backend {
    fn name(&self) -> &'static str;
    fn generate(&self, program: &Node, table: &SymbolTable) -> CompileResult<String>;

    fn run(&self, program: &Node, table: &SymbolTable) -> Result<String> {
        let code = self.generate(program, table)?;
        Ok(vm::run(&code)?)
    }
}

pub fn backends() -> Vec<Box<dyn Backend>> {
    vec![Box::new(TagBackend), Box::new(StackBackend)]
}

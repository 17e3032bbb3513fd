pub mod ast;
pub mod backend;
pub mod compiler;
pub mod error;
pub mod semantic;
pub mod vm;

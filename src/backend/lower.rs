//! Tree walk shared by both code generators.
//!
//! Every value-producing node already owns a temporary from the symbol table
//! pass, so lowering is a single post-order walk: children first, then one
//! short instruction sequence that reads the children's slots and writes the
//! node's own. Backends differ only in how a slot is addressed and how calls
//! are linked, which is what [`Storage`] abstracts.

use log::debug;

use crate::ast::{Node, NodeKind};
use crate::backend::asm::{self, Assembly, Out, Section};
use crate::error::{CompileError, CompileResult};
use crate::semantic::symbol_table::{Entry, EntryId, FuncEntry, SymbolTable};

pub(super) trait Storage {
    /// Operand text addressing variable `id` from code running in `frame`.
    fn slot(&self, table: &SymbolTable, frame: &FuncEntry, id: EntryId) -> CompileResult<String>;

    /// Runs once, right before the program body.
    fn start(&self, code: &mut Section, program: &FuncEntry) -> CompileResult<()>;

    /// Called for every declaration and temporary inside a callable scope.
    fn declare(&self, asm: &mut Assembly, table: &SymbolTable, id: EntryId) -> CompileResult<()>;

    /// Function prologue. Its first instruction carries the function label.
    fn enter(&self, asm: &mut Assembly, func: &FuncEntry) -> CompileResult<()>;

    /// Stores `value` as the result, if given, and returns to the caller.
    fn leave(&self, code: &mut Section, func: &FuncEntry, value: Option<&str>)
    -> CompileResult<()>;

    /// Passes the already evaluated `args`, transfers control to `callee` and
    /// copies its result into `result`.
    fn call(
        &self,
        code: &mut Section,
        table: &SymbolTable,
        callee: &FuncEntry,
        args: &[String],
        result: &str,
    ) -> CompileResult<()>;
}

/// Where the walk currently is.
#[derive(Clone, Copy)]
enum Context<'t> {
    /// Global lists and class bodies, which hold no code.
    Static,
    Callable { func: &'t FuncEntry, out: Out },
}

pub(super) fn lower<S: Storage>(
    storage: &S,
    program: &Node,
    table: &SymbolTable,
) -> CompileResult<String> {
    if program.kind != NodeKind::Program {
        return Err(CompileError::UnexpectedNode { kind: program.kind });
    }

    let mut lowering = Lowering {
        storage,
        table,
        asm: Assembly::default(),
    };
    lowering.asm.main.bare("entry");
    lowering.asm.main.op("addi", "r14,r0,topaddr");
    lowering.children(program, Context::Static)?;
    Ok(lowering.asm.to_string())
}

struct Lowering<'t, S> {
    storage: &'t S,
    table: &'t SymbolTable,
    asm: Assembly,
}

impl<'t, S: Storage> Lowering<'t, S> {
    fn children(&mut self, node: &Node, context: Context<'t>) -> CompileResult<()> {
        for child in &node.children {
            self.visit(child, context)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &Node, context: Context<'t>) -> CompileResult<()> {
        match node.kind {
            NodeKind::Program => Err(CompileError::UnexpectedNode { kind: node.kind }),
            NodeKind::ClassList
            | NodeKind::FuncDefList
            | NodeKind::ParamList
            | NodeKind::StatBlock
            | NodeKind::DimList => self.children(node, context),
            // Members are laid out but get no storage of their own.
            NodeKind::Class => self.children(node, Context::Static),
            NodeKind::Dim | NodeKind::Type | NodeKind::Id => Ok(()),
            NodeKind::ProgramBlock => {
                let func = self.owner(node)?;
                self.storage.start(&mut self.asm.main, func)?;
                self.children(
                    node,
                    Context::Callable {
                        func,
                        out: Out::Main,
                    },
                )
            }
            NodeKind::FuncDef => {
                let func = self.owner(node)?;
                debug!("Lowering function {}", func.name);
                self.asm
                    .routines
                    .comment(format_args!("processing: function definition {}", func.name));
                self.storage.enter(&mut self.asm, func)?;
                self.children(
                    node,
                    Context::Callable {
                        func,
                        out: Out::Routines,
                    },
                )?;
                self.storage.leave(&mut self.asm.routines, func, None)
            }
            NodeKind::VarDecl => match context {
                Context::Callable { .. } => {
                    self.storage.declare(&mut self.asm, self.table, node.entry_id()?)
                }
                Context::Static => Ok(()),
            },
            NodeKind::Num => {
                let (func, out) = self.callable(node, context)?;
                let target = self.temporary(node, func)?;
                let value = asm::immediate(&node.data)?;

                let code = self.asm.code(out);
                code.comment(format_args!(
                    "processing: {} := {}",
                    node.target_name()?,
                    node.data
                ));
                code.op("addi", format_args!("r1,r0,{value}"));
                code.op("sw", format_args!("{target},r1"));
                Ok(())
            }
            NodeKind::AddOp | NodeKind::MultOp => {
                node.expect_arity(2)?;
                self.children(node, context)?;
                let (func, out) = self.callable(node, context)?;
                let (left, right) = (node.child(0)?, node.child(1)?);
                let left_slot = self.value(left, func)?;
                let right_slot = self.value(right, func)?;
                let mnemonic = asm::mnemonic(&node.data)?;
                let target = self.temporary(node, func)?;

                let code = self.asm.code(out);
                code.comment(format_args!(
                    "processing: {} := {} {} {}",
                    node.target_name()?,
                    left.target_name()?,
                    node.data,
                    right.target_name()?
                ));
                code.op("lw", format_args!("r1,{left_slot}"));
                code.op("lw", format_args!("r2,{right_slot}"));
                code.op(mnemonic, "r3,r1,r2");
                code.op("sw", format_args!("{target},r3"));
                Ok(())
            }
            NodeKind::AssignStat => {
                node.expect_arity(2)?;
                self.children(node, context)?;
                let (func, out) = self.callable(node, context)?;
                let (target, value) = (node.child(0)?, node.child(1)?);
                let target_slot = self.value(target, func)?;
                let value_slot = self.value(value, func)?;

                let code = self.asm.code(out);
                code.comment(format_args!(
                    "processing: {} := {}",
                    target.target_name()?,
                    value.target_name()?
                ));
                code.op("lw", format_args!("r1,{value_slot}"));
                code.op("sw", format_args!("{target_slot},r1"));
                Ok(())
            }
            NodeKind::PutStat => {
                node.expect_arity(1)?;
                self.children(node, context)?;
                let (func, out) = self.callable(node, context)?;
                let value = node.child(0)?;
                let slot = self.value(value, func)?;

                let code = self.asm.code(out);
                code.comment(format_args!("processing: put({})", value.target_name()?));
                asm::put(code, &slot);
                Ok(())
            }
            NodeKind::ReturnStat => {
                node.expect_arity(1)?;
                self.children(node, context)?;
                let Context::Callable {
                    func,
                    out: Out::Routines,
                } = context
                else {
                    return Err(CompileError::ReturnOutsideFunction);
                };
                let value = node.child(0)?;
                let slot = self.value(value, func)?;

                let code = &mut self.asm.routines;
                code.comment(format_args!("processing: return({})", value.target_name()?));
                self.storage.leave(code, func, Some(&slot))
            }
            NodeKind::FuncCall => {
                node.expect_arity(2)?;
                let callee = self.function(node.child_of_kind(0, NodeKind::Id)?)?;
                let args = node.child_of_kind(1, NodeKind::ParamList)?;
                self.children(args, context)?;
                let (func, out) = self.callable(node, context)?;

                if args.children.len() != callee.parameters.len() {
                    return Err(CompileError::FunctionArityMismatch {
                        name: callee.name.clone(),
                        expected: callee.parameters.len(),
                        found: args.children.len(),
                    });
                }
                let slots = args
                    .children
                    .iter()
                    .map(|arg| self.value(arg, func))
                    .collect::<CompileResult<Vec<_>>>()?;
                let names = args
                    .children
                    .iter()
                    .map(Node::target_name)
                    .collect::<CompileResult<Vec<_>>>()?;
                let target = self.temporary(node, func)?;

                let code = self.asm.code(out);
                code.comment(format_args!(
                    "processing: {} := {}({})",
                    node.target_name()?,
                    callee.name,
                    names.join(", ")
                ));
                self.storage
                    .call(code, self.table, callee, &slots, &target)
            }
        }
    }

    fn callable(
        &self,
        node: &Node,
        context: Context<'t>,
    ) -> CompileResult<(&'t FuncEntry, Out)> {
        match context {
            Context::Callable { func, out } => Ok((func, out)),
            Context::Static => Err(CompileError::UnexpectedNode { kind: node.kind }),
        }
    }

    /// The function entry of a `FuncDef` or `ProgramBlock` node.
    fn owner(&self, node: &Node) -> CompileResult<&'t FuncEntry> {
        let table = self.table;
        table
            .owner(node.scope_id()?)
            .ok_or_else(|| node.missing("function entry"))
    }

    fn function(&self, callee: &Node) -> CompileResult<&'t FuncEntry> {
        let table = self.table;
        let id = self.resolve(callee)?;
        table.entry(id).as_func().ok_or_else(|| CompileError::NotAFunction {
            name: callee.data.clone(),
        })
    }

    fn resolve(&self, id: &Node) -> CompileResult<EntryId> {
        let scope = id.scope_id()?;
        self.table
            .lookup(scope, &id.data)
            .ok_or_else(|| CompileError::UndeclaredIdentifier {
                name: id.data.clone(),
                scope: self.table.scope(scope).name.clone(),
            })
    }

    /// Slot holding the value of an expression node.
    fn value(&self, node: &Node, func: &FuncEntry) -> CompileResult<String> {
        let id = match node.kind {
            NodeKind::Id => {
                let id = self.resolve(node)?;
                match self.table.entry(id) {
                    Entry::Var(_) => id,
                    Entry::Func(_) | Entry::Class(_) => {
                        return Err(CompileError::NotAVariable {
                            name: node.data.clone(),
                        });
                    }
                }
            }
            _ => node.entry_id()?,
        };
        self.storage.slot(self.table, func, id)
    }

    /// Declares the node's own temporary and returns its slot.
    fn temporary(&mut self, node: &Node, func: &FuncEntry) -> CompileResult<String> {
        let id = node.entry_id()?;
        self.storage.declare(&mut self.asm, self.table, id)?;
        self.storage.slot(self.table, func, id)
    }
}

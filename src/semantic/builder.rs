//! Symbol table construction.
//!
//! Walks the type-checked tree once, creating a scope for the program block,
//! every class and every function, inserting declarations and allocating a
//! temporary for every value-producing node. Each node is stamped with the
//! scope it lives in; scope-creating nodes get their own local scope.

use log::debug;

use crate::ast::{Node, NodeKind, Type};
use crate::error::{CompileError, CompileResult};
use crate::semantic::symbol_table::{
    ClassEntry, Entry, FuncEntry, ScopeId, SymbolTable, VarEntry, VarKind,
};

/// Builds the symbol table for `program`, which must be a `Program` node.
pub fn build(program: &mut Node) -> CompileResult<SymbolTable> {
    if program.kind != NodeKind::Program {
        return Err(CompileError::UnexpectedNode { kind: program.kind });
    }

    let mut builder = Builder {
        table: SymbolTable::new(),
        temps: TempNames::default(),
    };
    builder.program(program)?;
    debug!(
        "Built {} scopes with {} temporaries",
        builder.table.scope_ids().count(),
        builder.temps.issued
    );
    Ok(builder.table)
}

/// Issues `t1`, `t2`, ... for one compilation.
#[derive(Default)]
struct TempNames {
    issued: u32,
}

impl TempNames {
    fn next(&mut self) -> String {
        self.issued += 1;
        format!("t{}", self.issued)
    }
}

struct Builder {
    table: SymbolTable,
    temps: TempNames,
}

impl Builder {
    fn program(&mut self, node: &mut Node) -> CompileResult<()> {
        node.expect_arity(3)?;
        node.child_of_kind(0, NodeKind::ClassList)?;
        node.child_of_kind(1, NodeKind::FuncDefList)?;
        node.child_of_kind(2, NodeKind::ProgramBlock)?;

        node.scope = Some(ScopeId::GLOBAL);
        self.children(node, ScopeId::GLOBAL)
    }

    fn children(&mut self, node: &mut Node, scope: ScopeId) -> CompileResult<()> {
        for child in &mut node.children {
            self.visit(child, scope)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &mut Node, scope: ScopeId) -> CompileResult<()> {
        node.scope = Some(scope);
        match node.kind {
            NodeKind::Program => return Err(CompileError::UnexpectedNode { kind: node.kind }),
            NodeKind::ProgramBlock => {
                let local = self.table.add_scope(scope, "program");
                self.table.insert(
                    scope,
                    Entry::Func(FuncEntry {
                        return_type: Type::Void,
                        name: "program".to_string(),
                        parameters: Vec::new(),
                        local_scope: local,
                        frame_size: None,
                    }),
                );
                node.scope = Some(local);
                self.children(node, local)?;
            }
            NodeKind::Class => {
                let name = node.child_of_kind(0, NodeKind::Id)?.data.clone();
                let local = self.table.add_scope(scope, &name);
                self.table.insert(
                    scope,
                    Entry::Class(ClassEntry {
                        name,
                        local_scope: local,
                    }),
                );
                node.scope = Some(local);
                self.children(node, local)?;
            }
            NodeKind::FuncDef => {
                node.expect_arity(4)?;
                let name = node.child_of_kind(1, NodeKind::Id)?.data.clone();
                let return_type = node.resolved_type()?;
                let parameters = node
                    .child_of_kind(2, NodeKind::ParamList)?
                    .children
                    .iter()
                    .map(declared_var)
                    .collect::<CompileResult<Vec<_>>>()?;
                node.child_of_kind(3, NodeKind::StatBlock)?;

                let local = self.table.add_scope(scope, &name);
                debug!("Function {name} takes {} parameters", parameters.len());
                self.table.insert(
                    scope,
                    Entry::Func(FuncEntry {
                        return_type,
                        name,
                        parameters,
                        local_scope: local,
                        frame_size: None,
                    }),
                );
                node.scope = Some(local);
                self.children(node, local)?;
            }
            NodeKind::VarDecl => {
                self.children(node, scope)?;
                let entry = declared_var(node)?;
                node.symbol_entry = Some(self.table.insert(scope, Entry::Var(entry)));
            }
            NodeKind::AddOp | NodeKind::MultOp | NodeKind::Num | NodeKind::FuncCall => {
                self.children(node, scope)?;
                self.temporary(node, scope)?;
            }
            NodeKind::Id => {
                node.generated_name = Some(node.data.clone());
            }
            NodeKind::ClassList
            | NodeKind::FuncDefList
            | NodeKind::ParamList
            | NodeKind::StatBlock
            | NodeKind::DimList
            | NodeKind::Dim
            | NodeKind::Type
            | NodeKind::AssignStat
            | NodeKind::PutStat
            | NodeKind::ReturnStat => {
                self.children(node, scope)?;
            }
        }
        Ok(())
    }

    fn temporary(&mut self, node: &mut Node, scope: ScopeId) -> CompileResult<()> {
        let ty = node.resolved_type()?;
        let (kind, dims) = match node.kind {
            NodeKind::AddOp => (VarKind::Temporary, self.operand_dims(node.child(0)?, scope)),
            // A product is a single value whatever its operands are.
            NodeKind::MultOp => (VarKind::Temporary, Vec::new()),
            NodeKind::Num => (VarKind::Literal, Vec::new()),
            NodeKind::FuncCall => (VarKind::ReturnValue, Vec::new()),
            _ => return Err(CompileError::UnexpectedNode { kind: node.kind }),
        };

        let name = self.temps.next();
        let entry = VarEntry::new(kind, ty, name.clone(), dims);
        node.symbol_entry = Some(self.table.insert(scope, Entry::Var(entry)));
        node.generated_name = Some(name);
        Ok(())
    }

    fn operand_dims(&self, operand: &Node, scope: ScopeId) -> Vec<u32> {
        let entry = match operand.symbol_entry {
            Some(id) => Some(id),
            None if operand.kind == NodeKind::Id => self.table.lookup(scope, &operand.data),
            None => None,
        };
        entry
            .and_then(|id| self.table.entry(id).as_var())
            .map(|var| var.dims.clone())
            .unwrap_or_default()
    }
}

/// A `declared` entry from a `VarDecl` node: `[Type, Id, DimList?]`.
fn declared_var(decl: &Node) -> CompileResult<VarEntry> {
    if decl.kind != NodeKind::VarDecl {
        return Err(CompileError::UnexpectedNode { kind: decl.kind });
    }
    if !(2..=3).contains(&decl.children.len()) {
        return Err(CompileError::WrongArity {
            kind: decl.kind,
            expected: 3,
            found: decl.children.len(),
        });
    }

    let ty = decl.child_of_kind(0, NodeKind::Type)?.resolved_type()?;
    let name = &decl.child_of_kind(1, NodeKind::Id)?.data;
    let dims = match decl.children.get(2) {
        Some(_) => decl
            .child_of_kind(2, NodeKind::DimList)?
            .children
            .iter()
            .map(dimension)
            .collect::<CompileResult<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(VarEntry::new(VarKind::Declared, ty, name.as_str(), dims))
}

/// An array bound: a positive decimal integer.
fn dimension(dim: &Node) -> CompileResult<u32> {
    if dim.kind != NodeKind::Dim {
        return Err(CompileError::UnexpectedNode { kind: dim.kind });
    }
    dim.data
        .trim()
        .parse()
        .ok()
        .filter(|&bound: &u32| bound > 0)
        .ok_or_else(|| CompileError::InvalidDimension {
            text: dim.data.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self, Type};
    use crate::semantic::type_check;
    use pretty_assertions::assert_eq;

    fn built(mut tree: Node) -> (Node, SymbolTable) {
        type_check::check(&mut tree).expect("type check should succeed");
        let table = build(&mut tree).expect("symbol table should build");
        (tree, table)
    }

    fn names(table: &SymbolTable, scope: ScopeId) -> Vec<String> {
        table
            .scope(scope)
            .entries()
            .iter()
            .map(|entry| entry.name().to_string())
            .collect()
    }

    #[test]
    fn program_block_is_a_parameterless_function() {
        let (tree, table) = built(ast::program(
            vec![],
            vec![],
            vec![ast::var_decl("int", "a", &[])],
        ));

        let program = table
            .lookup_function(ScopeId::GLOBAL, "program")
            .expect("program entry");
        assert_eq!(program.return_type, Type::Void);
        assert!(program.parameters.is_empty());

        let block = &tree.children[2];
        assert_eq!(block.scope, Some(program.local_scope));
        assert_eq!(table.scope(program.local_scope).level, 1);
        assert_eq!(names(&table, program.local_scope), vec!["a"]);
        assert_eq!(tree.scope, Some(ScopeId::GLOBAL));
    }

    #[test]
    fn function_parameters_lead_its_scope() {
        let (tree, table) = built(ast::program(
            vec![],
            vec![ast::func_def(
                "int",
                "f",
                vec![
                    ast::var_decl("int", "p1", &[]),
                    ast::var_decl("int", "p2", &["3", "4"]),
                ],
                vec![
                    ast::var_decl("int", "x", &[]),
                    ast::ret(ast::id("p1", Type::Int)),
                ],
            )],
            vec![],
        ));

        let func = table.lookup_function(ScopeId::GLOBAL, "f").expect("f entry");
        assert_eq!(func.return_type, Type::Int);
        assert_eq!(func.parameters[1].dims, vec![3, 4]);
        assert_eq!(names(&table, func.local_scope), vec!["p1", "p2", "x"]);

        let ret_id = &tree.children[1].children[0].children[3].children[1].children[0];
        assert_eq!(ret_id.scope, Some(func.local_scope));
        assert_eq!(ret_id.generated_name.as_deref(), Some("p1"));
    }

    #[test]
    fn temporaries_are_numbered_across_scopes() {
        let (tree, table) = built(ast::program(
            vec![],
            vec![ast::func_def(
                "int",
                "f",
                vec![ast::var_decl("int", "p", &[])],
                vec![ast::ret(ast::add(
                    "+",
                    ast::id("p", Type::Int),
                    ast::num("1", Type::Int),
                ))],
            )],
            vec![
                ast::var_decl("int", "a", &[]),
                ast::assign(
                    ast::id("a", Type::Int),
                    ast::mult(
                        "*",
                        ast::call(ast::id("f", Type::Int), vec![ast::id("a", Type::Int)]),
                        ast::id("a", Type::Int),
                    ),
                ),
            ],
        ));

        let func = table.lookup_function(ScopeId::GLOBAL, "f").expect("f entry");
        assert_eq!(names(&table, func.local_scope), vec!["p", "t1", "t2"]);
        let program = table
            .lookup_function(ScopeId::GLOBAL, "program")
            .expect("program entry");
        assert_eq!(names(&table, program.local_scope), vec!["a", "t3", "t4"]);

        let kinds: Vec<_> = table
            .scope(program.local_scope)
            .entries()
            .iter()
            .filter_map(Entry::as_var)
            .map(|var| var.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![VarKind::Declared, VarKind::ReturnValue, VarKind::Temporary]
        );

        let product = &tree.children[2].children[1].children[1];
        assert_eq!(product.generated_name.as_deref(), Some("t4"));
        let entry = table.entry(product.entry_id().expect("product entry"));
        assert_eq!(entry.name(), "t4");
    }

    #[test]
    fn sum_inherits_left_operand_dimensions() {
        let (tree, table) = built(ast::program(
            vec![],
            vec![],
            vec![
                ast::var_decl("int", "v", &["4"]),
                ast::var_decl("int", "w", &["4"]),
                ast::assign(
                    ast::id("v", Type::Int),
                    ast::add("+", ast::id("v", Type::Int), ast::id("w", Type::Int)),
                ),
            ],
        ));

        let sum = &tree.children[2].children[2].children[1];
        let entry = table.entry(sum.entry_id().expect("sum entry"));
        assert_eq!(entry.as_var().map(|var| var.dims.clone()), Some(vec![4]));
    }

    #[test]
    fn class_members_live_in_class_scope() {
        let (_, table) = built(ast::program(
            vec![ast::class("point", vec![ast::var_decl("float", "x", &[])])],
            vec![],
            vec![],
        ));

        let id = table.lookup(ScopeId::GLOBAL, "point").expect("class entry");
        let Entry::Class(class) = table.entry(id) else {
            panic!("point should be a class entry");
        };
        assert_eq!(table.scope(class.local_scope).name, "point");
        assert_eq!(names(&table, class.local_scope), vec!["x"]);
    }

    #[test]
    fn non_numeric_dimension_is_fatal() {
        let mut tree = ast::program(vec![], vec![], vec![ast::var_decl("int", "a", &["n"])]);
        type_check::check(&mut tree).expect("type check should succeed");
        let error = build(&mut tree).expect_err("dimension must be numeric");
        assert_eq!(error.to_string(), "Invalid array dimension 'n'");
    }

    #[test]
    fn zero_dimension_is_fatal() {
        let mut tree = ast::program(vec![], vec![], vec![ast::var_decl("int", "a", &["4", "0"])]);
        type_check::check(&mut tree).expect("type check should succeed");
        let error = build(&mut tree).expect_err("dimension must be positive");
        assert_eq!(
            error,
            CompileError::InvalidDimension {
                text: "0".to_string()
            }
        );
    }

    #[test]
    fn root_must_be_program() {
        let mut tree = ast::put(ast::num("1", Type::Int));
        let error = build(&mut tree).expect_err("not a program");
        assert_eq!(error.to_string(), "PutStat node cannot appear here");
    }

    #[test]
    fn dump_lists_every_scope() {
        let (_, table) = built(ast::program(
            vec![],
            vec![],
            vec![
                ast::var_decl("int", "a", &[]),
                ast::put(ast::num("7", Type::Int)),
            ],
        ));

        let dump = table.render();
        assert!(dump.contains("| function  | program    | ():void"));
        assert!(dump.contains("    | var       | a          | int"));
        assert!(dump.contains("    | litval    | t1         | int"));
    }
}

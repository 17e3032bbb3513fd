//! Bottom-up type resolution.
//!
//! Types are compared nominally with no coercion. A mismatch types the node as
//! [`Type::Error`] and is recorded as a [`TypeDiagnostic`]; it never aborts
//! the pass. An operand that is already error-typed poisons its parent
//! silently, so one bad leaf yields one diagnostic rather than one per
//! enclosing expression.
//!
//! Besides operators and assignments, a `return` is checked against its
//! function's declared type and each call argument against its parameter.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::ast::{Node, NodeKind, Type};
use crate::error::CompileResult;

/// One side of a mismatch, captured when the diagnostic is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub text: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDiagnostic {
    pub kind: NodeKind,
    pub left: Operand,
    pub right: Operand,
}

impl fmt::Display for TypeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} type error: {}({}) and {}({})",
            self.kind, self.left.text, self.left.ty, self.right.text, self.right.ty
        )
    }
}

/// Resolves the type of every expression, statement and declaration node.
pub fn check(program: &mut Node) -> CompileResult<Vec<TypeDiagnostic>> {
    let mut checker = TypeChecker {
        signatures: signatures(program)?,
        ..TypeChecker::default()
    };
    checker.visit(program)?;
    Ok(checker.diagnostics)
}

/// The error log artifact: one line per diagnostic, empty when there are none.
pub fn render_diagnostics(diagnostics: &[TypeDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| format!("{diagnostic}\n"))
        .collect()
}

/// Source-like text for an expression, used to name operands in diagnostics.
pub fn operand_text(node: &Node) -> String {
    match node.kind {
        NodeKind::AddOp | NodeKind::MultOp | NodeKind::AssignStat => {
            let op = if node.kind == NodeKind::AssignStat {
                "="
            } else {
                node.data.as_str()
            };
            match node.children.as_slice() {
                [left, right] => format!("{} {op} {}", operand_text(left), operand_text(right)),
                _ => node.kind.to_string(),
            }
        }
        NodeKind::FuncCall => {
            let callee = node
                .children
                .first()
                .map_or_else(|| node.data.clone(), |id| id.data.clone());
            let args = node
                .children
                .get(1)
                .map(|params| {
                    params
                        .children
                        .iter()
                        .map(operand_text)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("{callee}({args})")
        }
        _ => node.data.clone(),
    }
}

/// Parameter names and declared types of every function, by function name.
///
/// Collected up front so a call may precede the definition it targets.
fn signatures(program: &Node) -> CompileResult<FxHashMap<String, Vec<Operand>>> {
    let mut signatures = FxHashMap::default();
    if program.kind != NodeKind::Program {
        return Ok(signatures);
    }
    let functions = program.child_of_kind(1, NodeKind::FuncDefList)?;
    for function in functions
        .children
        .iter()
        .filter(|node| node.kind == NodeKind::FuncDef)
    {
        let name = function.child_of_kind(1, NodeKind::Id)?.data.clone();
        let params = function
            .child_of_kind(2, NodeKind::ParamList)?
            .children
            .iter()
            .map(|decl| {
                Ok(Operand {
                    text: decl.child_of_kind(1, NodeKind::Id)?.data.clone(),
                    ty: Type::from_str(&decl.child_of_kind(0, NodeKind::Type)?.data)?,
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;
        signatures.insert(name, params);
    }
    Ok(signatures)
}

/// Records a diagnostic when `actual` does not have the `expected` type.
/// Error-typed sides were reported where they arose and are skipped.
fn expect_type(
    diagnostics: &mut Vec<TypeDiagnostic>,
    kind: NodeKind,
    expected: &Operand,
    actual: Operand,
) {
    if expected.ty == Type::Error || actual.ty == Type::Error || expected.ty == actual.ty {
        return;
    }
    diagnostics.push(TypeDiagnostic {
        kind,
        left: expected.clone(),
        right: actual,
    });
}

#[derive(Default)]
struct TypeChecker {
    diagnostics: Vec<TypeDiagnostic>,
    signatures: FxHashMap<String, Vec<Operand>>,
    /// Name and declared return type of the function being checked.
    function: Option<Operand>,
}

impl TypeChecker {
    fn visit(&mut self, node: &mut Node) -> CompileResult<()> {
        if node.kind != NodeKind::FuncDef {
            return self.resolve(node);
        }
        let declared = Type::from_str(&node.child_of_kind(0, NodeKind::Type)?.data)?;
        let id = node.child_of_kind(1, NodeKind::Id)?;
        let current = Operand {
            text: id.data.clone(),
            ty: id.ty.unwrap_or(declared),
        };
        let enclosing = self.function.replace(current);
        let result = self.resolve(node);
        self.function = enclosing;
        result
    }

    fn resolve(&mut self, node: &mut Node) -> CompileResult<()> {
        for child in &mut node.children {
            self.visit(child)?;
        }

        match node.kind {
            NodeKind::Type => {
                node.ty = Some(Type::from_str(&node.data)?);
            }
            NodeKind::Id | NodeKind::Num => {
                // Supplied with the tree; operators below read them.
            }
            NodeKind::AddOp | NodeKind::MultOp | NodeKind::AssignStat => {
                node.expect_arity(2)?;
                let ty = self.binary(node)?;
                node.ty = Some(ty);
            }
            NodeKind::FuncCall => {
                let callee = node.child_of_kind(0, NodeKind::Id)?;
                let args = node.child_of_kind(1, NodeKind::ParamList)?;
                let ty = callee.resolved_type()?;
                let name = callee.data.clone();
                // A count mismatch is fatal in code generation.
                if let Some(params) = self.signatures.get(&name)
                    && params.len() == args.children.len()
                {
                    for (param, arg) in params.iter().zip(&args.children) {
                        let actual = Operand {
                            text: operand_text(arg),
                            ty: arg.resolved_type()?,
                        };
                        expect_type(&mut self.diagnostics, NodeKind::FuncCall, param, actual);
                    }
                }
                node.ty = Some(ty);
                node.data = name;
            }
            NodeKind::FuncDef => {
                let declared = node.child_of_kind(0, NodeKind::Type)?.resolved_type()?;
                let id = node.child_of_kind(1, NodeKind::Id)?;
                let ty = id.ty.unwrap_or(declared);
                let name = id.data.clone();
                node.ty = Some(ty);
                node.data = name;
            }
            NodeKind::ReturnStat => {
                let value = node.child(0)?;
                // Outside a function body this is fatal in code generation.
                if let Some(function) = &self.function {
                    let actual = Operand {
                        text: operand_text(value),
                        ty: value.resolved_type()?,
                    };
                    expect_type(&mut self.diagnostics, NodeKind::ReturnStat, function, actual);
                }
            }
            NodeKind::Program
            | NodeKind::ClassList
            | NodeKind::Class
            | NodeKind::FuncDefList
            | NodeKind::ParamList
            | NodeKind::StatBlock
            | NodeKind::ProgramBlock
            | NodeKind::VarDecl
            | NodeKind::DimList
            | NodeKind::Dim
            | NodeKind::PutStat => {}
        }
        Ok(())
    }

    fn binary(&mut self, node: &Node) -> CompileResult<Type> {
        let left = node.child(0)?;
        let right = node.child(1)?;
        let left_ty = left.resolved_type()?;
        let right_ty = right.resolved_type()?;

        if left_ty == Type::Error || right_ty == Type::Error {
            return Ok(Type::Error);
        }
        if left_ty == right_ty {
            return Ok(left_ty);
        }

        self.diagnostics.push(TypeDiagnostic {
            kind: node.kind,
            left: Operand {
                text: operand_text(left),
                ty: left_ty,
            },
            right: Operand {
                text: operand_text(right),
                ty: right_ty,
            },
        });
        Ok(Type::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::error::CompileError;
    use pretty_assertions::assert_eq;

    #[test]
    fn matching_operands_keep_their_type() {
        let mut node = ast::add("+", ast::id("a", Type::Int), ast::id("b", Type::Int));
        let diagnostics = check(&mut node).expect("check should succeed");

        assert!(diagnostics.is_empty());
        assert_eq!(node.ty, Some(Type::Int));
    }

    #[test]
    fn mismatch_yields_error_type_and_one_diagnostic() {
        let mut node = ast::add("+", ast::id("a", Type::Int), ast::id("b", Type::Float));
        let diagnostics = check(&mut node).expect("check should succeed");

        assert_eq!(node.ty, Some(Type::Error));
        assert_eq!(
            render_diagnostics(&diagnostics),
            "AddOp type error: a(int) and b(float)\n"
        );
    }

    #[test]
    fn error_operand_does_not_cascade() {
        let mut node = ast::assign(
            ast::id("x", Type::Int),
            ast::mult(
                "*",
                ast::add("+", ast::id("a", Type::Int), ast::num("1.5", Type::Float)),
                ast::id("c", Type::Float),
            ),
        );
        let diagnostics = check(&mut node).expect("check should succeed");

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, NodeKind::AddOp);
        assert_eq!(diagnostics[0].right.text, "1.5");
        assert_eq!(node.ty, Some(Type::Error));
        assert_eq!(node.children[1].ty, Some(Type::Error));
    }

    #[test]
    fn assignment_mismatch_names_whole_expressions() {
        let mut node = ast::assign(
            ast::id("x", Type::Float),
            ast::mult("*", ast::id("a", Type::Int), ast::id("b", Type::Int)),
        );
        let diagnostics = check(&mut node).expect("check should succeed");

        assert_eq!(
            diagnostics[0].to_string(),
            "AssignStat type error: x(float) and a * b(int)"
        );
    }

    #[test]
    fn call_and_definition_adopt_their_identifier() {
        let mut tree = ast::program(
            vec![],
            vec![ast::func_def(
                "float",
                "f",
                vec![ast::var_decl("int", "p", &[])],
                vec![ast::ret(ast::id("p", Type::Int))],
            )],
            vec![ast::put(ast::call(
                ast::id("f", Type::Float),
                vec![ast::num("2", Type::Int)],
            ))],
        );
        check(&mut tree).expect("check should succeed");

        let func_def = &tree.children[1].children[0];
        assert_eq!(func_def.data, "f");
        assert_eq!(func_def.ty, Some(Type::Float));
        assert_eq!(func_def.children[0].ty, Some(Type::Float));

        let call = &tree.children[2].children[0].children[0];
        assert_eq!(call.data, "f");
        assert_eq!(call.ty, Some(Type::Float));
        assert_eq!(operand_text(call), "f(2)");
    }

    #[test]
    fn return_value_must_match_declared_type() {
        let mut tree = ast::program(
            vec![],
            vec![
                ast::func_def(
                    "int",
                    "f",
                    vec![ast::var_decl("float", "x", &[])],
                    vec![ast::ret(ast::id("x", Type::Float))],
                ),
                ast::func_def(
                    "float",
                    "g",
                    vec![ast::var_decl("float", "y", &[])],
                    vec![ast::ret(ast::id("y", Type::Float))],
                ),
            ],
            vec![],
        );
        let diagnostics = check(&mut tree).expect("check should succeed");

        assert_eq!(
            render_diagnostics(&diagnostics),
            "ReturnStat type error: f(int) and x(float)\n"
        );
    }

    #[test]
    fn arguments_must_match_parameter_types() {
        let mut tree = ast::program(
            vec![],
            vec![ast::func_def(
                "int",
                "f",
                vec![
                    ast::var_decl("int", "p", &[]),
                    ast::var_decl("float", "q", &[]),
                ],
                vec![ast::ret(ast::id("p", Type::Int))],
            )],
            vec![ast::put(ast::call(
                ast::id("f", Type::Int),
                vec![
                    ast::id("b", Type::Float),
                    ast::add("+", ast::id("c", Type::Float), ast::id("d", Type::Float)),
                ],
            ))],
        );
        let diagnostics = check(&mut tree).expect("check should succeed");

        assert_eq!(
            render_diagnostics(&diagnostics),
            "FuncCall type error: p(int) and b(float)\n"
        );
        let call = &tree.children[2].children[0].children[0];
        assert_eq!(call.ty, Some(Type::Int));
    }

    #[test]
    fn error_typed_argument_and_return_are_not_reported_again() {
        let mut tree = ast::program(
            vec![],
            vec![ast::func_def(
                "int",
                "f",
                vec![ast::var_decl("int", "p", &[])],
                vec![ast::ret(ast::add(
                    "+",
                    ast::id("p", Type::Int),
                    ast::num("1.5", Type::Float),
                ))],
            )],
            vec![ast::put(ast::call(
                ast::id("f", Type::Int),
                vec![ast::mult("*", ast::num("2", Type::Int), ast::id("z", Type::Float))],
            ))],
        );
        let diagnostics = check(&mut tree).expect("check should succeed");

        let kinds: Vec<NodeKind> = diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![NodeKind::AddOp, NodeKind::MultOp]);
    }

    #[test]
    fn call_with_wrong_arity_is_left_to_code_generation() {
        let mut tree = ast::program(
            vec![],
            vec![ast::func_def(
                "int",
                "f",
                vec![ast::var_decl("int", "p", &[])],
                vec![ast::ret(ast::id("p", Type::Int))],
            )],
            vec![ast::put(ast::call(
                ast::id("f", Type::Int),
                vec![ast::id("a", Type::Float), ast::id("b", Type::Float)],
            ))],
        );
        let diagnostics = check(&mut tree).expect("check should succeed");

        assert!(diagnostics.is_empty());
    }

    #[test]
    fn operand_without_type_is_fatal() {
        let mut node = ast::add(
            "+",
            Node::new(NodeKind::Id, "a", vec![]),
            ast::num("1", Type::Int),
        );
        let error = check(&mut node).expect_err("untyped identifier");
        assert_eq!(
            error,
            CompileError::MissingAttribute {
                kind: NodeKind::Id,
                data: "a".to_string(),
                attribute: "type",
            }
        );
    }
}

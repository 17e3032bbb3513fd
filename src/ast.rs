//! Syntax tree shared by every pass.
//!
//! The parser hands over a fully shaped tree; passes never change its shape,
//! they only fill in the attributes below. Nodes do not point at their parent:
//! a pass threads whatever context it needs (active scope, current function)
//! down the traversal as arguments.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{CompileError, CompileResult};
use crate::semantic::symbol_table::{EntryId, ScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum NodeKind {
    Program,
    ClassList,
    Class,
    FuncDefList,
    FuncDef,
    ParamList,
    StatBlock,
    ProgramBlock,
    VarDecl,
    DimList,
    Dim,
    Type,
    Id,
    Num,
    AddOp,
    MultOp,
    AssignStat,
    PutStat,
    ReturnStat,
    FuncCall,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Resolved semantic type of a node or symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Int,
    Float,
    Void,
    #[serde(rename = "typeerror")]
    Error,
}

impl Type {
    pub fn name(self) -> &'static str {
        match self {
            Type::Int => "int",
            Type::Float => "float",
            Type::Void => "void",
            Type::Error => "typeerror",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Type {
    type Err = CompileError;

    /// Parses type text written in source. `typeerror` is produced by the
    /// checker only and is rejected here.
    fn from_str(name: &str) -> CompileResult<Self> {
        match name {
            "int" => Ok(Type::Int),
            "float" => Ok(Type::Float),
            "void" => Ok(Type::Void),
            _ => Err(CompileError::UnknownType {
                name: name.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "type")]
    pub ty: Option<Type>,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(skip)]
    pub scope: Option<ScopeId>,
    #[serde(skip)]
    pub symbol_entry: Option<EntryId>,
    #[serde(skip)]
    pub generated_name: Option<String>,
}

impl Node {
    pub fn new(kind: NodeKind, data: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            kind,
            data: data.into(),
            ty: None,
            children,
            scope: None,
            symbol_entry: None,
            generated_name: None,
        }
    }

    pub fn with_type(mut self, ty: Type) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn child(&self, index: usize) -> CompileResult<&Node> {
        self.children
            .get(index)
            .ok_or_else(|| CompileError::MissingChild {
                kind: self.kind,
                index,
                found: self.children.len(),
            })
    }

    /// Like [`Node::child`], but also checks the child's kind.
    pub fn child_of_kind(&self, index: usize, expected: NodeKind) -> CompileResult<&Node> {
        let child = self.child(index)?;
        if child.kind != expected {
            return Err(CompileError::UnexpectedChild {
                parent: self.kind,
                index,
                expected,
                found: child.kind,
            });
        }
        Ok(child)
    }

    pub fn expect_arity(&self, arity: usize) -> CompileResult<()> {
        if self.children.len() != arity {
            return Err(CompileError::WrongArity {
                kind: self.kind,
                expected: arity,
                found: self.children.len(),
            });
        }
        Ok(())
    }

    pub fn resolved_type(&self) -> CompileResult<Type> {
        self.ty.ok_or_else(|| self.missing("type"))
    }

    pub fn scope_id(&self) -> CompileResult<ScopeId> {
        self.scope.ok_or_else(|| self.missing("scope"))
    }

    pub fn entry_id(&self) -> CompileResult<EntryId> {
        self.symbol_entry.ok_or_else(|| self.missing("symbol entry"))
    }

    pub fn target_name(&self) -> CompileResult<&str> {
        self.generated_name
            .as_deref()
            .ok_or_else(|| self.missing("generated name"))
    }

    pub(crate) fn missing(&self, attribute: &'static str) -> CompileError {
        CompileError::MissingAttribute {
            kind: self.kind,
            data: self.data.clone(),
            attribute,
        }
    }
}

// Builders used by tests, benches and anyone assembling trees in code.

pub fn program(classes: Vec<Node>, functions: Vec<Node>, block: Vec<Node>) -> Node {
    Node::new(
        NodeKind::Program,
        "",
        vec![
            Node::new(NodeKind::ClassList, "", classes),
            Node::new(NodeKind::FuncDefList, "", functions),
            Node::new(NodeKind::ProgramBlock, "", block),
        ],
    )
}

pub fn class(name: &str, members: Vec<Node>) -> Node {
    let mut children = vec![Node::new(NodeKind::Id, name, vec![])];
    children.extend(members);
    Node::new(NodeKind::Class, "", children)
}

pub fn func_def(return_type: &str, name: &str, params: Vec<Node>, body: Vec<Node>) -> Node {
    let ty = Type::from_str(return_type).unwrap_or(Type::Error);
    Node::new(
        NodeKind::FuncDef,
        "",
        vec![
            type_node(return_type),
            id(name, ty),
            Node::new(NodeKind::ParamList, "", params),
            Node::new(NodeKind::StatBlock, "", body),
        ],
    )
}

pub fn var_decl(ty: &str, name: &str, dims: &[&str]) -> Node {
    let dims = dims
        .iter()
        .map(|dim| Node::new(NodeKind::Dim, *dim, vec![]))
        .collect();
    Node::new(
        NodeKind::VarDecl,
        "",
        vec![
            type_node(ty),
            Node::new(NodeKind::Id, name, vec![]),
            Node::new(NodeKind::DimList, "", dims),
        ],
    )
}

pub fn type_node(name: &str) -> Node {
    Node::new(NodeKind::Type, name, vec![])
}

pub fn id(name: &str, ty: Type) -> Node {
    Node::new(NodeKind::Id, name, vec![]).with_type(ty)
}

pub fn num(literal: &str, ty: Type) -> Node {
    Node::new(NodeKind::Num, literal, vec![]).with_type(ty)
}

pub fn add(op: &str, left: Node, right: Node) -> Node {
    Node::new(NodeKind::AddOp, op, vec![left, right])
}

pub fn mult(op: &str, left: Node, right: Node) -> Node {
    Node::new(NodeKind::MultOp, op, vec![left, right])
}

pub fn assign(target: Node, value: Node) -> Node {
    Node::new(NodeKind::AssignStat, "", vec![target, value])
}

pub fn put(value: Node) -> Node {
    Node::new(NodeKind::PutStat, "", vec![value])
}

pub fn ret(value: Node) -> Node {
    Node::new(NodeKind::ReturnStat, "", vec![value])
}

pub fn call(callee: Node, args: Vec<Node>) -> Node {
    Node::new(
        NodeKind::FuncCall,
        "",
        vec![callee, Node::new(NodeKind::ParamList, "", args)],
    )
}

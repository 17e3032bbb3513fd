//! Nested scopes and their entries.
//!
//! All scopes live in one arena owned by [`SymbolTable`]; a scope refers to its
//! parent and a function/class entry refers to its local scope by [`ScopeId`].
//! Tree nodes hold the same ids, so nothing in the tree owns table data.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::ast::Type;
use crate::semantic::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

impl ScopeId {
    pub const GLOBAL: ScopeId = ScopeId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub scope: ScopeId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Declared,
    Temporary,
    Literal,
    ReturnValue,
}

impl VarKind {
    pub fn label(self) -> &'static str {
        match self {
            VarKind::Declared => "var",
            VarKind::Temporary => "tempvar",
            VarKind::Literal => "litval",
            VarKind::ReturnValue => "retval",
        }
    }

    /// Compiler-introduced storage, named `t1`, `t2`, ...
    pub fn is_generated(self) -> bool {
        !matches!(self, VarKind::Declared)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarEntry {
    pub kind: VarKind,
    pub ty: Type,
    pub name: String,
    pub dims: Vec<u32>,
    pub offset: Option<u32>,
}

impl VarEntry {
    pub fn new(kind: VarKind, ty: Type, name: impl Into<String>, dims: Vec<u32>) -> Self {
        Self {
            kind,
            ty,
            name: name.into(),
            dims,
            offset: None,
        }
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }

    /// `None` when the product does not fit in a `u32`.
    pub fn element_count(&self) -> Option<u32> {
        self.dims
            .iter()
            .try_fold(1u32, |count, &dim| count.checked_mul(dim))
    }

    pub fn size(&self) -> Option<u32> {
        self.element_count()?.checked_mul(layout::scalar_size(self.ty))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncEntry {
    pub return_type: Type,
    pub name: String,
    /// Copies of the parameter declarations, in order. The same declarations
    /// are also the first entries of `local_scope`.
    pub parameters: Vec<VarEntry>,
    pub local_scope: ScopeId,
    pub frame_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassEntry {
    pub name: String,
    pub local_scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Var(VarEntry),
    Func(FuncEntry),
    Class(ClassEntry),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Var(var) => &var.name,
            Entry::Func(func) => &func.name,
            Entry::Class(class) => &class.name,
        }
    }

    pub fn as_var(&self) -> Option<&VarEntry> {
        match self {
            Entry::Var(var) => Some(var),
            Entry::Func(_) | Entry::Class(_) => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncEntry> {
        match self {
            Entry::Func(func) => Some(func),
            Entry::Var(_) | Entry::Class(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub level: usize,
    pub name: String,
    pub parent: Option<ScopeId>,
    pub frame_size: Option<u32>,
    entries: Vec<Entry>,
    // Latest entry per name: a redeclaration in the same scope hides the
    // earlier one, exactly as an inner scope hides an outer one.
    by_name: FxHashMap<String, usize>,
}

impl Scope {
    fn new(level: usize, name: &str, parent: Option<ScopeId>) -> Self {
        Self {
            level,
            name: name.to_string(),
            parent,
            frame_size: None,
            entries: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    /// Creates a table holding only the global scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(0, "global", None)],
        }
    }

    pub fn add_scope(&mut self, parent: ScopeId, name: &str) -> ScopeId {
        let level = self.scope(parent).level + 1;
        self.scopes.push(Scope::new(level, name, Some(parent)));
        ScopeId(self.scopes.len() - 1)
    }

    pub fn insert(&mut self, scope: ScopeId, entry: Entry) -> EntryId {
        let target = &mut self.scopes[scope.0];
        let index = target.entries.len();
        // Temporaries are reached through the node that owns them, never by
        // name, so a user identifier spelled `t1` still resolves to itself.
        let generated = matches!(&entry, Entry::Var(var) if var.kind.is_generated());
        if !generated {
            target.by_name.insert(entry.name().to_string(), index);
        }
        target.entries.push(entry);
        EntryId { scope, index }
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub fn scope_ids(&self) -> impl Iterator<Item = ScopeId> + use<> {
        (0..self.scopes.len()).map(ScopeId)
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.scopes[id.scope.0].entries[id.index]
    }

    /// Searches `scope`, then its parents outward; the innermost match wins.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<EntryId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let candidate = self.scope(id);
            if let Some(index) = candidate.get(name) {
                return Some(EntryId { scope: id, index });
            }
            current = candidate.parent;
        }
        None
    }

    /// Looks up `name` and returns it only if it names a function.
    pub fn lookup_function(&self, scope: ScopeId, name: &str) -> Option<&FuncEntry> {
        self.lookup(scope, name)
            .and_then(|id| self.entry(id).as_func())
    }

    /// The function whose local scope is `scope`, if any.
    pub fn owner(&self, scope: ScopeId) -> Option<&FuncEntry> {
        let parent = self.scope(scope).parent?;
        self.scope(parent)
            .entries()
            .iter()
            .filter_map(Entry::as_func)
            .find(|func| func.local_scope == scope)
    }

    /// Textual dump of every scope, as produced after the symbol table pass.
    pub fn render(&self) -> String {
        Dump {
            table: self,
            with_layout: false,
        }
        .to_string()
    }

    /// Same dump, with offsets, sizes and frame sizes.
    pub fn render_with_layout(&self) -> String {
        Dump {
            table: self,
            with_layout: true,
        }
        .to_string()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

const RULE_WIDTH: usize = 60;

struct Dump<'a> {
    table: &'a SymbolTable,
    with_layout: bool,
}

impl Dump<'_> {
    fn scope(&self, f: &mut fmt::Formatter<'_>, id: ScopeId, depth: usize) -> fmt::Result {
        let scope = self.table.scope(id);
        let indent = "    ".repeat(depth);
        let rule = "=".repeat(RULE_WIDTH.saturating_sub(4 * depth));

        writeln!(f, "{indent}{rule}")?;
        write!(f, "{indent}| table: {} (level {})", scope.name, scope.level)?;
        if self.with_layout {
            write!(f, " | frame size: {}", optional(scope.frame_size))?;
        }
        writeln!(f)?;
        writeln!(f, "{indent}{rule}")?;

        for entry in scope.entries() {
            match entry {
                Entry::Var(var) => self.var(f, &indent, var)?,
                Entry::Func(func) => {
                    let params = func
                        .parameters
                        .iter()
                        .map(|param| format!("{}{}", param.ty, dims_suffix(&param.dims)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(
                        f,
                        "{indent}| {:<9} | {:<10} | ({params}):{}",
                        "function", func.name, func.return_type
                    )?;
                    if self.with_layout {
                        write!(f, " | frame size: {}", optional(func.frame_size))?;
                    }
                    writeln!(f)?;
                    self.scope(f, func.local_scope, depth + 1)?;
                }
                Entry::Class(class) => {
                    writeln!(f, "{indent}| {:<9} | {}", "class", class.name)?;
                    self.scope(f, class.local_scope, depth + 1)?;
                }
            }
        }
        writeln!(f, "{indent}{rule}")
    }

    fn var(&self, f: &mut fmt::Formatter<'_>, indent: &str, var: &VarEntry) -> fmt::Result {
        write!(
            f,
            "{indent}| {:<9} | {:<10} | {}{}",
            var.kind.label(),
            var.name,
            var.ty,
            dims_suffix(&var.dims)
        )?;
        if self.with_layout {
            write!(f, " | offset: {} | size: {}", optional(var.offset), optional(var.size()))?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.scope(f, ScopeId::GLOBAL, 0)
    }
}

fn dims_suffix(dims: &[u32]) -> String {
    dims.iter().map(|dim| format!("[{dim}]")).collect()
}

fn optional(value: Option<u32>) -> String {
    value.map_or_else(|| "-".to_string(), |value| value.to_string())
}

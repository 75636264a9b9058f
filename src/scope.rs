//! Resolution of which declarations are visible at a breakpoint line.

use crate::decl::VarDecl;
use crate::error::DebugError;
use crate::syntax::{self, FnNode, KernelTree};
use crate::types::TypeCatalog;

/// Answers scope queries against one scanned kernel tree.
pub struct ScopeResolver<'a> {
    tree: &'a KernelTree,
    catalog: &'a TypeCatalog,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(tree: &'a KernelTree, catalog: &'a TypeCatalog) -> Self {
        Self { tree, catalog }
    }

    /// Indices of the blocks enclosing `line`, outermost first. Blocks
    /// are stored in opening-brace order, so enclosing blocks come out
    /// widest first.
    pub fn enclosing_blocks(&self, line: u32) -> Vec<usize> {
        self.tree
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.contains_line(line))
            .map(|(i, _)| i)
            .collect()
    }

    /// The function whose body contains `line`.
    pub fn enclosing_function(&self, line: u32) -> Option<&FnNode> {
        self.tree
            .functions
            .iter()
            .find(|f| self.tree.blocks[f.body].contains_line(line))
    }

    /// All variable declarations visible at `line`: the direct-child
    /// declaration statements of every enclosing block whose own line is
    /// at or before `line`, outermost block first. An inner declaration
    /// shadows an outer one of the same name.
    pub fn declarations_in_scope(&self, line: u32) -> Result<Vec<VarDecl>, DebugError> {
        let blocks = self.enclosing_blocks(line);
        if blocks.is_empty() {
            return Err(DebugError::OutOfScope(line));
        }

        let mut decls: Vec<VarDecl> = Vec::new();
        for idx in blocks {
            for stmt in &self.tree.blocks[idx].stmts {
                if stmt.line > line {
                    continue;
                }
                for raw in syntax::split_declarators(&stmt.text, stmt.line) {
                    let var = match VarDecl::from_parts(&raw.name, &raw.full_type, self.catalog) {
                        Ok(var) => var,
                        // an unknown base without an explicit `struct`
                        // keyword is not a declaration at all, e.g.
                        // `return x` or `foo(a, b)` look-alikes
                        Err(DebugError::UndefinedStruct(_)) if !raw.has_struct_kw => continue,
                        Err(err) => return Err(err),
                    };
                    // `a * b;` parses as a pointer declarator; only keep
                    // pointers whose pointee is a real type
                    if var.pointer_rank > 0 && !self.catalog.is_value_type(&var.base_type) {
                        continue;
                    }
                    match decls.iter().position(|d| d.name == var.name) {
                        Some(pos) => decls[pos] = var,
                        None => decls.push(var),
                    }
                }
            }
        }
        Ok(decls)
    }
}

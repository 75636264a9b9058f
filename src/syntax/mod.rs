//! Structural view of a kernel source file.
//!
//! This fills the external-parser seat: the rest of the crate only sees
//! the types below. The built-in scanner is a brace matcher over
//! comment- and string-stripped text, not a C parser — it recovers
//! exactly what scope resolution and instrumentation need: lexical block
//! extents, the declaration statements that are direct children of each
//! block, struct definitions, and function heads with their annotations.

mod scanner;

pub use scanner::{scan, split_declarators};

/// The kernel-entry annotation on a function.
pub const KERNEL_ATTR: &str = "__kernel";

/// Structural parse of one kernel source file.
#[derive(Clone, Debug, Default)]
pub struct KernelTree {
    /// Struct definitions in source order.
    pub structs: Vec<StructDef>,
    /// Function declarations in source order.
    pub functions: Vec<FnNode>,
    /// Lexical blocks in source order (by opening brace). Struct bodies
    /// are not blocks.
    pub blocks: Vec<BlockNode>,
}

/// A raw struct definition: field declarators, unresolved.
#[derive(Clone, Debug)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<RawDecl>,
    pub line: u32,
}

/// A function head: name, leading `__`-annotations, and its body block.
#[derive(Clone, Debug)]
pub struct FnNode {
    pub name: String,
    pub attrs: Vec<String>,
    /// Index into [`KernelTree::blocks`].
    pub body: usize,
    pub line: u32,
}

/// A lexical block with 1-based line extent.
#[derive(Clone, Debug)]
pub struct BlockNode {
    pub start_line: u32,
    pub end_line: u32,
    /// Simple statements that are direct children of this block.
    pub stmts: Vec<StmtNode>,
}

impl BlockNode {
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// A simple (non-compound) statement: its text with comments blanked
/// and any initializer stripped off by the declarator splitter later.
#[derive(Clone, Debug)]
pub struct StmtNode {
    pub text: String,
    pub line: u32,
}

/// A declarator split out of a statement or struct field: variable name
/// plus the remaining type text (qualifiers, base type, `*`s, `[n]`s).
#[derive(Clone, Debug, PartialEq)]
pub struct RawDecl {
    pub name: String,
    pub full_type: String,
    /// The declarator spelled an explicit `struct` keyword.
    pub has_struct_kw: bool,
    pub line: u32,
}

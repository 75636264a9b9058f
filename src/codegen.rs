//! Instrumentation fragment generation and insertion.
//!
//! The emitted C prints one line per (thread, declaration) pair: the
//! variable name, a space-separated value token per word, then a
//! newline. The decoder in [`crate::value`] consumes the same layout by
//! walking the same resolved [`Shape`]s.

use crate::decl::{FieldDecl, Shape, StructDecl, VarDecl};
use crate::error::DebugError;
use crate::scope::ScopeResolver;
use crate::syntax::{KernelTree, KERNEL_ATTR};
use crate::types::{TypeCatalog, POINTER_TYPE};

/// Printed once by the first requested thread so the reader can skip
/// any application output that precedes the debug stream.
pub const SYNC_MARKER: &str = "__clprobe_debug__";

/// Loop counters for array traversal, one per supported dimension.
const COUNTERS: [&str; 3] = ["_probe_i", "_probe_j", "_probe_k"];

/// The result of instrumenting a kernel: the rewritten source plus the
/// contract the decoder needs to read the output back.
#[derive(Debug)]
pub struct Instrumented {
    pub source: String,
    /// In-scope declarations in emission order.
    pub decls: Vec<VarDecl>,
    pub catalog: TypeCatalog,
}

/// Resolve the scanned struct definitions into the type catalog.
/// Definitions are registered in source order, so a struct may refer to
/// any struct defined above it.
pub fn build_catalog(tree: &KernelTree) -> Result<TypeCatalog, DebugError> {
    let mut catalog = TypeCatalog::new();
    for def in &tree.structs {
        let mut fields = Vec::with_capacity(def.fields.len());
        for raw in &def.fields {
            fields.push(FieldDecl::from_parts(&raw.name, &raw.full_type, &catalog)?);
        }
        catalog.register(StructDecl {
            name: def.name.clone(),
            fields,
        });
    }
    Ok(catalog)
}

/// Rewrite `source` so that each thread id in `threads` prints every
/// declaration in scope at `break_line`. The fragment is inserted
/// immediately before the breakpoint line; no existing line changes.
pub fn instrument(
    source: &str,
    tree: &KernelTree,
    break_line: u32,
    threads: &[u64],
) -> Result<Instrumented, DebugError> {
    if threads.is_empty() {
        return Err(DebugError::Scan(
            "at least one thread id is required".to_string(),
        ));
    }

    let catalog = build_catalog(tree)?;
    let resolver = ScopeResolver::new(tree, &catalog);

    let func = resolver
        .enclosing_function(break_line)
        .ok_or(DebugError::OutOfScope(break_line))?;
    if !func.attrs.iter().any(|a| a == KERNEL_ATTR) {
        return Err(DebugError::NotKernelEntry(func.name.clone()));
    }

    let decls = resolver.declarations_in_scope(break_line)?;

    let mut lines = Vec::new();
    for counter in COUNTERS {
        lines.push(format!("int {} = 0;", counter));
    }
    let ids: Vec<String> = threads.iter().map(|t| t.to_string()).collect();
    lines.push(format!(
        "int _probe_targets[{}] = {{{}}};",
        threads.len(),
        ids.join(", ")
    ));
    lines.push(format!(
        "if (get_global_id(0) == {}) {{ printf(\"{}\\n\"); }}",
        threads[0], SYNC_MARKER
    ));
    lines.push("int _probe_t = 0;".to_string());
    lines.push(format!("while (_probe_t < {}) {{", threads.len()));
    lines.push("\tif (get_global_id(0) == _probe_targets[_probe_t]) {".to_string());
    for decl in &decls {
        let mut body = Vec::new();
        emit_decl(decl, &catalog, &mut body)?;
        for line in body {
            lines.push(format!("\t\t{}", line));
        }
    }
    lines.push("\t}".to_string());
    lines.push("\t_probe_t++;".to_string());
    lines.push("}".to_string());

    // indent to the innermost enclosing block plus one level
    let innermost = resolver
        .enclosing_blocks(break_line)
        .last()
        .map(|&i| tree.blocks[i].start_line)
        .ok_or(DebugError::OutOfScope(break_line))?;
    let indent = format!("{}\t", leading_whitespace(source, innermost));

    Ok(Instrumented {
        source: insert_before_line(source, break_line, &lines, &indent),
        decls,
        catalog,
    })
}

/// One declaration's printf sequence: name label, value tokens, newline.
fn emit_decl(
    decl: &VarDecl,
    catalog: &TypeCatalog,
    out: &mut Vec<String>,
) -> Result<(), DebugError> {
    out.push(format!("printf(\"{} \");", decl.name));
    emit_value(&decl.shape, &decl.name, &decl.name, catalog, out)?;
    out.push("printf(\"\\n\");".to_string());
    Ok(())
}

fn emit_value(
    shape: &Shape,
    path: &str,
    var: &str,
    catalog: &TypeCatalog,
    out: &mut Vec<String>,
) -> Result<(), DebugError> {
    match shape {
        Shape::Scalar(st) => {
            out.push(format!("printf(\"%{} \", {});", st.printf_tag(), path));
        }
        Shape::Vector(vt) => {
            out.push(format!("printf(\"%{} \", {});", vt.printf_tag(), path));
        }
        Shape::Pointer => {
            out.push(format!(
                "printf(\"%{} \", {});",
                POINTER_TYPE.printf_tag(),
                path
            ));
        }
        Shape::Array { dims, elem } => emit_array(dims, elem, path, var, out)?,
        Shape::Struct(name) => {
            for field in &catalog.lookup(name)?.fields {
                out.push(format!("printf(\"{} \");", field.name));
                let field_path = format!("{}.{}", path, field.name);
                emit_value(&field.shape, &field_path, var, catalog, out)?;
            }
        }
    }
    Ok(())
}

/// Base address token, then one nested counter loop per dimension.
/// Intermediate levels print the sub-array address before descending.
fn emit_array(
    dims: &[u32],
    elem: &Shape,
    path: &str,
    var: &str,
    out: &mut Vec<String>,
) -> Result<(), DebugError> {
    if dims.len() > COUNTERS.len() {
        return Err(DebugError::TooManyDimensions {
            name: var.to_string(),
            dims: dims.len(),
        });
    }
    let elem_tag = match elem {
        Shape::Scalar(st) => st.printf_tag().to_string(),
        Shape::Vector(vt) => vt.printf_tag(),
        _ => {
            return Err(DebugError::Scan(format!(
                "array '{}' has a non-scalar element shape",
                var
            )))
        }
    };
    out.push(format!(
        "printf(\"%{} \", {});",
        POINTER_TYPE.printf_tag(),
        path
    ));
    emit_array_level(dims, &elem_tag, path, 0, out);
    Ok(())
}

fn emit_array_level(dims: &[u32], elem_tag: &str, path: &str, level: usize, out: &mut Vec<String>) {
    let counter = COUNTERS[level];
    let indent = "\t".repeat(level);
    out.push(format!("{}{} = 0;", indent, counter));
    out.push(format!("{}while ({} < {}) {{", indent, counter, dims[level]));
    let inner = format!("{}[{}]", path, counter);
    let body_indent = "\t".repeat(level + 1);
    if level + 1 < dims.len() {
        out.push(format!(
            "{}printf(\"%{} \", {});",
            body_indent,
            POINTER_TYPE.printf_tag(),
            inner
        ));
        emit_array_level(dims, elem_tag, &inner, level + 1, out);
    } else {
        out.push(format!("{}printf(\"%{} \", {});", body_indent, elem_tag, inner));
    }
    out.push(format!("{}{}++;", indent, counter));
    out.push(format!("{}}}", indent));
}

fn leading_whitespace(source: &str, line: u32) -> String {
    source
        .lines()
        .nth(line.saturating_sub(1) as usize)
        .map(|l| l.chars().take_while(|c| *c == ' ' || *c == '\t').collect())
        .unwrap_or_default()
}

fn insert_before_line(source: &str, line: u32, fragment: &[String], indent: &str) -> String {
    let mut out = String::with_capacity(source.len() + fragment.len() * 40);
    let mut current = 1u32;
    for seg in source.split_inclusive('\n') {
        if current == line {
            for text in fragment {
                out.push_str(indent);
                out.push_str(text);
                out.push('\n');
            }
        }
        out.push_str(seg);
        current += 1;
    }
    out
}

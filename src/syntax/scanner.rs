//! Brace-matching structural scanner for C-family kernel source.

use std::collections::HashMap;

use super::{BlockNode, FnNode, KernelTree, RawDecl, StmtNode, StructDef};
use crate::diagnostic::{Diagnostic, Span};

/// Scan a kernel source file into its structural tree.
pub fn scan(source: &str) -> Result<KernelTree, Vec<Diagnostic>> {
    let masked = mask(source);
    let lines = LineIndex::new(source);

    let raw = match_braces(&masked)?;
    let close_of: HashMap<usize, usize> = raw.iter().map(|b| (b.open, b.close)).collect();

    let mut struct_bodies = Vec::new();
    let mut structs = Vec::new();
    let mut diags = Vec::new();
    find_structs(
        &masked,
        &raw,
        &lines,
        &mut structs,
        &mut struct_bodies,
        &mut diags,
    );
    if !diags.is_empty() {
        return Err(diags);
    }

    // Struct bodies are not lexical blocks.
    let kept: Vec<&RawBlock> = raw
        .iter()
        .filter(|b| !struct_bodies.contains(&b.open))
        .collect();

    let mut blocks = Vec::with_capacity(kept.len());
    for rb in &kept {
        blocks.push(BlockNode {
            start_line: lines.line_of(rb.open),
            end_line: lines.line_of(rb.close),
            stmts: collect_stmts(&masked, rb, &close_of, &lines),
        });
    }

    let mut functions = Vec::new();
    for (idx, rb) in kept.iter().enumerate() {
        if depth_of(rb, &raw) != 0 {
            continue;
        }
        if let Some(func) = read_fn_head(&masked, rb.open, idx, &lines) {
            functions.push(func);
        }
    }

    Ok(KernelTree {
        structs,
        functions,
        blocks,
    })
}

/// Replace comments, string/char literal contents, and preprocessor
/// lines with spaces, preserving length and newlines.
fn mask(source: &str) -> Vec<u8> {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str,
        Chr,
    }

    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut state = State::Code;
    let mut line_has_code = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match state {
            State::Code => {
                if b == b'\n' {
                    line_has_code = false;
                } else if b == b'#' && !line_has_code {
                    // preprocessor line: blank to end of line
                    while i < bytes.len() && bytes[i] != b'\n' {
                        out[i] = b' ';
                        i += 1;
                    }
                    continue;
                } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    state = State::LineComment;
                    i += 2;
                    continue;
                } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    state = State::BlockComment;
                    i += 2;
                    continue;
                } else if b == b'"' {
                    out[i] = b' ';
                    state = State::Str;
                    line_has_code = true;
                } else if b == b'\'' {
                    out[i] = b' ';
                    state = State::Chr;
                    line_has_code = true;
                } else if !b.is_ascii_whitespace() {
                    line_has_code = true;
                }
                i += 1;
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                    line_has_code = false;
                } else {
                    out[i] = b' ';
                }
                i += 1;
            }
            State::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    state = State::Code;
                    i += 2;
                    continue;
                }
                if b != b'\n' {
                    out[i] = b' ';
                }
                i += 1;
            }
            State::Str | State::Chr => {
                let quote = if state == State::Str { b'"' } else { b'\'' };
                if b == b'\\' {
                    out[i] = b' ';
                    if i + 1 < bytes.len() {
                        out[i + 1] = b' ';
                    }
                    i += 2;
                    continue;
                }
                if b == quote {
                    out[i] = b' ';
                    state = State::Code;
                } else if b != b'\n' {
                    out[i] = b' ';
                }
                i += 1;
            }
        }
    }
    out
}

/// Offset → 1-based line lookup.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> u32 {
        self.starts.partition_point(|&s| s <= offset) as u32
    }
}

#[derive(Clone, Copy, Debug)]
struct RawBlock {
    open: usize,
    close: usize,
}

fn match_braces(masked: &[u8]) -> Result<Vec<RawBlock>, Vec<Diagnostic>> {
    let mut stack = Vec::new();
    let mut blocks = Vec::new();
    let mut diags = Vec::new();
    for (i, &b) in masked.iter().enumerate() {
        match b {
            b'{' => stack.push(i),
            b'}' => match stack.pop() {
                Some(open) => blocks.push(RawBlock { open, close: i }),
                None => diags.push(Diagnostic::error(
                    "unmatched '}'".to_string(),
                    Span::new(i as u32, i as u32 + 1),
                )),
            },
            _ => {}
        }
    }
    for open in stack {
        diags.push(Diagnostic::error(
            "unmatched '{'".to_string(),
            Span::new(open as u32, open as u32 + 1),
        ));
    }
    if !diags.is_empty() {
        return Err(diags);
    }
    blocks.sort_by_key(|b| b.open);
    Ok(blocks)
}

fn depth_of(block: &RawBlock, all: &[RawBlock]) -> usize {
    all.iter()
        .filter(|b| b.open < block.open && b.close > block.close)
        .count()
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find top-level `struct N { ... };` and `typedef struct { ... } N;`
/// definitions. Marks each body's opening offset in `struct_bodies`.
fn find_structs(
    masked: &[u8],
    raw: &[RawBlock],
    lines: &LineIndex,
    structs: &mut Vec<StructDef>,
    struct_bodies: &mut Vec<usize>,
    diags: &mut Vec<Diagnostic>,
) {
    let close_of: HashMap<usize, usize> = raw.iter().map(|b| (b.open, b.close)).collect();
    let mut i = 0;
    while i < masked.len() {
        let b = masked[i];
        if b == b'{' {
            // skip block interiors: struct definitions are top-level
            i = close_of.get(&i).map(|c| c + 1).unwrap_or(i + 1);
            continue;
        }
        if !is_ident_start(b) {
            i += 1;
            continue;
        }
        let start = i;
        while i < masked.len() && is_ident_char(masked[i]) {
            i += 1;
        }
        let word = std::str::from_utf8(&masked[start..i]).unwrap_or("");
        if word != "struct" {
            continue;
        }
        let mut j = skip_ws(masked, i);
        let mut tag = None;
        if j < masked.len() && is_ident_start(masked[j]) {
            let ts = j;
            while j < masked.len() && is_ident_char(masked[j]) {
                j += 1;
            }
            tag = Some(String::from_utf8_lossy(&masked[ts..j]).into_owned());
            j = skip_ws(masked, j);
        }
        if j >= masked.len() || masked[j] != b'{' {
            // a declaration using the tag, or a forward declaration
            continue;
        }
        let Some(&close) = close_of.get(&j) else {
            continue;
        };
        struct_bodies.push(j);
        let fields = parse_fields(masked, j + 1, close, lines, diags);
        // typedef alias after the closing brace wins over the tag
        let mut k = skip_ws(masked, close + 1);
        let mut alias = None;
        if k < masked.len() && is_ident_start(masked[k]) {
            let as_ = k;
            while k < masked.len() && is_ident_char(masked[k]) {
                k += 1;
            }
            alias = Some(String::from_utf8_lossy(&masked[as_..k]).into_owned());
        }
        match alias.or(tag) {
            Some(name) => structs.push(StructDef {
                name,
                fields,
                line: lines.line_of(start),
            }),
            None => diags.push(Diagnostic::error(
                "anonymous struct definition".to_string(),
                Span::new(start as u32, j as u32 + 1),
            )),
        }
        i = close + 1;
    }
}

fn skip_ws(masked: &[u8], mut i: usize) -> usize {
    while i < masked.len() && masked[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn parse_fields(
    masked: &[u8],
    body_start: usize,
    body_end: usize,
    lines: &LineIndex,
    diags: &mut Vec<Diagnostic>,
) -> Vec<RawDecl> {
    let body = String::from_utf8_lossy(&masked[body_start..body_end]);
    let mut fields = Vec::new();
    let mut offset = 0;
    for piece in body.split(';') {
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            let lead = piece.len() - piece.trim_start().len();
            let line = lines.line_of(body_start + offset + lead);
            let mut decls = split_declarators(trimmed, line);
            if decls.is_empty() {
                diags.push(Diagnostic::error(
                    format!("unsupported struct field '{}'", trimmed),
                    Span::new(
                        (body_start + offset) as u32,
                        (body_start + offset + piece.len()) as u32,
                    ),
                ));
            }
            fields.append(&mut decls);
        }
        offset += piece.len() + 1;
    }
    fields
}

/// Read a function head ending at the `{` at `open`: `... name ( params )`.
/// Returns None if the brace is not preceded by a parameter list.
fn read_fn_head(masked: &[u8], open: usize, body: usize, lines: &LineIndex) -> Option<FnNode> {
    let mut k = open;
    while k > 0 && masked[k - 1].is_ascii_whitespace() {
        k -= 1;
    }
    if k == 0 || masked[k - 1] != b')' {
        return None;
    }
    // match the parameter list backwards
    let mut depth = 0;
    let mut p = k - 1;
    loop {
        match masked[p] {
            b')' => depth += 1,
            b'(' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        if p == 0 {
            return None;
        }
        p -= 1;
    }
    let mut n = p;
    while n > 0 && masked[n - 1].is_ascii_whitespace() {
        n -= 1;
    }
    let name_end = n;
    while n > 0 && is_ident_char(masked[n - 1]) {
        n -= 1;
    }
    if n == name_end {
        return None;
    }
    let name = String::from_utf8_lossy(&masked[n..name_end]).into_owned();

    // head text runs back to the previous statement terminator
    let mut h = n;
    while h > 0 && !matches!(masked[h - 1], b';' | b'}' | b')') {
        h -= 1;
    }
    let head = String::from_utf8_lossy(&masked[h..n]);
    let attrs = head
        .split_whitespace()
        .filter(|w| w.starts_with("__"))
        .map(|w| w.to_string())
        .collect();

    Some(FnNode {
        name,
        attrs,
        body,
        line: lines.line_of(n),
    })
}

/// Collect the simple statements that are direct children of a block.
/// Nested compound statements are skipped whole; initializer brace
/// lists (preceded by `=`, `,` or `{`) stay part of their statement.
fn collect_stmts(
    masked: &[u8],
    block: &RawBlock,
    close_of: &HashMap<usize, usize>,
    lines: &LineIndex,
) -> Vec<StmtNode> {
    let mut stmts = Vec::new();
    let mut i = block.open + 1;
    let mut start: Option<usize> = None;
    let mut paren = 0i32;
    while i < block.close {
        let b = masked[i];
        if start.is_none() && !b.is_ascii_whitespace() {
            start = Some(i);
        }
        match b {
            b'(' => paren += 1,
            b')' => paren -= 1,
            b';' if paren == 0 => {
                if let Some(s) = start {
                    let text = String::from_utf8_lossy(&masked[s..i]).trim().to_string();
                    if !text.is_empty() {
                        stmts.push(StmtNode {
                            text,
                            line: lines.line_of(s),
                        });
                    }
                }
                start = None;
            }
            b'{' => {
                let close = match close_of.get(&i) {
                    Some(&c) => c,
                    None => break,
                };
                let mut back = i;
                while back > block.open + 1 && masked[back - 1].is_ascii_whitespace() {
                    back -= 1;
                }
                let prev = if back > block.open + 1 {
                    masked[back - 1]
                } else {
                    0
                };
                if matches!(prev, b'=' | b',' | b'{') {
                    // initializer list: keep scanning past it
                    i = close;
                } else {
                    // compound statement: not a direct-child declaration
                    start = None;
                    i = close;
                }
            }
            _ => {}
        }
        i += 1;
    }
    stmts
}

/// Split a statement into declarators: `int a = 1, *b` yields raw
/// declarations for `a` and `b`. Returns an empty vector for anything
/// that does not look like a declaration.
pub fn split_declarators(text: &str, line: u32) -> Vec<RawDecl> {
    let parts = split_top_level_commas(text);
    let Some(first) = parts.first() else {
        return Vec::new();
    };
    let Some((tokens, name_idx)) = tokenize_declarator(first) else {
        return Vec::new();
    };
    // the base type is everything before the name, minus this
    // declarator's own stars and dims
    let type_words: Vec<&Tok> = tokens[..name_idx]
        .iter()
        .filter(|t| matches!(t, Tok::Ident(_)))
        .collect();
    if type_words.is_empty() {
        return Vec::new();
    }
    let has_struct_kw = type_words
        .iter()
        .any(|t| matches!(t, Tok::Ident(w) if w == "struct"));
    let type_prefix = render_tokens(&type_words);

    let Tok::Ident(name) = &tokens[name_idx] else {
        return Vec::new();
    };
    let without_name: Vec<&Tok> = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != name_idx)
        .map(|(_, t)| t)
        .collect();

    let mut decls = Vec::new();
    decls.push(RawDecl {
        name: name.clone(),
        full_type: render_tokens(&without_name),
        has_struct_kw,
        line,
    });

    for part in &parts[1..] {
        let Some((tokens, name_idx)) = tokenize_declarator(part) else {
            return Vec::new();
        };
        // later declarators may only add stars and dims of their own
        if tokens.iter().filter(|t| matches!(t, Tok::Ident(_))).count() != 1 {
            return Vec::new();
        }
        let Tok::Ident(name) = &tokens[name_idx] else {
            return Vec::new();
        };
        let suffix: Vec<&Tok> = tokens
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != name_idx)
            .map(|(_, t)| t)
            .collect();
        let full_type = if suffix.is_empty() {
            type_prefix.clone()
        } else {
            format!("{} {}", type_prefix, render_tokens(&suffix))
        };
        decls.push(RawDecl {
            name: name.clone(),
            full_type,
            has_struct_kw,
            line,
        });
    }
    decls
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut seg_start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(strip_initializer(&text[seg_start..i]));
                seg_start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(strip_initializer(&text[seg_start..]));
    parts.retain(|p| !p.trim().is_empty());
    parts
}

fn strip_initializer(part: &str) -> &str {
    match part.find('=') {
        Some(eq) => part[..eq].trim(),
        None => part.trim(),
    }
}

#[derive(Debug, PartialEq)]
enum Tok {
    Ident(String),
    Star,
    Dim(u32),
}

/// Tokenize a declarator (initializer already stripped). Returns the
/// token list and the index of the declared name: the last identifier.
/// Any character that cannot appear in a declarator rejects the whole
/// statement.
fn tokenize_declarator(text: &str) -> Option<(Vec<Tok>, usize)> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
        } else if is_ident_start(b) {
            let s = i;
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            tokens.push(Tok::Ident(text[s..i].to_string()));
        } else if b == b'*' {
            tokens.push(Tok::Star);
            i += 1;
        } else if b == b'[' {
            i += 1;
            let mut digits = String::new();
            loop {
                if i >= bytes.len() {
                    return None;
                }
                match bytes[i] {
                    b']' => {
                        i += 1;
                        break;
                    }
                    d if d.is_ascii_digit() => {
                        digits.push(d as char);
                        i += 1;
                    }
                    d if d.is_ascii_whitespace() => i += 1,
                    _ => return None,
                }
            }
            tokens.push(Tok::Dim(digits.parse().ok()?));
        } else {
            return None;
        }
    }
    let name_idx = tokens
        .iter()
        .rposition(|t| matches!(t, Tok::Ident(w) if w != "struct"))?;
    Some((tokens, name_idx))
}

fn render_tokens(tokens: &[&Tok]) -> String {
    tokens
        .iter()
        .map(|t| match t {
            Tok::Ident(w) => w.clone(),
            Tok::Star => "*".to_string(),
            Tok::Dim(n) => format!("[{}]", n),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: &str = r#"// vector add with a probe point
struct my_struct_1 {
    int count;
    double2 v;
};

typedef struct {
    int count;
    struct my_struct_1 inner;
} my_struct_2;

int helper(int x) {
    int doubled = x * 2;
    return doubled;
}

__kernel void vadd(__global float* a, __global float* b) {
    int i = 0;
    float f = 14.31f;
    int arr_2d[2][3];
    struct my_struct_1 s1;
    if (f > 0.0f) {
        int inner_only = 5;
        f = f + 1.0f; // breakpoint here
    }
}
"#;

    #[test]
    fn finds_structs_in_source_order() {
        let tree = scan(KERNEL).unwrap();
        let names: Vec<&str> = tree.structs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["my_struct_1", "my_struct_2"]);
        let fields: Vec<&str> = tree.structs[0]
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(fields, ["count", "v"]);
        assert_eq!(tree.structs[1].fields[1].full_type, "struct my_struct_1");
    }

    #[test]
    fn struct_bodies_are_not_blocks() {
        let tree = scan(KERNEL).unwrap();
        // helper body, vadd body, and the if body
        assert_eq!(tree.blocks.len(), 3);
    }

    #[test]
    fn finds_functions_and_attrs() {
        let tree = scan(KERNEL).unwrap();
        let names: Vec<&str> = tree.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["helper", "vadd"]);
        assert!(tree.functions[0].attrs.is_empty());
        assert_eq!(tree.functions[1].attrs, ["__kernel"]);
    }

    #[test]
    fn block_extents_are_1_based_lines() {
        let tree = scan(KERNEL).unwrap();
        let vadd_body = &tree.blocks[1];
        assert_eq!(vadd_body.start_line, 17);
        assert_eq!(vadd_body.end_line, 26);
        let if_body = &tree.blocks[2];
        assert_eq!(if_body.start_line, 22);
        assert_eq!(if_body.end_line, 25);
    }

    #[test]
    fn direct_child_statements_only() {
        let tree = scan(KERNEL).unwrap();
        let vadd_body = &tree.blocks[1];
        let texts: Vec<&str> = vadd_body.stmts.iter().map(|s| s.text.as_str()).collect();
        // the if body's statements are not direct children
        assert_eq!(
            texts,
            [
                "int i = 0",
                "float f = 14.31f",
                "int arr_2d[2][3]",
                "struct my_struct_1 s1",
            ]
        );
        let if_body = &tree.blocks[2];
        assert_eq!(if_body.stmts.len(), 2);
        assert_eq!(if_body.stmts[0].text, "int inner_only = 5");
    }

    #[test]
    fn comments_and_strings_are_masked() {
        let src = "__kernel void f() {\n    int x = 0; // int y = 1;\n    printf(\"{ not a block }\");\n}\n";
        let tree = scan(src).unwrap();
        assert_eq!(tree.blocks.len(), 1);
        assert_eq!(tree.blocks[0].stmts.len(), 2);
        assert_eq!(tree.blocks[0].stmts[0].text, "int x = 0");
    }

    #[test]
    fn unbalanced_braces_are_reported() {
        assert!(scan("void f() { int x = 0;").is_err());
        assert!(scan("void f() } ").is_err());
    }

    #[test]
    fn declarator_simple() {
        let d = split_declarators("int a", 1);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].name, "a");
        assert_eq!(d[0].full_type, "int");
    }

    #[test]
    fn declarator_with_qualifier_and_dims() {
        let d = split_declarators("__local int arr[41][5]", 3);
        assert_eq!(d[0].name, "arr");
        assert_eq!(d[0].full_type, "__local int [41] [5]");
        assert_eq!(d[0].line, 3);
    }

    #[test]
    fn declarator_pointer() {
        let d = split_declarators("__global float *p", 1);
        assert_eq!(d[0].name, "p");
        assert_eq!(d[0].full_type, "__global float *");
    }

    #[test]
    fn declarator_struct_keyword() {
        let d = split_declarators("struct my_struct_1 s1", 1);
        assert_eq!(d[0].name, "s1");
        assert!(d[0].has_struct_kw);
        assert_eq!(d[0].full_type, "struct my_struct_1");
    }

    #[test]
    fn declarator_multiple() {
        let d = split_declarators("int a = 1, *b, c[2]", 1);
        let names: Vec<&str> = d.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(d[0].full_type, "int");
        assert_eq!(d[1].full_type, "int *");
        assert_eq!(d[2].full_type, "int [2]");
    }

    #[test]
    fn non_declarations_yield_nothing() {
        assert!(split_declarators("f = f + 1.0f", 1).is_empty());
        assert!(split_declarators("return doubled", 1).len() == 1); // filtered later by type lookup
        assert!(split_declarators("compute(x)", 1).is_empty());
        assert!(split_declarators("x", 1).is_empty());
    }

    #[test]
    fn initializer_braces_do_not_end_statements() {
        let src = "void f() {\n    int a[2] = {1, 2};\n    int b = 0;\n}\n";
        let tree = scan(src).unwrap();
        let texts: Vec<&str> = tree.blocks[0].stmts.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("int a[2]"));
        assert_eq!(texts[1], "int b = 0");
    }

    #[test]
    fn for_loop_headers_are_not_declarations() {
        let src = "void f() {\n    for (int i = 0; i < 4; i++) {\n        int inner = 1;\n    }\n    int after = 2;\n}\n";
        let tree = scan(src).unwrap();
        let texts: Vec<&str> = tree.blocks[0].stmts.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["int after = 2"]);
    }
}

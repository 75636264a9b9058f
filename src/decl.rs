use serde::Serialize;

use crate::error::DebugError;
use crate::types::{ScalarType, TypeCatalog, VectorType};

/// OpenCL address-space qualifier. Required to parse a declaration's type
/// tokens but unrelated to its serialized value shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpace {
    Private,
    Local,
    Global,
}

impl AddressSpace {
    pub fn from_qualifier(word: &str) -> Option<Self> {
        match word {
            "__private" | "private" => Some(Self::Private),
            "__local" | "local" => Some(Self::Local),
            "__global" | "global" => Some(Self::Global),
            _ => None,
        }
    }

    pub fn qualifier(self) -> &'static str {
        match self {
            Self::Private => "__private",
            Self::Local => "__local",
            Self::Global => "__global",
        }
    }
}

/// The serialized shape of a declaration, resolved once at construction.
/// The code generator and the value decoder are two exhaustive matches
/// over this one variant type, so their walk order cannot drift apart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Shape {
    Scalar(ScalarType),
    Vector(VectorType),
    /// Pointer rank > 0 and no array shape: one address-sized word,
    /// regardless of pointee type.
    Pointer,
    Array {
        dims: Vec<u32>,
        elem: Box<Shape>,
    },
    /// Base type name resolved against the catalog at construction time.
    Struct(String),
}

impl Shape {
    /// Classify a base type name + pointer rank + array dims.
    pub fn resolve(
        base: &str,
        pointer_rank: usize,
        dims: &[u32],
        catalog: &TypeCatalog,
    ) -> Result<Shape, DebugError> {
        if !dims.is_empty() {
            let elem = if let Some(st) = ScalarType::from_name(base) {
                Shape::Scalar(st)
            } else if let Some(vt) = VectorType::from_name(base) {
                Shape::Vector(vt)
            } else if catalog.contains_struct(base) {
                return Err(DebugError::Scan(format!(
                    "arrays of struct '{}' are outside the supported type set",
                    base
                )));
            } else {
                return Err(DebugError::UndefinedStruct(base.to_string()));
            };
            return Ok(Shape::Array {
                dims: dims.to_vec(),
                elem: Box::new(elem),
            });
        }
        if pointer_rank > 0 {
            return Ok(Shape::Pointer);
        }
        if let Some(st) = ScalarType::from_name(base) {
            return Ok(Shape::Scalar(st));
        }
        if let Some(vt) = VectorType::from_name(base) {
            return Ok(Shape::Vector(vt));
        }
        // neither scalar nor vector: must be a registered struct
        catalog.lookup(base)?;
        Ok(Shape::Struct(base.to_string()))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Shape::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Shape::Struct(_))
    }

    /// Number of whitespace-delimited tokens the value part of this shape
    /// serializes to. Each array dimension contributes one address word
    /// plus its sub-elements; struct fields each carry their own name word.
    pub fn value_words(&self, catalog: &TypeCatalog) -> Result<usize, DebugError> {
        match self {
            Shape::Scalar(_) | Shape::Vector(_) | Shape::Pointer => Ok(1),
            Shape::Array { dims, .. } => Ok(dims
                .iter()
                .rev()
                .fold(1usize, |t, d| t * (*d as usize) + 1)),
            Shape::Struct(name) => catalog.lookup(name)?.value_words(catalog),
        }
    }
}

/// A variable declaration in a kernel body.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VarDecl {
    pub name: String,
    pub address_space: AddressSpace,
    pub base_type: String,
    pub pointer_rank: usize,
    pub dims: Vec<u32>,
    pub shape: Shape,
}

/// A struct field declaration: same as a variable but without an address
/// space (fields inherit the enclosing variable's).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldDecl {
    pub name: String,
    pub base_type: String,
    pub pointer_rank: usize,
    pub dims: Vec<u32>,
    pub shape: Shape,
}

/// A struct type definition. Field order is registration order and is
/// load-bearing: the generator emits and the decoder consumes fields in
/// exactly this order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

/// A type declarator split into its parts: optional address space,
/// `struct` keyword, base type name, pointer rank, array dims.
struct TypeParts {
    address_space: Option<AddressSpace>,
    base: String,
    pointer_rank: usize,
    dims: Vec<u32>,
}

/// Split a declarator like `__private int [41]` or `float __global *`
/// into its parts. The address-space qualifier may come before or after
/// the base type.
fn parse_type_text(full_type: &str) -> Result<TypeParts, DebugError> {
    let malformed = || DebugError::Scan(format!("malformed type declarator '{}'", full_type));

    let mut pointer_rank = 0usize;
    let mut dims = Vec::new();
    let mut cleaned = String::with_capacity(full_type.len());
    let mut chars = full_type.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                pointer_rank += 1;
                cleaned.push(' ');
            }
            '[' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(d) if d.is_whitespace() => {}
                        _ => return Err(malformed()),
                    }
                }
                dims.push(digits.parse().map_err(|_| malformed())?);
                cleaned.push(' ');
            }
            _ => cleaned.push(c),
        }
    }

    let mut address_space = None;
    let mut saw_struct_kw = false;
    let mut base = None;
    let mut unsigned = None;
    for word in cleaned.split_whitespace() {
        if let Some(space) = AddressSpace::from_qualifier(word) {
            address_space = Some(space);
            continue;
        }
        match word {
            "const" | "volatile" | "restrict" | "static" => {}
            "struct" => saw_struct_kw = true,
            "unsigned" => unsigned = Some(true),
            "signed" => unsigned = Some(false),
            _ if base.is_none() => base = Some(word.to_string()),
            _ => return Err(malformed()),
        }
    }
    let _ = saw_struct_kw; // the keyword is optional; the name alone decides
    // `unsigned int` and friends normalize to the u-prefixed names
    let base = match (base, unsigned) {
        (Some(b), Some(true)) => format!("u{}", b),
        (Some(b), _) => b,
        (None, Some(true)) => "uint".to_string(),
        (None, Some(false)) => "int".to_string(),
        (None, None) => return Err(malformed()),
    };
    Ok(TypeParts {
        address_space,
        base,
        pointer_rank,
        dims,
    })
}

impl VarDecl {
    /// Build a declaration from a name and its full type text, e.g.
    /// `("a", "__private int [41]")`. A missing address-space qualifier
    /// defaults to `__private`.
    pub fn from_parts(
        name: &str,
        full_type: &str,
        catalog: &TypeCatalog,
    ) -> Result<Self, DebugError> {
        let parts = parse_type_text(full_type)?;
        let shape = Shape::resolve(&parts.base, parts.pointer_rank, &parts.dims, catalog)?;
        Ok(Self {
            name: name.to_string(),
            address_space: parts.address_space.unwrap_or(AddressSpace::Private),
            base_type: parts.base,
            pointer_rank: parts.pointer_rank,
            dims: parts.dims,
            shape,
        })
    }

    pub fn is_array(&self) -> bool {
        self.shape.is_array()
    }

    pub fn is_struct(&self) -> bool {
        self.shape.is_struct()
    }

    /// Serialized token count: 1 for the name label plus the value words.
    /// This is the contract the decoder uses to slice the token stream.
    pub fn word_count(&self, catalog: &TypeCatalog) -> Result<usize, DebugError> {
        Ok(1 + self.shape.value_words(catalog)?)
    }
}

impl FieldDecl {
    pub fn from_parts(
        name: &str,
        full_type: &str,
        catalog: &TypeCatalog,
    ) -> Result<Self, DebugError> {
        let parts = parse_type_text(full_type)?;
        let shape = Shape::resolve(&parts.base, parts.pointer_rank, &parts.dims, catalog)?;
        Ok(Self {
            name: name.to_string(),
            base_type: parts.base,
            pointer_rank: parts.pointer_rank,
            dims: parts.dims,
            shape,
        })
    }

    pub fn is_array(&self) -> bool {
        self.shape.is_array()
    }

    pub fn word_count(&self, catalog: &TypeCatalog) -> Result<usize, DebugError> {
        Ok(1 + self.shape.value_words(catalog)?)
    }
}

impl StructDecl {
    /// Total value words of all fields, each including its own name label.
    pub fn value_words(&self, catalog: &TypeCatalog) -> Result<usize, DebugError> {
        let mut total = 0;
        for field in &self.fields {
            total += field.word_count(catalog)?;
        }
        Ok(total)
    }
}

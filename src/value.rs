use std::fmt;

use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Serialize, Serializer};

use crate::decl::{Shape, VarDecl};
use crate::error::DebugError;
use crate::types::{TypeCatalog, POINTER_TYPE};

/// A decoded runtime value, shaped like its declaration: scalar, vector
/// lanes, (base address, elements) per array dimension, or field map.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Vector(Vec<Value>),
    Array { addr: u64, elems: Vec<Value> },
    Struct(Vec<(String, Value)>),
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Vector(lanes) => lanes.serialize(serializer),
            Value::Array { addr, elems } => {
                let mut tup = serializer.serialize_tuple(2)?;
                tup.serialize_element(addr)?;
                tup.serialize_element(elems)?;
                tup.end()
            }
            Value::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

/// A decoded variable: its declaration, the global id it was captured
/// from, and the value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Variable {
    pub decl: VarDecl,
    pub gid: Option<u64>,
    pub value: Value,
}

impl Variable {
    /// Decode one captured output line against a declaration. The line is
    /// split on whitespace; the first token must echo the declaration's
    /// name, and the rest is consumed lock-step against the declared
    /// shape. Any label mismatch or token-count mismatch is fatal: the
    /// format is positional, so there is no way to resynchronize.
    pub fn decode(
        decl: &VarDecl,
        line: &str,
        gid: Option<u64>,
        catalog: &TypeCatalog,
    ) -> Result<Self, DebugError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let name = tokens.first().copied().unwrap_or("");
        if name != decl.name {
            return Err(DebugError::DecodeMismatch {
                expected: decl.name.clone(),
                found: name.to_string(),
            });
        }
        let mut cursor = Cursor {
            tokens: &tokens[1..],
            pos: 0,
        };
        let value = decode_shape(&decl.shape, &mut cursor, catalog)?;
        if cursor.pos != cursor.tokens.len() {
            return Err(DebugError::DecodeMismatch {
                expected: "end of record".to_string(),
                found: cursor.tokens[cursor.pos].to_string(),
            });
        }
        Ok(Self {
            decl: decl.clone(),
            gid,
            value,
        })
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

struct Cursor<'a> {
    tokens: &'a [&'a str],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Result<&'a str, DebugError> {
        let tok = self.tokens.get(self.pos).copied().ok_or_else(|| {
            DebugError::DecodeMismatch {
                expected: "value token".to_string(),
                found: "end of record".to_string(),
            }
        })?;
        self.pos += 1;
        Ok(tok)
    }

    fn remaining(&self) -> usize {
        self.tokens.len() - self.pos
    }
}

/// The consuming half of the shape walk. Mirrors the emitting half in
/// `codegen`: both are exhaustive matches over [`Shape`], so the token
/// order here is the emission order there.
fn decode_shape(
    shape: &Shape,
    cursor: &mut Cursor<'_>,
    catalog: &TypeCatalog,
) -> Result<Value, DebugError> {
    match shape {
        Shape::Scalar(st) => st.parse_literal(cursor.next()?),
        Shape::Vector(vt) => vt.parse_literal(cursor.next()?),
        Shape::Pointer => POINTER_TYPE.parse_literal(cursor.next()?),
        Shape::Array { dims, elem } => decode_array(dims, elem, cursor, catalog),
        Shape::Struct(name) => {
            let def = catalog.lookup(name)?;
            let mut fields = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                let label = cursor.next()?;
                if label != field.name {
                    return Err(DebugError::DecodeMismatch {
                        expected: field.name.clone(),
                        found: label.to_string(),
                    });
                }
                let value = decode_shape(&field.shape, cursor, catalog)?;
                fields.push((field.name.clone(), value));
            }
            Ok(Value::Struct(fields))
        }
    }
}

/// One address token, then the elements of the leading dimension: raw
/// element tokens at the innermost dimension, recursive groups otherwise.
fn decode_array(
    dims: &[u32],
    elem: &Shape,
    cursor: &mut Cursor<'_>,
    catalog: &TypeCatalog,
) -> Result<Value, DebugError> {
    let needed = dims.iter().rev().fold(1usize, |t, d| t * (*d as usize) + 1);
    if cursor.remaining() < needed {
        return Err(DebugError::ArrayArityMismatch {
            expected: needed,
            found: cursor.remaining(),
        });
    }
    let addr = match POINTER_TYPE.parse_literal(cursor.next()?)? {
        Value::UInt(a) => a,
        _ => unreachable!("pointer type parses to UInt"),
    };
    let mut elems = Vec::with_capacity(dims[0] as usize);
    for _ in 0..dims[0] {
        if dims.len() == 1 {
            elems.push(decode_shape(elem, cursor, catalog)?);
        } else {
            elems.push(decode_array(&dims[1..], elem, cursor, catalog)?);
        }
    }
    Ok(Value::Array { addr, elems })
}

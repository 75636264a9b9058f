use serde::Serialize;

use crate::decl::StructDecl;
use crate::error::DebugError;
use crate::value::Value;

/// Vector lane counts OpenCL defines.
pub const VECTOR_LANES: [u32; 4] = [2, 4, 8, 16];

/// The ten OpenCL scalar types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Long,
    Ulong,
    Float,
    Double,
}

/// Pointers and array base addresses print and parse as this type,
/// regardless of what they point at.
pub const POINTER_TYPE: ScalarType = ScalarType::Uint;

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "char" => Self::Char,
            "uchar" => Self::Uchar,
            "short" => Self::Short,
            "ushort" => Self::Ushort,
            "int" => Self::Int,
            "uint" => Self::Uint,
            "long" => Self::Long,
            "ulong" => Self::Ulong,
            "float" => Self::Float,
            "double" => Self::Double,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::Uchar => "uchar",
            Self::Short => "short",
            Self::Ushort => "ushort",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Long => "long",
            Self::Ulong => "ulong",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// printf conversion tag, without the leading '%'.
    pub fn printf_tag(self) -> &'static str {
        match self {
            Self::Char | Self::Uchar | Self::Int | Self::Uint => "x",
            Self::Short | Self::Ushort => "hx",
            Self::Long | Self::Ulong => "lx",
            Self::Float => "f",
            Self::Double => "lf",
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Char | Self::Uchar => 8,
            Self::Short | Self::Ushort => 16,
            Self::Int | Self::Uint | Self::Float => 32,
            Self::Long | Self::Ulong | Self::Double => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Char | Self::Short | Self::Int | Self::Long)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Parse one printed token back into a value: base-16 for the integer
    /// types (with or without a `0x` prefix), decimal for the float types.
    /// Integer tokens are truncated to the declared width and reinterpreted
    /// with the declared signedness, so `ff` as `char` is -1 and `0x1f100`
    /// as `uchar` is 0.
    pub fn parse_literal(self, token: &str) -> Result<Value, DebugError> {
        let bad = || DebugError::BadLiteral {
            literal: token.to_string(),
            ty: self.name().to_string(),
        };
        if self.is_float() {
            let wide: f64 = token.parse().map_err(|_| bad())?;
            // float values round-trip through f32, matching device precision
            return Ok(match self {
                Self::Float => Value::Float(wide as f32 as f64),
                _ => Value::Float(wide),
            });
        }
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        let raw = u128::from_str_radix(digits, 16).map_err(|_| bad())?;
        let bits = self.bits();
        let truncated = raw & (u128::MAX >> (128 - bits));
        if self.is_signed() {
            let sign_bit = 1u128 << (bits - 1);
            let signed = if truncated & sign_bit != 0 {
                truncated as i128 - (1i128 << bits)
            } else {
                truncated as i128
            };
            Ok(Value::Int(signed as i64))
        } else {
            Ok(Value::UInt(truncated as u64))
        }
    }
}

/// A fixed-width vector: scalar base type plus a lane count from
/// {2, 4, 8, 16}. Printed and parsed as one comma-separated token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VectorType {
    pub base: ScalarType,
    pub lanes: u32,
}

impl VectorType {
    /// Recognize names like `double2` or `uint16`.
    pub fn from_name(name: &str) -> Option<Self> {
        let split = name.find(|c: char| c.is_ascii_digit())?;
        let base = ScalarType::from_name(&name[..split])?;
        let lanes: u32 = name[split..].parse().ok()?;
        if !VECTOR_LANES.contains(&lanes) {
            return None;
        }
        Some(Self { base, lanes })
    }

    pub fn name(self) -> String {
        format!("{}{}", self.base.name(), self.lanes)
    }

    /// Multi-lane printf tag, e.g. `v2lf` for `double2`.
    pub fn printf_tag(self) -> String {
        format!("v{}{}", self.lanes, self.base.printf_tag())
    }

    /// Parse one comma-separated token into the lane values.
    pub fn parse_literal(self, token: &str) -> Result<Value, DebugError> {
        let parts: Vec<&str> = token.split(',').collect();
        if parts.len() != self.lanes as usize {
            return Err(DebugError::VectorArityMismatch {
                expected: self.lanes as usize,
                found: parts.len(),
            });
        }
        let lanes = parts
            .iter()
            .map(|p| self.base.parse_literal(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Vector(lanes))
    }
}

/// Static type knowledge plus the struct definitions discovered in the
/// current kernel. One catalog per session: populated during code
/// generation, read-only while decoding.
#[derive(Debug, Default)]
pub struct TypeCatalog {
    structs: Vec<StructDecl>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a struct definition. Registration order is the iteration
    /// order used by both the generator and the decoder.
    pub fn register(&mut self, decl: StructDecl) {
        self.structs.push(decl);
    }

    pub fn contains_struct(&self, name: &str) -> bool {
        self.structs.iter().any(|s| s.name == name)
    }

    pub fn lookup(&self, name: &str) -> Result<&StructDecl, DebugError> {
        self.structs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| DebugError::UndefinedStruct(name.to_string()))
    }

    pub fn struct_names(&self) -> impl Iterator<Item = &str> {
        self.structs.iter().map(|s| s.name.as_str())
    }

    /// True if `name` is a scalar, vector, or registered struct type.
    pub fn is_value_type(&self, name: &str) -> bool {
        ScalarType::from_name(name).is_some()
            || VectorType::from_name(name).is_some()
            || self.contains_struct(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_names_round_trip() {
        for name in [
            "char", "uchar", "short", "ushort", "int", "uint", "long", "ulong", "float", "double",
        ] {
            let st = ScalarType::from_name(name).unwrap();
            assert_eq!(st.name(), name);
        }
        assert!(ScalarType::from_name("int2").is_none());
        assert!(ScalarType::from_name("my_struct").is_none());
    }

    #[test]
    fn printf_tags() {
        assert_eq!(ScalarType::Char.printf_tag(), "x");
        assert_eq!(ScalarType::Ushort.printf_tag(), "hx");
        assert_eq!(ScalarType::Ulong.printf_tag(), "lx");
        assert_eq!(ScalarType::Double.printf_tag(), "lf");
        assert_eq!(VectorType::from_name("double2").unwrap().printf_tag(), "v2lf");
        assert_eq!(VectorType::from_name("uint16").unwrap().printf_tag(), "v16x");
    }

    #[test]
    fn vector_names() {
        let v = VectorType::from_name("float4").unwrap();
        assert_eq!(v.base, ScalarType::Float);
        assert_eq!(v.lanes, 4);
        assert!(VectorType::from_name("float3").is_none());
        assert!(VectorType::from_name("float").is_none());
        assert!(VectorType::from_name("foo4").is_none());
    }

    #[test]
    fn signed_char_truncation() {
        assert_eq!(ScalarType::Char.parse_literal("ff").unwrap(), Value::Int(-1));
        assert_eq!(
            ScalarType::Char.parse_literal("0x70").unwrap(),
            Value::Int(0x70)
        );
        // only the low byte survives
        assert_eq!(
            ScalarType::Char.parse_literal("0x1f100").unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn unsigned_char_truncation() {
        assert_eq!(
            ScalarType::Uchar.parse_literal("ff").unwrap(),
            Value::UInt(255)
        );
        assert_eq!(
            ScalarType::Uchar.parse_literal("0x1f100").unwrap(),
            Value::UInt(0)
        );
    }

    #[test]
    fn int_truncates_to_32_bits() {
        assert_eq!(
            ScalarType::Int.parse_literal("0x777777111111ff").unwrap(),
            Value::Int(0x111111ff)
        );
    }

    #[test]
    fn floats_parse_decimal() {
        assert_eq!(
            ScalarType::Double.parse_literal("-0.133").unwrap(),
            Value::Float(-0.133)
        );
        match ScalarType::Float.parse_literal("14.31").unwrap() {
            Value::Float(f) => assert!((f - 14.31).abs() < 1e-5),
            other => panic!("expected float, got {:?}", other),
        }
        assert!(ScalarType::Float.parse_literal("abc").is_err());
    }

    #[test]
    fn vector_lane_mismatch() {
        let v = VectorType::from_name("double4").unwrap();
        assert!(matches!(
            v.parse_literal("0.1,0.2"),
            Err(DebugError::VectorArityMismatch {
                expected: 4,
                found: 2
            })
        ));
    }

    #[test]
    fn hex_literals_are_not_decimal() {
        assert_eq!(ScalarType::Int.parse_literal("12").unwrap(), Value::Int(0x12));
    }
}

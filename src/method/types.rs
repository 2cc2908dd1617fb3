//! Declared Java types, operand-stack value kinds and method descriptors.

use strum::{Display, IntoStaticStr};

use crate::{Error, Result};

/// The kind of a value on the operand stack or in a local variable slot.
///
/// This is the closed set the translator works with. Sub-word integers (`boolean`, `byte`,
/// `char`, `short`) are represented as [`ValueKind::Int`] and arrays as
/// [`ValueKind::Object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    /// 32-bit two's complement integer
    Int,
    /// 64-bit two's complement integer, occupies two slots
    Long,
    /// 32-bit IEEE float
    Float,
    /// 64-bit IEEE float, occupies two slots
    Double,
    /// Object or array reference
    Object,
    /// No value; only valid as a return kind
    Void,
}

impl ValueKind {
    /// Returns `true` for the two-slot kinds.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }

    /// Number of stack or locals slots a value of this kind occupies.
    #[must_use]
    pub const fn slots(self) -> usize {
        match self {
            ValueKind::Void => 0,
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }
}

/// A declared Java type as it appears in field and method descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BasicType {
    /// `Z`
    Boolean,
    /// `C`
    Char,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `L...;`
    Object,
    /// `[...`
    Array,
    /// `V`
    Void,
    /// Return address pushed by `jsr`; never appears in descriptors
    Address,
}

impl BasicType {
    /// Maps a primitive descriptor character to its type.
    ///
    /// Object (`L`) and array (`[`) descriptors are multi-character and handled by
    /// [`Signature::parse`].
    #[must_use]
    pub fn from_descriptor(c: char) -> Option<Self> {
        Some(match c {
            'Z' => BasicType::Boolean,
            'C' => BasicType::Char,
            'F' => BasicType::Float,
            'D' => BasicType::Double,
            'B' => BasicType::Byte,
            'S' => BasicType::Short,
            'I' => BasicType::Int,
            'J' => BasicType::Long,
            'V' => BasicType::Void,
            _ => return None,
        })
    }

    /// The operand-stack kind values of this type take.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for [`BasicType::Address`].
    pub fn kind(self) -> Result<ValueKind> {
        Ok(match self {
            BasicType::Boolean
            | BasicType::Char
            | BasicType::Byte
            | BasicType::Short
            | BasicType::Int => ValueKind::Int,
            BasicType::Long => ValueKind::Long,
            BasicType::Float => ValueKind::Float,
            BasicType::Double => ValueKind::Double,
            BasicType::Object | BasicType::Array => ValueKind::Object,
            BasicType::Void => ValueKind::Void,
            BasicType::Address => {
                return Err(Error::Unsupported {
                    construct: "return address values".into(),
                    bci: None,
                })
            }
        })
    }

    /// Number of slots a value of this type occupies; zero for `void`.
    #[must_use]
    pub const fn slots(self) -> usize {
        match self {
            BasicType::Void => 0,
            BasicType::Long | BasicType::Double => 2,
            _ => 1,
        }
    }
}

/// A parsed method descriptor such as `(IJLjava/lang/String;)V`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Declared parameter types, excluding any receiver
    pub params: Vec<BasicType>,
    /// Declared return type
    pub ret: BasicType,
    descriptor: String,
}

impl Signature {
    /// Parses a JVM method descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the descriptor is not well formed, including a `void`
    /// parameter or trailing characters after the return type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use stacklift::method::{BasicType, Signature};
    ///
    /// let sig = Signature::parse("(I[JLjava/lang/Object;)D")?;
    /// assert_eq!(sig.params, vec![BasicType::Int, BasicType::Array, BasicType::Object]);
    /// assert_eq!(sig.ret, BasicType::Double);
    /// assert_eq!(sig.param_slots(), 3);
    /// # Ok::<(), stacklift::Error>(())
    /// ```
    pub fn parse(descriptor: &str) -> Result<Self> {
        let body = descriptor
            .strip_prefix('(')
            .ok_or_else(|| malformed_error!("descriptor '{}' does not start with '('", descriptor))?;
        let (params_str, ret_str) = body
            .split_once(')')
            .ok_or_else(|| malformed_error!("descriptor '{}' has no ')'", descriptor))?;

        let mut params = Vec::new();
        let mut rest = params_str;
        while !rest.is_empty() {
            let (ty, tail) = parse_field_type(rest, descriptor)?;
            if ty == BasicType::Void {
                return Err(malformed_error!("void parameter in descriptor '{}'", descriptor));
            }
            params.push(ty);
            rest = tail;
        }

        let (ret, tail) = parse_field_type(ret_str, descriptor)?;
        if !tail.is_empty() {
            return Err(malformed_error!(
                "trailing characters after return type in descriptor '{}'",
                descriptor
            ));
        }

        Ok(Signature {
            params,
            ret,
            descriptor: descriptor.to_string(),
        })
    }

    /// Total slots taken by the declared parameters.
    #[must_use]
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(|p| p.slots()).sum()
    }

    /// The descriptor this signature was parsed from.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// Parses one field type off the front of `s`, returning it and the remaining text.
fn parse_field_type<'a>(s: &'a str, descriptor: &str) -> Result<(BasicType, &'a str)> {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return Err(malformed_error!("truncated descriptor '{}'", descriptor));
    };

    match first {
        'L' => {
            let end = s
                .find(';')
                .ok_or_else(|| malformed_error!("unterminated class name in '{}'", descriptor))?;
            if end == 1 {
                return Err(malformed_error!("empty class name in '{}'", descriptor));
            }
            Ok((BasicType::Object, &s[end + 1..]))
        }
        '[' => {
            let elem = s.trim_start_matches('[');
            let (elem_ty, tail) = parse_field_type(elem, descriptor)?;
            if elem_ty == BasicType::Void {
                return Err(malformed_error!("array of void in '{}'", descriptor));
            }
            Ok((BasicType::Array, tail))
        }
        c => BasicType::from_descriptor(c)
            .map(|ty| (ty, chars.as_str()))
            .ok_or_else(|| malformed_error!("invalid type '{}' in descriptor '{}'", c, descriptor)),
    }
}

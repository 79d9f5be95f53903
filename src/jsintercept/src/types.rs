//! The host (JVM) side of the boundary: field types, values and exceptions.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// The internal name of `java.lang.String`.
pub const STRING_CLASS: &str = "java/lang/String";
/// The internal name of `java.lang.Object`.
pub const OBJECT_CLASS: &str = "java/lang/Object";
/// The unchecked exception class script failures surface as.
pub const SCRIPT_EXCEPTION_CLASS: &str = "jsintercept/ScriptException";

/// A JVM field type.
///
/// Parsed from and rendered to JVM type descriptors (`I`, `Ljava/lang/String;`, `[J`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostType {
    /// `V`, only valid as a return type.
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `Ljava/lang/String;`
    String,
    /// `L<internal-name>;` for any other class.
    Object(Arc<str>),
    /// `[<element>`
    Array(Box<HostType>),
}

impl HostType {
    /// Shorthand for `HostType::Object(OBJECT_CLASS)`.
    pub fn object() -> Self {
        HostType::Object(Arc::from(OBJECT_CLASS))
    }

    /// Parses a single field descriptor. `V` is rejected.
    pub fn parse(descriptor: &str) -> Result<Self> {
        match parse_field(descriptor, descriptor)? {
            (ty, "") => Ok(ty),
            (_, rest) => Err(invalid(descriptor, format!("trailing characters {rest:?}"))),
        }
    }

    /// Renders the JVM descriptor.
    pub fn descriptor(&self) -> String {
        self.to_string()
    }

    /// The value a method of this return type yields when its body is skipped.
    pub fn zero_value(&self) -> HostValue {
        match self {
            HostType::Void => HostValue::Void,
            HostType::Boolean => HostValue::Boolean(false),
            HostType::Byte => HostValue::Byte(0),
            HostType::Char => HostValue::Char('\0'),
            HostType::Short => HostValue::Short(0),
            HostType::Int => HostValue::Int(0),
            HostType::Long => HostValue::Long(0),
            HostType::Float => HostValue::Float(0.0),
            HostType::Double => HostValue::Double(0.0),
            HostType::String | HostType::Object(_) | HostType::Array(_) => HostValue::Null,
        }
    }

    /// Returns `true` for class and array types, which admit `null`.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            HostType::String | HostType::Object(_) | HostType::Array(_)
        )
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Void => f.write_str("V"),
            HostType::Boolean => f.write_str("Z"),
            HostType::Byte => f.write_str("B"),
            HostType::Char => f.write_str("C"),
            HostType::Short => f.write_str("S"),
            HostType::Int => f.write_str("I"),
            HostType::Long => f.write_str("J"),
            HostType::Float => f.write_str("F"),
            HostType::Double => f.write_str("D"),
            HostType::String => write!(f, "L{STRING_CLASS};"),
            HostType::Object(class) => write!(f, "L{class};"),
            HostType::Array(element) => write!(f, "[{element}"),
        }
    }
}

/// A parsed method descriptor, `(<params>)<return>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order.
    pub params: Vec<HostType>,
    /// The return type, possibly [`HostType::Void`].
    pub return_type: HostType,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(ILjava/lang/String;)V`.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let Some(mut rest) = descriptor.strip_prefix('(') else {
            return Err(invalid(descriptor, "expected '('"));
        };
        let mut params = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            if rest.is_empty() {
                return Err(invalid(descriptor, "missing ')'"));
            }
            let (param, after) = parse_field(rest, descriptor)?;
            params.push(param);
            rest = after;
        }

        let return_type = if rest == "V" {
            HostType::Void
        } else {
            HostType::parse(rest).map_err(|_| invalid(descriptor, "invalid return type"))?
        };
        Ok(Self {
            params,
            return_type,
        })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        write!(f, "){}", self.return_type)
    }
}

fn invalid(descriptor: &str, reason: impl Into<String>) -> Error {
    Error::InvalidDescriptor {
        descriptor: descriptor.to_string(),
        reason: reason.into(),
    }
}

// Parses one field type off the front of `input`, returning it and the remainder.
fn parse_field<'a>(input: &'a str, whole: &str) -> Result<(HostType, &'a str)> {
    let mut chars = input.chars();
    let ty = match chars.next() {
        Some('Z') => HostType::Boolean,
        Some('B') => HostType::Byte,
        Some('C') => HostType::Char,
        Some('S') => HostType::Short,
        Some('I') => HostType::Int,
        Some('J') => HostType::Long,
        Some('F') => HostType::Float,
        Some('D') => HostType::Double,
        Some('L') => {
            let body = chars.as_str();
            let Some(end) = body.find(';') else {
                return Err(invalid(whole, "unterminated class name"));
            };
            let class = &body[..end];
            if class.is_empty() || class.contains(['.', '[', '(', ')']) {
                return Err(invalid(whole, format!("invalid class name {class:?}")));
            }
            let ty = if class == STRING_CLASS {
                HostType::String
            } else {
                HostType::Object(Arc::from(class))
            };
            return Ok((ty, &body[end + 1..]));
        }
        Some('[') => {
            let (element, rest) = parse_field(chars.as_str(), whole)?;
            return Ok((HostType::Array(Box::new(element)), rest));
        }
        Some('V') => return Err(invalid(whole, "void is not a field type")),
        Some(other) => return Err(invalid(whole, format!("unknown type code {other:?}"))),
        None => return Err(invalid(whole, "empty type")),
    };
    Ok((ty, chars.as_str()))
}

/// A value on the host side of the boundary.
///
/// Floating point values compare by bit pattern, like boxed `Double.equals`:
/// `NaN` equals itself and `0.0` differs from `-0.0`.
#[derive(Debug, Clone)]
pub enum HostValue {
    /// The absence of a value, returned by `void` methods.
    Void,
    /// `null`
    Null,
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char`
    Char(char),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `java.lang.String`
    String(String),
    /// An array.
    Array(HostArray),
    /// Any other object.
    Object(HostObject),
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Void, HostValue::Void) | (HostValue::Null, HostValue::Null) => true,
            (HostValue::Boolean(a), HostValue::Boolean(b)) => a == b,
            (HostValue::Byte(a), HostValue::Byte(b)) => a == b,
            (HostValue::Char(a), HostValue::Char(b)) => a == b,
            (HostValue::Short(a), HostValue::Short(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Long(a), HostValue::Long(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a.to_bits() == b.to_bits(),
            (HostValue::Double(a), HostValue::Double(b)) => a.to_bits() == b.to_bits(),
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Array(a), HostValue::Array(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl HostValue {
    /// The host type this value is an instance of. `null` is typed as `java.lang.Object`.
    pub fn host_type(&self) -> HostType {
        match self {
            HostValue::Void => HostType::Void,
            HostValue::Null => HostType::object(),
            HostValue::Boolean(_) => HostType::Boolean,
            HostValue::Byte(_) => HostType::Byte,
            HostValue::Char(_) => HostType::Char,
            HostValue::Short(_) => HostType::Short,
            HostValue::Int(_) => HostType::Int,
            HostValue::Long(_) => HostType::Long,
            HostValue::Float(_) => HostType::Float,
            HostValue::Double(_) => HostType::Double,
            HostValue::String(_) => HostType::String,
            HostValue::Array(array) => HostType::Array(Box::new(array.element.clone())),
            HostValue::Object(object) => HostType::Object(object.class.clone()),
        }
    }

    /// Creates an array value.
    pub fn array(element: HostType, items: Vec<HostValue>) -> Self {
        HostValue::Array(HostArray { element, items })
    }

    /// Returns the object, if this is one.
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Boolean(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Int(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Long(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Double(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<HostObject> for HostValue {
    fn from(value: HostObject) -> Self {
        HostValue::Object(value)
    }
}

/// A typed host array.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    /// The component type.
    pub element: HostType,
    /// The elements, in order.
    pub items: Vec<HostValue>,
}

/// A shared reference to a host object.
///
/// Equality is identity: two `HostObject`s are equal only if they point at
/// the same allocation.
#[derive(Clone)]
pub struct HostObject {
    class: Arc<str>,
    value: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    /// Wraps `value` as an instance of the class with internal name `class`.
    pub fn new<T: Any + Send + Sync>(class: impl Into<Arc<str>>, value: T) -> Self {
        Self {
            class: class.into(),
            value: Arc::new(value),
        }
    }

    /// Wraps an existing shared value without copying it.
    pub fn from_arc(class: impl Into<Arc<str>>, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            class: class.into(),
            value,
        }
    }

    /// The internal class name.
    pub fn class(&self) -> &str {
        &self.class
    }

    pub(crate) fn class_arc(&self) -> Arc<str> {
        self.class.clone()
    }

    pub(crate) fn value(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.value
    }

    /// Borrows the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns `true` if both point at the same host object.
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.value), Arc::as_ptr(&other.value))
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({}@{:p})", self.class, Arc::as_ptr(&self.value))
    }
}

/// A host exception: what an instrumented method throws.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostThrowable {
    /// Internal class name of the exception.
    pub class: String,
    /// The exception message.
    pub message: String,
    /// Script stack trace, when the exception originated in a script.
    pub stack: Option<String>,
    /// The exception that caused this one.
    pub cause: Option<Box<HostThrowable>>,
}

impl HostThrowable {
    /// Creates an exception with no stack or cause.
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }

    /// Attaches a script stack trace.
    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack = stack;
        self
    }

    /// Chains a cause.
    pub fn with_cause(mut self, cause: HostThrowable) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for HostThrowable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for HostThrowable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floating_point_values_compare_by_bits() {
        assert_eq!(HostValue::Double(f64::NAN), HostValue::Double(f64::NAN));
        assert_eq!(HostValue::Float(f32::NAN), HostValue::Float(f32::NAN));
        assert_ne!(HostValue::Double(0.0), HostValue::Double(-0.0));
        assert_eq!(HostValue::Double(1.5), HostValue::Double(1.5));
        assert_ne!(HostValue::Double(1.0), HostValue::Float(1.0));

        let array = |items| {
            HostValue::Array(HostArray {
                element: HostType::Double,
                items,
            })
        };
        assert_eq!(
            array(vec![HostValue::Double(f64::NAN)]),
            array(vec![HostValue::Double(f64::NAN)])
        );
    }

    #[test]
    fn parses_field_descriptors() {
        assert_eq!(HostType::parse("I").unwrap(), HostType::Int);
        assert_eq!(HostType::parse("Ljava/lang/String;").unwrap(), HostType::String);
        assert_eq!(
            HostType::parse("[[Lcom/example/Point;").unwrap(),
            HostType::Array(Box::new(HostType::Array(Box::new(HostType::Object(
                Arc::from("com/example/Point")
            )))))
        );
    }

    #[test]
    fn renders_what_it_parses() {
        for descriptor in ["Z", "J", "Ljava/lang/String;", "[D", "[Ljava/util/List;"] {
            assert_eq!(HostType::parse(descriptor).unwrap().descriptor(), descriptor);
        }
    }

    #[test]
    fn rejects_malformed_field_descriptors() {
        for descriptor in ["", "V", "Q", "Ljava/lang/String", "L;", "II", "Ljava.lang.String;"] {
            let err = HostType::parse(descriptor).unwrap_err();
            assert!(
                matches!(err, Error::InvalidDescriptor { .. }),
                "{descriptor:?} gave {err}"
            );
        }
    }

    #[test]
    fn parses_method_descriptors() {
        let method = MethodDescriptor::parse("(I[JLjava/lang/String;)V").unwrap();
        assert_eq!(
            method.params,
            vec![
                HostType::Int,
                HostType::Array(Box::new(HostType::Long)),
                HostType::String
            ]
        );
        assert_eq!(method.return_type, HostType::Void);
        assert_eq!(method.to_string(), "(I[JLjava/lang/String;)V");

        let method = MethodDescriptor::parse("()Ljava/lang/Object;").unwrap();
        assert!(method.params.is_empty());
        assert_eq!(method.return_type, HostType::object());
    }

    #[test]
    fn rejects_malformed_method_descriptors() {
        for descriptor in ["I)V", "(I", "(V)V", "(I)", "(I)VV", "(I)Q"] {
            assert!(MethodDescriptor::parse(descriptor).is_err(), "{descriptor:?}");
        }
    }

    #[test]
    fn zero_values_match_the_return_type() {
        assert_eq!(HostType::Int.zero_value(), HostValue::Int(0));
        assert_eq!(HostType::Boolean.zero_value(), HostValue::Boolean(false));
        assert_eq!(HostType::Void.zero_value(), HostValue::Void);
        assert_eq!(HostType::String.zero_value(), HostValue::Null);
        assert_eq!(
            HostType::Array(Box::new(HostType::Int)).zero_value(),
            HostValue::Null
        );
    }

    #[test]
    fn host_objects_compare_by_identity() {
        let a = HostObject::new("com/example/Point", (1, 2));
        let b = HostObject::new("com/example/Point", (1, 2));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<(i32, i32)>(), Some(&(1, 2)));
    }

    #[test]
    fn throwables_expose_their_cause() {
        use std::error::Error as _;

        let cause = HostThrowable::new("java/io/IOException", "disk full");
        let err = HostThrowable::new(SCRIPT_EXCEPTION_CLASS, "wrapped").with_cause(cause.clone());
        assert_eq!(err.to_string(), "jsintercept/ScriptException: wrapped");
        assert_eq!(err.source().map(|s| s.to_string()), Some(cause.to_string()));
    }
}

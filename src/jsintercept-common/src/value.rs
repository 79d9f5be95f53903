use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// A value crossing the boundary between the host and a script engine.
///
/// Engines convert their native values to and from this type; the host-side
/// marshaller converts host values to and from it.
#[derive(Debug, Clone)]
pub enum MarshalledValue {
    /// Script `null` or `undefined`, host `null`.
    Null,
    /// A boolean.
    Boolean(bool),
    /// An integer the engine represents exactly.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    String(String),
    /// An ordered array of values.
    Array(Vec<MarshalledValue>),
    /// An opaque reference to a host object.
    Object(ObjectRef),
    /// A thrown (or returned) script error.
    Error(ThrownError),
    /// One of the reserved policy sentinels.
    Sentinel(Sentinel),
}

impl MarshalledValue {
    /// Short name of the variant, used in coercion error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            MarshalledValue::Null => "null",
            MarshalledValue::Boolean(_) => "boolean",
            MarshalledValue::Integer(_) => "integer",
            MarshalledValue::Float(_) => "float",
            MarshalledValue::String(_) => "string",
            MarshalledValue::Array(_) => "array",
            MarshalledValue::Object(_) => "object",
            MarshalledValue::Error(_) => "error",
            MarshalledValue::Sentinel(_) => "sentinel",
        }
    }

    /// Returns `true` if this value is the given sentinel.
    pub fn is_sentinel(&self, sentinel: Sentinel) -> bool {
        matches!(self, MarshalledValue::Sentinel(s) if *s == sentinel)
    }
}

impl PartialEq for MarshalledValue {
    fn eq(&self, other: &Self) -> bool {
        use MarshalledValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Error(a), Error(b)) => a == b,
            (Sentinel(a), Sentinel(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MarshalledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalledValue::Null => f.write_str("null"),
            MarshalledValue::Boolean(b) => write!(f, "{b}"),
            MarshalledValue::Integer(i) => write!(f, "{i}"),
            MarshalledValue::Float(x) => write!(f, "{x}"),
            MarshalledValue::String(s) => write!(f, "{s:?}"),
            MarshalledValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            MarshalledValue::Object(obj) => write!(f, "<{}>", obj.class()),
            MarshalledValue::Error(err) => write!(f, "{err}"),
            MarshalledValue::Sentinel(s) => write!(f, "{s}"),
        }
    }
}

/// Reserved values a handler returns to steer its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// Returned by a `Before` handler to prevent the original method from running.
    SkipOriginal,
    /// Returned by an `After` handler to keep the original result.
    PassThrough,
}

impl Sentinel {
    /// The symbol registry key backing this sentinel in a script engine.
    pub fn symbol_key(self) -> &'static str {
        match self {
            Sentinel::SkipOriginal => crate::SKIP_ORIGINAL_SYMBOL,
            Sentinel::PassThrough => crate::PASS_THROUGH_SYMBOL,
        }
    }

    /// The script global name under which this sentinel is installed.
    pub fn global_name(self) -> &'static str {
        match self {
            Sentinel::SkipOriginal => crate::SKIP_ORIGINAL_GLOBAL,
            Sentinel::PassThrough => crate::PASS_THROUGH_GLOBAL,
        }
    }

    /// Looks a sentinel up by its symbol registry key.
    pub fn from_symbol_key(key: &str) -> Option<Self> {
        [Sentinel::SkipOriginal, Sentinel::PassThrough]
            .into_iter()
            .find(|s| s.symbol_key() == key)
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.global_name())
    }
}

/// An opaque, weak reference to a host object.
///
/// The reference never keeps the host object alive. Returning it unchanged
/// from a script yields the very same host object.
#[derive(Clone)]
pub struct ObjectRef {
    class: Arc<str>,
    target: Weak<dyn Any + Send + Sync>,
}

impl ObjectRef {
    /// Creates a weak reference to `target`, whose internal class name is `class`.
    pub fn new(class: impl Into<Arc<str>>, target: &Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            class: class.into(),
            target: Arc::downgrade(target),
        }
    }

    /// The internal class name of the referenced object.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The class name as a shared string.
    pub fn class_arc(&self) -> Arc<str> {
        self.class.clone()
    }

    /// Upgrades to the host object, if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.target.upgrade()
    }

    /// Returns `true` if the host object has not been dropped.
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Returns `true` if both references point at the same host object.
    pub fn same_target(&self, other: &ObjectRef) -> bool {
        Weak::ptr_eq(&self.target, &other.target)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_target(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("class", &self.class)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// An error thrown by a script, or a host exception thrown into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrownError {
    /// Error name (`TypeError`, or the host class name for host exceptions).
    pub name: String,
    /// Error message.
    pub message: String,
    /// Script stack trace, if the engine captured one.
    pub stack: Option<String>,
}

impl ThrownError {
    /// Creates an error with no stack.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attaches a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for ThrownError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_refs_compare_by_identity() {
        let a: Arc<dyn Any + Send + Sync> = Arc::new(1u32);
        let b: Arc<dyn Any + Send + Sync> = Arc::new(1u32);

        let ra = ObjectRef::new("java/lang/Integer", &a);
        assert_eq!(ra, ObjectRef::new("java/lang/Integer", &a));
        assert_ne!(ra, ObjectRef::new("java/lang/Integer", &b));
    }

    #[test]
    fn object_ref_does_not_keep_target_alive() {
        let target: Arc<dyn Any + Send + Sync> = Arc::new(String::from("host"));
        let r = ObjectRef::new("java/lang/Object", &target);
        assert!(r.is_alive());

        drop(target);
        assert!(!r.is_alive());
        assert!(r.upgrade().is_none());
    }

    #[test]
    fn sentinels_round_trip_through_symbol_keys() {
        for s in [Sentinel::SkipOriginal, Sentinel::PassThrough] {
            assert_eq!(Sentinel::from_symbol_key(s.symbol_key()), Some(s));
        }
        assert_eq!(Sentinel::from_symbol_key("something.else"), None);
    }

    #[test]
    fn display_renders_nested_arrays() {
        let value = MarshalledValue::Array(vec![
            MarshalledValue::Integer(1),
            MarshalledValue::String("two".into()),
            MarshalledValue::Array(vec![MarshalledValue::Null]),
        ]);
        assert_eq!(value.to_string(), r#"[1,"two",[null]]"#);
    }
}

use std::fmt;
use std::sync::Arc;

use crate::types::{HostType, MethodDescriptor};
use crate::{Error, Result};

/// Selects one method of a class: its name, JVM descriptor and whether it is static.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSelector {
    name: String,
    descriptor: String,
    is_static: bool,
}

impl MethodSelector {
    /// Selects an instance method.
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            is_static: false,
        }
    }

    /// Selects a static method.
    pub fn new_static(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::new(name, descriptor)
        }
    }

    /// The method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw JVM method descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Whether the method is static.
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Parses the descriptor.
    pub fn method_descriptor(&self) -> Result<MethodDescriptor> {
        MethodDescriptor::parse(&self.descriptor)
    }
}

/// A class about to be loaded or redefined: its internal name and bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    bytes: Vec<u8>,
}

impl TypeDescriptor {
    /// Describes the class `name` (internal form, `com/example/Calculator`).
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// The internal class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class file bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The identity of an intercepted method.
///
/// Two keys are equal iff owner, name, parameter types and static flag all
/// match, so overloads get distinct keys. The return type is not part of the key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InterceptionKey {
    owner: Arc<str>,
    name: Arc<str>,
    params: Arc<[HostType]>,
    is_static: bool,
}

impl InterceptionKey {
    /// Builds the key for `method` of the class `owner`.
    pub fn new(owner: &str, method: &MethodSelector) -> Result<Self> {
        validate_name(owner, "class name", &['.', ';', '[', '(', ')'])?;
        validate_name(method.name(), "method name", &['.', ';', '[', '/', '(', ')'])?;
        let descriptor = method.method_descriptor()?;
        Ok(Self {
            owner: Arc::from(owner),
            name: Arc::from(method.name()),
            params: Arc::from(descriptor.params),
            is_static: method.is_static(),
        })
    }

    /// The internal name of the declaring class.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameter types, in order.
    pub fn params(&self) -> &[HostType] {
        &self.params
    }

    pub(crate) fn params_arc(&self) -> Arc<[HostType]> {
        self.params.clone()
    }

    /// Whether the method is static.
    pub fn is_static(&self) -> bool {
        self.is_static
    }
}

fn validate_name(name: &str, what: &str, forbidden: &[char]) -> Result<()> {
    if name.is_empty() || name.contains(forbidden) {
        return Err(Error::InvalidDescriptor {
            descriptor: name.to_string(),
            reason: format!("invalid {what}"),
        });
    }
    Ok(())
}

impl fmt::Display for InterceptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            f.write_str("static ")?;
        }
        write!(f, "{}.{}(", self.owner, self.name)?;
        for param in self.params.iter() {
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for InterceptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterceptionKey({self})")
    }
}

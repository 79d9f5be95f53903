//! Conversion between host values and the values scripts see.
//!
//! Host objects cross the boundary as weak handles and are never copied:
//! a script that returns a handle unchanged hands back the identical host
//! object. Every narrowing on the way back is checked; a value that does not
//! fit the expected type is a [`Error::TypeCoercion`], never a silent truncation.

use jsintercept_common::{MAX_SAFE_INTEGER, MarshalledValue, ObjectRef, ThrownError};
use serde::{Deserialize, Serialize};

use crate::interceptor::metrics::METRIC_MARSHAL_PRECISION_LOSS;
use crate::types::{HostArray, HostObject, HostThrowable, HostType, HostValue, OBJECT_CLASS};
use crate::{Error, Result};

/// What to do with integral host values a script cannot represent exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionPolicy {
    /// Pass the nearest float and log a warning.
    #[default]
    Warn,
    /// Fail with [`Error::TypeCoercion`].
    Reject,
}

/// Converts values across the host/script boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Marshaller {
    precision: PrecisionPolicy,
}

impl Marshaller {
    /// Creates a marshaller with the given precision policy.
    pub fn new(precision: PrecisionPolicy) -> Self {
        Self { precision }
    }

    /// The configured precision policy.
    pub fn precision_policy(&self) -> PrecisionPolicy {
        self.precision
    }

    /// Converts a host value into its script form.
    pub fn to_script(&self, value: &HostValue) -> Result<MarshalledValue> {
        let marshalled = match value {
            HostValue::Void | HostValue::Null => MarshalledValue::Null,
            HostValue::Boolean(b) => MarshalledValue::Boolean(*b),
            HostValue::Byte(v) => MarshalledValue::Integer(i64::from(*v)),
            HostValue::Short(v) => MarshalledValue::Integer(i64::from(*v)),
            HostValue::Int(v) => MarshalledValue::Integer(i64::from(*v)),
            HostValue::Long(v) => self.integral(*v)?,
            HostValue::Char(c) => MarshalledValue::String(c.to_string()),
            HostValue::Float(v) => MarshalledValue::Float(f64::from(*v)),
            HostValue::Double(v) => MarshalledValue::Float(*v),
            HostValue::String(s) => MarshalledValue::String(s.clone()),
            HostValue::Array(array) => MarshalledValue::Array(
                array
                    .items
                    .iter()
                    .map(|item| self.to_script(item))
                    .collect::<Result<_>>()?,
            ),
            HostValue::Object(object) => {
                MarshalledValue::Object(ObjectRef::new(object.class_arc(), object.value()))
            }
        };
        Ok(marshalled)
    }

    /// Converts a script value back into a host value of type `expected`.
    pub fn from_script(&self, value: MarshalledValue, expected: &HostType) -> Result<HostValue> {
        if let MarshalledValue::Sentinel(sentinel) = &value
            && *expected != HostType::Void
        {
            return Err(Error::TypeCoercion(format!(
                "{sentinel} cannot be used as a {expected} value"
            )));
        }

        match expected {
            HostType::Void => Ok(HostValue::Void),
            HostType::Boolean => match value {
                MarshalledValue::Boolean(b) => Ok(HostValue::Boolean(b)),
                other => Err(mismatch(&other, expected)),
            },
            HostType::Byte => self.narrow(value, expected).map(HostValue::Byte),
            HostType::Short => self.narrow(value, expected).map(HostValue::Short),
            HostType::Int => self.narrow(value, expected).map(HostValue::Int),
            HostType::Long => exact_integer(&value)
                .map(HostValue::Long)
                .ok_or_else(|| mismatch(&value, expected)),
            HostType::Char => match &value {
                MarshalledValue::String(s) => {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(HostValue::Char(c)),
                        _ => Err(mismatch(&value, expected)),
                    }
                }
                MarshalledValue::Integer(i) => u32::try_from(*i)
                    .ok()
                    .and_then(char::from_u32)
                    .map(HostValue::Char)
                    .ok_or_else(|| mismatch(&value, expected)),
                _ => Err(mismatch(&value, expected)),
            },
            HostType::Float => {
                let x = number(&value).ok_or_else(|| mismatch(&value, expected))?;
                let narrowed = x as f32;
                // rounding is fine, overflowing to infinity is not
                if x.is_finite() && !narrowed.is_finite() {
                    return Err(mismatch(&value, expected));
                }
                Ok(HostValue::Float(narrowed))
            }
            HostType::Double => match value {
                MarshalledValue::Integer(i) if (i as f64) as i64 == i => {
                    Ok(HostValue::Double(i as f64))
                }
                MarshalledValue::Float(x) => Ok(HostValue::Double(x)),
                other => Err(mismatch(&other, expected)),
            },
            HostType::String => match value {
                MarshalledValue::Null => Ok(HostValue::Null),
                MarshalledValue::String(s) => Ok(HostValue::String(s)),
                other => Err(mismatch(&other, expected)),
            },
            HostType::Array(element) => match value {
                MarshalledValue::Null => Ok(HostValue::Null),
                MarshalledValue::Array(items) => Ok(HostValue::Array(HostArray {
                    element: (**element).clone(),
                    items: items
                        .into_iter()
                        .map(|item| self.from_script(item, element))
                        .collect::<Result<_>>()?,
                })),
                other => Err(mismatch(&other, expected)),
            },
            HostType::Object(class) => self.object(value, class),
        }
    }

    /// Converts a host exception into the error a script sees.
    pub fn throwable_to_script(&self, throwable: &HostThrowable) -> ThrownError {
        let thrown = ThrownError::new(throwable.class.clone(), throwable.message.clone());
        match &throwable.stack {
            Some(stack) => thrown.with_stack(stack.clone()),
            None => thrown,
        }
    }

    fn integral(&self, value: i64) -> Result<MarshalledValue> {
        if value.unsigned_abs() <= MAX_SAFE_INTEGER as u64 {
            return Ok(MarshalledValue::Integer(value));
        }
        match self.precision {
            PrecisionPolicy::Warn => {
                tracing::warn!(
                    value,
                    "long value exceeds the script engine's exact integer range, passing it as a float"
                );
                metrics::counter!(METRIC_MARSHAL_PRECISION_LOSS).increment(1);
                Ok(MarshalledValue::Float(value as f64))
            }
            PrecisionPolicy::Reject => Err(Error::TypeCoercion(format!(
                "long value {value} exceeds the script engine's exact integer range"
            ))),
        }
    }

    fn narrow<T: TryFrom<i64>>(&self, value: MarshalledValue, expected: &HostType) -> Result<T> {
        exact_integer(&value)
            .and_then(|i| T::try_from(i).ok())
            .ok_or_else(|| mismatch(&value, expected))
    }

    fn object(&self, value: MarshalledValue, class: &str) -> Result<HostValue> {
        match value {
            MarshalledValue::Null => Ok(HostValue::Null),
            MarshalledValue::Object(handle) => match handle.upgrade() {
                Some(target) => Ok(HostValue::Object(HostObject::from_arc(
                    handle.class_arc(),
                    target,
                ))),
                None => Err(Error::TypeCoercion(format!(
                    "host object of class {} has been dropped",
                    handle.class()
                ))),
            },
            other => match boxed_primitive(class) {
                Some(primitive) => self.from_script(other, &primitive),
                None if class == OBJECT_CLASS => self.boxed(other),
                None => Err(mismatch(&other, &HostType::Object(class.into()))),
            },
        }
    }

    // Dynamic values returned where `java.lang.Object` is expected.
    fn boxed(&self, value: MarshalledValue) -> Result<HostValue> {
        match value {
            MarshalledValue::Boolean(b) => Ok(HostValue::Boolean(b)),
            MarshalledValue::Integer(i) => Ok(HostValue::Long(i)),
            MarshalledValue::Float(x) => Ok(HostValue::Double(x)),
            MarshalledValue::String(s) => Ok(HostValue::String(s)),
            MarshalledValue::Array(items) => {
                let element = HostType::object();
                Ok(HostValue::Array(HostArray {
                    items: items
                        .into_iter()
                        .map(|item| self.from_script(item, &element))
                        .collect::<Result<_>>()?,
                    element,
                }))
            }
            other => Err(mismatch(&other, &HostType::object())),
        }
    }
}

fn boxed_primitive(class: &str) -> Option<HostType> {
    Some(match class {
        "java/lang/Boolean" => HostType::Boolean,
        "java/lang/Byte" => HostType::Byte,
        "java/lang/Character" => HostType::Char,
        "java/lang/Short" => HostType::Short,
        "java/lang/Integer" => HostType::Int,
        "java/lang/Long" => HostType::Long,
        "java/lang/Float" => HostType::Float,
        "java/lang/Double" => HostType::Double,
        _ => return None,
    })
}

// An integer, or a float with no fractional part that converts exactly.
fn exact_integer(value: &MarshalledValue) -> Option<i64> {
    match *value {
        MarshalledValue::Integer(i) => Some(i),
        MarshalledValue::Float(x) if x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 => {
            Some(x as i64)
        }
        _ => None,
    }
}

fn number(value: &MarshalledValue) -> Option<f64> {
    match *value {
        MarshalledValue::Integer(i) => Some(i as f64),
        MarshalledValue::Float(x) => Some(x),
        _ => None,
    }
}

fn mismatch(value: &MarshalledValue, expected: &HostType) -> Error {
    Error::TypeCoercion(format!("cannot convert script {} {value} to {expected}", value.kind()))
}

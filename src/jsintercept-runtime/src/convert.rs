use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use jsintercept_common::{
    HOST_CLASS_PROPERTY, HOST_HANDLE_PROPERTY, MarshalledValue, ObjectRef, Sentinel, ThrownError,
};
use rquickjs::object::Property;
use rquickjs::{Array, BigInt, Coerced, Ctx, Exception, Object, Symbol, Type, Value};

/// Host objects currently visible to scripts in one context, keyed by handle id.
///
/// Entries are weak. Dead entries are pruned before each invocation, so a
/// script that stashed a handle in a global sees it go stale once the host
/// drops the object.
#[derive(Default)]
pub(crate) struct HandleTable {
    next: u32,
    entries: HashMap<u32, ObjectRef>,
}

pub(crate) type SharedHandles = Rc<RefCell<HandleTable>>;

impl HandleTable {
    /// Returns the id for `object`, reusing the existing one if the host object is already known.
    pub(crate) fn insert(&mut self, object: ObjectRef) -> u32 {
        if let Some((id, _)) = self.entries.iter().find(|(_, e)| e.same_target(&object)) {
            return *id;
        }
        self.next = self.next.wrapping_add(1);
        self.entries.insert(self.next, object);
        self.next
    }

    pub(crate) fn get(&self, id: u32) -> Option<&ObjectRef> {
        self.entries.get(&id)
    }

    pub(crate) fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_alive());
        before - self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A script value that has no host representation.
#[derive(Debug)]
pub(crate) struct ConversionError(pub(crate) String);

impl From<rquickjs::Error> for ConversionError {
    fn from(err: rquickjs::Error) -> Self {
        ConversionError(err.to_string())
    }
}

/// Converts a marshalled value into a script value.
pub(crate) fn to_js<'js>(
    ctx: &Ctx<'js>,
    handles: &SharedHandles,
    value: MarshalledValue,
) -> rquickjs::Result<Value<'js>> {
    let value = match value {
        MarshalledValue::Null => Value::new_null(ctx.clone()),
        MarshalledValue::Boolean(b) => Value::new_bool(ctx.clone(), b),
        MarshalledValue::Integer(i) => match i32::try_from(i) {
            Ok(small) => Value::new_int(ctx.clone(), small),
            // exact up to MAX_SAFE_INTEGER, which the marshaller enforces
            Err(_) => Value::new_number(ctx.clone(), i as f64),
        },
        MarshalledValue::Float(x) => Value::new_float(ctx.clone(), x),
        MarshalledValue::String(s) => rquickjs::String::from_str(ctx.clone(), &s)?.into_value(),
        MarshalledValue::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.into_iter().enumerate() {
                array.set(index, to_js(ctx, handles, item)?)?;
            }
            array.into_value()
        }
        MarshalledValue::Object(object) => {
            let class = object.class().to_owned();
            let id = handles.borrow_mut().insert(object);
            let proxy = Object::new(ctx.clone())?;
            proxy.prop(HOST_HANDLE_PROPERTY, Property::from(id))?;
            proxy.prop(HOST_CLASS_PROPERTY, Property::from(class).enumerable())?;
            proxy.into_value()
        }
        MarshalledValue::Error(err) => {
            let exception = Exception::from_message(ctx.clone(), &err.message)?;
            exception.set("name", err.name)?;
            exception.into_value()
        }
        MarshalledValue::Sentinel(sentinel) => ctx.globals().get(sentinel.global_name())?,
    };
    Ok(value)
}

/// Converts a script value into a marshalled value.
pub(crate) fn from_js(
    handles: &SharedHandles,
    value: Value<'_>,
) -> Result<MarshalledValue, ConversionError> {
    let marshalled = match value.type_of() {
        Type::Uninitialized | Type::Undefined | Type::Null => MarshalledValue::Null,
        Type::Bool => MarshalledValue::Boolean(value.get::<bool>()?),
        Type::Int => MarshalledValue::Integer(i64::from(value.get::<i32>()?)),
        Type::Float => MarshalledValue::Float(value.get::<f64>()?),
        Type::BigInt => MarshalledValue::Integer(value.get::<BigInt>()?.to_i64()?),
        Type::String => MarshalledValue::String(value.get::<String>()?),
        Type::Symbol => {
            let symbol = value.get::<Symbol>()?;
            let key = symbol.description()?.get::<Option<String>>()?;
            match key.as_deref().and_then(Sentinel::from_symbol_key) {
                Some(sentinel) => MarshalledValue::Sentinel(sentinel),
                None => {
                    return Err(ConversionError(format!(
                        "symbol {} cannot be passed to the host",
                        key.unwrap_or_default()
                    )));
                }
            }
        }
        Type::Array => {
            let array = value.get::<Array>()?;
            let mut items = Vec::with_capacity(array.len());
            for item in array.iter::<Value>() {
                items.push(from_js(handles, item?)?);
            }
            MarshalledValue::Array(items)
        }
        Type::Exception => MarshalledValue::Error(thrown_from_exception(&value.get::<Exception>()?)),
        Type::Object => {
            let object = value.get::<Object>()?;
            let Some(id) = object.get::<_, Option<u32>>(HOST_HANDLE_PROPERTY)? else {
                return Err(ConversionError(
                    "plain script objects cannot be passed to the host".to_string(),
                ));
            };
            match handles.borrow().get(id) {
                Some(host) => MarshalledValue::Object(host.clone()),
                None => {
                    return Err(ConversionError(format!(
                        "host object handle {id} is no longer valid"
                    )));
                }
            }
        }
        Type::Function | Type::Constructor => {
            return Err(ConversionError(
                "functions cannot be passed to the host".to_string(),
            ));
        }
        other => {
            return Err(ConversionError(format!(
                "script values of type {other:?} cannot be passed to the host"
            )));
        }
    };
    Ok(marshalled)
}

/// Builds a [`ThrownError`] from a script exception object.
pub(crate) fn thrown_from_exception(exception: &Exception<'_>) -> ThrownError {
    let name = exception
        .get::<_, Option<String>>("name")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Error".to_string());
    let thrown = ThrownError::new(name, exception.message().unwrap_or_default());
    match exception.stack() {
        Some(stack) if !stack.is_empty() => thrown.with_stack(stack),
        _ => thrown,
    }
}

/// Builds a [`ThrownError`] from an arbitrary thrown script value (`throw "boom"`).
pub(crate) fn thrown_from_value(value: &Value<'_>) -> ThrownError {
    let message = value
        .get::<Coerced<String>>()
        .map(|coerced| coerced.0)
        .unwrap_or_else(|_| format!("{:?}", value.type_of()));
    ThrownError::new("", message)
}

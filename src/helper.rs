use std::{
    error::Error,
    fmt::{Display, Write},
};

use serde_json::{Map, Value};

/// Written in place of a value whose `Display` implementation failed.
pub(crate) const UNRENDERABLE: &str = "<unrenderable>";

/// Render a value with its `Display` implementation.
///
/// `ToString::to_string` panics when the implementation returns an error,
/// logging must not, so the failure degrades to [`UNRENDERABLE`].
pub(crate) fn render(value: &dyn Display) -> String {
    let mut rendered = String::new();
    match write!(rendered, "{value}") {
        Ok(()) => rendered,
        Err(_) => UNRENDERABLE.to_owned(),
    }
}

/// Describe an error as a JSON object: its type, its message and its `source()` chain.
pub(crate) fn describe_error<E>(error: &E) -> Map<String, Value>
where
    E: Error + ?Sized,
{
    let mut description = Map::new();
    description.insert("kind".into(), Value::String(short_type_name::<E>()));
    description.insert("message".into(), Value::String(render(&error)));

    let causes: Vec<Value> = std::iter::successors(error.source(), |&cause| cause.source())
        .map(|cause| Value::String(render(&cause)))
        .collect();
    if !causes.is_empty() {
        description.insert("causes".into(), Value::Array(causes));
    }

    description
}

/// `std::any::type_name` without the module path of the outermost type.
pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rsplit_once("::") {
        Some((_, name)) => format!("{name}{}", &full[base.len()..]),
        None => full.to_owned(),
    }
}

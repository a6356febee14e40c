//! Structured JSON logging enriched with the current request identity.
//!
//! [`Logger`] is the facade application code calls, [`JsonEmitter`] turns
//! the resulting [`LogRecord`]s into JSON lines, and [`LoggerLayer`] bridges
//! plain `tracing` events into the same pipeline.

mod emitter;
mod layer;
mod logger;
mod record;

pub use emitter::{Emit, JsonEmitter, FALLBACK_LOGGER};
pub use layer::LoggerLayer;
pub use logger::Logger;
pub use record::{Fields, LogRecord, RESERVED_KEYS};

use serde::Serialize;
use serde_json::Value;

/// Serialize a field value, degrading to a placeholder string on failure.
pub fn to_field_value<T>(value: &T) -> Value
where
    T: Serialize + ?Sized,
{
    serde_json::to_value(value)
        .unwrap_or_else(|error| Value::String(format!("<unserializable: {error}>")))
}

/// Build [`Fields`] from `key => value` pairs.
///
/// Values only need to implement `serde::Serialize`, see [`to_field_value`].
///
/// ```
/// use tower_correlation::fields;
///
/// let fields = fields! { "item_id" => 101, "name" => "Product 101" };
/// assert_eq!(fields["item_id"], 101);
/// assert!(fields! {}.is_empty());
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::logging::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::logging::Fields::new();
        $(
            fields.insert(
                ::std::string::String::from($key),
                $crate::logging::to_field_value(&$value),
            );
        )+
        fields
    }};
}

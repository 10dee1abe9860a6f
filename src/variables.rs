//! Layering of variable sources into a single [`Namespace`].

use crate::date::coerce_value;
use crate::value::Namespace;

/// Merges namespace layers in order; later layers override earlier ones per top-level key.
///
/// `None` layers are skipped. Nested maps are replaced wholesale rather than
/// deep-merged, and every `DD-MM-YYYY` string in the result becomes a date.
///
/// ```
/// use publishpipe::{Namespace, Value, merge_layers};
///
/// let mut defaults = Namespace::new();
/// defaults.insert("x", 1).insert("y", 3);
/// let mut overrides = Namespace::new();
/// overrides.insert("x", 2);
///
/// let merged = merge_layers([Some(&defaults), None, Some(&overrides)]);
/// assert_eq!(merged.get("x"), Some(&Value::Int(2)));
/// assert_eq!(merged.get("y"), Some(&Value::Int(3)));
/// ```
pub fn merge_layers<'a, I>(layers: I) -> Namespace
where
    I: IntoIterator<Item = Option<&'a Namespace>>,
{
    let mut merged = Namespace::new();
    for layer in layers.into_iter().flatten() {
        for (key, value) in layer {
            merged.insert(key.clone(), coerce_value(value));
        }
    }
    merged
}

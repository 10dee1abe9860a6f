use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};

/// Key the `toml` deserializer wraps datetimes in.
const TOML_DATETIME_KEY: &str = "$__toml_private_datetime";

/// A single value inside a [`Namespace`].
///
/// `Undefined` is the "no value" sentinel: a key holding it is treated as
/// absent by [`Namespace::has_value_at`], while `Null` counts as a value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Jinja-style truthiness: empty containers, zero and the empty string are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Date(_) => true,
            Self::Seq(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Undefined
            | Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Date(_)
            | Self::Seq(_)
            | Self::Map(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Undefined
            | Self::Null
            | Self::String(_)
            | Self::Date(_)
            | Self::Seq(_)
            | Self::Map(_) => None,
        }
    }

    /// Number of items for strings, sequences and maps.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.chars().count()),
            Self::Seq(items) => Some(items.len()),
            Self::Map(entries) => Some(entries.len()),
            Self::Undefined
            | Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Date(_) => None,
        }
    }

    /// Resolves one dotted-path segment: a map key, or a numeric sequence index.
    pub fn get_segment(&self, segment: &str) -> Option<&Self> {
        match self {
            Self::Map(entries) => entries.get(segment),
            Self::Seq(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Self::Undefined
            | Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::String(_)
            | Self::Date(_) => None,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "none",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Seq(_) => "sequence",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined | Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
            Self::Date(date) => write!(f, "{}", date.format("%d-%m-%Y")),
            Self::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or(Self::Float(value as f64), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Seq(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Map(value)
    }
}

impl From<Namespace> for Value {
    fn from(value: Namespace) -> Self {
        Self::Map(value.values)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a template value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(i64::try_from(v).map_or(Value::Float(v as f64), Value::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::Seq(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.insert(key, value);
        }

        if entries.len() == 1 {
            if let Some(Value::String(datetime)) = entries.get(TOML_DATETIME_KEY) {
                return Ok(Value::String(datetime.clone()));
            }
        }

        Ok(Value::Map(entries))
    }
}

/// The merged mapping of variable names to values used during rendering and analysis.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(transparent)]
pub struct Namespace {
    values: BTreeMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.values.iter()
    }

    /// Follows a dotted path (`client.address.city`) through nested maps and sequences.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.get_segment(segment)?;
        }
        Some(current)
    }

    /// True iff every segment of `path` resolves and the final value is not `Undefined`.
    pub fn has_value_at(&self, path: &str) -> bool {
        self.get_path(path).is_some_and(|value| !value.is_undefined())
    }
}

impl FromIterator<(String, Value)> for Namespace {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Namespace {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Namespace {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn namespace(value: serde_json::Value) -> Namespace {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_has_value_at_nested_paths() {
        let ns = namespace(json!({
            "client": { "name": "Acme", "contact": null },
            "items": ["first", "second"],
        }));

        assert!(ns.has_value_at("client"));
        assert!(ns.has_value_at("client.name"));
        assert!(ns.has_value_at("client.contact"), "null is a value");
        assert!(ns.has_value_at("items.1"));
        assert!(!ns.has_value_at("items.2"));
        assert!(!ns.has_value_at("client.name.first"));
        assert!(!ns.has_value_at("missing.name"));
    }

    #[test]
    fn test_undefined_sentinel_is_absent() {
        let mut ns = Namespace::new();
        ns.insert("gone", Value::Undefined);
        assert!(ns.contains_key("gone"));
        assert!(!ns.has_value_at("gone"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Seq(vec![]).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Seq(vec![Value::Null]).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Undefined.to_string(), "");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(
            Value::Seq(vec![Value::from("a"), Value::Int(1)]).to_string(),
            "a, 1"
        );
        let date = NaiveDate::from_ymd_opt(2026, 2, 21).unwrap();
        assert_eq!(Value::Date(date).to_string(), "21-02-2026");
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let ns: Namespace = serde_yaml::from_str("title: Report\ncount: 3\nratio: 0.5\ntags: [a, b]\nempty:\n").unwrap();
        assert_eq!(ns.get("title"), Some(&Value::from("Report")));
        assert_eq!(ns.get("count"), Some(&Value::Int(3)));
        assert_eq!(ns.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(ns.get_path("tags.0"), Some(&Value::from("a")));
        assert_eq!(ns.get("empty"), Some(&Value::Null));
    }

    #[test]
    fn test_deserialize_toml_datetime_as_string() {
        let ns: Namespace = toml::from_str("released = 2026-02-21\n").unwrap();
        assert_eq!(ns.get("released"), Some(&Value::from("2026-02-21")));
    }
}

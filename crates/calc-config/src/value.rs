//! Parameter values and ordered parameter maps.

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Error as _, Serialize, SerializeMap, Serializer};

use crate::error::ConfigError;

/// Marker requesting that a key be deleted from the merged parameters.
///
/// Converts into [`ConfigValue::Remove`]. It is never equal to
/// [`ConfigValue::Null`]: `Null` is a real value that a calculator receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Remove;

/// A single calculator parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Sequences are atomic: an overriding list replaces the base list.
    List(Vec<ConfigValue>),
    Map(ConfigMap),
    /// Removal marker. Only meaningful inside an override; cannot be serialized.
    Remove,
}

impl ConfigValue {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
            ConfigValue::Remove => "removal marker",
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, ConfigValue::Remove)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            ConfigValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// True if a removal marker appears anywhere in this value.
    pub fn contains_remove(&self) -> bool {
        match self {
            ConfigValue::Remove => true,
            ConfigValue::List(items) => items.iter().any(ConfigValue::contains_remove),
            ConfigValue::Map(map) => map.contains_removals(),
            _ => false,
        }
    }

    /// Convert to JSON. Fails if a removal marker is still present.
    pub fn to_json(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Ordered mapping of parameter names to values.
///
/// Iteration follows insertion order. Overwriting an existing key keeps its
/// position; removing a key shifts the later keys down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigMap {
    entries: IndexMap<String, ConfigValue>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ConfigValue> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up a value through nested maps using a dotted path (`"a.b.c"`).
    pub fn get_path(&self, path: &str) -> Option<&ConfigValue> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Insert or overwrite a key, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ConfigValue>,
    ) -> Option<ConfigValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert at a dotted path, creating intermediate maps as needed.
    pub fn insert_path(
        &mut self,
        path: &str,
        value: impl Into<ConfigValue>,
    ) -> Result<(), ConfigError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::EmptyKey(path.to_string()));
        }

        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| ConfigError::EmptyKey(path.to_string()))?;

        let mut current = self;
        for (depth, segment) in parents.iter().enumerate() {
            let slot = current
                .entries
                .entry((*segment).to_string())
                .or_insert_with(|| ConfigValue::Map(ConfigMap::new()));
            current = match slot {
                ConfigValue::Map(map) => map,
                other => {
                    return Err(ConfigError::PathConflict {
                        path: parents[..=depth].join("."),
                        found: other.type_name(),
                    })
                }
            };
        }
        current.insert(*last, value);
        Ok(())
    }

    /// Remove a key, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.entries.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// True if a removal marker appears at any depth.
    pub fn contains_removals(&self) -> bool {
        self.entries.values().any(ConfigValue::contains_remove)
    }

    /// Copy of this map with every removal marker dropped, at any depth.
    ///
    /// Map entries holding the marker are removed; list elements equal to the
    /// marker are dropped.
    pub fn strip_removals(&self) -> ConfigMap {
        self.entries
            .iter()
            .filter(|(_, value)| !value.is_remove())
            .map(|(key, value)| (key.clone(), strip_value(value)))
            .collect()
    }

    /// Convert to a JSON object. Fails if a removal marker is still present.
    pub fn to_json(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }
}

fn strip_value(value: &ConfigValue) -> ConfigValue {
    match value {
        ConfigValue::Map(map) => ConfigValue::Map(map.strip_removals()),
        ConfigValue::List(items) => ConfigValue::List(
            items
                .iter()
                .filter(|item| !item.is_remove())
                .map(strip_value)
                .collect(),
        ),
        other => other.clone(),
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for ConfigMap {
    type Item = (String, ConfigValue);
    type IntoIter = indexmap::map::IntoIter<String, ConfigValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ConfigMap {
    type Item = (&'a String, &'a ConfigValue);
    type IntoIter = indexmap::map::Iter<'a, String, ConfigValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// Conversions

impl From<Remove> for ConfigValue {
    fn from(_: Remove) -> Self {
        ConfigValue::Remove
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Integer(i)
    }
}

impl From<i32> for ConfigValue {
    fn from(i: i32) -> Self {
        ConfigValue::Integer(i64::from(i))
    }
}

impl From<u32> for ConfigValue {
    fn from(i: u32) -> Self {
        ConfigValue::Integer(i64::from(i))
    }
}

impl From<f64> for ConfigValue {
    fn from(f: f64) -> Self {
        ConfigValue::Float(f)
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(map: ConfigMap) -> Self {
        ConfigValue::Map(map)
    }
}

impl<T: Into<ConfigValue>> From<Vec<T>> for ConfigValue {
    fn from(items: Vec<T>) -> Self {
        ConfigValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ConfigValue>> From<Option<T>> for ConfigValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ConfigValue::Null, Into::into)
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ConfigValue::Null,
            serde_json::Value::Bool(b) => ConfigValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Integer(i),
                None => ConfigValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => ConfigValue::String(s),
            serde_json::Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
            }
            serde_json::Value::Object(object) => ConfigValue::Map(
                object
                    .into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<serde_json::Value> for ConfigMap {
    type Error = ConfigError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match ConfigValue::from(value) {
            ConfigValue::Map(map) => Ok(map),
            other => Err(ConfigError::NotAMap {
                found: other.type_name(),
            }),
        }
    }
}

// Serde

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigValue::Null => serializer.serialize_unit(),
            ConfigValue::Bool(b) => serializer.serialize_bool(*b),
            ConfigValue::Integer(i) => serializer.serialize_i64(*i),
            ConfigValue::Float(f) => serializer.serialize_f64(*f),
            ConfigValue::String(s) => serializer.serialize_str(s),
            ConfigValue::List(items) => items.serialize(serializer),
            ConfigValue::Map(map) => map.serialize(serializer),
            ConfigValue::Remove => Err(S::Error::custom(
                "removal marker cannot be serialized; merge the parameters first",
            )),
        }
    }
}

impl Serialize for ConfigMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(ConfigValue::from)
    }
}

impl<'de> Deserialize<'de> for ConfigMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        ConfigMap::try_from(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_object_keeps_key_order() {
        let map = ConfigMap::try_from(json!({"zeta": 1, "alpha": 2, "mid": 3})).unwrap();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_non_object_is_rejected() {
        let err = ConfigMap::try_from(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ConfigError::NotAMap { found: "list" }));
    }

    #[test]
    fn test_remove_is_not_null() {
        assert_ne!(ConfigValue::from(Remove), ConfigValue::Null);
        assert!(ConfigValue::from(Remove).is_remove());
        assert!(!ConfigValue::Null.is_remove());
    }

    #[test]
    fn test_remove_refuses_to_serialize() {
        let map = ConfigMap::new().with("kpts", Remove);
        let err = map.to_json().unwrap_err();
        assert!(err.to_string().contains("removal marker"));
    }

    #[test]
    fn test_integers_and_floats_survive_json() {
        let map = ConfigMap::try_from(json!({"steps": 200, "tol": 1.0e-5})).unwrap();
        assert_eq!(map.get("steps"), Some(&ConfigValue::Integer(200)));
        assert_eq!(map.get("tol"), Some(&ConfigValue::Float(1.0e-5)));
        assert_eq!(map.to_json().unwrap(), json!({"steps": 200, "tol": 1.0e-5}));
    }

    #[test]
    fn test_get_path() {
        let map = ConfigMap::try_from(json!({"a": {"b": {"c": "deep"}}})).unwrap();
        assert_eq!(map.get_path("a.b.c").and_then(ConfigValue::as_str), Some("deep"));
        assert!(map.get_path("a.x").is_none());
        assert!(map.get_path("a.b.c.d").is_none());
    }

    #[test]
    fn test_insert_path_creates_maps() {
        let mut map = ConfigMap::new();
        map.insert_path("scf.maxiter", 100).unwrap();
        map.insert_path("scf.guess", Remove).unwrap();
        assert_eq!(map.get_path("scf.maxiter"), Some(&ConfigValue::Integer(100)));
        assert!(map.get_path("scf.guess").unwrap().is_remove());
    }

    #[test]
    fn test_insert_path_conflict() {
        let mut map = ConfigMap::new().with("basis", "def2-svp");
        let err = map.insert_path("basis.inner", 1).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::PathConflict { ref path, found: "string" } if path == "basis"
        ));
        assert!(matches!(
            map.insert_path("a..b", 1),
            Err(ConfigError::EmptyKey(_))
        ));
    }

    #[test]
    fn test_remove_shifts_order() {
        let mut map = ConfigMap::new().with("a", 1).with("b", 2).with("c", 3);
        map.remove("a");
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_strip_removals_at_depth() {
        let inner = ConfigMap::new().with("x", Remove).with("y", 2);
        let map = ConfigMap::new()
            .with("a", Remove)
            .with("b", inner)
            .with("c", vec![ConfigValue::Integer(1), ConfigValue::Remove]);

        assert!(map.contains_removals());
        let stripped = map.strip_removals();
        assert!(!stripped.contains_removals());
        assert_eq!(
            stripped.to_json().unwrap(),
            json!({"b": {"y": 2}, "c": [1]})
        );
    }

    #[test]
    fn test_option_converts_to_null() {
        assert_eq!(ConfigValue::from(None::<i64>), ConfigValue::Null);
        assert_eq!(ConfigValue::from(Some("x")), ConfigValue::from("x"));
    }
}

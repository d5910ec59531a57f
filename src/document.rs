//! Document model: ordered documents of dynamically-typed values.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EncodingError;

/// 12-byte object identifier, displayed as 24 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
  pub const fn from_bytes(bytes: [u8; 12]) -> Self {
    Self(bytes)
  }

  pub fn bytes(&self) -> [u8; 12] {
    self.0
  }

  /// Parse a 24-character hex string.
  pub fn parse_str(s: &str) -> Result<Self, hex::FromHexError> {
    let mut bytes = [0u8; 12];
    hex::decode_to_slice(s, &mut bytes)?;
    Ok(Self(bytes))
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }
}

impl fmt::Display for ObjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl Serialize for ObjectId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for ObjectId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    ObjectId::parse_str(&s).map_err(|e| de::Error::custom(format!("invalid object id {s:?}: {e}")))
  }
}

/// A dynamically-typed document value.
///
/// This is a closed set: anything the wire codec can carry is one of these variants.
/// `DateTime` carries millisecond precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
  Null,
  Bool(bool),
  Int64(i64),
  Double(f64),
  String(String),
  Document(Document),
  Array(Vec<Value>),
  Binary(#[serde(with = "serde_bytes")] Vec<u8>),
  DateTime(#[serde(with = "chrono::serde::ts_milliseconds")] DateTime<Utc>),
  ObjectId(ObjectId),
}

impl Value {
  /// Short name of the variant, used in error messages.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Int64(_) => "int64",
      Value::Double(_) => "double",
      Value::String(_) => "string",
      Value::Document(_) => "document",
      Value::Array(_) => "array",
      Value::Binary(_) => "binary",
      Value::DateTime(_) => "datetime",
      Value::ObjectId(_) => "objectId",
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Int64(i) => Some(*i),
      _ => None,
    }
  }

  /// Numeric view; integers are widened.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Double(f) => Some(*f),
      Value::Int64(i) => Some(*i as f64),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_document(&self) -> Option<&Document> {
    match self {
      Value::Document(d) => Some(d),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&[Value]> {
    match self {
      Value::Array(a) => Some(a),
      _ => None,
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int64(i64::from(v))
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int64(v)
  }
}

impl From<u32> for Value {
  fn from(v: u32) -> Self {
    Value::Int64(i64::from(v))
  }
}

impl TryFrom<u64> for Value {
  type Error = EncodingError;

  fn try_from(v: u64) -> Result<Self, Self::Error> {
    i64::try_from(v)
      .map(Value::Int64)
      .map_err(|_| EncodingError::UnsupportedNumber(v.to_string()))
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Double(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::String(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::String(v)
  }
}

impl From<Document> for Value {
  fn from(v: Document) -> Self {
    Value::Document(v)
  }
}

impl From<Vec<Value>> for Value {
  fn from(v: Vec<Value>) -> Self {
    Value::Array(v)
  }
}

impl From<Vec<u8>> for Value {
  fn from(v: Vec<u8>) -> Self {
    Value::Binary(v)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self {
    Value::DateTime(v.trunc_subsecs(3))
  }
}

impl From<ObjectId> for Value {
  fn from(v: ObjectId) -> Self {
    Value::ObjectId(v)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map_or(Value::Null, Into::into)
  }
}

impl TryFrom<serde_json::Value> for Value {
  type Error = EncodingError;

  fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
    Ok(match v {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          Value::Int64(i)
        } else if n.is_u64() {
          // Only u64 values above i64::MAX reach here.
          return Err(EncodingError::UnsupportedNumber(n.to_string()));
        } else {
          match n.as_f64() {
            Some(f) => Value::Double(f),
            None => return Err(EncodingError::UnsupportedNumber(n.to_string())),
          }
        }
      }
      serde_json::Value::String(s) => Value::String(s),
      serde_json::Value::Array(items) => Value::Array(
        items
          .into_iter()
          .map(Value::try_from)
          .collect::<Result<Vec<_>, _>>()?,
      ),
      serde_json::Value::Object(_) => Value::Document(Document::try_from(v)?),
    })
  }
}

impl From<&Value> for serde_json::Value {
  fn from(v: &Value) -> Self {
    match v {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(*b),
      Value::Int64(i) => serde_json::Value::from(*i),
      Value::Double(f) => serde_json::Number::from_f64(*f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null),
      Value::String(s) => serde_json::Value::String(s.clone()),
      Value::Document(d) => serde_json::Value::from(d),
      Value::Array(items) => serde_json::Value::Array(items.iter().map(Into::into).collect()),
      Value::Binary(bytes) => serde_json::Value::String(hex::encode(bytes)),
      Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
      Value::ObjectId(oid) => serde_json::Value::String(oid.to_hex()),
    }
  }
}

/// An ordered mapping from string keys to [`Value`]s.
///
/// Keys keep insertion order. Equality is structural and order-sensitive, so two
/// documents with the same fields in a different order are not equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
  entries: Vec<(String, Value)>,
}

impl Document {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  ///
  /// ```
  /// use lodestone::Document;
  ///
  /// let filter = Document::new().with("name", "Maple Latte");
  /// assert_eq!(filter.get_str("name"), Some("Maple Latte"));
  /// ```
  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(key, value);
    self
  }

  /// Insert a field. An existing key keeps its position and the old value is returned.
  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
    let key = key.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some((_, slot)) => Some(std::mem::replace(slot, value)),
      None => {
        self.entries.push((key, value));
        None
      }
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.get(key).and_then(Value::as_str)
  }

  pub fn get_i64(&self, key: &str) -> Option<i64> {
    self.get(key).and_then(Value::as_i64)
  }

  pub fn get_document(&self, key: &str) -> Option<&Document> {
    self.get(key).and_then(Value::as_document)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.get(key).is_some()
  }

  pub fn remove(&mut self, key: &str) -> Option<Value> {
    let idx = self.entries.iter().position(|(k, _)| k == key)?;
    Some(self.entries.remove(idx).1)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(k, _)| k.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v))
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut doc = Document::new();
    for (k, v) in iter {
      doc.insert(k, v);
    }
    doc
  }
}

impl IntoIterator for Document {
  type Item = (String, Value);
  type IntoIter = std::vec::IntoIter<(String, Value)>;

  fn into_iter(self) -> Self::IntoIter {
    self.entries.into_iter()
  }
}

impl TryFrom<serde_json::Value> for Document {
  type Error = EncodingError;

  fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
    match v {
      serde_json::Value::Object(map) => {
        let mut doc = Document::new();
        for (k, v) in map {
          doc.insert(k, Value::try_from(v)?);
        }
        Ok(doc)
      }
      other => Err(EncodingError::NotADocument(json_kind(&other))),
    }
  }
}

impl From<&Document> for serde_json::Value {
  fn from(doc: &Document) -> Self {
    let map = doc
      .iter()
      .map(|(k, v)| (k.to_string(), serde_json::Value::from(v)))
      .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
  }
}

impl fmt::Display for Document {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", serde_json::Value::from(self))
  }
}

impl Serialize for Document {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.entries.len()))?;
    for (k, v) in &self.entries {
      map.serialize_entry(k, v)?;
    }
    map.end()
  }
}

impl<'de> Deserialize<'de> for Document {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct DocumentVisitor;

    impl<'de> Visitor<'de> for DocumentVisitor {
      type Value = Document;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of string keys to values")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Document, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
          entries.push((k, v));
        }
        let mut doc = Document { entries: Vec::with_capacity(entries.len()) };
        for (k, v) in entries {
          doc.insert(k, v);
        }
        Ok(doc)
      }
    }

    deserializer.deserialize_map(DocumentVisitor)
  }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
  match v {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "bool",
    serde_json::Value::Number(_) => "number",
    serde_json::Value::String(_) => "string",
    serde_json::Value::Array(_) => "array",
    serde_json::Value::Object(_) => "object",
  }
}

//! Transport-independent view of bus message payloads.

/// A decoded bus value. Variants are unwrapped during conversion, so a
/// `v` containing a string is just [`BusValue::Str`].
#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    Str(String),
    ObjectPath(String),
    Array(Vec<BusValue>),
    /// Dictionary entries in message order.
    Dict(Vec<(String, BusValue)>),
    Struct(Vec<BusValue>),
    /// Numbers, booleans and anything else not inspected here.
    Scalar(String),
}

impl BusValue {
    pub fn str(s: impl Into<String>) -> Self {
        BusValue::Str(s.into())
    }

    pub fn path(p: impl Into<String>) -> Self {
        BusValue::ObjectPath(p.into())
    }

    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, BusValue)>,
    {
        BusValue::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BusValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object_path(&self) -> Option<&str> {
        match self {
            BusValue::ObjectPath(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[BusValue]> {
        match self {
            BusValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[BusValue]> {
        match self {
            BusValue::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Look up a dictionary entry by key. First match wins.
    pub fn get(&self, key: &str) -> Option<&BusValue> {
        match self {
            BusValue::Dict(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

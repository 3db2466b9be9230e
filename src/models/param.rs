//! Typed bind parameters.
//!
//! `SqlParam` is the single value type that flows into statement markers.
//! It is deliberately small: the drivers covered here agree on null, bool,
//! integer, float and text. Callers with richer types serialize at the
//! boundary.

use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

/// A value bound to a statement marker.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    /// Derive a bind parameter from a generic row value.
    ///
    /// Non-scalar JSON values (arrays, objects) are bound as their JSON text,
    /// matching how the drivers without a native JSON type store them.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlParam::Null,
            JsonValue::Bool(b) => SqlParam::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlParam::Int(i)
                } else {
                    SqlParam::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }

    /// Flatten call-time arguments one level: an array argument contributes
    /// each of its elements as a positional parameter.
    pub fn flatten(args: &[JsonValue]) -> Vec<SqlParam> {
        let mut params = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                JsonValue::Array(items) => {
                    params.extend(items.iter().map(SqlParam::from_json));
                }
                other => params.push(SqlParam::from_json(other)),
            }
        }
        params
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(v as i64)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

/// A settable cell bound to a marker whose value is read at execute time,
/// not at bind time. This is the "bind by reference" counterpart to the
/// eager `bind_value`.
#[derive(Debug, Clone)]
pub struct SharedParam {
    inner: Arc<Mutex<SqlParam>>,
}

impl SharedParam {
    pub fn new(value: impl Into<SqlParam>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value.into())),
        }
    }

    /// Replace the held value; the next execute sees the new value.
    pub fn set(&self, value: impl Into<SqlParam>) {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = value.into();
    }

    /// Snapshot the current value.
    pub fn get(&self) -> SqlParam {
        match self.inner.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

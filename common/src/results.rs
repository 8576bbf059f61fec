use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Metadatos libres de progreso (`{"current": 1, "total": 10}`, etc.).
pub type ProgressMeta = Map<String, Value>;

/// Metadatos estándar de "paso N de M".
pub fn step_meta(current: u64, total: u64) -> ProgressMeta {
    let mut meta = Map::new();
    meta.insert("current".into(), Value::from(current));
    meta.insert("total".into(), Value::from(total));
    meta
}

/// Resultado de una computación terminada con éxito.
///
/// Se serializa sin etiqueta: un escalar 3 viaja como `3`, un registro como
/// objeto JSON y un texto como string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobValue {
    Scalar(Number),
    Structured(Map<String, Value>),
    Text(String),
}

impl From<i64> for JobValue {
    fn from(n: i64) -> Self {
        JobValue::Scalar(Number::from(n))
    }
}

impl From<String> for JobValue {
    fn from(s: String) -> Self {
        JobValue::Text(s)
    }
}

impl From<&str> for JobValue {
    fn from(s: &str) -> Self {
        JobValue::Text(s.to_string())
    }
}

impl From<Map<String, Value>> for JobValue {
    fn from(m: Map<String, Value>) -> Self {
        JobValue::Structured(m)
    }
}

impl fmt::Display for JobValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobValue::Scalar(n) => write!(f, "{n}"),
            JobValue::Text(s) => f.write_str(s),
            JobValue::Structured(m) => {
                let rendered = serde_json::to_string(m).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context};

/// One item of input data: field name (lower-cased) to scalar or nested list of records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(String),
    List(Vec<Record>),
}

impl Value {
    /// Absent-equivalent: empty text or an empty list.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Scalar(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(s)
    }
}

impl From<Vec<Record>> for Value {
    fn from(items: Vec<Record>) -> Self {
        Value::List(items)
    }
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    /// Later inserts of the same (case-folded) name replace earlier ones.
    pub fn insert(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| self.fields.get(&name.to_lowercase()))
    }

    pub fn list(&self, name: &str) -> Option<&[Record]> {
        match self.get(name)? {
            Value::List(items) => Some(items.as_slice()),
            Value::Scalar(_) => None,
        }
    }

    pub fn is_blank(&self, name: &str) -> bool {
        self.get(name).map_or(true, Value::is_blank)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn scalar_names(&self) -> BTreeSet<String> {
        self.fields
            .iter()
            .filter(|(_, v)| matches!(v, Value::Scalar(_)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn list_names(&self) -> BTreeSet<String> {
        self.fields
            .iter()
            .filter(|(_, v)| matches!(v, Value::List(_)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The top level of a data document must be a mapping.
    pub fn from_json_value(value: serde_json::Value) -> anyhow::Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(record_from_map(map)),
            other => Err(anyhow!(
                "record data must be a mapping at the top level, found {}",
                json_kind(&other)
            )),
        }
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text).context("parse yaml record")?;
        Self::from_json_value(yaml_to_json(value)?)
    }

    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).context("parse json record")?;
        Self::from_json_value(value)
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let value: serde_json::Value = toml::from_str(text).context("parse toml record")?;
        Self::from_json_value(value)
    }
}

pub fn load_record(path: &Path) -> anyhow::Result<Record> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read record data: {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let record = match ext.as_str() {
        "yaml" | "yml" => Record::from_yaml_str(&text),
        "json" => Record::from_json_str(&text),
        "toml" => Record::from_toml_str(&text),
        other => Err(anyhow!(
            "unsupported record data extension '{other}' (expected yaml, yml, json or toml)"
        )),
    };
    record.with_context(|| format!("load record data: {}", path.display()))
}

fn record_from_map(map: serde_json::Map<String, serde_json::Value>) -> Record {
    let mut record = Record::new();
    for (key, value) in map {
        if let Some(v) = convert(&key, value) {
            record.insert(&key, v);
        }
    }
    record
}

fn convert(key: &str, value: serde_json::Value) -> Option<Value> {
    use serde_json::Value as J;
    match value {
        J::Null => None,
        J::String(s) => Some(Value::Scalar(s)),
        J::Bool(b) => Some(Value::Scalar(b.to_string())),
        J::Number(n) => Some(Value::Scalar(n.to_string())),
        J::Object(map) => Some(Value::List(vec![record_from_map(map)])),
        J::Array(items) => {
            let records = items
                .into_iter()
                .filter_map(|item| match item {
                    J::Object(map) => Some(record_from_map(map)),
                    J::Null => None,
                    scalar => convert(key, scalar).map(|v| Record::new().with(key, v)),
                })
                .collect();
            Some(Value::List(records))
        }
    }
}

/// YAML mappings may use numbers or booleans as keys (`2019: Acme`); those keys become their
/// text form. Tags are dropped.
fn yaml_to_json(value: serde_yaml::Value) -> anyhow::Result<serde_json::Value> {
    use serde_json::Value as J;
    use serde_yaml::Value as Y;
    Ok(match value {
        Y::Null => J::Null,
        Y::Bool(b) => J::Bool(b),
        Y::Number(n) => serde_json::to_value(&n).context("yaml number")?,
        Y::String(s) => J::String(s),
        Y::Sequence(items) => J::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        Y::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                let key = match key {
                    Y::String(s) => s,
                    Y::Number(n) => n.to_string(),
                    Y::Bool(b) => b.to_string(),
                    other => {
                        return Err(anyhow!("unsupported mapping key in record data: {other:?}"))
                    }
                };
                out.insert(key, yaml_to_json(value)?);
            }
            J::Object(out)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a sequence",
        serde_json::Value::Object(_) => "a mapping",
    }
}

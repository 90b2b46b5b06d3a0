use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{EngineError, Result};

/// One concrete assignment of grid parameters. Keys are dotted paths into
/// the strategy document; the BTreeMap keeps serialization canonical, which
/// the optimizer cache relies on.
pub type Combination = BTreeMap<String, Value>;

/// A map from parameter path to candidate values, e.g.
/// `{"riskManagement.stopLoss.atrMultiplier": [1.0, 1.5, 2.0]}`.
/// Paths address nested objects with dots; an `analyzers.<name>.<field>`
/// segment selects the array element whose `name` matches.
#[derive(Debug, Clone)]
pub struct ParameterGrid {
    params: BTreeMap<String, Vec<Value>>,
}

impl ParameterGrid {
    pub fn new(params: BTreeMap<String, Vec<Value>>) -> Self {
        Self { params }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let params: BTreeMap<String, Vec<Value>> = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid parameter grid: {e}")))?;
        if params.values().any(|values| values.is_empty()) {
            return Err(EngineError::Config(
                "parameter grid has an empty value list".to_string(),
            ));
        }
        Ok(Self { params })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read grid file {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of combinations in the full Cartesian product.
    pub fn combination_count(&self) -> usize {
        if self.params.is_empty() {
            return 0;
        }
        self.params.values().map(|v| v.len()).product()
    }

    /// The full Cartesian product, in stable order: parameters sorted by
    /// name, values in their declared order.
    pub fn combinations(&self) -> Vec<Combination> {
        if self.params.is_empty() {
            return Vec::new();
        }
        let keys: Vec<&String> = self.params.keys().collect();
        let mut out = vec![Combination::new()];
        for key in keys {
            let values = &self.params[key];
            let mut next = Vec::with_capacity(out.len() * values.len());
            for combo in &out {
                for value in values {
                    let mut extended = combo.clone();
                    extended.insert(key.clone(), value.clone());
                    next.push(extended);
                }
            }
            out = next;
        }
        out
    }
}

/// Overwrite the named parameters on a deep clone of `base`.
pub fn apply_combination(base: &Value, combination: &Combination) -> Result<Value> {
    let mut document = base.clone();
    for (path, value) in combination {
        set_path(&mut document, path, value.clone())?;
    }
    Ok(document)
}

fn set_path(document: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = document;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        current = match current {
            Value::Object(map) => {
                if last {
                    map.insert((*segment).to_string(), value);
                    return Ok(());
                }
                map.get_mut(*segment).ok_or_else(|| {
                    EngineError::Config(format!("grid path '{path}': unknown field '{segment}'"))
                })?
            }
            Value::Array(items) => {
                let found = if let Ok(index) = segment.parse::<usize>() {
                    items.get_mut(index)
                } else {
                    items
                        .iter_mut()
                        .find(|item| item.get("name").and_then(Value::as_str) == Some(*segment))
                };
                let item = found.ok_or_else(|| {
                    EngineError::Config(format!(
                        "grid path '{path}': no array element '{segment}'"
                    ))
                })?;
                if last {
                    return Err(EngineError::Config(format!(
                        "grid path '{path}' ends on an array element"
                    )));
                }
                item
            }
            _ => {
                return Err(EngineError::Config(format!(
                    "grid path '{path}': '{segment}' is not an object"
                )))
            }
        };
    }
    Ok(())
}

/// Canonical cache key: BTreeMap keys serialize sorted.
pub fn combination_key(combination: &Combination) -> String {
    serde_json::to_string(combination).unwrap_or_default()
}

//! Search space definitions and configuration values.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::errors::{HpoResult, SpaceError};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

/// How a parameter looks once mapped into model coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// A coordinate in `[0, 1]`.
    Continuous,
    /// A choice index in `0..choices`.
    Categorical { choices: usize },
}

impl ParameterKind {
    pub fn unit_kind(&self) -> UnitKind {
        match self {
            Self::Choice { values } => UnitKind::Categorical {
                choices: values.len(),
            },
            _ => UnitKind::Continuous,
        }
    }
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    // Int before Float so whole numbers survive a JSON round trip.
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Float(v) => serde_json::json!(v),
            Self::Int(v) => serde_json::json!(v),
            Self::Json(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One point of the search space, keyed by parameter name.
pub type Configuration = HashMap<String, ParameterValue>;

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Model-coordinate kinds, in parameter order.
    pub fn unit_kinds(&self) -> Vec<UnitKind> {
        self.parameters.iter().map(|p| p.kind.unit_kind()).collect()
    }

    /// Reject spaces no strategy can sample from.
    pub fn validate(&self) -> HpoResult<()> {
        if self.parameters.is_empty() {
            return Err(SpaceError::Empty.into());
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(SpaceError::DuplicateName {
                    name: param.name.clone(),
                }
                .into());
            }
            match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    if !(low.is_finite() && high.is_finite() && low < high) {
                        return Err(SpaceError::InvalidRange {
                            name: param.name.clone(),
                            low: *low,
                            high: *high,
                        }
                        .into());
                    }
                }
                ParameterKind::IntRange { low, high } => {
                    if low > high {
                        return Err(SpaceError::InvalidRange {
                            name: param.name.clone(),
                            low: *low as f64,
                            high: *high as f64,
                        }
                        .into());
                    }
                }
                ParameterKind::LogUniform { low, high } => {
                    if !(*low > 0.0 && high.is_finite() && low < high) {
                        return Err(SpaceError::InvalidLogRange {
                            name: param.name.clone(),
                            low: *low,
                            high: *high,
                        }
                        .into());
                    }
                }
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return Err(SpaceError::EmptyChoice {
                            name: param.name.clone(),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Draw one configuration uniformly (log-uniformly for log ranges).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Configuration {
        let mut params = HashMap::new();

        for param in &self.parameters {
            let value = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    ParameterValue::Float(rng.random_range(*low..=*high))
                }
                ParameterKind::IntRange { low, high } => {
                    ParameterValue::Int(rng.random_range(*low..=*high))
                }
                ParameterKind::LogUniform { low, high } => {
                    let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                    ParameterValue::Float(log_val.exp())
                }
                ParameterKind::Choice { values } => {
                    let idx = rng.random_range(0..values.len());
                    ParameterValue::Json(values[idx].clone())
                }
            };
            params.insert(param.name.clone(), value);
        }

        params
    }

    /// Map a configuration into model coordinates: `[0, 1]` for numeric
    /// parameters, the choice index for categorical ones.
    pub fn encode(&self, config: &Configuration) -> HpoResult<Vec<f64>> {
        self.parameters
            .iter()
            .map(|param| {
                let value = config.get(&param.name).ok_or_else(|| SpaceError::MissingValue {
                    name: param.name.clone(),
                })?;
                let mismatch = || SpaceError::ValueMismatch {
                    name: param.name.clone(),
                    value: value.to_string(),
                };
                let unit = match &param.kind {
                    ParameterKind::FloatRange { low, high } => {
                        let v = value.as_f64().ok_or_else(mismatch)?;
                        ((v - low) / (high - low)).clamp(0.0, 1.0)
                    }
                    ParameterKind::IntRange { low, high } => {
                        let v = value.as_i64().ok_or_else(mismatch)?;
                        let width = (high - low + 1) as f64;
                        (((v - low) as f64 + 0.5) / width).clamp(0.0, 1.0)
                    }
                    ParameterKind::LogUniform { low, high } => {
                        let v = value.as_f64().filter(|v| *v > 0.0).ok_or_else(mismatch)?;
                        ((v.ln() - low.ln()) / (high.ln() - low.ln())).clamp(0.0, 1.0)
                    }
                    ParameterKind::Choice { values } => {
                        let needle = value.to_json();
                        values
                            .iter()
                            .position(|v| *v == needle)
                            .ok_or_else(mismatch)? as f64
                    }
                };
                Ok(unit)
            })
            .collect()
    }

    /// Inverse of [`SearchSpace::encode`]. Out-of-range coordinates are
    /// clamped onto the space.
    pub fn decode(&self, point: &[f64]) -> Configuration {
        self.parameters
            .iter()
            .zip(point)
            .map(|(param, &u)| {
                let value = match &param.kind {
                    ParameterKind::FloatRange { low, high } => {
                        ParameterValue::Float(low + u.clamp(0.0, 1.0) * (high - low))
                    }
                    ParameterKind::IntRange { low, high } => {
                        let width = (high - low + 1) as f64;
                        let offset = (u.clamp(0.0, 1.0) * width).floor() as i64;
                        ParameterValue::Int((low + offset).min(*high))
                    }
                    ParameterKind::LogUniform { low, high } => {
                        let log_val = low.ln() + u.clamp(0.0, 1.0) * (high.ln() - low.ln());
                        ParameterValue::Float(log_val.exp().clamp(*low, *high))
                    }
                    ParameterKind::Choice { values } => {
                        let idx = (u.round().max(0.0) as usize).min(values.len() - 1);
                        ParameterValue::Json(values[idx].clone())
                    }
                };
                (param.name.clone(), value)
            })
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

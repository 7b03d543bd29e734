//! AU mapping
//!
//! Evaluates a configured tree of mapping rules against named blendshape
//! scores to produce raw action unit intensities. AUs are evaluated once each,
//! in declaration order; `reference` mappings read AUs computed earlier in the
//! same call, so forward references resolve to 0.

use crate::error::ComputeError;
use crate::types::{ActionUnits, OrderedMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single mapping rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuMapping {
    /// Sum of the named blendshape scores
    Direct { blendshapes: Vec<String> },
    /// Mean of the named blendshape scores (0 for an empty list)
    Average { blendshapes: Vec<String> },
    /// Value of an AU computed earlier in the same evaluation
    Reference { source: String },
    /// `base * multiplier + Σ addition.source * addition.multiplier`
    Composite {
        base: Box<AuMapping>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        multiplier: Option<f64>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        additions: Vec<Addition>,
    },
    /// Any unrecognised `type`; always evaluates to 0
    #[serde(other)]
    Unknown,
}

/// Additive term of a composite mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addition {
    pub source: AdditionSource,
    pub multiplier: f64,
}

/// Addition source: an AU name or a nested mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionSource {
    Reference(String),
    Mapping(Box<AuMapping>),
}

/// Problems found when linting a mapping tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingIssue {
    /// The AU reads itself; always 0
    SelfReference { au: String },
    /// The AU reads one declared later; resolves to 0
    ForwardReference { au: String, target: String },
    /// The AU reads a name that is never declared; resolves to 0
    UnknownReference { au: String, target: String },
}

impl MappingIssue {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MappingIssue::SelfReference { .. })
    }
}

impl fmt::Display for MappingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingIssue::SelfReference { au } => write!(f, "{au} references itself"),
            MappingIssue::ForwardReference { au, target } => {
                write!(f, "{au} references {target}, which is declared later")
            }
            MappingIssue::UnknownReference { au, target } => {
                write!(f, "{au} references undeclared {target}")
            }
        }
    }
}

/// Ordered AU mapping configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub mappings: OrderedMap<AuMapping>,
}

impl MappingConfig {
    /// Bundled default mapping for MediaPipe blendshapes
    pub fn bundled() -> Result<Self, ComputeError> {
        Self::from_json(include_str!("../config/au_mappings.json"))
    }

    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Report references that cannot resolve to a computed AU
    pub fn lint(&self) -> Vec<MappingIssue> {
        let mut issues = Vec::new();

        for (position, (au, mapping)) in self.mappings.iter().enumerate() {
            let mut targets = Vec::new();
            collect_references(mapping, &mut targets);

            for target in targets {
                if target == au {
                    issues.push(MappingIssue::SelfReference { au: au.to_string() });
                    continue;
                }
                match self.mappings.position(target) {
                    Some(idx) if idx < position => {}
                    Some(_) => issues.push(MappingIssue::ForwardReference {
                        au: au.to_string(),
                        target: target.to_string(),
                    }),
                    None => issues.push(MappingIssue::UnknownReference {
                        au: au.to_string(),
                        target: target.to_string(),
                    }),
                }
            }
        }

        issues
    }
}

fn collect_references<'a>(mapping: &'a AuMapping, out: &mut Vec<&'a str>) {
    match mapping {
        AuMapping::Reference { source } => out.push(source),
        AuMapping::Composite { base, additions, .. } => {
            collect_references(base, out);
            for addition in additions {
                match &addition.source {
                    AdditionSource::Reference(name) => out.push(name),
                    AdditionSource::Mapping(nested) => collect_references(nested, out),
                }
            }
        }
        AuMapping::Direct { .. } | AuMapping::Average { .. } | AuMapping::Unknown => {}
    }
}

/// Compute raw AU intensities from blendshape scores
pub fn compute_aus(blendshapes: &HashMap<String, f64>, config: &MappingConfig) -> ActionUnits {
    let mut aus = ActionUnits::new();
    for (au, mapping) in config.mappings.iter() {
        let value = evaluate(mapping, blendshapes, &aus);
        aus.insert(au.to_string(), value);
    }
    aus
}

fn evaluate(mapping: &AuMapping, bs: &HashMap<String, f64>, computed: &ActionUnits) -> f64 {
    match mapping {
        AuMapping::Direct { blendshapes } => blendshapes.iter().map(|name| score(bs, name)).sum(),
        AuMapping::Average { blendshapes } => {
            if blendshapes.is_empty() {
                return 0.0;
            }
            let sum: f64 = blendshapes.iter().map(|name| score(bs, name)).sum();
            sum / blendshapes.len() as f64
        }
        AuMapping::Reference { source } => computed.get(source).copied().unwrap_or(0.0),
        AuMapping::Composite {
            base,
            multiplier,
            additions,
        } => {
            let mut value = evaluate(base, bs, computed);
            if let Some(m) = multiplier {
                value *= m;
            }
            for addition in additions {
                let term = match &addition.source {
                    AdditionSource::Reference(name) => computed.get(name).copied().unwrap_or(0.0),
                    AdditionSource::Mapping(nested) => evaluate(nested, bs, computed),
                };
                value += term * addition.multiplier;
            }
            value
        }
        AuMapping::Unknown => 0.0,
    }
}

fn score(bs: &HashMap<String, f64>, name: &str) -> f64 {
    bs.get(name).copied().filter(|v| !v.is_nan()).unwrap_or(0.0)
}

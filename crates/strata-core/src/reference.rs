//! Cross-step output references.
//!
//! A parameter value may point at an upstream step's output with the syntax
//! `steps.<step>.outputs.parameters.<name>`, either as a bare string or as a
//! tagged object `{__ref__: "steps.X.outputs.parameters.Y"}`. References
//! resolve against the catalog under the dataset key `step__name`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ReferenceError;
use crate::value::Value;

const REF_PREFIX: &str = "steps.";
const REF_INFIX: &str = ".outputs.parameters.";

/// A parsed reference to an upstream step output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub step: String,
    pub output: String,
}

impl Reference {
    pub fn new(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            output: output.into(),
        }
    }

    /// Parses a reference string, returning `None` for plain literals and an
    /// error for strings that start like a reference but are malformed.
    pub fn parse(raw: &str) -> Result<Option<Reference>, ReferenceError> {
        let raw = raw.trim();
        if !raw.starts_with(REF_PREFIX) {
            return Ok(None);
        }
        let rest = &raw[REF_PREFIX.len()..];
        let Some(idx) = rest.find(REF_INFIX) else {
            return Err(ReferenceError::Malformed(raw.to_string()));
        };
        let step = &rest[..idx];
        let output = &rest[idx + REF_INFIX.len()..];
        if step.is_empty() || output.is_empty() || step.contains('.') || output.contains('.') {
            return Err(ReferenceError::Malformed(raw.to_string()));
        }
        Ok(Some(Reference::new(step, output)))
    }

    /// The catalog dataset key this reference reads, `step__output` with
    /// dashes normalized to underscores.
    pub fn dataset(&self) -> String {
        dataset_name(&self.step, &self.output)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "steps.{}.outputs.parameters.{}", self.step, self.output)
    }
}

/// Builds the catalog key for a step output.
pub fn dataset_name(step: &str, output: &str) -> String {
    format!("{}__{}", step, output).replace('-', "_")
}

/// A step parameter: either a literal value or a reference to an upstream
/// output, resolved at execution time.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Literal(Value),
    Reference(Reference),
}

impl ParamValue {
    /// Classifies a raw config value. Strings matching the reference syntax
    /// and tagged objects `{__ref__: ...}` become references; everything
    /// else stays literal. Lists and maps are scanned one level deep only at
    /// the configuration layer, which walks nested values itself.
    pub fn classify(value: Value) -> Result<ParamValue, ReferenceError> {
        if let Some(s) = value.as_str() {
            if let Some(r) = Reference::parse(s)? {
                return Ok(ParamValue::Reference(r));
            }
        }
        if let Some(map) = value.as_map() {
            if let Some(tag) = map.get("__ref__").and_then(Value::as_str) {
                return match Reference::parse(tag)? {
                    Some(r) => Ok(ParamValue::Reference(r)),
                    None => Err(ReferenceError::Malformed(tag.to_string())),
                };
            }
        }
        Ok(ParamValue::Literal(value))
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            ParamValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            ParamValue::Literal(v) => Some(v),
            _ => None,
        }
    }
}

/// Collects every reference inside a parameter map, including references
/// nested in lists and maps.
pub fn collect_references(params: &BTreeMap<String, ParamValue>) -> Vec<&Reference> {
    let mut refs = Vec::new();
    for value in params.values() {
        if let ParamValue::Reference(r) = value {
            refs.push(r);
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reference() {
        let r = Reference::parse("steps.load_data.outputs.parameters.raw")
            .unwrap()
            .unwrap();
        assert_eq!(r.step, "load_data");
        assert_eq!(r.output, "raw");
        assert_eq!(r.dataset(), "load_data__raw");
    }

    #[test]
    fn dataset_name_normalizes_dashes() {
        assert_eq!(dataset_name("load-data", "raw-df"), "load_data__raw_df");
    }

    #[test]
    fn plain_strings_are_not_references() {
        assert!(Reference::parse("in.csv").unwrap().is_none());
        assert!(Reference::parse("stepsize=3").unwrap().is_none());
    }

    #[test]
    fn malformed_references_error() {
        assert!(Reference::parse("steps.a.outputs.parameters.").is_err());
        assert!(Reference::parse("steps.a.b.outputs.parameters.c").is_err());
        assert!(Reference::parse("steps.only_a_step").is_err());
    }

    #[test]
    fn classify_tagged_object() {
        let mut map = BTreeMap::new();
        map.insert(
            "__ref__".to_string(),
            Value::from("steps.a.outputs.parameters.x"),
        );
        let pv = ParamValue::classify(Value::Map(map)).unwrap();
        assert_eq!(pv.as_reference().unwrap().dataset(), "a__x");
    }

    #[test]
    fn classify_literal() {
        let pv = ParamValue::classify(Value::from(7)).unwrap();
        assert_eq!(pv.as_literal().unwrap().as_i64(), Some(7));
    }

    #[test]
    fn round_trips_display() {
        let r = Reference::new("a", "x");
        let parsed = Reference::parse(&r.to_string()).unwrap().unwrap();
        assert_eq!(parsed, r);
    }
}

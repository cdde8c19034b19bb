//! Ontology schema models
//!
//! The schema is the vocabulary the extractor is allowed to use: classes,
//! object properties between individuals and data properties carrying
//! scalar values. Only name existence and simple value typing are checked.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fact::ScalarValue;
use crate::{OntofillError, Result};

/// Ontology class definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyClass {
    /// Class name (e.g., "Country")
    pub name: String,

    /// Parent class (for inheritance)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Extra guidance shown next to the class name in prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Hidden classes are valid targets but are not offered to the model
    #[serde(default)]
    pub hidden: bool,
}

impl OntologyClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            hint: None,
            hidden: false,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Object property relating individuals of domain classes to individuals of
/// range classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectProperty {
    pub name: String,

    #[serde(default)]
    pub domain: Vec<String>,

    #[serde(default)]
    pub range: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    #[serde(default)]
    pub hidden: bool,
}

impl ObjectProperty {
    pub fn new(name: impl Into<String>, domain: Vec<&str>, range: Vec<&str>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into_iter().map(String::from).collect(),
            range: range.into_iter().map(String::from).collect(),
            hint: None,
            hidden: false,
        }
    }
}

/// Data property attaching a scalar value to individuals of domain classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProperty {
    pub name: String,

    #[serde(default)]
    pub domain: Vec<String>,

    /// Value type
    pub range: DataType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    #[serde(default)]
    pub hidden: bool,
}

impl DataProperty {
    pub fn new(name: impl Into<String>, domain: Vec<&str>, range: DataType) -> Self {
        Self {
            name: name.into(),
            domain: domain.into_iter().map(String::from).collect(),
            range,
            hint: None,
            hidden: false,
        }
    }
}

/// Data types supported for data property values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }

    /// Whether a value may be stored under a property of this type.
    /// Integers are accepted where floats are expected.
    pub fn accepts(&self, value: &ScalarValue) -> bool {
        match (self, value) {
            (Self::String, ScalarValue::Text(_)) => true,
            (Self::Integer, ScalarValue::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Float, ScalarValue::Number(_)) => true,
            (Self::Boolean, ScalarValue::Bool(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Schema
// ============================================================================

/// The full ontology vocabulary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologySchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub classes: Vec<OntologyClass>,

    #[serde(default)]
    pub object_properties: Vec<ObjectProperty>,

    #[serde(default)]
    pub data_properties: Vec<DataProperty>,
}

impl OntologySchema {
    /// Load a schema from a JSON or TOML file (chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OntofillError::InvalidOntology(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content, path)
    }

    /// Parse schema content; TOML when the path ends in `.toml`, JSON otherwise
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let schema: Self = if is_toml {
            toml::from_str(content)
                .map_err(|e| OntofillError::InvalidOntology(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_str(content)
                .map_err(|e| OntofillError::InvalidOntology(format!("{}: {e}", path.display())))?
        };

        schema.check_names()?;
        Ok(schema)
    }

    /// Reject duplicate names within each vocabulary
    pub fn check_names(&self) -> Result<()> {
        fn check<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
            let mut seen = HashSet::new();
            for name in names {
                if name.trim().is_empty() {
                    return Err(OntofillError::InvalidOntology(format!("empty {kind} name")));
                }
                if !seen.insert(name) {
                    return Err(OntofillError::InvalidOntology(format!(
                        "duplicate {kind} '{name}'"
                    )));
                }
            }
            Ok(())
        }

        check("class", self.classes.iter().map(|c| c.name.as_str()))?;
        check(
            "object property",
            self.object_properties.iter().map(|p| p.name.as_str()),
        )?;
        check(
            "data property",
            self.data_properties.iter().map(|p| p.name.as_str()),
        )
    }

    pub fn class(&self, name: &str) -> Option<&OntologyClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn object_property(&self, name: &str) -> Option<&ObjectProperty> {
        self.object_properties.iter().find(|p| p.name == name)
    }

    pub fn data_property(&self, name: &str) -> Option<&DataProperty> {
        self.data_properties.iter().find(|p| p.name == name)
    }

    /// The class itself followed by its parent chain. Stops at unknown
    /// parents and at cycles.
    pub fn ancestors(&self, name: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.class(name);

        while let Some(class) = current {
            if chain.contains(&class.name.as_str()) {
                break;
            }
            chain.push(class.name.as_str());
            current = class.parent.as_deref().and_then(|p| self.class(p));
        }

        chain
    }

    /// Whether `class` is one of `candidates` or inherits from one of them
    pub fn is_subclass_of_any(&self, class: &str, candidates: &[String]) -> bool {
        self.ancestors(class)
            .iter()
            .any(|a| candidates.iter().any(|c| c == a))
    }

    /// Classes offered to the model
    pub fn visible_classes(&self) -> impl Iterator<Item = &OntologyClass> {
        self.classes.iter().filter(|c| !c.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo_schema() -> OntologySchema {
        OntologySchema {
            name: Some("geo".to_string()),
            classes: vec![
                OntologyClass::new("Place"),
                OntologyClass::new("Country").with_parent("Place"),
                OntologyClass::new("Lake").with_parent("Place"),
                OntologyClass::new("Internal").hidden(),
            ],
            object_properties: vec![ObjectProperty::new(
                "hasBorder",
                vec!["Country"],
                vec!["Country"],
            )],
            data_properties: vec![DataProperty::new(
                "population",
                vec!["Country"],
                DataType::Integer,
            )],
        }
    }

    #[test]
    fn test_ancestors_follow_parent_chain() {
        let schema = geo_schema();
        assert_eq!(schema.ancestors("Country"), vec!["Country", "Place"]);
        assert!(schema.ancestors("Unknown").is_empty());
    }

    #[test]
    fn test_ancestors_stop_on_cycle() {
        let schema = OntologySchema {
            classes: vec![
                OntologyClass::new("A").with_parent("B"),
                OntologyClass::new("B").with_parent("A"),
            ],
            ..Default::default()
        };
        assert_eq!(schema.ancestors("A"), vec!["A", "B"]);
    }

    #[test]
    fn test_is_subclass_of_any() {
        let schema = geo_schema();
        assert!(schema.is_subclass_of_any("Lake", &["Place".to_string()]));
        assert!(!schema.is_subclass_of_any("Place", &["Lake".to_string()]));
    }

    #[test]
    fn test_data_type_accepts() {
        assert!(DataType::Integer.accepts(&ScalarValue::from(42_i64)));
        assert!(!DataType::Integer.accepts(
            &ScalarValue::from_json(&serde_json::json!(4.5)).unwrap()
        ));
        assert!(DataType::Float.accepts(&ScalarValue::from(42_i64)));
        assert!(DataType::String.accepts(&ScalarValue::from("x")));
        assert!(!DataType::Boolean.accepts(&ScalarValue::from("true")));
    }

    #[test]
    fn test_parse_json_and_toml() {
        let json = r#"{
            "classes": [{"name": "Country"}],
            "data_properties": [{"name": "square", "domain": ["Country"], "range": "float"}]
        }"#;
        let schema = OntologySchema::parse(json, Path::new("geo.json")).unwrap();
        assert_eq!(schema.classes.len(), 1);
        assert_eq!(schema.data_property("square").unwrap().range, DataType::Float);

        let toml_src = r#"
            [[classes]]
            name = "River"
            hint = "only named rivers"
        "#;
        let schema = OntologySchema::parse(toml_src, Path::new("geo.toml")).unwrap();
        assert_eq!(
            schema.class("River").unwrap().hint.as_deref(),
            Some("only named rivers")
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"{"classes": [{"name": "Country"}, {"name": "Country"}]}"#;
        assert!(OntologySchema::parse(json, Path::new("geo.json")).is_err());
    }

    #[test]
    fn test_visible_classes_skip_hidden() {
        let schema = geo_schema();
        let names: Vec<_> = schema.visible_classes().map(|c| c.name.as_str()).collect();
        assert!(!names.contains(&"Internal"));
        assert_eq!(names.len(), 3);
    }
}

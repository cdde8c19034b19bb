//! Canonical fact model
//!
//! Facts are what the extraction pipeline votes on: every distinct entity,
//! relation or attribute value produced by one model completion is counted
//! once, so all fact types compare and hash by full structural equality.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// One input identifier (a URL or a file path)
pub type Place = String;

// ============================================================================
// Fact Types
// ============================================================================

/// A localized label of an individual, e.g. `("Kazakhstan", "en")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// Label text
    pub text: String,

    /// Language tag
    pub lang: String,
}

impl Label {
    /// Create a new label
    pub fn new(text: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.text, self.lang)
    }
}

/// An individual of an ontology class. The class name is the key of the
/// group the fact is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityFact {
    /// Canonical identifier of the individual
    pub id: String,

    /// Labels in the order the model returned them
    pub labels: Vec<Label>,
}

impl EntityFact {
    pub fn new(id: impl Into<String>, labels: Vec<Label>) -> Self {
        Self {
            id: id.into(),
            labels,
        }
    }
}

/// An object property assertion between two individuals
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationFact {
    pub subject: String,
    pub object: String,
}

impl RelationFact {
    pub fn new(subject: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
        }
    }
}

/// Scalar value of a data property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl ScalarValue {
    /// Convert a JSON value, returning `None` for null, arrays and objects
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => Some(Self::Number(n.clone())),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A data property assertion on an individual
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeFact {
    pub subject: String,
    pub value: ScalarValue,
}

impl AttributeFact {
    pub fn new(subject: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self {
            subject: subject.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Fact Sets
// ============================================================================

/// Facts grouped by class or property name
pub type FactGroups<F> = HashMap<String, HashSet<F>>;

/// Entities, relations and attribute values grouped by class/property name.
///
/// Used both for the normalized output of a single completion and for the
/// consensus result of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSet {
    /// Class name -> individuals
    pub entities: FactGroups<EntityFact>,

    /// Object property name -> (subject, object) pairs
    pub relations: FactGroups<RelationFact>,

    /// Data property name -> (subject, value) pairs
    pub attributes: FactGroups<AttributeFact>,
}

/// Consensus output for one chunk
pub type ConsensusResult = FactSet;

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, returning `false` if it was already present
    pub fn add_entity(&mut self, class: impl Into<String>, fact: EntityFact) -> bool {
        insert_grouped(&mut self.entities, class.into(), fact)
    }

    /// Add a relation, returning `false` if it was already present
    pub fn add_relation(&mut self, property: impl Into<String>, fact: RelationFact) -> bool {
        insert_grouped(&mut self.relations, property.into(), fact)
    }

    /// Add an attribute value, returning `false` if it was already present
    pub fn add_attribute(&mut self, property: impl Into<String>, fact: AttributeFact) -> bool {
        insert_grouped(&mut self.attributes, property.into(), fact)
    }

    /// Whether at least one entity is present. Relations and attributes
    /// without entities have nothing to anchor to.
    pub fn has_entities(&self) -> bool {
        self.entities.values().any(|set| !set.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0 && self.relation_count() == 0 && self.attribute_count() == 0
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().map(HashSet::len).sum()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.values().map(HashSet::len).sum()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.values().map(HashSet::len).sum()
    }

    pub fn contains_entity(&self, class: &str, fact: &EntityFact) -> bool {
        self.entities.get(class).is_some_and(|set| set.contains(fact))
    }

    pub fn contains_relation(&self, property: &str, fact: &RelationFact) -> bool {
        self.relations
            .get(property)
            .is_some_and(|set| set.contains(fact))
    }

    pub fn contains_attribute(&self, property: &str, fact: &AttributeFact) -> bool {
        self.attributes
            .get(property)
            .is_some_and(|set| set.contains(fact))
    }
}

fn insert_grouped<F: Eq + Hash>(groups: &mut FactGroups<F>, name: String, fact: F) -> bool {
    groups.entry(name).or_default().insert(fact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_set_deduplicates() {
        let mut facts = FactSet::new();
        let kz = EntityFact::new("Kazakhstan", vec![Label::new("Kazakhstan", "en")]);

        assert!(facts.add_entity("Country", kz.clone()));
        assert!(!facts.add_entity("Country", kz.clone()));
        assert_eq!(facts.entity_count(), 1);
        assert!(facts.contains_entity("Country", &kz));
    }

    #[test]
    fn test_label_order_is_significant() {
        let a = EntityFact::new("X", vec![Label::new("a", "en"), Label::new("b", "ru")]);
        let b = EntityFact::new("X", vec![Label::new("b", "ru"), Label::new("a", "en")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_has_entities_ignores_empty_groups() {
        let mut facts = FactSet::new();
        facts.entities.insert("Country".to_string(), HashSet::new());
        facts.add_relation("hasBorder", RelationFact::new("A", "B"));

        assert!(!facts.has_entities());
        assert!(!facts.is_empty());
    }

    #[test]
    fn test_scalar_value_from_json() {
        assert_eq!(
            ScalarValue::from_json(&serde_json::json!(18776707)),
            Some(ScalarValue::from(18776707_i64))
        );
        assert_eq!(
            ScalarValue::from_json(&serde_json::json!("steppe")),
            Some(ScalarValue::from("steppe"))
        );
        assert_eq!(ScalarValue::from_json(&serde_json::json!(null)), None);
        assert_eq!(ScalarValue::from_json(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn test_float_values_compare_structurally() {
        let a = ScalarValue::from_json(&serde_json::json!(2724900.0)).unwrap();
        let b = ScalarValue::from_json(&serde_json::json!(2724900.0)).unwrap();
        let mut set = HashSet::new();
        set.insert(AttributeFact::new("Kazakhstan", a));
        assert!(!set.insert(AttributeFact::new("Kazakhstan", b)));
    }
}

//! Fact normalization
//!
//! Maps the JSON payload of one completion onto a [`FactSet`]. The default
//! layout is the one the generated prompt asks for:
//!
//! ```json
//! {
//!   "objects": [["Country", "Kazakhstan", [["Kazakhstan", "en"], ["Казахстан", "ru"]]]],
//!   "object_properties": [["hasBorder", ["Kazakhstan", "Russia"]]],
//!   "data_properties": [["population", ["Kazakhstan", 18776707]]]
//! }
//! ```

use ontofill_core::{AttributeFact, EntityFact, FactSet, Label, RelationFact, ScalarValue};
use serde_json::Value;

use crate::SampleError;

/// Top-level key holding `[className, id, [[label, lang], ...]]` triples
pub const OBJECTS_KEY: &str = "objects";
/// Top-level key holding `[propertyName, [subjectId, objectId]]` pairs
pub const OBJECT_PROPERTIES_KEY: &str = "object_properties";
/// Top-level key holding `[propertyName, [subjectId, value]]` pairs
pub const DATA_PROPERTIES_KEY: &str = "data_properties";

/// Maps parsed model output to canonical facts
pub trait JsonAdapter: Send + Sync {
    fn map_json(&self, value: &Value) -> Result<FactSet, SampleError>;
}

/// Adapter for the `objects` / `object_properties` / `data_properties` layout
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultJsonAdapter;

impl JsonAdapter for DefaultJsonAdapter {
    fn map_json(&self, value: &Value) -> Result<FactSet, SampleError> {
        let root = value
            .as_object()
            .ok_or_else(|| structure("response root is not an object"))?;

        let mut facts = FactSet::new();

        let Some(objects) = section(root.get(OBJECTS_KEY), OBJECTS_KEY)? else {
            // Relations and attributes need entities to anchor to
            return Ok(facts);
        };
        for item in objects {
            let (class, entity) = map_object(item)?;
            facts.add_entity(class, entity);
        }

        if let Some(relations) = section(root.get(OBJECT_PROPERTIES_KEY), OBJECT_PROPERTIES_KEY)? {
            for item in relations {
                let (property, [subject, object]) = map_pair(item)?;
                let relation = RelationFact::new(
                    string(subject, "relation subject")?,
                    string(object, "relation object")?,
                );
                facts.add_relation(property, relation);
            }
        }

        if let Some(attributes) = section(root.get(DATA_PROPERTIES_KEY), DATA_PROPERTIES_KEY)? {
            for item in attributes {
                let (property, [subject, value]) = map_pair(item)?;
                let value = ScalarValue::from_json(value)
                    .ok_or_else(|| structure(format!("non-scalar value for '{property}'")))?;
                let subject = string(subject, "attribute subject")?;
                facts.add_attribute(property, AttributeFact::new(subject, value));
            }
        }

        Ok(facts)
    }
}

fn structure(message: impl Into<String>) -> SampleError {
    SampleError::WrongJsonStructure(message.into())
}

/// A section is absent when missing, null or empty
fn section<'a>(
    value: Option<&'a Value>,
    key: &str,
) -> Result<Option<&'a [Value]>, SampleError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) if items.is_empty() => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(structure(format!("'{key}' is not a list"))),
    }
}

fn string<'a>(value: &'a Value, what: &str) -> Result<&'a str, SampleError> {
    value
        .as_str()
        .ok_or_else(|| structure(format!("{what} is not a string: {value}")))
}

fn tuple<'a, const N: usize>(value: &'a Value, what: &str) -> Result<&'a [Value; N], SampleError> {
    value
        .as_array()
        .and_then(|items| <&[Value; N]>::try_from(items.as_slice()).ok())
        .ok_or_else(|| structure(format!("{what} must be a list of {}: {value}", N)))
}

fn map_object(item: &Value) -> Result<(&str, EntityFact), SampleError> {
    let [class, id, labels] = tuple::<3>(item, "object")?;

    let labels = labels
        .as_array()
        .ok_or_else(|| structure(format!("labels must be a list: {labels}")))?
        .iter()
        .map(|label| {
            let [text, lang] = tuple::<2>(label, "label")?;
            Ok(Label::new(string(text, "label text")?, string(lang, "label language")?))
        })
        .collect::<Result<Vec<_>, SampleError>>()?;

    Ok((
        string(class, "class name")?,
        EntityFact::new(string(id, "object id")?, labels),
    ))
}

fn map_pair(item: &Value) -> Result<(&str, &[Value; 2]), SampleError> {
    let [property, args] = tuple::<2>(item, "property assertion")?;
    Ok((string(property, "property name")?, tuple::<2>(args, "property arguments")?))
}

//! In-memory ontology knowledge base with JSON persistence
//!
//! Individuals live in a name -> individual map next to the schema. Every
//! write goes through one async mutex, so concurrent chunks of different
//! places never interleave inside the map. A write is applied to a copy and
//! only replaces the live document once it is saved, so memory and disk
//! never disagree.
//!
//! Author: hephaex@gmail.com

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ontofill_core::{
    EntityFact, FactSet, KnowledgeBase, Label, NoopObserver, Observer, OntofillError,
    OntologySchema, PipelineEvent, Result, ScalarValue, WriteReport,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ============================================================================
// Document model
// ============================================================================

/// A named member of one or more ontology classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub id: String,

    #[serde(default)]
    pub classes: BTreeSet<String>,

    #[serde(default)]
    pub labels: Vec<Label>,

    /// Object property name -> ids of related individuals
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub object_properties: BTreeMap<String, BTreeSet<String>>,

    /// Data property name -> values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_properties: BTreeMap<String, Vec<ScalarValue>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Individual {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            classes: BTreeSet::new(),
            labels: Vec::new(),
            object_properties: BTreeMap::new(),
            data_properties: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a class and any labels not yet present
    fn merge(&mut self, class: &str, entity: &EntityFact) {
        self.classes.insert(class.to_string());
        for label in &entity.labels {
            if !self.labels.contains(label) {
                self.labels.push(label.clone());
            }
        }
        self.updated_at = Utc::now();
    }

    /// Multi-line, human-readable summary
    pub fn describe(&self) -> String {
        let mut description = format!("Individual: {}\n", self.id);

        if !self.classes.is_empty() {
            let types: Vec<&str> = self.classes.iter().map(String::as_str).collect();
            let _ = writeln!(description, "  Types: {}", types.join(", "));
        }
        if !self.labels.is_empty() {
            let labels: Vec<String> = self.labels.iter().map(ToString::to_string).collect();
            let _ = writeln!(description, "  label: {}", labels.join(", "));
        }
        for (property, objects) in &self.object_properties {
            let objects: Vec<&str> = objects.iter().map(String::as_str).collect();
            let _ = writeln!(description, "  {property}: {}", objects.join(", "));
        }
        for (property, values) in &self.data_properties {
            let values: Vec<String> = values.iter().map(ToString::to_string).collect();
            let _ = writeln!(description, "  {property}: {}", values.join(", "));
        }

        description
    }
}

/// Ontology schema plus its individuals. Both the input ontology and the
/// saved result use this format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologyDocument {
    #[serde(flatten)]
    pub schema: OntologySchema,

    #[serde(default)]
    pub individuals: BTreeMap<String, Individual>,
}

impl OntologyDocument {
    pub fn new(schema: OntologySchema) -> Self {
        Self {
            schema,
            individuals: BTreeMap::new(),
        }
    }

    /// Load a document from JSON, or TOML when the path ends in `.toml`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OntofillError::InvalidOntology(format!("cannot read {}: {e}", path.display()))
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let document: Self = if is_toml {
            toml::from_str(&content)
                .map_err(|e| OntofillError::InvalidOntology(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| OntofillError::InvalidOntology(format!("{}: {e}", path.display())))?
        };

        document.schema.check_names()?;
        Ok(document)
    }

    /// Persist as pretty JSON through a temporary file and a rename, so a
    /// crash never leaves a half-written document behind
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;

        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ontology.json".into());
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, &json).await.map_err(|e| {
            OntofillError::KnowledgeBase(format!("cannot write {}: {e}", tmp_path.display()))
        })?;
        tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
            OntofillError::KnowledgeBase(format!("cannot replace {}: {e}", path.display()))
        })?;

        Ok(())
    }
}

// ============================================================================
// Knowledge base
// ============================================================================

/// Knowledge base backed by an [`OntologyDocument`]
pub struct OntologyKnowledgeBase {
    document: Mutex<OntologyDocument>,
    save_path: Option<PathBuf>,
    observer: Arc<dyn Observer>,
}

impl OntologyKnowledgeBase {
    pub fn new(document: OntologyDocument) -> Self {
        Self {
            document: Mutex::new(document),
            save_path: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Open an ontology document from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(OntologyDocument::from_file(path)?))
    }

    /// Save the whole document here after every write
    pub fn with_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Copy of the schema
    pub async fn schema(&self) -> OntologySchema {
        self.document.lock().await.schema.clone()
    }

    /// Copy of the current document
    pub async fn snapshot(&self) -> OntologyDocument {
        self.document.lock().await.clone()
    }

    pub async fn individual(&self, id: &str) -> Option<Individual> {
        self.document.lock().await.individuals.get(id).cloned()
    }

    pub async fn individual_count(&self) -> usize {
        self.document.lock().await.individuals.len()
    }

    fn reject(&self, report: &mut WriteReport, message: String) {
        tracing::warn!(%message, "Fact skipped");
        self.observer.notify(PipelineEvent::error(None, message));
        report.rejected += 1;
    }

    /// Apply facts to the document, returning the touched individuals
    fn apply(
        &self,
        document: &mut OntologyDocument,
        facts: &FactSet,
        report: &mut WriteReport,
    ) -> BTreeSet<String> {
        let mut touched = BTreeSet::new();
        let OntologyDocument {
            schema,
            individuals,
        } = document;

        for (class, entities) in sorted(&facts.entities) {
            if schema.class(class).is_none() {
                for _ in entities {
                    self.reject(report, format!("Class '{class}' not found in ontology."));
                }
                continue;
            }
            for entity in entities {
                individuals
                    .entry(entity.id.clone())
                    .or_insert_with(|| Individual::new(entity.id.clone()))
                    .merge(class, entity);
                touched.insert(entity.id.clone());
                report.entities += 1;
            }
        }

        for (property, relations) in sorted(&facts.relations) {
            if schema.object_property(property).is_none() {
                for _ in relations {
                    self.reject(
                        report,
                        format!("Object property '{property}' not found in ontology."),
                    );
                }
                continue;
            }
            for relation in relations {
                if !individuals.contains_key(&relation.subject) {
                    self.reject(
                        report,
                        format!(
                            "Subject '{}' for '{property}' not found in individuals.",
                            relation.subject
                        ),
                    );
                    continue;
                }
                if !individuals.contains_key(&relation.object) {
                    self.reject(
                        report,
                        format!(
                            "Object '{}' for '{property}' not found in individuals.",
                            relation.object
                        ),
                    );
                    continue;
                }
                if let Some(subject) = individuals.get_mut(&relation.subject) {
                    subject
                        .object_properties
                        .entry(property.clone())
                        .or_default()
                        .insert(relation.object.clone());
                    subject.updated_at = Utc::now();
                }
                touched.insert(relation.subject.clone());
                report.relations += 1;
            }
        }

        for (property, attributes) in sorted(&facts.attributes) {
            let Some(definition) = schema.data_property(property) else {
                for _ in attributes {
                    self.reject(
                        report,
                        format!("Data property '{property}' not found in ontology."),
                    );
                }
                continue;
            };
            for attribute in attributes {
                let Some(subject) = individuals.get_mut(&attribute.subject) else {
                    self.reject(
                        report,
                        format!(
                            "Object '{}' for '{property}' not found in individuals.",
                            attribute.subject
                        ),
                    );
                    continue;
                };
                if !definition.range.accepts(&attribute.value) {
                    self.reject(
                        report,
                        format!(
                            "Type validation error for '{}': '{property}' expects {}, got {}",
                            attribute.subject, definition.range, attribute.value
                        ),
                    );
                    continue;
                }
                subject
                    .data_properties
                    .insert(property.clone(), vec![attribute.value.clone()]);
                subject.updated_at = Utc::now();
                touched.insert(attribute.subject.clone());
                report.attributes += 1;
            }
        }

        touched
    }
}

/// Groups in name order, so reports and logs are deterministic
fn sorted<F>(
    groups: &std::collections::HashMap<String, std::collections::HashSet<F>>,
) -> Vec<(&String, &std::collections::HashSet<F>)> {
    let mut groups: Vec<_> = groups.iter().collect();
    groups.sort_by(|a, b| a.0.cmp(b.0));
    groups
}

#[async_trait]
impl KnowledgeBase for OntologyKnowledgeBase {
    async fn add_facts(&self, facts: &FactSet) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        if !facts.has_entities() {
            return Ok(report);
        }

        let mut document = self.document.lock().await;

        // Changes become visible only once they are on disk
        let mut updated = document.clone();
        let touched = self.apply(&mut updated, facts, &mut report);
        if let Some(path) = &self.save_path {
            updated.save(path).await?;
        }
        *document = updated;

        for id in &touched {
            if let Some(individual) = document.individuals.get(id) {
                self.observer.notify(PipelineEvent::IndividualStored {
                    id: id.clone(),
                    description: individual.describe(),
                });
            }
        }
        drop(document);

        if report.entities > 0 {
            self.observer.notify(PipelineEvent::EntitiesAdded {
                count: report.entities,
            });
        }
        if report.relations > 0 {
            self.observer.notify(PipelineEvent::RelationsAdded {
                count: report.relations,
            });
        }
        if report.attributes > 0 {
            self.observer.notify(PipelineEvent::AttributesAdded {
                count: report.attributes,
            });
        }

        tracing::debug!(
            entities = report.entities,
            relations = report.relations,
            attributes = report.attributes,
            rejected = report.rejected,
            "Facts written"
        );

        Ok(report)
    }
}

//! Task prompt generation
//!
//! Renders the extraction instructions from the ontology: the classes the
//! model may use, the relations between them and the data properties, each
//! with the exact list layout the normalizer parses.

use ontofill_core::{ExtractionConfig, OntologyClass, OntologySchema};

/// Prompt rendering options
#[derive(Debug, Clone)]
pub struct PromptOptions {
    /// Label languages, e.g. `["kz", "en", "ru"]`
    pub languages: Vec<String>,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl PromptOptions {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            languages: config.label_languages.clone(),
        }
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    /// Language of canonical identifiers: English when requested, the first
    /// requested language otherwise
    fn canonical_language(&self) -> &str {
        if self.languages.iter().any(|l| l == "en") || self.languages.is_empty() {
            "en"
        } else {
            &self.languages[0]
        }
    }
}

fn language_name(tag: &str) -> &str {
    match tag {
        "kz" | "kk" => "Kazakh",
        "en" => "English",
        "ru" => "Russian",
        "de" => "German",
        "fr" => "French",
        other => other,
    }
}

fn with_hint(name: &str, hint: Option<&str>) -> String {
    match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => format!("{name} ({hint})"),
        None => name.to_string(),
    }
}

fn names(classes: &[&OntologyClass]) -> String {
    classes
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Listed classes that are, or inherit from, one of `targets`
fn resolve<'a>(
    schema: &OntologySchema,
    classes: &[&'a OntologyClass],
    targets: &[String],
) -> Vec<&'a OntologyClass> {
    classes
        .iter()
        .copied()
        .filter(|c| schema.is_subclass_of_any(&c.name, targets))
        .collect()
}

/// Build the task prompt for an ontology
pub fn generate_prompt(schema: &OntologySchema, options: &PromptOptions) -> String {
    let classes: Vec<&OntologyClass> = schema.visible_classes().collect();
    let canonical = options.canonical_language();

    let relations: Vec<String> = schema
        .object_properties
        .iter()
        .filter(|p| !p.hidden)
        .filter_map(|p| {
            let domain = resolve(schema, &classes, &p.domain);
            let range = resolve(schema, &classes, &p.range);
            (!domain.is_empty() && !range.is_empty()).then(|| {
                format!(
                    "{}: relates individuals of {} to individuals of {}",
                    with_hint(&p.name, p.hint.as_deref()),
                    names(&domain),
                    names(&range)
                )
            })
        })
        .collect();

    let data_properties: Vec<String> = schema
        .data_properties
        .iter()
        .filter(|p| !p.hidden)
        .filter_map(|p| {
            let domain = resolve(schema, &classes, &p.domain);
            (!domain.is_empty()).then(|| {
                format!(
                    "{}: applies to individuals of {}, values must be of type {}",
                    with_hint(&p.name, p.hint.as_deref()),
                    names(&domain),
                    p.range
                )
            })
        })
        .collect();

    let language_list = options
        .languages
        .iter()
        .map(|l| language_name(l))
        .collect::<Vec<_>>()
        .join(", ");
    let label_format = options
        .languages
        .iter()
        .map(|l| format!("[\"individual name in {l}\", \"{l}\"]"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = String::new();

    prompt.push_str("Select all individuals of the following classes mentioned in the text:\n");
    let class_list: Vec<String> = classes
        .iter()
        .map(|c| with_hint(&c.name, c.hint.as_deref()))
        .collect();
    prompt.push_str(&class_list.join(", "));
    prompt.push('\n');
    match options.languages.len() {
        0 => prompt.push_str("Return them as a list according to this format:\n"),
        1 => prompt.push_str(&format!(
            "Return them in {language_list} as a list according to this format:\n"
        )),
        n => prompt.push_str(&format!(
            "Return them in {n} languages ({language_list}) as a list according to this format:\n"
        )),
    }
    prompt.push_str(&format!(
        "\"objects\": [[\"class name\", \"individual name in {canonical}\", [{label_format}]],]\n\n"
    ));

    if !relations.is_empty() {
        prompt.push_str(
            "Additionally, identify any relationships between the found individuals mentioned \
             in the text, using only the following possible relations:\n",
        );
        prompt.push_str(&relations.join("\n"));
        prompt.push('\n');
        prompt.push_str("Return them as a list in this format:\n");
        prompt.push_str(&format!(
            "\"object_properties\": [[\"relationship name\", [\"subject individual name in {canonical}\", \
             \"object individual name in {canonical}\"]],]\n\n"
        ));
    }

    if !data_properties.is_empty() {
        prompt.push_str(
            "Finally, based on the text, identify any data properties for the found individuals \
             mentioned in the text, using only the following possible data properties:\n",
        );
        prompt.push_str(&data_properties.join("\n"));
        prompt.push('\n');
        prompt.push_str("Return them as a list in this format:\n");
        prompt.push_str(&format!(
            "\"data_properties\": [[\"data property name\", [\"individual name in {canonical}\", value]],]\n\n"
        ));
    }

    prompt.push_str("Put all lists into a single JSON object.\n");
    prompt.push_str(
        "Important: Do not include any information from that instruction in your response. \
         Your response should contain **only** the data explicitly extracted from the text \
         and formatted as described above.",
    );

    prompt
}

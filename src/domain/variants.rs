//! Output language variants offered for previews and PDF exports.

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;

/// A language the visualization stylesheets can render labels in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageVariant {
    code: String,
    label: String,
    locale: String,
    stylesheet_lang: String,
}

impl LanguageVariant {
    /// Short code clients send in the `lang` form field.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Value passed to the stylesheets as their `lang` parameter.
    pub fn stylesheet_lang(&self) -> &str {
        &self.stylesheet_lang
    }
}

/// Configuration shape of a single variant.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantDefinition {
    pub code: String,
    pub label: String,
    pub locale: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub stylesheet_lang: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariantTableError {
    #[error("at least one variant must be configured")]
    Empty,
    #[error("variant code `{0}` is invalid: use ASCII letters, digits and `-`")]
    InvalidCode(String),
    #[error("variant code `{0}` is configured more than once")]
    Duplicate(String),
    #[error("exactly one variant must be marked as default, found {0}")]
    DefaultCount(usize),
}

/// The set of offered variants, with one designated default.
#[derive(Debug, Clone)]
pub struct VariantTable {
    variants: Vec<LanguageVariant>,
    default_index: usize,
}

impl VariantTable {
    pub fn new(definitions: Vec<VariantDefinition>) -> Result<Self, VariantTableError> {
        if definitions.is_empty() {
            return Err(VariantTableError::Empty);
        }

        let mut seen = HashSet::new();
        let mut variants = Vec::with_capacity(definitions.len());
        let mut defaults = Vec::new();

        for (index, definition) in definitions.into_iter().enumerate() {
            let code = normalize_code(&definition.code)
                .ok_or_else(|| VariantTableError::InvalidCode(definition.code.clone()))?;
            if !seen.insert(code.clone()) {
                return Err(VariantTableError::Duplicate(code));
            }
            if definition.default {
                defaults.push(index);
            }

            let stylesheet_lang = definition
                .stylesheet_lang
                .map(|lang| lang.trim().to_string())
                .filter(|lang| !lang.is_empty())
                .unwrap_or_else(|| code.clone());

            variants.push(LanguageVariant {
                code,
                label: definition.label.trim().to_string(),
                locale: definition.locale.trim().to_string(),
                stylesheet_lang,
            });
        }

        match defaults.as_slice() {
            [index] => Ok(Self {
                variants,
                default_index: *index,
            }),
            other => Err(VariantTableError::DefaultCount(other.len())),
        }
    }

    /// German (default) and English, the languages shipped with the visualization stylesheets.
    pub fn builtin() -> Self {
        let variants = vec![
            LanguageVariant {
                code: "de".to_string(),
                label: "Deutsch".to_string(),
                locale: "de-DE".to_string(),
                stylesheet_lang: "de".to_string(),
            },
            LanguageVariant {
                code: "en".to_string(),
                label: "English".to_string(),
                locale: "en-GB".to_string(),
                stylesheet_lang: "en".to_string(),
            },
        ];
        Self {
            variants,
            default_index: 0,
        }
    }

    pub fn default_variant(&self) -> &LanguageVariant {
        &self.variants[self.default_index]
    }

    /// Map a requested code to an offered variant. Unknown or missing codes
    /// fall back to the default; `en-US` matches `en` when no exact entry exists.
    pub fn resolve(&self, requested: &str) -> &LanguageVariant {
        let requested = requested.trim().to_ascii_lowercase();
        if requested.is_empty() {
            return self.default_variant();
        }

        if let Some(variant) = self.find(&requested) {
            return variant;
        }

        requested
            .split(['-', '_'])
            .next()
            .and_then(|primary| self.find(primary))
            .unwrap_or_else(|| self.default_variant())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageVariant> {
        self.variants.iter()
    }

    fn find(&self, code: &str) -> Option<&LanguageVariant> {
        self.variants.iter().find(|variant| variant.code == code)
    }
}

impl Default for VariantTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_lowercase();
    let valid = !code.is_empty()
        && !code.starts_with('-')
        && !code.ends_with('-')
        && code.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
    valid.then_some(code)
}

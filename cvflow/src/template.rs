//! Prompt templates with single-pass placeholder substitution.
//!
//! A template declares its placeholders up front; rendering substitutes all
//! of them in one scan and fails loudly when the mapping lacks a declared
//! name. Braces that are not declared placeholders (JSON examples inside a
//! prompt, for instance) pass through untouched, and substituted values are
//! never re-expanded.

use crate::errors::TemplateError;
use std::collections::HashMap;
use std::path::Path;

/// A prompt template loaded from text or a markdown file.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
    placeholders: Vec<String>,
}

impl PromptTemplate {
    /// Creates a template with no placeholders.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            placeholders: Vec::new(),
        }
    }

    /// Creates a template that declares the given placeholder names.
    ///
    /// Occurrences of `{name}` in the text are substituted by
    /// [`PromptTemplate::render`].
    #[must_use]
    pub fn with_placeholders<I, S>(text: impl Into<String>, placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            placeholders: placeholders.into_iter().map(Into::into).collect(),
        }
    }

    /// Loads a template from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(text))
    }

    /// Loads a template from a file, declaring placeholders.
    pub fn from_file_with_placeholders<I, S>(
        path: impl AsRef<Path>,
        placeholders: I,
    ) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut template = Self::from_file(path)?;
        template.placeholders = placeholders.into_iter().map(Into::into).collect();
        Ok(template)
    }

    /// Returns the raw template text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the declared placeholder names.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Renders the template by substituting every declared placeholder.
    ///
    /// Substitution is a single scan: values containing `{other}` are not
    /// expanded again. A declared placeholder absent from `values` is a
    /// [`TemplateError::MissingPlaceholder`].
    pub fn render(&self, values: &HashMap<String, String>) -> Result<String, TemplateError> {
        if self.placeholders.is_empty() {
            return Ok(self.text.clone());
        }

        for name in &self.placeholders {
            if !values.contains_key(name) {
                return Err(TemplateError::MissingPlaceholder { name: name.clone() });
            }
        }

        let alternation = self
            .placeholders
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(r"\{{({alternation})\}}");
        // The pattern is built from escaped literals; it always compiles.
        let re = regex::Regex::new(&pattern)
            .map_err(|_| TemplateError::MissingPlaceholder { name: pattern })?;

        let rendered = re.replace_all(&self.text, |caps: &regex::Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mapping(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_declared_placeholders() {
        let template = PromptTemplate::with_placeholders(
            "Rewrite {JSON_resume_object} in style {style_guide}.",
            ["JSON_resume_object", "style_guide"],
        );
        let rendered = template
            .render(&mapping(&[
                ("JSON_resume_object", "{\"name\":\"x\"}"),
                ("style_guide", "concise"),
            ]))
            .expect("render");
        assert_eq!(rendered, "Rewrite {\"name\":\"x\"} in style concise.");
    }

    #[test]
    fn test_render_missing_placeholder_is_an_error() {
        let template =
            PromptTemplate::with_placeholders("Apply {Treatment_object}.", ["Treatment_object"]);
        let err = template.render(&HashMap::new()).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::MissingPlaceholder { name } if name == "Treatment_object"
        ));
    }

    #[test]
    fn test_render_is_single_pass() {
        // A substituted value containing another placeholder is not expanded.
        let template =
            PromptTemplate::with_placeholders("{a} and {b}", ["a", "b"]);
        let rendered = template
            .render(&mapping(&[("a", "{b}"), ("b", "beta")]))
            .expect("render");
        assert_eq!(rendered, "{b} and beta");
    }

    #[test]
    fn test_undeclared_braces_pass_through() {
        let template = PromptTemplate::with_placeholders(
            "Return JSON like {\"score\": 7}. Input: {treatment_type}",
            ["treatment_type"],
        );
        let rendered = template
            .render(&mapping(&[("treatment_type", "Type_I")]))
            .expect("render");
        assert_eq!(rendered, "Return JSON like {\"score\": 7}. Input: Type_I");
    }

    #[test]
    fn test_template_without_placeholders_renders_verbatim() {
        let template = PromptTemplate::new("Extract the resume as JSON.");
        let rendered = template.render(&HashMap::new()).expect("render");
        assert_eq!(rendered, "Extract the resume as JSON.");
    }
}

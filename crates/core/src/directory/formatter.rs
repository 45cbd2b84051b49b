//! Placeholder templates and attribute rendering.
//!
//! Templates use `{name}` placeholders with `{{` and `}}` for literal braces,
//! e.g. `{givenName}.{sn}@example.com`. The same [`Template`] type backs
//! filter formatting in [`super::escape`].

use tracing::trace;

use super::attributes::{RawAttributes, StringEncoding};
use crate::errors::DirectoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed placeholder template. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, DirectoryError> {
        let malformed = |detail: &str| DirectoryError::Template {
            template: source.to_string(),
            detail: detail.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(malformed("nested '{' in placeholder")),
                            Some(c) => name.push(c),
                            None => return Err(malformed("unclosed '{'")),
                        }
                    }
                    if name.is_empty() {
                        return Err(malformed("empty placeholder"));
                    }
                    if name.chars().any(char::is_whitespace) {
                        return Err(malformed("whitespace in placeholder name"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                '}' => return Err(malformed("single '}' encountered")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Substitute placeholders using `lookup`. A placeholder the lookup
    /// cannot fill is a template error.
    pub fn fill<'v>(
        &self,
        mut lookup: impl FnMut(&str) -> Option<&'v str>,
    ) -> Result<String, DirectoryError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(DirectoryError::Template {
                            template: self.source.clone(),
                            detail: format!("no value supplied for placeholder '{name}'"),
                        })
                    }
                },
            }
        }
        Ok(out)
    }
}

/// Outcome of rendering an [`AttributeFormatter`] against one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// No template is configured for this field.
    Unconfigured,
    /// The first referenced attribute that the entry lacks.
    Missing(String),
    Value(String),
}

impl Rendered {
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<String> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Name of the missing attribute, if rendering stopped on one.
    pub fn missing(&self) -> Option<&str> {
        match self {
            Self::Missing(name) => Some(name),
            _ => None,
        }
    }
}

/// Maps directory attributes onto one user field via a template.
#[derive(Debug, Clone)]
pub struct AttributeFormatter {
    template: Option<Template>,
    attribute_names: Vec<String>,
}

impl AttributeFormatter {
    pub fn new(format: Option<&str>) -> Result<Self, DirectoryError> {
        let template = format.map(Template::parse).transpose()?;
        let attribute_names = template
            .as_ref()
            .map(Template::placeholders)
            .unwrap_or_default();
        Ok(Self {
            template,
            attribute_names,
        })
    }

    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }

    pub fn is_configured(&self) -> bool {
        self.template.is_some()
    }

    /// Render against `attributes`, using the first value of each referenced
    /// attribute. Only a decoding failure is an error.
    pub fn render(
        &self,
        attributes: &RawAttributes,
        encoding: StringEncoding,
    ) -> Result<Rendered, DirectoryError> {
        let Some(template) = &self.template else {
            return Ok(Rendered::Unconfigured);
        };

        let mut values: Vec<(&str, String)> = Vec::with_capacity(self.attribute_names.len());
        for name in &self.attribute_names {
            match attributes.first_str(name, encoding)? {
                Some(value) => values.push((name.as_str(), value)),
                None => {
                    trace!(template = template.source(), attribute = %name, "attribute missing");
                    return Ok(Rendered::Missing(name.clone()));
                }
            }
        }

        let rendered = template.fill(|name| {
            values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str())
        })?;
        Ok(Rendered::Value(rendered))
    }
}

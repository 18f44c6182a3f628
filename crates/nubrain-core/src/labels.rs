//! Ordered class names for classifier outputs

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Ordered sequence of class names.
///
/// Index `i` of a classifier's output corresponds to `labels[i]`. A label
/// space is never empty and never contains duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSpace {
    labels: Vec<String>,
}

/// Label files exported from a fitted label encoder sometimes wrap the
/// class list under a `classes` key.
#[derive(Deserialize)]
#[serde(untagged)]
enum LabelFile {
    List(Vec<String>),
    Encoder { classes: Vec<String> },
}

impl LabelSpace {
    /// Create a label space from an ordered list of names
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();

        if labels.is_empty() {
            return Err(Error::labels("label space must contain at least one class"));
        }

        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if label.trim().is_empty() {
                return Err(Error::labels("label names must not be blank"));
            }
            if !seen.insert(label.as_str()) {
                return Err(Error::labels(format!("duplicate label '{}'", label)));
            }
        }

        Ok(Self { labels })
    }

    /// Parse a JSON label file (`["a", "b"]` or `{"classes": ["a", "b"]}`)
    pub fn from_json(json: &str) -> Result<Self> {
        let file: LabelFile = serde_json::from_str(json)?;
        Self::from_label_file(file)
    }

    /// Parse a YAML label file
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: LabelFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse label YAML: {}", e)))?;
        Self::from_label_file(file)
    }

    /// Parse a plain-text label file with one class per line
    pub fn from_lines(text: &str) -> Result<Self> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    /// Load a label file, choosing the parser from the file extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::artifact(format!("Failed to read label file {}: {}", path.display(), e))
        })?;

        let parsed = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::from_json(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_lines(&contents),
        };

        let labels = parsed.map_err(|e| {
            Error::artifact(format!("Invalid label file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            "Loaded {} labels from {}: {:?}",
            labels.len(),
            path.display(),
            labels.labels
        );

        Ok(labels)
    }

    fn from_label_file(file: LabelFile) -> Result<Self> {
        match file {
            LabelFile::List(labels) | LabelFile::Encoder { classes: labels } => Self::new(labels),
        }
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the label space is empty
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Map a class index to its name
    pub fn get(&self, index: usize) -> Result<&str> {
        self.labels.get(index).map(String::as_str).ok_or_else(|| {
            Error::labels(format!(
                "class index {} is outside the label space of {} classes",
                index,
                self.labels.len()
            ))
        })
    }

    /// Position of a class name
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Check whether a name is one of the classes
    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    /// Iterate over class names in index order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Class names as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}

impl TryFrom<Vec<String>> for LabelSpace {
    type Error = Error;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<LabelSpace> for Vec<String> {
    fn from(space: LabelSpace) -> Self {
        space.labels
    }
}

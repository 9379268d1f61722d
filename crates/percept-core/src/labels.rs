//! Class-id to name lookup for detection output.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("failed to read labels from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON labels: {0}")]
    Json(#[from] serde_json::Error),
}

/// Class names indexed by class id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Load a `.json` array of strings, or a text file with one name per line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| LabelsError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let labels = if is_json {
            Self::from_json(&contents)?
        } else {
            Self::from_lines(&contents)
        };

        tracing::info!(path = %path.display(), classes = labels.len(), "loaded class labels");
        Ok(labels)
    }

    /// One name per line; blank lines are skipped and names are trimmed.
    pub fn from_lines(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    pub fn from_json(text: &str) -> Result<Self, LabelsError> {
        Ok(Self::new(serde_json::from_str(text)?))
    }

    pub fn name(&self, class_id: i64) -> Option<&str> {
        usize::try_from(class_id)
            .ok()
            .and_then(|idx| self.names.get(idx))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lines_skips_blanks() {
        let labels = ClassLabels::from_lines("person\n\n bicycle \r\ncar\n");
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(0), Some("person"));
        assert_eq!(labels.name(1), Some("bicycle"));
        assert_eq!(labels.name(2), Some("car"));
    }

    #[test]
    fn test_name_out_of_range() {
        let labels = ClassLabels::from_lines("person\ncar");
        assert_eq!(labels.name(2), None);
        assert_eq!(labels.name(-1), None);
    }

    #[test]
    fn test_from_json() {
        let labels = ClassLabels::from_json(r#"["cat", "dog"]"#).unwrap();
        assert_eq!(labels.name(1), Some("dog"));
        assert!(ClassLabels::from_json(r#"{"cat": 0}"#).is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("labels.txt");
        let json = dir.path().join("labels.json");
        std::fs::write(&txt, "person\nbicycle\n").unwrap();
        std::fs::write(&json, r#"["person", "bicycle", "car"]"#).unwrap();

        assert_eq!(ClassLabels::load(&txt).unwrap().len(), 2);
        assert_eq!(ClassLabels::load(&json).unwrap().len(), 3);
        assert!(matches!(
            ClassLabels::load(dir.path().join("missing.txt")),
            Err(LabelsError::Io { .. })
        ));
    }
}

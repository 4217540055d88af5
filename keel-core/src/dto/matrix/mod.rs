//! Matrix DTOs for CI fan-out

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::domain::matrix::BuildMatrix;
use crate::domain::service::ServiceDescriptor;
use crate::error::Result;

/// Matrix handed to an external fan-out mechanism
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixOutput {
    pub matrix: BuildMatrix,
    pub has_changes: bool,
}

impl From<BuildMatrix> for MatrixOutput {
    fn from(matrix: BuildMatrix) -> Self {
        Self {
            has_changes: !matrix.is_empty(),
            matrix,
        }
    }
}

impl MatrixOutput {
    /// `key=value` lines in the format of a CI step output file
    pub fn to_output_lines(&self) -> Result<String> {
        let matrix = serde_json::to_string(&self.matrix)?;
        Ok(format!(
            "matrix={}\nhas_changes={}\n",
            matrix, self.has_changes
        ))
    }

    /// Appends the output lines to a step output file
    pub fn append_to(&self, path: &Path) -> Result<()> {
        let lines = self.to_output_lines()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(lines.as_bytes())?;
        Ok(())
    }
}

/// One matrix entry as received by a worker process
pub fn parse_entry(json: &str) -> Result<ServiceDescriptor> {
    let entry: ServiceDescriptor = serde_json::from_str(json)?;
    ServiceDescriptor::from_path(&entry.path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> BuildMatrix {
        BuildMatrix::from(vec![ServiceDescriptor::from_path("src/frontend").unwrap()])
    }

    #[test]
    fn test_output_lines() {
        let output = MatrixOutput::from(matrix());
        assert_eq!(
            output.to_output_lines().unwrap(),
            "matrix={\"include\":[{\"name\":\"frontend\",\"path\":\"src/frontend\"}]}\nhas_changes=true\n"
        );
    }

    #[test]
    fn test_empty_matrix_has_no_changes() {
        let output = MatrixOutput::from(BuildMatrix::default());
        assert!(!output.has_changes);
        assert!(output.to_output_lines().unwrap().contains("{\"include\":[]}"));
    }

    #[test]
    fn test_append_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        std::fs::write(&path, "previous=1\n").unwrap();

        MatrixOutput::from(matrix()).append_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("previous=1\nmatrix="));
        assert!(contents.ends_with("has_changes=true\n"));
    }

    #[test]
    fn test_parse_entry_derives_name_from_path() {
        let entry = parse_entry(r#"{"name": "ignored", "path": "src/cartservice/"}"#).unwrap();
        assert_eq!(entry.name, "cartservice");
        assert_eq!(entry.path, "src/cartservice");
    }
}

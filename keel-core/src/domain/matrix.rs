//! Build matrix domain types

use serde::{Deserialize, Serialize};

use crate::domain::change::ChangeSet;
use crate::domain::service::{PathRegistry, ServiceDescriptor};

/// Ordered list of services that need a build in this run
///
/// Serialises as `{"include": [{"name": .., "path": ..}, ..]}`, the shape CI
/// matrix strategies consume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMatrix {
    #[serde(rename = "include")]
    entries: Vec<ServiceDescriptor>,
}

impl BuildMatrix {
    /// Intersects a change set with the registry
    ///
    /// An entry is included iff some changed path lies under `entry.path + "/"`.
    /// Output follows registry order, not the order changes were discovered.
    pub fn compute(changes: &ChangeSet, registry: &PathRegistry) -> Self {
        Self::for_paths(changes.changed_paths(), registry)
    }

    /// Intersects an explicit list of changed paths with the registry
    pub fn for_paths<I, S>(paths: I, registry: &PathRegistry) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: Vec<S> = paths.into_iter().collect();
        let entries = registry
            .iter()
            .filter(|service| paths.iter().any(|p| service.owns(p.as_ref())))
            .cloned()
            .collect();

        Self { entries }
    }

    pub fn entries(&self) -> &[ServiceDescriptor] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServiceDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.name.as_str()).collect()
    }
}

impl IntoIterator for BuildMatrix {
    type Item = ServiceDescriptor;
    type IntoIter = std::vec::IntoIter<ServiceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl From<Vec<ServiceDescriptor>> for BuildMatrix {
    fn from(entries: Vec<ServiceDescriptor>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change::CommitRef;

    fn registry() -> PathRegistry {
        PathRegistry::from_paths([
            "src/adservice",
            "src/cartservice",
            "src/frontend",
            "src/paymentservice",
        ])
        .unwrap()
    }

    fn changes(paths: &[&str]) -> ChangeSet {
        ChangeSet::new(
            CommitRef::new("1111111111").unwrap(),
            CommitRef::new("2222222222").unwrap(),
            paths.iter().copied(),
        )
    }

    #[test]
    fn test_single_service_change() {
        let matrix = BuildMatrix::compute(&changes(&["src/frontend/static/x.css"]), &registry());
        assert_eq!(
            matrix.entries(),
            &[ServiceDescriptor {
                name: "frontend".to_string(),
                path: "src/frontend".to_string(),
            }]
        );
    }

    #[test]
    fn test_registry_order_and_unrelated_files() {
        let matrix = BuildMatrix::compute(
            &changes(&[
                "src/paymentservice/server.js",
                "README.md",
                "src/cartservice/main.go",
            ]),
            &registry(),
        );
        assert_eq!(matrix.names(), vec!["cartservice", "paymentservice"]);
    }

    #[test]
    fn test_prefix_without_separator_does_not_match() {
        let matrix = BuildMatrix::compute(
            &changes(&["src/cartservice2/x", "src/cartservice-extra/y"]),
            &registry(),
        );
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_equal_refs_give_empty_matrix() {
        let same = CommitRef::new("abcdef0").unwrap();
        let changes = ChangeSet::new(same.clone(), same, ["src/frontend/main.go"]);
        assert!(BuildMatrix::compute(&changes, &registry()).is_empty());
    }

    #[test]
    fn test_explicit_paths() {
        let matrix = BuildMatrix::for_paths(["src/frontend/main.go", "src/adservice/A.java"], &registry());
        assert_eq!(matrix.names(), vec!["adservice", "frontend"]);
    }

    #[test]
    fn test_unwatched_changes_give_empty_matrix() {
        let matrix = BuildMatrix::compute(&changes(&["docs/index.md", "release/k8s.yaml"]), &registry());
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_matrix_json_shape() {
        let matrix = BuildMatrix::compute(&changes(&["src/adservice/build.gradle"]), &registry());
        let json = serde_json::to_value(&matrix).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"include": [{"name": "adservice", "path": "src/adservice"}]})
        );

        let parsed: BuildMatrix = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, matrix);
    }
}

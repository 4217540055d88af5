//! Service registry domain types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{PipelineError, Result};

/// One independently buildable directory of the monorepo
///
/// `path` is monorepo-relative without leading `./` or trailing `/`.
/// `name` is the final path segment and names the image repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub path: String,
}

impl ServiceDescriptor {
    /// Creates a descriptor from a monorepo-relative directory
    pub fn from_path(path: &str) -> Result<Self> {
        let path = normalize_path(path)?;
        let name = path
            .rsplit('/')
            .next()
            .unwrap_or(path.as_str())
            .to_string();

        Ok(Self { name, path })
    }

    /// Whether a changed file lives inside this service's subtree
    ///
    /// Matches whole path segments only: `src/cart-extra/x` is not owned by
    /// `src/cart`.
    pub fn owns(&self, changed_path: &str) -> bool {
        changed_path
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl std::fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.path)
    }
}

fn normalize_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');

    if trimmed.is_empty() {
        return Err(PipelineError::Config(format!(
            "service path '{}' is empty",
            raw
        )));
    }
    if trimmed.starts_with('/') {
        return Err(PipelineError::Config(format!(
            "service path '{}' must be relative to the repository root",
            raw
        )));
    }
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(PipelineError::Config(format!(
            "service path '{}' contains an invalid segment",
            raw
        )));
    }

    Ok(trimmed.to_string())
}

/// Ordered registry of watched services
///
/// Registry order is the build order of every matrix derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRegistry {
    services: Vec<ServiceDescriptor>,
}

impl PathRegistry {
    /// Creates a registry, rejecting duplicate paths and names
    pub fn new(services: Vec<ServiceDescriptor>) -> Result<Self> {
        let mut paths = HashSet::new();
        let mut names = HashSet::new();

        for service in &services {
            if !paths.insert(service.path.as_str()) {
                return Err(PipelineError::Config(format!(
                    "service path '{}' is listed more than once",
                    service.path
                )));
            }
            if !names.insert(service.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "service name '{}' is used by more than one path",
                    service.name
                )));
            }
        }

        Ok(Self { services })
    }

    /// Creates a registry from a list of directories
    pub fn from_paths<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let services = paths
            .into_iter()
            .map(|p| ServiceDescriptor::from_path(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(services)
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServiceDescriptor> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Looks up a service by name
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Looks up a service by name or by path
    pub fn find(&self, name_or_path: &str) -> Option<&ServiceDescriptor> {
        let wanted = name_or_path.trim_end_matches('/');
        self.services
            .iter()
            .find(|s| s.name == wanted || s.path == wanted)
    }

    /// Path globs for an upstream trigger filter
    ///
    /// Generated from the registry so the trigger and the matrix cannot drift.
    pub fn trigger_filters(&self, release_dir: Option<&str>) -> Vec<String> {
        let mut filters: Vec<String> = self
            .services
            .iter()
            .map(|s| format!("{}/**", s.path))
            .collect();

        if let Some(dir) = release_dir.map(|d| d.trim_end_matches('/')) {
            if !dir.is_empty() {
                filters.push(format!("{}/**", dir));
            }
        }

        filters
    }
}

impl<'a> IntoIterator for &'a PathRegistry {
    type Item = &'a ServiceDescriptor;
    type IntoIter = std::slice::Iter<'a, ServiceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.services.iter()
    }
}

//! Image naming and tagging

use serde::{Deserialize, Serialize};

use crate::domain::change::CommitRef;
use crate::error::{PipelineError, Result};

/// Floating tag moved to every successful build
pub const STABLE_TAG: &str = "latest";

const DOCKER_HUB_API: &str = "https://registry-1.docker.io";

/// Registry namespace images are published under
///
/// `ghcr.io/acme` carries an explicit registry host; `acme` implies Docker Hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    raw: String,
    host: Option<String>,
    path: String,
}

impl Namespace {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Err(PipelineError::Config(
                "registry namespace cannot be empty".to_string(),
            ));
        }

        let (host, path) = match raw.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => {
                (Some(first.to_string()), rest.to_string())
            }
            None if is_registry_host(raw) => (Some(raw.to_string()), String::new()),
            _ => (None, raw.to_string()),
        };

        if path.contains(':') || path.contains('@') {
            return Err(PipelineError::Config(format!(
                "registry namespace '{}' must not contain a tag or digest",
                raw
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            host,
            path,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Registry host, `None` for Docker Hub
    pub fn registry_host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Base URL of the registry HTTP API
    pub fn api_base(&self) -> String {
        match self.host.as_deref() {
            None | Some("docker.io") | Some("index.docker.io") => DOCKER_HUB_API.to_string(),
            Some(host) if host.starts_with("localhost") || host.starts_with("127.0.0.1") => {
                format!("http://{}", host)
            }
            Some(host) => format!("https://{}", host),
        }
    }

    /// Repository path of a service as addressed by the registry API
    pub fn repository(&self, service: &str) -> String {
        if self.path.is_empty() {
            service.to_string()
        } else {
            format!("{}/{}", self.path, service)
        }
    }

    /// Image reference without tag
    pub fn image(&self, service: &str) -> String {
        format!("{}/{}", self.raw, service)
    }
}

fn is_registry_host(segment: &str) -> bool {
    let (name, port) = match segment.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (segment, None),
    };

    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }

    port.is_some() || name.contains('.') || name == "localhost"
}

/// The two tags produced by a successful build
///
/// Deterministic in `(service name, head)`: the same inputs always produce
/// byte-identical references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTag {
    /// Image reference without tag, e.g. `acme/frontend`
    pub image: String,
    /// Repository path used by the registry API, e.g. `acme/frontend`
    pub repository: String,
    /// Floating tag, always `latest`
    pub stable: String,
    /// Commit-derived tag, first seven characters of head
    pub immutable: String,
}

impl ImageTag {
    pub fn for_commit(namespace: &Namespace, service: &str, head: &CommitRef) -> Self {
        Self {
            image: namespace.image(service),
            repository: namespace.repository(service),
            stable: STABLE_TAG.to_string(),
            immutable: head.short().to_string(),
        }
    }

    pub fn stable_ref(&self) -> String {
        format!("{}:{}", self.image, self.stable)
    }

    pub fn immutable_ref(&self) -> String {
        format!("{}:{}", self.image, self.immutable)
    }

    /// Both full references, immutable first
    pub fn refs(&self) -> [String; 2] {
        [self.immutable_ref(), self.stable_ref()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head() -> CommitRef {
        CommitRef::new("9fceb02d0ae598e95dc970b74767f19372d61af8").unwrap()
    }

    #[test]
    fn test_docker_hub_namespace() {
        let ns = Namespace::parse("acme").unwrap();
        assert_eq!(ns.registry_host(), None);
        assert_eq!(ns.api_base(), "https://registry-1.docker.io");
        assert_eq!(ns.repository("frontend"), "acme/frontend");
        assert_eq!(ns.image("frontend"), "acme/frontend");
    }

    #[test]
    fn test_namespace_with_host() {
        let ns = Namespace::parse("ghcr.io/acme/shop/").unwrap();
        assert_eq!(ns.registry_host(), Some("ghcr.io"));
        assert_eq!(ns.api_base(), "https://ghcr.io");
        assert_eq!(ns.repository("cartservice"), "acme/shop/cartservice");
        assert_eq!(ns.image("cartservice"), "ghcr.io/acme/shop/cartservice");
    }

    #[test]
    fn test_local_registry_uses_http() {
        let ns = Namespace::parse("localhost:5000").unwrap();
        assert_eq!(ns.api_base(), "http://localhost:5000");
        assert_eq!(ns.repository("adservice"), "adservice");
    }

    #[test]
    fn test_invalid_namespaces() {
        assert!(Namespace::parse("").is_err());
        assert!(Namespace::parse("acme:latest").is_err());
    }

    #[test]
    fn test_tags_are_deterministic() {
        let ns = Namespace::parse("acme").unwrap();
        let first = ImageTag::for_commit(&ns, "frontend", &head());
        let second = ImageTag::for_commit(&Namespace::parse("acme").unwrap(), "frontend", &head());

        assert_eq!(first, second);
        assert_eq!(first.immutable_ref(), "acme/frontend:9fceb02");
        assert_eq!(first.stable_ref(), "acme/frontend:latest");
        assert_eq!(first.refs()[0], first.immutable_ref());
    }
}

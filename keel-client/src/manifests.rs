//! Manifest lookups

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use crate::RegistryClient;
use crate::error::Result;

/// Media types accepted when fetching a manifest
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.index.v1+json",
];

const CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// What the registry currently stores under a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteManifest {
    /// Manifest digest, from the `Docker-Content-Digest` header
    pub digest: Option<String>,
    pub media_type: Option<String>,
    /// Digest of the image config; absent for multi-platform indexes
    pub config_digest: Option<String>,
}

impl RemoteManifest {
    /// Whether the manifest is a multi-platform index
    pub fn is_index(&self) -> bool {
        self.media_type
            .as_deref()
            .is_some_and(|m| m.contains("manifest.list") || m.contains("image.index"))
    }

    /// Whether this manifest describes the local image `image_id`
    ///
    /// Depending on the engine's image store the local id is either the
    /// config digest or the manifest digest, so both are compared.
    pub fn matches_image(&self, image_id: &str) -> bool {
        self.config_digest.as_deref() == Some(image_id) || self.digest.as_deref() == Some(image_id)
    }
}

#[derive(Debug, Deserialize)]
struct ManifestBody {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    config: Option<ContentDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ContentDescriptor {
    digest: String,
}

impl RegistryClient {
    /// Fetch the manifest stored under `reference` (tag or digest)
    ///
    /// # Returns
    /// `None` when the repository or tag does not exist
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<Option<RemoteManifest>> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, reference);
        let scope = format!("repository:{}:pull", repository);
        let accept = MANIFEST_MEDIA_TYPES.join(", ");

        let response = self
            .send_authorized(|client| client.get(&url).header(ACCEPT, &accept), &scope)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No manifest for {}:{}", repository, reference);
            return Ok(None);
        }

        let digest = header_value(&response, CONTENT_DIGEST_HEADER);
        let content_type = header_value(&response, CONTENT_TYPE.as_str());
        let body: ManifestBody = self.handle_response(response).await?;

        Ok(Some(RemoteManifest {
            digest,
            media_type: body.media_type.or(content_type),
            config_digest: body.config.map(|c| c.digest),
        }))
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(media_type: &str, config: Option<&str>) -> RemoteManifest {
        RemoteManifest {
            digest: Some("sha256:manifest".to_string()),
            media_type: Some(media_type.to_string()),
            config_digest: config.map(String::from),
        }
    }

    #[test]
    fn test_matches_config_or_manifest_digest() {
        let m = manifest(MANIFEST_MEDIA_TYPES[0], Some("sha256:config"));
        assert!(m.matches_image("sha256:config"));
        assert!(m.matches_image("sha256:manifest"));
        assert!(!m.matches_image("sha256:other"));
    }

    #[test]
    fn test_index_detection() {
        assert!(manifest(MANIFEST_MEDIA_TYPES[3], None).is_index());
        assert!(manifest(MANIFEST_MEDIA_TYPES[2], None).is_index());
        assert!(!manifest(MANIFEST_MEDIA_TYPES[1], Some("sha256:c")).is_index());
    }

    #[test]
    fn test_manifest_body_parsing() {
        let body: ManifestBody = serde_json::from_str(
            r#"{
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:abc", "size": 7023},
                "layers": []
            }"#,
        )
        .unwrap();
        assert_eq!(body.config.unwrap().digest, "sha256:abc");
        assert_eq!(
            body.media_type.as_deref(),
            Some("application/vnd.oci.image.manifest.v1+json")
        );
    }
}

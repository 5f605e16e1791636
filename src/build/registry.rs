use crate::cluster::{ClusterClient, GroupVersionResource, Resource};
use crate::error::{AppError, Result, ResultExt};
use base64ct::{Base64, Encoding};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use tracing::info;

pub const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// `registryHost/namespace/repository[:tag]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    pub registry: String,
    pub namespace: String,
    pub repository: String,
}

impl ImageTag {
    pub fn parse(tag: &str) -> Result<Self> {
        let segments: Vec<&str> = tag.split('/').collect();
        match segments.as_slice() {
            [registry, namespace, repository]
                if !registry.is_empty() && !namespace.is_empty() && !repository.is_empty() =>
            {
                Ok(Self {
                    registry: registry.to_string(),
                    namespace: namespace.to_string(),
                    repository: repository.to_string(),
                })
            }
            _ => Err(AppError::ValidationError(format!(
                "Invalid image tag '{}', must contain 3 components",
                tag
            ))),
        }
    }

    pub fn is_internal(&self, internal_host: &str) -> bool {
        self.registry == internal_host
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.registry, self.namespace, self.repository)
    }
}

pub fn is_internal_registry(tag: &str, internal_host: &str) -> Result<bool> {
    Ok(ImageTag::parse(tag)?.is_internal(internal_host))
}

/// Pull/push secret carrying a docker `config.json`
pub fn docker_config_secret(name: &str, config_json: &[u8]) -> Result<Resource> {
    serde_json::from_slice::<Value>(config_json).map_err(|e| {
        AppError::ValidationError(format!("docker config is not valid JSON: {}", e))
    })?;

    Resource::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name },
        "type": DOCKER_CONFIG_SECRET_TYPE,
        "data": { ".dockerconfigjson": Base64::encode_string(config_json) },
    }))
}

/// Create the registry secret from a local docker config unless it exists
pub async fn ensure_registry_secret(
    cluster: &dyn ClusterClient,
    name: &str,
    docker_config: &Path,
) -> Result<Resource> {
    let content = tokio::fs::read(docker_config).await.map_err(|e| {
        AppError::ConfigError(format!(
            "unable to read docker config {}: {}",
            docker_config.display(),
            e
        ))
    })?;

    let secret = docker_config_secret(name, &content)?;
    let live = cluster
        .get_or_create(&GroupVersionResource::secrets(), &secret)
        .await
        .with_context(|| format!("unable to create registry secret {}", name))?;
    info!("🔑 Registry secret {} is ready", name);
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERNAL: &str = "image-registry.openshift-image-registry.svc:5000";

    #[test]
    fn test_two_segments_rejected() {
        let err = ImageTag::parse("myrepo/foo").unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(ImageTag::parse("a/b/c/d").is_err());
        assert!(ImageTag::parse("quay.io//app").is_err());
    }

    #[test]
    fn test_internal_tag_accepted() {
        let tag = "image-registry.openshift-image-registry.svc:5000/ns/app:latest";
        let parsed = ImageTag::parse(tag).unwrap();
        assert_eq!(parsed.namespace, "ns");
        assert_eq!(parsed.repository, "app:latest");
        assert_eq!(parsed.to_string(), tag);
        assert!(is_internal_registry(tag, INTERNAL).unwrap());
        assert!(!is_internal_registry("quay.io/team/app:1.0", INTERNAL).unwrap());
    }

    #[test]
    fn test_docker_config_secret() {
        let secret = docker_config_secret("regcred", br#"{"auths":{}}"#).unwrap();
        assert_eq!(secret.kind(), "Secret");
        assert_eq!(
            secret.pointer("/type").unwrap(),
            "kubernetes.io/dockerconfigjson"
        );
        assert_eq!(
            secret.pointer("/data/.dockerconfigjson").unwrap(),
            "eyJhdXRocyI6e319"
        );

        assert!(docker_config_secret("regcred", b"not json").is_err());
    }
}

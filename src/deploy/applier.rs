use super::mirror::ManifestMirror;
use super::template::{pluralise_kind, render, split_documents};
use crate::cluster::{ClusterClient, GroupVersionResource, Resource};
use crate::config::EngineConfig;
use crate::error::{AppError, Result, ResultExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEPLOY_COMPONENT_SUFFIX: &str = "-deploy";
pub const KEY_CONTAINER_IMAGE: &str = "CONTAINER_IMAGE";
pub const KEY_COMPONENT_NAME: &str = "COMPONENT_NAME";
pub const KEY_PORT: &str = "PORT";

#[derive(Debug, Clone, Default)]
pub struct DeployParameters {
    pub manifest: Vec<u8>,
    /// Image to deploy; empty means the latest image of the component's image stream
    pub tag: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub image: String,
    /// Live objects as returned by the cluster
    pub applied: Vec<Resource>,
    pub url: Option<String>,
}

/// Kinds that need extra handling when updated in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Service,
    Generic,
}

impl ResourceKind {
    pub fn of(resource: &Resource) -> Self {
        match resource.kind() {
            "Service" => ResourceKind::Service,
            _ => ResourceKind::Generic,
        }
    }

    /// Carry live-only fields into the desired object before an update
    pub fn prepare_update(self, live: &Resource, desired: &mut Resource) {
        desired.set_resource_version(live.resource_version());
        desired.set_annotations(&live.annotations());

        if self == ResourceKind::Service {
            if let Some(cluster_ip) = live.spec_cluster_ip().filter(|ip| !ip.is_empty()) {
                desired.set_spec_cluster_ip(cluster_ip);
            }
        }
    }
}

/// Decode one rendered document and work out where it lives
pub fn decode_document(document: &str) -> Result<(Resource, GroupVersionResource)> {
    let value: Value = serde_yaml::from_str(document).map_err(|e| {
        AppError::ValidationError(format!("Failed to decode the manifest yaml: {}", e))
    })?;
    let resource = Resource::from_value(value)?;

    if resource.api_version().is_empty() || resource.kind().is_empty() {
        return Err(AppError::ValidationError(
            "Failed to decode the manifest yaml: apiVersion and kind are required".to_string(),
        ));
    }
    if resource.name().is_empty() {
        return Err(AppError::ValidationError(format!(
            "Failed to decode the manifest yaml: {} has no metadata.name",
            resource.kind()
        )));
    }

    let gvr = GroupVersionResource::from_api_version(
        resource.api_version(),
        &pluralise_kind(resource.kind()),
    );
    debug!("🔍 Manifest type: {}", gvr);
    Ok((resource, gvr))
}

/// `dockerImageReference` of a tag in an image stream's status
pub fn image_stream_reference(image_stream: &Resource, tag: &str) -> Option<String> {
    image_stream
        .pointer("/status/tags")?
        .as_array()?
        .iter()
        .find(|t| t.get("tag").and_then(Value::as_str) == Some(tag))?
        .pointer("/items/0/dockerImageReference")?
        .as_str()
        .map(str::to_string)
}

/// Applies deploy manifests for one component
pub struct ManifestApplier {
    component: String,
    config: EngineConfig,
    cluster: Arc<dyn ClusterClient>,
}

impl ManifestApplier {
    pub fn new(component: impl Into<String>, config: EngineConfig, cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            component: component.into(),
            config,
            cluster,
        }
    }

    /// Name used for the deployed objects' `component` label
    pub fn application_name(&self) -> String {
        format!("{}{}", self.component, DEPLOY_COMPONENT_SUFFIX)
    }

    pub async fn deploy(&self, params: &DeployParameters) -> Result<DeployOutcome> {
        let application = self.application_name();

        let mut image_stream = None;
        let image = if params.tag.is_empty() {
            let stream = self
                .cluster
                .get(&GroupVersionResource::image_streams(), &self.component)
                .await
                .with_context(|| format!("unable to get image stream {}", self.component))?;
            let reference = image_stream_reference(&stream, "latest").ok_or_else(|| {
                AppError::NotFound(format!(
                    "image stream {} has no latest image, build the component first",
                    self.component
                ))
            })?;
            image_stream = Some(stream);
            reference
        } else {
            params.tag.clone()
        };

        let values = HashMap::from([
            (KEY_CONTAINER_IMAGE.to_string(), image.clone()),
            (KEY_COMPONENT_NAME.to_string(), application.clone()),
            (KEY_PORT.to_string(), params.port.to_string()),
        ]);
        let labels = BTreeMap::from([("component".to_string(), application.clone())]);

        let source = String::from_utf8_lossy(&params.manifest);
        let mut mirror = ManifestMirror::create(&self.config.manifest_mirror_path())
            .await
            .context("Unable to create the local manifest file")?;
        let mut applied = Vec::new();

        let result = self
            .apply_documents(&source, &values, &labels, &mut mirror, &mut applied)
            .await;
        // objects applied before a failure stay on the cluster and in the mirror
        let flushed = mirror.finish().await;
        if let Err(e) = result {
            if !applied.is_empty() {
                warn!(
                    "⚠️ Deploy of {} stopped after {} applied object(s)",
                    self.component,
                    applied.len()
                );
            }
            return Err(e);
        }
        flushed?;

        if let Some(stream) = image_stream.as_mut() {
            for live in &applied {
                stream.add_owner_reference(live.owner_reference());
            }
            self.cluster
                .update(&GroupVersionResource::image_streams(), stream)
                .await
                .with_context(|| format!("unable to update image stream {}", self.component))?;
        }

        info!("🔗 Determining the application URL");
        tokio::time::sleep(self.config.timeouts.deploy_settle()).await;
        let url = match self.application_url(&application).await {
            Ok(url) => {
                info!("✅ Successfully deployed component: {}", url);
                Some(url)
            }
            Err(e) => {
                warn!(
                    "⚠️ Unable to determine the application URL for component {}: {}",
                    self.component, e
                );
                None
            }
        };

        Ok(DeployOutcome { image, applied, url })
    }

    async fn apply_documents(
        &self,
        source: &str,
        values: &HashMap<String, String>,
        labels: &BTreeMap<String, String>,
        mirror: &mut ManifestMirror,
        applied: &mut Vec<Resource>,
    ) -> Result<()> {
        for document in split_documents(source) {
            let rendered = render(&document, values);
            let (mut desired, gvr) = decode_document(&rendered)?;
            desired.merge_labels(labels);
            desired.set_namespace(self.cluster.namespace());

            let live = self.apply(&gvr, desired).await?;
            mirror.append(&live).await?;
            applied.push(live);
        }
        Ok(())
    }

    async fn apply(&self, gvr: &GroupVersionResource, mut desired: Resource) -> Result<Resource> {
        let kind = desired.kind().to_string();
        let live = match self.cluster.get(gvr, desired.name()).await {
            Ok(live) => Some(live),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                return Err(e.context(format!("unable to look up {} {}", kind, desired.name())))
            }
        };

        match live {
            Some(live) => {
                info!("🔄 Updating resource of kind {}", kind);
                ResourceKind::of(&desired).prepare_update(&live, &mut desired);
                self.cluster
                    .update(gvr, &desired)
                    .await
                    .with_context(|| format!("Failed when Updating manifest {}", kind))
            }
            None => {
                info!("🆕 Creating resource of kind {}", kind);
                self.cluster
                    .create(gvr, &desired)
                    .await
                    .with_context(|| format!("Failed when Creating manifest {}", kind))
            }
        }
    }

    /// Route host when one is exposed, else the Service's cluster address
    pub async fn application_url(&self, application: &str) -> Result<String> {
        let selector = format!("component={}", application);

        let routes = match self
            .cluster
            .list(&GroupVersionResource::routes(), &selector)
            .await
        {
            Ok(routes) => routes,
            Err(e) => {
                debug!("Routes unavailable: {}", e);
                Vec::new()
            }
        };
        if let Some(route) = routes.first() {
            if let Some(host) = route.pointer("/spec/host").and_then(Value::as_str) {
                let scheme = if route.pointer("/spec/tls").is_some() { "https" } else { "http" };
                return Ok(format!("{}://{}", scheme, host));
            }
        }

        let services = self
            .cluster
            .list(&GroupVersionResource::services(), &selector)
            .await?;
        services
            .iter()
            .find_map(|service| {
                let ip = service.spec_cluster_ip().filter(|ip| !ip.is_empty())?;
                let port = service.pointer("/spec/ports/0/port")?.as_u64()?;
                Some(format!("{}:{}", ip, port))
            })
            .ok_or_else(|| {
                AppError::NotFound(format!("no route or service found for {}", selector))
            })
    }

    /// Delete every object named in a previously applied manifest
    pub async fn deploy_delete(&self, manifest: &[u8]) -> Result<()> {
        let source = String::from_utf8_lossy(manifest);

        for document in split_documents(&source) {
            let (resource, gvr) = decode_document(&document)?;
            let name = resource.name();

            match self.cluster.get(&gvr, name).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    return Err(AppError::NotFound(format!(
                        "Could not delete component {} as component was not found",
                        name
                    )))
                }
                Err(e) => return Err(e.context(format!("unable to look up {} {}", resource.kind(), name))),
            }

            self.cluster
                .delete(&gvr, name)
                .await
                .with_context(|| format!("unable to delete {} {}", resource.kind(), name))?;
            info!("🗑️ Deleted {} {}", resource.kind(), name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_update_keeps_cluster_ip_and_annotations() {
        let live = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "web-deploy",
                "resourceVersion": "7",
                "annotations": { "owner": "ops" },
            },
            "spec": { "clusterIP": "10.0.0.5" },
        }))
        .unwrap();
        let mut desired = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web-deploy" },
            "spec": { "ports": [{ "port": 8080 }] },
        }))
        .unwrap();

        ResourceKind::of(&desired).prepare_update(&live, &mut desired);
        assert_eq!(desired.spec_cluster_ip(), Some("10.0.0.5"));
        assert_eq!(desired.resource_version(), Some("7"));
        assert_eq!(desired.annotations()["owner"], "ops");
    }

    #[test]
    fn test_generic_update_leaves_spec_alone() {
        let live = Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web-deploy", "resourceVersion": "3" },
            "spec": { "clusterIP": "ignored" },
        }))
        .unwrap();
        let mut desired = Resource::new("apps/v1", "Deployment", "web-deploy");

        ResourceKind::of(&desired).prepare_update(&live, &mut desired);
        assert_eq!(desired.resource_version(), Some("3"));
        assert!(desired.pointer("/spec/clusterIP").is_none());
    }

    #[test]
    fn test_decode_document() {
        let (resource, gvr) =
            decode_document("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n").unwrap();
        assert_eq!(resource.name(), "web");
        assert_eq!(gvr, GroupVersionResource::deployments());

        assert!(decode_document("kind: [unclosed").is_err());
        assert!(decode_document("apiVersion: v1\nkind: Service\n").is_err());
    }

    #[test]
    fn test_image_stream_reference() {
        let stream = Resource::from_value(json!({
            "apiVersion": "image.openshift.io/v1",
            "kind": "ImageStream",
            "metadata": { "name": "web" },
            "status": { "tags": [
                { "tag": "old", "items": [{ "dockerImageReference": "r/ns/web@sha256:1" }] },
                { "tag": "latest", "items": [{ "dockerImageReference": "r/ns/web@sha256:2" }] },
            ]},
        }))
        .unwrap();
        assert_eq!(
            image_stream_reference(&stream, "latest").as_deref(),
            Some("r/ns/web@sha256:2")
        );
        assert!(image_stream_reference(&stream, "missing").is_none());
    }
}

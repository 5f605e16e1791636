use devpush::cluster::{GroupVersionResource, Resource};
use devpush::deploy::{DeployParameters, ManifestApplier};
use devpush::testing::{test_config, ClusterCall, FakeCluster, FAKE_CLUSTER_IP};
use devpush::AppError;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const MANIFEST: &str = r#"
kind: Deployment
apiVersion: apps/v1
metadata:
  name: {{.COMPONENT_NAME}}
  labels:
    tier: frontend
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {{.COMPONENT_NAME}}
  template:
    metadata:
      labels:
        app: {{.COMPONENT_NAME}}
    spec:
      containers:
        - name: {{.COMPONENT_NAME}}
          image: {{.CONTAINER_IMAGE}}
          ports:
            - containerPort: {{.PORT}}
---
# exposed inside the cluster
kind: Service
apiVersion: v1
metadata:
  name: {{.COMPONENT_NAME}}
spec:
  ports:
    - port: {{ .PORT }}
  selector:
    app: {{.COMPONENT_NAME}}
"#;

const ROUTE: &str = r#"
kind: Route
apiVersion: route.openshift.io/v1
metadata:
  name: {{.COMPONENT_NAME}}
spec:
  host: web.apps.example.com
  tls:
    termination: edge
  to:
    kind: Service
    name: {{.COMPONENT_NAME}}
"#;

fn applier(cluster: &Arc<FakeCluster>, dir: &Path) -> ManifestApplier {
    ManifestApplier::new("web", test_config(dir), cluster.clone())
}

fn params(manifest: &str, tag: &str) -> DeployParameters {
    DeployParameters {
        manifest: manifest.as_bytes().to_vec(),
        tag: tag.to_string(),
        port: 8080,
    }
}

#[tokio::test]
async fn test_deploy_renders_and_creates_objects() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));

    let outcome = applier(&cluster, dir.path())
        .deploy(&params(MANIFEST, "quay.io/team/web:1.0"))
        .await
        .unwrap();

    assert_eq!(outcome.image, "quay.io/team/web:1.0");
    assert_eq!(outcome.applied.len(), 2);
    assert_eq!(
        outcome.url.as_deref(),
        Some(format!("{}:8080", FAKE_CLUSTER_IP).as_str())
    );

    let deployment = cluster
        .object(&GroupVersionResource::deployments(), "web-deploy")
        .await
        .unwrap();
    let labels = deployment.labels();
    assert_eq!(labels["component"], "web-deploy");
    assert_eq!(labels["tier"], "frontend");
    assert_eq!(
        deployment
            .pointer("/spec/template/spec/containers/0/image")
            .unwrap(),
        "quay.io/team/web:1.0"
    );
    assert_eq!(
        deployment
            .pointer("/spec/template/spec/containers/0/ports/0/containerPort")
            .unwrap(),
        8080
    );
    assert_eq!(deployment.pointer("/metadata/namespace").unwrap(), "dev");

    let service = cluster
        .object(&GroupVersionResource::services(), "web-deploy")
        .await
        .unwrap();
    assert_eq!(service.labels()["component"], "web-deploy");
}

#[tokio::test]
async fn test_redeploy_updates_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));
    let applier = applier(&cluster, dir.path());
    applier
        .deploy(&params(MANIFEST, "quay.io/team/web:1.0"))
        .await
        .unwrap();

    let mut annotated = cluster
        .object(&GroupVersionResource::services(), "web-deploy")
        .await
        .unwrap();
    annotated.as_value_mut()["metadata"]["annotations"] = json!({ "owner": "ops" });
    cluster
        .insert(&GroupVersionResource::services(), annotated)
        .await;

    cluster.clear_calls().await;
    applier
        .deploy(&params(MANIFEST, "quay.io/team/web:2.0"))
        .await
        .unwrap();

    let calls = cluster.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, ClusterCall::Create { .. })));
    let service_update = calls
        .iter()
        .find_map(|c| match c {
            ClusterCall::Update { resource, body, .. } if resource == "services" => Some(body),
            _ => None,
        })
        .unwrap();
    assert_eq!(service_update.spec_cluster_ip(), Some(FAKE_CLUSTER_IP));
    assert_eq!(service_update.annotations()["owner"], "ops");

    let deployment = cluster
        .object(&GroupVersionResource::deployments(), "web-deploy")
        .await
        .unwrap();
    assert_eq!(
        deployment
            .pointer("/spec/template/spec/containers/0/image")
            .unwrap(),
        "quay.io/team/web:2.0"
    );
}

#[tokio::test]
async fn test_mirror_records_applied_objects() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));
    let config = test_config(dir.path());
    let applier = ManifestApplier::new("web", config.clone(), cluster.clone());

    applier
        .deploy(&params(MANIFEST, "quay.io/team/web:1.0"))
        .await
        .unwrap();

    let mirror = tokio::fs::read_to_string(config.manifest_mirror_path())
        .await
        .unwrap();
    assert_eq!(mirror.matches("\n---\n").count(), 1);
    assert!(mirror.contains("kind: Deployment"));
    assert!(mirror.contains("kind: Service"));
    assert!(!mirror.contains("{{"));

    applier.deploy_delete(mirror.as_bytes()).await.unwrap();
    assert!(cluster
        .objects(&GroupVersionResource::deployments())
        .await
        .is_empty());
    assert!(cluster.objects(&GroupVersionResource::services()).await.is_empty());

    let err = applier.deploy_delete(mirror.as_bytes()).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err
        .to_string()
        .contains("Could not delete component web-deploy as component was not found"));
}

#[tokio::test]
async fn test_deploy_from_image_stream_takes_ownership() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));
    let stream = Resource::from_value(json!({
        "apiVersion": "image.openshift.io/v1",
        "kind": "ImageStream",
        "metadata": { "name": "web" },
        "status": { "tags": [{
            "tag": "latest",
            "items": [{ "dockerImageReference": "image-registry.openshift-image-registry.svc:5000/dev/web@sha256:abc" }]
        }]}
    }))
    .unwrap();
    cluster
        .insert(&GroupVersionResource::image_streams(), stream)
        .await;

    let outcome = applier(&cluster, dir.path())
        .deploy(&params(MANIFEST, ""))
        .await
        .unwrap();
    assert_eq!(
        outcome.image,
        "image-registry.openshift-image-registry.svc:5000/dev/web@sha256:abc"
    );

    let stream = cluster
        .object(&GroupVersionResource::image_streams(), "web")
        .await
        .unwrap();
    let owners: Vec<String> = stream
        .owner_references()
        .into_iter()
        .map(|o| o.kind)
        .collect();
    assert_eq!(owners, vec!["Deployment".to_string(), "Service".to_string()]);
}

#[tokio::test]
async fn test_deploy_without_image_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));

    let err = applier(&cluster, dir.path())
        .deploy(&params(MANIFEST, ""))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(cluster
        .objects(&GroupVersionResource::deployments())
        .await
        .is_empty());
}

#[tokio::test]
async fn test_route_host_is_the_url() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));
    let manifest = format!("{}---{}", MANIFEST, ROUTE);

    let outcome = applier(&cluster, dir.path())
        .deploy(&params(&manifest, "quay.io/team/web:1.0"))
        .await
        .unwrap();
    assert_eq!(outcome.applied.len(), 3);
    assert_eq!(outcome.url.as_deref(), Some("https://web.apps.example.com"));
}

#[tokio::test]
async fn test_malformed_document_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));
    let manifest = "kind: ConfigMap\nmetadata:\n  name: settings\n";

    let err = applier(&cluster, dir.path())
        .deploy(&params(manifest, "quay.io/team/web:1.0"))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), AppError::ValidationError(_)));
    assert!(!cluster
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, ClusterCall::Create { .. })));
}

#[tokio::test]
async fn test_failure_midway_keeps_earlier_objects() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev"));
    let config = test_config(dir.path());
    let deployment = MANIFEST.split("\n---\n").next().unwrap();
    let manifest = format!("{}\n---\nkind: ConfigMap\nmetadata:\n  name: settings\n", deployment);

    let err = ManifestApplier::new("web", config.clone(), cluster.clone())
        .deploy(&params(&manifest, "quay.io/team/web:1.0"))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), AppError::ValidationError(_)));

    assert!(cluster
        .object(&GroupVersionResource::deployments(), "web-deploy")
        .await
        .is_some());
    let mirror = tokio::fs::read_to_string(config.manifest_mirror_path())
        .await
        .unwrap();
    assert!(mirror.contains("kind: Deployment"));
    assert!(!mirror.contains("ConfigMap"));
    assert!(!mirror.contains("---"));
}

#[tokio::test]
async fn test_forbidden_document_keeps_earlier_objects() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new("dev").with_forbidden("services"));
    let config = test_config(dir.path());

    let err = ManifestApplier::new("web", config.clone(), cluster.clone())
        .deploy(&params(MANIFEST, "quay.io/team/web:1.0"))
        .await
        .unwrap_err();
    assert!(err.is_forbidden());

    assert_eq!(
        cluster.objects(&GroupVersionResource::deployments()).await.len(),
        1
    );
    let mirror = tokio::fs::read_to_string(config.manifest_mirror_path())
        .await
        .unwrap();
    assert!(mirror.contains("name: web-deploy"));
    assert!(!mirror.contains("kind: Service"));
}

use devpush::build::builder_pod::{BUILD_CONTEXT_PATH, COMPLETION_SENTINEL, INIT_CONTAINER};
use devpush::build::{
    BuildParameters, BuildPipeline, BuildStrategy, InterruptSupervisor, ManualInterrupt,
};
use devpush::cluster::GroupVersionResource;
use devpush::config::EngineConfig;
use devpush::testing::{test_config, ClusterCall, FakeCluster, RecordingSync};
use devpush::AppError;
use std::path::Path;
use std::sync::Arc;

const INTERNAL_TAG: &str = "image-registry.openshift-image-registry.svc:5000/dev/web:latest";
const EXTERNAL_TAG: &str = "quay.io/team/web:1.0";

fn pipeline(
    cluster: &Arc<FakeCluster>,
    config: EngineConfig,
    interrupt: &ManualInterrupt,
) -> BuildPipeline {
    BuildPipeline::new(
        "web",
        config,
        cluster.clone(),
        Arc::new(RecordingSync::new()),
        InterruptSupervisor::new(Arc::new(interrupt.clone())),
    )
}

fn params(tag: &str, dir: &Path) -> BuildParameters {
    BuildParameters {
        tag: tag.to_string(),
        context_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

async fn assert_nothing_left(cluster: &FakeCluster) {
    for gvr in [
        GroupVersionResource::build_configs(),
        GroupVersionResource::builds(),
        GroupVersionResource::pods(),
    ] {
        assert!(cluster.objects(&gvr).await.is_empty(), "{} left behind", gvr);
    }
}

#[tokio::test]
async fn test_binary_build_to_image_stream() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev"));

    let outcome = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params("", dir.path()))
        .await
        .unwrap();

    assert_eq!(outcome.strategy, BuildStrategy::BinaryInput);
    assert_eq!(outcome.image, "web:latest");
    assert_eq!(outcome.build_name.as_deref(), Some("web-1"));
    assert_nothing_left(&cluster).await;
    assert!(cluster.objects(&GroupVersionResource::secrets()).await.is_empty());

    let calls = cluster.calls().await;
    assert!(calls
        .iter()
        .any(|c| matches!(c, ClusterCall::StartBuild { build_config } if build_config == "web")));
}

#[tokio::test]
async fn test_interrupted_binary_build_removes_build_config() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(
        FakeCluster::new("dev")
            .with_build_phases(&["Running"])
            .interrupt_on("start_binary_build", interrupt.clone()),
    );

    let err = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params(INTERNAL_TAG, dir.path()))
        .await
        .unwrap_err();

    assert!(err.is_interrupted(), "unexpected error: {}", err);
    assert_nothing_left(&cluster).await;
}

#[tokio::test]
async fn test_failed_build_reports_logs_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev").with_build_phases(&["Pending", "Failed"]));

    let err = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params(INTERNAL_TAG, dir.path()))
        .await
        .unwrap_err();

    assert!(matches!(err.root(), AppError::BuildError(_)));
    assert!(err.to_string().contains("logs of build web-1"));
    assert_nothing_left(&cluster).await;
}

#[tokio::test]
async fn test_build_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev").with_build_phases(&["Running"]));
    let mut config = test_config(dir.path());
    config.timeouts.build_seconds = 1;

    let err = pipeline(&cluster, config, &interrupt)
        .build(&params(INTERNAL_TAG, dir.path()))
        .await
        .unwrap_err();

    assert!(matches!(err.root(), AppError::Timeout(_)));
    assert_nothing_left(&cluster).await;
}

#[tokio::test]
async fn test_malformed_tag_is_rejected_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev"));

    let err = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params("myrepo/foo", dir.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)));
    assert!(cluster.calls().await.is_empty());
}

#[tokio::test]
async fn test_external_tag_creates_registry_secret() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("docker-config.json"), br#"{"auths":{}}"#)
        .await
        .unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev"));

    let outcome = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params(EXTERNAL_TAG, dir.path()))
        .await
        .unwrap();
    assert_eq!(outcome.image, EXTERNAL_TAG);

    let secret = cluster
        .object(&GroupVersionResource::secrets(), "regcred")
        .await
        .unwrap();
    assert_eq!(
        secret.pointer("/type").unwrap(),
        "kubernetes.io/dockerconfigjson"
    );
    assert_eq!(
        secret.pointer("/data/.dockerconfigjson").unwrap(),
        "eyJhdXRocyI6e319"
    );
}

#[tokio::test]
async fn test_external_tag_without_docker_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev"));

    let err = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params(EXTERNAL_TAG, dir.path()))
        .await
        .unwrap_err();

    assert!(matches!(err.root(), AppError::ConfigError(_)));
    assert!(cluster.objects(&GroupVersionResource::build_configs()).await.is_empty());
}

#[tokio::test]
async fn test_builder_pod_build_releases_and_removes_pod() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev").without_build_api());

    let outcome = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params(INTERNAL_TAG, dir.path()))
        .await
        .unwrap();
    assert_eq!(outcome.strategy, BuildStrategy::BuilderPod);
    assert!(outcome.build_name.is_none());

    let calls = cluster.calls().await;
    assert!(calls.iter().any(|c| matches!(
        c,
        ClusterCall::ExtractArchive { container, dest, .. }
            if container == INIT_CONTAINER && dest == BUILD_CONTEXT_PATH
    )));
    let release = format!("touch {}", COMPLETION_SENTINEL);
    assert!(cluster
        .exec_commands()
        .await
        .iter()
        .any(|c| c.join(" ") == release));
    assert!(calls
        .iter()
        .any(|c| matches!(c, ClusterCall::Delete { resource, name } if resource == "pods" && name == "web")));
    assert_nothing_left(&cluster).await;
}

#[tokio::test]
async fn test_rootless_uses_builder_pod() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev"));

    let outcome = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&BuildParameters {
            rootless: true,
            ..params(INTERNAL_TAG, dir.path())
        })
        .await
        .unwrap();
    assert_eq!(outcome.strategy, BuildStrategy::BuilderPod);
    assert!(!cluster
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, ClusterCall::StartBuild { .. })));
}

#[tokio::test]
async fn test_builder_pod_needs_a_tag() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(FakeCluster::new("dev").without_build_api());

    let err = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params("", dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    assert_nothing_left(&cluster).await;
}

#[tokio::test]
async fn test_failed_builder_pod_includes_logs() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(
        FakeCluster::new("dev")
            .without_build_api()
            .with_failing_builder_pod(),
    );

    let err = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params(INTERNAL_TAG, dir.path()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("logs of web/build"));
    assert_nothing_left(&cluster).await;
}

#[tokio::test]
async fn test_interrupted_builder_pod_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = ManualInterrupt::new();
    let cluster = Arc::new(
        FakeCluster::new("dev")
            .without_build_api()
            .with_stuck_builder_pod()
            .interrupt_on("extract_archive", interrupt.clone()),
    );

    let err = pipeline(&cluster, test_config(dir.path()), &interrupt)
        .build(&params(INTERNAL_TAG, dir.path()))
        .await
        .unwrap_err();

    assert!(err.is_interrupted(), "unexpected error: {}", err);
    assert!(cluster
        .object(&GroupVersionResource::pods(), "web")
        .await
        .is_none());
}

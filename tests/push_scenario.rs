use devpush::cluster::{GroupVersionResource, Resource};
use devpush::build::builder_pod::builder_labels;
use devpush::component::{claim_volume_name, ComponentAdapter, PushParameters};
use devpush::devfile::CommandOverrides;
use devpush::exec::supervisor::SUPERVISORD_BIN;
use devpush::testing::{
    devfile, test_config, ClusterCall, FakeCluster, RecordingSync, FAKE_CLUSTER_IP,
    FULL_DEVFILE, NODEJS_DEVFILE,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

struct Harness {
    cluster: Arc<FakeCluster>,
    sync: RecordingSync,
    adapter: ComponentAdapter,
}

fn harness(yaml: &str, cluster: FakeCluster, dir: &Path) -> Harness {
    named_harness("web", yaml, cluster, dir)
}

fn named_harness(name: &str, yaml: &str, cluster: FakeCluster, dir: &Path) -> Harness {
    let cluster = Arc::new(cluster);
    let sync = RecordingSync::new();
    let adapter = ComponentAdapter::new(
        name,
        devfile(yaml).unwrap(),
        test_config(dir),
        cluster.clone(),
        Arc::new(sync.clone()),
    )
    .unwrap();
    Harness {
        cluster,
        sync,
        adapter,
    }
}

fn params(dir: &Path) -> PushParameters {
    PushParameters {
        path: dir.to_path_buf(),
        ..Default::default()
    }
}

fn joined(commands: Vec<Vec<String>>) -> Vec<String> {
    commands.into_iter().map(|c| c.join(" ")).collect()
}

fn container_env(deployment: &Resource, name: &str) -> Option<String> {
    deployment
        .pointer("/spec/template/spec/containers/0/env")?
        .as_array()?
        .iter()
        .find(|e| e["name"] == name)
        .and_then(|e| e["value"].as_str())
        .map(str::to_string)
}

#[tokio::test]
async fn test_first_push_creates_workload_and_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(NODEJS_DEVFILE, FakeCluster::new("dev"), dir.path());

    let outcome = h.adapter.push(&params(dir.path())).await.unwrap();
    assert!(!outcome.component_existed);
    assert!(outcome.executed_commands);

    let deployments = h.cluster.objects(&GroupVersionResource::deployments()).await;
    assert_eq!(deployments.len(), 1);
    let deployment = &deployments[0];
    let containers = deployment
        .pointer("/spec/template/spec/containers")
        .and_then(Value::as_array)
        .unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["name"], "runtime");
    assert_eq!(containers[0]["ports"].as_array().unwrap().len(), 1);
    assert_eq!(containers[0]["ports"][0]["containerPort"], 3000);
    assert_eq!(
        container_env(deployment, "DEVPUSH_COMMAND_RUN").as_deref(),
        Some("npm start")
    );

    let services = h.cluster.objects(&GroupVersionResource::services()).await;
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].pointer("/spec/ports/0/port").unwrap(), 3000);
    assert_eq!(services[0].owner_references()[0].name, "web");

    assert!(h
        .cluster
        .objects(&GroupVersionResource::persistent_volume_claims())
        .await
        .is_empty());

    let ran = joined(h.cluster.exec_commands().await);
    let run_dispatches: Vec<_> = ran
        .iter()
        .filter(|c| *c == &format!("{} ctl start devrun", SUPERVISORD_BIN))
        .collect();
    assert_eq!(run_dispatches.len(), 1);
    assert!(ran.iter().all(|c| !c.starts_with("/bin/sh")));

    let syncs = h.sync.syncs().await;
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].target.container_name, "runtime");
    assert_eq!(syncs[0].target.source_mount.as_deref(), Some("/projects"));
}

#[tokio::test]
async fn test_repeated_push_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(FULL_DEVFILE, FakeCluster::new("dev"), dir.path());

    let first = h.adapter.push(&params(dir.path())).await.unwrap();
    let claims = h
        .cluster
        .objects(&GroupVersionResource::persistent_volume_claims())
        .await;
    assert_eq!(claims.len(), 1);

    h.cluster.clear_calls().await;
    let second = h.adapter.push(&params(dir.path())).await.unwrap();

    assert!(second.component_existed);
    assert!(!second.pod_changed);
    assert_eq!(first.pod_name, second.pod_name);
    assert!(!second.executed_commands);
    assert!(second.resources.created_claims.is_empty());
    assert_eq!(second.resources.bindings, first.resources.bindings);

    let claims_after = h
        .cluster
        .objects(&GroupVersionResource::persistent_volume_claims())
        .await;
    assert_eq!(claims_after.len(), 1);
    assert_eq!(claims_after[0].name(), claims[0].name());
    assert_eq!(
        h.cluster.objects(&GroupVersionResource::services()).await.len(),
        1
    );

    let calls = h.cluster.calls().await;
    assert!(!calls.iter().any(|c| matches!(
        c,
        ClusterCall::Create { .. } | ClusterCall::Exec { .. }
    )));
}

#[tokio::test]
async fn test_shared_volume_yields_one_claim() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(FULL_DEVFILE, FakeCluster::new("dev"), dir.path());

    let outcome = h.adapter.push(&params(dir.path())).await.unwrap();
    assert_eq!(outcome.resources.bindings.len(), 1);
    assert_eq!(outcome.resources.bindings[0].volume_name, "m2");
    assert_eq!(outcome.resources.bindings[0].size, "3Gi");

    let claims = h
        .cluster
        .objects(&GroupVersionResource::persistent_volume_claims())
        .await;
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].labels()["storage-name"], "m2");

    let deployment = h
        .cluster
        .object(&GroupVersionResource::deployments(), "web")
        .await
        .unwrap();
    let claim_volume = claim_volume_name(claims[0].name());
    let mounts: Vec<String> = deployment
        .pointer("/spec/template/spec/containers")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .flat_map(|c| c["volumeMounts"].as_array().cloned().unwrap_or_default())
        .filter_map(|m| m["name"].as_str().map(str::to_string))
        .filter(|name| *name == claim_volume)
        .collect();
    assert_eq!(mounts.len(), 2);
}

#[tokio::test]
async fn test_long_component_name_keeps_volume_names_valid() {
    let dir = tempfile::tempdir().unwrap();
    let name = "a".repeat(70);
    let h = named_harness(&name, FULL_DEVFILE, FakeCluster::new("dev"), dir.path());

    h.adapter.push(&params(dir.path())).await.unwrap();

    let claims = h
        .cluster
        .objects(&GroupVersionResource::persistent_volume_claims())
        .await;
    assert_eq!(claims.len(), 1);
    assert!(claims[0].name().len() <= 63);

    let deployment = h
        .cluster
        .object(&GroupVersionResource::deployments(), &name)
        .await
        .unwrap();
    let template = deployment.pointer("/spec/template/spec").unwrap();
    let volumes = template["volumes"].as_array().unwrap();
    let claim_volume = volumes
        .iter()
        .find(|v| v["persistentVolumeClaim"]["claimName"] == claims[0].name())
        .and_then(|v| v["name"].as_str())
        .unwrap();
    for volume in volumes {
        let volume = volume["name"].as_str().unwrap();
        assert!(volume.len() <= 63, "{} is {} chars", volume, volume.len());
    }

    let mounts: Vec<&str> = template["containers"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|c| c["volumeMounts"].as_array().unwrap().iter())
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert_eq!(mounts.iter().filter(|m| **m == claim_volume).count(), 2);
    assert!(mounts.iter().all(|m| m.len() <= 63));
}

#[tokio::test]
async fn test_first_push_runs_init_post_start_build_then_run() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(FULL_DEVFILE, FakeCluster::new("dev"), dir.path());

    h.adapter.push(&params(dir.path())).await.unwrap();

    let ran = joined(h.cluster.exec_commands().await);
    let position = |needle: &str| {
        ran.iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("{} was not executed: {:?}", needle, ran))
    };
    assert!(position("wait-for-db.sh") < position("mkdir -p /projects/.cache"));
    assert!(position("mkdir -p /projects/.cache") < position("mvn -Dmaven"));
    assert!(position("mvn -Dmaven") < position("ctl start devrun"));
}

#[tokio::test]
async fn test_hot_reload_command_is_not_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(FULL_DEVFILE, FakeCluster::new("dev"), dir.path());
    h.adapter.push(&params(dir.path())).await.unwrap();

    h.cluster.clear_calls().await;
    h.sync.mark_changed();
    let outcome = h.adapter.push(&params(dir.path())).await.unwrap();
    assert!(outcome.executed_commands);

    let ran = joined(h.cluster.exec_commands().await);
    assert!(ran.iter().any(|c| c.ends_with("ctl start devrun")));
    assert!(!ran.iter().any(|c| c.contains("ctl stop")));
    assert!(!ran.iter().any(|c| c.contains("wait-for-db.sh")));
    assert!(!ran.iter().any(|c| c.contains("mkdir -p /projects/.cache")));
}

#[tokio::test]
async fn test_service_update_keeps_cluster_ip() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(NODEJS_DEVFILE, FakeCluster::new("dev"), dir.path());
    h.adapter.push(&params(dir.path())).await.unwrap();

    h.cluster.clear_calls().await;
    h.adapter.push(&params(dir.path())).await.unwrap();

    let update = h
        .cluster
        .calls()
        .await
        .into_iter()
        .find_map(|call| match call {
            ClusterCall::Update { resource, body, .. } if resource == "services" => Some(body),
            _ => None,
        })
        .unwrap();
    assert_eq!(update.spec_cluster_ip(), Some(FAKE_CLUSTER_IP));
    assert!(update.resource_version().is_some());
}

#[tokio::test]
async fn test_debug_push_requires_debug_command() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(NODEJS_DEVFILE, FakeCluster::new("dev"), dir.path());

    let err = h
        .adapter
        .push(&PushParameters {
            debug: true,
            ..params(dir.path())
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("debug command"));
    assert!(h.cluster.objects(&GroupVersionResource::deployments()).await.is_empty());
}

#[tokio::test]
async fn test_unknown_run_override_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(NODEJS_DEVFILE, FakeCluster::new("dev"), dir.path());

    let err = h
        .adapter
        .push(&PushParameters {
            overrides: CommandOverrides {
                run: Some("missing".to_string()),
                ..Default::default()
            },
            ..params(dir.path())
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to validate devfile build and run commands"));
}

#[tokio::test]
async fn test_test_command_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        FULL_DEVFILE,
        FakeCluster::new("dev").with_failing_exec("checkstyle"),
        dir.path(),
    );
    h.adapter.push(&params(dir.path())).await.unwrap();
    h.cluster.clear_calls().await;

    assert!(h.adapter.test(None, false).await.is_err());

    let ran = joined(h.cluster.exec_commands().await);
    assert!(ran.iter().any(|c| c.ends_with("mvn compile")));
    assert!(!ran.iter().any(|c| c.ends_with("mvn test")));
}

#[tokio::test]
async fn test_exec_and_log_target_run_container() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        NODEJS_DEVFILE,
        FakeCluster::new("dev").with_exec_output("ls -la", "package.json\nserver.js\n"),
        dir.path(),
    );
    h.adapter.push(&params(dir.path())).await.unwrap();

    let output = h.adapter.exec(&["ls".to_string(), "-la".to_string()]).await.unwrap();
    assert_eq!(output, "package.json\nserver.js\n");
    let last = h.cluster.calls().await.into_iter().rev().find_map(|call| match call {
        ClusterCall::Exec { container, command, .. } => Some((container, command)),
        _ => None,
    });
    assert_eq!(
        last,
        Some(("runtime".to_string(), vec!["ls".to_string(), "-la".to_string()]))
    );

    let logs = h.adapter.log(false).await.unwrap();
    assert!(logs.ends_with("/runtime"));
    assert!(h.adapter.log(true).await.is_err());
}

#[tokio::test]
async fn test_builder_pod_is_not_the_component_pod() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(NODEJS_DEVFILE, FakeCluster::new("dev"), dir.path());
    let pushed = h.adapter.push(&params(dir.path())).await.unwrap();

    let builder = Resource::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "web", "labels": builder_labels("web") },
        "status": { "phase": "Pending" },
    }))
    .unwrap();
    h.cluster.insert(&GroupVersionResource::pods(), builder).await;
    h.cluster.clear_calls().await;

    h.adapter.exec(&["ls".to_string()]).await.unwrap();
    let pods: Vec<String> = h
        .cluster
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            ClusterCall::Exec { pod, .. } => Some(pod),
            _ => None,
        })
        .collect();
    assert_eq!(pods, vec![pushed.pod_name.clone()]);
    assert_ne!(pushed.pod_name, "web");

    assert!(h.adapter.log(false).await.is_ok());
    let again = h.adapter.push(&params(dir.path())).await.unwrap();
    assert_eq!(again.pod_name, pushed.pod_name);
}

#[tokio::test]
async fn test_delete_cascades_and_tolerates_absence() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(FULL_DEVFILE, FakeCluster::new("dev"), dir.path());
    h.adapter.push(&params(dir.path())).await.unwrap();

    h.adapter.delete().await.unwrap();
    for gvr in [
        GroupVersionResource::deployments(),
        GroupVersionResource::services(),
        GroupVersionResource::persistent_volume_claims(),
        GroupVersionResource::pods(),
    ] {
        assert!(h.cluster.objects(&gvr).await.is_empty(), "{} left behind", gvr);
    }

    h.adapter.delete().await.unwrap();
    assert!(h.adapter.exec(&["ls".to_string()]).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_with_forbidden_existence_check_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        NODEJS_DEVFILE,
        FakeCluster::new("dev").with_forbidden("deployments"),
        dir.path(),
    );

    h.adapter.delete().await.unwrap();
    assert!(!h
        .cluster
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, ClusterCall::DeleteCollection { .. })));

    let err = h.adapter.push(&params(dir.path())).await.unwrap_err();
    assert!(err.is_forbidden());
}

#[tokio::test]
async fn test_removed_endpoints_delete_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(NODEJS_DEVFILE, FakeCluster::new("dev"), dir.path());
    h.adapter.push(&params(dir.path())).await.unwrap();

    let without_ports = NODEJS_DEVFILE.replace(
        "      endpoints:\n        - name: http-3000\n          targetPort: 3000\n",
        "",
    );
    let adapter = ComponentAdapter::new(
        "web",
        devfile(&without_ports).unwrap(),
        test_config(dir.path()),
        h.cluster.clone(),
        Arc::new(h.sync.clone()),
    )
    .unwrap();
    adapter.push(&params(dir.path())).await.unwrap();

    assert!(h.cluster.objects(&GroupVersionResource::services()).await.is_empty());
}

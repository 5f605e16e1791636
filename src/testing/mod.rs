//! In-memory collaborators for exercising the engine without a cluster

pub mod fake_cluster;
pub mod fixtures;
pub mod recording_sync;

pub use fake_cluster::{ClusterCall, FakeCluster, FAKE_CLUSTER_IP};
pub use fixtures::{devfile, test_config, FULL_DEVFILE, NODEJS_DEVFILE};
pub use recording_sync::RecordingSync;

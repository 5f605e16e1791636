use super::generator::ComponentSpec;
use super::storage::{self, VolumeBinding};
use crate::cluster::{ClusterClient, GroupVersionResource, OwnerReference, Resource};
use crate::error::{Result, ResultExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub deployment: Resource,
    pub service: Option<Resource>,
    pub bindings: Vec<VolumeBinding>,
    pub created_claims: Vec<String>,
}

/// Copy the fields an update must carry over from the live Service
pub fn carry_forward_service_fields(live: &Resource, desired: &mut Resource) {
    if let Some(cluster_ip) = live.spec_cluster_ip() {
        desired.set_spec_cluster_ip(cluster_ip);
    }
    desired.set_resource_version(live.resource_version());
}

/// Applies a [`ComponentSpec`]: Deployment, then Service, then claims.
///
/// The first failing call aborts the pass. Every step is idempotent, so the
/// caller retries the whole pass rather than resuming.
pub struct ResourceReconciler {
    cluster: Arc<dyn ClusterClient>,
}

impl ResourceReconciler {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    pub async fn reconcile(&self, spec: &ComponentSpec, component_exists: bool) -> Result<ReconcileOutcome> {
        let cluster = self.cluster.as_ref();
        let bindings = storage::resolve_bindings(cluster, spec).await?;

        let desired = spec.deployment(&bindings)?;
        let gvr = GroupVersionResource::deployments();
        let deployment = if component_exists {
            debug!("🔄 Component {} exists, updating deployment", spec.name);
            let live = cluster
                .update(&gvr, &desired)
                .await
                .with_context(|| format!("unable to update deployment {}", spec.name))?;
            info!("✅ Updated component {}", spec.name);
            live
        } else {
            let live = cluster
                .create(&gvr, &desired)
                .await
                .with_context(|| format!("unable to create deployment {}", spec.name))?;
            info!("✅ Created component {}", spec.name);
            live
        };

        let owner = deployment.owner_reference();
        let service = self.reconcile_service(spec, &owner).await?;
        let created_claims =
            storage::create_missing(cluster, &bindings, &spec.name, Some(&owner)).await?;

        Ok(ReconcileOutcome {
            deployment,
            service,
            bindings,
            created_claims,
        })
    }

    async fn reconcile_service(&self, spec: &ComponentSpec, owner: &OwnerReference) -> Result<Option<Resource>> {
        let gvr = GroupVersionResource::services();
        let live = match self.cluster.get(&gvr, &spec.name).await {
            Ok(service) => Some(service),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.context(format!("unable to get service {}", spec.name))),
        };

        if spec.service_ports().is_empty() {
            if live.is_some() {
                self.cluster
                    .delete(&gvr, &spec.name)
                    .await
                    .with_context(|| format!("unable to delete service {}", spec.name))?;
                info!("🗑️ Deleted service {}: no ports declared", spec.name);
            }
            return Ok(None);
        }

        let mut desired = spec.service(Some(owner))?;
        let service = match live {
            None => self
                .cluster
                .create(&gvr, &desired)
                .await
                .with_context(|| format!("unable to create service {}", spec.name))?,
            Some(live) => {
                carry_forward_service_fields(&live, &mut desired);
                self.cluster
                    .update(&gvr, &desired)
                    .await
                    .with_context(|| format!("unable to update service {}", spec.name))?
            }
        };
        debug!("✅ Service {} reconciled", spec.name);
        Ok(Some(service))
    }
}

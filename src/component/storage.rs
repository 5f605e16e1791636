use super::generator::{ComponentSpec, COMPONENT_LABEL};
use crate::cluster::{ClusterClient, GroupVersionResource, OwnerReference, Resource};
use crate::error::{AppError, Result, ResultExt};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

pub const STORAGE_NAME_LABEL: &str = "storage-name";

/// DNS-1123 label limit
const MAX_NAME_LEN: usize = 63;
const SUFFIX_LEN: usize = 4;

/// Appended to a claim name to name the pod volume that mounts it
pub const CLAIM_VOLUME_SUFFIX: &str = "-vol";

/// Devfile volume mapped to the claim that backs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub volume_name: String,
    pub pvc_name: String,
    pub size: String,
}

/// `<volume>-<component>` sanitised to DNS-1123 with a stable 4-char hash suffix
pub fn generate_pvc_name(volume: &str, component: &str) -> Result<String> {
    let raw = format!("{}-{}", volume, component).to_lowercase();
    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let mut base = sanitized.trim_matches('-').to_string();
    if base.is_empty() {
        return Err(AppError::ValidationError(format!(
            "cannot derive a claim name from volume '{}' and component '{}'",
            volume, component
        )));
    }

    // leave room for the pod volume suffix
    base.truncate(MAX_NAME_LEN - SUFFIX_LEN - 1 - CLAIM_VOLUME_SUFFIX.len());
    let base = base.trim_end_matches('-');

    Ok(format!("{}-{}", base, short_hash(&format!("{}/{}", volume, component))))
}

/// Pod volume name for a claim, kept within the DNS-1123 label limit.
///
/// Claims created elsewhere can already use all 63 characters; those are
/// shortened and re-suffixed with a hash of the full claim name.
pub fn claim_volume_name(pvc_name: &str) -> String {
    if pvc_name.len() + CLAIM_VOLUME_SUFFIX.len() <= MAX_NAME_LEN {
        return format!("{}{}", pvc_name, CLAIM_VOLUME_SUFFIX);
    }

    let mut base = pvc_name.to_string();
    base.truncate(MAX_NAME_LEN - SUFFIX_LEN - 1 - CLAIM_VOLUME_SUFFIX.len());
    let base = base.trim_end_matches('-');
    format!("{}-{}{}", base, short_hash(pvc_name), CLAIM_VOLUME_SUFFIX)
}

fn short_hash(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(SUFFIX_LEN)
        .collect()
}

pub fn storage_labels(volume: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (STORAGE_NAME_LABEL.to_string(), volume.to_string()),
    ])
}

/// Name of a claim already labelled for this volume and component
pub async fn existing_pvc_name(
    cluster: &dyn ClusterClient,
    volume: &str,
    component: &str,
) -> Result<Option<String>> {
    let selector = crate::cluster::label_selector(&storage_labels(volume, component));
    let claims = cluster
        .list(&GroupVersionResource::persistent_volume_claims(), &selector)
        .await
        .with_context(|| format!("unable to list claims for volume {}", volume))?;

    match claims.as_slice() {
        [] => Ok(None),
        [claim] => Ok(Some(claim.name().to_string())),
        _ => Err(AppError::KubernetesError(format!(
            "more than 1 PVC found with the label {}",
            selector
        ))),
    }
}

/// One binding per distinct volume name across all containers, reusing
/// existing claims where the labels match
pub async fn resolve_bindings(
    cluster: &dyn ClusterClient,
    spec: &ComponentSpec,
) -> Result<Vec<VolumeBinding>> {
    let mut seen = HashSet::new();
    let mut bindings = Vec::new();

    for request in &spec.volumes {
        if !seen.insert(request.volume.clone()) {
            continue;
        }

        debug!("🔍 Generating claim name for volume {}", request.volume);
        let pvc_name = match existing_pvc_name(cluster, &request.volume, &spec.name).await? {
            Some(existing) => {
                debug!("♻️ Reusing claim {} for volume {}", existing, request.volume);
                existing
            }
            None => generate_pvc_name(&request.volume, &spec.name)?,
        };

        bindings.push(VolumeBinding {
            volume_name: request.volume.clone(),
            pvc_name,
            size: request.size.clone(),
        });
    }
    Ok(bindings)
}

pub fn pvc_resource(binding: &VolumeBinding, component: &str, owner: Option<&OwnerReference>) -> Result<Resource> {
    let mut pvc = Resource::from_value(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": binding.pvc_name,
            "labels": storage_labels(&binding.volume_name, component),
        },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": binding.size } },
        },
    }))?;
    if let Some(owner) = owner {
        pvc.add_owner_reference(owner.clone());
    }
    Ok(pvc)
}

/// Create the claims that do not exist yet; returns the names created
pub async fn create_missing(
    cluster: &dyn ClusterClient,
    bindings: &[VolumeBinding],
    component: &str,
    owner: Option<&OwnerReference>,
) -> Result<Vec<String>> {
    let gvr = GroupVersionResource::persistent_volume_claims();
    let mut created = Vec::new();

    for binding in bindings {
        match cluster.get(&gvr, &binding.pvc_name).await {
            Ok(_) => continue,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.context(format!("unable to get claim {}", binding.pvc_name))),
        }

        let pvc = pvc_resource(binding, component, owner)?;
        cluster
            .create(&gvr, &pvc)
            .await
            .with_context(|| format!("unable to create claim {}", binding.pvc_name))?;
        info!("💾 Created storage {} for volume {}", binding.pvc_name, binding.volume_name);
        created.push(binding.pvc_name.clone());
    }
    Ok(created)
}

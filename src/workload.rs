//! Workload reconciliation
//!
//! Ensures the console Deployment, Service and (when a descriptor is
//! present) the branding ConfigMap. The Deployment is the one object that
//! gets updated on upgrade: installer-owned fields are merged into the live
//! object field by field, and fields the installer does not own (replicas
//! after an operator scaled it, rollout strategy, annotations added by other
//! controllers) are left exactly as found. A converged Deployment produces
//! no update call at all, so a repeated run is observably a no-op.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use tracing::{debug, info};

use crate::cluster::{ClusterApi, CreateOutcome};
use crate::manifests;
use crate::reconcile::DeployContext;
use crate::Result;

/// Ensure the console workload objects exist and match the desired state
pub async fn ensure_workload(api: &impl ClusterApi, ctx: &DeployContext) -> Result<()> {
    if let Some(descriptor) = &ctx.application_metadata {
        ensure_application_metadata(api, &ctx.namespace, descriptor).await?;
    }
    ensure_deployment(api, ctx).await?;
    ensure_service(api, &ctx.namespace).await
}

/// Ensure the branding ConfigMap exists; existing content is left alone
///
/// The descriptor in an existing map may have been edited by the vendor's
/// own tooling after install, so it is never overwritten here.
async fn ensure_application_metadata(
    api: &impl ClusterApi,
    namespace: &str,
    descriptor: &[u8],
) -> Result<()> {
    if api
        .get_config_map(namespace, crate::APPLICATION_METADATA_NAME)
        .await?
        .is_some()
    {
        debug!(name = crate::APPLICATION_METADATA_NAME, namespace = %namespace, "application metadata already present");
        return Ok(());
    }

    match api
        .create_config_map(namespace, &manifests::application_metadata(namespace, descriptor))
        .await?
    {
        CreateOutcome::Created => {
            info!(name = crate::APPLICATION_METADATA_NAME, namespace = %namespace, "created application metadata")
        }
        CreateOutcome::AlreadyExists => {
            debug!(name = crate::APPLICATION_METADATA_NAME, namespace = %namespace, "application metadata created concurrently")
        }
    }
    Ok(())
}

/// The container the installer owns inside a pod spec
///
/// Matched by the component name; a live Deployment whose containers were
/// renamed out from under us falls back to the first container, which is
/// where the console image runs in every shape this installer has ever
/// written.
fn console_container_mut(containers: &mut [Container]) -> Option<&mut Container> {
    if let Some(idx) = containers
        .iter()
        .position(|c| c.name == crate::COMPONENT_NAME)
    {
        return containers.get_mut(idx);
    }
    containers.first_mut()
}

/// Merge installer-owned fields of `desired` into `live`
///
/// Returns whether anything changed. Only the fields this installer writes
/// are compared and copied; everything else on the live object survives.
fn merge_deployment(live: &mut Deployment, desired: &Deployment) -> bool {
    let mut changed = false;

    let Some(desired_spec) = desired.spec.as_ref() else {
        return false;
    };
    let Some(desired_pod) = desired_spec.template.spec.as_ref() else {
        return false;
    };

    if live.spec.is_none() {
        live.spec = desired.spec.clone();
        return true;
    }
    let Some(live_spec) = live.spec.as_mut() else {
        return false;
    };

    if live_spec.template.spec.is_none() {
        live_spec.template = desired_spec.template.clone();
        return true;
    }
    let Some(live_pod) = live_spec.template.spec.as_mut() else {
        return false;
    };

    if live_pod.service_account_name != desired_pod.service_account_name {
        live_pod.service_account_name = desired_pod.service_account_name.clone();
        changed = true;
    }

    let desired_container = &desired_pod.containers[0];
    match console_container_mut(&mut live_pod.containers) {
        Some(live_container) => {
            if live_container.image != desired_container.image {
                live_container.image = desired_container.image.clone();
                changed = true;
            }
            if live_container.image_pull_policy != desired_container.image_pull_policy {
                live_container.image_pull_policy = desired_container.image_pull_policy.clone();
                changed = true;
            }
            if live_container.env != desired_container.env {
                live_container.env = desired_container.env.clone();
                changed = true;
            }
            if live_container.resources != desired_container.resources {
                live_container.resources = desired_container.resources.clone();
                changed = true;
            }
            if live_container.ports != desired_container.ports {
                live_container.ports = desired_container.ports.clone();
                changed = true;
            }
        }
        None => {
            live_pod.containers = desired_pod.containers.clone();
            changed = true;
        }
    }

    changed
}

/// Ensure the console Deployment, merging on upgrade
async fn ensure_deployment(api: &impl ClusterApi, ctx: &DeployContext) -> Result<()> {
    let desired = manifests::deployment(ctx);

    let Some(mut live) = api
        .get_deployment(&ctx.namespace, crate::COMPONENT_NAME)
        .await?
    else {
        match api.create_deployment(&ctx.namespace, &desired).await? {
            CreateOutcome::Created => {
                info!(name = crate::COMPONENT_NAME, namespace = %ctx.namespace, image = %ctx.image, "created deployment")
            }
            CreateOutcome::AlreadyExists => {
                debug!(name = crate::COMPONENT_NAME, namespace = %ctx.namespace, "deployment created concurrently")
            }
        }
        return Ok(());
    };

    if merge_deployment(&mut live, &desired) {
        api.update_deployment(&ctx.namespace, crate::COMPONENT_NAME, &live)
            .await?;
        info!(name = crate::COMPONENT_NAME, namespace = %ctx.namespace, image = %ctx.image, "updated deployment");
    } else {
        debug!(name = crate::COMPONENT_NAME, namespace = %ctx.namespace, "deployment converged");
    }
    Ok(())
}

/// Ensure the console Service exists; an existing Service is never updated
async fn ensure_service(api: &impl ClusterApi, namespace: &str) -> Result<()> {
    if api
        .get_service(namespace, crate::COMPONENT_NAME)
        .await?
        .is_some()
    {
        debug!(name = crate::COMPONENT_NAME, namespace = %namespace, "service already present");
        return Ok(());
    }

    match api
        .create_service(namespace, &manifests::service(namespace))
        .await?
    {
        CreateOutcome::Created => {
            info!(name = crate::COMPONENT_NAME, namespace = %namespace, "created service")
        }
        CreateOutcome::AlreadyExists => {
            debug!(name = crate::COMPONENT_NAME, namespace = %namespace, "service created concurrently")
        }
    }
    Ok(())
}

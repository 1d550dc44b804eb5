//! RBAC reconciliation
//!
//! Ensures the console's permission objects exist and are correctly merged,
//! on one of two paths chosen by the scope decision:
//!
//! - **Cluster path**: singleton ClusterRole and ClusterRoleBinding under
//!   fixed well-known names, plus the namespaced ServiceAccount. The binding
//!   is a shared object: installs in other namespaces add their own subjects
//!   to it, so the only mutation ever applied here is appending this
//!   namespace's subject when it is missing. Subjects this installer did not
//!   add must survive every run, and their relative order is preserved to
//!   avoid spurious diffs.
//! - **Namespace path**: Role (create-or-merge as a non-destructive rule
//!   union), RoleBinding (create-if-absent), ServiceAccount
//!   (create-if-absent). Externally added Role rules survive the merge.
//!
//! Nothing in this module deletes anything. "Not found" on read triggers a
//! create; "already exists" on create means a concurrent installer won the
//! race and the object is there, which is success.

use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, PolicyRule, Subject};
use tracing::{debug, info};

use crate::cluster::{ClusterApi, CreateOutcome};
use crate::manifests;
use crate::reconcile::DeployContext;
use crate::retry::{retry_if, RetryConfig};
use crate::scope::PermissionScope;
use crate::{Error, Result};

/// Attempts for the shared binding's read-modify-write cycle
///
/// The cycle runs without a distributed lock; a concurrent installer in
/// another namespace can bump the resourceVersion between our read and our
/// update. Conflicts re-read and re-merge, bounded so a persistently
/// contended binding still fails loudly.
const SUBJECT_MERGE_ATTEMPTS: u32 = 3;

/// Ensure all RBAC objects for this install exist and are merged
///
/// Exactly one scope decision governs every object created here.
pub async fn ensure_rbac(
    api: &impl ClusterApi,
    ctx: &DeployContext,
    scope: PermissionScope,
) -> Result<()> {
    match scope {
        PermissionScope::Cluster => {
            ensure_cluster_role(api).await?;
            ensure_cluster_role_binding_subject(api, &ctx.namespace).await?;
        }
        PermissionScope::Namespace => {
            ensure_role(api, &ctx.namespace).await?;
            ensure_role_binding(api, &ctx.namespace).await?;
        }
    }

    // The binding always targets a ServiceAccount in this namespace, so the
    // account is ensured on both paths.
    ensure_service_account(api, &ctx.namespace).await
}

/// Ensure the singleton ClusterRole exists
async fn ensure_cluster_role(api: &impl ClusterApi) -> Result<()> {
    if api.get_cluster_role(crate::ROLE_NAME).await?.is_some() {
        debug!(name = crate::ROLE_NAME, "cluster role already present");
        return Ok(());
    }

    match api.create_cluster_role(&manifests::cluster_role()).await? {
        CreateOutcome::Created => info!(name = crate::ROLE_NAME, "created cluster role"),
        CreateOutcome::AlreadyExists => {
            debug!(name = crate::ROLE_NAME, "cluster role created concurrently")
        }
    }
    Ok(())
}

/// Whether the binding already carries the exact subject triple
fn has_subject(binding: &ClusterRoleBinding, subject: &Subject) -> bool {
    binding.subjects.iter().flatten().any(|s| {
        s.kind == subject.kind && s.name == subject.name && s.namespace == subject.namespace
    })
}

/// Ensure this namespace's subject is present on the shared binding
///
/// Creates the binding with a single subject when absent; otherwise appends
/// the subject to the existing list. The list is never replaced, filtered or
/// reordered.
async fn ensure_cluster_role_binding_subject(api: &impl ClusterApi, namespace: &str) -> Result<()> {
    let config = RetryConfig {
        max_attempts: SUBJECT_MERGE_ATTEMPTS,
        ..RetryConfig::default()
    };

    retry_if(&config, "merge-binding-subject", Error::is_conflict, || {
        merge_subject_cycle(api, namespace)
    })
    .await
}

/// One read-modify-write cycle against the shared binding
async fn merge_subject_cycle(api: &impl ClusterApi, namespace: &str) -> Result<()> {
    let existing = match api.get_cluster_role_binding(crate::ROLE_BINDING_NAME).await? {
        Some(binding) => Some(binding),
        None => {
            match api
                .create_cluster_role_binding(&manifests::cluster_role_binding(namespace))
                .await?
            {
                CreateOutcome::Created => {
                    info!(
                        name = crate::ROLE_BINDING_NAME,
                        namespace = %namespace,
                        "created cluster role binding"
                    );
                    return Ok(());
                }
                // Lost the creation race: re-read and merge our subject into
                // whatever the winner created.
                CreateOutcome::AlreadyExists => {
                    api.get_cluster_role_binding(crate::ROLE_BINDING_NAME).await?
                }
            }
        }
    };

    let Some(mut binding) = existing else {
        // The binding existed a moment ago and is gone now. Surface it as a
        // conflict so the bounded retry re-runs the whole cycle.
        return Err(Error::api(
            "get",
            "ClusterRoleBinding",
            crate::ROLE_BINDING_NAME,
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "binding disappeared between create and read".to_string(),
                reason: "Conflict".to_string(),
                code: 409,
            }),
        ));
    };

    let subject = manifests::service_account_subject(namespace);
    if has_subject(&binding, &subject) {
        debug!(
            name = crate::ROLE_BINDING_NAME,
            namespace = %namespace,
            "subject already bound"
        );
        return Ok(());
    }

    binding.subjects.get_or_insert_with(Vec::new).push(subject);
    api.update_cluster_role_binding(crate::ROLE_BINDING_NAME, &binding)
        .await?;
    info!(
        name = crate::ROLE_BINDING_NAME,
        namespace = %namespace,
        "appended subject to cluster role binding"
    );
    Ok(())
}

/// Union-merge desired rules into an existing rule list
///
/// Appends desired rules that are not already present; never removes or
/// reorders existing rules. Returns whether anything was added.
fn merge_rules(existing: &mut Vec<PolicyRule>, desired: &[PolicyRule]) -> bool {
    let mut changed = false;
    for rule in desired {
        if !existing.contains(rule) {
            existing.push(rule.clone());
            changed = true;
        }
    }
    changed
}

/// Ensure the namespace-scoped Role, merging rules non-destructively
async fn ensure_role(api: &impl ClusterApi, namespace: &str) -> Result<()> {
    let Some(mut existing) = api.get_role(namespace, crate::ROLE_NAME).await? else {
        match api.create_role(namespace, &manifests::role(namespace)).await? {
            CreateOutcome::Created => {
                info!(name = crate::ROLE_NAME, namespace = %namespace, "created role")
            }
            CreateOutcome::AlreadyExists => {
                debug!(name = crate::ROLE_NAME, namespace = %namespace, "role created concurrently")
            }
        }
        return Ok(());
    };

    let rules = existing.rules.get_or_insert_with(Vec::new);
    if merge_rules(rules, &manifests::role_rules()) {
        api.update_role(namespace, crate::ROLE_NAME, &existing).await?;
        info!(name = crate::ROLE_NAME, namespace = %namespace, "merged role rules");
    } else {
        debug!(name = crate::ROLE_NAME, namespace = %namespace, "role rules converged");
    }
    Ok(())
}

/// Ensure the RoleBinding exists; an existing binding is never updated
async fn ensure_role_binding(api: &impl ClusterApi, namespace: &str) -> Result<()> {
    if api
        .get_role_binding(namespace, crate::ROLE_BINDING_NAME)
        .await?
        .is_some()
    {
        debug!(name = crate::ROLE_BINDING_NAME, namespace = %namespace, "role binding already present");
        return Ok(());
    }

    match api
        .create_role_binding(namespace, &manifests::role_binding(namespace))
        .await?
    {
        CreateOutcome::Created => {
            info!(name = crate::ROLE_BINDING_NAME, namespace = %namespace, "created role binding")
        }
        CreateOutcome::AlreadyExists => {
            debug!(name = crate::ROLE_BINDING_NAME, namespace = %namespace, "role binding created concurrently")
        }
    }
    Ok(())
}

/// Ensure the console ServiceAccount exists
async fn ensure_service_account(api: &impl ClusterApi, namespace: &str) -> Result<()> {
    if api
        .get_service_account(namespace, crate::COMPONENT_NAME)
        .await?
        .is_some()
    {
        debug!(name = crate::COMPONENT_NAME, namespace = %namespace, "service account already present");
        return Ok(());
    }

    match api
        .create_service_account(namespace, &manifests::service_account(namespace))
        .await?
    {
        CreateOutcome::Created => {
            info!(name = crate::COMPONENT_NAME, namespace = %namespace, "created service account")
        }
        CreateOutcome::AlreadyExists => {
            debug!(name = crate::COMPONENT_NAME, namespace = %namespace, "service account created concurrently")
        }
    }
    Ok(())
}

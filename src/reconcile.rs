//! Reconcile orchestration
//!
//! [`Installer`] drives one install or upgrade run as a fixed sequence of
//! stages: resolve the permission scope, ensure RBAC, ensure the workload
//! and optionally wait for readiness. Stages run strictly in order and the
//! first failure stops the run; whatever earlier stages applied stays
//! applied, and the next run picks up from the cluster's actual state. Every
//! error is tagged with the stage it escaped from, so an operator reading a
//! failure log knows how far the run got.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

use crate::cluster::ClusterApi;
use crate::manifests;
use crate::rbac;
use crate::readiness;
use crate::scope::{DescriptorDecoder, PermissionScope};
use crate::workload;
use crate::Result;

/// Everything a single reconcile run needs to know
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Namespace the console is installed into
    pub namespace: String,
    /// Console image reference, including tag
    pub image: String,
    /// Pull policy override; defaults to `IfNotPresent` when unset
    pub image_pull_policy: Option<String>,
    /// Raw application descriptor bytes, when the vendor shipped one
    pub application_metadata: Option<Vec<u8>>,
}

/// The named stages of a reconcile run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Decode the descriptor and decide the permission scope
    ResolveScope,
    /// Ensure roles, bindings and the service account
    EnsureRbac,
    /// Ensure the deployment, service and branding metadata
    EnsureWorkload,
    /// Poll for a ready console pod
    AwaitReady,
}

impl Stage {
    /// Stable stage name used in error context and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResolveScope => "resolve-scope",
            Stage::EnsureRbac => "ensure-rbac",
            Stage::EnsureWorkload => "ensure-workload",
            Stage::AwaitReady => "await-ready",
        }
    }
}

/// Install-or-upgrade reconciler over a cluster API
pub struct Installer<C> {
    api: C,
    decoder: DescriptorDecoder,
}

impl<C: ClusterApi> Installer<C> {
    /// Create an installer over the given cluster API
    pub fn new(api: C) -> Self {
        Self {
            api,
            decoder: DescriptorDecoder::new(),
        }
    }

    /// The cluster API this installer drives
    pub fn api(&self) -> &C {
        &self.api
    }

    /// Run one reconcile: resolve scope, ensure RBAC, ensure the workload
    ///
    /// Returns the scope that governed the run. Does not wait for the
    /// console to come up; see [`Installer::reconcile_and_wait`].
    pub async fn reconcile(&self, ctx: &DeployContext) -> Result<PermissionScope> {
        let scope = self
            .decoder
            .resolve_scope(ctx.application_metadata.as_deref())
            .map_err(|e| e.in_stage(Stage::ResolveScope.as_str()))?;
        info!(
            namespace = %ctx.namespace,
            image = %ctx.image,
            scope = scope.as_str(),
            "starting reconcile"
        );

        rbac::ensure_rbac(&self.api, ctx, scope)
            .await
            .map_err(|e| e.in_stage(Stage::EnsureRbac.as_str()))?;

        workload::ensure_workload(&self.api, ctx)
            .await
            .map_err(|e| e.in_stage(Stage::EnsureWorkload.as_str()))?;

        info!(namespace = %ctx.namespace, scope = scope.as_str(), "reconcile complete");
        Ok(scope)
    }

    /// Reconcile, then wait up to `timeout` for a ready console pod
    pub async fn reconcile_and_wait(
        &self,
        ctx: &DeployContext,
        timeout: Duration,
    ) -> Result<PermissionScope> {
        let scope = self.reconcile(ctx).await?;

        readiness::wait_until_ready(&self.api, &ctx.namespace, timeout)
            .await
            .map_err(|e| e.in_stage(Stage::AwaitReady.as_str()))?;

        Ok(scope)
    }

    /// Render the YAML documents this context would apply, keyed by kind
    ///
    /// Pure with respect to the cluster: only the descriptor is consulted,
    /// to pick the scope the documents reflect.
    pub fn rendered_documents(&self, ctx: &DeployContext) -> Result<BTreeMap<&'static str, String>> {
        let scope = self
            .decoder
            .resolve_scope(ctx.application_metadata.as_deref())
            .map_err(|e| e.in_stage(Stage::ResolveScope.as_str()))?;
        manifests::render_documents(ctx, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::Error;
    use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus};

    fn test_context() -> DeployContext {
        DeployContext {
            namespace: "default".to_string(),
            image: "ghcr.io/gantry-sh/gantry:v0.4.1".to_string(),
            image_pull_policy: None,
            application_metadata: None,
        }
    }

    fn minimal_rbac_descriptor() -> Vec<u8> {
        b"apiVersion: kots.io/v1beta1\nkind: Application\nspec:\n  requireMinimalRBACPrivileges: true\n"
            .to_vec()
    }

    fn converged_cluster_scope_mocks() -> MockClusterApi {
        let mut api = MockClusterApi::new();
        api.expect_get_cluster_role()
            .returning(|_| Ok(Some(manifests::cluster_role())));
        api.expect_get_cluster_role_binding().returning(|_| {
            let mut binding = manifests::cluster_role_binding("default");
            binding.metadata.resource_version = Some("1".to_string());
            Ok(Some(binding))
        });
        api.expect_get_service_account()
            .returning(|ns, _| Ok(Some(manifests::service_account(ns))));
        api.expect_get_deployment()
            .returning(|_, _| Ok(Some(manifests::deployment(&test_context()))));
        api.expect_get_service()
            .returning(|ns, _| Ok(Some(manifests::service(ns))));
        api
    }

    fn ready_pod() -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: crate::COMPONENT_NAME.to_string(),
                    ready: true,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn converged_cluster_yields_cluster_scope_and_no_writes() {
        let api = converged_cluster_scope_mocks();
        // Any create or update call panics the mock; none may happen.
        let installer = Installer::new(api);

        let scope = installer.reconcile(&test_context()).await.unwrap();
        assert_eq!(scope, PermissionScope::Cluster);
    }

    #[tokio::test]
    async fn minimal_rbac_descriptor_drives_the_namespace_path() {
        let mut api = MockClusterApi::new();
        api.expect_get_role()
            .returning(|ns, _| Ok(Some(manifests::role(ns))));
        api.expect_get_role_binding()
            .returning(|ns, _| Ok(Some(manifests::role_binding(ns))));
        api.expect_get_service_account()
            .returning(|ns, _| Ok(Some(manifests::service_account(ns))));
        api.expect_get_config_map().returning(|ns, _| {
            Ok(Some(manifests::application_metadata(ns, b"x: y\n")))
        });
        api.expect_get_deployment().returning(|_, _| {
            let mut ctx = test_context();
            ctx.application_metadata = Some(minimal_rbac_descriptor());
            Ok(Some(manifests::deployment(&ctx)))
        });
        api.expect_get_service()
            .returning(|ns, _| Ok(Some(manifests::service(ns))));
        // No cluster-role expectations: touching them panics the mock.
        let installer = Installer::new(api);

        let mut ctx = test_context();
        ctx.application_metadata = Some(minimal_rbac_descriptor());
        let scope = installer.reconcile(&ctx).await.unwrap();
        assert_eq!(scope, PermissionScope::Namespace);
    }

    #[tokio::test]
    async fn undecodable_descriptor_fails_before_any_cluster_call() {
        // An empty mock: any API call panics, proving nothing ran.
        let installer = Installer::new(MockClusterApi::new());

        let mut ctx = test_context();
        ctx.application_metadata = Some(b"{{{ garbage".to_vec());
        let err = installer.reconcile(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("resolve-scope:"));
    }

    #[tokio::test]
    async fn rbac_failure_is_tagged_and_stops_the_run() {
        let mut api = MockClusterApi::new();
        api.expect_get_cluster_role().returning(|name| {
            Err(Error::api(
                "get",
                "ClusterRole",
                name,
                kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                }),
            ))
        });
        // No workload expectations: the run must stop at the RBAC stage.
        let installer = Installer::new(api);

        let err = installer.reconcile(&test_context()).await.unwrap_err();
        assert!(err.to_string().starts_with("ensure-rbac:"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_and_wait_polls_until_the_console_is_up() {
        let mut api = converged_cluster_scope_mocks();
        api.expect_list_pods()
            .times(1)
            .returning(|_, _| Ok(vec![]));
        api.expect_list_pods()
            .times(1)
            .returning(|_, _| Ok(vec![ready_pod()]));
        let installer = Installer::new(api);

        let scope = installer
            .reconcile_and_wait(&test_context(), Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(scope, PermissionScope::Cluster);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_is_tagged_with_its_stage() {
        let mut api = converged_cluster_scope_mocks();
        api.expect_list_pods().returning(|_, _| Ok(vec![]));
        let installer = Installer::new(api);

        let err = installer
            .reconcile_and_wait(&test_context(), Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("await-ready:"));
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(Stage::ResolveScope.as_str(), "resolve-scope");
        assert_eq!(Stage::EnsureRbac.as_str(), "ensure-rbac");
        assert_eq!(Stage::EnsureWorkload.as_str(), "ensure-workload");
        assert_eq!(Stage::AwaitReady.as_str(), "await-ready");
    }

    #[test]
    fn rendered_documents_follow_the_descriptor_scope() {
        let installer = Installer::new(MockClusterApi::new());

        let mut ctx = test_context();
        ctx.application_metadata = Some(minimal_rbac_descriptor());
        let docs = installer.rendered_documents(&ctx).unwrap();
        assert!(docs.contains_key("role"));
        assert!(!docs.contains_key("cluster-role"));

        let docs = installer.rendered_documents(&test_context()).unwrap();
        assert!(docs.contains_key("cluster-role"));
    }
}

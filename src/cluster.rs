//! Cluster API boundary
//!
//! [`ClusterApi`] abstracts the handful of Kubernetes operations the installer
//! performs: read an object by name (yielding `None` on not-found), create an
//! object (reporting a lost creation race instead of failing), update an
//! object, and list pods by label selector. This trait allows mocking the
//! Kubernetes client in tests while using the real client in production.
//!
//! [`KubeClusterApi`] is the production implementation over a [`kube::Client`]
//! with typed APIs. It does the error-shape normalization in one place so the
//! reconcilers only ever see the installer's own taxonomy.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Outcome of a create call
///
/// Concurrent installers in other namespaces race on the cluster-scoped
/// objects; losing such a race means the object exists, which is the state
/// we wanted. The outcome makes that explicit instead of burying it in an
/// error branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// The object already existed (another creator won the race)
    AlreadyExists,
}

/// Trait abstracting Kubernetes operations for the installer
///
/// Read operations return `Ok(None)` on not-found; create operations return
/// [`CreateOutcome::AlreadyExists`] when the server rejects a duplicate.
/// Any other API error is returned with operation and object context.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a ClusterRole by name
    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>>;

    /// Create a ClusterRole
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<CreateOutcome>;

    /// Get a ClusterRoleBinding by name
    async fn get_cluster_role_binding(&self, name: &str) -> Result<Option<ClusterRoleBinding>>;

    /// Create a ClusterRoleBinding
    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<CreateOutcome>;

    /// Update a ClusterRoleBinding
    ///
    /// The update carries the resourceVersion read earlier, so a concurrent
    /// writer surfaces as a Conflict error rather than a silent overwrite.
    async fn update_cluster_role_binding(
        &self,
        name: &str,
        binding: &ClusterRoleBinding,
    ) -> Result<()>;

    /// Get a Role in a namespace
    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>>;

    /// Create a Role in a namespace
    async fn create_role(&self, namespace: &str, role: &Role) -> Result<CreateOutcome>;

    /// Update a Role in a namespace
    async fn update_role(&self, namespace: &str, name: &str, role: &Role) -> Result<()>;

    /// Get a RoleBinding in a namespace
    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>>;

    /// Create a RoleBinding in a namespace
    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<CreateOutcome>;

    /// Get a ServiceAccount in a namespace
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>>;

    /// Create a ServiceAccount in a namespace
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<CreateOutcome>;

    /// Get a Deployment in a namespace
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Create a Deployment in a namespace
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<CreateOutcome>;

    /// Update a Deployment in a namespace
    async fn update_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<()>;

    /// Get a Service in a namespace
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Create a Service in a namespace
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<CreateOutcome>;

    /// Get a ConfigMap in a namespace
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create a ConfigMap in a namespace
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<CreateOutcome>;

    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;
}

/// Production [`ClusterApi`] implementation over a kube client
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Get an object, mapping 404 to `None`
async fn get_opt<T>(api: &Api<T>, kind: &'static str, name: &str) -> Result<Option<T>>
where
    T: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(Error::api("get", kind, name, e)),
    }
}

/// Name used in error context and logs, read off the object itself
fn object_name<T: kube::Resource>(obj: &T) -> &str {
    obj.meta().name.as_deref().unwrap_or("<unnamed>")
}

/// Create an object, mapping an AlreadyExists rejection to a race outcome
async fn create_obj<T>(api: &Api<T>, kind: &'static str, obj: &T) -> Result<CreateOutcome>
where
    T: Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug + kube::Resource,
{
    let name = object_name(obj);
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => {
            debug!(kind = %kind, name = %name, "created object");
            Ok(CreateOutcome::Created)
        }
        Err(kube::Error::Api(e)) if e.reason == "AlreadyExists" => {
            debug!(kind = %kind, name = %name, "object already exists");
            Ok(CreateOutcome::AlreadyExists)
        }
        Err(e) => Err(Error::api("create", kind, name, e)),
    }
}

/// Replace an object, keeping whatever resourceVersion it carries
async fn update_obj<T>(api: &Api<T>, kind: &'static str, name: &str, obj: &T) -> Result<()>
where
    T: Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    api.replace(name, &PostParams::default(), obj)
        .await
        .map_err(|e| Error::api("update", kind, name, e))?;
    debug!(kind = %kind, name = %name, "updated object");
    Ok(())
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        get_opt(&api, "ClusterRole", name).await
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<CreateOutcome> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        create_obj(&api, "ClusterRole", role).await
    }

    async fn get_cluster_role_binding(&self, name: &str) -> Result<Option<ClusterRoleBinding>> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        get_opt(&api, "ClusterRoleBinding", name).await
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<CreateOutcome> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        create_obj(&api, "ClusterRoleBinding", binding).await
    }

    async fn update_cluster_role_binding(
        &self,
        name: &str,
        binding: &ClusterRoleBinding,
    ) -> Result<()> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        update_obj(&api, "ClusterRoleBinding", name, binding).await
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, "Role", name).await
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> Result<CreateOutcome> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        create_obj(&api, "Role", role).await
    }

    async fn update_role(&self, namespace: &str, name: &str, role: &Role) -> Result<()> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        update_obj(&api, "Role", name, role).await
    }

    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, "RoleBinding", name).await
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<CreateOutcome> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        create_obj(&api, "RoleBinding", binding).await
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, "ServiceAccount", name).await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<CreateOutcome> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        create_obj(&api, "ServiceAccount", account).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, "Deployment", name).await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<CreateOutcome> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        create_obj(&api, "Deployment", deployment).await
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        update_obj(&api, "Deployment", name, deployment).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, "Service", name).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<CreateOutcome> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        create_obj(&api, "Service", service).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, "ConfigMap", name).await
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<CreateOutcome> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        create_obj(&api, "ConfigMap", config_map).await
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(label_selector);
        let pods = api
            .list(&params)
            .await
            .map_err(|e| Error::api("list", "Pod", label_selector, e))?;
        Ok(pods.items)
    }
}

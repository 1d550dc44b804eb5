//! Desired-state object builders and rendered YAML documents
//!
//! Single source of truth for every object the installer manages. The
//! reconcilers treat these as opaque desired-state inputs; the merge rules
//! live with the reconcilers, not here.
//!
//! [`render_documents`] produces the YAML documents a run applies, keyed by a
//! stable per-kind name, for callers that want to display or persist what was
//! installed.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, ResourceRequirements, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::reconcile::DeployContext;
use crate::scope::PermissionScope;
use crate::{Error, Result};

/// Data key under which the raw descriptor lives in the branding ConfigMap
pub const APPLICATION_METADATA_KEY: &str = "application.yaml";

/// Standard labels applied to every installer-managed object
pub fn labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        crate::APP_LABEL_KEY.to_string(),
        crate::APP_LABEL_VALUE.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "gantry-installer".to_string(),
    );
    labels
}

fn object_meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(|ns| ns.to_string()),
        labels: Some(labels()),
        ..Default::default()
    }
}

/// The subject identity the console uses inside bindings
///
/// Equality of the full (kind, name, namespace) triple is what the shared
/// cluster binding merge keys on.
pub fn service_account_subject(namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: crate::COMPONENT_NAME.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Permission rules for the namespace-scoped Role
///
/// The console manages arbitrary application resources inside its own
/// namespace, so the grants are broad but namespace-confined.
pub fn role_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec![
                "apps".to_string(),
                "batch".to_string(),
                "networking.k8s.io".to_string(),
            ]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec![crate::scope::APPLICATION_GROUP.to_string()]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        },
    ]
}

/// Permission rules for the cluster-wide ClusterRole
pub fn cluster_role_rules() -> Vec<PolicyRule> {
    vec![PolicyRule {
        api_groups: Some(vec!["*".to_string()]),
        resources: Some(vec!["*".to_string()]),
        verbs: vec!["*".to_string()],
        ..Default::default()
    }]
}

/// The singleton ClusterRole shared by all installs
pub fn cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: object_meta(crate::ROLE_NAME, None),
        rules: Some(cluster_role_rules()),
        ..Default::default()
    }
}

/// The shared ClusterRoleBinding with a single subject for `namespace`
///
/// Used only when the binding does not exist yet. When it already exists the
/// reconciler appends to its subject list instead; other tenants' subjects
/// are never rebuilt from scratch.
pub fn cluster_role_binding(namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: object_meta(crate::ROLE_BINDING_NAME, None),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: crate::ROLE_NAME.to_string(),
        },
        subjects: Some(vec![service_account_subject(namespace)]),
    }
}

/// The namespace-scoped Role
pub fn role(namespace: &str) -> Role {
    Role {
        metadata: object_meta(crate::ROLE_NAME, Some(namespace)),
        rules: Some(role_rules()),
    }
}

/// The namespace-scoped RoleBinding
pub fn role_binding(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(crate::ROLE_BINDING_NAME, Some(namespace)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: crate::ROLE_NAME.to_string(),
        },
        subjects: Some(vec![service_account_subject(namespace)]),
    }
}

/// The console ServiceAccount
pub fn service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(crate::COMPONENT_NAME, Some(namespace)),
        ..Default::default()
    }
}

/// The console container with everything the installer owns on it
fn console_container(ctx: &DeployContext) -> Container {
    Container {
        name: crate::COMPONENT_NAME.to_string(),
        image: Some(ctx.image.clone()),
        image_pull_policy: Some(
            ctx.image_pull_policy
                .clone()
                .unwrap_or_else(|| "IfNotPresent".to_string()),
        ),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: crate::CONSOLE_PORT,
            ..Default::default()
        }]),
        env: Some(vec![EnvVar {
            name: "POD_NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("100Mi".to_string())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("1".to_string())),
                ("memory".to_string(), Quantity("1Gi".to_string())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The console Deployment
pub fn deployment(ctx: &DeployContext) -> Deployment {
    let mut selector = BTreeMap::new();
    selector.insert(
        crate::APP_LABEL_KEY.to_string(),
        crate::APP_LABEL_VALUE.to_string(),
    );

    Deployment {
        metadata: object_meta(crate::COMPONENT_NAME, Some(&ctx.namespace)),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(crate::COMPONENT_NAME.to_string()),
                    containers: vec![console_container(ctx)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The console Service
pub fn service(namespace: &str) -> Service {
    let mut selector = BTreeMap::new();
    selector.insert(
        crate::APP_LABEL_KEY.to_string(),
        crate::APP_LABEL_VALUE.to_string(),
    );

    Service {
        metadata: object_meta(crate::COMPONENT_NAME, Some(namespace)),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: crate::CONSOLE_PORT,
                target_port: Some(IntOrString::Int(crate::CONSOLE_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The branding ConfigMap carrying the raw application descriptor
pub fn application_metadata(namespace: &str, descriptor: &[u8]) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(crate::APPLICATION_METADATA_NAME, Some(namespace)),
        data: Some(BTreeMap::from([(
            APPLICATION_METADATA_KEY.to_string(),
            String::from_utf8_lossy(descriptor).to_string(),
        )])),
        ..Default::default()
    }
}

/// Serialize an object to a YAML document with explicit apiVersion/kind
///
/// k8s-openapi types leave apiVersion/kind implicit, so they are injected
/// from the type's constants before rendering.
fn to_document<T>(obj: &T) -> Result<String>
where
    T: k8s_openapi::Resource + serde::Serialize,
{
    let mut value =
        serde_json::to_value(obj).map_err(|e| Error::serialization(T::KIND, e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(T::API_VERSION.to_string()),
        );
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(T::KIND.to_string()),
        );
    }
    serde_yaml::to_string(&value).map_err(|e| Error::serialization(T::KIND, e.to_string()))
}

/// Render the YAML documents a reconcile run applies, keyed by kind name
///
/// Keys are stable across releases so callers can persist documents per
/// object kind: `role`/`role-binding` (or their `cluster-` variants),
/// `service-account`, `deployment`, `service` and, when a descriptor is
/// present, `application-metadata`.
pub fn render_documents(
    ctx: &DeployContext,
    scope: PermissionScope,
) -> Result<BTreeMap<&'static str, String>> {
    let mut docs = BTreeMap::new();

    match scope {
        PermissionScope::Cluster => {
            docs.insert("cluster-role", to_document(&cluster_role())?);
            docs.insert(
                "cluster-role-binding",
                to_document(&cluster_role_binding(&ctx.namespace))?,
            );
        }
        PermissionScope::Namespace => {
            docs.insert("role", to_document(&role(&ctx.namespace))?);
            docs.insert("role-binding", to_document(&role_binding(&ctx.namespace))?);
        }
    }

    docs.insert(
        "service-account",
        to_document(&service_account(&ctx.namespace))?,
    );
    docs.insert("deployment", to_document(&deployment(ctx))?);
    docs.insert("service", to_document(&service(&ctx.namespace))?);

    if let Some(descriptor) = &ctx.application_metadata {
        docs.insert(
            "application-metadata",
            to_document(&application_metadata(&ctx.namespace, descriptor))?,
        );
    }

    Ok(docs)
}

//! Gantry - installer and in-place upgrader for the Gantry admin console
//!
//! Gantry converges a Kubernetes cluster to the desired state for a single
//! admin-console installation: RBAC objects scoped per the application
//! descriptor, the console Deployment and Service, and a bounded wait for the
//! console pod to become healthy.
//!
//! The installer runs once per invocation (it is not a reconcile-forever
//! operator). Safety under re-invocation comes from idempotent create-or-merge
//! reconciliation of every object kind, with a bespoke merge rule per kind:
//! the cluster-scoped role binding is shared across tenants and only ever
//! grows subjects, Role rules are merged as a non-destructive union, and the
//! Deployment merge touches only installer-owned fields.
//!
//! # Modules
//!
//! - [`scope`] - Permission-scope resolution from the application descriptor
//! - [`cluster`] - Cluster API boundary and its kube-backed implementation
//! - [`manifests`] - Desired-state object builders and rendered YAML documents
//! - [`rbac`] - RBAC reconciliation (cluster-scoped and namespace-scoped paths)
//! - [`workload`] - Deployment/Service reconciliation with field-level merge
//! - [`readiness`] - Pod readiness polling with a deadline
//! - [`reconcile`] - Orchestration of the install stages
//! - [`retry`] - Bounded retry with backoff and jitter
//! - [`telemetry`] - Structured logging setup
//! - [`error`] - Error types for installer operations

#![deny(missing_docs)]

pub mod cluster;
pub mod error;
pub mod manifests;
pub mod rbac;
pub mod readiness;
pub mod reconcile;
pub mod retry;
pub mod scope;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known object names
// =============================================================================
// These names are fixed: every installer invocation, in any namespace, refers
// to the same cluster-scoped objects by these names, which is what makes the
// ClusterRoleBinding a shared resource across tenant namespaces.

/// Component name used for the ServiceAccount, Deployment and Service
pub const COMPONENT_NAME: &str = "gantry";

/// Name of the namespace-scoped Role and the cluster-scoped ClusterRole
pub const ROLE_NAME: &str = "gantry-role";

/// Name of the RoleBinding and the shared ClusterRoleBinding
pub const ROLE_BINDING_NAME: &str = "gantry-rolebinding";

/// Name of the ConfigMap carrying the raw application descriptor
pub const APPLICATION_METADATA_NAME: &str = "gantry-application-metadata";

/// Label key applied to the console pod and used as the readiness selector
pub const APP_LABEL_KEY: &str = "app";

/// Value of the [`APP_LABEL_KEY`] label on console pods
pub const APP_LABEL_VALUE: &str = "gantry";

/// Port the console Service listens on
pub const CONSOLE_PORT: i32 = 3000;

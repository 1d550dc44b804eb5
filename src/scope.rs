//! Permission-scope resolution from the application descriptor
//!
//! An application vendor can ship a descriptor that opts the console into
//! reduced, namespace-confined privileges. Absent a descriptor (or absent the
//! opt-in field) the console gets cluster-wide permissions: the permissive
//! default minimizes install friction for applications that never declared a
//! preference.
//!
//! Scope resolution is a pure function of the descriptor bytes; it touches no
//! cluster state and is recomputed on every run. The decoder is an explicit
//! constructed object rather than process-global codec state so its lifecycle
//! is scoped to a single reconcile invocation.

use serde::Deserialize;

use crate::{Error, Result};

/// API group of the application descriptor
pub const APPLICATION_GROUP: &str = "kots.io";

/// API version of the application descriptor
pub const APPLICATION_VERSION: &str = "v1beta1";

/// Kind of the application descriptor
pub const APPLICATION_KIND: &str = "Application";

/// Which permissions the installed console receives
///
/// Exactly one scope decision governs all RBAC objects created in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    /// Cluster-wide permissions via ClusterRole/ClusterRoleBinding
    Cluster,
    /// Permissions confined to the install namespace via Role/RoleBinding
    Namespace,
}

impl PermissionScope {
    /// Human-readable scope name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionScope::Cluster => "cluster",
            PermissionScope::Namespace => "namespace",
        }
    }
}

/// The decoded application descriptor
///
/// Only the fields the installer acts on are modeled; vendor descriptors
/// carry many more, which deserialization ignores.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDescriptor {
    /// Full apiVersion string (e.g. "kots.io/v1beta1")
    pub api_version: String,
    /// Resource kind (e.g. "Application")
    pub kind: String,
    /// Descriptor spec
    #[serde(default)]
    pub spec: ApplicationSpec,
}

/// The subset of the descriptor spec the installer reads
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Whether the application opts into namespace-confined RBAC
    ///
    /// The wire spelling keeps RBAC fully uppercased, which `rename_all`
    /// would fold to `Rbac`.
    #[serde(default, rename = "requireMinimalRBACPrivileges")]
    pub require_minimal_rbac_privileges: bool,
}

/// Decoder for application descriptors with a fixed expected identity
#[derive(Debug, Clone)]
pub struct DescriptorDecoder {
    group: &'static str,
    version: &'static str,
    kind: &'static str,
}

impl Default for DescriptorDecoder {
    fn default() -> Self {
        Self {
            group: APPLICATION_GROUP,
            version: APPLICATION_VERSION,
            kind: APPLICATION_KIND,
        }
    }
}

impl DescriptorDecoder {
    /// Create a decoder expecting the standard application-descriptor identity
    pub fn new() -> Self {
        Self::default()
    }

    /// The group/version/kind identity this decoder accepts
    fn expected_identity(&self) -> String {
        format!("{}/{}, Kind={}", self.group, self.version, self.kind)
    }

    /// Decode descriptor bytes and validate their identity
    ///
    /// An identity mismatch is fatal: it means the caller handed us something
    /// that is not an application descriptor, and silently falling back to
    /// the permissive default would grant cluster-wide permissions on the
    /// basis of a malformed input.
    pub fn decode(&self, metadata: &[u8]) -> Result<ApplicationDescriptor> {
        let descriptor: ApplicationDescriptor =
            serde_yaml::from_slice(metadata).map_err(|e| Error::decode(e.to_string()))?;

        let (group, version) = match descriptor.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", descriptor.api_version.as_str()),
        };

        if group != self.group || version != self.version || descriptor.kind != self.kind {
            return Err(Error::schema_mismatch(
                self.expected_identity(),
                format!("{}, Kind={}", descriptor.api_version, descriptor.kind),
            ));
        }

        Ok(descriptor)
    }

    /// Decide the permission scope for this install
    ///
    /// - No descriptor: [`PermissionScope::Cluster`] (permissive default)
    /// - `requireMinimalRBACPrivileges: true`: [`PermissionScope::Namespace`]
    /// - `false` or absent: [`PermissionScope::Cluster`]
    pub fn resolve_scope(&self, metadata: Option<&[u8]>) -> Result<PermissionScope> {
        let Some(metadata) = metadata else {
            return Ok(PermissionScope::Cluster);
        };

        let descriptor = self.decode(metadata)?;

        if descriptor.spec.require_minimal_rbac_privileges {
            Ok(PermissionScope::Namespace)
        } else {
            Ok(PermissionScope::Cluster)
        }
    }
}

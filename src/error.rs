//! Error types for installer operations
//!
//! Errors are structured with fields to aid debugging in production. Every
//! fatal error carries the operation and target object identity so a failed
//! run can be diagnosed without re-running at higher verbosity.
//!
//! Two Kubernetes API outcomes are deliberately not errors at the reconciler
//! level: "not found" on a read (the signal to create) and "already exists"
//! on a create (lost creation race, the object is there). Everything else
//! aborts the run.

use std::time::Duration;

use thiserror::Error;

/// Main error type for installer operations
#[derive(Debug, Error)]
pub enum Error {
    /// The application descriptor bytes could not be parsed
    #[error("failed to decode application descriptor: {message}")]
    Decode {
        /// Description of the parse failure
        message: String,
    },

    /// The application descriptor parsed but carries the wrong identity
    #[error("application descriptor has unexpected identity: expected {expected}, found {found}")]
    SchemaMismatch {
        /// The group/version/kind the installer expects
        expected: String,
        /// The group/version/kind actually found
        found: String,
    },

    /// A Kubernetes API call failed
    #[error("failed to {operation} {kind} {name}: {source}")]
    Api {
        /// The operation that failed (get, create, update, list)
        operation: &'static str,
        /// Kind of the target object
        kind: &'static str,
        /// Name of the target object
        name: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// Serialization of a desired-state object failed
    #[error("serialization error for {kind}: {message}")]
    Serialization {
        /// The resource kind being serialized
        kind: &'static str,
        /// Description of what failed
        message: String,
    },

    /// The readiness deadline elapsed without a healthy console pod
    ///
    /// Surfaced distinctly from [`Error::Api`] so callers can tell "not yet
    /// healthy" apart from "cluster communication failure".
    #[error("timed out after {waited:?} waiting for console pod to become ready")]
    Timeout {
        /// How long the waiter polled before giving up
        waited: Duration,
    },

    /// A stage of the install sequence failed
    #[error("{stage}: {source}")]
    Stage {
        /// Name of the failed stage
        stage: &'static str,
        /// The underlying error
        source: Box<Error>,
    },
}

impl Error {
    /// Create a decode error for the application descriptor
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a schema-mismatch error with the expected and found identities
    pub fn schema_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an API error with operation and object identity context
    pub fn api(
        operation: &'static str,
        kind: &'static str,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::Api {
            operation,
            kind,
            name: name.into(),
            source,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Serialization {
            kind,
            message: message.into(),
        }
    }

    /// Wrap this error with the name of the stage it occurred in
    pub fn in_stage(self, stage: &'static str) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The status reason of the underlying API error, if this is one
    fn api_reason(&self) -> Option<&str> {
        match self {
            Error::Api {
                source: kube::Error::Api(resp),
                ..
            } => Some(resp.reason.as_str()),
            Error::Stage { source, .. } => source.api_reason(),
            _ => None,
        }
    }

    /// Whether this error is the server rejecting a create because the
    /// object already exists (a lost creation race)
    pub fn is_already_exists(&self) -> bool {
        self.api_reason() == Some("AlreadyExists")
    }

    /// Whether this error is an optimistic-concurrency conflict on update
    pub fn is_conflict(&self) -> bool {
        self.api_reason() == Some("Conflict")
    }

    /// Whether this error is plausibly transient (transport failure or a
    /// server-side 5xx) rather than authoritative
    ///
    /// Authoritative errors (4xx such as Forbidden or Invalid) will not
    /// resolve by retrying and must abort. Transport errors and 5xx may
    /// clear up, so callers holding a deadline budget can retry them.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Api { source, .. } => match source {
                kube::Error::Api(resp) => resp.code >= 500,
                // Connection resets, timeouts, TLS handshakes and the like
                _ => true,
            },
            Error::Stage { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(reason: &str, code: u16) -> Error {
        Error::api(
            "update",
            "ClusterRoleBinding",
            "gantry-rolebinding",
            kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("{} error", reason),
                reason: reason.to_string(),
                code,
            }),
        )
    }

    #[test]
    fn api_errors_carry_operation_and_object_identity() {
        let err = api_error("Forbidden", 403);
        let msg = err.to_string();
        assert!(msg.contains("update"));
        assert!(msg.contains("ClusterRoleBinding"));
        assert!(msg.contains("gantry-rolebinding"));
    }

    #[test]
    fn already_exists_is_detected_through_stage_wrapping() {
        let err = api_error("AlreadyExists", 409);
        assert!(err.is_already_exists());
        assert!(!err.is_conflict());

        let wrapped = api_error("AlreadyExists", 409).in_stage("ensure-rbac");
        assert!(wrapped.is_already_exists());
    }

    #[test]
    fn conflict_and_already_exists_share_a_code_but_not_a_reason() {
        // Both are HTTP 409; only the reason distinguishes a lost creation
        // race from an optimistic-concurrency conflict.
        assert!(api_error("Conflict", 409).is_conflict());
        assert!(!api_error("Conflict", 409).is_already_exists());
    }

    #[test]
    fn authoritative_errors_are_not_transient() {
        assert!(!api_error("Forbidden", 403).is_transient());
        assert!(!api_error("Invalid", 422).is_transient());
        assert!(!Error::decode("bad yaml").is_transient());
        assert!(!Error::Timeout {
            waited: Duration::from_secs(120)
        }
        .is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(api_error("InternalError", 500).is_transient());
        assert!(api_error("ServiceUnavailable", 503).is_transient());
    }

    #[test]
    fn stage_wrapping_prefixes_the_message() {
        let err = Error::decode("unexpected token").in_stage("resolve-scope");
        assert!(err.to_string().starts_with("resolve-scope:"));
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn timeout_reports_elapsed_duration() {
        let err = Error::Timeout {
            waited: Duration::from_secs(120),
        };
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn schema_mismatch_names_both_identities() {
        let err = Error::schema_mismatch("kots.io/v1beta1, Kind=Application", "v1, Kind=ConfigMap");
        assert!(err.to_string().contains("kots.io/v1beta1"));
        assert!(err.to_string().contains("ConfigMap"));
    }
}

//! Readiness polling
//!
//! After the workload is ensured, the installer waits for the console to
//! come up by polling the pod list under the component label. Readiness
//! means at least one pod is Running with its console container reporting
//! ready. Transient list failures (apiserver hiccups, transport errors) are
//! absorbed and polling continues until the deadline; authoritative
//! rejections such as Forbidden abort the wait immediately, because no
//! amount of waiting fixes a permission error.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cluster::ClusterApi;
use crate::{Error, Result};

/// Interval between pod list polls
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default deadline for the console to become ready
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Whether a pod counts as a ready console pod
///
/// The console container is the first container in every pod this installer
/// deploys, so its status is the first entry.
fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .container_statuses
        .as_ref()
        .and_then(|statuses| statuses.first())
        .map(|s| s.ready)
        .unwrap_or(false)
}

/// Wait until a console pod in `namespace` is Running and ready
///
/// Returns [`Error::Timeout`] with the elapsed wait when the deadline
/// passes without a ready pod.
pub async fn wait_until_ready(
    api: &impl ClusterApi,
    namespace: &str,
    timeout: Duration,
) -> Result<()> {
    let selector = format!("{}={}", crate::APP_LABEL_KEY, crate::APP_LABEL_VALUE);
    let started = Instant::now();

    loop {
        match api.list_pods(namespace, &selector).await {
            Ok(pods) => {
                if let Some(pod) = pods.iter().find(|p| pod_is_ready(p)) {
                    debug!(
                        namespace = %namespace,
                        pod = pod.metadata.name.as_deref().unwrap_or("<unnamed>"),
                        elapsed_ms = started.elapsed().as_millis(),
                        "console pod is ready"
                    );
                    return Ok(());
                }
                debug!(
                    namespace = %namespace,
                    pods = pods.len(),
                    "no ready console pod yet"
                );
            }
            Err(e) if e.is_transient() => {
                warn!(namespace = %namespace, error = %e, "transient error listing pods, continuing to poll");
            }
            Err(e) => return Err(e),
        }

        if started.elapsed() >= timeout {
            return Err(Error::Timeout {
                waited: started.elapsed(),
            });
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

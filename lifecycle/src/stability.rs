/*!

Confirms that pods which became ready stay ready. A restart loop can satisfy a one-shot readiness
check, so [`StabilityWindow::verify_stable`] keeps looking at the pods for a whole observation
window and fails with [`Error::Flapping`](crate::Error::Flapping) on the first regression.

!*/

use crate::clients::{self, ClusterClient};
use crate::error::{self, Result};
use crate::readiness::pod_ready;
use crate::selector::{label_selector_string, match_labels_string};
use crate::wait::{observe, wait_until};
use crate::{Context, ReadinessState, WaitSpec};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use log::{debug, info, warn};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The pods in one namespace matching a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSelector {
    namespace: String,
    selector: String,
}

impl PodSelector {
    pub fn new<S>(namespace: S, labels: &BTreeMap<String, String>) -> Self
    where
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            selector: match_labels_string(labels),
        }
    }

    /// Select the pods matched by a workload's `spec.selector`.
    pub fn from_label_selector<S>(namespace: S, selector: &LabelSelector) -> Self
    where
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            selector: label_selector_string(selector),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

impl Display for PodSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "pods in '{}' matching '{}'", self.namespace, self.selector)
    }
}

/// What is remembered about a pod when the observation window opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PodRecord {
    restarts: i64,
}

pub struct StabilityWindow {
    cluster: Arc<dyn ClusterClient>,
    wait_spec: WaitSpec,
    poll_interval: Duration,
}

impl StabilityWindow {
    pub fn new(context: &Context) -> Self {
        Self {
            cluster: context.cluster(),
            wait_spec: context.settings().wait_spec(),
            poll_interval: context.settings().stability_poll_interval(),
        }
    }

    /// Wait until the selected pods are ready and there are `expected` of them, or at least
    /// `expected` when `exact` is false.
    pub async fn wait_for_pods_ready(
        &self,
        selector: &PodSelector,
        expected: usize,
        exact: bool,
    ) -> Result<()> {
        self.ready_pods(selector, expected, exact).await.map(|_| ())
    }

    /// Wait for at least `min_ready` ready pods, then check them at the stability poll interval
    /// for the whole `observation_window`. Fewer pods, a pod that is no longer ready, a pod that
    /// was replaced or a container that restarted fails with `Flapping`.
    pub async fn verify_stable(
        &self,
        selector: &PodSelector,
        min_ready: usize,
        observation_window: Duration,
    ) -> Result<()> {
        let pods = self.ready_pods(selector, min_ready, false).await?;
        let baseline: HashMap<String, PodRecord> = pods
            .iter()
            .map(|pod| (pod_uid(pod), PodRecord { restarts: restarts(pod) }))
            .collect();

        info!("Observing {} for {:?}", selector, observation_window);
        let deadline = Instant::now() + observation_window;
        let mut checks = 0u32;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            let pods = match self.list_pods(selector).await {
                Ok(pods) => pods,
                Err(e) if e.is_transient() => {
                    warn!("Skipping a stability check of {}: {}", selector, e);
                    continue;
                }
                Err(e) => {
                    return Err(e).context(error::ClientSnafu {
                        action: format!("list {}", selector),
                    })
                }
            };
            checks += 1;
            if let Some(reason) = regression(&baseline, &pods, min_ready) {
                return error::FlappingSnafu {
                    selector: selector.to_string(),
                    window: observation_window,
                    reason,
                }
                .fail();
            }
        }
        info!(
            "{} stayed stable for {:?} ({} checks)",
            selector, observation_window, checks
        );
        Ok(())
    }

    /// The pods seen by the check that found them all ready.
    async fn ready_pods(
        &self,
        selector: &PodSelector,
        expected: usize,
        exact: bool,
    ) -> Result<Vec<DynamicObject>> {
        let quantity = if exact { "exactly" } else { "at least" };
        let description = format!("{} ({} {} ready)", selector, quantity, expected);
        let description = description.as_str();
        let found = &Mutex::new(None);
        wait_until(description, &self.wait_spec, || async move {
            let pods = match observe(self.list_pods(selector).await, description)? {
                Some(pods) => pods,
                None => return Ok(ReadinessState::NotYetReady),
            };
            let count_matches = if exact {
                pods.len() == expected
            } else {
                pods.len() >= expected
            };
            let ready = pods.iter().filter(|pod| pod_ready(pod).is_ready()).count();
            debug!("{}: {} of {} pods ready", selector, ready, pods.len());
            if count_matches && ready == pods.len() {
                *found.lock().await = Some(pods);
                Ok(ReadinessState::Ready)
            } else {
                Ok(ReadinessState::NotYetReady)
            }
        })
        .await?;

        let pods = found.lock().await.take();
        pods.context(error::NotFoundSnafu { what: description })
    }

    async fn list_pods(&self, selector: &PodSelector) -> clients::Result<Vec<DynamicObject>> {
        self.cluster
            .list(
                &ApiResource::erase::<Pod>(&()),
                Some(selector.namespace()),
                Some(selector.selector()),
            )
            .await
    }
}

/// Describes the first way `pods` differ from a stable continuation of `baseline`.
fn regression(
    baseline: &HashMap<String, PodRecord>,
    pods: &[DynamicObject],
    min_ready: usize,
) -> Option<String> {
    if pods.len() < min_ready {
        return Some(format!(
            "only {} pods exist, expected at least {}",
            pods.len(),
            min_ready
        ));
    }
    for pod in pods {
        let name = pod.name_any();
        match pod_ready(pod) {
            ReadinessState::Ready => {}
            ReadinessState::NotYetReady => return Some(format!("pod '{}' is not ready", name)),
            ReadinessState::Failed(reason) => {
                return Some(format!("pod '{}' is not ready: {}", name, reason))
            }
        }
        let record = match baseline.get(&pod_uid(pod)) {
            Some(record) => record,
            None => return Some(format!("pod '{}' replaced an observed pod", name)),
        };
        let now = restarts(pod);
        if now > record.restarts {
            return Some(format!(
                "pod '{}' restarted ({} -> {} restarts)",
                name, record.restarts, now
            ));
        }
    }
    None
}

fn pod_uid(pod: &DynamicObject) -> String {
    pod.uid().unwrap_or_else(|| pod.name_any())
}

fn restarts(pod: &DynamicObject) -> i64 {
    pod.data
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|status| status.get("restartCount").and_then(Value::as_i64))
                .sum()
        })
        .unwrap_or_default()
}

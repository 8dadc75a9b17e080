/*!

Detects the completion of a rolling update.

A [`Snapshot`] fingerprints the mutable part of a workload: its pod template, the images of its
containers and its replica count. [`RolloutDetector::await_rollout`] moves through three states:

- `Baseline`: the live fingerprint still equals the baseline; readiness of the old generation is
  ignored.
- `Rolling`: the fingerprint has changed; the workload is waited on with its kind's readiness
  predicate. Reverting to the baseline here is a regression.
- `Settled`: the new generation is ready.

!*/

use crate::clients::ClusterClient;
use crate::error::{self, Result};
use crate::readiness::PredicateRegistry;
use crate::wait::{observe, retry_transient, wait_until};
use crate::{Context, ObjectRef, ReadinessState, WaitSpec};
use kube::api::DynamicObject;
use log::{debug, info};
use serde_json::Value;
use snafu::OptionExt;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A comparable fingerprint of a workload's pod template and scale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Snapshot {
    template_hash: u64,
    images: Vec<String>,
    replicas: Option<i64>,
}

impl Snapshot {
    /// Fingerprint a workload. Returns `None` if the object has no `spec.template`.
    pub fn of(object: &DynamicObject) -> Option<Self> {
        let template = object.data.pointer("/spec/template")?;
        let mut hasher = DefaultHasher::new();
        template.to_string().hash(&mut hasher);
        let images = ["/spec/initContainers", "/spec/containers"]
            .iter()
            .filter_map(|pointer| template.pointer(pointer).and_then(Value::as_array))
            .flatten()
            .filter_map(|container| container.get("image").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Some(Self {
            template_hash: hasher.finish(),
            images,
            replicas: object.data.pointer("/spec/replicas").and_then(Value::as_i64),
        })
    }

    pub fn template_hash(&self) -> u64 {
        self.template_hash
    }

    /// Container images, init containers first.
    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn replicas(&self) -> Option<i64> {
        self.replicas
    }
}

#[derive(Debug)]
enum Progress {
    Baseline,
    Rolling,
    Settled(Snapshot),
}

pub struct RolloutDetector {
    cluster: Arc<dyn ClusterClient>,
    predicates: PredicateRegistry,
    wait_spec: WaitSpec,
}

impl RolloutDetector {
    pub fn new(context: &Context, predicates: PredicateRegistry) -> Self {
        Self {
            cluster: context.cluster(),
            predicates,
            wait_spec: context.settings().wait_spec(),
        }
    }

    /// Read the current fingerprint of `workload`. A workload that is not visible yet is read
    /// again until the default wait times out.
    pub async fn capture_baseline(&self, workload: &ObjectRef) -> Result<Snapshot> {
        let description = format!("the baseline of {}", workload);
        let object = retry_transient(&description, &self.wait_spec, || {
            self.cluster.get(workload)
        })
        .await?;
        let snapshot = Snapshot::of(&object).context(error::NoPodTemplateSnafu {
            reference: workload.clone(),
        })?;
        debug!("Baseline of {}: {:?}", workload, snapshot);
        Ok(snapshot)
    }

    /// Wait until `workload` has moved away from `baseline` and its new generation is ready.
    /// Returns the settled fingerprint.
    pub async fn await_rollout(
        &self,
        workload: &ObjectRef,
        baseline: &Snapshot,
        timeout: Duration,
    ) -> Result<Snapshot> {
        let readiness = self.predicates.predicate_for(&workload.kind)?;
        let readiness = &readiness;
        let progress = &Mutex::new(Progress::Baseline);
        let description = format!("rollout of {}", workload);
        let description = description.as_str();
        let wait_spec = self.wait_spec.with_timeout(timeout);

        wait_until(description, &wait_spec, || async move {
            let object = match observe(self.cluster.get(workload).await, description)? {
                Some(object) => object,
                None => return Ok(ReadinessState::NotYetReady),
            };
            let live = Snapshot::of(&object).context(error::NoPodTemplateSnafu {
                reference: workload.clone(),
            })?;

            let mut progress = progress.lock().await;
            if matches!(*progress, Progress::Baseline) {
                if live == *baseline {
                    return Ok(ReadinessState::NotYetReady);
                }
                info!("{} started rolling out", workload);
                *progress = Progress::Rolling;
            } else if live == *baseline {
                return error::RegressionDetectedSnafu {
                    reference: workload.clone(),
                }
                .fail();
            }

            let state = readiness(&object);
            if state.is_ready() {
                *progress = Progress::Settled(live);
            }
            Ok(state)
        })
        .await?;

        let settled = progress.lock().await.clone_settled();
        match settled {
            Some(settled) => {
                info!("Rollout of {} settled", workload);
                Ok(settled)
            }
            None => error::NotFoundSnafu {
                what: format!("the settled state of {}", workload),
            }
            .fail(),
        }
    }
}

impl Progress {
    fn clone_settled(&self) -> Option<Snapshot> {
        match self {
            Progress::Settled(snapshot) => Some(snapshot.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn deployment(image: &str, replicas: i64) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "operator", "namespace": "system" },
            "spec": {
                "replicas": replicas,
                "template": {
                    "spec": {
                        "initContainers": [{ "name": "init", "image": "busybox:1" }],
                        "containers": [{ "name": "manager", "image": image }]
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn fingerprint() {
        let snapshot = Snapshot::of(&deployment("operator:v1", 2)).unwrap();
        assert_eq!(snapshot.images(), ["busybox:1", "operator:v1"]);
        assert_eq!(snapshot.replicas(), Some(2));
    }

    #[test]
    fn changes_are_detected() {
        let v1 = Snapshot::of(&deployment("operator:v1", 1)).unwrap();
        assert_eq!(v1, Snapshot::of(&deployment("operator:v1", 1)).unwrap());
        assert_ne!(v1, Snapshot::of(&deployment("operator:v2", 1)).unwrap());
        assert_ne!(v1, Snapshot::of(&deployment("operator:v1", 3)).unwrap());
    }

    #[test]
    fn no_template() {
        let config_map: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "settings" },
            "data": { "key": "value" }
        }))
        .unwrap();
        assert!(Snapshot::of(&config_map).is_none());
    }
}

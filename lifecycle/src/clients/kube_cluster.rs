use super::error::{self, Result};
use super::{ApprovalClient, ClusterClient, LogClient};
use crate::constants::{INSTALL_PLAN, INSTALL_PLAN_API_VERSION};
use crate::object_ref::split_api_version;
use crate::readiness::install_plan_pending;
use crate::selector::label_selector_string;
use crate::ObjectRef;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams, Patch,
    PatchParams, PostParams,
};
use kube::core::TypeMeta;
use kube::{Api, Client, ResourceExt};
use log::{debug, trace};
use serde_json::{json, Value};
use snafu::{OptionExt, ResultExt};

/// The collaborators backed by a real cluster.
#[derive(Clone)]
pub struct KubeCluster {
    k8s_client: Client,
}

impl KubeCluster {
    pub fn new_from_k8s_client(k8s_client: Client) -> Self {
        Self { k8s_client }
    }

    /// Create a `KubeCluster` using the default `kube::Client`.
    pub async fn new() -> Result<Self> {
        let k8s_client = Client::try_default()
            .await
            .context(error::InitializationSnafu)?;
        Ok(Self::new_from_k8s_client(k8s_client))
    }

    pub fn k8s_client(&self) -> &Client {
        &self.k8s_client
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => {
                Api::namespaced_with(self.k8s_client.clone(), namespace, resource)
            }
            None => Api::all_with(self.k8s_client.clone(), resource),
        }
    }

    fn api_for(&self, target: &ObjectRef) -> Api<DynamicObject> {
        self.api(&target.api_resource(), target.namespace.as_deref())
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, target: &ObjectRef) -> Result<DynamicObject> {
        trace!("getting {}", target);
        Ok(self
            .api_for(target)
            .get(&target.name)
            .await
            .context(error::KubeApiCallSnafu {
                method: "get",
                what: target.to_string(),
            })?)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if let Some(label_selector) = label_selector {
            params = params.labels(label_selector);
        }
        Ok(self
            .api(resource, namespace)
            .list(&params)
            .await
            .context(error::KubeApiCallSnafu {
                method: "list",
                what: format!("{}s", resource.kind),
            })?
            .items
            .into_iter()
            .map(|mut item| {
                // Items of a list response do not carry their own type information.
                item.types.get_or_insert_with(|| TypeMeta {
                    api_version: resource.api_version.clone(),
                    kind: resource.kind.clone(),
                });
                item
            })
            .collect())
    }

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let target = ObjectRef::from_object(object).context(error::InvalidObjectSnafu {
            what: format!("object '{}'", object.name_any()),
            reason: "the type information or the name is missing",
        })?;
        debug!("creating {}", target);
        Ok(self
            .api_for(&target)
            .create(&PostParams::default(), object)
            .await
            .context(error::KubeApiCallSnafu {
                method: "create",
                what: target.to_string(),
            })?)
    }

    async fn delete(&self, target: &ObjectRef) -> Result<()> {
        debug!("deleting {}", target);
        self.api_for(target)
            .delete(&target.name, &DeleteParams::background())
            .await
            .context(error::KubeApiCallSnafu {
                method: "delete",
                what: target.to_string(),
            })?;
        Ok(())
    }

    async fn patch_merge(&self, target: &ObjectRef, patch: Value) -> Result<DynamicObject> {
        Ok(self
            .api_for(target)
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .context(error::KubeApiCallSnafu {
                method: "patch",
                what: target.to_string(),
            })?)
    }
}

#[async_trait::async_trait]
impl LogClient for KubeCluster {
    async fn deployment_logs(
        &self,
        namespace: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let what = ObjectRef::of::<Deployment, _>(Some(namespace), name).to_string();
        let deployment = Api::<Deployment>::namespaced(self.k8s_client.clone(), namespace)
            .get(name)
            .await
            .context(error::KubeApiCallSnafu {
                method: "get",
                what: what.clone(),
            })?;
        let selector = deployment
            .spec
            .as_ref()
            .map(|spec| label_selector_string(&spec.selector))
            .filter(|selector| !selector.is_empty())
            .context(error::InvalidObjectSnafu {
                what: what.clone(),
                reason: "it has no pod selector",
            })?;

        let pod_api = Api::<Pod>::namespaced(self.k8s_client.clone(), namespace);
        let pods = pod_api
            .list(&ListParams::default().labels(&selector))
            .await
            .context(error::KubeApiCallSnafu {
                method: "list pods of",
                what: what.clone(),
            })?;
        // The API only accepts whole seconds, round up so the cursor's own second is included.
        let since_seconds =
            since.map(|since| (Utc::now() - since).num_seconds().max(0) + 1);
        let targets = log_targets(&pods.items);
        let logs = try_join_all(targets.into_iter().map(|(pod_name, container)| {
            let pod_api = pod_api.clone();
            let params = LogParams {
                container: Some(container.clone()),
                since_seconds,
                ..Default::default()
            };
            async move {
                pod_api
                    .logs(&pod_name, &params)
                    .await
                    .context(error::KubeApiCallSnafu {
                        method: "get logs for",
                        what: format!("Pod {}/{} container {}", namespace, pod_name, container),
                    })
            }
        }))
        .await?;
        Ok(logs.join("\n"))
    }
}

#[async_trait::async_trait]
impl ApprovalClient for KubeCluster {
    async fn pending_install_plan(&self, namespace: &str, csv: &str) -> Result<Option<String>> {
        let resource = install_plan_resource();
        let is_pending = install_plan_pending(csv);
        Ok(self
            .list(&resource, Some(namespace), None)
            .await?
            .into_iter()
            .find(|plan| is_pending(plan))
            .map(|plan| plan.name_any()))
    }

    async fn approve_install_plan(&self, namespace: &str, name: &str) -> Result<()> {
        let target = ObjectRef::new(
            INSTALL_PLAN_API_VERSION,
            INSTALL_PLAN,
            Some(namespace),
            name,
        );
        self.patch_merge(&target, json!({ "spec": { "approved": true } }))
            .await
            .map(|_| ())
    }
}

/// Every `(pod, container)` whose log is read. The log endpoint rejects requests without a container
/// name for pods with more than one container.
fn log_targets(pods: &[Pod]) -> Vec<(String, String)> {
    pods.iter()
        .flat_map(|pod| {
            let pod_name = pod.name_any();
            pod.spec
                .iter()
                .flat_map(|spec| spec.containers.iter())
                .map(move |container| (pod_name.clone(), container.name.clone()))
        })
        .collect()
}

fn install_plan_resource() -> ApiResource {
    let (group, version) = split_api_version(INSTALL_PLAN_API_VERSION);
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, INSTALL_PLAN))
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use kube::api::ObjectMeta;

    fn pod(name: &str, containers: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|name| Container {
                        name: name.to_string(),
                        ..Container::default()
                    })
                    .collect(),
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn sidecar_logs_are_read_separately() {
        let pods = [
            pod("operator-0", &["manager", "kube-rbac-proxy"]),
            pod("operator-1", &["manager"]),
        ];
        assert_eq!(
            log_targets(&pods),
            vec![
                ("operator-0".to_string(), "manager".to_string()),
                ("operator-0".to_string(), "kube-rbac-proxy".to_string()),
                ("operator-1".to_string(), "manager".to_string()),
            ]
        );
    }
}

/*!

What "ready" means for each kind of object.

A [`ReadinessCheck`] is a pure function of an object's observed state. The [`PredicateRegistry`]
maps a kind to its check; looking up a kind that has no check is an error rather than a silent
"always ready".

!*/

use crate::constants::{
    CONDITION_ESTABLISHED, CONDITION_NAMES_ACCEPTED, CONDITION_PROGRESSING, CONDITION_READY,
    INSTALL_PLAN, OPERATOR_GROUP, REASON_PROGRESS_DEADLINE_EXCEEDED, SUBSCRIPTION,
};
use crate::error::{self, Result};
use crate::ReadinessState;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, Namespace, Pod, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::OptionExt;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Decides whether an observed object counts as ready.
pub type ReadinessCheck = Arc<dyn Fn(&DynamicObject) -> ReadinessState + Send + Sync>;

/// Maps a resource kind to its [`ReadinessCheck`].
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    checks: HashMap<String, ReadinessCheck>,
}

impl PredicateRegistry {
    /// A registry with no predicates.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with predicates for the core Kubernetes kinds and the OLM kinds used when
    /// installing an operator.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(kind::<Namespace>(), namespace_active)
            .register(kind::<Pod>(), pod_ready)
            .register(kind::<Deployment>(), deployment_ready)
            .register(kind::<StatefulSet>(), stateful_set_ready)
            .register(kind::<CustomResourceDefinition>(), crd_established)
            .register(kind::<Endpoints>(), endpoints_populated)
            .register(INSTALL_PLAN, install_plan_complete);
        for present in [
            kind::<Secret>(),
            kind::<ConfigMap>(),
            kind::<Service>(),
            kind::<ServiceAccount>(),
            kind::<Role>(),
            kind::<RoleBinding>(),
            kind::<ClusterRole>(),
            kind::<ClusterRoleBinding>(),
            OPERATOR_GROUP.to_string(),
            SUBSCRIPTION.to_string(),
        ] {
            registry.register(present, exists);
        }
        registry
    }

    /// Register (or replace) the predicate for `kind`.
    pub fn register<S, F>(&mut self, kind: S, check: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&DynamicObject) -> ReadinessState + Send + Sync + 'static,
    {
        self.checks.insert(kind.into(), Arc::new(check));
        self
    }

    /// The predicate for `kind`, or [`Error::NoPredicateRegistered`](crate::Error).
    pub fn predicate_for(&self, kind: &str) -> Result<ReadinessCheck> {
        self.checks
            .get(kind)
            .cloned()
            .context(error::NoPredicateRegisteredSnafu { kind })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.checks.contains_key(kind)
    }
}

impl Debug for PredicateRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.checks.keys().collect();
        kinds.sort();
        f.debug_struct("PredicateRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

fn kind<K>() -> String
where
    K: kube::Resource<DynamicType = ()>,
{
    K::kind(&()).to_string()
}

/// Deserialize the dynamic object into `K`. A failure means the observed object does not have the
/// shape its kind promises, which waiting longer will not fix.
fn typed<K>(object: &DynamicObject) -> std::result::Result<K, ReadinessState>
where
    K: DeserializeOwned,
{
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|e| ReadinessState::failed(format!("unable to interpret object: {}", e)))
}

macro_rules! typed_or_return {
    ($object:expr) => {
        match typed($object) {
            Ok(value) => value,
            Err(state) => return state,
        }
    };
}

/// Ready as soon as the object can be observed.
pub fn exists(_: &DynamicObject) -> ReadinessState {
    ReadinessState::Ready
}

pub fn namespace_active(object: &DynamicObject) -> ReadinessState {
    let namespace: Namespace = typed_or_return!(object);
    match namespace.status.and_then(|status| status.phase).as_deref() {
        Some("Active") => ReadinessState::Ready,
        Some("Terminating") => ReadinessState::failed("the namespace is terminating"),
        _ => ReadinessState::NotYetReady,
    }
}

/// Running with the `Ready` condition set. A pod that has terminated will never become ready.
pub fn pod_ready(object: &DynamicObject) -> ReadinessState {
    let pod: Pod = typed_or_return!(object);
    let status = pod.status.unwrap_or_default();
    match status.phase.as_deref() {
        Some("Running") => status
            .conditions
            .unwrap_or_default()
            .iter()
            .any(|condition| condition.type_ == CONDITION_READY && condition.status == "True")
            .into(),
        Some(phase @ ("Failed" | "Succeeded")) => {
            ReadinessState::failed(format!("the pod has terminated with phase '{}'", phase))
        }
        _ => ReadinessState::NotYetReady,
    }
}

/// The controller has observed the latest generation and every desired replica is updated,
/// ready and available with none unavailable.
pub fn deployment_ready(object: &DynamicObject) -> ReadinessState {
    let deployment: Deployment = typed_or_return!(object);
    let generation = deployment.metadata.generation.unwrap_or_default();
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = deployment.status.unwrap_or_default();

    if let Some(condition) = status.conditions.iter().flatten().find(|condition| {
        condition.type_ == CONDITION_PROGRESSING
            && condition.reason.as_deref() == Some(REASON_PROGRESS_DEADLINE_EXCEEDED)
    }) {
        return ReadinessState::failed(format!(
            "the rollout exceeded its progress deadline: {}",
            condition.message.clone().unwrap_or_default()
        ));
    }

    (status.observed_generation.unwrap_or_default() >= generation
        && status.replicas.unwrap_or_default() == desired
        && status.updated_replicas.unwrap_or_default() == desired
        && status.ready_replicas.unwrap_or_default() == desired
        && status.available_replicas.unwrap_or_default() == desired
        && status.unavailable_replicas.unwrap_or_default() == 0)
        .into()
}

pub fn stateful_set_ready(object: &DynamicObject) -> ReadinessState {
    let stateful_set: StatefulSet = typed_or_return!(object);
    let generation = stateful_set.metadata.generation.unwrap_or_default();
    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = stateful_set.status.unwrap_or_default();
    (status.observed_generation.unwrap_or_default() >= generation
        && status.ready_replicas.unwrap_or_default() == desired
        && status.updated_replicas.unwrap_or_default() == desired)
        .into()
}

/// The `Established` condition is `True`. A CRD whose names were rejected will never be served.
pub fn crd_established(object: &DynamicObject) -> ReadinessState {
    if let Some(rejected) = find_condition(object, CONDITION_NAMES_ACCEPTED)
        .filter(|condition| condition.get("status").and_then(Value::as_str) == Some("False"))
    {
        return ReadinessState::failed(format!(
            "the CRD names were not accepted: {}",
            rejected
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
        ));
    }
    condition_true(CONDITION_ESTABLISHED)(object)
}

/// At least one subset has at least one address backing it.
pub fn endpoints_populated(object: &DynamicObject) -> ReadinessState {
    let endpoints: Endpoints = typed_or_return!(object);
    endpoints
        .subsets
        .unwrap_or_default()
        .iter()
        .any(|subset| !subset.addresses.clone().unwrap_or_default().is_empty())
        .into()
}

pub fn install_plan_complete(object: &DynamicObject) -> ReadinessState {
    match status_str(object, "/status/phase") {
        Some("Complete") => ReadinessState::Ready,
        Some("Failed") => ReadinessState::failed(format!(
            "the install plan failed: {}",
            status_str(object, "/status/message").unwrap_or_default()
        )),
        _ => ReadinessState::NotYetReady,
    }
}

/// Matches an install plan that would install `csv` and has not been approved yet.
pub fn install_plan_pending(csv: &str) -> impl Fn(&DynamicObject) -> bool + Send + Sync {
    let csv = csv.to_string();
    move |plan| {
        let installs_csv = plan
            .data
            .pointer("/spec/clusterServiceVersionNames")
            .and_then(Value::as_array)
            .map(|names| names.iter().any(|name| name.as_str() == Some(csv.as_str())))
            .unwrap_or_default();
        let approved = plan
            .data
            .pointer("/spec/approved")
            .and_then(Value::as_bool)
            .unwrap_or_default();
        installs_csv && !approved
    }
}

/// Ready when `status.phase` equals `expected`, e.g. a `DataScienceCluster` in phase `Ready`.
pub fn phase_is<S>(expected: S) -> impl Fn(&DynamicObject) -> ReadinessState + Send + Sync
where
    S: Into<String>,
{
    status_field_equals("/status/phase", expected)
}

/// Ready when the JSON `pointer` into the object's data holds the string `expected`.
pub fn status_field_equals<S1, S2>(
    pointer: S1,
    expected: S2,
) -> impl Fn(&DynamicObject) -> ReadinessState + Send + Sync
where
    S1: Into<String>,
    S2: Into<String>,
{
    let pointer = pointer.into();
    let expected = expected.into();
    move |object| (status_str(object, &pointer) == Some(expected.as_str())).into()
}

/// Ready when the condition of type `condition_type` in `status.conditions` has status `True`.
pub fn condition_true<S>(condition_type: S) -> impl Fn(&DynamicObject) -> ReadinessState + Send + Sync
where
    S: Into<String>,
{
    let condition_type = condition_type.into();
    move |object| {
        find_condition(object, &condition_type)
            .map(|condition| condition.get("status").and_then(Value::as_str) == Some("True"))
            .unwrap_or_default()
            .into()
    }
}

fn find_condition<'a>(object: &'a DynamicObject, condition_type: &str) -> Option<&'a Value> {
    object
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)?
        .iter()
        .find(|condition| condition.get("type").and_then(Value::as_str) == Some(condition_type))
}

fn status_str<'a>(object: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    object.data.pointer(pointer).and_then(Value::as_str)
}

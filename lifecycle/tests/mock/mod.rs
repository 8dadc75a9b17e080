/*!

This test module provides a scripted, in-memory implementation of the [`ClusterClient`],
[`LogClient`] and [`ApprovalClient`] traits so that waits, rollouts and teardown can be tested
without Kubernetes.

Each object's `get` responses and each kind's `list` responses are scripted as a sequence. A call
consumes the next entry of the sequence; the last entry repeats forever.

!*/

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use kube::api::{ApiResource, DynamicObject};
use kube::error::ErrorResponse;
use lifecycle::clients::{self, ApprovalClient, ClusterClient, LogClient};
use lifecycle::{Context, ObjectRef, Settings};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// A collaborator call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Call {
    List,
    Delete,
    Logs,
    Approve,
}

/// One scripted answer to a `get`.
#[derive(Debug, Clone)]
pub(crate) enum Observation {
    Present(DynamicObject),
    Missing,
    Error(u16),
}

#[derive(Default)]
struct State {
    objects: HashMap<ObjectRef, VecDeque<Observation>>,
    lists: HashMap<String, VecDeque<Vec<DynamicObject>>>,
    created: Vec<ObjectRef>,
    deleted: Vec<ObjectRef>,
    failing_deletes: HashMap<ObjectRef, u16>,
    calls: HashMap<Call, usize>,
    failing_calls: HashMap<(Call, usize), u16>,
    lingering: HashSet<ObjectRef>,
    logs: String,
    log_requests: Vec<Option<DateTime<Utc>>>,
    install_plans: VecDeque<Option<String>>,
    approved: Vec<String>,
}

#[derive(Default)]
pub(crate) struct MockCluster {
    state: Mutex<State>,
}

impl MockCluster {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A context whose three collaborators are all this mock.
    pub(crate) fn context(self: &Arc<Self>, settings: Settings) -> Context {
        Context::new(self.clone(), self.clone(), self.clone(), settings)
    }

    pub(crate) fn script<I>(&self, reference: &ObjectRef, observations: I)
    where
        I: IntoIterator<Item = Observation>,
    {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(reference.clone(), observations.into_iter().collect());
    }

    pub(crate) fn script_list(&self, kind: &str, lists: Vec<Vec<DynamicObject>>) {
        self.state
            .lock()
            .unwrap()
            .lists
            .insert(kind.to_string(), lists.into_iter().collect());
    }

    pub(crate) fn fail_delete(&self, reference: &ObjectRef, code: u16) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(reference.clone(), code);
    }

    /// Make the `nth` call of a kind, counting from zero, fail with `code`.
    pub(crate) fn fail_call(&self, call: Call, nth: usize, code: u16) {
        self.state
            .lock()
            .unwrap()
            .failing_calls
            .insert((call, nth), code);
    }

    /// Deleting `reference` succeeds but the object never goes away.
    pub(crate) fn linger(&self, reference: &ObjectRef) {
        self.state
            .lock()
            .unwrap()
            .lingering
            .insert(reference.clone());
    }

    /// Remove an object behind the manager's back.
    pub(crate) fn remove(&self, reference: &ObjectRef) {
        self.state.lock().unwrap().objects.remove(reference);
    }

    pub(crate) fn set_logs(&self, logs: &str) {
        self.state.lock().unwrap().logs = logs.to_string();
    }

    pub(crate) fn script_install_plans<I>(&self, plans: I)
    where
        I: IntoIterator<Item = Option<&'static str>>,
    {
        self.state.lock().unwrap().install_plans = plans
            .into_iter()
            .map(|plan| plan.map(str::to_string))
            .collect();
    }

    pub(crate) fn created(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().created.clone()
    }

    pub(crate) fn deleted(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub(crate) fn approved(&self) -> Vec<String> {
        self.state.lock().unwrap().approved.clone()
    }

    pub(crate) fn log_requests(&self) -> Vec<Option<DateTime<Utc>>> {
        self.state.lock().unwrap().log_requests.clone()
    }
}

impl State {
    /// Count a call and return its scripted failure, if any.
    fn failure(&mut self, call: Call, what: &str) -> clients::Result<()> {
        let count = self.calls.entry(call).or_default();
        let nth = *count;
        *count += 1;
        match self.failing_calls.remove(&(call, nth)) {
            Some(code) => Err(api_error(code, what)),
            None => Ok(()),
        }
    }
}

fn next<T: Clone>(sequence: &mut VecDeque<T>) -> Option<T> {
    if sequence.len() > 1 {
        sequence.pop_front()
    } else {
        sequence.front().cloned()
    }
}

/// An error as the Kubernetes API would return it.
pub(crate) fn api_error(code: u16, what: &str) -> clients::Error {
    clients::Error::kube_api_call(
        "mock",
        what,
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("scripted {} for {}", code, what),
            reason: "Scripted".to_string(),
            code,
        }),
    )
}

#[async_trait::async_trait]
impl ClusterClient for MockCluster {
    async fn get(&self, target: &ObjectRef) -> clients::Result<DynamicObject> {
        let mut state = self.state.lock().unwrap();
        let observation = state.objects.get_mut(target).and_then(next);
        match observation {
            Some(Observation::Present(object)) => Ok(object),
            Some(Observation::Error(code)) => Err(api_error(code, &target.to_string())),
            Some(Observation::Missing) | None => Err(api_error(404, &target.to_string())),
        }
    }

    async fn list(
        &self,
        resource: &ApiResource,
        _namespace: Option<&str>,
        _label_selector: Option<&str>,
    ) -> clients::Result<Vec<DynamicObject>> {
        let mut state = self.state.lock().unwrap();
        state.failure(Call::List, &resource.kind)?;
        Ok(state
            .lists
            .get_mut(&resource.kind)
            .and_then(next)
            .unwrap_or_default())
    }

    async fn create(&self, object: &DynamicObject) -> clients::Result<DynamicObject> {
        let reference = ObjectRef::from_object(object).unwrap();
        let mut state = self.state.lock().unwrap();
        state.created.push(reference.clone());
        state
            .objects
            .entry(reference)
            .or_insert_with(|| VecDeque::from([Observation::Present(object.clone())]));
        Ok(object.clone())
    }

    async fn delete(&self, target: &ObjectRef) -> clients::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(target.clone());
        state.failure(Call::Delete, &target.to_string())?;
        if let Some(code) = state.failing_deletes.get(target) {
            return Err(api_error(*code, &target.to_string()));
        }
        if state.lingering.contains(target) {
            return Ok(());
        }
        match state.objects.remove(target) {
            Some(_) => Ok(()),
            None => Err(api_error(404, &target.to_string())),
        }
    }

    async fn patch_merge(&self, target: &ObjectRef, _patch: Value) -> clients::Result<DynamicObject> {
        self.get(target).await
    }
}

#[async_trait::async_trait]
impl LogClient for MockCluster {
    async fn deployment_logs(
        &self,
        _namespace: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> clients::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.log_requests.push(since);
        state.failure(Call::Logs, name)?;
        Ok(state.logs.clone())
    }
}

#[async_trait::async_trait]
impl ApprovalClient for MockCluster {
    async fn pending_install_plan(
        &self,
        _namespace: &str,
        _csv: &str,
    ) -> clients::Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        Ok(next(&mut state.install_plans).flatten())
    }

    async fn approve_install_plan(&self, _namespace: &str, name: &str) -> clients::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.failure(Call::Approve, name)?;
        state.approved.push(name.to_string());
        state.install_plans.clear();
        Ok(())
    }
}

/// Settings with short waits: poll every second, give up after ten.
pub(crate) fn fast_settings() -> Settings {
    Settings {
        poll_interval_secs: 1,
        timeout_secs: 10,
        delete_timeout_secs: 5,
        stability_poll_secs: 1,
        stability_window_secs: 5,
        ..Settings::default()
    }
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn object(value: Value) -> DynamicObject {
    serde_json::from_value(value).unwrap()
}

pub(crate) fn config_map(namespace: &str, name: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": namespace },
        "data": { "key": "value" }
    }))
}

pub(crate) fn config_map_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::new("v1", "ConfigMap", Some(namespace), name)
}

pub(crate) fn endpoints(namespace: &str, name: &str, populated: bool) -> DynamicObject {
    let subsets = if populated {
        json!([{ "addresses": [{ "ip": "10.0.0.7" }] }])
    } else {
        json!([])
    };
    object(json!({
        "apiVersion": "v1",
        "kind": "Endpoints",
        "metadata": { "name": name, "namespace": namespace },
        "subsets": subsets
    }))
}

pub(crate) fn deployment_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::new("apps/v1", "Deployment", Some(namespace), name)
}

/// A one-replica deployment running `image`, fully rolled out when `ready`.
pub(crate) fn deployment(namespace: &str, name: &str, image: &str, ready: bool) -> DynamicObject {
    let ready_replicas = if ready { 1 } else { 0 };
    object(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace, "generation": 2 },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": [{ "name": "manager", "image": image }] }
            }
        },
        "status": {
            "observedGeneration": 2,
            "replicas": 1,
            "updatedReplicas": 1,
            "readyReplicas": ready_replicas,
            "availableReplicas": ready_replicas,
            "unavailableReplicas": 1 - ready_replicas
        }
    }))
}

/// A running pod with one container.
pub(crate) fn pod(name: &str, uid: &str, ready: bool, restarts: i64) -> DynamicObject {
    let ready_status = if ready { "True" } else { "False" };
    object(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": "workloads", "uid": uid },
        "status": {
            "phase": "Running",
            "conditions": [{ "type": "Ready", "status": ready_status }],
            "containerStatuses": [{
                "name": "main",
                "image": "workload:v1",
                "imageID": "",
                "ready": ready,
                "restartCount": restarts
            }]
        }
    }))
}

/*!

The [`ResourceManager`] creates cluster objects, waits for them to become ready and remembers every
one of them on a teardown stack. [`ResourceManager::teardown_all`] removes them again, newest first,
attempting every entry even when some of them cannot be deleted.

!*/

use crate::clients::ClusterClient;
use crate::error::{self, Result, TeardownFailure};
use crate::readiness::{PredicateRegistry, ReadinessCheck};
use crate::resource::{ManagedResource, Tracked};
use crate::wait::{observe, wait_until};
use crate::{Context, ObjectRef, ReadinessState, WaitSpec};
use kube::api::DynamicObject;
use log::{debug, error, info};
use serde::Serialize;
use snafu::{OptionExt, ResultExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct ResourceManager {
    cluster: Arc<dyn ClusterClient>,
    predicates: PredicateRegistry,
    wait_spec: WaitSpec,
    delete_wait_spec: WaitSpec,
    /// Creation order, the most recent entry last.
    stack: Mutex<Vec<Arc<dyn Tracked>>>,
    /// Held shared by every create and exclusively by teardown.
    gate: RwLock<()>,
}

impl ResourceManager {
    /// A manager using the default predicates and the waits configured in the context's settings.
    pub fn new(context: &Context) -> Self {
        Self {
            cluster: context.cluster(),
            predicates: PredicateRegistry::with_defaults(),
            wait_spec: context.settings().wait_spec(),
            delete_wait_spec: context.settings().delete_wait_spec(),
            stack: Mutex::new(Vec::new()),
            gate: RwLock::new(()),
        }
    }

    /// Replace the predicate registry, e.g. to add predicates for custom resources.
    pub fn with_predicates(self, predicates: PredicateRegistry) -> Self {
        Self { predicates, ..self }
    }

    pub fn predicates(&self) -> &PredicateRegistry {
        &self.predicates
    }

    pub fn wait_spec(&self) -> &WaitSpec {
        &self.wait_spec
    }

    /// Create `object`, track it and wait for its kind's readiness predicate with the default wait.
    pub async fn create_and_track(&self, object: &DynamicObject) -> Result<Arc<ManagedResource>> {
        let wait_spec = self.wait_spec;
        self.create_and_track_with(object, &wait_spec).await
    }

    /// Create `object`, track it and wait for its kind's readiness predicate using `wait_spec`.
    /// The object stays tracked when the wait fails so that teardown still removes it.
    pub async fn create_and_track_with(
        &self,
        object: &DynamicObject,
        wait_spec: &WaitSpec,
    ) -> Result<Arc<ManagedResource>> {
        let _gate = self.gate.read().await;
        let reference = reference_of(object)?;
        let readiness = self.predicates.predicate_for(&reference.kind)?;
        let resource = self.create(object, reference, Some(readiness)).await?;
        self.wait_for_ready(resource.as_ref(), wait_spec).await?;
        Ok(resource)
    }

    /// Create `object` and track it without waiting for it to become ready.
    pub async fn create_without_wait(&self, object: &DynamicObject) -> Result<Arc<ManagedResource>> {
        let _gate = self.gate.read().await;
        let reference = reference_of(object)?;
        let readiness = self.predicates.predicate_for(&reference.kind).ok();
        self.create(object, reference, readiness).await
    }

    pub async fn create_typed_and_track<K>(&self, resource: &K) -> Result<Arc<ManagedResource>>
    where
        K: kube::Resource<DynamicType = ()> + Serialize,
    {
        self.create_and_track(&to_dynamic(resource)?).await
    }

    pub async fn create_typed_without_wait<K>(&self, resource: &K) -> Result<Arc<ManagedResource>>
    where
        K: kube::Resource<DynamicType = ()> + Serialize,
    {
        self.create_without_wait(&to_dynamic(resource)?).await
    }

    /// Put something the manager did not create on the teardown stack.
    pub async fn track(&self, tracked: Arc<dyn Tracked>) {
        let _gate = self.gate.read().await;
        self.push(tracked).await;
    }

    /// The references on the teardown stack, oldest first.
    pub async fn tracked(&self) -> Vec<ObjectRef> {
        self.stack
            .lock()
            .await
            .iter()
            .map(|entry| entry.reference().clone())
            .collect()
    }

    /// Poll `tracked` until it exists and its readiness check reports ready.
    pub async fn wait_for_ready(&self, tracked: &dyn Tracked, wait_spec: &WaitSpec) -> Result<()> {
        let description = tracked.reference().to_string();
        let description = description.as_str();
        wait_until(description, wait_spec, || async move {
            Ok(match observe(tracked.fetch().await, description)? {
                Some(Some(object)) => tracked.check_ready(&object),
                _ => ReadinessState::NotYetReady,
            })
        })
        .await
    }

    /// Wait until the object behind `reference` is ready. A tracked object is judged by its own
    /// readiness check, any other object by its kind's registered predicate.
    pub async fn wait_until_ready(&self, reference: &ObjectRef, wait_spec: &WaitSpec) -> Result<()> {
        match self.find(reference).await {
            Some(tracked) => self.wait_for_ready(tracked.as_ref(), wait_spec).await,
            None => {
                let readiness = self.predicates.predicate_for(&reference.kind)?;
                let resource = ManagedResource::new(
                    reference.clone(),
                    Arc::clone(&self.cluster),
                    Some(readiness),
                );
                self.wait_for_ready(&resource, wait_spec).await
            }
        }
    }

    /// Delete a tracked object ahead of teardown and wait for it to disappear. The entry leaves the
    /// stack only once the object is gone.
    pub async fn delete_tracked(&self, reference: &ObjectRef) -> Result<()> {
        let _gate = self.gate.read().await;
        let tracked = self
            .find(reference)
            .await
            .context(error::NotFoundSnafu {
                what: format!("tracked resource {}", reference),
            })?;
        self.remove(tracked.as_ref()).await?;
        self.stack
            .lock()
            .await
            .retain(|entry| !Arc::ptr_eq(entry, &tracked));
        Ok(())
    }

    /// Delete every tracked object, newest first, and wait for each to disappear. Every entry is
    /// attempted; the ones that could not be removed are reported together in
    /// [`Error::TeardownPartialFailure`](crate::Error::TeardownPartialFailure). Objects that are
    /// already gone count as removed. The stack is empty afterwards, so a second call does nothing.
    pub async fn teardown_all(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        let entries = std::mem::take(&mut *self.stack.lock().await);
        if entries.is_empty() {
            debug!("Nothing to tear down");
            return Ok(());
        }

        info!("Tearing down {} resources", entries.len());
        let mut failed = Vec::new();
        for entry in entries.iter().rev() {
            if let Err(e) = self.remove(entry.as_ref()).await {
                error!("Unable to tear down {}: {}", entry.reference(), e);
                failed.push(TeardownFailure {
                    reference: entry.reference().clone(),
                    reason: e.to_string(),
                });
            }
        }

        if failed.is_empty() {
            info!("Teardown complete");
            Ok(())
        } else {
            error::TeardownPartialFailureSnafu { failed }.fail()
        }
    }

    async fn create(
        &self,
        object: &DynamicObject,
        reference: ObjectRef,
        readiness: Option<ReadinessCheck>,
    ) -> Result<Arc<ManagedResource>> {
        info!("Creating {}", reference);
        let created = self
            .cluster
            .create(object)
            .await
            .context(error::ClientSnafu {
                action: format!("create {}", reference),
            })?;
        // The server may fill in the namespace.
        let reference = ObjectRef::from_object(&created).unwrap_or(reference);
        let resource = Arc::new(ManagedResource::new(
            reference,
            Arc::clone(&self.cluster),
            readiness,
        ));
        self.push(resource.clone()).await;
        Ok(resource)
    }

    async fn push(&self, tracked: Arc<dyn Tracked>) {
        debug!("Tracking {}", tracked.reference());
        self.stack.lock().await.push(tracked);
    }

    async fn find(&self, reference: &ObjectRef) -> Option<Arc<dyn Tracked>> {
        self.stack
            .lock()
            .await
            .iter()
            .rev()
            .find(|entry| entry.reference() == reference)
            .cloned()
    }

    /// Delete `tracked` and wait for it to disappear. Transient failures of the delete call are
    /// retried; the delete and the wait share the delete timeout.
    async fn remove(&self, tracked: &dyn Tracked) -> Result<()> {
        let reference = tracked.reference();
        let requested = &AtomicBool::new(false);
        let description = format!("deletion of {}", reference);
        let description = description.as_str();
        wait_until(description, &self.delete_wait_spec, || async move {
            if !requested.load(Ordering::SeqCst) {
                match observe(tracked.delete().await, description)? {
                    None => return Ok(ReadinessState::NotYetReady),
                    Some(false) => {
                        debug!("{} was already gone", reference);
                        return Ok(ReadinessState::Ready);
                    }
                    Some(true) => requested.store(true, Ordering::SeqCst),
                }
            }
            Ok(match observe(tracked.fetch().await, description)? {
                Some(None) => ReadinessState::Ready,
                _ => ReadinessState::NotYetReady,
            })
        })
        .await
    }
}

fn reference_of(object: &DynamicObject) -> Result<ObjectRef> {
    ObjectRef::from_object(object).context(error::InvalidObjectSnafu {
        what: object.metadata.name.clone().unwrap_or_default(),
        reason: "an object needs an apiVersion, a kind and a name to be tracked",
    })
}

fn to_dynamic<K>(resource: &K) -> Result<DynamicObject>
where
    K: kube::Resource<DynamicType = ()> + Serialize,
{
    serde_json::to_value(resource)
        .and_then(serde_json::from_value)
        .map_err(|e| error::Error::InvalidObject {
            what: K::kind(&()).to_string(),
            reason: e.to_string(),
        })
}

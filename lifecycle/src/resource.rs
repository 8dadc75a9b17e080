use crate::clients::{self, AllowNotFound, ClusterClient};
use crate::readiness::ReadinessCheck;
use crate::{ObjectRef, ReadinessState};
use kube::api::DynamicObject;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// The capabilities the teardown stack needs from anything it tracks. Cluster objects are tracked
/// as [`ManagedResource`]s; callers can track other things, e.g. a server created through an HTTP
/// API, by implementing this trait.
#[async_trait::async_trait]
pub trait Tracked: Send + Sync {
    fn reference(&self) -> &ObjectRef;

    /// The current state of the object, `None` once it no longer exists.
    async fn fetch(&self) -> clients::Result<Option<DynamicObject>>;

    /// Request deletion. Returns `false` if the object was already gone.
    async fn delete(&self) -> clients::Result<bool>;

    fn check_ready(&self, object: &DynamicObject) -> ReadinessState;
}

/// A cluster object created through the [`ResourceManager`](crate::ResourceManager).
#[derive(Clone)]
pub struct ManagedResource {
    reference: ObjectRef,
    cluster: Arc<dyn ClusterClient>,
    readiness: Option<ReadinessCheck>,
}

impl ManagedResource {
    pub(crate) fn new(
        reference: ObjectRef,
        cluster: Arc<dyn ClusterClient>,
        readiness: Option<ReadinessCheck>,
    ) -> Self {
        Self {
            reference,
            cluster,
            readiness,
        }
    }
}

impl Debug for ManagedResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedResource")
            .field("reference", &self.reference)
            .field("waited", &self.readiness.is_some())
            .finish()
    }
}

#[async_trait::async_trait]
impl Tracked for ManagedResource {
    fn reference(&self) -> &ObjectRef {
        &self.reference
    }

    async fn fetch(&self) -> clients::Result<Option<DynamicObject>> {
        self.cluster
            .get(&self.reference)
            .await
            .allow_not_found(|_| ())
    }

    async fn delete(&self) -> clients::Result<bool> {
        Ok(self
            .cluster
            .delete(&self.reference)
            .await
            .allow_not_found(|_| ())?
            .is_some())
    }

    /// Objects created without a wait have no predicate and count as ready once they exist.
    fn check_ready(&self, object: &DynamicObject) -> ReadinessState {
        match &self.readiness {
            Some(check) => check(object),
            None => ReadinessState::Ready,
        }
    }
}

/*!

The collaborators the lifecycle manager drives. The manager only ever talks to the cluster through
these traits, which makes it possible to test every wait and teardown path without Kubernetes.
[`KubeCluster`] implements all of them on top of a `kube::Client`.

!*/

mod error;
mod http_status_code;
mod kube_cluster;

pub use error::{Error, Result};
pub use http_status_code::{AllowNotFound, HttpStatusCode, StatusCode};
pub use kube_cluster::KubeCluster;

use crate::ObjectRef;
use chrono::{DateTime, Utc};
use kube::api::{ApiResource, DynamicObject};
use serde_json::Value;

/// Polling access to cluster objects of any kind.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get an object. A missing object is an error with `StatusCode::NOT_FOUND`.
    async fn get(&self, target: &ObjectRef) -> Result<DynamicObject>;

    /// List objects of one type. `namespace: None` lists across the cluster.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object. The object must carry its type information and a name.
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject>;

    /// Request deletion of an object. A missing object is an error with `StatusCode::NOT_FOUND`.
    async fn delete(&self, target: &ObjectRef) -> Result<()>;

    /// Apply a JSON merge patch.
    async fn patch_merge(&self, target: &ObjectRef, patch: Value) -> Result<DynamicObject>;
}

/// Retrieval of workload logs.
#[async_trait::async_trait]
pub trait LogClient: Send + Sync {
    /// The combined log of every pod belonging to the deployment, optionally limited to lines
    /// written at or after `since`.
    async fn deployment_logs(
        &self,
        namespace: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<String>;
}

/// Access to operator install plans.
#[async_trait::async_trait]
pub trait ApprovalClient: Send + Sync {
    /// The name of an install plan in `namespace` that installs `csv` and has not been approved.
    async fn pending_install_plan(&self, namespace: &str, csv: &str) -> Result<Option<String>>;

    /// Approve the install plan named `name`.
    async fn approve_install_plan(&self, namespace: &str, name: &str) -> Result<()>;
}

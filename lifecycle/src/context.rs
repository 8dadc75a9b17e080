use crate::clients::{ApprovalClient, ClusterClient, KubeCluster, LogClient};
use crate::error::{self, Result};
use crate::Settings;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use snafu::ResultExt;
use std::path::Path;
use std::sync::Arc;

/// The collaborators and settings of one test run. Every component is constructed from a
/// `Context`, there is no process-wide client.
#[derive(Clone)]
pub struct Context {
    cluster: Arc<dyn ClusterClient>,
    logs: Arc<dyn LogClient>,
    approvals: Arc<dyn ApprovalClient>,
    settings: Settings,
}

impl Context {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        logs: Arc<dyn LogClient>,
        approvals: Arc<dyn ApprovalClient>,
        settings: Settings,
    ) -> Self {
        Self {
            cluster,
            logs,
            approvals,
            settings,
        }
    }

    /// A `Context` whose collaborators all talk to the cluster behind `k8s_client`.
    pub fn new_from_k8s_client(k8s_client: Client, settings: Settings) -> Self {
        let cluster = Arc::new(KubeCluster::new_from_k8s_client(k8s_client));
        Self::new(cluster.clone(), cluster.clone(), cluster, settings)
    }

    /// Create a `Context` from the path to a kubeconfig file.
    pub async fn new_from_kubeconfig_path(kubeconfig_path: &Path, settings: Settings) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path).context(error::KubeconfigSnafu)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(error::KubeconfigSnafu)?;
        let k8s_client = Client::try_from(config).context(error::KubeClientSnafu)?;
        Ok(Self::new_from_k8s_client(k8s_client, settings))
    }

    /// Create a `Context` from the kubeconfig named in `settings`, or from the default `kube::Client`
    /// when none is named.
    pub async fn new_from_settings(settings: Settings) -> Result<Self> {
        match settings.kubeconfig.clone() {
            Some(path) => Self::new_from_kubeconfig_path(&path, settings).await,
            None => {
                let k8s_client = Client::try_default()
                    .await
                    .context(error::KubeClientSnafu)?;
                Ok(Self::new_from_k8s_client(k8s_client, settings))
            }
        }
    }

    pub fn cluster(&self) -> Arc<dyn ClusterClient> {
        Arc::clone(&self.cluster)
    }

    pub fn logs(&self) -> Arc<dyn LogClient> {
        Arc::clone(&self.logs)
    }

    pub fn approvals(&self) -> Arc<dyn ApprovalClient> {
        Arc::clone(&self.approvals)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

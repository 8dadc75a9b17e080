/*!

Drives an operator upgrade through an OLM install plan: approve the pending plan, wait for the
operator deployment to roll out, confirm that dependent workloads stay stable and check the
operator's log for errors written since the approval.

!*/

use crate::clients::ApprovalClient;
use crate::constants::DEFAULT_STABILITY_WINDOW;
use crate::error::{self, Result};
use crate::logs::{LogCursor, LogScanner};
use crate::registry::ResourceManager;
use crate::rollout::{RolloutDetector, Snapshot};
use crate::stability::{PodSelector, StabilityWindow};
use crate::wait::{observe, retry_transient, wait_until};
use crate::{Context, ObjectRef, ReadinessState, WaitSpec};
use k8s_openapi::api::apps::v1::Deployment;
use log::{error, info};
use snafu::OptionExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Pods that must stay stable after the operator has rolled out.
#[derive(Debug, Clone)]
pub struct StabilityTarget {
    pub selector: PodSelector,
    pub min_ready: usize,
}

/// One upgrade of an operator to `target_csv`.
#[derive(Debug, Clone)]
pub struct UpgradeCycle {
    pub namespace: String,
    /// The deployment running the operator.
    pub operator_deployment: String,
    /// The cluster service version the pending install plan installs.
    pub target_csv: String,
    pub dependents: Vec<StabilityTarget>,
    pub observation_window: Duration,
}

impl UpgradeCycle {
    pub fn new<S1, S2, S3>(namespace: S1, operator_deployment: S2, target_csv: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            operator_deployment: operator_deployment.into(),
            target_csv: target_csv.into(),
            dependents: Vec::new(),
            observation_window: DEFAULT_STABILITY_WINDOW,
        }
    }

    pub fn with_dependent(mut self, selector: PodSelector, min_ready: usize) -> Self {
        self.dependents.push(StabilityTarget {
            selector,
            min_ready,
        });
        self
    }

    pub fn with_observation_window(self, observation_window: Duration) -> Self {
        Self {
            observation_window,
            ..self
        }
    }

    fn operator(&self) -> ObjectRef {
        ObjectRef::of::<Deployment, _>(Some(self.namespace.as_str()), &self.operator_deployment)
    }
}

/// What a successful cycle observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub install_plan: String,
    pub baseline: Snapshot,
    pub settled: Snapshot,
}

pub struct UpgradeOrchestrator {
    manager: Arc<ResourceManager>,
    approvals: Arc<dyn ApprovalClient>,
    rollout: RolloutDetector,
    stability: StabilityWindow,
    logs: LogScanner,
    wait_spec: WaitSpec,
}

impl UpgradeOrchestrator {
    /// An orchestrator that tears down the resources tracked by `manager` after each cycle.
    pub fn new(context: &Context, manager: Arc<ResourceManager>) -> Result<Self> {
        Ok(Self {
            approvals: context.approvals(),
            rollout: RolloutDetector::new(context, manager.predicates().clone()),
            stability: StabilityWindow::new(context),
            logs: LogScanner::new(context)?,
            wait_spec: *manager.wait_spec(),
            manager,
        })
    }

    pub fn with_log_scanner(self, logs: LogScanner) -> Self {
        Self { logs, ..self }
    }

    /// Wait until an unapproved install plan for `csv` shows up and return its name.
    pub async fn wait_for_install_plan(&self, namespace: &str, csv: &str) -> Result<String> {
        let found = &Mutex::new(None);
        let description = format!("a pending install plan for '{}' in '{}'", csv, namespace);
        let description = description.as_str();
        wait_until(description, &self.wait_spec, || async move {
            match observe(
                self.approvals.pending_install_plan(namespace, csv).await,
                description,
            )? {
                Some(Some(plan)) => {
                    *found.lock().await = Some(plan);
                    Ok(ReadinessState::Ready)
                }
                _ => Ok(ReadinessState::NotYetReady),
            }
        })
        .await?;

        let plan = found.lock().await.take();
        plan.context(error::NotFoundSnafu { what: description })
    }

    /// Approve the install plan that installs the first version of an operator and wait for its
    /// deployment to become ready.
    pub async fn approve_starting_version(
        &self,
        namespace: &str,
        csv: &str,
        deployment: &str,
    ) -> Result<String> {
        let plan = self.wait_for_install_plan(namespace, csv).await?;
        self.approve(namespace, &plan).await?;
        self.manager
            .wait_until_ready(
                &ObjectRef::of::<Deployment, _>(Some(namespace), deployment),
                &self.wait_spec,
            )
            .await?;
        Ok(plan)
    }

    /// Run one upgrade cycle. The first failing step ends the cycle.
    pub async fn run_cycle(&self, cycle: &UpgradeCycle) -> Result<UpgradeReport> {
        let operator = cycle.operator();
        info!("Upgrading {} to '{}'", operator, cycle.target_csv);
        let baseline = self.rollout.capture_baseline(&operator).await?;

        let install_plan = self
            .wait_for_install_plan(&cycle.namespace, &cycle.target_csv)
            .await?;
        let cursor = LogCursor::mark();
        self.approve(&cycle.namespace, &install_plan).await?;

        let settled = self
            .rollout
            .await_rollout(&operator, &baseline, self.wait_spec.timeout())
            .await?;
        for dependent in &cycle.dependents {
            self.stability
                .verify_stable(
                    &dependent.selector,
                    dependent.min_ready,
                    cycle.observation_window,
                )
                .await?;
        }
        self.logs
            .check_no_errors_since(&cycle.namespace, &cycle.operator_deployment, cursor)
            .await?;

        info!("Upgrade of {} to '{}' succeeded", operator, cycle.target_csv);
        Ok(UpgradeReport {
            install_plan,
            baseline,
            settled,
        })
    }

    /// Run one upgrade cycle, then tear down everything the manager tracks whatever the outcome.
    /// When both fail the cycle's error is returned and the teardown error is logged.
    pub async fn run(&self, cycle: &UpgradeCycle) -> Result<UpgradeReport> {
        let outcome = self.run_cycle(cycle).await;
        let teardown = self.manager.teardown_all().await;
        match (outcome, teardown) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(teardown_error)) => Err(teardown_error),
            (Err(cycle_error), Ok(())) => Err(cycle_error),
            (Err(cycle_error), Err(teardown_error)) => {
                error!("Teardown after a failed upgrade also failed: {}", teardown_error);
                Err(cycle_error)
            }
        }
    }

    async fn approve(&self, namespace: &str, install_plan: &str) -> Result<()> {
        info!("Approving install plan '{}/{}'", namespace, install_plan);
        let description = format!("approval of install plan '{}/{}'", namespace, install_plan);
        retry_transient(&description, &self.wait_spec, || {
            self.approvals.approve_install_plan(namespace, install_plan)
        })
        .await
    }
}

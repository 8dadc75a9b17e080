/*!

`lifecycle` creates Kubernetes and OpenShift resources for end-to-end operator tests, waits for them
to become ready, and removes them again in reverse creation order. On top of these primitives it
detects completed rollouts, confirms that pods stay stable and drives operator upgrades through
OLM install plans.

All cluster access goes through the traits in [`clients`], bundled per test run in a [`Context`].

```no_run
# async fn doc() -> lifecycle::Result<()> {
use lifecycle::{Context, ResourceManager, Settings};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;

let context = Context::new_from_settings(Settings::from_env()?).await?;
let manager = ResourceManager::new(&context);
manager
    .create_typed_and_track(&Namespace {
        metadata: ObjectMeta {
            name: Some("lifecycle-demo".to_string()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    })
    .await?;
// ...
manager.teardown_all().await?;
# Ok(())
# }
```

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use context::Context;
pub use error::{Error, Result, TeardownFailure};
pub use logs::{LogCursor, LogErrorPatterns, LogScanner};
pub use object_ref::ObjectRef;
pub use readiness::{PredicateRegistry, ReadinessCheck};
pub use registry::ResourceManager;
pub use resource::{ManagedResource, Tracked};
pub use rollout::{RolloutDetector, Snapshot};
pub use settings::Settings;
pub use stability::{PodSelector, StabilityWindow};
pub use upgrade::{StabilityTarget, UpgradeCycle, UpgradeOrchestrator, UpgradeReport};
pub use wait::{observe, wait_until, ReadinessState, WaitSpec};

pub mod clients;
pub mod constants;
mod context;
mod error;
mod logs;
mod object_ref;
pub mod readiness;
mod registry;
mod resource;
mod rollout;
pub mod selector;
mod settings;
mod stability;
mod upgrade;
mod wait;

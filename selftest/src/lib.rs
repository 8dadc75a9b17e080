/*!

Provides utilities for testing the lifecycle manager against a real, disposable `kind` cluster.
The tests that use it are gated behind the `integ` feature of the `lifecycle` crate.

!*/

pub mod cluster;
mod test_settings;

pub use cluster::Cluster;

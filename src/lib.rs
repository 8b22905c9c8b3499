//! Convergence checks for bidirectional MySQL-protocol replication.
//!
//! `replcheck` drives write workloads against one or two endpoints and polls an
//! equality [`oracle`] until their visible data agrees. The scenarios in
//! [`scenario`] compose the building blocks:
//!
//! - [`coordinator`]: auto-increment increment/offset setup
//! - [`load`]: fill a table over a shared atomic countdown
//! - [`mixer`]: random upsert/update/delete within a key space
//! - [`race`]: writers racing a schema change
//! - [`poller`]: wait for the oracle to report equality

pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod fixture;
pub mod load;
pub mod memory;
pub mod mixer;
pub mod mysql;
pub mod oracle;
pub mod poller;
pub mod race;
pub mod scenario;
pub mod settings;
pub mod trace;
mod workers;

pub use replcheck_macros::test;

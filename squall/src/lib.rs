//! Squall engine: fault injection and convergence validation for a
//! distributed storage cluster under test.
//!
//! The engine deploys workloads through injected collaborator drivers,
//! injects controlled failures (drive loss, network degradation, storage
//! driver stop/crash), and asserts that the cluster and its workloads
//! return to a healthy, consistent state within bounded time.

#![forbid(unsafe_code)]

pub mod fault;
pub mod scenario;
pub mod validate;

//! The `thingnode-os` library crate runs `thingnode` firmware on an
//! operating system.
//!
//! It implements every service required by the synchronization engine on
//! top of the host:
//!
//! - A settings region backed by a file
//! - A broker client built on `rumqttc`
//! - An `HTTP` surface built on `axum`
//! - An `mDNS-SD` discovery service
//!
//! The engine itself is single-threaded, so the runner drives it from the
//! task calling [`runner::run`], while the network services run as `tokio`
//! tasks and exchange data with it through channels.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The broker client.
pub mod broker;
/// The discovery service.
pub mod discovery;
/// Error management.
pub mod error;
/// The host network link.
pub mod link;
/// Clock and power management.
pub mod platform;
/// The engine driver and the host configuration.
pub mod runner;
/// The file-backed settings region.
pub mod storage;
/// The `HTTP` server.
pub mod web;

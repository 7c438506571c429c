//! `thingnode` is the core of a firmware framework for small networked
//! sensor and actuator devices.
//!
//! A device declares a set of typed, named properties (power state,
//! brightness, temperature, mode, color, ...) which are, at the same time:
//!
//! - Retained across power cycles in a tiny fixed-size non-volatile region
//! - Exposed through a REST-like `HTTP` surface and a structured JSON
//!   description
//! - Kept in sync with a message-broker topic convention so that remote
//!   clients can read and write them
//!
//! The crate keeps a single piece of mutable state consistent across its
//! three representations: the in-memory value, the persisted bytes and the
//! wire-format JSON.
//!
//! Everything tied to a concrete board or operating system, such as the
//! wireless link, the broker client, the `HTTP` server or the non-volatile
//! region, is reached through the traits of the [`network::services`] and
//! [`settings`] modules. The synchronization engine is driven by a single
//! cooperative [`network::Network::tick`] call, so it never needs threads
//! nor global state.
//!
//! This crate is `no_std` and only requires an allocator.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Devices, the named groups of properties.
pub mod device;
/// Error management.
pub mod error;
pub mod json;
/// The network synchronization engine.
pub mod network;
/// Observable, typed properties.
pub mod property;
/// Persistent settings store.
pub mod settings;
/// Typed values held by properties.
pub mod value;

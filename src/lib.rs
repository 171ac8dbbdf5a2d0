//! In-memory network device and service state manager
//!
//! Tracks network devices (radios, modems) and services (connections) as
//! reported by a lower-level network stack, drives the connection state
//! machine, derives unique identities for correlation, and guarantees
//! erasure of per-service secrets. The transport that feeds it property
//! updates, the certificate store and the enrollment flow are collaborators
//! behind traits; see [`manager::stub`] for in-process stand-ins.

pub mod manager;

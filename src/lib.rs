//! # Integration Adapter Runtime
//!
//! Hosts provider adapters that expose third-party REST APIs as named
//! operations behind one execution contract. Adapters are built from
//! configuration records by templates, tracked by a loader and looked up
//! through a capability-typed factory.

pub mod adapters;
pub mod config;
pub mod context;
pub mod error;
pub mod params;
pub mod permissions;
pub mod repositories;
pub mod resilience;
pub mod services;
pub mod telemetry;
pub mod transport;

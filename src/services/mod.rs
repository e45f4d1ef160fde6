//! Application services composed from the adapter machinery and the repositories.

pub mod adapter_service;
pub mod loader_service;

pub use adapter_service::{AdapterService, ProviderView, ServiceError};
pub use loader_service::{LoadError, LoadReport, LoaderService};

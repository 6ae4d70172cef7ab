//! vaultgate server: authorized request dispatch over a bounded worker pool,
//! with in-memory reference policy and storage backends and an HTTP front end.

pub mod logging;
pub mod network;
pub mod policy;
pub mod service;
pub mod storage;

pub use policy::MemoryPolicyGate;
pub use service::{Manager, ServerConfig};
pub use storage::MemoryResourceProvider;

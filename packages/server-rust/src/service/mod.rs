//! Request dispatch engine.
//!
//! 1. **Submission** (`manager`): callers enqueue a [`WorkerRequest`] and get a
//!    [`ResponseHandle`] back without blocking.
//! 2. **Dispatch** (`dispatcher`): pairs each pending request with an idle worker.
//! 3. **Execution** (`worker`, `routes`): authorize against the gate, then run
//!    the route's handler against the resource provider.
//! 4. **Delivery** (`rendezvous`): the response goes to the waiting caller, or
//!    is discarded if the caller gave up.

pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod operation;
pub mod rendezvous;
pub mod routes;
pub mod shutdown;
pub mod worker;

pub use config::{ConfigError, ServerConfig};
pub use manager::{Manager, ShutdownReport};
pub use operation::{
    CallError, OperationResponse, OperationResult, ResponseStatus, SubmitError, WorkerRequest,
};
pub use rendezvous::{Delivery, ResponseHandle};
pub use routes::{Route, RouteTable, Target};
pub use shutdown::{HealthState, ShutdownController, ShutdownSignal};

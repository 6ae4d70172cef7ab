//! `vaultgate` core: operation kinds, payloads, object paths and the capability traits
//! the gateway dispatches through.

pub mod context;
pub mod traits;
pub mod types;

pub use context::{is_plain_name, RequestContext};
pub use traits::{AuthorizationGate, ResourceProvider};
pub use types::{
    actions, Access, FileHandle, OperationKind, OperationPayload, UploadedFile, WriteMode,
};

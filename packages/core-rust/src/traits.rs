use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{FileHandle, WriteMode};

/// Pluggable policy store deciding whether a subject may act on an object.
///
/// Shared by every worker, so implementations must tolerate concurrent calls.
/// Callers treat an `Err` from [`check`](Self::check) as a denial.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    /// Returns whether `subject` acting within `tenant` may perform `action` on `object`.
    async fn check(
        &self,
        subject: &str,
        tenant: &str,
        object: &str,
        action: &str,
    ) -> anyhow::Result<bool>;

    /// Grants `action` on objects matching `object` to `subject` within `tenant`.
    /// Returns `false` if the rule already existed.
    async fn add_policy(
        &self,
        subject: &str,
        tenant: &str,
        object: &str,
        action: &str,
    ) -> anyhow::Result<bool>;

    /// Revokes a rule added by [`add_policy`](Self::add_policy).
    /// Returns `false` if no such rule existed.
    async fn remove_policy(
        &self,
        subject: &str,
        tenant: &str,
        object: &str,
        action: &str,
    ) -> anyhow::Result<bool>;

    /// Assigns `role` to `user` within `tenant`.
    async fn add_grouping_policy(&self, user: &str, role: &str, tenant: &str)
        -> anyhow::Result<bool>;

    /// Removes a role assignment.
    async fn remove_grouping_policy(
        &self,
        user: &str,
        role: &str,
        tenant: &str,
    ) -> anyhow::Result<bool>;

    /// Flushes the current rule set to durable storage.
    async fn persist(&self) -> anyhow::Result<()>;
}

/// Object-path addressed storage backend the gateway executes operations against.
///
/// Must tolerate concurrent calls on different paths. Behaviour under
/// concurrent access to the same path is the implementation's own contract.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Create a directory. Succeeds if it already exists.
    async fn create_directory(&self, path: &str, mode: WriteMode) -> anyhow::Result<()>;

    /// Create an empty file and open it for writing.
    async fn create_file(&self, path: &str, mode: WriteMode) -> anyhow::Result<FileHandle>;

    /// Open an existing file.
    async fn open_file(&self, path: &str) -> anyhow::Result<FileHandle>;

    /// Read the full content of an open file.
    async fn read(&self, handle: FileHandle) -> anyhow::Result<Bytes>;

    /// Append `content` to an open file. Returns the number of bytes written.
    async fn write(&self, handle: FileHandle, content: Bytes) -> anyhow::Result<usize>;

    /// Release an open handle.
    async fn close(&self, handle: FileHandle) -> anyhow::Result<()>;

    /// Delete a file, or a directory together with everything below it.
    async fn delete(&self, path: &str) -> anyhow::Result<()>;

    /// Move an object to a new path.
    async fn rename(&self, from: &str, to: &str) -> anyhow::Result<()>;
}

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Tag identifying which gateway operation a request performs.
///
/// The set is closed: new operations are added as new variants and a
/// matching route in the server's route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Provision a user: home directory plus an owner policy.
    CreateUser,
    /// Remove a user's home directory and owner policy.
    DeleteUser,
    /// Create an empty file and return its open handle.
    CreateFile,
    /// Write content through an open handle.
    WriteContent,
    /// Open an existing file and return its handle.
    OpenFile,
    /// Read the content behind an open handle.
    ReadContent,
    /// Close an open handle.
    CloseFile,
    /// Delete a file.
    DeleteFile,
    /// Rename a file within the caller's home directory.
    RenameFile,
    /// Store a batch of uploaded files in the caller's home directory.
    UploadFile,
    /// Open, read fully, and close a file in one step.
    ReadFile,
}

impl OperationKind {
    /// Every operation kind, in declaration order.
    pub const ALL: [OperationKind; 11] = [
        OperationKind::CreateUser,
        OperationKind::DeleteUser,
        OperationKind::CreateFile,
        OperationKind::WriteContent,
        OperationKind::OpenFile,
        OperationKind::ReadContent,
        OperationKind::CloseFile,
        OperationKind::DeleteFile,
        OperationKind::RenameFile,
        OperationKind::UploadFile,
        OperationKind::ReadFile,
    ];

    /// Stable name used in logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateUser => "create_user",
            Self::DeleteUser => "delete_user",
            Self::CreateFile => "create_file",
            Self::WriteContent => "write_content",
            Self::OpenFile => "open_file",
            Self::ReadContent => "read_content",
            Self::CloseFile => "close_file",
            Self::DeleteFile => "delete_file",
            Self::RenameFile => "rename_file",
            Self::UploadFile => "upload_file",
            Self::ReadFile => "read_file",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action a policy must grant before an operation may touch the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The `read` action on the target object.
    Read,
    /// The `write` action on the target object.
    Write,
    /// Either `read` or `write` on the target object.
    ReadOrWrite,
    /// User provisioning. Not checked against the gate; only reachable
    /// through the internal route group.
    Provision,
}

impl Access {
    /// Policy actions that satisfy this access level, tried in order.
    #[must_use]
    pub fn actions(self) -> &'static [&'static str] {
        match self {
            Self::Read => &[actions::READ],
            Self::Write => &[actions::WRITE],
            Self::ReadOrWrite => &[actions::READ, actions::WRITE],
            Self::Provision => &[],
        }
    }
}

/// Policy action names understood by the authorization gate.
pub mod actions {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    /// Wildcard granted to owners of a home directory.
    pub const ANY: &str = "*";
}

/// Opaque handle to a file opened or created through a resource provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle(pub u64);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistence mode requested when creating an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteMode {
    /// Keep in the cache tier only.
    #[default]
    MustCache,
    /// Write to the cache and synchronously through to the backing store.
    CacheThrough,
    /// Bypass the cache and write straight to the backing store.
    Through,
}

/// One file carried by an upload request. Content is arbitrary bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub content: Bytes,
}

/// Operation-specific fields submitted with a request.
///
/// A single record shape serves every kind; each operation reads only the
/// fields it needs and rejects the request when a required one is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPayload {
    /// The acting user.
    pub subject: String,
    /// Tenant (policy domain) the subject acts within.
    pub tenant: String,
    pub file_name: Option<String>,
    pub new_name: Option<String>,
    pub handle: Option<FileHandle>,
    pub content: Option<String>,
    /// Capacity hint such as `1G` or `512M`. Informational only.
    pub size: Option<String>,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

impl OperationPayload {
    /// Creates a payload carrying only the subject and tenant.
    #[must_use]
    pub fn new(subject: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_new_name(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }

    #[must_use]
    pub fn with_handle(mut self, handle: FileHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_upload(mut self, name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.files.push(UploadedFile {
            name: name.into(),
            content: content.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_unique() {
        let mut names: Vec<_> = OperationKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OperationKind::ALL.len());
    }

    #[test]
    fn close_accepts_read_or_write() {
        assert_eq!(Access::ReadOrWrite.actions(), &["read", "write"]);
        assert!(Access::Provision.actions().is_empty());
    }

    #[test]
    fn payload_deserializes_without_optional_fields() {
        let payload: OperationPayload =
            serde_json::from_str(r#"{"subject":"alice","tenant":"acme"}"#).unwrap();
        assert_eq!(payload, OperationPayload::new("alice", "acme"));
        assert!(payload.files.is_empty());
    }

    #[test]
    fn builder_collects_uploads() {
        let payload = OperationPayload::new("alice", "acme")
            .with_upload("a.txt", "1")
            .with_upload("b.txt", "2");
        assert_eq!(payload.files.len(), 2);
        assert_eq!(payload.files[1].name, "b.txt");
    }

    #[test]
    fn upload_content_is_raw_bytes() {
        let payload = OperationPayload::new("alice", "acme").with_upload("blob", vec![0xff, 0x00, 0xfe]);
        assert_eq!(&payload.files[0].content[..], &[0xff, 0x00, 0xfe]);

        // JSON clients may still send text content.
        let file: UploadedFile =
            serde_json::from_str(r#"{"name":"a.txt","content":"abc"}"#).unwrap();
        assert_eq!(&file.content[..], b"abc");
    }
}

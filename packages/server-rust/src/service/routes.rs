//! Static routing table: operation kind -> required access, target object, handler.
//!
//! The worker never branches on the kind itself. It looks up the kind's
//! [`Route`], authorizes the route's target object for the route's access
//! level, and runs the route's handler. Adding an operation is a new table
//! entry, not a new control-flow arm. A kind with no registered route is
//! answered with `Unmatched` without touching the gate or the provider.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, ensure, Context as _};
use bytes::Bytes;
use vaultgate_core::{
    actions, is_plain_name, Access, AuthorizationGate, FileHandle, OperationKind,
    OperationPayload, RequestContext, ResourceProvider, WriteMode,
};

use super::operation::OperationResult;

// ---------------------------------------------------------------------------
// Route types
// ---------------------------------------------------------------------------

/// Future returned by a route handler.
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<OperationResult>> + Send + 'a>>;

/// Executes one operation against the provider (and, for provisioning, the gate).
pub type Handler = for<'a> fn(Invocation<'a>) -> HandlerFuture<'a>;

/// Which object a request is authorized against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The subject's home directory.
    Home,
    /// The directory uploads are written into. Every uploaded file name is
    /// checked while resolving.
    UploadDir,
    /// The file named by the payload's `file_name`.
    File,
    /// The file named by the payload's `new_name`.
    NewFile,
}

impl Target {
    /// Derives the object path for this target.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload lacks a field the target needs, or if
    /// a name in it is not a single path segment.
    pub fn resolve(self, ctx: &RequestContext, payload: &OperationPayload) -> anyhow::Result<String> {
        match self {
            Self::Home => Ok(ctx.home_dir()),
            Self::UploadDir => {
                for file in &payload.files {
                    entry_name(Some(file.name.as_str()), "files.name")?;
                }
                Ok(ctx.upload_dir())
            }
            Self::File => Ok(ctx.object(entry_name(payload.file_name.as_deref(), "file_name")?)),
            Self::NewFile => Ok(ctx.object(entry_name(payload.new_name.as_deref(), "new_name")?)),
        }
    }
}

/// One row of the routing table.
///
/// `target`, and `destination` when set, are both authorized for `access`
/// before the handler runs.
#[derive(Clone, Copy)]
pub struct Route {
    pub kind: OperationKind,
    pub access: Access,
    pub target: Target,
    pub destination: Option<Target>,
    pub handler: Handler,
}

impl Route {
    #[must_use]
    pub const fn new(kind: OperationKind, access: Access, target: Target, handler: Handler) -> Self {
        Self {
            kind,
            access,
            target,
            destination: None,
            handler,
        }
    }

    /// Adds a second object the request writes to, such as a rename target.
    #[must_use]
    pub const fn with_destination(mut self, destination: Target) -> Self {
        self.destination = Some(destination);
        self
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("kind", &self.kind)
            .field("access", &self.access)
            .field("target", &self.target)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Everything a handler may use while executing one request.
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    pub ctx: &'a RequestContext,
    pub payload: &'a OperationPayload,
    /// The authorized object path, resolved from the route's [`Target`].
    pub object: &'a str,
    /// The authorized destination path, for routes that declare one.
    pub destination: Option<&'a str>,
    pub gate: &'a dyn AuthorizationGate,
    pub provider: &'a dyn ResourceProvider,
}

/// The gateway's operations.
pub const STANDARD_ROUTES: [Route; 11] = [
    Route::new(OperationKind::CreateUser, Access::Provision, Target::Home, create_user),
    Route::new(OperationKind::DeleteUser, Access::Provision, Target::Home, delete_user),
    Route::new(OperationKind::CreateFile, Access::Write, Target::File, create_file),
    Route::new(OperationKind::WriteContent, Access::Write, Target::File, write_content),
    Route::new(OperationKind::OpenFile, Access::Read, Target::File, open_file),
    Route::new(OperationKind::ReadContent, Access::Read, Target::File, read_content),
    Route::new(OperationKind::CloseFile, Access::ReadOrWrite, Target::File, close_file),
    Route::new(OperationKind::DeleteFile, Access::Write, Target::File, delete_file),
    Route::new(OperationKind::RenameFile, Access::Write, Target::File, rename_file)
        .with_destination(Target::NewFile),
    Route::new(OperationKind::UploadFile, Access::Write, Target::UploadDir, upload_file),
    Route::new(OperationKind::ReadFile, Access::Read, Target::File, read_file),
];

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

/// Lookup table from operation kind to [`Route`].
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<OperationKind, Route>,
}

impl RouteTable {
    /// Creates an empty table. Every kind is unmatched until registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table holding [`STANDARD_ROUTES`].
    #[must_use]
    pub fn standard() -> Self {
        let mut table = Self::new();
        for route in STANDARD_ROUTES {
            table.register(route);
        }
        table
    }

    /// Registers `route`, replacing any existing route for its kind.
    pub fn register(&mut self, route: Route) {
        self.routes.insert(route.kind, route);
    }

    #[must_use]
    pub fn get(&self, kind: OperationKind) -> Option<&Route> {
        self.routes.get(&kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn required<'a, T: ?Sized>(value: Option<&'a T>, field: &str) -> anyhow::Result<&'a T> {
    value.ok_or_else(|| anyhow!("missing required field `{field}`"))
}

fn entry_name<'a>(value: Option<&'a str>, field: &str) -> anyhow::Result<&'a str> {
    let name = required(value, field)?;
    ensure!(
        is_plain_name(name),
        "`{field}` must be a single path segment, got `{name}`"
    );
    Ok(name)
}

fn handle(payload: &OperationPayload) -> anyhow::Result<FileHandle> {
    payload
        .handle
        .ok_or_else(|| anyhow!("missing required field `token_id`"))
}

fn create_user(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let ctx = inv.ctx;
        let tenant_dir = ctx.tenant_dir();
        let home = ctx.home_dir();

        inv.provider
            .create_directory(&tenant_dir, WriteMode::CacheThrough)
            .await
            .with_context(|| format!("create directory {tenant_dir}"))?;
        inv.provider
            .create_directory(&home, WriteMode::CacheThrough)
            .await
            .with_context(|| format!("create directory {home}"))?;

        inv.gate
            .add_policy(&ctx.subject, &ctx.tenant, &ctx.home_pattern(), actions::ANY)
            .await
            .context("add owner policy")?;
        inv.gate
            .add_grouping_policy(&ctx.subject, &ctx.subject, &ctx.tenant)
            .await
            .context("add owner role")?;
        inv.gate.persist().await.context("persist policy")?;

        Ok(OperationResult::None)
    })
}

fn delete_user(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let ctx = inv.ctx;
        inv.provider
            .delete(inv.object)
            .await
            .with_context(|| format!("delete {}", inv.object))?;

        inv.gate
            .remove_policy(&ctx.subject, &ctx.tenant, &ctx.home_pattern(), actions::ANY)
            .await
            .context("remove owner policy")?;
        inv.gate
            .remove_grouping_policy(&ctx.subject, &ctx.subject, &ctx.tenant)
            .await
            .context("remove owner role")?;
        inv.gate.persist().await.context("persist policy")?;

        Ok(OperationResult::None)
    })
}

fn create_file(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let handle = inv
            .provider
            .create_file(inv.object, WriteMode::CacheThrough)
            .await
            .with_context(|| format!("create {}", inv.object))?;
        Ok(OperationResult::Handle(handle))
    })
}

fn open_file(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let handle = inv
            .provider
            .open_file(inv.object)
            .await
            .with_context(|| format!("open {}", inv.object))?;
        Ok(OperationResult::Handle(handle))
    })
}

fn read_content(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let handle = handle(inv.payload)?;
        let content = inv
            .provider
            .read(handle)
            .await
            .with_context(|| format!("read handle {handle}"))?;
        Ok(OperationResult::Content(content))
    })
}

fn write_content(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let handle = handle(inv.payload)?;
        let content = required(inv.payload.content.as_deref(), "content")?;
        let written = inv
            .provider
            .write(handle, Bytes::copy_from_slice(content.as_bytes()))
            .await
            .with_context(|| format!("write handle {handle}"))?;
        Ok(OperationResult::Written(written))
    })
}

fn close_file(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let handle = handle(inv.payload)?;
        inv.provider
            .close(handle)
            .await
            .with_context(|| format!("close handle {handle}"))?;
        Ok(OperationResult::None)
    })
}

fn delete_file(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        inv.provider
            .delete(inv.object)
            .await
            .with_context(|| format!("delete {}", inv.object))?;
        Ok(OperationResult::None)
    })
}

fn rename_file(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let destination = required(inv.destination, "new_name")?;
        inv.provider
            .rename(inv.object, destination)
            .await
            .with_context(|| format!("rename {} to {destination}", inv.object))?;
        Ok(OperationResult::None)
    })
}

fn upload_file(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let mut total = 0;
        for file in &inv.payload.files {
            let name = entry_name(Some(file.name.as_str()), "files.name")?;
            let path = format!("{}{name}", inv.object);
            let handle = inv
                .provider
                .create_file(&path, WriteMode::CacheThrough)
                .await
                .with_context(|| format!("create {path}"))?;

            let written = inv
                .provider
                .write(handle, file.content.clone())
                .await
                .with_context(|| format!("write {path}"));
            // Release the handle whether or not the write went through.
            let closed = inv.provider.close(handle).await;

            total += written?;
            closed.with_context(|| format!("close {path}"))?;
        }
        Ok(OperationResult::Written(total))
    })
}

fn read_file(inv: Invocation<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let handle = inv
            .provider
            .open_file(inv.object)
            .await
            .with_context(|| format!("open {}", inv.object))?;
        let content = inv
            .provider
            .read(handle)
            .await
            .with_context(|| format!("read {}", inv.object));
        let closed = inv.provider.close(handle).await;

        let content = content?;
        closed.with_context(|| format!("close {}", inv.object))?;
        Ok(OperationResult::Content(content))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_every_kind() {
        let table = RouteTable::standard();
        assert_eq!(table.len(), OperationKind::ALL.len());
        for kind in OperationKind::ALL {
            let route = table.get(kind).expect("route registered");
            assert_eq!(route.kind, kind);
        }
    }

    #[test]
    fn empty_table_matches_nothing() {
        let table = RouteTable::new();
        assert!(table.is_empty());
        assert!(table.get(OperationKind::OpenFile).is_none());
    }

    #[test]
    fn mutating_kinds_require_write() {
        let table = RouteTable::standard();
        for kind in [
            OperationKind::CreateFile,
            OperationKind::WriteContent,
            OperationKind::DeleteFile,
            OperationKind::RenameFile,
            OperationKind::UploadFile,
        ] {
            assert_eq!(table.get(kind).unwrap().access, Access::Write, "{kind}");
        }
        assert_eq!(
            table.get(OperationKind::CloseFile).unwrap().access,
            Access::ReadOrWrite
        );
    }

    #[test]
    fn file_target_requires_file_name() {
        let ctx = RequestContext::new("c", "alice", "acme");
        let payload = OperationPayload::new("alice", "acme");
        let err = Target::File.resolve(&ctx, &payload).unwrap_err();
        assert_eq!(err.to_string(), "missing required field `file_name`");

        let payload = payload.with_file("a.txt");
        assert_eq!(Target::File.resolve(&ctx, &payload).unwrap(), "/acme/alice/a.txt");
    }

    #[test]
    fn names_that_leave_the_directory_are_rejected() {
        let ctx = RequestContext::new("c", "alice", "acme");
        for name in ["../bob/secret.txt", "..", ".", "a/b", ""] {
            let payload = OperationPayload::new("alice", "acme").with_file(name);
            let err = Target::File.resolve(&ctx, &payload).unwrap_err();
            assert!(err.to_string().contains("single path segment"), "{name:?}: {err}");
        }

        let payload = OperationPayload::new("alice", "acme")
            .with_file("a.txt")
            .with_new_name("../../other/b.txt");
        assert!(Target::File.resolve(&ctx, &payload).is_ok());
        assert!(Target::NewFile.resolve(&ctx, &payload).is_err());

        let payload = OperationPayload::new("alice", "acme")
            .with_upload("ok.txt", "x")
            .with_upload("../bob/evil.txt", "y");
        assert!(Target::UploadDir.resolve(&ctx, &payload).is_err());
    }

    #[test]
    fn rename_declares_its_destination() {
        let table = RouteTable::standard();
        let rename = table.get(OperationKind::RenameFile).unwrap();
        assert_eq!(rename.destination, Some(Target::NewFile));

        let ctx = RequestContext::new("c", "alice", "acme");
        let payload = OperationPayload::new("alice", "acme").with_new_name("b.txt");
        assert_eq!(Target::NewFile.resolve(&ctx, &payload).unwrap(), "/acme/alice/b.txt");

        for kind in OperationKind::ALL {
            if kind != OperationKind::RenameFile {
                assert!(table.get(kind).unwrap().destination.is_none(), "{kind}");
            }
        }
    }

    #[test]
    fn home_target_for_tenant_account() {
        let ctx = RequestContext::new("c", "acme", "acme");
        let payload = OperationPayload::new("acme", "acme");
        assert_eq!(Target::Home.resolve(&ctx, &payload).unwrap(), "/acme/");
        assert_eq!(Target::UploadDir.resolve(&ctx, &payload).unwrap(), "/acme/acme/");
    }
}

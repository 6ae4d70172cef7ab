//! Operation endpoints: decode the web request, submit it to the manager,
//! and map the worker's response onto the JSON envelope.
//!
//! Every endpoint takes a JSON body. `upload-file` also takes a
//! `multipart/form-data` form with `user`, `domain`, an optional `guid`, and
//! one `upload` part per file.

use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, MethodRouter};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use vaultgate_core::{FileHandle, OperationKind, OperationPayload, UploadedFile};

use super::{err_code, AppState, BaseResponse};
use crate::service::{CallError, OperationResponse, OperationResult, ResponseStatus};

/// Internal provisioning endpoints, mounted at the root.
const INTERNAL_ROUTES: [(&str, OperationKind); 4] = [
    ("/create-user", OperationKind::CreateUser),
    ("/delete-user", OperationKind::DeleteUser),
    ("/allocate-res", OperationKind::CreateUser),
    ("/free-res", OperationKind::DeleteUser),
];

/// External file endpoints, mounted under `/auth`.
const EXTERNAL_ROUTES: [(&str, OperationKind); 9] = [
    ("/create-file", OperationKind::CreateFile),
    ("/write-content", OperationKind::WriteContent),
    ("/open-file", OperationKind::OpenFile),
    ("/read-content", OperationKind::ReadContent),
    ("/close-file", OperationKind::CloseFile),
    ("/delete-file", OperationKind::DeleteFile),
    ("/rename-file", OperationKind::RenameFile),
    ("/upload-file", OperationKind::UploadFile),
    ("/read-file", OperationKind::ReadFile),
];

/// Router with every operation endpoint.
pub fn operation_routes() -> Router<AppState> {
    let internal = INTERNAL_ROUTES
        .into_iter()
        .fold(Router::new(), |router, (path, kind)| router.route(path, submit_route(kind)));
    let external = EXTERNAL_ROUTES
        .into_iter()
        .fold(Router::new(), |router, (path, kind)| {
            let method = if kind == OperationKind::UploadFile {
                upload_route()
            } else {
                submit_route(kind)
            };
            router.route(path, method)
        });

    internal.nest("/auth", external)
}

fn submit_route(kind: OperationKind) -> MethodRouter<AppState> {
    post(move |State(state): State<AppState>, body: Bytes| async move {
        handle_operation(&state, kind, &body).await
    })
}

fn upload_route() -> MethodRouter<AppState> {
    const KIND: OperationKind = OperationKind::UploadFile;

    post(|State(state): State<AppState>, request: Request| async move {
        let is_form = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if !is_form {
            return match Bytes::from_request(request, &state).await {
                Ok(body) => handle_operation(&state, KIND, &body).await,
                Err(rejection) => rejection.into_response(),
            };
        }

        let form = match Multipart::from_request(request, &state).await {
            Ok(form) => form,
            Err(rejection) => {
                let reason = format!("multipart err: {}", rejection.body_text());
                return rejected(KIND, "", BaseResponse::bad_body(reason));
            }
        };
        match read_upload_form(form).await {
            Ok(request) => serve(&state, KIND, request).await,
            Err(err) => rejected(KIND, "", BaseResponse::bad_body(format!("multipart err: {err}"))),
        }
    })
}

/// Collects an upload form into a [`WebRequest`], generating a guid if the
/// form carries none.
async fn read_upload_form(mut form: Multipart) -> Result<WebRequest, MultipartError> {
    let mut request = WebRequest::default();

    while let Some(field) = form.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("upload") => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                let content = field.bytes().await?;
                request.files.push(UploadedFile {
                    name: file_name,
                    content,
                });
            }
            Some("guid") => request.guid = field.text().await?,
            Some("user") => request.user = field.text().await?,
            Some("domain") => request.domain = field.text().await?,
            _ => {}
        }
    }

    if request.guid.is_empty() {
        request.guid = Uuid::new_v4().to_string();
    }
    Ok(request)
}

/// Body of every operation request. Fields a kind does not use may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebRequest {
    pub guid: String,
    pub user: String,
    pub domain: String,
    pub file_name: String,
    pub new_name: String,
    /// Open file handle, as issued by `create-file` or `open-file`.
    pub token_id: String,
    pub content: String,
    pub size: String,
    pub files: Vec<UploadedFile>,
}

impl WebRequest {
    fn check(&self) -> Result<(), &'static str> {
        if self.guid.is_empty() {
            return Err("GUID not set");
        }
        if self.user.is_empty() {
            return Err("User not set");
        }
        if self.domain.is_empty() {
            return Err("Domain not set");
        }
        Ok(())
    }

    fn into_payload(self) -> Result<OperationPayload, String> {
        let handle = if self.token_id.is_empty() {
            None
        } else {
            let id = self
                .token_id
                .parse()
                .map_err(|_| format!("invalid token_id `{}`", self.token_id))?;
            Some(FileHandle(id))
        };

        Ok(OperationPayload {
            subject: self.user,
            tenant: self.domain,
            file_name: non_empty(self.file_name),
            new_name: non_empty(self.new_name),
            handle,
            content: non_empty(self.content),
            size: non_empty(self.size),
            files: self.files,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Body of every operation response.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WebResponse {
    pub guid: String,
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

impl WebResponse {
    fn new(guid: &str, base: BaseResponse) -> Self {
        Self {
            guid: guid.to_string(),
            base,
            ..Self::default()
        }
    }
}

/// Code and info reported when `kind` fails in its handler.
///
/// Kinds without a dedicated code report `GENERAL`, whose info is the
/// failure itself.
fn failure_code(kind: OperationKind) -> (i32, Option<&'static str>) {
    let (code, info) = match kind {
        OperationKind::CreateUser => (err_code::CREATE_USER_FAIL, "ErrInfoCreateUserFail"),
        OperationKind::DeleteUser => (err_code::DELETE_USER_FAIL, "ErrInfoDeleteUserFail"),
        OperationKind::CreateFile | OperationKind::UploadFile => {
            (err_code::CREATE_FILE_FAIL, "ErrInfoCreateFail")
        }
        OperationKind::WriteContent => (err_code::WRITE_FAIL, "ErrInfoWriteFail"),
        OperationKind::OpenFile => (err_code::OPEN_FAIL, "ErrInfoOpenFail"),
        OperationKind::ReadContent | OperationKind::ReadFile => {
            (err_code::READ_FAIL, "ErrInfoReadFail")
        }
        OperationKind::DeleteFile => (err_code::DELETE_FILE_FAIL, "ErrInfoDeleteFileFail"),
        OperationKind::RenameFile => (err_code::RENAME_FILE_FAIL, "ErrInfoRenameFileFail"),
        OperationKind::CloseFile => return (err_code::GENERAL, None),
    };
    (code, Some(info))
}

/// HTTP status and envelope for a response produced by the engine.
fn envelope(kind: OperationKind, resp: &OperationResponse) -> (StatusCode, BaseResponse) {
    match resp.status {
        ResponseStatus::Ok => (StatusCode::OK, BaseResponse::ok()),
        ResponseStatus::Denied => (
            StatusCode::OK,
            BaseResponse::error(err_code::DENIED, "ErrInfoUserDeny", resp.detail.clone()),
        ),
        ResponseStatus::ExecutionFailed => {
            let (code, info) = failure_code(kind);
            let info = info.map_or_else(|| resp.detail.clone(), str::to_owned);
            (
                StatusCode::OK,
                BaseResponse::error(code, info, format!("Err: {}", resp.detail)),
            )
        }
        ResponseStatus::Unmatched => (
            StatusCode::OK,
            BaseResponse::error(err_code::GENERAL, "the Method is not matched", resp.detail.clone()),
        ),
        ResponseStatus::Timeout => (
            StatusCode::INTERNAL_SERVER_ERROR,
            BaseResponse::error(err_code::TIMEOUT, "Timeout", resp.detail.clone()),
        ),
    }
}

fn call_failure(err: &CallError) -> (StatusCode, BaseResponse) {
    let info = match err {
        CallError::Submit(submit) => submit.as_str(),
        CallError::Abandoned { .. } => "shutting_down",
    };
    (
        StatusCode::SERVICE_UNAVAILABLE,
        BaseResponse::error(err_code::GENERAL, info, err.to_string()),
    )
}

async fn handle_operation(state: &AppState, kind: OperationKind, body: &[u8]) -> Response {
    let request: WebRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return rejected(kind, "", BaseResponse::bad_body(format!("Unmarshal err: {err}"))),
    };
    serve(state, kind, request).await
}

/// Validates a decoded request, runs it through the manager, and renders the reply.
async fn serve(state: &AppState, kind: OperationKind, request: WebRequest) -> Response {
    if let Err(reason) = request.check() {
        let guid = request.guid.clone();
        return rejected(kind, &guid, BaseResponse::bad_body(format!("preprocess err: {reason}")));
    }

    let guid = request.guid.clone();
    let payload = match request.into_payload() {
        Ok(payload) => payload,
        Err(reason) => {
            return rejected(kind, &guid, BaseResponse::bad_body(format!("preprocess err: {reason}")))
        }
    };
    info!(%guid, %kind, subject = %payload.subject, tenant = %payload.tenant, "request received");

    let timeout = state.manager.config().request_timeout();
    let outcome = state.manager.call(kind, payload, timeout).await;

    let (status, base, result) = match outcome {
        Ok(resp) => {
            let (status, base) = envelope(kind, &resp);
            (status, base, resp.result)
        }
        Err(err) => {
            warn!(%guid, %kind, error = %err, "request not served");
            let (status, base) = call_failure(&err);
            (status, base, OperationResult::None)
        }
    };
    info!(%guid, %kind, http_status = status.as_u16(), err_code = base.err_code, "request answered");

    if kind == OperationKind::ReadFile {
        return raw_content(status, base.err_code, result);
    }

    let mut response = WebResponse::new(&guid, base);
    match result {
        OperationResult::Handle(handle) => response.token_id = handle.to_string(),
        OperationResult::Content(content) => {
            response.content = String::from_utf8_lossy(&content).into_owned();
        }
        OperationResult::Written(_) | OperationResult::None => {}
    }
    (status, Json(response)).into_response()
}

fn rejected(kind: OperationKind, guid: &str, base: BaseResponse) -> Response {
    warn!(%guid, %kind, reason = %base.more_info, "request rejected");
    if kind == OperationKind::ReadFile {
        return raw_content(StatusCode::BAD_REQUEST, base.err_code, OperationResult::None);
    }
    (StatusCode::BAD_REQUEST, Json(WebResponse::new(guid, base))).into_response()
}

/// `read-file` answers with the object's bytes, or an empty body on failure.
fn raw_content(status: StatusCode, code: i32, result: OperationResult) -> Response {
    let body = match result {
        OperationResult::Content(content) if code == err_code::OK => Body::from(content),
        _ => Body::empty(),
    };
    let status = match code {
        err_code::OK | err_code::BAD_BODY | err_code::TIMEOUT => status,
        err_code::DENIED => StatusCode::FORBIDDEN,
        _ if status == StatusCode::OK => StatusCode::NOT_FOUND,
        _ => status,
    };
    (
        status,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_request_maps_onto_payload() {
        let request: WebRequest = serde_json::from_str(
            r#"{"guid":"g1","user":"alice","domain":"acme","file_name":"a.txt","token_id":"42"}"#,
        )
        .unwrap();
        request.check().unwrap();

        let payload = request.into_payload().unwrap();
        assert_eq!(payload.subject, "alice");
        assert_eq!(payload.tenant, "acme");
        assert_eq!(payload.file_name.as_deref(), Some("a.txt"));
        assert_eq!(payload.handle, Some(FileHandle(42)));
        assert!(payload.new_name.is_none());
    }

    #[test]
    fn missing_identity_fields_fail_check() {
        let request: WebRequest = serde_json::from_str(r#"{"guid":"g1","user":"alice"}"#).unwrap();
        assert_eq!(request.check(), Err("Domain not set"));

        let request = WebRequest::default();
        assert_eq!(request.check(), Err("GUID not set"));
    }

    #[test]
    fn non_numeric_token_is_rejected() {
        let request = WebRequest {
            token_id: "abc".into(),
            ..WebRequest::default()
        };
        assert_eq!(request.into_payload().unwrap_err(), "invalid token_id `abc`");
    }

    #[test]
    fn denied_maps_to_user_deny_code() {
        let resp = OperationResponse::denied("c", "alice may not write /acme/alice/x");
        let (status, base) = envelope(OperationKind::DeleteFile, &resp);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(base.err_code, err_code::DENIED);
        assert_eq!(base.more_info, "alice may not write /acme/alice/x");
    }

    #[test]
    fn failures_use_kind_specific_codes() {
        let resp = OperationResponse::execution_failed("c", "boom");
        let (_, base) = envelope(OperationKind::RenameFile, &resp);
        assert_eq!(base.err_code, err_code::RENAME_FILE_FAIL);
        assert_eq!(base.more_info, "Err: boom");

        let (_, base) = envelope(OperationKind::CreateUser, &resp);
        assert_eq!(base.err_code, err_code::CREATE_USER_FAIL);
    }

    #[test]
    fn close_failure_reports_general_code_with_cause() {
        let resp = OperationResponse::execution_failed("c", "close handle 9: unknown handle 9");
        let (status, base) = envelope(OperationKind::CloseFile, &resp);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(base.err_code, err_code::GENERAL);
        assert_eq!(base.err_info, "close handle 9: unknown handle 9");
        assert_eq!(base.more_info, "Err: close handle 9: unknown handle 9");
    }

    #[test]
    fn timeout_is_a_server_error() {
        let resp = OperationResponse::timeout("c", 10);
        let (status, base) = envelope(OperationKind::OpenFile, &resp);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(base.err_code, err_code::TIMEOUT);
    }

    #[test]
    fn response_omits_empty_handle_and_content() {
        let json = serde_json::to_value(WebResponse::new("g1", BaseResponse::ok())).unwrap();
        assert_eq!(json["guid"], "g1");
        assert_eq!(json["err_code"], 0);
        assert_eq!(json["err_info"], "RESULT_OK");
        assert!(json.get("token_id").is_none());
        assert!(json.get("content").is_none());
    }
}

use crate::types::OperationPayload;

/// Per-request identity and tenancy, plus the object paths derived from them.
///
/// Every object the gateway touches lives under `/{tenant}/`. A user's home
/// directory is `/{tenant}/{subject}/`, except for the tenant's own account
/// (subject equal to tenant), whose home is the tenant root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Correlation identifier for tracing; never used for routing.
    pub correlation_id: String,
    pub subject: String,
    pub tenant: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            subject: subject.into(),
            tenant: tenant.into(),
        }
    }

    /// Builds a context from the identity fields of a payload.
    #[must_use]
    pub fn from_payload(correlation_id: impl Into<String>, payload: &OperationPayload) -> Self {
        Self::new(correlation_id, payload.subject.clone(), payload.tenant.clone())
    }

    /// The tenant root directory, `/{tenant}/`.
    #[must_use]
    pub fn tenant_dir(&self) -> String {
        format!("/{}/", self.tenant)
    }

    /// The subject's home directory.
    #[must_use]
    pub fn home_dir(&self) -> String {
        if self.subject == self.tenant {
            self.tenant_dir()
        } else {
            format!("/{}/{}/", self.tenant, self.subject)
        }
    }

    /// Directory that receives uploaded files, `/{tenant}/{subject}/`.
    #[must_use]
    pub fn upload_dir(&self) -> String {
        format!("/{}/{}/", self.tenant, self.subject)
    }

    /// Path of a named file in the subject's directory.
    #[must_use]
    pub fn object(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.upload_dir())
    }

    /// Policy object pattern granting access to everything under the home directory.
    #[must_use]
    pub fn home_pattern(&self) -> String {
        format!("{}*", self.home_dir())
    }
}

/// Whether `name` names an entry directly inside a directory.
///
/// Rejects the empty string, `.`, `..`, and anything containing `/`, so a
/// name appended to a directory path can never leave that directory.
#[must_use]
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

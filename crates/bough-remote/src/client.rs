//! Authenticated requests on top of an [`HttpTransport`].

use crate::credential::{Credential, CredentialHelper};
use crate::http::{BasicAuth, HttpRequest, HttpResponse, HttpTransport};
use crate::{RemoteError, Result};
use tracing::{debug, info, warn};

/// An HTTP transport plus the credential state of one session.
///
/// A `401` triggers one retry after filling credentials. The credential
/// is approved after its first success and rejected when it is refused.
#[derive(Debug)]
pub struct HttpClient<T> {
    transport: T,
    credential: Credential,
    helper: Option<CredentialHelper>,
    approved: bool,
}

impl<T: HttpTransport> HttpClient<T> {
    /// Wraps `transport`; `credential` usually comes from the remote URL.
    pub fn new(transport: T, credential: Credential, helper: Option<CredentialHelper>) -> Self {
        Self {
            transport,
            credential,
            helper,
            approved: false,
        }
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The credential in use.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    fn execute(&mut self, mut request: HttpRequest) -> Result<HttpResponse> {
        if let Some(username) = &self.credential.username {
            request.auth = Some(BasicAuth {
                username: username.clone(),
                password: self.credential.password.clone(),
            });
        }
        self.transport.execute(request)
    }

    fn auth_failed(&mut self, url: &str) -> RemoteError {
        if let Some(helper) = &self.helper {
            if let Err(e) = helper.reject(&self.credential) {
                warn!(error = %e, "credential reject failed");
            }
        }
        RemoteError::AuthFailed {
            url: url.to_string(),
        }
    }

    /// Sends `request`, retrying once with fresh credentials on `401`.
    ///
    /// Any other status is returned to the caller to classify.
    pub fn send(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let retry = request.try_clone();
        let mut response = self.execute(request)?;

        if response.status == 401 {
            let Some(retry) = retry else {
                return Err(self.auth_failed(&url));
            };
            if self.credential.is_complete() || self.helper.is_none() {
                return Err(self.auth_failed(&url));
            }
            info!(host = %self.credential.host, "server requested authentication");
            if let Some(helper) = &self.helper {
                helper.fill(&mut self.credential)?;
            }
            response = self.execute(retry)?;
            if response.status == 401 {
                return Err(self.auth_failed(&url));
            }
        }

        if response.is_success() && self.credential.is_complete() && !self.approved {
            if let Some(helper) = &self.helper {
                helper.approve(&self.credential)?;
            }
            self.approved = true;
        }
        debug!(url = %url, status = response.status, "request finished");
        Ok(response)
    }
}

//! HTTP transport.
//!
//! The helper talks HTTP through the [`HttpTransport`] trait so the
//! protocol code can be driven by [`ScriptedTransport`] without a network.
//! [`ReqwestTransport`] is the real client.

use crate::config::RemoteConfig;
use crate::{RemoteError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// Request body.
pub enum Body {
    /// No body.
    Empty,
    /// A buffered body sent with a known length.
    Bytes(Vec<u8>),
    /// A body of unknown length, sent with chunked encoding.
    Stream(Box<dyn Read + Send>),
}

impl Body {
    /// Returns a copy of the body if it can be sent again.
    pub fn try_clone(&self) -> Option<Body> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Bytes(bytes) => Some(Self::Bytes(bytes.clone())),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Username and optional password for basic authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name.
    pub username: String,
    /// Password, if any.
    pub password: Option<String>,
}

/// An HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Extra headers in order.
    pub headers: Vec<(String, String)>,
    /// Body.
    pub body: Body,
    /// Credentials to send.
    pub auth: Option<BasicAuth>,
}

impl HttpRequest {
    /// A `GET` of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Empty,
            auth: None,
        }
    }

    /// A `POST` of `body` to `url`.
    pub fn post(url: impl Into<String>, body: Body) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
            auth: None,
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the first header called `name`, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Copies the request for a retry; fails for streamed bodies.
    pub fn try_clone(&self) -> Option<HttpRequest> {
        Some(HttpRequest {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            auth: self.auth.clone(),
        })
    }
}

/// An HTTP response with a streaming body.
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `Content-Type` header, if sent.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reads the whole body.
    pub fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// The body when the server sent `text/plain`; other bodies are not
    /// meant for people.
    pub fn plain_text_message(self) -> Option<String> {
        let is_plain = self
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|ct| ct.trim().eq_ignore_ascii_case("text/plain"));
        if !is_plain {
            return None;
        }
        let body = self.bytes().ok()?;
        let text = String::from_utf8_lossy(&body).trim_end().to_string();
        (!text.is_empty()).then_some(text)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Performs HTTP requests.
pub trait HttpTransport {
    /// Sends `request` and returns the response, whatever its status.
    /// `Err` means no response was received.
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Box<T> {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).execute(request)
    }
}

/// Blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Builds a client from the helper configuration.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .gzip(true);
        builder = if config.timeout_secs > 0 {
            builder.timeout(Duration::from_secs(config.timeout_secs))
        } else {
            builder.timeout(None)
        };
        let client = builder.build().map_err(|e| RemoteError::Transport {
            url: String::new(),
            reason: e.to_string(),
        })?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, url = %request.url, body = ?request.body, "http request");
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = &request.auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_ref());
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes),
            Body::Stream(reader) => builder.body(reqwest::blocking::Body::new(reader)),
        };

        let response = builder.send().map_err(|e| RemoteError::Transport {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        trace!(status, ?content_type, "http response");
        Ok(HttpResponse {
            status,
            content_type,
            body: Box::new(response),
        })
    }
}

/// A request as seen by [`ScriptedTransport`], with the body read out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Method.
    pub method: Method,
    /// URL.
    pub url: String,
    /// Headers in order.
    pub headers: Vec<(String, String)>,
    /// Body bytes; streamed bodies are drained.
    pub body: Vec<u8>,
    /// The body was streamed.
    pub streamed: bool,
    /// Credentials sent.
    pub auth: Option<BasicAuth>,
}

impl RecordedRequest {
    /// Value of the first header called `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A canned response for [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    /// Status code.
    pub status: u16,
    /// `Content-Type`.
    pub content_type: Option<String>,
    /// Body.
    pub body: Vec<u8>,
}

impl ScriptedResponse {
    /// A response with the given status, content type and body.
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// `200 OK` with `content_type`.
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, Some(content_type), body)
    }

    /// A bare status with an empty body.
    pub fn status(status: u16) -> Self {
        Self::new(status, None, Vec::new())
    }
}

/// An in-memory transport that answers requests from a queue and records
/// what it was sent.
///
/// Clones share the same queue and log, so a test can keep a handle while
/// the helper owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedTransport {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next response.
    pub fn respond(&self, response: ScriptedResponse) -> &Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Number of queued responses not yet used.
    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }
}

impl HttpTransport for ScriptedTransport {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let (body, streamed) = match request.body {
            Body::Empty => (Vec::new(), false),
            Body::Bytes(bytes) => (bytes, false),
            Body::Stream(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                (buf, true)
            }
        };
        self.requests.lock().push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers,
            body,
            streamed,
            auth: request.auth,
        });

        let response = self
            .responses
            .lock()
            .pop_front()
            .ok_or_else(|| RemoteError::Transport {
                url: request.url,
                reason: "no scripted response left".to_string(),
            })?;
        Ok(HttpResponse {
            status: response.status,
            content_type: response.content_type,
            body: Box::new(Cursor::new(response.body)),
        })
    }
}

//! Ref discovery over HTTP.
//!
//! A smart server answers `GET info/refs?service=<svc>` with
//! `application/x-<svc>-advertisement`: a `# service=<svc>` pkt-line, a
//! flush, then an ordinary ref advertisement. Anything else is read as a
//! dumb `info/refs` file, with `HEAD` fetched separately.

use crate::client::HttpClient;
use crate::http::{HttpRequest, HttpTransport};
use crate::{RemoteError, Result};
use bough_git::{chomp, parse_dumb, parse_smart, Capabilities, PktLineReader, Ref, RefList};
use bough_storage::ObjectId;
use std::io::Cursor;
use tracing::{debug, info};

/// Appends the trailing `/` the other URL helpers expect.
pub fn normalize_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// The `info/refs` URL for `service`.
pub fn refs_url(base: &str, service: &str, smart: bool) -> String {
    let mut url = format!("{base}info/refs");
    if smart {
        url.push(if base.contains('?') { '&' } else { '?' });
        url.push_str("service=");
        url.push_str(service);
    }
    url
}

/// Result of one discovery.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Service the refs were requested for.
    pub service: String,
    /// Advertised refs.
    pub refs: RefList,
    /// Server capabilities (smart servers only).
    pub capabilities: Capabilities,
    /// The advertisement as sent, minus the smart service header; the RPC
    /// child reads it as if it had connected itself.
    pub buf: Vec<u8>,
    /// The server speaks the smart protocol.
    pub proto_git: bool,
}

fn mime_type(content_type: Option<&str>) -> Option<&str> {
    content_type.and_then(|ct| ct.split(';').next()).map(str::trim)
}

fn parse_smart_response(service: &str, body: Vec<u8>) -> Result<Discovery> {
    let mut reader = PktLineReader::new(Cursor::new(body));

    let first = reader.read_packet()?;
    let line = first.data().map(chomp).unwrap_or_default();
    if line != format!("# service={service}").as_bytes() {
        return Err(RemoteError::InvalidResponse(format!(
            "got '{}'",
            String::from_utf8_lossy(line)
        )));
    }
    // Servers may send more header lines before the flush.
    while reader.read_line()?.is_some() {}

    let mut cursor = reader.into_inner();
    let start = cursor.position() as usize;
    let buf = cursor.get_mut().split_off(start);

    let adv = parse_smart(&mut PktLineReader::new(buf.as_slice()))?;
    Ok(Discovery {
        service: service.to_string(),
        refs: adv.refs,
        capabilities: adv.capabilities,
        buf,
        proto_git: true,
    })
}

/// Parses the contents of a `HEAD` file into a ref, resolving a symbolic
/// `HEAD` against `refs`. Returns `None` when it points nowhere known.
pub fn parse_head(content: &[u8], refs: &RefList) -> Option<Ref> {
    let text = std::str::from_utf8(content).ok()?.trim_end();
    if let Some(target) = text.strip_prefix("ref: ") {
        let target = target.trim();
        let i = refs.find(target)?;
        let mut head = Ref::new("HEAD", refs[i].old_id);
        head.symref = Some(target.to_string());
        return Some(head);
    }
    if text.len() == ObjectId::HEX_LEN {
        return ObjectId::from_hex(text).ok().map(|id| Ref::new("HEAD", id));
    }
    None
}

/// The discovery of the current session, replaced when a different
/// service is asked for.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    last: Option<Discovery>,
}

impl DiscoveryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached discovery, if any.
    pub fn current(&self) -> Option<&Discovery> {
        self.last.as_ref()
    }

    /// Drops the cached discovery.
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    /// Returns the refs for `service`, fetching them unless the cached
    /// discovery is for the same service.
    pub fn discover<T: HttpTransport>(
        &mut self,
        client: &mut HttpClient<T>,
        base: &str,
        service: &str,
        smart: bool,
    ) -> Result<&Discovery> {
        if self.last.as_ref().is_some_and(|d| d.service != service) {
            self.invalidate();
        }
        if self.last.is_none() {
            self.last = Some(fetch_refs(client, base, service, smart)?);
        }
        self.last
            .as_ref()
            .ok_or_else(|| RemoteError::Protocol("discovery cache is empty".to_string()))
    }
}

fn fetch_refs<T: HttpTransport>(
    client: &mut HttpClient<T>,
    base: &str,
    service: &str,
    smart: bool,
) -> Result<Discovery> {
    let url = refs_url(base, service, smart);
    info!(%url, "discovering refs");
    let response = client.send(HttpRequest::get(&url).header("Pragma", "no-cache"))?;

    match response.status {
        200..=299 => {}
        404 => {
            return Err(RemoteError::NotFound {
                url: base.to_string(),
            })
        }
        status => {
            return Err(RemoteError::Access {
                url: base.to_string(),
                status,
                message: response.plain_text_message(),
            })
        }
    }

    let expected = format!("application/x-{service}-advertisement");
    let is_smart = smart && mime_type(response.content_type.as_deref()) == Some(expected.as_str());
    let body = response.bytes()?;

    if is_smart {
        let discovery = parse_smart_response(service, body)?;
        debug!(refs = discovery.refs.len(), "smart discovery");
        return Ok(discovery);
    }

    let refs = parse_dumb(&body)?;
    let refs = match fetch_head(client, base, &refs) {
        Some(head) => std::iter::once(head).chain(refs).collect(),
        None => refs,
    };
    debug!(refs = refs.len(), "dumb discovery");
    Ok(Discovery {
        service: service.to_string(),
        refs,
        capabilities: Capabilities::default(),
        buf: body,
        proto_git: false,
    })
}

fn fetch_head<T: HttpTransport>(
    client: &mut HttpClient<T>,
    base: &str,
    refs: &RefList,
) -> Option<Ref> {
    let response = client.send(HttpRequest::get(format!("{base}HEAD"))).ok()?;
    if !response.is_success() {
        debug!(status = response.status, "no HEAD on dumb server");
        return None;
    }
    let content = response.bytes().ok()?;
    parse_head(&content, refs)
}

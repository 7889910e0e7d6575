//! Stateless RPC over HTTP.
//!
//! A `fetch-pack` or `send-pack` child runs in stateless mode. It reads the
//! ref advertisement from its stdin as if it had connected to the server,
//! then writes each request as pkt-lines whose payloads are the request
//! bytes, ending with a flush. Every request becomes one POST and its
//! response is fed back to the child. An empty request ends the exchange;
//! whatever the child prints afterwards is the result.

use crate::client::HttpClient;
use crate::config::RemoteConfig;
use crate::http::{Body, HttpRequest, HttpResponse, HttpTransport};
use crate::options::Options;
use crate::{RemoteError, Result};
use bough_git::{CommandBuilder, GitError, PktLine, PktLineReader, PktLineWriter, StdioMode, LARGE_PACKET_MAX};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type SharedReader<R> = Arc<Mutex<PktLineReader<R>>>;

fn hung_up() -> RemoteError {
    GitError::Protocol("the remote end hung up unexpectedly".to_string()).into()
}

/// Fixed parameters of one RPC exchange.
#[derive(Debug, Clone)]
pub struct RpcState {
    /// `git-upload-pack` or `git-receive-pack`.
    pub service: String,
    /// Repository URL with trailing `/`.
    pub url: String,
    /// Largest request sent in one buffered POST.
    pub post_buffer: usize,
    /// Compress buffered requests above `gzip_threshold`.
    pub gzip_request: bool,
    /// Compression threshold in bytes.
    pub gzip_threshold: usize,
}

impl RpcState {
    /// State for `service` at `url`, sized from `config`.
    pub fn new(service: &str, url: &str, config: &RemoteConfig) -> Self {
        Self {
            service: service.to_string(),
            url: url.to_string(),
            post_buffer: config.post_buffer,
            gzip_request: false,
            gzip_threshold: config.gzip_threshold,
        }
    }

    fn service_url(&self) -> String {
        format!("{}{}", self.url, self.service)
    }

    fn post(&self, body: Body) -> HttpRequest {
        HttpRequest::post(self.service_url(), body)
            .header("Content-Type", format!("application/x-{}-request", self.service))
            .header("Accept", format!("application/x-{}-result", self.service))
    }

    fn check(&self, response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }
        Err(RemoteError::Rpc {
            status: response.status,
            message: response.plain_text_message(),
        })
    }

    /// Sends a flush-only request so authentication happens before a body
    /// that cannot be replayed.
    fn probe<T: HttpTransport>(&self, client: &mut HttpClient<T>) -> Result<()> {
        debug!(service = %self.service, "probing before large request");
        let response = client.send(self.post(Body::Bytes(b"0000".to_vec())))?;
        self.check(response)?.bytes().map(drop)
    }

    /// Sends one request whose first payload is `first`; the rest is read
    /// from `reader` up to the terminating flush.
    ///
    /// A request that fits in `post_buffer` is sent in one buffered POST,
    /// gzip-compressed when enabled and larger than `gzip_threshold`.
    /// Anything bigger is preceded by a probe and streamed.
    pub fn post_rpc<T, R>(
        &self,
        client: &mut HttpClient<T>,
        reader: &SharedReader<R>,
        first: Vec<u8>,
    ) -> Result<HttpResponse>
    where
        T: HttpTransport,
        R: Read + Send + 'static,
    {
        let mut buf = first;
        let mut large_request = false;
        loop {
            if self.post_buffer.saturating_sub(buf.len()) < LARGE_PACKET_MAX {
                large_request = true;
                break;
            }
            match reader.lock().read()? {
                Some(PktLine::Data(data)) => buf.extend_from_slice(&data),
                Some(PktLine::Flush) => break,
                Some(other) => {
                    return Err(GitError::Protocol(format!("unexpected packet {other:?}")).into())
                }
                None => return Err(hung_up()),
            }
        }

        if large_request {
            self.probe(client)?;
            info!(service = %self.service, buffered = buf.len(), "streaming large request");
            let body = RequestStream {
                prefix: Cursor::new(buf),
                reader: Arc::clone(reader),
                pending: Vec::new(),
                pos: 0,
                done: false,
            };
            let response = client.send(self.post(Body::Stream(Box::new(body))))?;
            return self.check(response);
        }

        let request = if self.gzip_request && buf.len() > self.gzip_threshold {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&buf)?;
            let gzipped = encoder.finish()?;
            debug!(raw = buf.len(), gzipped = gzipped.len(), "compressed request");
            self.post(Body::Bytes(gzipped)).header("Content-Encoding", "gzip")
        } else {
            self.post(Body::Bytes(buf))
        };
        let response = client.send(request)?;
        self.check(response)
    }

    /// Runs `command` as the stateless child and relays its requests.
    ///
    /// The child first receives `preamble` and `advertisement` on stdin.
    /// Returns what the child printed after its last request.
    pub fn run<T: HttpTransport>(
        &self,
        client: &mut HttpClient<T>,
        command: CommandBuilder,
        preamble: &[u8],
        advertisement: &[u8],
    ) -> Result<Vec<u8>> {
        let mut child = command
            .stdin(StdioMode::Piped)
            .stdout(StdioMode::Piped)
            .spawn()?;
        child.write_stdin(preamble)?;
        child.write_stdin(advertisement)?;

        let stdout = child.take_stdout().ok_or_else(hung_up)?;
        let reader = Arc::new(Mutex::new(PktLineReader::new(stdout)));

        let mut requests = 0usize;
        loop {
            let first = match reader.lock().read()? {
                Some(PktLine::Data(data)) => data,
                Some(_) | None => break,
            };
            let mut response = self.post_rpc(client, &reader, first)?;
            requests += 1;

            let stdin = child.stdin().ok_or_else(hung_up)?;
            io::copy(&mut response.body, stdin)?;
            stdin.flush()?;
        }
        child.close_stdin();

        let mut result = Vec::new();
        reader.lock().inner_mut().read_to_end(&mut result)?;
        drop(reader);
        child.finish()?;
        debug!(service = %self.service, requests, result = result.len(), "rpc finished");
        Ok(result)
    }
}

/// A streamed request body: the buffered start, then payloads read from
/// the child until its flush.
struct RequestStream<R> {
    prefix: Cursor<Vec<u8>>,
    reader: SharedReader<R>,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> Read for RequestStream<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.prefix.read(out)?;
        if n > 0 {
            return Ok(n);
        }
        while self.pos == self.pending.len() {
            if self.done {
                return Ok(0);
            }
            match self.reader.lock().read() {
                Ok(Some(PktLine::Data(data))) => {
                    self.pending = data;
                    self.pos = 0;
                }
                Ok(Some(_)) => self.done = true,
                Ok(None) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "request ended without flush",
                    ))
                }
                Err(e) => return Err(io::Error::other(e.to_string())),
            }
        }
        let n = out.len().min(self.pending.len() - self.pos);
        out[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn git_command(config: &RemoteConfig, git_dir: Option<&Path>, subcommand: &str) -> CommandBuilder {
    let command = CommandBuilder::new(&config.git_program).arg(subcommand);
    match git_dir {
        Some(dir) => command.env("GIT_DIR", dir),
        None => command,
    }
}

/// `fetch-pack` invocation for a stateless fetch from `url`.
pub fn fetch_pack_command(
    config: &RemoteConfig,
    options: &Options,
    git_dir: Option<&Path>,
    url: &str,
) -> CommandBuilder {
    let mut command = git_command(config, git_dir, "fetch-pack")
        .args(["--stateless-rpc", "--stdin", "--lock-pack"])
        .arg_if(options.thin, "--thin")
        .arg_if(options.followtags, "--include-tag")
        .arg_if(!options.progress, "--no-progress")
        .arg_if(
            options.check_connectivity && options.cloning,
            "--check-self-contained-and-connected",
        );
    if options.verbosity >= 3 {
        command = command.args(["-v", "-v"]);
    }
    if options.depth > 0 {
        command = command.arg(format!("--depth={}", options.depth));
    }
    command.arg(url)
}

/// Carries the configured git program into the `send-pack` child.
const PUSH_GIT_PROGRAM_ENV: &str = "BOUGH_GIT_PROGRAM";

/// `send-pack` invocation for a stateless push of `specs` to `url`.
///
/// The child is this helper's own `send-pack` mode, or the configured
/// [`RemoteConfig::send_pack_program`].
pub fn send_pack_command(
    config: &RemoteConfig,
    options: &Options,
    git_dir: Option<&Path>,
    url: &str,
    specs: &[String],
) -> CommandBuilder {
    let mut command = CommandBuilder::new(config.push_program())
        .arg("send-pack")
        .env(PUSH_GIT_PROGRAM_ENV, &config.git_program);
    if let Some(dir) = git_dir {
        command = command.env("GIT_DIR", dir);
    }
    command = command
        .args(["--stateless-rpc", "--helper-status"])
        .arg_if(options.thin, "--thin")
        .arg_if(options.dry_run, "--dry-run");
    if options.verbosity == 0 {
        command = command.arg("--quiet");
    } else if options.verbosity > 1 {
        command = command.arg("--verbose");
    }
    command
        .arg(if options.progress { "--progress" } else { "--no-progress" })
        .arg(url)
        .args(specs)
}

/// Preamble for a stateless fetch: one pkt-line per wanted ref name, then
/// a flush.
pub fn fetch_preamble<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>> {
    let mut writer = PktLineWriter::new(Vec::new());
    for name in names {
        if name.is_empty() {
            return Err(RemoteError::Unsupported(
                "cannot fetch by sha1 over smart http".to_string(),
            ));
        }
        writer.write_line(name)?;
    }
    writer.flush_pkt()?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::http::{ScriptedResponse, ScriptedTransport};

    fn state(post_buffer: usize) -> RpcState {
        RpcState {
            service: "git-upload-pack".to_string(),
            url: "https://h/r/".to_string(),
            post_buffer,
            gzip_request: false,
            gzip_threshold: 1024,
        }
    }

    fn shared(bytes: &[u8]) -> SharedReader<Cursor<Vec<u8>>> {
        Arc::new(Mutex::new(PktLineReader::new(Cursor::new(bytes.to_vec()))))
    }

    fn client(transport: &ScriptedTransport) -> HttpClient<ScriptedTransport> {
        HttpClient::new(transport.clone(), Credential::default(), None)
    }

    #[test]
    fn test_small_request_is_buffered() {
        let transport = ScriptedTransport::new();
        transport.respond(ScriptedResponse::ok("application/x-git-upload-pack-result", "NAK"));
        let reader = shared(b"0009more\n0000");

        let response = state(1 << 20)
            .post_rpc(&mut client(&transport), &reader, b"first\n".to_vec())
            .unwrap();
        assert_eq!(response.bytes().unwrap(), b"NAK");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.url, "https://h/r/git-upload-pack");
        assert_eq!(req.body, b"first\nmore\n");
        assert!(!req.streamed);
        assert_eq!(req.header("Content-Type"), Some("application/x-git-upload-pack-request"));
        assert_eq!(req.header("Accept"), Some("application/x-git-upload-pack-result"));
    }

    #[test]
    fn test_large_request_probes_then_streams() {
        let transport = ScriptedTransport::new();
        transport
            .respond(ScriptedResponse::ok("application/x-git-upload-pack-result", ""))
            .respond(ScriptedResponse::ok("application/x-git-upload-pack-result", "ok"));
        let reader = shared(b"0008more0008tail0000");

        state(0)
            .post_rpc(&mut client(&transport), &reader, b"head".to_vec())
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body, b"0000");
        assert!(!requests[0].streamed);
        assert_eq!(requests[1].body, b"headmoretail");
        assert!(requests[1].streamed);
    }

    #[test]
    fn test_gzip_request() {
        let transport = ScriptedTransport::new();
        transport.respond(ScriptedResponse::ok("application/x-git-upload-pack-result", ""));
        let reader = shared(b"0000");
        let mut rpc = state(1 << 20);
        rpc.gzip_request = true;
        rpc.gzip_threshold = 4;

        rpc.post_rpc(&mut client(&transport), &reader, b"want 1234\n".to_vec())
            .unwrap();

        let req = &transport.requests()[0];
        assert_eq!(req.header("Content-Encoding"), Some("gzip"));
        let mut inflated = Vec::new();
        flate2::read::GzDecoder::new(req.body.as_slice())
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, b"want 1234\n");
    }

    #[test]
    fn test_rpc_error_status() {
        let transport = ScriptedTransport::new();
        transport.respond(ScriptedResponse::new(500, Some("text/plain"), "boom"));
        let reader = shared(b"0000");
        let err = state(1 << 20)
            .post_rpc(&mut client(&transport), &reader, b"x".to_vec())
            .unwrap_err();
        assert_eq!(err.to_string(), "RPC failed; HTTP 500");
        assert_eq!(err.remote_message().as_deref(), Some("remote: boom\n"));
    }

    #[test]
    fn test_truncated_request() {
        let transport = ScriptedTransport::new();
        let reader = shared(b"0008more");
        assert!(state(1 << 20)
            .post_rpc(&mut client(&transport), &reader, b"x".to_vec())
            .is_err());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_fetch_pack_command() {
        let config = RemoteConfig::default();
        let options = Options {
            depth: 3,
            followtags: true,
            verbosity: 3,
            ..Options::default()
        };
        let command = fetch_pack_command(&config, &options, None, "https://h/r/");
        assert_eq!(
            command.to_string(),
            "git fetch-pack --stateless-rpc --stdin --lock-pack --thin --include-tag \
             --no-progress -v -v --depth=3 https://h/r/"
        );
    }

    #[test]
    fn test_send_pack_command() {
        let config = RemoteConfig {
            send_pack_program: "git-remote-bough".to_string(),
            ..RemoteConfig::default()
        };
        let options = Options {
            dry_run: true,
            verbosity: 0,
            progress: true,
            thin: false,
            ..Options::default()
        };
        let specs = vec!["refs/heads/main:refs/heads/main".to_string()];
        let command = send_pack_command(&config, &options, None, "https://h/r/", &specs);
        assert_eq!(
            command.to_string(),
            "git-remote-bough send-pack --stateless-rpc --helper-status --dry-run --quiet \
             --progress https://h/r/ refs/heads/main:refs/heads/main"
        );
    }

    #[test]
    fn test_fetch_preamble() {
        let preamble = fetch_preamble(["refs/heads/main"]).unwrap();
        assert_eq!(preamble, b"0014refs/heads/main\n0000");
        assert!(fetch_preamble([""]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_relays_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let captured = dir.path().join("stdin");
        let command = CommandBuilder::new("sh").arg("-c").arg(format!(
            "printf '000bwant 1\\n0000'; printf '0000'; cat > {}; printf 'lock pack-1.keep\\n'",
            captured.display()
        ));

        let transport = ScriptedTransport::new();
        transport.respond(ScriptedResponse::ok("application/x-git-upload-pack-result", "PACKDATA"));

        let result = state(1 << 20)
            .run(&mut client(&transport), command, b"PRE", b"ADV")
            .unwrap();
        assert_eq!(result, b"lock pack-1.keep\n");
        assert_eq!(transport.requests()[0].body, b"want 1\n");
        assert_eq!(std::fs::read(&captured).unwrap(), b"PREADVPACKDATA");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_child_failure() {
        let command = CommandBuilder::new("sh").arg("-c").arg("exit 2");
        let transport = ScriptedTransport::new();
        let err = state(1 << 20)
            .run(&mut client(&transport), command, b"", b"")
            .unwrap_err();
        assert!(matches!(err, RemoteError::Git(GitError::Child { .. })));
    }
}

//! The remote helper command loop.
//!
//! git drives the helper over stdin and stdout with one command per line:
//!
//! - `capabilities`: the supported commands, then a blank line
//! - `list [for-push]`: one `<id> <name>` or `@<target> <name>` line per
//!   ref, then a blank line
//! - `option <name> [<value>]`: `ok`, `unsupported` or
//!   `error invalid value`
//! - a batch of `fetch <id> [<name>]` lines ended by a blank line
//! - a batch of `push <refspec>` lines ended by a blank line
//!
//! A blank line or end of input ends the session.

use crate::client::HttpClient;
use crate::config::RemoteConfig;
use crate::credential::{Credential, CredentialHelper};
use crate::discovery::{normalize_url, Discovery, DiscoveryCache};
use crate::http::HttpTransport;
use crate::options::Options;
use crate::rpc::{fetch_pack_command, fetch_preamble, send_pack_command, RpcState};
use crate::walker::Walker;
use crate::{RemoteError, Result};
use bough_git::{CommandBuilder, StdioMode};
use bough_storage::{LooseObjectDir, ObjectId};
use reqwest::Url;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UPLOAD_PACK: &str = "git-upload-pack";
const RECEIVE_PACK: &str = "git-receive-pack";

/// One wanted ref from a `fetch` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// Object to fetch.
    pub id: ObjectId,
    /// Ref name as advertised; empty when fetching a bare id.
    pub name: String,
}

/// Parses the arguments of a `fetch` command: an id, optionally followed
/// by the ref name it was advertised under.
pub fn parse_fetch_line(args: &str) -> Result<FetchTarget> {
    let (hex, name) = args.split_once(' ').unwrap_or((args, ""));
    let id = ObjectId::from_hex(hex).map_err(|_| {
        RemoteError::Protocol(format!("protocol error: expected sha/ref, got '{args}'"))
    })?;
    Ok(FetchTarget {
        id,
        name: name.to_string(),
    })
}

/// Splits userinfo off `url`, returning the bare URL with a trailing `/`
/// and the credential it carried.
pub fn split_url(url: &str) -> Result<(String, Credential)> {
    let mut parsed =
        Url::parse(url).map_err(|e| RemoteError::Protocol(format!("invalid URL '{url}': {e}")))?;
    let credential = Credential::for_url(&parsed);
    // Both setters only fail for URLs that cannot carry userinfo, which
    // then have none to strip.
    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    Ok((normalize_url(parsed.as_str()), credential))
}

/// State of one helper session.
pub struct RemoteHelper<T> {
    url: String,
    config: RemoteConfig,
    options: Options,
    discovery: DiscoveryCache,
    client: HttpClient<T>,
    git_dir: Option<PathBuf>,
}

impl<T: HttpTransport> RemoteHelper<T> {
    /// A session for `url` using `transport`.
    pub fn new(url: &str, config: RemoteConfig, transport: T, git_dir: Option<PathBuf>) -> Result<Self> {
        let (url, credential) = split_url(url)?;
        let helper_command = config.credential_command();
        let helper = (!helper_command.is_empty()).then(|| CredentialHelper::new(helper_command));
        Ok(Self {
            url,
            config,
            options: Options::default(),
            discovery: DiscoveryCache::new(),
            client: HttpClient::new(transport, credential, helper),
            git_dir,
        })
    }

    /// Repository URL with trailing `/` and no userinfo.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current transport options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The HTTP client.
    pub fn client(&self) -> &HttpClient<T> {
        &self.client
    }

    fn discover(&mut self, service: &str) -> Result<Discovery> {
        self.discovery
            .discover(&mut self.client, &self.url, service, self.config.smart_http)
            .cloned()
    }

    /// Serves commands from `input` until a blank line or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, input: &mut R, out: &mut W) -> Result<()> {
        while let Some(line) = read_command(input)? {
            if line.is_empty() {
                break;
            }
            debug!(command = %line, "helper command");

            if line == "capabilities" {
                out.write_all(b"fetch\noption\npush\n\n")?;
            } else if line == "list" || line.starts_with("list ") {
                let for_push = line[4..].contains("for-push");
                self.list(for_push, out)?;
            } else if let Some(args) = line.strip_prefix("fetch ") {
                let first = parse_fetch_line(args)?;
                self.fetch(first, input, out)?;
            } else if let Some(spec) = line.strip_prefix("push ") {
                self.push(spec.to_string(), input, out)?;
            } else if let Some(args) = line.strip_prefix("option ") {
                let reply = self.options.set_from_line(args);
                writeln!(out, "{reply}")?;
            } else {
                return Err(RemoteError::UnknownCommand(line));
            }
            out.flush()?;
        }
        Ok(())
    }

    fn list<W: Write>(&mut self, for_push: bool, out: &mut W) -> Result<()> {
        let service = if for_push { RECEIVE_PACK } else { UPLOAD_PACK };
        let discovery = self.discover(service)?;
        for r in &discovery.refs {
            match &r.symref {
                Some(target) => writeln!(out, "@{target} {}", r.name)?,
                None => writeln!(out, "{} {}", r.old_id, r.name)?,
            }
        }
        writeln!(out)?;
        Ok(())
    }

    fn fetch<R: BufRead, W: Write>(&mut self, first: FetchTarget, input: &mut R, out: &mut W) -> Result<()> {
        let mut targets = vec![first];
        while let Some(line) = read_command(input)? {
            if line.is_empty() {
                break;
            }
            match line.strip_prefix("fetch ") {
                Some(args) => targets.push(parse_fetch_line(args)?),
                None => {
                    return Err(RemoteError::Protocol(format!(
                        "http transport does not support {line}"
                    )))
                }
            }
        }
        let git_dir = self
            .git_dir
            .clone()
            .ok_or_else(|| RemoteError::Failed("Fetch attempted without a local repo".to_string()))?;

        let discovery = self.discover(UPLOAD_PACK)?;
        info!(wanted = targets.len(), smart = discovery.proto_git, "fetching");
        if discovery.proto_git {
            let result = self.fetch_git(&discovery, &targets, &git_dir)?;
            out.write_all(&result)?;
        } else {
            self.fetch_dumb(&targets, &git_dir)?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn fetch_git(&mut self, discovery: &Discovery, targets: &[FetchTarget], git_dir: &Path) -> Result<Vec<u8>> {
        let preamble = fetch_preamble(targets.iter().map(|t| t.name.as_str()))?;
        let command = fetch_pack_command(&self.config, &self.options, Some(git_dir), &self.url);
        let mut rpc = RpcState::new(UPLOAD_PACK, &self.url, &self.config);
        rpc.gzip_request = true;
        rpc.run(&mut self.client, command, &preamble, &discovery.buf)
    }

    fn fetch_dumb(&mut self, targets: &[FetchTarget], git_dir: &Path) -> Result<()> {
        if self.options.depth > 0 {
            return Err(RemoteError::Unsupported(
                "dumb http transport does not support --depth".to_string(),
            ));
        }
        let local = LooseObjectDir::new(git_dir.join("objects"));
        let ids: Vec<ObjectId> = targets.iter().map(|t| t.id).collect();
        let mut walker = Walker::new(&mut self.client, &self.url, &local, self.config.max_tree_depth);
        walker.fetch(&ids)
    }

    fn push<R: BufRead, W: Write>(&mut self, first: String, input: &mut R, out: &mut W) -> Result<()> {
        let mut specs = vec![first];
        while let Some(line) = read_command(input)? {
            if line.is_empty() {
                break;
            }
            match line.strip_prefix("push ") {
                Some(spec) => specs.push(spec.to_string()),
                None => {
                    return Err(RemoteError::Protocol(format!(
                        "http transport does not support {line}"
                    )))
                }
            }
        }

        let discovery = self.discover(RECEIVE_PACK)?;
        info!(specs = specs.len(), smart = discovery.proto_git, "pushing");
        let result = if discovery.proto_git {
            let command = send_pack_command(
                &self.config,
                &self.options,
                self.git_dir.as_deref(),
                &self.url,
                &specs,
            );
            RpcState::new(RECEIVE_PACK, &self.url, &self.config).run(
                &mut self.client,
                command,
                b"",
                &discovery.buf,
            )?
        } else {
            self.push_dav(&specs)?
        };
        out.write_all(&result)?;
        writeln!(out)?;
        Ok(())
    }

    /// Pushes through `git http-push`, which speaks WebDAV to servers
    /// without smart HTTP support.
    fn push_dav(&self, specs: &[String]) -> Result<Vec<u8>> {
        let mut command = CommandBuilder::new(&self.config.git_program)
            .arg("http-push")
            .arg("--helper-status")
            .arg_if(self.options.dry_run, "--dry-run")
            .arg_if(self.options.verbosity > 1, "--verbose")
            .arg(&self.url)
            .args(specs)
            .stdout(StdioMode::Piped);
        if let Some(dir) = &self.git_dir {
            command = command.env("GIT_DIR", dir);
        }
        let mut child = command.spawn()?;
        let mut result = Vec::new();
        if let Some(stdout) = child.stdout() {
            stdout.read_to_end(&mut result)?;
        }
        child
            .finish()
            .map_err(|e| RemoteError::Failed(format!("git-http-push failed: {e}")))?;
        Ok(result)
    }
}

/// Reads one command line without its line ending; `None` at end of
/// input.
fn read_command<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

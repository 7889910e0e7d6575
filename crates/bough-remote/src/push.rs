//! The `send-pack` child of a smart HTTP push.
//!
//! For a push the helper runs itself again as
//! `git-remote-bough send-pack --stateless-rpc --helper-status <url> <refspec>...`
//! and relays that child's requests like any other stateless RPC. The child
//! reads the advertisement from stdin, matches the refspecs against local
//! refs, decides which updates are fast-forwards and pushes through
//! [`bough_git::send_pack`]. An empty request then ends the exchange and the
//! `--helper-status` lines follow as the result.

use crate::walker::header_links;
use crate::{RemoteError, Result};
use bough_git::{
    helper_status, parse_smart, send_pack, ChildFailure, CommandBuilder, GitError, PackProducer,
    PktLineReader, PktLineWriter, PushOutcome, Ref, RefList, RefStatus, SendPackArgs, StdioMode,
};
use bough_storage::{GitObject, ObjectId, ObjectSource, ObjectType, StorageError};
use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Peer name recorded for deletions.
const DELETE_PEER: &str = "(delete)";

/// What a push needs to know about the local repository.
pub trait LocalRepository: ObjectSource {
    /// Resolves a ref or revision to an object id, `None` when it names
    /// nothing.
    fn resolve(&self, name: &str) -> Result<Option<ObjectId>>;

    /// True when `ancestor` is `descendant` or reachable from it through
    /// commit parents.
    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool> {
        let mut queue = VecDeque::from([*descendant]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if id == *ancestor {
                return Ok(true);
            }
            if !seen.insert(id) {
                continue;
            }
            match self.read(&id)? {
                Some(object) if object.object_type == ObjectType::Commit => {
                    queue.extend(header_links(&object.data, &["parent"])?);
                }
                _ => {}
            }
        }
        Ok(false)
    }
}

/// A repository reached through git plumbing.
#[derive(Debug, Clone)]
pub struct GitRepository {
    git_program: String,
    git_dir: Option<PathBuf>,
}

impl GitRepository {
    /// Runs `git_program`, pointed at `git_dir` when given.
    pub fn new(git_program: impl Into<String>, git_dir: Option<PathBuf>) -> Self {
        Self {
            git_program: git_program.into(),
            git_dir,
        }
    }

    /// Runs git with `args`. Exit status 1 is the plumbing answer "no" and
    /// yields `None`; other failures are errors.
    fn query(&self, args: &[&str]) -> std::result::Result<Option<Vec<u8>>, GitError> {
        let mut command = CommandBuilder::new(&self.git_program)
            .args(args)
            .stdout(StdioMode::Piped)
            .stderr(StdioMode::Null);
        if let Some(dir) = &self.git_dir {
            command = command.env("GIT_DIR", dir);
        }
        let mut child = command.spawn()?;
        let mut output = Vec::new();
        if let Some(stdout) = child.stdout() {
            stdout.read_to_end(&mut output)?;
        }
        match child.finish() {
            Ok(()) => Ok(Some(output)),
            Err(GitError::Child {
                failure: ChildFailure::Failed { code: 1 },
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn storage_error(e: GitError) -> StorageError {
    StorageError::Io(io::Error::other(e.to_string()))
}

impl ObjectSource for GitRepository {
    fn read(&self, id: &ObjectId) -> bough_storage::Result<Option<GitObject>> {
        let hex = id.to_hex();
        let Some(kind) = self.query(&["cat-file", "-t", &hex]).map_err(storage_error)? else {
            return Ok(None);
        };
        let object_type: ObjectType = String::from_utf8_lossy(&kind).trim().parse()?;
        let data = self
            .query(&["cat-file", object_type.as_str(), &hex])
            .map_err(storage_error)?
            .ok_or_else(|| StorageError::ObjectNotFound(hex))?;
        Ok(Some(GitObject::new(object_type, data)))
    }

    fn contains(&self, id: &ObjectId) -> bough_storage::Result<bool> {
        let found = self
            .query(&["cat-file", "-e", &id.to_hex()])
            .map_err(storage_error)?;
        Ok(found.is_some())
    }
}

impl LocalRepository for GitRepository {
    fn resolve(&self, name: &str) -> Result<Option<ObjectId>> {
        let Some(output) = self.query(&["rev-parse", "--verify", "--quiet", name])? else {
            return Ok(None);
        };
        Ok(Some(ObjectId::from_hex(String::from_utf8_lossy(&output).trim())?))
    }

    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool> {
        let answer = self.query(&[
            "merge-base",
            "--is-ancestor",
            &ancestor.to_hex(),
            &descendant.to_hex(),
        ])?;
        Ok(answer.is_some())
    }
}

/// One push refspec, `[+]<src>:<dst>`. An empty source deletes `dst`; a
/// spec without `:` pushes `src` to the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    /// Update even when it is not a fast-forward.
    pub force: bool,
    /// Local revision, empty for a deletion.
    pub src: String,
    /// Remote ref name.
    pub dst: String,
}

impl PushSpec {
    /// Parses a refspec as git hands it to a remote helper.
    pub fn parse(spec: &str) -> Result<Self> {
        let (force, rest) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (src, dst) = rest.split_once(':').unwrap_or((rest, rest));
        if !dst.starts_with("refs/") || dst.ends_with('/') {
            return Err(RemoteError::Protocol(format!(
                "remote part of refspec is not a valid name in {spec}"
            )));
        }
        Ok(Self {
            force,
            src: src.to_string(),
            dst: dst.to_string(),
        })
    }

    /// True for `:<dst>`.
    pub fn is_deletion(&self) -> bool {
        self.src.is_empty()
    }
}

/// Builds the push ref list: every advertised ref, plus new refs named by
/// `specs`, with the matched ones carrying their update and status.
///
/// An update whose old value is missing locally or not an ancestor of the
/// new one is a non-fast-forward; unless forced it is rejected up front.
pub fn match_push_refs<L>(remote: &RefList, specs: &[PushSpec], repo: &L) -> Result<RefList>
where
    L: LocalRepository + ?Sized,
{
    let mut refs: RefList = remote
        .iter()
        .map(|r| Ref {
            symref: r.symref.clone(),
            ..Ref::new(&r.name, r.old_id)
        })
        .collect();

    for spec in specs {
        let (peer, new_id) = if spec.is_deletion() {
            (DELETE_PEER, ObjectId::null())
        } else {
            let id = repo.resolve(&spec.src)?.ok_or_else(|| {
                RemoteError::Failed(format!("src refspec {} does not match any", spec.src))
            })?;
            (spec.src.as_str(), id)
        };

        let i = match refs.find(&spec.dst) {
            Some(i) => i,
            None if spec.is_deletion() => {
                return Err(RemoteError::Failed(format!(
                    "unable to delete '{}': remote ref does not exist",
                    spec.dst
                )))
            }
            None => refs.push(Ref::new(&spec.dst, ObjectId::null())),
        };
        if refs[i].peer_ref.is_some() {
            return Err(RemoteError::Failed(format!(
                "multiple updates for ref '{}' not allowed",
                spec.dst
            )));
        }

        let mut r = std::mem::take(&mut refs[i]).with_update(peer, new_id);
        if !r.deletion {
            if r.old_id == r.new_id {
                r.status = RefStatus::UpToDate;
            } else if !r.old_id.is_null() {
                let fast_forward =
                    repo.contains(&r.old_id)? && repo.is_ancestor(&r.old_id, &r.new_id)?;
                r.nonfastforward = !fast_forward;
                if !fast_forward && !spec.force {
                    r.status = RefStatus::RejectNonFastForward;
                }
            }
        }
        debug!(name = %r.name, status = ?r.status, "matched push ref");
        refs[i] = r;
    }
    Ok(refs)
}

/// Options of one stateless push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendPackOptions {
    /// Refspecs as given on the command line.
    pub specs: Vec<String>,
    /// Print `--helper-status` lines as the result.
    pub helper_status: bool,
    /// Protocol options; `stateless_rpc` is always switched on.
    pub args: SendPackArgs,
}

/// The finished push.
#[derive(Debug, Clone)]
pub struct PushResult {
    /// Refs with their final statuses.
    pub refs: RefList,
    /// Everything else that happened.
    pub outcome: PushOutcome,
}

/// Runs the child side of a stateless push.
///
/// `input` carries the advertisement followed by the server's responses;
/// `out` receives the requests, the empty request that ends the exchange
/// and, when asked for, the helper status.
pub fn stateless_push<R, W, L, P>(
    input: &mut R,
    out: &mut W,
    options: &SendPackOptions,
    repo: &L,
    producer: &mut P,
) -> Result<PushResult>
where
    R: Read,
    W: Write,
    L: LocalRepository + ?Sized,
    P: PackProducer + ?Sized,
{
    let specs = options
        .specs
        .iter()
        .map(|s| PushSpec::parse(s))
        .collect::<Result<Vec<_>>>()?;
    let remote = parse_smart(&mut PktLineReader::new(&mut *input))?;
    let mut refs = match_push_refs(&remote.refs, &specs, repo)?;

    let args = SendPackArgs {
        stateless_rpc: true,
        ..options.args.clone()
    };
    let outcome = send_pack(input, out, &remote, &mut refs, &args, repo, producer)?;
    info!(
        commands_sent = outcome.commands_sent,
        success = outcome.success,
        "push finished"
    );

    PktLineWriter::new(&mut *out).flush_pkt()?;
    if options.helper_status {
        out.write_all(helper_status(&refs).as_bytes())?;
    }
    out.flush()?;
    Ok(PushResult { refs, outcome })
}

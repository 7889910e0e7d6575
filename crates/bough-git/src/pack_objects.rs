//! Handing pack generation to `git pack-objects`.

use crate::command::{CommandBuilder, StdioMode};
use crate::error::ChildFailure;
use crate::pktline::LARGE_PACKET_MAX;
use crate::refs::RefList;
use crate::send_pack::SendPackArgs;
use crate::sideband::send_sideband;
use crate::{GitError, Result};
use bough_storage::{ObjectId, ObjectSource};
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::{debug, error};

const SIGPIPE: i32 = 13;

/// One revision fed to the pack builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rev {
    /// The remote already has this object and everything it reaches.
    Exclude(ObjectId),
    /// The pack must make this object complete on the remote.
    Include(ObjectId),
}

/// What a pack builder needs to know: the revisions plus the options
/// mirrored from the negotiated capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackRequest {
    /// Revisions in the order they are fed.
    pub revs: Vec<Rev>,
    /// Build a thin pack.
    pub thin: bool,
    /// Use offset deltas.
    pub ofs_delta: bool,
    /// Suppress progress.
    pub quiet: bool,
    /// Force progress.
    pub progress: bool,
    /// Frame the output as pkt-lines.
    pub stateless_rpc: bool,
}

impl PackRequest {
    /// Collects the revisions for `refs`.
    ///
    /// Extra haves come first. Every ref then contributes its old value as an
    /// exclusion when it is non-null and present locally, followed by its new
    /// value when non-null.
    pub fn new<S>(
        refs: &RefList,
        extra_haves: &[ObjectId],
        args: &SendPackArgs,
        local: &S,
    ) -> Result<Self>
    where
        S: ObjectSource + ?Sized,
    {
        let mut revs: Vec<Rev> = extra_haves.iter().copied().map(Rev::Exclude).collect();
        for r in refs {
            if !r.old_id.is_null() && local.contains(&r.old_id)? {
                revs.push(Rev::Exclude(r.old_id));
            }
            if !r.new_id.is_null() {
                revs.push(Rev::Include(r.new_id));
            }
        }
        Ok(Self {
            revs,
            thin: args.use_thin_pack,
            ofs_delta: args.use_ofs_delta,
            quiet: args.quiet,
            progress: args.progress,
            stateless_rpc: args.stateless_rpc,
        })
    }

    /// The revision list as `pack-objects --revs` reads it.
    pub fn rev_lines(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.revs.len() * (ObjectId::HEX_LEN + 2));
        for rev in &self.revs {
            match rev {
                Rev::Exclude(id) => {
                    out.push(b'^');
                    out.extend_from_slice(id.to_hex().as_bytes());
                }
                Rev::Include(id) => out.extend_from_slice(id.to_hex().as_bytes()),
            }
            out.push(b'\n');
        }
        out
    }
}

/// Something that can stream a pack for a push.
pub trait PackProducer {
    /// Writes the pack described by `request` to `out`.
    fn write_pack(&mut self, request: &PackRequest, out: &mut dyn Write) -> Result<()>;
}

impl<F> PackProducer for F
where
    F: FnMut(&PackRequest, &mut dyn Write) -> Result<()>,
{
    fn write_pack(&mut self, request: &PackRequest, out: &mut dyn Write) -> Result<()> {
        self(request, out)
    }
}

/// Runs `git pack-objects` and relays its output.
#[derive(Debug, Clone)]
pub struct ChildPackProducer {
    git_program: OsString,
    git_dir: Option<PathBuf>,
}

impl Default for ChildPackProducer {
    fn default() -> Self {
        Self::new("git")
    }
}

impl ChildPackProducer {
    /// Uses `git_program` to run `pack-objects`.
    pub fn new(git_program: impl Into<OsString>) -> Self {
        Self {
            git_program: git_program.into(),
            git_dir: None,
        }
    }

    /// Points the child at a repository through `GIT_DIR`.
    pub fn git_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.git_dir = Some(dir.into());
        self
    }

    /// The command line for `request`.
    pub fn command(&self, request: &PackRequest) -> CommandBuilder {
        let cmd = CommandBuilder::new(&self.git_program)
            .args(["pack-objects", "--all-progress-implied", "--revs", "--stdout"])
            .arg_if(request.thin, "--thin")
            .arg_if(request.ofs_delta, "--delta-base-offset")
            .arg_if(request.quiet || !request.progress, "-q")
            .arg_if(request.progress, "--progress")
            .stdin(StdioMode::Piped)
            .stdout(StdioMode::Piped);
        match &self.git_dir {
            Some(dir) => cmd.env("GIT_DIR", dir),
            None => cmd,
        }
    }
}

impl PackProducer for ChildPackProducer {
    fn write_pack(&mut self, request: &PackRequest, out: &mut dyn Write) -> Result<()> {
        let mut child = self.command(request).spawn()?;
        debug!(revs = request.revs.len(), "feeding pack-objects");

        match child.write_stdin(&request.rev_lines()) {
            Ok(()) => {}
            Err(GitError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(e),
        }
        child.close_stdin();

        if let Some(stdout) = child.stdout() {
            if request.stateless_rpc {
                let mut buf = vec![0u8; LARGE_PACKET_MAX];
                loop {
                    let n = match stdout.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };
                    send_sideband(out, None, &buf[..n], LARGE_PACKET_MAX)?;
                }
            } else {
                io::copy(stdout, out)?;
            }
        }

        child.finish().inspect_err(|e| {
            if let GitError::Child {
                failure: ChildFailure::Signaled { signal },
                ..
            } = e
            {
                if *signal != SIGPIPE {
                    error!("pack-objects died of signal {signal}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::Ref;
    use bough_storage::ObjectStore;

    fn id(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; 20])
    }

    #[test]
    fn test_request_revs() {
        let store = ObjectStore::new();
        let known = store.put_blob(b"known".to_vec());

        let refs: RefList = [
            Ref::new("refs/heads/update", known).with_update("refs/heads/update", id(2)),
            Ref::new("refs/heads/unknown-old", id(3)).with_update("refs/heads/x", id(4)),
            Ref::new("refs/heads/new", ObjectId::null()).with_update("refs/heads/new", id(5)),
            Ref::new("refs/heads/gone", known).with_update("(delete)", ObjectId::null()),
        ]
        .into_iter()
        .collect();

        let request =
            PackRequest::new(&refs, &[id(9)], &SendPackArgs::default(), &store).unwrap();
        assert_eq!(
            request.revs,
            vec![
                Rev::Exclude(id(9)),
                Rev::Exclude(known),
                Rev::Include(id(2)),
                Rev::Include(id(4)),
                Rev::Include(id(5)),
                Rev::Exclude(known),
            ]
        );

        let lines = String::from_utf8(request.rev_lines()).unwrap();
        let first = lines.lines().next().unwrap();
        assert_eq!(first, format!("^{}", id(9)));
        assert_eq!(lines.lines().count(), 6);
    }

    #[test]
    fn test_command_flags() {
        let producer = ChildPackProducer::new("git");
        let quiet = PackRequest {
            thin: true,
            ofs_delta: true,
            ..PackRequest::default()
        };
        assert_eq!(
            producer.command(&quiet).to_string(),
            "git pack-objects --all-progress-implied --revs --stdout --thin --delta-base-offset -q"
        );

        let progress = PackRequest {
            progress: true,
            ..PackRequest::default()
        };
        assert_eq!(
            producer.command(&progress).to_string(),
            "git pack-objects --all-progress-implied --revs --stdout --progress"
        );
    }

    #[cfg(unix)]
    fn script_producer(dir: &tempfile::TempDir, body: &str) -> ChildPackProducer {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-git");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ChildPackProducer::new(path)
    }

    #[cfg(unix)]
    #[test]
    fn test_child_relays_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut producer = script_producer(&dir, "sed 's/^/got /'");
        let request = PackRequest {
            revs: vec![Rev::Exclude(id(1)), Rev::Include(id(2))],
            ..PackRequest::default()
        };
        let mut out = Vec::new();
        producer.write_pack(&request, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("got ^{}\ngot {}\n", id(1), id(2))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_child_stateless_framing() {
        let dir = tempfile::tempdir().unwrap();
        let mut producer = script_producer(&dir, "cat >/dev/null; printf PACK");
        let request = PackRequest {
            stateless_rpc: true,
            ..PackRequest::default()
        };
        let mut out = Vec::new();
        producer.write_pack(&request, &mut out).unwrap();
        assert_eq!(out, b"0008PACK");
    }

    #[cfg(unix)]
    #[test]
    fn test_child_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut producer = script_producer(&dir, "cat >/dev/null; exit 1");
        let err = producer
            .write_pack(&PackRequest::default(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            GitError::Child {
                failure: ChildFailure::Failed { code: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_missing_program() {
        let mut producer = ChildPackProducer::new("/nonexistent/git");
        let err = producer
            .write_pack(&PackRequest::default(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            GitError::Child {
                failure: ChildFailure::NotFound,
                ..
            }
        ));
    }
}

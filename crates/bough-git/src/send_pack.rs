//! The push side of the pack protocol.
//!
//! `send_pack` takes refs whose statuses were already annotated by ref
//! matching, sends one update command per eligible ref, streams the pack and
//! reads back the per-ref report.

use crate::advertisement::Advertisement;
use crate::pack_objects::{PackProducer, PackRequest};
use crate::pktline::{PktLineReader, PktLineWriter, LARGE_PACKET_MAX};
use crate::refs::{RefList, RefStatus};
use crate::sideband::{from_io, send_sideband, SidebandReader};
use crate::{GitError, Result};
use bough_storage::ObjectSource;
use std::io::{self, Read, Write};
use tracing::{debug, error, info, warn};

/// Agent string announced to servers that advertise `agent`.
pub const AGENT: &str = concat!("bough/", env!("CARGO_PKG_VERSION"));

/// Options for one push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPackArgs {
    /// Report more.
    pub verbose: bool,
    /// Ask the server to be quiet and suppress pack progress.
    pub quiet: bool,
    /// Force pack progress.
    pub progress: bool,
    /// Decide statuses without sending anything.
    pub dry_run: bool,
    /// Also send refs that have no local counterpart.
    pub send_mirror: bool,
    /// Build a thin pack.
    pub use_thin_pack: bool,
    /// Use offset deltas; switched on when the server supports them.
    pub use_ofs_delta: bool,
    /// Frame everything for the stateless HTTP transport.
    pub stateless_rpc: bool,
    /// Agent string.
    pub agent: String,
}

impl Default for SendPackArgs {
    fn default() -> Self {
        Self {
            verbose: false,
            quiet: false,
            progress: false,
            dry_run: false,
            send_mirror: false,
            use_thin_pack: false,
            use_ofs_delta: false,
            stateless_rpc: false,
            agent: AGENT.to_string(),
        }
    }
}

/// What happened during a push besides the per-ref statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// At least one update command went out.
    pub commands_sent: bool,
    /// Non-deletion updates among the sent refs.
    pub new_refs: usize,
    /// Detail of a failed `unpack` line.
    pub unpack_error: Option<String>,
    /// Report problems that fail the push.
    pub errors: Vec<String>,
    /// Report oddities that do not fail the push.
    pub warnings: Vec<String>,
    /// True when the push as a whole succeeded.
    pub success: bool,
}

impl PushOutcome {
    fn warn(&mut self, msg: String) {
        warn!("{msg}");
        self.warnings.push(msg);
    }

    fn fail(&mut self, msg: String) {
        error!("{msg}");
        self.errors.push(msg);
    }
}

/// Pushes `refs` to a remote.
///
/// `remote` supplies the server capabilities and `.have` objects; only its
/// ref list is ignored, the caller's `refs` being the matched version of it.
/// Commands are written to `out` and the status report is read from `input`.
///
/// Per-ref rejections are recorded in `refs` and in
/// [`PushOutcome::success`]. An `Err` means the push could not be carried
/// out; when the pack could not be produced every ref status is reset to
/// [`RefStatus::None`] first.
pub fn send_pack<R, W, S, P>(
    input: &mut R,
    out: &mut W,
    remote: &Advertisement,
    refs: &mut RefList,
    args: &SendPackArgs,
    local: &S,
    producer: &mut P,
) -> Result<PushOutcome>
where
    R: Read,
    W: Write,
    S: ObjectSource + ?Sized,
    P: PackProducer + ?Sized,
{
    let mut outcome = PushOutcome::default();
    if refs.is_empty() {
        info!("no refs in common and none specified; doing nothing");
        outcome.warnings.push(
            "No refs in common and none specified; doing nothing.\n\
             Perhaps you should specify a branch such as 'master'."
                .to_string(),
        );
        outcome.success = true;
        return Ok(outcome);
    }

    let caps = &remote.capabilities;
    let status_report = caps.has("report-status");
    let allow_deleting_refs = caps.has("delete-refs");
    let use_sideband = caps.has("side-band-64k");
    let quiet = args.quiet && caps.has("quiet");
    let mut pack_args = args.clone();
    pack_args.use_ofs_delta |= caps.has("ofs-delta");

    let mut announce = Vec::new();
    if status_report {
        announce.push("report-status".to_string());
    }
    if use_sideband {
        announce.push("side-band-64k".to_string());
    }
    if quiet {
        announce.push("quiet".to_string());
    }
    if caps.has("agent") {
        announce.push(format!("agent={}", args.agent));
    }

    let mut req = PktLineWriter::new(Vec::new());
    for r in refs.iter_mut() {
        if r.peer_ref.is_none() && !args.send_mirror {
            continue;
        }
        if matches!(
            r.status,
            RefStatus::RejectNonFastForward | RefStatus::UpToDate
        ) {
            continue;
        }
        if r.deletion && !allow_deleting_refs {
            r.status = RefStatus::RejectNoDelete;
            continue;
        }
        if !r.deletion {
            outcome.new_refs += 1;
        }

        if args.dry_run {
            r.status = RefStatus::Ok;
            continue;
        }
        let mut line = format!("{} {} {}", r.old_id, r.new_id, r.name);
        if !outcome.commands_sent && !announce.is_empty() {
            line.push('\0');
            line.push_str(&announce.join(" "));
        }
        req.write_line(&line)?;
        r.status = if status_report {
            RefStatus::ExpectingReport
        } else {
            RefStatus::Ok
        };
        outcome.commands_sent = true;
    }
    let cmds_sent = outcome.commands_sent;
    debug!(
        new_refs = outcome.new_refs,
        cmds_sent, status_report, use_sideband, "sending update commands"
    );

    if args.stateless_rpc {
        if !args.dry_run && cmds_sent {
            req.flush_pkt()?;
            send_sideband(out, None, req.get_ref(), LARGE_PACKET_MAX)?;
        }
    } else {
        req.flush_pkt()?;
        out.write_all(req.get_ref())?;
    }

    if outcome.new_refs > 0 && cmds_sent {
        let request = PackRequest::new(refs, &remote.extra_haves, &pack_args, local)?;
        if let Err(e) = producer.write_pack(&request, out) {
            error!(error = %e, "pack-objects failed");
            refs.reset_statuses();
            return Err(e);
        }
    }
    if args.stateless_rpc && cmds_sent {
        PktLineWriter::new(&mut *out).flush_pkt()?;
    }
    out.flush()?;

    if status_report && cmds_sent {
        let result = if use_sideband {
            let demux = SidebandReader::new(&mut *input, io::stderr());
            receive_status(&mut PktLineReader::new(demux), refs, &mut outcome)
        } else {
            receive_status(&mut PktLineReader::new(&mut *input), refs, &mut outcome)
        };
        result.map_err(|e| match e {
            GitError::Io(e) => from_io(e),
            other => other,
        })?;
    }

    outcome.success = outcome.errors.is_empty() && refs.all_succeeded();
    Ok(outcome)
}

/// Reads a status report into `refs`.
///
/// The report starts with `unpack ok` or `unpack <error>`, followed by one
/// `ok <ref>` or `ng <ref> <message>` line per command, ending with a flush.
/// Lookup starts just after the previously reported ref, so a report in
/// request order is matched in one pass, and falls back to a full scan.
pub fn receive_status<R: Read>(
    reader: &mut PktLineReader<R>,
    refs: &mut RefList,
    outcome: &mut PushOutcome,
) -> Result<()> {
    match reader.read_line()? {
        Some(line) => match line.strip_prefix(b"unpack ") {
            Some(b"ok") => {}
            Some(detail) => {
                let detail = String::from_utf8_lossy(detail).into_owned();
                outcome.fail(format!("unpack failed: {detail}"));
                outcome.unpack_error = Some(detail);
            }
            None => {
                outcome.fail("did not receive remote status".to_string());
                return Ok(());
            }
        },
        None => {
            outcome.fail("did not receive remote status".to_string());
            return Ok(());
        }
    }

    let mut hint = None;
    while let Some(line) = reader.read_line()? {
        let (ok, rest) = if let Some(rest) = line.strip_prefix(b"ok ") {
            (true, rest)
        } else if let Some(rest) = line.strip_prefix(b"ng ") {
            (false, rest)
        } else {
            outcome.fail(format!(
                "protocol error: {}",
                String::from_utf8_lossy(&line)
            ));
            break;
        };

        let rest = String::from_utf8_lossy(rest);
        let (refname, msg) = match rest.split_once(' ') {
            Some((name, msg)) => (name, Some(msg)),
            None => (&*rest, None),
        };

        hint = refs.find_hinted(hint, refname);
        let Some(i) = hint else {
            outcome.warn(format!("remote reported status on unknown ref: {refname}"));
            continue;
        };
        let r = &mut refs[i];
        if r.status != RefStatus::ExpectingReport {
            outcome.warn(format!(
                "remote reported status on a ref we did not ask about: {refname}"
            ));
            continue;
        }
        r.status = if ok {
            RefStatus::Ok
        } else {
            RefStatus::RemoteReject
        };
        if let Some(msg) = msg {
            r.remote_status = Some(msg.to_string());
        }
        hint = Some(i + 1);
    }
    Ok(())
}

//! Reporting push results.
//!
//! Two renderings: machine-readable `--helper-status` lines for a remote
//! helper's caller, and the one-line-per-ref summary people see.

use crate::refs::{Ref, RefList, RefStatus};
use bough_storage::ObjectId;

/// Width of the bracketed summary column.
const SUMMARY_WIDTH: usize = 2 * DEFAULT_ABBREV + 3;
const DEFAULT_ABBREV: usize = 7;

/// Quotes `s` C-style when it contains characters that need escaping.
pub fn quote_c_style(s: &str) -> String {
    let needs_quoting = s
        .chars()
        .any(|c| c == '"' || c == '\\' || c.is_control() || !c.is_ascii());
    if !needs_quoting {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x07 => out.push_str("\\a"),
            0x08 => out.push_str("\\b"),
            0x0c => out.push_str("\\f"),
            0x0b => out.push_str("\\v"),
            0x20..=0x7e => out.push(b as char),
            other => out.push_str(&format!("\\{other:03o}")),
        }
    }
    out.push('"');
    out
}

/// One `--helper-status` line for `r`, or `None` when the ref was not
/// part of the push.
pub fn helper_status_line(r: &Ref) -> Option<String> {
    if r.peer_ref.is_none() {
        return None;
    }
    let (res, mut msg) = match r.status {
        RefStatus::None => ("error", Some("no match")),
        RefStatus::Ok => ("ok", None),
        RefStatus::UpToDate => ("ok", Some("up to date")),
        RefStatus::RejectNonFastForward => ("error", Some("non-fast forward")),
        RefStatus::RejectNoDelete => ("error", Some("remote does not support deleting refs")),
        RefStatus::RemoteReject => ("error", None),
        RefStatus::ExpectingReport => return None,
    };
    if let Some(remote) = r.remote_status.as_deref() {
        msg = Some(remote);
    }
    Some(match msg {
        Some(msg) => format!("{res} {} {}", r.name, quote_c_style(msg)),
        None => format!("{res} {}", r.name),
    })
}

/// `--helper-status` output for all refs, newline terminated.
pub fn helper_status(refs: &RefList) -> String {
    refs.iter()
        .filter_map(helper_status_line)
        .map(|line| line + "\n")
        .collect()
}

/// Drops the well-known prefixes from a ref name for display.
pub fn prettify_refname(name: &str) -> &str {
    ["refs/heads/", "refs/tags/", "refs/remotes/"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

fn abbrev(id: &ObjectId) -> String {
    let mut hex = id.to_hex();
    hex.truncate(DEFAULT_ABBREV);
    hex
}

fn status_line(
    flag: char,
    summary: &str,
    to: &Ref,
    from: Option<&str>,
    msg: Option<&str>,
) -> String {
    let mut line = format!(" {flag} {summary:<width$} ", width = SUMMARY_WIDTH);
    match from {
        Some(from) => {
            line.push_str(prettify_refname(from));
            line.push_str(" -> ");
            line.push_str(prettify_refname(&to.name));
        }
        None => line.push_str(prettify_refname(&to.name)),
    }
    if let Some(msg) = msg {
        line.push_str(" (");
        line.push_str(msg);
        line.push(')');
    }
    line
}

/// The human summary line for one ref.
pub fn format_ref_status(r: &Ref) -> String {
    let peer = r.peer_ref.as_deref();
    let sent_from = if r.deletion { None } else { peer };
    match r.status {
        RefStatus::None => status_line('X', "[no match]", r, None, None),
        RefStatus::RejectNoDelete => status_line(
            '!',
            "[rejected]",
            r,
            None,
            Some("remote does not support deleting refs"),
        ),
        RefStatus::UpToDate => status_line('=', "[up to date]", r, peer, None),
        RefStatus::RejectNonFastForward => {
            status_line('!', "[rejected]", r, peer, Some("non-fast-forward"))
        }
        RefStatus::RemoteReject => status_line(
            '!',
            "[remote rejected]",
            r,
            sent_from,
            r.remote_status.as_deref(),
        ),
        RefStatus::ExpectingReport => status_line(
            '!',
            "[remote failure]",
            r,
            sent_from,
            Some("remote failed to report status"),
        ),
        RefStatus::Ok if r.deletion => status_line('-', "[deleted]", r, None, None),
        RefStatus::Ok if r.old_id.is_null() => {
            let summary = if r.name.starts_with("refs/tags/") {
                "[new tag]"
            } else if r.name.starts_with("refs/heads/") {
                "[new branch]"
            } else {
                "[new reference]"
            };
            status_line('*', summary, r, peer, None)
        }
        RefStatus::Ok => {
            let (sep, flag, msg) = if r.nonfastforward {
                ("...", '+', Some("forced update"))
            } else {
                ("..", ' ', None)
            };
            let quickref = format!("{}{sep}{}", abbrev(&r.old_id), abbrev(&r.new_id));
            status_line(flag, &quickref, r, peer, msg)
        }
    }
}

/// Summary of a finished push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Lines to show, starting with `To <destination>`.
    pub lines: Vec<String>,
    /// Some ref was rejected as a non-fast-forward.
    pub nonfastforward: bool,
}

/// Builds the human summary of a push to `dest`.
///
/// Up-to-date refs are listed only when `verbose`; successful updates come
/// before failures. When nothing was pushed and nothing failed the report is
/// the single line `Everything up-to-date`.
pub fn push_report(dest: &str, refs: &RefList, verbose: bool) -> PushReport {
    let mut report = PushReport::default();
    let mut body = Vec::new();

    if verbose {
        body.extend(
            refs.iter()
                .filter(|r| r.status == RefStatus::UpToDate)
                .map(format_ref_status),
        );
    }
    body.extend(
        refs.iter()
            .filter(|r| r.status == RefStatus::Ok)
            .map(format_ref_status),
    );
    for r in refs {
        if !matches!(
            r.status,
            RefStatus::None | RefStatus::UpToDate | RefStatus::Ok
        ) {
            body.push(format_ref_status(r));
        }
        if r.status == RefStatus::RejectNonFastForward {
            report.nonfastforward = true;
        }
    }

    if !body.is_empty() {
        report.lines.push(format!("To {dest}"));
        report.lines.extend(body);
    }
    let pushed = refs
        .iter()
        .any(|r| !matches!(r.status, RefStatus::None | RefStatus::UpToDate));
    if !pushed && refs.all_succeeded() {
        report.lines.push("Everything up-to-date".to_string());
    }
    report
}

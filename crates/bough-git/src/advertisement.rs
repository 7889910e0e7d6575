//! Ref advertisement parsing.
//!
//! Smart servers send pkt-lines `<id> <name>`, the first of which carries the
//! capability list after a NUL. Dumb servers publish `info/refs` as plain
//! `<id>\t<name>\n` lines.

use crate::pktline::PktLineReader;
use crate::refs::{Ref, RefList};
use crate::{GitError, Result};
use bough_storage::ObjectId;
use std::fmt;
use std::io::Read;
use tracing::debug;

/// Capabilities announced by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: Vec<String>,
}

impl Capabilities {
    /// Parses a space-separated capability list.
    pub fn parse(list: &str) -> Self {
        Self {
            entries: list.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Returns true if `name` is announced, with or without a value.
    pub fn has(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e == name || e.strip_prefix(name).is_some_and(|v| v.starts_with('=')))
    }

    /// Value of the first `name=value` entry.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find_map(|e| e.strip_prefix(name)?.strip_prefix('='))
    }

    /// Values of every `name=value` entry.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter_map(move |e| e.strip_prefix(name)?.strip_prefix('='))
    }

    /// Iterates over the raw entries.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Returns true if nothing was announced.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entries.join(" "))
    }
}

/// A parsed ref advertisement.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    /// Advertised refs in server order.
    pub refs: RefList,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Commits the server announced as shallow.
    pub shallow: Vec<ObjectId>,
    /// Objects announced through `.have` lines, which the server has
    /// without a ref pointing at them.
    pub extra_haves: Vec<ObjectId>,
}

fn bad_line(line: &[u8]) -> GitError {
    GitError::InvalidAdvertisement(format!(
        "protocol error: expected sha/ref, got '{}'",
        String::from_utf8_lossy(line)
    ))
}

/// Reads a smart advertisement up to and including its flush.
///
/// The empty-repository placeholder `capabilities^{}` contributes only
/// capabilities and peeled `^{}` entries are dropped. `symref=` capabilities
/// are attached to the refs they name.
pub fn parse_smart<R: Read>(reader: &mut PktLineReader<R>) -> Result<Advertisement> {
    let mut adv = Advertisement::default();
    let mut first = true;

    while let Some(line) = reader.read_line()? {
        if let Some(msg) = line.strip_prefix(b"ERR ") {
            return Err(GitError::Remote(String::from_utf8_lossy(msg).into_owned()));
        }
        if let Some(hex) = line.strip_prefix(b"shallow ") {
            let id = ObjectId::from_hex_bytes(hex).map_err(|_| bad_line(&line))?;
            adv.shallow.push(id);
            continue;
        }

        let (body, caps) = match line.iter().position(|&b| b == 0) {
            Some(nul) => (&line[..nul], Some(&line[nul + 1..])),
            None => (&line[..], None),
        };
        if let Some(caps) = caps {
            if first {
                adv.capabilities = Capabilities::parse(&String::from_utf8_lossy(caps));
            }
        }
        first = false;

        if body.len() < ObjectId::HEX_LEN + 2 || body[ObjectId::HEX_LEN] != b' ' {
            return Err(bad_line(&line));
        }
        let id = ObjectId::from_hex_bytes(&body[..ObjectId::HEX_LEN])
            .map_err(|_| bad_line(&line))?;
        let name = std::str::from_utf8(&body[ObjectId::HEX_LEN + 1..])
            .map_err(|_| bad_line(&line))?;

        if name == ".have" {
            adv.extra_haves.push(id);
            continue;
        }
        if name == "capabilities^{}" || name.ends_with("^{}") {
            continue;
        }
        adv.refs.push(Ref::new(name, id));
    }

    for symref in adv.capabilities.values("symref") {
        if let Some((from, to)) = symref.split_once(':') {
            if let Some(i) = adv.refs.find(from) {
                adv.refs[i].symref = Some(to.to_string());
            }
        }
    }

    debug!(
        refs = adv.refs.len(),
        capabilities = %adv.capabilities,
        "parsed smart advertisement"
    );
    Ok(adv)
}

/// Parses a dumb `info/refs` file.
///
/// Every line must be exactly `<40-hex>\t<name>\n`; anything else aborts
/// rather than yielding a partial list.
pub fn parse_dumb(buf: &[u8]) -> Result<RefList> {
    let invalid = || {
        GitError::InvalidAdvertisement("info/refs not valid: is this a git repository?".to_string())
    };
    let mut refs = RefList::new();
    let mut rest = buf;

    while !rest.is_empty() {
        let end = rest.iter().position(|&b| b == b'\n').ok_or_else(invalid)?;
        let line = &rest[..end];
        rest = &rest[end + 1..];

        if line.len() < ObjectId::HEX_LEN + 2 || line[ObjectId::HEX_LEN] != b'\t' {
            return Err(invalid());
        }
        let id = ObjectId::from_hex_bytes(&line[..ObjectId::HEX_LEN]).map_err(|_| invalid())?;
        let name = std::str::from_utf8(&line[ObjectId::HEX_LEN + 1..]).map_err(|_| invalid())?;
        if name.contains('\t') || name.contains('\0') {
            return Err(invalid());
        }
        refs.push(Ref::new(name, id));
    }
    debug!(refs = refs.len(), "parsed info/refs");
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::PktLineWriter;
    use std::io::Cursor;

    const A: &str = "1111111111111111111111111111111111111111";
    const B: &str = "2222222222222222222222222222222222222222";

    fn stream(lines: &[&str]) -> PktLineReader<Cursor<Vec<u8>>> {
        let mut buf = Vec::new();
        let mut w = PktLineWriter::new(&mut buf);
        for line in lines {
            w.write_line(line).unwrap();
        }
        w.flush_pkt().unwrap();
        PktLineReader::new(Cursor::new(buf))
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::parse(
            "report-status delete-refs ofs-delta agent=git/2.40 symref=HEAD:refs/heads/main",
        );
        assert!(caps.has("report-status"));
        assert!(caps.has("agent"));
        assert!(!caps.has("report"));
        assert!(!caps.has("side-band-64k"));
        assert_eq!(caps.value("agent"), Some("git/2.40"));
        assert_eq!(caps.value("symref"), Some("HEAD:refs/heads/main"));
        assert_eq!(caps.value("ofs-delta"), None);
    }

    #[test]
    fn test_capability_value_outlives_name() {
        let caps = Capabilities::parse("agent=git/2.40 symref=HEAD:refs/heads/a symref=x:y");
        let agent = {
            let name = String::from("agent");
            caps.value(&name)
        };
        assert_eq!(agent, Some("git/2.40"));
        assert_eq!(caps.values("symref").count(), 2);
    }

    #[test]
    fn test_parse_smart() {
        let first = format!("{A} HEAD\0report-status symref=HEAD:refs/heads/main");
        let main = format!("{A} refs/heads/main");
        let tag = format!("{B} refs/tags/v1");
        let peeled = format!("{A} refs/tags/v1^{{}}");
        let have = format!("{B} .have");
        let mut reader = stream(&[&first, &main, &tag, &peeled, &have]);

        let adv = parse_smart(&mut reader).unwrap();
        let names: Vec<_> = adv.refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["HEAD", "refs/heads/main", "refs/tags/v1"]);
        assert_eq!(adv.refs[0].symref.as_deref(), Some("refs/heads/main"));
        assert_eq!(adv.refs[2].old_id, ObjectId::from_hex(B).unwrap());
        assert!(adv.capabilities.has("report-status"));
        assert_eq!(adv.extra_haves, vec![ObjectId::from_hex(B).unwrap()]);
    }

    #[test]
    fn test_parse_smart_empty_repository() {
        let null = ObjectId::null().to_hex();
        let first = format!("{null} capabilities^{{}}\0report-status delete-refs");
        let shallow = format!("shallow {B}");
        let mut reader = stream(&[&first, &shallow]);
        let adv = parse_smart(&mut reader).unwrap();
        assert!(adv.refs.is_empty());
        assert!(adv.capabilities.has("delete-refs"));
        assert_eq!(adv.shallow, vec![ObjectId::from_hex(B).unwrap()]);
    }

    #[test]
    fn test_parse_smart_errors() {
        let mut reader = stream(&["ERR access denied"]);
        assert!(matches!(
            parse_smart(&mut reader),
            Err(GitError::Remote(msg)) if msg == "access denied"
        ));

        let mut reader = stream(&["not a ref line"]);
        assert!(matches!(
            parse_smart(&mut reader),
            Err(GitError::InvalidAdvertisement(_))
        ));

        let mut truncated = PktLineReader::new(Cursor::new(Vec::new()));
        assert!(parse_smart(&mut truncated).is_err());
    }

    #[test]
    fn test_parse_dumb() {
        let buf = format!("{A}\trefs/heads/main\n{B}\trefs/tags/v1\n");
        let refs = parse_dumb(buf.as_bytes()).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].name, "refs/tags/v1");
        assert!(parse_dumb(b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_dumb_rejects_malformed() {
        let cases = [
            format!("{A}\trefs/heads/main"),
            format!("{A} refs/heads/main\n"),
            format!("{}\trefs/heads/main\n", &A[..39]),
            format!("{A}\trefs/heads/main\ngarbage\n"),
            "<html>not found</html>\n".to_string(),
        ];
        for case in cases {
            assert!(
                matches!(parse_dumb(case.as_bytes()), Err(GitError::InvalidAdvertisement(_))),
                "accepted {case:?}"
            );
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parse_dumb_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse_dumb(&data);
        }
    }
}

//! `option <name> <value>` handling.

use std::fmt;

/// Transport options set by the calling git process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// 0 is quiet, 1 normal, higher is more verbose.
    pub verbosity: i32,
    /// Show progress.
    pub progress: bool,
    /// Shallow fetch depth; 0 means full history.
    pub depth: u64,
    /// Fetch tags pointing into fetched history.
    pub followtags: bool,
    /// Pretend to push.
    pub dry_run: bool,
    /// Ask fetch-pack to verify the fetched pack is self-contained.
    pub check_connectivity: bool,
    /// Allow thin packs.
    pub thin: bool,
    /// This fetch is the initial clone.
    pub cloning: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbosity: 1,
            progress: false,
            depth: 0,
            followtags: false,
            dry_run: false,
            check_connectivity: false,
            thin: true,
            cloning: false,
        }
    }
}

/// Answer to an `option` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionReply {
    /// The option was set.
    Ok,
    /// The option name is not known.
    Unsupported,
    /// The value could not be parsed.
    InvalidValue,
}

impl fmt::Display for OptionReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Unsupported => "unsupported",
            Self::InvalidValue => "error invalid value",
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl Options {
    /// Sets option `name`. A missing value means `true`.
    pub fn set(&mut self, name: &str, value: Option<&str>) -> OptionReply {
        let value = value.unwrap_or("true");
        let flag = match name {
            "verbosity" => {
                return match value.parse() {
                    Ok(v) => {
                        self.verbosity = v;
                        OptionReply::Ok
                    }
                    Err(_) => OptionReply::InvalidValue,
                };
            }
            "depth" => {
                return match value.parse() {
                    Ok(v) => {
                        self.depth = v;
                        OptionReply::Ok
                    }
                    Err(_) => OptionReply::InvalidValue,
                };
            }
            "progress" => &mut self.progress,
            "followtags" => &mut self.followtags,
            "dry-run" => &mut self.dry_run,
            "check-connectivity" => &mut self.check_connectivity,
            "thin" => &mut self.thin,
            "cloning" => &mut self.cloning,
            _ => return OptionReply::Unsupported,
        };
        match parse_bool(value) {
            Some(v) => {
                *flag = v;
                OptionReply::Ok
            }
            None => OptionReply::InvalidValue,
        }
    }

    /// Parses the arguments of an `option` command line.
    pub fn set_from_line(&mut self, args: &str) -> OptionReply {
        match args.split_once(' ') {
            Some((name, value)) => self.set(name, Some(value)),
            None => self.set(args, None),
        }
    }
}

//! Credentials for HTTP authentication.
//!
//! Credentials come from the URL's userinfo first and from a `git
//! credential` compatible helper when the server asks for them. The helper
//! speaks `key=value` lines on stdin and stdout, ending with a blank line.

use crate::{RemoteError, Result};
use bough_git::{CommandBuilder, StdioMode};
use reqwest::Url;
use std::io::Read;
use tracing::debug;

/// A credential description in the helper's key/value form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// URL scheme, e.g. `https`.
    pub protocol: String,
    /// Host, with `:port` when not the default.
    pub host: String,
    /// User name, if known.
    pub username: Option<String>,
    /// Password, if known.
    pub password: Option<String>,
}

impl Credential {
    /// Describes the credential needed for `url`, taking any userinfo from
    /// it.
    pub fn for_url(url: &Url) -> Self {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        let username = (!url.username().is_empty()).then(|| url.username().to_string());
        Self {
            protocol: url.scheme().to_string(),
            host,
            username,
            password: url.password().map(str::to_string),
        }
    }

    /// Both parts are present.
    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Serializes for a helper's standard input.
    pub fn to_helper_input(&self) -> String {
        let mut out = format!("protocol={}\nhost={}\n", self.protocol, self.host);
        if let Some(username) = &self.username {
            out.push_str(&format!("username={username}\n"));
        }
        if let Some(password) = &self.password {
            out.push_str(&format!("password={password}\n"));
        }
        out.push('\n');
        out
    }

    /// Merges `key=value` lines from a helper into this credential.
    /// Reading stops at the first blank line; unknown keys are ignored.
    pub fn update_from_helper_output(&mut self, output: &str) {
        for line in output.lines() {
            if line.is_empty() {
                break;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "protocol" => self.protocol = value.to_string(),
                "host" => self.host = value.to_string(),
                "username" => self.username = Some(value.to_string()),
                "password" => self.password = Some(value.to_string()),
                _ => {}
            }
        }
    }
}

/// Runs an external credential helper.
#[derive(Debug, Clone)]
pub struct CredentialHelper {
    command: Vec<String>,
}

impl CredentialHelper {
    /// Uses `command` (program then arguments); the action is appended.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn run(&self, action: &str, credential: &Credential) -> Result<String> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            RemoteError::Unsupported("no credential helper configured".to_string())
        })?;
        let mut child = CommandBuilder::new(program)
            .args(args)
            .arg(action)
            .stdin(StdioMode::Piped)
            .stdout(StdioMode::Piped)
            .spawn()?;
        child.write_stdin(credential.to_helper_input().as_bytes())?;
        child.close_stdin();

        let mut output = String::new();
        if let Some(stdout) = child.stdout() {
            stdout.read_to_string(&mut output)?;
        }
        child.finish()?;
        debug!(action, host = %credential.host, "ran credential helper");
        Ok(output)
    }

    /// Asks the helper to complete `credential`.
    pub fn fill(&self, credential: &mut Credential) -> Result<()> {
        let output = self.run("fill", credential)?;
        credential.update_from_helper_output(&output);
        if !credential.is_complete() {
            return Err(RemoteError::Protocol(format!(
                "credential helper returned no password for {}",
                credential.host
            )));
        }
        Ok(())
    }

    /// Tells the helper the credential worked.
    pub fn approve(&self, credential: &Credential) -> Result<()> {
        self.run("approve", credential).map(drop)
    }

    /// Tells the helper the credential was refused.
    pub fn reject(&self, credential: &Credential) -> Result<()> {
        self.run("reject", credential).map(drop)
    }
}

//! HTTP remote helper for bough.
//!
//! git runs `git-remote-bough <remote> <url>` and drives it through a line
//! protocol on stdin and stdout. Against a smart server fetch and push
//! become stateless RPC exchanges: a `fetch-pack` or `send-pack` child
//! produces the requests and every request is one HTTP POST. Against a
//! dumb server objects are downloaded one by one and pushes go through
//! `git http-push`.
//!
//! - [`RemoteHelper`]: the command loop
//! - [`DiscoveryCache`]: ref discovery, cached per service
//! - [`RpcState`]: request relaying with size probing and gzip
//! - [`stateless_push`]: the `send-pack` child behind a smart push
//! - [`HttpTransport`]: the HTTP seam, with [`ReqwestTransport`] and
//!   [`ScriptedTransport`]

mod client;
mod config;
mod credential;
mod discovery;
mod error;
mod helper;
mod http;
mod options;
mod push;
mod rpc;
mod walker;

pub use crate::config::{default_config_path, RemoteConfig, ENV_PREFIX};
pub use client::HttpClient;
pub use credential::{Credential, CredentialHelper};
pub use discovery::{normalize_url, parse_head, refs_url, Discovery, DiscoveryCache};
pub use error::RemoteError;
pub use helper::{parse_fetch_line, split_url, FetchTarget, RemoteHelper};
pub use http::{
    BasicAuth, Body, HttpRequest, HttpResponse, HttpTransport, Method, RecordedRequest,
    ReqwestTransport, ScriptedResponse, ScriptedTransport,
};
pub use options::{OptionReply, Options};
pub use push::{
    match_push_refs, stateless_push, GitRepository, LocalRepository, PushResult, PushSpec,
    SendPackOptions,
};
pub use rpc::{fetch_pack_command, fetch_preamble, send_pack_command, RpcState};
pub use walker::Walker;

/// Result type for remote helper operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

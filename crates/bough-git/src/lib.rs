//! Git wire protocol for bough.
//!
//! This crate speaks the push side of the pack protocol: pkt-line and
//! side-band framing, ref advertisements, `send-pack` negotiation with its
//! status report, and the bridge to an external pack builder.

mod advertisement;
mod command;
mod error;
mod pack_objects;
mod pktline;
mod refs;
mod send_pack;
mod sideband;
mod status;

pub use advertisement::{parse_dumb, parse_smart, Advertisement, Capabilities};
pub use command::{classify, ChildProcess, CommandBuilder, StdioMode};
pub use error::{ChildFailure, GitError};
pub use pack_objects::{ChildPackProducer, PackProducer, PackRequest, Rev};
pub use pktline::{
    chomp, PktLine, PktLineReader, PktLineWriter, LARGE_PACKET_DATA_MAX, LARGE_PACKET_MAX,
};
pub use refs::{Ref, RefList, RefStatus};
pub use send_pack::{receive_status, send_pack, PushOutcome, SendPackArgs, AGENT};
pub use sideband::{send_sideband, SidebandReader, BAND_DATA, BAND_ERROR, BAND_PROGRESS};
pub use status::{
    format_ref_status, helper_status, helper_status_line, prettify_refname, push_report,
    quote_c_style, PushReport,
};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;

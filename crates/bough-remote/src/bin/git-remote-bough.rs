//! git-remote-bough - git remote helper for HTTP.
//!
//! git runs this as `git-remote-bough <remote> [<url>]` and talks to it
//! over stdin and stdout, so all logging goes to stderr.
//!
//! For smart pushes the helper runs itself as
//! `git-remote-bough send-pack --stateless-rpc <url> <refspec>...`, which
//! produces the push requests.

use anyhow::Context;
use bough_git::{push_report, ChildPackProducer, SendPackArgs};
use bough_remote::{
    stateless_push, GitRepository, RemoteConfig, RemoteError, RemoteHelper, ReqwestTransport,
    SendPackOptions,
};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Git remote helper speaking smart and dumb HTTP
#[derive(Parser, Debug)]
#[command(name = "git-remote-bough")]
#[command(author, version, about, long_about = None)]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Repository to fetch into (default: $GIT_DIR)
    #[arg(long, env = "GIT_DIR")]
    git_dir: Option<PathBuf>,

    /// Configuration file (default: <config dir>/bough/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remote name, or the URL when no URL is given
    #[arg(required = true)]
    remote: Option<String>,

    /// Repository URL
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push side of a stateless RPC exchange
    #[command(hide = true)]
    SendPack(SendPackCli),
}

#[derive(Args, Debug)]
struct SendPackCli {
    /// Read the advertisement and responses from stdin, write requests to stdout
    #[arg(long)]
    stateless_rpc: bool,

    /// Finish with one status line per ref
    #[arg(long)]
    helper_status: bool,

    /// Send a thin pack
    #[arg(long)]
    thin: bool,

    /// Do everything except send the updates
    #[arg(long)]
    dry_run: bool,

    /// Update refs even when it is not a fast-forward
    #[arg(short, long)]
    force: bool,

    /// Ask the server to stay quiet
    #[arg(short, long)]
    quiet: bool,

    /// List up-to-date refs in the report
    #[arg(long)]
    verbose: bool,

    /// Show pack progress
    #[arg(long, overrides_with = "no_progress")]
    progress: bool,

    /// Hide pack progress
    #[arg(long, overrides_with = "progress")]
    no_progress: bool,

    /// Repository URL, for the report
    url: String,

    /// Refspecs to push
    specs: Vec<String>,
}

impl SendPackCli {
    fn options(&self) -> SendPackOptions {
        let specs = self
            .specs
            .iter()
            .map(|spec| {
                if self.force && !spec.starts_with('+') {
                    format!("+{spec}")
                } else {
                    spec.clone()
                }
            })
            .collect();
        SendPackOptions {
            specs,
            helper_status: self.helper_status,
            args: SendPackArgs {
                verbose: self.verbose,
                quiet: self.quiet,
                progress: self.progress && !self.no_progress,
                dry_run: self.dry_run,
                use_thin_pack: self.thin,
                stateless_rpc: true,
                ..SendPackArgs::default()
            },
        }
    }
}

/// Runs the push side of a stateless exchange. Returns false when some
/// ref failed and there is no status output to report it through.
fn send_pack(cli: &Cli, args: &SendPackCli) -> anyhow::Result<bool> {
    if !args.stateless_rpc {
        anyhow::bail!("send-pack is only available with --stateless-rpc");
    }
    let config = RemoteConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let repo = GitRepository::new(&config.git_program, cli.git_dir.clone());
    let mut producer = ChildPackProducer::new(&config.git_program);
    if let Some(dir) = &cli.git_dir {
        producer = producer.git_dir(dir);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = stateless_push(
        &mut stdin.lock(),
        &mut stdout.lock(),
        &args.options(),
        &repo,
        &mut producer,
    )?;

    let mut stderr = io::stderr().lock();
    for message in result.outcome.errors.iter().chain(&result.outcome.warnings) {
        writeln!(stderr, "{message}")?;
    }
    if args.helper_status {
        return Ok(true);
    }
    for line in push_report(&args.url, &result.refs, args.verbose).lines {
        writeln!(stderr, "{line}")?;
    }
    Ok(result.outcome.success)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RemoteConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let transport = ReqwestTransport::new(&config)?;
    let remote = cli.remote.as_deref().unwrap_or_default();
    let url = cli.url.as_deref().unwrap_or(remote);

    let mut helper = RemoteHelper::new(url, config, transport, cli.git_dir)?;
    tracing::debug!(%remote, url = %helper.url(), "helper started");

    let stdin = io::stdin();
    let stdout = io::stdout();
    helper.run(&mut stdin.lock(), &mut stdout.lock())?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "git_remote_bough={log_level},bough_remote={log_level},\
                     bough_git={log_level},bough_tree={log_level},bough_storage={log_level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Some(Command::SendPack(args)) = &cli.command {
        match send_pack(&cli, args) {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("Error: {e:#}");
                std::process::exit(128);
            }
        }
        return;
    }

    if let Err(e) = run(cli) {
        let remote = e.downcast_ref::<RemoteError>();
        if let Some(message) = remote.and_then(RemoteError::remote_message) {
            eprint!("{message}");
        }
        eprintln!("Error: {e:#}");
        std::process::exit(remote.map_or(128, RemoteError::exit_code));
    }
}

//! Purpose: `aristream` CLI entry point.
//! Role: Binary crate root; parses args, runs the watch command, prints events on stdout.
//! Invariants: Event output goes to stdout; logs, notices, and errors go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};

use clap::{Args, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use tracing_subscriber::EnvFilter;

mod notice;
mod report;
mod watch;

use aristream::api::{Error, ErrorKind, EventsRequest, to_exit_code};
use report::ColorMode;
use watch::WatchConfig;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err((err, color_mode)) => {
            report::emit(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Help and version print verbatim with clap's exit code (2 for a bare invocation).
        Err(err)
            if !err.use_stderr()
                || err.kind() == ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand =>
        {
            let code = err.exit_code();
            err.print().map_err(|io_err| {
                (
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err),
                    ColorMode::Auto,
                )
            })?;
            return Ok(code);
        }
        Err(err) => {
            return Err((
                Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `aristream --help`."),
                ColorMode::Auto,
            ));
        }
    };

    init_tracing();
    let color_mode = cli.color;
    match cli.command {
        Command::Watch(args) => {
            let config = args.into_config(color_mode.use_color(io::stdout().is_terminal()));
            watch::watch(config)
                .map(|_| 0)
                .map_err(|err| (add_hint(err), color_mode))
        }
    }
}

#[derive(Parser)]
#[command(
    name = "aristream",
    version,
    about = "Follow an Asterisk ARI event stream over WebSocket",
    long_about = None,
    after_help = r#"EXAMPLES
  $ aristream watch --app demo --user asterisk --password secret
  $ aristream watch --host pbx.local --port 8088 --app demo --field type
  $ aristream watch --target '/ari/events?app=demo&api_key=u:p' --max-messages 10

Set RUST_LOG=debug to trace connection state transitions on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize pretty JSON output and stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Connect to the events endpoint and print each event")]
    Watch(WatchArgs),
}

#[derive(Args)]
struct WatchArgs {
    #[arg(long, default_value = "localhost", help = "Server host name or address")]
    host: String,
    #[arg(long, default_value = "8088", help = "Server port")]
    port: String,
    #[arg(long, default_value = "aristream", help = "Stasis application name")]
    app: String,
    #[arg(long, requires = "password", help = "ARI user")]
    user: Option<String>,
    #[arg(long, requires = "user", help = "ARI password")]
    password: Option<String>,
    #[arg(long, help = "Subscribe to all events, not only the application's")]
    subscribe_all: bool,
    #[arg(
        long,
        conflicts_with_all = ["app", "user", "password", "subscribe_all"],
        help = "Raw handshake target (path and query), bypassing the ARI builder"
    )]
    target: Option<String>,
    #[arg(long, help = "Exit after this many events")]
    max_messages: Option<u64>,
    #[arg(long, help = "Print only this dotted field of each event (e.g. channel.name)")]
    field: Option<String>,
}

impl WatchArgs {
    fn into_config(self, use_color: bool) -> WatchConfig {
        let target = self.target.unwrap_or_else(|| {
            let mut request = EventsRequest::new(self.app).subscribe_all(self.subscribe_all);
            if let (Some(user), Some(password)) = (self.user, self.password) {
                request = request.with_credentials(user, password);
            }
            request.target()
        });
        WatchConfig {
            host: self.host,
            port: self.port,
            target,
            max_messages: self.max_messages,
            field: self
                .field
                .map(|field| field.split('.').map(str::to_string).collect()),
            use_color,
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn add_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Resolution => {
            err.with_hint("Check --host and --port; the port must be numeric.")
        }
        ErrorKind::Transport => {
            err.with_hint("Is the server running and reachable at --host/--port?")
        }
        ErrorKind::Handshake => err.with_hint(
            "The server refused the upgrade. Check the ARI credentials, app name, and target path.",
        ),
        ErrorKind::Internal => err.with_hint(
            "Unexpected internal failure. Retry with RUST_LOG=debug and share the output if it persists.",
        ),
        _ => err,
    }
}

fn clap_error_summary(err: &clap::Error) -> String {
    err.to_string()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("error:").unwrap_or(line).trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

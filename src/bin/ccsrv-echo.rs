//! ccsrv-echo - reference module running on the ccsrv server framework
//!
//! Connects to the control-channel bus, answers a handful of commands and
//! logs every line it reads on stdin until stdin is closed.
//!
//! # Usage
//!
//! ```bash
//! # Attach to the bus socket from the environment or the default path
//! ccsrv-echo
//!
//! # Explicit socket and configuration file
//! ccsrv-echo --socket /run/ccsrv/bus.sock --config /etc/ccsrv.toml
//! ```
//!
//! Bus commands: `echo` (returns its arguments), `ping`, `stop`, plus the
//! server-wide `shutdown`.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ccsrv_server::{
    Answer, EventKind, Module, Server, ServerConfig, ServerContext, ShutdownHandle, Watcher,
};

/// ccsrv-echo - reference control-channel module
#[derive(Parser, Debug)]
#[command(name = "ccsrv-echo", version, about)]
struct Args {
    /// Bus socket path (overrides config file and CCSRV_SOCKET)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Module name announced to the bus
    #[arg(short, long, default_value = "echo")]
    name: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ccsrv_echo=info".parse()?)
                .add_directive("ccsrv_server=info".parse()?),
        )
        .init();

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        module = %args.name,
        socket = %config.socket_path.display(),
        "ccsrv-echo starting"
    );

    let mut server = Server::new(EchoModule::default(), config);
    process::exit(server.run(&args.name));
}

// ============================================================================
// Echo Module
// ============================================================================

/// Module answering `echo`, `ping` and `stop`.
#[derive(Debug, Default)]
struct EchoModule {
    config: Option<Value>,
    shutdown: Option<ShutdownHandle>,
}

impl Module for EchoModule {
    fn config_handler(&mut self, config: &Value) -> Answer {
        if !config.is_object() {
            return Answer::failure(1, "configuration must be a JSON object");
        }
        debug!(config = %config, "Configuration applied");
        self.config = Some(config.clone());
        Answer::success()
    }

    fn command_handler(&mut self, command: &str, args: Option<&Value>) -> Answer {
        match command {
            "echo" => Answer::success_with(args.cloned().unwrap_or(Value::Null)),
            "ping" => Answer::success_with(Value::from("pong")),
            "stop" => match &self.shutdown {
                Some(shutdown) => {
                    info!("Stop requested over the bus");
                    shutdown.trigger();
                    Answer::success()
                }
                None => Answer::failure(1, "server is not running"),
            },
            other => Answer::unknown_command(other),
        }
    }

    fn setup(&mut self, ctx: &ServerContext) -> anyhow::Result<()> {
        self.shutdown = Some(ctx.shutdown().clone());

        let stdin = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .context("Failed to duplicate stdin")?;
        watch_lines(ctx.watcher(), File::from(stdin));
        Ok(())
    }

    fn teardown(&mut self, ctx: &ServerContext) -> anyhow::Result<()> {
        info!(module = %ctx.module_name(), "Echo module finished");
        Ok(())
    }
}

/// Logs every line read from `input`; stops watching it at end of input.
fn watch_lines(watcher: &Watcher, input: File) {
    let fd = input.as_raw_fd();
    let mut reader = LineReader::new(input);
    let registrations = watcher.clone();

    watcher.watch_read(fd, move || {
        match reader.read_lines()? {
            Some(lines) => {
                for line in lines {
                    info!(fd, line = %line, "Input line");
                }
            }
            None => {
                if let Some(rest) = reader.take_pending() {
                    info!(fd, line = %rest, "Input line");
                }
                info!(fd, "Input closed");
                registrations.unwatch(fd, [EventKind::Read])?;
            }
        }
        Ok(())
    });
}

// ============================================================================
// Line Reader
// ============================================================================

const READ_CHUNK: usize = 4096;

/// Longest line kept; longer input is logged in pieces of this size.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits raw reads into lines without reading ahead of readiness.
///
/// Every call performs exactly one `read`, so it never blocks once the
/// descriptor has been reported readable.
struct LineReader {
    input: File,
    pending: Vec<u8>,
}

impl LineReader {
    fn new(input: File) -> Self {
        Self {
            input,
            pending: Vec::new(),
        }
    }

    /// Complete lines made available by one read, or `None` at end of
    /// input.
    fn read_lines(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match self.input.read(&mut chunk) {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Some(Vec::new())),
            Err(e) => return Err(e),
        };
        self.pending.extend_from_slice(&chunk[..n]);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        while self.pending.len() >= MAX_LINE_BYTES {
            let piece: Vec<u8> = self.pending.drain(..MAX_LINE_BYTES).collect();
            lines.push(String::from_utf8_lossy(&piece).into_owned());
        }
        Ok(Some(lines))
    }

    /// Trailing bytes without a newline, if any.
    fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn stream_file() -> (File, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (File::from(OwnedFd::from(ours)), theirs)
    }

    #[test]
    fn test_config_must_be_object() {
        let mut module = EchoModule::default();

        assert_eq!(module.config_handler(&json!([1, 2])).status(), 1);
        assert!(module.config.is_none());

        assert!(module.config_handler(&json!({"greeting": "hi"})).is_success());
        assert_eq!(module.config, Some(json!({"greeting": "hi"})));
    }

    #[test]
    fn test_commands() {
        let mut module = EchoModule::default();

        let answer = module.command_handler("echo", Some(&json!({"a": 1})));
        assert_eq!(answer.value(), Some(&json!({"a": 1})));

        let answer = module.command_handler("ping", None);
        assert_eq!(answer.value(), Some(&Value::from("pong")));

        let answer = module.command_handler("reload", None);
        assert_eq!(answer.message(), Some("Unknown command: reload"));
    }

    #[test]
    fn test_stop_triggers_own_handle() {
        let handle = ShutdownHandle::default();
        let mut module = EchoModule {
            config: None,
            shutdown: Some(handle.clone()),
        };

        assert!(module.command_handler("stop", None).is_success());
        assert!(handle.is_triggered());
    }

    #[test]
    fn test_stop_before_setup_fails() {
        let mut module = EchoModule::default();
        assert_eq!(module.command_handler("stop", None).status(), 1);
    }

    #[test]
    fn test_line_reader_splits_lines() {
        let (input, mut peer) = stream_file();
        let mut reader = LineReader::new(input);

        peer.write_all(b"first\nsecond\npart").unwrap();
        let lines = reader.read_lines().unwrap().unwrap();
        assert_eq!(lines, ["first", "second"]);

        peer.write_all(b"ial\n").unwrap();
        let lines = reader.read_lines().unwrap().unwrap();
        assert_eq!(lines, ["partial"]);

        peer.write_all(b"tail").unwrap();
        drop(peer);
        assert_eq!(reader.read_lines().unwrap().unwrap(), Vec::<String>::new());
        assert!(reader.read_lines().unwrap().is_none());
        assert_eq!(reader.take_pending().as_deref(), Some("tail"));
        assert_eq!(reader.take_pending(), None);
    }

    #[test]
    fn test_line_reader_caps_unterminated_input() {
        let (input, mut peer) = stream_file();
        let mut reader = LineReader::new(input);

        let writer = std::thread::spawn(move || {
            peer.write_all(&vec![b'a'; MAX_LINE_BYTES + 10]).unwrap();
            peer
        });

        let mut lines = Vec::new();
        for _ in 0..1000 {
            lines.extend(reader.read_lines().unwrap().unwrap());
            if !lines.is_empty() {
                break;
            }
        }
        drop(writer.join().unwrap());

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert!(reader.pending.len() < MAX_LINE_BYTES);
    }

    #[test]
    fn test_watch_lines_unwatches_at_eof() {
        let (input, peer) = stream_file();
        let fd = input.as_raw_fd();
        let watcher = Watcher::new();
        watch_lines(&watcher, input);
        assert!(watcher.is_watched(fd, EventKind::Read));

        drop(peer);
        let mut ready = ccsrv_server::PollSet::default();
        ready.add_read(fd);
        assert_eq!(watcher.dispatch(&ready).unwrap(), 1);

        assert!(!watcher.is_watched(fd, EventKind::Read));
    }
}

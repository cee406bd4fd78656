//! ccsrv Server - Readiness loop and lifecycle for control-channel modules
//!
//! This crate provides the runtime core every module builds on:
//! - `mux` - Descriptor registration table and the readiness poll
//! - `dispatch` - Routes bus commands, intercepting `shutdown`
//! - `shutdown` - Shutdown flag and termination signal binding
//! - `session` - Control-channel session interface and the socket session
//! - `server` - Start-up, event loop and tear-down
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Server                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  ready fds  ┌─────────────────────┐    │
//! │  │     Poller      │────────────▶│  Watcher callbacks  │    │
//! │  │   (poll(2))     │             │   (module I/O)      │    │
//! │  └────────┬────────┘             └─────────────────────┘    │
//! │           │ bus fd ready                                    │
//! │           ▼                                                 │
//! │  ┌─────────────────┐             ┌─────────────────────┐    │
//! │  │ ControlSession  │────────────▶│     Dispatcher      │    │
//! │  │ check_command() │             │ shutdown | Module   │    │
//! │  └─────────────────┘             └─────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the thread that calls [`Server::run`]. Signal
//! handlers only store into an atomic flag that the loop checks between
//! iterations.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Panics raised by module code are contained by [`Server::run`]

pub mod config;
pub mod dispatch;
pub mod module;
pub mod mux;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::{ConfigError, ModuleLocator, ServerConfig};
pub use dispatch::{BusHandler, Dispatcher, SHUTDOWN_COMMAND};
pub use module::{FatalError, Module, ServerContext};
pub use mux::{
    CallbackError, EventKind, PollSet, Poller, SystemPoller, WatchCallbacks, WatchError, Watcher,
};
pub use server::{Server, ServerError, EXIT_FAILURE, EXIT_SUCCESS};
pub use session::{
    ControlSession, SessionError, SessionOpener, SocketSession, SocketSessionOpener,
};
pub use shutdown::{Shutdown, ShutdownHandle};

pub use ccsrv_core::{Answer, ModuleName};

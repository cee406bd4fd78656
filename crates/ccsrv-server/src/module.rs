//! Module hooks and the context handed to them.

use serde_json::Value;
use thiserror::Error;

use ccsrv_core::{Answer, ModuleName};

use crate::mux::Watcher;
use crate::shutdown::ShutdownHandle;

/// Hooks a concrete module implements to run on top of [`Server`].
///
/// Only [`Module::config_handler`] is mandatory. The handlers must not
/// fail: problems are reported through the returned [`Answer`]. `setup`
/// and `teardown` may fail, which aborts the server with exit status 1.
///
/// [`Server`]: crate::Server
pub trait Module {
    /// Applies a configuration update delivered over the bus.
    ///
    /// A non-zero answer rejects the update; the server keeps running.
    fn config_handler(&mut self, config: &Value) -> Answer;

    /// Handles a module-specific command.
    ///
    /// `shutdown` never reaches this method. The default answers every
    /// command with `Unknown command: <name>`.
    fn command_handler(&mut self, command: &str, args: Option<&Value>) -> Answer {
        let _ = args;
        Answer::unknown_command(command)
    }

    /// Module-specific initialization, run after the bus session is open.
    ///
    /// Typically registers descriptors through `ctx.watcher()`.
    fn setup(&mut self, ctx: &ServerContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Module-specific finalization, run after the loop exits and before
    /// the bus is told the module is stopping.
    fn teardown(&mut self, ctx: &ServerContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// What a module can reach of the running server.
#[derive(Debug, Clone)]
pub struct ServerContext {
    module: ModuleName,
    watcher: Watcher,
    shutdown: ShutdownHandle,
}

impl ServerContext {
    pub(crate) fn new(module: ModuleName, watcher: Watcher, shutdown: ShutdownHandle) -> Self {
        Self {
            module,
            watcher,
            shutdown,
        }
    }

    pub fn module_name(&self) -> &ModuleName {
        &self.module
    }

    /// Descriptor registration table of the server.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Handle that stops the server after the current iteration.
    pub fn shutdown(&self) -> &ShutdownHandle {
        &self.shutdown
    }
}

/// Error a module raises to report a condition it cannot run with.
///
/// Returned from `setup`, `teardown` or a watch callback, it is logged as
/// a server fatal error rather than an uncaught one.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FatalError(String);

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

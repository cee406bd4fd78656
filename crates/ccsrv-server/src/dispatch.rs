//! Command dispatch for bus traffic.
//!
//! The [`Dispatcher`] binds a [`Module`] to the server's shutdown flag and
//! is what the control session calls for every delivered message. The
//! reserved `shutdown` command is handled here and never reaches the
//! module.

use serde_json::Value;
use tracing::{debug, warn};

use ccsrv_core::{Answer, ModuleName};

use crate::module::Module;
use crate::shutdown::ShutdownHandle;

/// Command handled by the server itself.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

/// Receiver of messages delivered by a control session.
///
/// Both methods are infallible; failures are encoded in the answer.
pub trait BusHandler {
    fn handle_config(&mut self, config: &Value) -> Answer;

    fn handle_command(&mut self, command: &str, args: Option<&Value>) -> Answer;
}

/// Routes bus messages to a module, intercepting `shutdown`.
pub struct Dispatcher<'a, M: Module + ?Sized> {
    module: &'a mut M,
    shutdown: &'a ShutdownHandle,
    module_name: &'a ModuleName,
}

impl<'a, M: Module + ?Sized> Dispatcher<'a, M> {
    pub fn new(
        module: &'a mut M,
        shutdown: &'a ShutdownHandle,
        module_name: &'a ModuleName,
    ) -> Self {
        Self {
            module,
            shutdown,
            module_name,
        }
    }

    /// Dispatches a named command.
    ///
    /// `shutdown` sets the shutdown flag and answers success; anything
    /// else is answered by the module's command handler.
    pub fn dispatch(&mut self, command: &str, args: Option<&Value>) -> Answer {
        debug!(module = %self.module_name, command, "Received command");

        if command == SHUTDOWN_COMMAND {
            self.shutdown.trigger();
            return Answer::success();
        }

        self.module.command_handler(command, args)
    }
}

impl<M: Module + ?Sized> BusHandler for Dispatcher<'_, M> {
    fn handle_config(&mut self, config: &Value) -> Answer {
        debug!(module = %self.module_name, "Received configuration update");

        let answer = self.module.config_handler(config);
        if !answer.is_success() {
            warn!(
                module = %self.module_name,
                status = answer.status(),
                reason = answer.message().unwrap_or_default(),
                "Configuration update rejected"
            );
        }
        answer
    }

    fn handle_command(&mut self, command: &str, args: Option<&Value>) -> Answer {
        self.dispatch(command, args)
    }
}

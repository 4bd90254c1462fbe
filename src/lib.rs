//! # tinit
//!
//! In-VM agent that bridges a remote Runner controller to a sandbox's
//! filesystem and shell over a single Unix-domain socket: it accepts
//! filesystem and command requests, runs the template's start command, and
//! reports filesystem changes and command output back to the Runner.

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fs;
pub mod logging;
pub mod template;
pub mod transport;

pub use command::CommandSupervisor;
pub use config::AgentConfig;
pub use dispatcher::Dispatcher;
pub use fs::Filesystem;
pub use template::{Template, TemplateState};
pub use transport::{Message, MessageData, UnixSocketTransport};

/// The current version of the agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

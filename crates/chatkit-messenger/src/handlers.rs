//! Handlers for commands this side can receive.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chatkit_protocol::{ChatKitError, command_leaf_name, command_wire_name};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::emitter::Payload;

/// Async handler invoked with a command's payload.
pub type CommandHandler =
    Arc<dyn Fn(Payload) -> BoxFuture<'static, Result<Value, ChatKitError>> + Send + Sync>;

/// Command handlers keyed by wire name (`onSubmit`).
///
/// Built once and handed to the messenger; immutable afterwards.
#[derive(Clone, Default)]
pub struct CommandTable {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `command`, given as a leaf (`submit`) or wire
    /// name (`onSubmit`).
    #[must_use]
    pub fn on<F, Fut>(mut self, command: &str, handler: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ChatKitError>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.insert(wire_name(command), handler);
        self
    }

    /// Handler for a wire name.
    #[must_use]
    pub fn get(&self, wire_name: &str) -> Option<CommandHandler> {
        self.handlers.get(wire_name).cloned()
    }

    #[must_use]
    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(&wire_name(command))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        commands.sort_unstable();
        f.debug_struct("CommandTable")
            .field("commands", &commands)
            .finish()
    }
}

fn wire_name(command: &str) -> String {
    if command_leaf_name(command).is_some() {
        command.to_string()
    } else {
        command_wire_name(command)
    }
}

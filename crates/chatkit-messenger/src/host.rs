//! Typed command surface for the page embedding the ChatKit frame.
//!
//! Every method checks the current profile before posting, so a command the
//! profile denies fails with an `IntegrationError` without reaching the frame.
//! Checking and posting happen when the method is called; the returned
//! future only waits for the response.
//! The frame may switch the profile with a `capabilities_profile_change`
//! event, and forwards application events as `public_event`, which are
//! delivered only when the profile allows them.

use std::fmt;
use std::sync::Arc;

use chatkit_protocol::{CapabilityGate, Profile};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::emitter::{EventEmitter, ListenerId, Payload};
use crate::error::{MessengerError, Result};
use crate::messenger::Messenger;

/// Event the frame sends to switch the capability profile.
pub const PROFILE_CHANGE_EVENT: &str = "capabilities_profile_change";

/// Event carrying `[name, data]` for application-visible events.
pub const PUBLIC_EVENT: &str = "public_event";

/// Commands the host can send to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatKitCommand {
    SetOptions,
    SendUserMessage,
    SetComposerValue,
    SetThreadId,
    FocusComposer,
    FetchUpdates,
    SendCustomAction,
    ShowHistory,
    HideHistory,
    ShareThread,
    SetTrainingOptOut,
}

impl ChatKitCommand {
    pub const ALL: [Self; 11] = [
        Self::SetOptions,
        Self::SendUserMessage,
        Self::SetComposerValue,
        Self::SetThreadId,
        Self::FocusComposer,
        Self::FetchUpdates,
        Self::SendCustomAction,
        Self::ShowHistory,
        Self::HideHistory,
        Self::ShareThread,
        Self::SetTrainingOptOut,
    ];

    /// Leaf name, as listed in capability keys (`command.<name>`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SetOptions => "setOptions",
            Self::SendUserMessage => "sendUserMessage",
            Self::SetComposerValue => "setComposerValue",
            Self::SetThreadId => "setThreadId",
            Self::FocusComposer => "focusComposer",
            Self::FetchUpdates => "fetchUpdates",
            Self::SendCustomAction => "sendCustomAction",
            Self::ShowHistory => "showHistory",
            Self::HideHistory => "hideHistory",
            Self::ShareThread => "shareThread",
            Self::SetTrainingOptOut => "setTrainingOptOut",
        }
    }
}

impl fmt::Display for ChatKitCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type ErrorListener = Arc<dyn Fn(&MessengerError) + Send + Sync>;

struct HostState {
    gate: RwLock<(Profile, CapabilityGate)>,
    events: EventEmitter,
    error_listeners: RwLock<Vec<ErrorListener>>,
}

/// Host-side facade over a [`Messenger`].
#[derive(Clone)]
pub struct ChatKitHost {
    messenger: Messenger,
    state: Arc<HostState>,
}

impl ChatKitHost {
    /// Wrap `messenger`, gating commands and events with `profile`.
    #[must_use]
    pub fn new(messenger: Messenger, profile: Profile) -> Self {
        let state = Arc::new(HostState {
            gate: RwLock::new((profile, CapabilityGate::profile(profile))),
            events: EventEmitter::new(),
            error_listeners: RwLock::new(Vec::new()),
        });
        let host = Self { messenger, state };

        let weak = Arc::downgrade(&host.state);
        host.messenger.on(PROFILE_CHANGE_EVENT, move |payload| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let name = payload.data.get("profile").and_then(Value::as_str);
            match name.map(str::parse::<Profile>) {
                Some(Ok(profile)) => {
                    debug!(%profile, "Capability profile changed");
                    state.set_profile(profile);
                }
                Some(Err(error)) => warn!(%error, "Ignoring profile change"),
                None => warn!(data = %payload.data, "Profile change without a profile"),
            }
        });

        let weak = Arc::downgrade(&host.state);
        host.messenger.on(PUBLIC_EVENT, move |payload| {
            if let Some(state) = weak.upgrade() {
                state.dispatch_public(&payload.data);
            }
        });

        host
    }

    #[must_use]
    pub const fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        self.state.gate.read().0
    }

    /// Switch the capability profile.
    pub fn set_profile(&self, profile: Profile) {
        self.state.set_profile(profile);
    }

    /// Whether the current profile allows `command`.
    #[must_use]
    pub fn can(&self, command: ChatKitCommand) -> bool {
        self.state.gate.read().1.check_command(command.name()).is_ok()
    }

    /// Listen for an application event (`thread.change`, `log`, ...).
    /// Events the profile does not allow are never delivered.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.state.events.on(event, Arc::new(listener))
    }

    /// Remove one listener, or all listeners for `event` when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<ListenerId>) -> usize {
        self.state.events.off(event, id)
    }

    /// Listen for errors the frame reports through the `error` event.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&MessengerError) + Send + Sync + 'static,
    {
        self.state.error_listeners.write().push(Arc::new(listener));
    }

    /// Replace the frame's options.
    ///
    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn set_options(&self, options: Value) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::SetOptions, options)
    }

    /// Send a user message (`text`, `attachments`, `newThread`, ...).
    ///
    /// # Errors
    /// Returns an `IntegrationError` when the profile does not allow the
    /// command, or whatever the frame rejected the command with.
    #[track_caller]
    pub fn send_user_message(&self, params: Value) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::SendUserMessage, params)
    }

    /// Prefill the composer.
    ///
    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn set_composer_value(&self, params: Value) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::SetComposerValue, params)
    }

    /// Show a thread, or a new one for `None`.
    ///
    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn set_thread_id(&self, thread_id: Option<&str>) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::SetThreadId, json!({ "threadId": thread_id }))
    }

    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn focus_composer(&self) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::FocusComposer, Value::Null)
    }

    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn fetch_updates(&self) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::FetchUpdates, Value::Null)
    }

    /// Run a custom action, optionally scoped to a thread item.
    ///
    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn send_custom_action(&self, action: Value, item_id: Option<&str>) -> BoxFuture<'static, Result<Value>> {
        self.call(
            ChatKitCommand::SendCustomAction,
            json!({ "action": action, "itemId": item_id }),
        )
    }

    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn show_history(&self) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::ShowHistory, Value::Null)
    }

    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn hide_history(&self) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::HideHistory, Value::Null)
    }

    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn share_thread(&self) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::ShareThread, Value::Null)
    }

    /// # Errors
    /// See [`ChatKitHost::send_user_message`].
    #[track_caller]
    pub fn set_training_opt_out(&self, value: bool) -> BoxFuture<'static, Result<Value>> {
        self.call(ChatKitCommand::SetTrainingOptOut, json!({ "value": value }))
    }

    /// Check the profile and post synchronously, so a denied command fails
    /// and the call site is captured before the caller awaits.
    #[track_caller]
    fn call(&self, command: ChatKitCommand, data: Value) -> BoxFuture<'static, Result<Value>> {
        let allowed = self.state.gate.read().1.check_command(command.name());
        let pending = match allowed {
            Ok(()) => self.messenger.command(command.name(), data),
            Err(error) => Err(error),
        };
        async move { pending?.await }.boxed()
    }
}

impl fmt::Debug for ChatKitHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatKitHost")
            .field("profile", &self.profile())
            .field("messenger", &self.messenger)
            .finish()
    }
}

impl HostState {
    fn set_profile(&self, profile: Profile) {
        *self.gate.write() = (profile, CapabilityGate::profile(profile));
    }

    fn dispatch_public(&self, data: &Value) {
        let Some((name, data)) = data
            .as_array()
            .and_then(|pair| Some((pair.first()?.as_str()?, pair.get(1).cloned().unwrap_or_default())))
        else {
            warn!(%data, "Malformed public event");
            return;
        };

        let allowed = self.gate.read().1.allows_event(name);
        if !allowed {
            debug!(event = name, "Dropping event not allowed by profile");
            return;
        }

        if name == "error" {
            if let Some(error) = data.get("error") {
                let error = MessengerError::from_remote(error.clone());
                let listeners: Vec<ErrorListener> = self.error_listeners.read().clone();
                for listener in &listeners {
                    listener(&error);
                }
                return;
            }
        }
        self.events.emit(name, &Payload::new(data));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_command_names_match_capability_keys() {
        let names: Vec<&str> = ChatKitCommand::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), 11);
        for name in names {
            assert!(
                chatkit_protocol::capabilities::BASE_ALLOWLIST.contains(&format!("command.{name}").as_str()),
                "{name} missing from base allow-list"
            );
        }
    }

    #[test]
    fn test_display_is_leaf_name() {
        assert_eq!(ChatKitCommand::SetThreadId.to_string(), "setThreadId");
    }
}

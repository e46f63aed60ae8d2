//! Capability profiles.
//!
//! A profile is a static allow/deny rule set over prefixed keys such as
//! `command.sendUserMessage` or `error.HttpError`. Resolving a profile removes
//! every denied key from the allowed keys and buckets the rest by prefix.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::envelope::command_leaf_name;
use crate::error::{ChatKitError, ErrorKind, ProtocolError};

/// Keys every profile starts from.
pub const BASE_ALLOWLIST: &[&str] = &[
    // commands
    "command.setOptions",
    "command.sendUserMessage",
    "command.setComposerValue",
    "command.setThreadId",
    "command.focusComposer",
    "command.fetchUpdates",
    "command.sendCustomAction",
    "command.showHistory",
    "command.hideHistory",
    "command.shareThread",
    "command.setTrainingOptOut",
    // events
    "event.ready",
    "event.error",
    "event.log",
    "event.response.start",
    "event.response.end",
    "event.response.stop",
    "event.thread.change",
    "event.tool.change",
    "event.thread.load.start",
    "event.thread.load.end",
    "event.deeplink",
    "event.effect",
    // errors
    "error.StreamError",
    "error.StreamEventParsingError",
    "error.WidgetItemError",
    "error.InitialThreadLoadError",
    "error.FileAttachmentError",
    "error.HistoryViewError",
    "error.FatalAppError",
    "error.IntegrationError",
    "error.EntitySearchError",
    "error.DomainVerificationRequestError",
    // backend
    "backend.threads.get_by_id",
    "backend.threads.list",
    "backend.threads.update",
    "backend.threads.delete",
    "backend.threads.create",
    "backend.threads.add_user_message",
    "backend.threads.add_client_tool_output",
    "backend.threads.retry_after_item",
    "backend.threads.custom_action",
    "backend.attachments.create",
    "backend.attachments.get_preview",
    "backend.attachments.delete",
    "backend.items.list",
    "backend.items.feedback",
    // thread items
    "thread.item.generated_image",
    "thread.item.user_message",
    "thread.item.assistant_message",
    "thread.item.client_tool_call",
    "thread.item.widget",
    "thread.item.task",
    "thread.item.workflow",
    "thread.item.end_of_turn",
    // widgets
    "widget.Basic",
    "widget.Card",
    "widget.ListView",
    "widget.ListViewItem",
    "widget.Badge",
    "widget.Box",
    "widget.Row",
    "widget.Col",
    "widget.Button",
    "widget.Caption",
    "widget.Chart",
    "widget.Checkbox",
    "widget.DatePicker",
    "widget.Divider",
    "widget.Form",
    "widget.Icon",
    "widget.Image",
    "widget.Input",
    "widget.Label",
    "widget.Markdown",
    "widget.RadioGroup",
    "widget.Select",
    "widget.Spacer",
    "widget.Text",
    "widget.Textarea",
    "widget.Title",
    "widget.Transition",
];

/// Keys removed from every profile unless it says otherwise.
pub const BASE_DENYLIST: &[&str] = &[
    // commands
    "command.shareThread",
    "command.setTrainingOptOut",
    // events
    "event.thread.restore",
    "event.message.share",
    "event.image.download",
    "event.history.open",
    "event.history.close",
    "event.log.chatgpt",
    // internal errors
    "error.HttpError",
    "error.NetworkError",
    "error.UnhandledError",
    "error.UnhandledPromiseRejectionError",
    "error.StreamEventHandlingError",
    "error.StreamStopError",
    "error.ThreadRenderingError",
    "error.IntlError",
    "error.AppError",
    // backend
    "backend.threads.stop",
    "backend.threads.share",
    "backend.threads.create_from_shared",
    "backend.threads.init",
    "backend.attachments.process",
    // widgets
    "widget.CardCarousel",
    "widget.Favicon",
    "widget.CardLinkItem",
    "widget.Map",
];

/// Named capability profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Profile {
    #[default]
    #[serde(rename = "chatkit")]
    ChatKit,
}

impl Profile {
    pub const ALL: [Self; 1] = [Self::ChatKit];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ChatKit => "chatkit",
        }
    }

    /// Static rule set for the profile.
    #[must_use]
    pub fn rules(self) -> Rules {
        match self {
            Self::ChatKit => Rules::new(
                BASE_ALLOWLIST
                    .iter()
                    .copied()
                    .chain(["thread.item.image_generation"]),
                BASE_DENYLIST.iter().copied(),
            ),
        }
    }

    /// Resolve the profile's effective capabilities.
    #[must_use]
    pub fn capabilities(self) -> Capabilities {
        Capabilities::resolve(self)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.name() == s)
            .ok_or_else(|| ProtocolError::unknown_profile(s))
    }
}

/// Allow/deny rule set. Denial always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl Rules {
    pub fn new<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
            deny: deny.into_iter().map(Into::into).collect(),
        }
    }

    /// `allow - deny`.
    #[must_use]
    pub fn effective(&self) -> BTreeSet<&str> {
        let denied: BTreeSet<&str> = self.deny.iter().map(String::as_str).collect();
        self.allow
            .iter()
            .map(String::as_str)
            .filter(|key| !denied.contains(key))
            .collect()
    }
}

/// A capability key split into its category and leaf name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKey {
    Command(String),
    Event(String),
    Backend(String),
    ThreadItem(String),
    Error(String),
    Widget(String),
}

impl CapabilityKey {
    /// Split a prefixed key. Unknown prefixes yield `None`.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let prefixes: [(&str, fn(String) -> Self); 6] = [
            ("command.", Self::Command),
            ("event.", Self::Event),
            ("backend.", Self::Backend),
            ("thread.item.", Self::ThreadItem),
            ("error.", Self::Error),
            ("widget.", Self::Widget),
        ];
        prefixes.into_iter().find_map(|(prefix, build)| {
            key.strip_prefix(prefix).map(|leaf| build(leaf.to_string()))
        })
    }

    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Command(_) => "command.",
            Self::Event(_) => "event.",
            Self::Backend(_) => "backend.",
            Self::ThreadItem(_) => "thread.item.",
            Self::Error(_) => "error.",
            Self::Widget(_) => "widget.",
        }
    }

    #[must_use]
    pub fn leaf(&self) -> &str {
        match self {
            Self::Command(leaf)
            | Self::Event(leaf)
            | Self::Backend(leaf)
            | Self::ThreadItem(leaf)
            | Self::Error(leaf)
            | Self::Widget(leaf) => leaf,
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix(), self.leaf())
    }
}

/// Effective capabilities of a profile, bucketed by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub commands: BTreeSet<String>,
    pub events: BTreeSet<String>,
    pub backend: BTreeSet<String>,
    pub thread_items: BTreeSet<String>,
    pub errors: BTreeSet<String>,
    pub widgets: BTreeSet<String>,
}

impl Capabilities {
    /// Resolve a named profile.
    #[must_use]
    pub fn resolve(profile: Profile) -> Self {
        Self::from_rules(&profile.rules())
    }

    /// Resolve an arbitrary rule set.
    #[must_use]
    pub fn from_rules(rules: &Rules) -> Self {
        let mut capabilities = Self::default();
        for key in rules.effective().into_iter().filter_map(CapabilityKey::parse) {
            match key {
                CapabilityKey::Command(leaf) => capabilities.commands.insert(leaf),
                CapabilityKey::Event(leaf) => capabilities.events.insert(leaf),
                CapabilityKey::Backend(leaf) => capabilities.backend.insert(leaf),
                CapabilityKey::ThreadItem(leaf) => capabilities.thread_items.insert(leaf),
                CapabilityKey::Error(leaf) => capabilities.errors.insert(leaf),
                CapabilityKey::Widget(leaf) => capabilities.widgets.insert(leaf),
            };
        }
        capabilities
    }

    #[must_use]
    pub fn allows_command(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    #[must_use]
    pub fn allows_event(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    /// Whether errors of `kind` are public under this profile.
    #[must_use]
    pub fn allows_error(&self, kind: ErrorKind) -> bool {
        self.errors.contains(kind.name())
    }

    #[must_use]
    pub fn allows_backend(&self, operation: &str) -> bool {
        self.backend.contains(operation)
    }

    #[must_use]
    pub fn allows_thread_item(&self, item_type: &str) -> bool {
        self.thread_items.contains(item_type)
    }

    #[must_use]
    pub fn allows_widget(&self, widget: &str) -> bool {
        self.widgets.contains(widget)
    }
}

/// Authorization applied to commands and events on one side of the boundary.
#[derive(Debug, Clone, Default)]
pub enum CapabilityGate {
    /// Everything passes.
    #[default]
    AllowAll,
    /// Only what the profile resolves to.
    Profile {
        profile: Profile,
        capabilities: Arc<Capabilities>,
    },
}

impl CapabilityGate {
    /// Gate restricted to `profile`.
    #[must_use]
    pub fn profile(profile: Profile) -> Self {
        Self::Profile {
            profile,
            capabilities: Arc::new(Capabilities::resolve(profile)),
        }
    }

    #[must_use]
    pub const fn profile_name(&self) -> Option<&'static str> {
        match self {
            Self::AllowAll => None,
            Self::Profile { profile, .. } => Some(profile.name()),
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> Option<&Capabilities> {
        match self {
            Self::AllowAll => None,
            Self::Profile { capabilities, .. } => Some(capabilities),
        }
    }

    /// Guard for an outbound command, by leaf name (`sendUserMessage`).
    ///
    /// # Errors
    /// Returns an `IntegrationError` naming the command and profile when the
    /// profile does not allow it.
    #[track_caller]
    pub fn check_command(&self, command: &str) -> Result<(), ChatKitError> {
        match self {
            Self::AllowAll => Ok(()),
            Self::Profile {
                profile,
                capabilities,
            } => {
                if capabilities.allows_command(command) {
                    Ok(())
                } else {
                    Err(ChatKitError::integration(format!(
                        "ChatKit command \"{command}\" is not available for the \"{profile}\" profile."
                    )))
                }
            }
        }
    }

    /// Whether an inbound command, by wire name (`onSendUserMessage`), may run.
    #[must_use]
    pub fn can_receive_command(&self, wire_name: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Profile { capabilities, .. } => command_leaf_name(wire_name)
                .is_some_and(|leaf| capabilities.allows_command(&leaf)),
        }
    }

    /// Error answered to an inbound command that [`can_receive_command`](Self::can_receive_command) refused.
    #[track_caller]
    #[must_use]
    pub fn unsupported_command(&self, wire_name: &str) -> ChatKitError {
        let command = command_leaf_name(wire_name).unwrap_or_else(|| wire_name.to_string());
        match self.profile_name() {
            Some(profile) => ChatKitError::integration(format!(
                "ChatKit command \"{command}\" is not available for the \"{profile}\" profile."
            )),
            None => ChatKitError::integration(format!(
                "ChatKit command \"{command}\" is not supported."
            )),
        }
    }

    #[must_use]
    pub fn allows_event(&self, event: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Profile { capabilities, .. } => capabilities.allows_event(event),
        }
    }

    #[must_use]
    pub fn allows_error(&self, kind: ErrorKind) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Profile { capabilities, .. } => capabilities.allows_error(kind),
        }
    }
}

impl From<Profile> for CapabilityGate {
    fn from(profile: Profile) -> Self {
        Self::profile(profile)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_deny_overrides_allow() {
        let capabilities = Capabilities::resolve(Profile::ChatKit);

        assert!(BASE_ALLOWLIST.contains(&"command.shareThread"));
        assert!(!capabilities.allows_command("shareThread"));
        assert!(!capabilities.allows_command("setTrainingOptOut"));
        assert!(capabilities.allows_command("sendUserMessage"));
    }

    #[test]
    fn test_keys_are_bucketed_without_prefix() {
        let capabilities = Capabilities::resolve(Profile::ChatKit);

        assert!(capabilities.allows_event("thread.change"));
        assert!(!capabilities.allows_event("history.open"));
        assert!(capabilities.allows_backend("threads.list"));
        assert!(capabilities.allows_thread_item("image_generation"));
        assert!(capabilities.allows_widget("Card"));
        assert!(!capabilities.allows_widget("Map"));
    }

    #[test]
    fn test_internal_errors_are_not_public() {
        let capabilities = Capabilities::resolve(Profile::ChatKit);

        assert!(capabilities.allows_error(ErrorKind::Integration));
        assert!(capabilities.allows_error(ErrorKind::Stream));
        assert!(!capabilities.allows_error(ErrorKind::Http));
        assert!(!capabilities.allows_error(ErrorKind::Network));
        assert!(!capabilities.allows_error(ErrorKind::Unhandled));
    }

    #[test]
    fn test_unknown_prefixes_are_ignored() {
        let rules = Rules::new(["command.a", "tool.b", "thread.item.c"], Vec::<String>::new());
        let capabilities = Capabilities::from_rules(&rules);

        assert_eq!(capabilities.commands.len(), 1);
        assert_eq!(capabilities.thread_items.len(), 1);
        assert!(capabilities.events.is_empty());
    }

    #[test]
    fn test_capability_key_parse_and_display() {
        let key = CapabilityKey::parse("thread.item.widget").unwrap();
        assert_eq!(key, CapabilityKey::ThreadItem("widget".to_string()));
        assert_eq!(key.to_string(), "thread.item.widget");
        assert_eq!(CapabilityKey::parse("thread.widget"), None);
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("chatkit".parse::<Profile>().unwrap(), Profile::ChatKit);
        assert!(matches!(
            "agent".parse::<Profile>(),
            Err(ProtocolError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn test_check_command_names_command_and_profile() {
        let gate = CapabilityGate::profile(Profile::ChatKit);

        let error = gate.check_command("shareThread").unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Integration);
        assert_eq!(
            error.message(),
            "ChatKit command \"shareThread\" is not available for the \"chatkit\" profile."
        );
        assert!(gate.check_command("setThreadId").is_ok());
    }

    #[test]
    fn test_can_receive_command_uses_wire_names() {
        let gate = CapabilityGate::profile(Profile::ChatKit);

        assert!(gate.can_receive_command("onSendUserMessage"));
        assert!(!gate.can_receive_command("onShareThread"));
        assert!(!gate.can_receive_command("sendUserMessage"));
        assert!(CapabilityGate::AllowAll.can_receive_command("onAnything"));
    }

    #[test]
    fn test_unsupported_command_message() {
        let gate = CapabilityGate::profile(Profile::ChatKit);
        let error = gate.unsupported_command("onSubmit");
        assert!(error.message().contains("\"submit\""));
        assert!(error.message().contains("\"chatkit\""));
    }

    #[test]
    fn test_capabilities_serialize_camel_case() {
        let value = serde_json::to_value(Capabilities::resolve(Profile::ChatKit)).unwrap();
        assert!(value.get("threadItems").is_some());
        assert!(value.get("thread_items").is_none());
    }
}

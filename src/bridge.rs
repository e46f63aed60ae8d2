//! In-process host/frame pair.
//!
//! # Message Flow
//!
//! ```text
//! frame.fetch(url) ──▶ frame window ──post──▶ host window ──▶ host Messenger
//!                                                               │ ReqwestFetcher
//!                                                               ▼
//! ResponseFuture ◀── frame Messenger ◀──post── response ◀── HTTP origin
//! ```
//!
//! The host serves proxied requests over the network and drives the frame
//! through [`ChatKitHost`]. The frame runs its commands from a
//! [`CommandTable`] gated by the configured profile.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::fmt;
use std::sync::Arc;

use chatkit_messenger::{
    ChatKitHost, CommandTable, FrameWindow, Messenger, MessengerConfig, ReqwestFetcher, RequestInit,
    ResponseFuture, Result, fixed_target,
};
use chatkit_protocol::{CapabilityGate, ChatKitError, EventSourceMessage};
use tracing::info;

use crate::config::BridgeConfig;

/// A connected host and frame sharing one process.
#[derive(Clone)]
pub struct Bridge {
    host: ChatKitHost,
    frame: Messenger,
}

impl Bridge {
    /// Build both sides from `config` and start listening.
    ///
    /// `frame_handlers` serves the commands the host sends to the frame.
    ///
    /// # Errors
    /// Returns [`MessengerError::NoRuntime`](chatkit_messenger::MessengerError::NoRuntime)
    /// outside a Tokio runtime.
    pub fn connect(config: &BridgeConfig, frame_handlers: CommandTable) -> Result<Self> {
        let host_window = FrameWindow::new(config.host_origin.clone());
        let frame_window = FrameWindow::new(config.frame_origin.clone());

        let fetcher = match &config.base_url {
            Some(base_url) => ReqwestFetcher::default().with_base_url(base_url.clone()),
            None => ReqwestFetcher::default(),
        };

        let host_messenger = Messenger::builder(host_window.clone(), fixed_target(frame_window.clone()))
            .config(side_config(&config.messenger, &config.frame_origin))
            .fetcher(Arc::new(fetcher))
            .build();
        let frame = Messenger::builder(frame_window, fixed_target(host_window))
            .config(side_config(&config.messenger, &config.host_origin))
            .handlers(frame_handlers)
            .receive_commands(CapabilityGate::profile(config.profile))
            .build();

        host_messenger.connect()?;
        frame.connect()?;
        info!(
            host_origin = %config.host_origin,
            frame_origin = %config.frame_origin,
            profile = %config.profile,
            "Bridge connected"
        );

        Ok(Self {
            host: ChatKitHost::new(host_messenger, config.profile),
            frame,
        })
    }

    /// Host-side command facade.
    #[must_use]
    pub const fn host(&self) -> &ChatKitHost {
        &self.host
    }

    /// Frame-side messenger.
    #[must_use]
    pub const fn frame(&self) -> &Messenger {
        &self.frame
    }

    /// Have the host run `url` on the frame's behalf.
    #[track_caller]
    pub fn fetch(&self, url: impl Into<String>, init: RequestInit) -> ResponseFuture {
        self.frame.fetch(url, init)
    }

    /// Have the host open an event stream on the frame's behalf.
    ///
    /// # Errors
    /// Returns an `IntegrationError` for a form body.
    #[track_caller]
    pub fn stream<F>(
        &self,
        url: impl Into<String>,
        init: RequestInit,
        on_message: F,
    ) -> std::result::Result<ResponseFuture, ChatKitError>
    where
        F: Fn(EventSourceMessage) + Send + Sync + 'static,
    {
        self.frame.fetch_event_source(url, init, on_message)
    }

    /// Disconnect both sides, rejecting anything still pending.
    pub fn disconnect(&self) {
        self.frame.disconnect();
        self.host.messenger().disconnect();
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("host", &self.host)
            .field("frame", &self.frame)
            .finish()
    }
}

fn side_config(shared: &MessengerConfig, target_origin: &str) -> MessengerConfig {
    MessengerConfig {
        target_origin: target_origin.to_string(),
        ..shared.clone()
    }
}

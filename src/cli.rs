//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// ChatKit bridge
#[derive(Parser, Debug)]
#[command(name = "chatkit-bridge")]
#[command(version)]
#[command(about = "Typed RPC, events and proxied fetch across the ChatKit host/frame boundary")]
#[command(
    long_about = "Inspects capability profiles, encodes frame URLs, and runs requests through an in-process host/frame pair the same way the embedded frame would."
)]
pub struct Cli {
    /// Config file (TOML, or JSON by extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective capabilities of a profile
    Capabilities {
        /// Profile name (defaults to the configured profile)
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Build the frame URL carrying options in its fragment
    FrameUrl {
        /// Frame page URL
        base: String,

        /// Options as JSON
        #[arg(short, long, default_value = "{}")]
        options: String,

        /// Referrer origin (defaults to the configured host origin)
        #[arg(short, long)]
        referrer: Option<String>,
    },

    /// Decode the parameters carried by a frame URL
    DecodeFrameParams {
        /// Frame URL with an encoded fragment
        url: String,
    },

    /// Run a request through the host on behalf of the frame
    Fetch(RequestArgs),

    /// Open an event stream through the host and print each message
    Stream(RequestArgs),
}

/// Request options shared by `fetch` and `stream`.
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// URL, absolute or relative to the configured base URL
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short, long, conflicts_with = "form")]
    pub data: Option<String>,

    /// Form field as `name=value`, or `name=@path` for a file (repeatable)
    #[arg(short = 'F', long)]
    pub form: Vec<String>,
}

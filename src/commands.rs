//! CLI command handlers.
//!
//! The dispatcher resolves configuration once and passes it down.
//! Results are printed as JSON on stdout.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;

use anyhow::{Context, Result, bail};
use chatkit_messenger::{AbortController, CommandTable, RequestInit, ResponseFuture};
use chatkit_protocol::{Capabilities, FileBlob, FormData, FormValue, Profile, decode_frame_params, frame_url};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

use crate::bridge::Bridge;
use crate::cli::{Cli, Commands, RequestArgs};
use crate::config::BridgeConfig;

/// Execute a CLI command.
///
/// This is the main command dispatcher that routes to the appropriate handler.
pub async fn execute_command(cli: Cli) -> Result<()> {
    let config = BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Capabilities { profile } => cmd_capabilities(&config, profile.as_deref()),

        Commands::FrameUrl {
            base,
            options,
            referrer,
        } => cmd_frame_url(&config, &base, &options, referrer),

        Commands::DecodeFrameParams { url } => cmd_decode_frame_params(&url),

        Commands::Fetch(args) => cmd_fetch(&config, &args).await,

        Commands::Stream(args) => cmd_stream(&config, &args).await,
    }
}

fn cmd_capabilities(config: &BridgeConfig, profile: Option<&str>) -> Result<()> {
    let profile = match profile {
        Some(name) => name.parse::<Profile>()?,
        None => config.profile,
    };
    print_json(&Capabilities::resolve(profile))
}

fn cmd_frame_url(config: &BridgeConfig, base: &str, options: &str, referrer: Option<String>) -> Result<()> {
    let base = Url::parse(base).with_context(|| format!("Invalid frame URL {base}"))?;
    let options: Value = serde_json::from_str(options).context("Options must be JSON")?;

    let mut params = config.frame_params(options);
    if let Some(referrer) = referrer {
        params.referrer = referrer;
    }
    println!("{}", frame_url(&base, &params)?);
    Ok(())
}

fn cmd_decode_frame_params(url: &str) -> Result<()> {
    let url = Url::parse(url).with_context(|| format!("Invalid frame URL {url}"))?;
    print_json(&decode_frame_params(&url)?)
}

async fn cmd_fetch(config: &BridgeConfig, args: &RequestArgs) -> Result<()> {
    let bridge = Bridge::connect(config, CommandTable::new())?;
    let controller = AbortController::new();
    let init = request_init(args)?.signal(controller.signal());

    info!(url = %args.url, method = %args.method, "Fetching through host");
    let result = until_interrupted(bridge.fetch(args.url.clone(), init), &controller).await;
    bridge.disconnect();

    print_json(&result.context("Request failed")?)
}

async fn cmd_stream(config: &BridgeConfig, args: &RequestArgs) -> Result<()> {
    if !args.form.is_empty() {
        bail!("Event streams do not take form bodies");
    }
    let bridge = Bridge::connect(config, CommandTable::new())?;
    let controller = AbortController::new();
    let init = request_init(args)?.signal(controller.signal());

    info!(url = %args.url, "Streaming through host");
    let response = bridge.stream(args.url.clone(), init, |message| {
        match serde_json::to_string(&message) {
            Ok(line) => println!("{line}"),
            Err(error) => warn!(%error, "Failed to encode stream message"),
        }
    })?;
    let result = until_interrupted(response, &controller).await;
    bridge.disconnect();

    result.context("Stream failed")?;
    info!("Stream ended");
    Ok(())
}

/// Await `response`, aborting it on Ctrl+C and waiting for the other side
/// to settle it.
async fn until_interrupted(
    response: ResponseFuture,
    controller: &AbortController,
) -> chatkit_messenger::Result<Value> {
    tokio::pin!(response);
    tokio::select! {
        result = &mut response => result,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, aborting request");
            controller.abort(None);
            response.await
        }
    }
}

fn request_init(args: &RequestArgs) -> Result<RequestInit> {
    let mut init = RequestInit::new().method(args.method.clone());
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        init = init.header(name, value);
    }
    if let Some(data) = &args.data {
        init = init.body(data.clone());
    }
    if !args.form.is_empty() {
        let form = args
            .form
            .iter()
            .map(|field| parse_form_field(field))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .fold(FormData::new(), |form, (name, value)| form.with(name, value));
        init = init.form(form);
    }
    Ok(init)
}

/// Parse `Name: value`.
fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("Header {raw:?} is not of the form `Name: value`");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Header {raw:?} has no name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse `name=value`, or `name=@path` to attach a file.
fn parse_form_field(raw: &str) -> Result<(String, FormValue)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("Form field {raw:?} is not of the form `name=value`");
    };
    let value = match value.strip_prefix('@') {
        Some(path) => FormValue::File(read_file_blob(Path::new(path))?),
        None => FormValue::from(value),
    };
    Ok((name.to_string(), value))
}

fn read_file_blob(path: &Path) -> Result<FileBlob> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(FileBlob::new(name, "application/octet-stream", data))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

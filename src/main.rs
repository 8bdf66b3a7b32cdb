//! SOAP bus client binary.
//!
//! Run with: `soap-bus-client --config config.yaml --call get_account.yaml --identity X123`

use anyhow::{bail, Context, Result};
use clap::Parser;
use soap_bus_client::{BusClient, BusConfig, CallProperties, XPathElement};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Fill a request template and send it as a SOAP call.
///
/// Body edits apply to the direct children of the request template's root
/// element, in the order: --set, --list, --delete.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to call properties file (YAML)
    #[arg(long)]
    call: PathBuf,

    /// Identity of the caller (initiator/originator id)
    #[arg(short, long)]
    identity: String,

    /// Set an element's text: NAME=VALUE
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Expand a placeholder into one element per value: NAME=V1,V2 (empty removes it)
    #[arg(long = "list", value_name = "NAME=V1,V2")]
    list: Vec<String>,

    /// Remove an element: NAME
    #[arg(long = "delete", value_name = "NAME")]
    delete: Vec<String>,

    /// Print the assembled envelope instead of sending it
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Edits applied to the request body.
#[derive(Debug, Default)]
struct BodyEdits {
    set: Vec<(String, String)>,
    list: Vec<(String, Vec<String>)>,
    delete: Vec<String>,
}

impl BodyEdits {
    fn from_args(args: &Args) -> Result<Self> {
        let set = args
            .set
            .iter()
            .map(|arg| split_assignment(arg))
            .collect::<Result<Vec<_>>>()?;

        let list = args
            .list
            .iter()
            .map(|arg| {
                let (name, values) = split_assignment(arg)?;
                let values = if values.is_empty() {
                    Vec::new()
                } else {
                    values.split(',').map(str::to_string).collect()
                };
                Ok((name, values))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            set,
            list,
            delete: args.delete.clone(),
        })
    }

    fn apply(&self, doc: &mut XPathElement<'_>) {
        let Some(mut root) = doc.root_mut() else {
            return;
        };
        for (name, value) in &self.set {
            root.set_text(name, value);
        }
        for (name, values) in &self.list {
            root.clone_with_text_values(name, values.as_slice());
        }
        for name in &self.delete {
            root.delete(name);
        }
    }
}

fn split_assignment(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => bail!("Expected NAME=VALUE, got {:?}", arg),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting SOAP bus client v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    // Load configuration
    let config = if args.config.exists() {
        BusConfig::load(&args.config).context("Failed to load config file")?
    } else {
        info!("Config file not found, using defaults");
        BusConfig::default()
    };

    info!(
        load_paths = ?config.templates.load_paths,
        invoker_id = %config.context.invoker_id,
        "Configuration loaded"
    );

    let call_yaml = std::fs::read_to_string(&args.call)
        .with_context(|| format!("Failed to read call file {}", args.call.display()))?;
    let props: CallProperties =
        serde_yaml::from_str(&call_yaml).context("Failed to parse call file")?;

    let edits = BodyEdits::from_args(&args)?;
    let client = BusClient::new(Arc::new(config));

    if args.dry_run {
        let envelope = client
            .build_request(&props, &args.identity, |doc| edits.apply(doc))
            .context("Failed to build SOAP request")?;
        println!("{}", envelope.to_xml().context("Failed to render SOAP request")?);
        return Ok(());
    }

    let response = client
        .call(&props, &args.identity, |doc| edits.apply(doc))
        .with_context(|| format!("SOAP call to {} failed", props.end_point))?;

    if response.is_fault() {
        bail!(
            "SOAP fault [{}]: {}",
            response.fault_code().unwrap_or_default(),
            response.fault_string().unwrap_or_default()
        );
    }

    println!(
        "{}",
        response
            .response()
            .to_xml()
            .context("Failed to render SOAP response")?
    );
    Ok(())
}

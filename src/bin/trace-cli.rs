use std::path::PathBuf;

use clap::Parser;

use traced_thrift::config::loader::load_config;
use traced_thrift::config::AppConfig;
use traced_thrift::demo::call_hello;
use traced_thrift::observability::logging::init_logging;
use traced_thrift::trace::{self, CallContext, Sampler, TraceId};
use traced_thrift::Client;

#[derive(Parser)]
#[command(name = "trace-cli")]
#[command(about = "Call Greeter.hello and report the negotiated trace mode", long_about = None)]
struct Cli {
    /// TOML configuration file; only the `client` and `tracing` sections are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address, overriding `client.address`.
    #[arg(short, long)]
    address: Option<String>,

    /// Client id sent in request headers, overriding `client.client_id`.
    #[arg(long)]
    client_id: Option<String>,

    /// Context entries to broadcast, as key=value.
    #[arg(long = "context", value_parser = parse_context)]
    contexts: Vec<(String, String)>,

    /// Name to greet.
    #[arg(default_value = "world")]
    name: String,
}

fn parse_context(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(address) = cli.address {
        config.client.address = address;
    }
    if cli.client_id.is_some() {
        config.client.client_id = cli.client_id;
    }
    init_logging(&config.observability);

    let client = Client::connect(&config.client, &config.tracing).await?;

    let root = TraceId::root(Sampler::new(config.tracing.sample_rate).sample());
    let outcome = trace::scope(CallContext::with_parent(root), async {
        for (key, value) in &cli.contexts {
            trace::set_broadcast(key.as_bytes(), value.as_bytes());
        }
        let reply = call_hello(&client, &cli.name).await;
        (reply, trace::last_response())
    })
    .await;

    let (reply, response) = outcome;
    let reply = reply?;

    println!("reply: {}", reply);
    println!("mode:  {}", client.upgrade_state());
    println!("trace: {:016x} (sampled: {})", root.trace_id(), root.sampled());
    match response {
        Some(header) => println!("response contexts: {}", header.contexts.len()),
        None => println!("response contexts: none"),
    }

    Ok(())
}

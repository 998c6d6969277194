//! # Verity Flow CLI
//!
//! Runs the issuer workflow against a simulated remote agent: issuer setup,
//! connection, schema and credential definition, credential issuance and a
//! proof request, with a spinner per step.
//!
//! ```bash
//! # Fresh context in the default configuration directory
//! verity-flow
//!
//! # Reuse the persisted context and log routing decisions
//! verity-flow --reuse-context --log-level debug
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use verity_flow::{
    actor::InboundRouter,
    adapter::{
        codec::JsonFrameCodec,
        loopback::{LoopbackTransport, ScriptedRemote},
        terminal::SpinnerObserver
    },
    domain::error::FlowError,
    service::{config::AppConfig, session::AgentSession},
    workflow::{IssuerFlow, IssuerSettings, simulated_verity}
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct FlowCli {
    /// Configuration directory holding settings.yaml and the persisted context
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Reuse the persisted agent context instead of creating a new one
    #[arg(long)]
    reuse_context: bool,

    /// Deadline for each awaited reply, overriding the settings file
    #[arg(long)]
    reply_timeout_secs: Option<u64>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Simulated delay before each reply from the remote agent
    #[arg(long, default_value_t = 300)]
    reply_delay_ms: u64
}

#[tokio::main]
async fn main() -> Result<(), FlowError> {
    let cli = FlowCli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut config = match &cli.config_dir {
        Some(dir) => AppConfig::load_from_dir(dir)?,
        None => AppConfig::init()?
    };
    if let Some(secs) = cli.reply_timeout_secs {
        config.reply_timeout = Duration::from_secs(secs);
    }

    let context = config.reuse_or_create_context(cli.reuse_context)?;
    println!("Using Url: {}", context.verity_url);
    println!("Using Webhook: {}", context.endpoint_url.clone().unwrap_or_else(|| config.default_endpoint_url()));

    let codec = Arc::new(JsonFrameCodec::new());
    let (transport, frames) = LoopbackTransport::new(Arc::new(simulated_verity(ScriptedRemote::new())), codec.clone());
    let transport = transport.with_reply_delay(Duration::from_millis(cli.reply_delay_ms));

    let session = Arc::new(
        AgentSession::new(context, Arc::new(transport), codec).with_reply_timeout(config.reply_timeout)
    );
    let router = InboundRouter::spawn(session.clone()).await?;
    let pump = InboundRouter::pump(router.clone(), frames);

    let observer = SpinnerObserver::new();
    let result = IssuerFlow::new(&session, IssuerSettings::default(), &observer).run().await;

    session.close();
    router.stop(None);
    pump.abort();

    let outcome = result?;
    config.save_context(session.context())?;

    println!();
    println!("Issuer DID:       {}", outcome.issuer.did);
    println!("Relationship DID: {}", outcome.relationship_did);
    println!("Schema Id:        {}", outcome.schema_id);
    println!("Cred Def Id:      {}", outcome.cred_def_id);
    println!("Proof:            {}", outcome.proof);
    println!("Context saved to {}", config.context_path.display());

    Ok(())
}

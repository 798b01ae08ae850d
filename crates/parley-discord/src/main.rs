use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use serenity::all::{Client, GatewayIntents};
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use parley_core::agent::{AgentConfig, ConversationAgent};
use parley_core::archiver::MessageArchiver;
use parley_core::config::Config;
use parley_core::embedding::HttpEmbeddingClient;
use parley_core::llm::{HttpLlmClient, LlmQueue};
use parley_core::persistence::PersistenceRegistry;
use parley_core::semantic::SemanticIndexRegistry;

use parley_discord::{DiscordGateway, ParleyEventHandler};

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "A chat-participation agent with archival memory and semantic recall")]
#[command(version)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "parley.cfg")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Directory under which per-server databases are created.
    #[arg(long, default_value = "./data")]
    working_root: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();
    std::fs::create_dir_all(&args.working_root).into_diagnostic()?;

    let filter = if args.debug { "debug" } else { "info" };
    let file_appender = tracing_appender::rolling::daily(&args.working_root, "parley.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file_writer.and(std::io::stderr))
        .init();

    info!(config = %args.config.display(), "starting parley");

    let config = Config::load(&args.config)?;

    // OPEN_API_KEY and DISCORD_BOT_KEY are the two recognised, typed keys
    // (`SPEC_FULL.md` config section); everything else is still looked up
    // through the same config but isn't given its own accessor.
    let discord_token = config.require("DISCORD_BOT_KEY")?;
    let llm_endpoint = config.require("LLM_ENDPOINT")?;
    let llm_api_key = config.require("OPEN_API_KEY")?;
    let prefilter_model = config.require("PREFILTER_MODEL")?;
    let generator_model = config.require("GENERATOR_MODEL")?;
    let embedding_endpoint = config.require("EMBEDDING_ENDPOINT")?;
    let embedding_api_key = config.require("EMBEDDING_API_KEY")?;
    let prefilter_instructions = config.require("PREFILTER_INSTRUCTIONS")?;
    let generator_instructions = config.require("GENERATOR_INSTRUCTIONS")?;

    let persistence = Arc::new(PersistenceRegistry::new(args.working_root.clone()));
    let semantic = Arc::new(SemanticIndexRegistry::new());
    let embedder = Arc::new(HttpEmbeddingClient::new(embedding_endpoint, embedding_api_key));
    let archiver = Arc::new(MessageArchiver::new(persistence, semantic, embedder));

    let llm_client = Arc::new(HttpLlmClient::new(llm_endpoint, llm_api_key));
    let llm_queue = LlmQueue::spawn(llm_client);

    let http = Arc::new(serenity::http::Http::new(discord_token));
    let gateway = Arc::new(DiscordGateway::new(http));

    let agent_config = AgentConfig::new(
        prefilter_model.to_string(),
        generator_model.to_string(),
        prefilter_instructions.to_string(),
        generator_instructions.to_string(),
    );
    let agent = Arc::new(ConversationAgent::new(
        archiver,
        llm_queue,
        gateway.clone(),
        agent_config,
    ));

    let handler = ParleyEventHandler::new(agent, gateway);
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::DIRECT_MESSAGES;

    let mut client = Client::builder(discord_token, intents)
        .event_handler(handler)
        .await
        .into_diagnostic()?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shard_manager.shutdown_all().await;
    });

    client.start().await.into_diagnostic()?;
    Ok(())
}

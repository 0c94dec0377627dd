//! `confmatch`: precompute and query attendee matches from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use confmatch_embeddings::{CachedProvider, EmbeddingProvider, GeminiProvider};
use confmatch_engine::{
    AttendeeId, AttendeeMatches, CorpusStore, EntityId, EntityMatches, JsonCorpusStore,
    MatchingConfig, MatchingEngine, PipelineOptions, QueryType, RankedMatch,
};
use confmatch_judge::GeminiJudge;

/// Match what conference attendees offer with what others request.
#[derive(Parser)]
#[command(name = "confmatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the corpus and match sets
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic offerings and persist match sets for every statement
    Precompute {
        /// Delete existing match sets first
        #[arg(long)]
        clear: bool,

        /// Skip statements that already have a match set
        #[arg(long)]
        resume: bool,

        /// Embed statements that have no embedding yet
        #[arg(long)]
        embed_missing: bool,

        /// Maximum external calls in flight
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Search the corpus with free text
    Search {
        /// What the text is: `request` or `offering`
        kind: QueryType,

        text: String,

        /// Attendee id whose statements are left out
        #[arg(long)]
        exclude: Option<u64>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show matches for an attendee or a single statement
    Lookup {
        #[command(subcommand)]
        target: LookupTarget,

        /// Print JSON instead of a table
        #[arg(long, global = true)]
        json: bool,
    },

    /// Show corpus and precompute counts
    Stats,

    /// Delete every persisted match set
    ClearMatches {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum LookupTarget {
    /// Attendees whose name contains NAME
    Name { name: String },

    /// One statement, as `offering:ID` or `request:ID`
    Entity { entity: EntityId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => MatchingConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MatchingConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Precompute {
            clear,
            resume,
            embed_missing,
            concurrency,
        } => {
            if let Some(concurrency) = concurrency {
                config.pipeline.concurrency = concurrency;
            }
            let options = PipelineOptions {
                clear_existing: clear,
                resume,
                embed_missing,
            };
            run_precompute(config, &options).await
        }
        Commands::Search {
            kind,
            text,
            exclude,
            json,
        } => {
            let engine = build_engine(config).await?;
            let results = engine
                .retrieve_and_rerank(&text, kind, exclude.map(AttendeeId))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_matches(&engine, &results).await;
            }
            Ok(())
        }
        Commands::Lookup { target, json } => {
            let engine = build_engine(config).await?;
            match target {
                LookupTarget::Name { name } => {
                    let found = engine.find_attendee_by_name(&name).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&found)?);
                    } else if found.is_empty() {
                        println!("No attendee matches {name:?}");
                    } else {
                        for attendee in &found {
                            print_attendee(&engine, attendee).await;
                        }
                    }
                }
                LookupTarget::Entity { entity } => {
                    let matches = engine.matches_for(entity).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&matches)?);
                    } else {
                        print_entity(&engine, &matches).await;
                    }
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let engine = build_engine(config).await?;
            let stats = engine.stats().await?;
            println!("Attendees:                {}", stats.attendees);
            println!(
                "Offerings:                {} ({} embedded)",
                stats.offerings, stats.offerings_with_embeddings
            );
            println!(
                "Requests:                 {} ({} embedded, {} with synthetic offering)",
                stats.requests, stats.requests_with_embeddings, stats.requests_with_synthetic
            );
            println!("Request match sets:       {}", stats.request_match_sets);
            println!("Offering match sets:      {}", stats.offering_match_sets);
            println!("Total matches:            {}", stats.total_matches);
            Ok(())
        }
        Commands::ClearMatches { yes } => {
            if !yes {
                bail!("refusing to delete match sets without --yes");
            }
            let store = open_store(&config).await?;
            let removed = store.clear_match_sets().await?;
            println!("Removed {removed} match sets");
            Ok(())
        }
    }
}

async fn open_store(config: &MatchingConfig) -> anyhow::Result<JsonCorpusStore> {
    JsonCorpusStore::open(&config.data_dir)
        .await
        .with_context(|| format!("failed to open corpus at {}", config.data_dir.display()))
}

fn build_provider(config: &MatchingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let mut gemini = GeminiProvider::new()
        .with_model(&config.embedding.model)
        .with_dimension(config.embedding.dimension)
        .with_timeout(config.service.request_timeout())?;
    if let Some(base_url) = &config.embedding.base_url {
        gemini = gemini.with_base_url(base_url);
    }
    if !gemini.is_available() {
        warn!("GEMINI_API_KEY is not set; embedding calls will fail");
    }
    Ok(Arc::new(CachedProvider::new(
        Arc::new(gemini),
        config.embedding.cache_max_entries,
    )))
}

fn build_judge(config: &MatchingConfig) -> anyhow::Result<Arc<GeminiJudge>> {
    let mut judge = GeminiJudge::new()
        .with_model(&config.judge.model)
        .with_timeout(config.service.request_timeout())?;
    if let Some(base_url) = &config.judge.base_url {
        judge = judge.with_base_url(base_url);
    }
    if let Some(temperature) = config.judge.temperature {
        judge = judge.with_temperature(temperature);
    }
    Ok(Arc::new(judge))
}

async fn build_engine(config: MatchingConfig) -> anyhow::Result<MatchingEngine> {
    let store = Arc::new(open_store(&config).await?);
    let provider = build_provider(&config)?;
    let judge = build_judge(&config)?;
    let timeout = config.service.request_timeout();
    let engine = MatchingEngine::new(config, store, provider, judge)
        .await
        .context("failed to start the matching engine")?;
    Ok(engine.with_rerank_timeout(timeout))
}

async fn run_precompute(config: MatchingConfig, options: &PipelineOptions) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;

    let token = CancellationToken::new();
    let pipeline = engine.pipeline().with_cancellation(token.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing calls in flight");
            token.cancel();
        }
    });

    let report = engine.precompute(&pipeline, options).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.cancelled {
        bail!("precompute was cancelled; rerun with --resume to continue");
    }
    Ok(())
}

async fn owner_name(engine: &MatchingEngine, id: AttendeeId) -> String {
    engine
        .attendee(id)
        .await
        .map(|a| a.full_name())
        .unwrap_or_else(|| format!("attendee {id}"))
}

async fn print_matches(engine: &MatchingEngine, matches: &[RankedMatch]) {
    if matches.is_empty() {
        println!("  (no matches)");
        return;
    }
    for m in matches {
        println!(
            "  {:>2}. [{}] {:.3}  {}: {}",
            m.rank,
            m.target,
            m.similarity_score,
            owner_name(engine, m.owner).await,
            m.target_text
        );
    }
}

async fn print_entity(engine: &MatchingEngine, matches: &EntityMatches) {
    let origin = if matches.precomputed { "precomputed" } else { "live" };
    println!("{} ({origin}): {}", matches.source, matches.source_text);
    print_matches(engine, &matches.matches).await;
}

async fn print_attendee(engine: &MatchingEngine, found: &AttendeeMatches) {
    let attendee = &found.attendee;
    let mut header = format!("{} (attendee {})", attendee.full_name(), attendee.id);
    if let Some(company) = &attendee.company {
        header.push_str(&format!(", {company}"));
    }
    println!("{header}");

    println!("\nWho can help you:");
    for matches in &found.who_can_help_you {
        print_entity(engine, matches).await;
    }
    println!("\nWho you can help:");
    for matches in &found.who_you_can_help {
        print_entity(engine, matches).await;
    }
    println!();
}

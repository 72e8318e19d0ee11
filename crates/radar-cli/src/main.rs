use anyhow::Result;
use clap::{Parser, Subcommand};
use radar_pipeline::app::initialize;
use radar_pipeline::scheduler::run_until_ctrl_c;
use radar_pipeline::{Radar, RadarConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "radar")]
#[command(about = "Opportunity radar: watch sources, extract and score opportunities")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply migrations and load the source registry into the database.
    Init,
    /// One pass over every active page source.
    Run {
        /// Process sources one at a time.
        #[arg(long = "sync")]
        sequential: bool,
        /// Queue classification through the batch API instead of calling it live.
        #[arg(long, conflicts_with = "sequential")]
        batch: bool,
    },
    #[command(subcommand)]
    Batch(BatchCommand),
    /// Run on the configured cron schedule until Ctrl-C.
    Schedule,
}

#[derive(Debug, Subcommand)]
enum BatchCommand {
    Submit,
    Status,
    Process,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = RadarConfig::from_env();

    match cli.command.unwrap_or(Commands::Run {
        sequential: false,
        batch: false,
    }) {
        Commands::Init => {
            let count = initialize(&config).await?;
            info!(sources = count, "init complete");
        }
        Commands::Run { sequential, batch } => {
            let radar = Radar::from_config(config).await?;
            if batch {
                submit(&radar).await?;
            } else {
                let summary = radar.run(sequential).await?;
                for opp in &summary.opportunities {
                    println!(
                        "  [{}] {} ({}) relevance={:.2}",
                        opp.score.recommendation.as_str(),
                        opp.candidate.title(),
                        opp.candidate.organization(),
                        opp.score.relevance_score
                    );
                }
            }
            radar.shutdown();
        }
        Commands::Batch(command) => {
            let radar = Radar::from_config(config).await?;
            match command {
                BatchCommand::Submit => submit(&radar).await?,
                BatchCommand::Status => {
                    let jobs = radar.batch_status().await?;
                    if jobs.is_empty() {
                        info!("no pending batches");
                    }
                    for job in jobs {
                        println!(
                            "{} status={} requests={} created={}",
                            job.batch_id,
                            job.status.as_str(),
                            job.requests.len(),
                            job.created_at.to_rfc3339()
                        );
                    }
                }
                BatchCommand::Process => {
                    for summary in radar.process_batches().await? {
                        println!("{}", serde_json::to_string(&summary)?);
                    }
                }
            }
            radar.shutdown();
        }
        Commands::Schedule => {
            let radar = Radar::from_config(config).await?;
            run_until_ctrl_c(radar).await?;
        }
    }

    Ok(())
}

async fn submit(radar: &Radar) -> Result<()> {
    match radar.submit_batch().await? {
        Some(job) => info!(
            batch_id = %job.batch_id,
            requests = job.requests.len(),
            "batch submitted"
        ),
        None => info!("no fresh content, nothing submitted"),
    }
    Ok(())
}

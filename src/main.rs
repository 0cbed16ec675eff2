use anyhow::Context;
use clap::{Parser, Subcommand};
use complaint_priority::{
    config::Config,
    dataset,
    interactive::InteractiveSession,
    ml::{InferencePipeline, PriorityService},
    ComplaintRecord, InferenceRequest,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "complaint-priority")]
#[command(about = "Train and serve the complaint priority classifier", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, global = true, env = "PRIORITY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a JSON Lines dataset and write a bundle
    Train {
        #[arg(short, long, value_name = "FILE")]
        data: PathBuf,

        /// Bundle directory (defaults to artifacts.bundle_dir)
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Predict the priority of one complaint
    Predict {
        #[arg(short, long)]
        issue_type: String,

        #[arg(short, long)]
        text: String,

        #[arg(short, long, default_value = "0")]
        attachments: String,

        #[arg(short, long, value_name = "DIR")]
        bundle: Option<PathBuf>,

        /// Print per-class vote shares as JSON
        #[arg(long)]
        detailed: bool,
    },

    /// Prompt for complaints on stdin until `exit`
    Interactive {
        #[arg(short, long, value_name = "DIR")]
        bundle: Option<PathBuf>,
    },

    /// Show layout, hyperparameters, metrics and feature importance of a bundle
    Inspect {
        #[arg(short, long, value_name = "DIR")]
        bundle: Option<PathBuf>,

        /// Number of text terms to list
        #[arg(long, default_value = "20")]
        top: usize,
    },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("complaint_priority={}", config.observability.log_level).into());
    let json = config.observability.json_logs;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config);

    tracing::info!("complaint-priority v{}", env!("CARGO_PKG_VERSION"));

    let bundle_dir = |flag: Option<PathBuf>| flag.unwrap_or_else(|| config.artifacts.bundle_dir.clone());

    match cli.command {
        Commands::Train { data, out } => {
            let records = dataset::load_records(&data)
                .with_context(|| format!("Failed to read {}", data.display()))?;

            let mut config = config.clone();
            config.artifacts.bundle_dir = bundle_dir(out);
            let service = PriorityService::from_config(&config);
            let report = service.train(records).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Predict {
            issue_type,
            text,
            attachments,
            bundle,
            detailed,
        } => {
            let pipeline = InferencePipeline::load(&bundle_dir(bundle))?;
            let attachments = ComplaintRecord::parse_attachments(&attachments)?;
            let request = InferenceRequest::new(issue_type, text, attachments);

            if detailed {
                let record = ComplaintRecord::try_from(&request)?;
                let prediction = pipeline.predict_detailed(&record);
                println!("{}", serde_json::to_string_pretty(&prediction)?);
            } else {
                println!("{}", pipeline.predict_request(&request)?);
            }
        }

        Commands::Interactive { bundle } => {
            let pipeline = InferencePipeline::load(&bundle_dir(bundle))?;
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            InteractiveSession::new(stdin.lock(), stdout.lock()).run(&pipeline)?;
        }

        Commands::Inspect { bundle, top } => {
            let pipeline = InferencePipeline::load(&bundle_dir(bundle))?;
            println!("{}", serde_json::to_string_pretty(&pipeline.inspect(top))?);
        }
    }

    Ok(())
}

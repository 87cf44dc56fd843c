use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wallet_credit_scorer::{
    config::Settings,
    scoring::{CreditScorer, GradingEngine},
};

#[derive(Parser)]
#[clap(name = "wallet-credit-scorer")]
#[clap(about = "Credit scores and reports for Ethereum wallets", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/default and config/local)
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score and grade a wallet, printing the assessment as JSON
    Enquire {
        /// Ethereum address
        address: String,
    },

    /// Generate a markdown credit report for a wallet
    Report {
        /// Ethereum address
        address: String,
    },

    /// Show the grade for a score
    Grade {
        score: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new()?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.app.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = settings.validate() {
        error!("Invalid settings: {}", e);
        return Err(anyhow::anyhow!(e));
    }

    match cli.command {
        Commands::Enquire { address } => {
            let scorer = CreditScorer::from_settings(&settings)?;
            let assessment = scorer.enquire(&address).await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }

        Commands::Report { address } => {
            let scorer = CreditScorer::from_settings(&settings)?;
            let report = scorer.report(&address).await?;
            info!("Report produced by {}", report.provider_used);
            println!("{}", report.narrative);
        }

        Commands::Grade { score } => {
            let grading = GradingEngine::new(
                &settings.grading,
                settings.scoring.min_score,
                settings.scoring.max_score,
            )?;
            let grade = grading.grade(score);
            let (low, high) = grading.band(grade);
            println!("{}", grade);
            println!("Score band: {:.0} to {:.0}", low, high);
            println!("Expected bad rate: {:.1}%", grade.expected_bad_rate());
        }
    }

    Ok(())
}

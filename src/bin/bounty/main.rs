//! Bounty Market CLI
//!
//! Command-line client for the bounty marketplace server.

mod client;
mod commands;
mod style;

use bounty_market::models::BountyStatus;
use bounty_market::Config;
use clap::{Parser, Subcommand};
use client::BountyClient;
use style::*;
use uuid::Uuid;

const BANNER: &str = r#"
  ██████╗  ██████╗ ██╗   ██╗███╗   ██╗████████╗██╗   ██╗
  ██╔══██╗██╔═══██╗██║   ██║████╗  ██║╚══██╔══╝╚██╗ ██╔╝
  ██████╔╝██║   ██║██║   ██║██╔██╗ ██║   ██║    ╚████╔╝
  ██╔══██╗██║   ██║██║   ██║██║╚██╗██║   ██║     ╚██╔╝
  ██████╔╝╚██████╔╝╚██████╔╝██║ ╚████║   ██║      ██║
  ╚═════╝  ╚═════╝  ╚═════╝ ╚═╝  ╚═══╝   ╚═╝      ╚═╝
"#;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "bounty")]
#[command(version)]
#[command(about = "Bounty Market - post tasks, apply, get paid", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Bounty Market server URL
    #[arg(
        short,
        long,
        env = "BOUNTY_URL",
        default_value = "http://localhost:8080",
        global = true
    )]
    url: String,

    /// Your user id
    #[arg(short, long, env = "BOUNTY_ACTOR", global = true)]
    actor: Option<Uuid>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List bounties
    #[command(visible_alias = "ls")]
    List {
        /// Only bounties in this status (e.g. Created, Settling)
        #[arg(short, long)]
        status: Option<BountyStatus>,

        /// Only bounties you published
        #[arg(long)]
        mine: bool,

        /// Number of entries to show
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show a bounty with its milestones, receiver and comments
    Show { bounty: Uuid },

    /// Apply to a bounty
    Apply {
        bounty: Uuid,

        /// Note for the publisher
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Approve an application (publisher)
    Approve { application: Uuid },

    /// Reject an application (publisher)
    Reject { application: Uuid },

    /// Confirm all milestones are done (receiver)
    Confirm { bounty: Uuid },

    /// Verify confirmed milestones (publisher)
    Verify { bounty: Uuid },

    /// Ask for payment after verification (receiver)
    RequestSettlement { bounty: Uuid },

    /// Cancel a settlement in progress
    Cancel { bounty: Uuid },

    /// Pay out a settling bounty (publisher)
    Settle { bounty: Uuid },

    Like { bounty: Uuid },

    Unlike { bounty: Uuid },

    /// Rate a bounty from 1 to 5
    Rate { bounty: Uuid, score: f64 },

    Comment { bounty: Uuid, content: String },

    /// Show your notifications
    #[command(visible_alias = "inbox")]
    Notifications {
        /// Hide notifications already read
        #[arg(long)]
        unread: bool,

        /// Mark the listed notifications as read
        #[arg(long)]
        mark_read: bool,
    },

    /// Run the server in-process
    #[command(visible_alias = "s")]
    Server {
        /// Configuration file
        #[arg(short, long, env = "BOUNTY_CONFIG", default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let client = BountyClient::new(&cli.url, cli.actor);

    let result = match cli.command {
        Commands::List {
            status,
            mine,
            limit,
        } => commands::bounties::list(&client, status, mine, limit).await,
        Commands::Show { bounty } => commands::bounties::show(&client, bounty).await,
        Commands::Apply { bounty, note } => {
            commands::applications::apply(&client, bounty, note).await
        }
        Commands::Approve { application } => {
            commands::applications::approve(&client, application).await
        }
        Commands::Reject { application } => {
            commands::applications::reject(&client, application).await
        }
        Commands::Confirm { bounty } => commands::lifecycle::confirm(&client, bounty).await,
        Commands::Verify { bounty } => commands::lifecycle::verify(&client, bounty).await,
        Commands::RequestSettlement { bounty } => {
            commands::lifecycle::request_settlement(&client, bounty).await
        }
        Commands::Cancel { bounty } => commands::lifecycle::cancel(&client, bounty).await,
        Commands::Settle { bounty } => commands::lifecycle::settle(&client, bounty).await,
        Commands::Like { bounty } => commands::interactions::like(&client, bounty).await,
        Commands::Unlike { bounty } => commands::interactions::unlike(&client, bounty).await,
        Commands::Rate { bounty, score } => {
            commands::interactions::rate(&client, bounty, score).await
        }
        Commands::Comment { bounty, content } => {
            commands::interactions::comment(&client, bounty, &content).await
        }
        Commands::Notifications { unread, mark_read } => {
            commands::notifications::run(&client, unread, mark_read).await
        }
        Commands::Server { config } => {
            print_banner();
            match Config::load_from(&config) {
                Ok(config) => bounty_market::server::serve(&config).await,
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        print_error(&format!("{}", e));
        std::process::exit(1);
    }
}

pub fn print_banner() {
    println!("{}", style_cyan(BANNER));
    println!(
        "  {} {}",
        style_dim("Bounty Market"),
        style_dim(&format!("v{}", VERSION))
    );
    println!();
}

//! Apothecary CLI - database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Apply storefront migrations
//! apothecary-cli migrate
//!
//! # Load categories and products from YAML
//! apothecary-cli seed catalog --file seed/catalog.yaml
//! apothecary-cli seed catalog --file seed/catalog.yaml --clear
//!
//! # Grant or revoke admin rights
//! apothecary-cli user promote --email pharmacist@example.com
//! apothecary-cli user demote --email pharmacist@example.com
//! ```
//!
//! All commands read `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`), loading
//! `.env` when present.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "apothecary-cli")]
#[command(author, version, about = "Apothecary CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply storefront database migrations
    Migrate,
    /// Seed the database
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
    /// Manage user roles
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Upsert categories and products from a YAML file
    Catalog {
        /// Path to the catalog YAML file
        #[arg(short, long)]
        file: String,

        /// Delete all products and categories first
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Give a user the admin role
    Promote {
        /// User email address
        #[arg(short, long)]
        email: String,
    },
    /// Return a user to the customer role
    Demote {
        /// User email address
        #[arg(short, long)]
        email: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Seed { target } => match target {
            SeedTarget::Catalog { file, clear } => commands::seed::catalog(&file, clear).await?,
        },
        Commands::User { action } => match action {
            UserAction::Promote { email } => {
                commands::user::set_role(&email, apothecary_core::UserRole::Admin).await?;
            }
            UserAction::Demote { email } => {
                commands::user::set_role(&email, apothecary_core::UserRole::Customer).await?;
            }
        },
    }
    Ok(())
}

mod app;
mod chat_cmd;
mod config;
mod diary_cmd;
mod history_cmd;
mod profile_cmd;
mod render;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use anyhow::bail;
use clap::{CommandFactory, Parser, Subcommand};

use nourish_db::models::{ActivityLevel, DietType, Goal, Sex};
use nourish_db::pool;

use config::NourishConfig;

#[derive(Parser)]
#[command(name = "nourish", about = "Conversational meal planner")]
struct Cli {
    /// Database URL (overrides NOURISH_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Model client command line (overrides NOURISH_GENERATOR_CMD env var)
    #[arg(long, global = true)]
    generator_cmd: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a nourish config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = nourish_db::config::DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the nourish database if needed and run migrations
    DbInit,
    /// Profile management
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Interactive planning session
    Chat {
        /// User ID
        user: String,
    },
    /// Plan from a single request and print the result
    Plan {
        /// User ID
        user: String,
        /// What to plan, e.g. "3 days, nothing spicy"
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
        /// Approve the plan right away
        #[arg(long)]
        approve: bool,
    },
    /// Show approved plans, recent feedback and diary entries
    History {
        /// User ID
        user: String,
        /// How many entries of each kind to show
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Estimate a meal from a photo and record it in the diary
    Diary {
        /// User ID
        user: String,
        /// Path to the meal photo
        image: PathBuf,
    },
    /// Serve the session API over HTTP
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Create or replace a user's profile
    Set {
        /// User ID
        user: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: i32,
        /// male or female
        #[arg(long)]
        sex: Sex,
        #[arg(long)]
        height_cm: f64,
        #[arg(long)]
        weight_kg: f64,
        #[arg(long)]
        goal_weight_kg: Option<f64>,
        /// sedentary, light, moderate or very_active
        #[arg(long, default_value = "moderate")]
        activity: ActivityLevel,
        /// lose, maintain or gain
        #[arg(long, default_value = "maintain")]
        goal: Goal,
        /// omnivore, eggetarian, vegetarian or vegan
        #[arg(long, default_value = "omnivore")]
        diet: DietType,
        /// Comma-separated allergens
        #[arg(long, value_delimiter = ',')]
        allergies: Vec<String>,
        /// Comma-separated foods to avoid
        #[arg(long, value_delimiter = ',')]
        dislikes: Vec<String>,
        /// Preferred cuisine
        #[arg(long)]
        cuisine: Option<String>,
        /// Spending ceiling for one plan
        #[arg(long)]
        budget: f64,
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(i32).range(1..=6))]
        meals_per_day: i32,
        /// Default plan length in days
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(i32).range(1..=7))]
        days: i32,
    },
    /// Show a user's profile
    Show {
        /// User ID
        user: String,
    },
}

fn cmd_init(db_url: &str, generator_cmd: Option<&str>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let generator = match generator_cmd {
        Some(line) => config::CommandSection::parse(line)
            .ok_or_else(|| anyhow::anyhow!("--generator-cmd must not be empty"))?,
        None => config::CommandSection::parse(config::DEFAULT_GENERATOR_CMD)
            .ok_or_else(|| anyhow::anyhow!("default generator command is empty"))?,
    };

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        generator,
        vision: None,
        planner: Default::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!(
        "  generator = {} {}",
        cfg.generator.command,
        cfg.generator.args.join(" ")
    );
    println!();
    println!("Next: run `nourish db-init` to create and migrate the database.");

    Ok(())
}

async fn cmd_db_init(resolved: &NourishConfig) -> anyhow::Result<()> {
    println!("Initializing nourish database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("nourish db-init complete.");
    Ok(())
}

async fn cmd_plan(
    manager: &nourish_core::SessionManager,
    user: &str,
    request: &str,
    approve: bool,
) -> anyhow::Result<()> {
    let reply = manager.start_or_continue_session(user, request).await?;
    println!("{}", reply.message);
    let Some(bundle) = &reply.plan else {
        manager.end_session(reply.session_id).await;
        return Ok(());
    };
    println!();
    println!("{}", render::plan(bundle));

    if approve {
        let approved = manager.approve_plan(reply.session_id).await;
        manager.end_session(reply.session_id).await;
        println!("{}", approved?.message);
    } else {
        manager.end_session(reply.session_id).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, cli.generator_cmd.as_deref(), force)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "nourish", &mut std::io::stdout());
        }
        Commands::DbInit => {
            let resolved = NourishConfig::resolve(cli.database_url.as_deref(), None)?;
            cmd_db_init(&resolved).await?;
        }
        Commands::Profile { command } => {
            let resolved = NourishConfig::resolve(cli.database_url.as_deref(), None)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = profile_cmd::run_profile_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::History { user, limit } => {
            let resolved = NourishConfig::resolve(cli.database_url.as_deref(), None)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = history_cmd::run_history(&db_pool, &user, limit).await;
            db_pool.close().await;
            result?;
        }
        Commands::Chat { user } => {
            let resolved = NourishConfig::resolve(
                cli.database_url.as_deref(),
                cli.generator_cmd.as_deref(),
            )?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let manager = app::session_manager(&resolved, db_pool.clone());
            let result = chat_cmd::run_chat(&manager, &user).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plan {
            user,
            request,
            approve,
        } => {
            let resolved = NourishConfig::resolve(
                cli.database_url.as_deref(),
                cli.generator_cmd.as_deref(),
            )?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let manager = app::session_manager(&resolved, db_pool.clone());
            let result = cmd_plan(&manager, &user, &request.join(" "), approve).await;
            db_pool.close().await;
            result?;
        }
        Commands::Diary { user, image } => {
            let resolved = NourishConfig::resolve(
                cli.database_url.as_deref(),
                cli.generator_cmd.as_deref(),
            )?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let manager = app::session_manager(&resolved, db_pool.clone());
            let result = diary_cmd::run_diary(&manager, &user, &image).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { addr } => {
            let resolved = NourishConfig::resolve(
                cli.database_url.as_deref(),
                cli.generator_cmd.as_deref(),
            )?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let manager = app::session_manager(&resolved, db_pool.clone());
            let result = serve_cmd::run_serve(manager, &addr).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

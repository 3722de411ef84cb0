use anyhow::{bail, Result};
use clap::Parser;
use clap::Subcommand;
use sqlx::SqlitePool;

use crate::api::auth::Auth;
use crate::api::user::{NewUser, Role, SqliteUserStore, UserStore};

#[allow(dead_code)]
#[path = "../api/mod.rs"]
mod api;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Connection string of the SQLite database holding user accounts
    #[arg(short, long, env, default_value = "sqlite://voltiq.db?mode=rwc")]
    pub database_url: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account that can log in to the dashboard
    CreateUser {
        /// Display name of the user
        #[clap(short, long)]
        name: String,

        /// Email address used to log in
        #[clap(short, long)]
        email: String,

        /// Plain text password, stored only as an argon2 hash
        #[clap(short, long, env = "VOLTIQ_USER_PASSWORD")]
        password: String,

        /// Role granted to the user
        #[clap(short, long, value_enum, default_value_t = Role::Viewer)]
        role: Role,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let store = SqliteUserStore::new(SqlitePool::connect(&args.database_url).await?);
    store.migrate().await?;
    let auth = Auth::default();

    match args.cmd {
        Commands::CreateUser {
            name,
            email,
            password,
            role,
        } => {
            if store.with_email(&email).await?.is_some() {
                bail!("A user with email {} already exists", email);
            }
            let user = store
                .create(NewUser {
                    name,
                    email,
                    password: auth.hash_password(&password)?,
                    role,
                })
                .await?;
            println!("Created user:\n{}", &user);
        }
    }
    Ok(())
}

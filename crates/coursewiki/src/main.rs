use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use clap::Parser;
use coursewiki_core::account::{Account, Role};
use coursewiki_core::email::{validate_email, validate_nickname};
use coursewiki_core::password::{hash_password, validate_password_strength};
use coursewiki_core::refresh::{RefreshTokenStore, DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS};
use coursewiki_core::repository::{modify_account, AccountRepository};
use coursewiki_lib::{
    config::{Command, Config},
    db::SeaOrmAccountRepository,
    server::run_server,
};
use migration::MigratorTrait;
use sea_orm::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::parse();

    let log_level = match &config.command {
        Command::Serve(serve_config) => serve_config.log_level.as_str(),
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match config.command {
        Command::Serve(serve_config) => {
            run_server(serve_config).await?;
        }
        Command::Migrate { database_url } => {
            run_migrations(&database_url).await?;
        }
        Command::CreateAdmin {
            database_url,
            email,
            password,
            nickname,
        } => {
            create_admin(&database_url, &email, &password, &nickname).await?;
        }
        Command::ListUsers { database_url } => {
            list_users(&database_url).await?;
        }
        Command::DeleteUser { database_url, email } => {
            delete_user(&database_url, &email).await?;
        }
        Command::PruneTokens {
            database_url,
            refresh_token_ttl_days,
        } => {
            prune_tokens(&database_url, refresh_token_ttl_days).await?;
        }
    }

    Ok(())
}

async fn connect(database_url: &str) -> anyhow::Result<SeaOrmAccountRepository> {
    log::info!("Connecting to database...");
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(SeaOrmAccountRepository::new(db))
}

async fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    log::info!("Connecting to database...");
    let db = Database::connect(database_url).await?;

    log::info!("Running database migrations...");
    migration::Migrator::up(&db, None).await?;

    println!("✅ Database migrations completed successfully!");

    Ok(())
}

async fn create_admin(database_url: &str, email: &str, password: &str, nickname: &str) -> anyhow::Result<()> {
    if let Err(msg) = validate_email(email) {
        anyhow::bail!("Invalid email: {msg}");
    }
    if let Err(msg) = validate_nickname(nickname) {
        anyhow::bail!("Invalid nickname: {msg}");
    }
    if let Err(msg) = validate_password_strength(password) {
        anyhow::bail!("Invalid password: {msg}");
    }

    let repo = connect(database_url).await?;
    if repo.find_by_email(email).await?.is_some() {
        anyhow::bail!("Account '{}' already exists", email);
    }

    log::info!("Hashing password...");
    let now = Utc::now();
    let mut account = Account::new(email, nickname, hash_password(password)?, now);
    account.roles = BTreeSet::from([Role::Admin]);
    account.verified = Some(now);

    let account = repo.insert(account).await?;

    println!("✅ Admin account created successfully!");
    println!("   ID: {}", account.id);
    println!("   Email: {}", account.email);

    Ok(())
}

async fn list_users(database_url: &str) -> anyhow::Result<()> {
    let repo = connect(database_url).await?;
    let accounts = repo.list().await?;

    if accounts.is_empty() {
        println!("No accounts found.");
    } else {
        println!("Accounts:");
        println!(
            "{:<38} {:<32} {:<12} {:<9} {:<20}",
            "ID", "Email", "Roles", "Verified", "Created At"
        );
        println!("{}", "-".repeat(114));
        for account in accounts {
            println!(
                "{:<38} {:<32} {:<12} {:<9} {:<20}",
                account.id,
                account.email,
                account.role_names().join(","),
                if account.is_verified() { "yes" } else { "no" },
                account.created.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}

async fn delete_user(database_url: &str, email: &str) -> anyhow::Result<()> {
    let repo = connect(database_url).await?;

    match repo.find_by_email(email).await? {
        Some(account) => {
            repo.delete(account.id).await?;
            println!("✅ Account '{}' deleted successfully!", email);
        }
        None => {
            anyhow::bail!("Account '{}' not found", email);
        }
    }

    Ok(())
}

async fn prune_tokens(database_url: &str, retention_days: i64) -> anyhow::Result<()> {
    let repo = connect(database_url).await?;
    let store = RefreshTokenStore::new(
        Duration::days(DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS),
        Duration::days(retention_days),
    );

    let mut removed = 0;
    for account in repo.list().await? {
        let now = Utc::now();
        if store.prune(&mut account.clone(), now) == 0 {
            continue;
        }
        let (_, count) = modify_account(&repo, account, |a| Ok(store.prune(a, now))).await?;
        removed += count;
    }

    println!("✅ Removed {} inactive refresh tokens", removed);

    Ok(())
}

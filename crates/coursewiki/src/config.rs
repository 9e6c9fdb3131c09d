use clap::Parser;

const DEFAULT_DATABASE_URL: &str = "sqlite://./coursewiki.db?mode=rwc";

#[derive(Debug, Clone, Parser)]
#[command(name = "coursewiki")]
#[command(about = "CourseWiki account and session server", long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeConfig),

    /// Run database migrations
    Migrate {
        /// Database connection URL
        #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
        database_url: String,
    },

    /// Create a verified administrator account
    CreateAdmin {
        #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
        database_url: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        #[arg(short, long, default_value = "admin")]
        nickname: String,
    },

    /// List all accounts
    ListUsers {
        #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
        database_url: String,
    },

    /// Delete an account
    DeleteUser {
        #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
        database_url: String,

        /// Email of the account to delete
        #[arg(short, long)]
        email: String,
    },

    /// Drop inactive refresh tokens past the retention window from every account
    PruneTokens {
        #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
        database_url: String,

        /// Days an inactive refresh token is kept before it is removed
        #[arg(long, env = "REFRESH_TOKEN_TTL_DAYS", default_value = "2")]
        refresh_token_ttl_days: i64,
    },
}

#[derive(Debug, Clone, Parser)]
pub struct ServeConfig {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Server bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:8080")]
    pub bind_address: String,

    /// Allowed CORS origins (comma-separated)
    #[arg(
        long,
        env = "CORS_ORIGINS",
        default_value = "http://localhost:3000,http://localhost:5173"
    )]
    pub cors_origins: String,

    /// HMAC secret for access and one-shot tokens (at least 32 bytes)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// `iss` claim of issued tokens
    #[arg(long, env = "JWT_ISSUER", default_value = "coursewiki")]
    pub jwt_issuer: String,

    #[arg(long, env = "ACCESS_TOKEN_TTL_MINUTES", default_value = "15")]
    pub access_token_ttl_minutes: i64,

    /// Lifetime of a refresh token from issue
    #[arg(long, env = "REFRESH_TOKEN_LIFETIME_DAYS", default_value = "7")]
    pub refresh_token_lifetime_days: i64,

    /// Days an inactive refresh token is kept before pruning removes it
    #[arg(long, env = "REFRESH_TOKEN_TTL_DAYS", default_value = "2")]
    pub refresh_token_ttl_days: i64,

    #[arg(long, env = "VERIFICATION_TOKEN_VALIDITY_HOURS", default_value = "24")]
    pub verification_token_validity_hours: i64,

    #[arg(long, env = "RESET_TOKEN_VALIDITY_HOURS", default_value = "24")]
    pub reset_token_validity_hours: i64,

    /// Revoke every descendant token when a rotated refresh token is presented again
    #[arg(
        long,
        env = "REVOKE_CHAIN_ON_REUSE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub revoke_chain_on_reuse: bool,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl ServeConfig {
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

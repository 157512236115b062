use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::http_client::DEFAULT_BASE_URL;

/// NotifyForYou session client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Auth API base URL
    #[arg(short = 'u', long, env = "NOTIFY_API_URL", default_value = DEFAULT_BASE_URL)]
    pub api_url: String,

    /// Path to the SQLite cookie jar
    #[arg(short = 'c', long, env = "NOTIFY_COOKIE_DB")]
    pub cookie_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the current session
    Status,

    /// Sign in with an email or phone number and password
    SignIn {
        /// Email or phone number
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Create an account and start OTP verification
    SignUp,

    /// Confirm a sign-up with the emailed or texted code
    Verify {
        /// Session token returned by sign-up
        #[arg(short, long)]
        session_token: String,
    },

    /// Request a password reset code
    ForgotPassword {
        /// Email or phone number
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Set a new password using a reset code
    ResetPassword {
        /// Session token returned by forgot-password
        #[arg(short, long)]
        session_token: String,
    },

    /// Exchange the refresh token for a new access token now
    Refresh,

    /// Forget the stored tokens
    Logout,

    /// Keep the session alive until interrupted
    Watch,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Auth API
    pub api_base_url: String,

    // Cookie jar
    pub cookie_db_file: PathBuf,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,

    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let cookie_db_file = match args.cookie_db {
            Some(path) => expand_tilde(&path),
            None => default_cookie_db_path()
                .context("Cannot locate a data directory; pass --cookie-db or set NOTIFY_COOKIE_DB")?,
        };

        Ok(Config {
            api_base_url: args.api_url,
            cookie_db_file,
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level,
            command: args.command.unwrap_or(Command::Status),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.api_base_url.starts_with("https://") && !self.api_base_url.starts_with("http://")
        {
            anyhow::bail!(
                "NOTIFY_API_URL must start with http:// or https://: {}",
                self.api_base_url
            );
        }

        if self.http_connect_timeout == 0 || self.http_request_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Cookies get the Secure flag only over https
    pub fn secure_cookies(&self) -> bool {
        self.api_base_url.starts_with("https://")
    }
}

/// Default cookie jar location under the user's data directory
fn default_cookie_db_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("notifyforyou").join("cookies.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

use anyhow::Result;
use std::sync::Arc;

use notify_session::auth::{SessionController, SqliteCredentialStore};
use notify_session::commands::{self, CommandContext};
use notify_session::config::{Command, Config};
use notify_session::http_client::AuthApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Auth API: {}", config.api_base_url);
    tracing::debug!("Cookie jar: {}", config.cookie_db_file.display());

    let client = AuthApiClient::new(
        &config.api_base_url,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;

    let jar = Arc::new(SqliteCredentialStore::open(
        &config.cookie_db_file,
        config.secure_cookies(),
    )?);

    // One controller for the whole run; the timer is its only background task
    let session = Arc::new(SessionController::new(client.clone(), jar.clone()));
    let timer = session.start().await;

    let ctx = CommandContext {
        client: &client,
        session: &session,
        jar: &jar,
    };

    let result = match config.command.clone() {
        Command::Status => commands::status(&ctx).await,
        Command::SignIn { identifier } => commands::sign_in(&ctx, identifier).await,
        Command::SignUp => commands::sign_up(&ctx).await,
        Command::Verify { session_token } => commands::verify(&ctx, session_token).await,
        Command::ForgotPassword { identifier } => {
            commands::forgot_password(&ctx, identifier).await
        }
        Command::ResetPassword { session_token } => {
            commands::reset_password(&ctx, session_token).await
        }
        Command::Refresh => commands::refresh(&ctx).await,
        Command::Logout => commands::logout(&ctx).await,
        Command::Watch => {
            tracing::info!(
                "Keeping session alive (authenticated: {}), press Ctrl+C to stop",
                session.is_authenticated().await
            );
            shutdown_signal().await;
            Ok(())
        }
    };

    timer.shutdown().await;
    tracing::debug!("Session controller stopped");

    result
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}

// Terminal flows for each CLI subcommand

use anyhow::{Context, Result};
use dialoguer::{Input, Password};

use crate::auth::{CredentialKind, SessionController, SqliteCredentialStore};
use crate::error::ApiError;
use crate::http_client::AuthApiClient;
use crate::models::auth::{ResetPasswordRequest, SignUpRequest};

/// Everything a command needs, built once in `main`
pub struct CommandContext<'a> {
    pub client: &'a AuthApiClient,
    pub session: &'a SessionController<AuthApiClient>,
    pub jar: &'a SqliteCredentialStore,
}

/// Print a failed API call the way a toast would show it
pub fn report_api_error(action: &str, err: &ApiError) {
    tracing::debug!("{} failed: {}", action, err);
    eprintln!("{} failed: {}", action, err.user_message());

    if let Some(errors) = err.field_errors() {
        let mut fields: Vec<_> = errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (field, messages) in fields {
            for message in messages {
                eprintln!("  {}: {}", field, message);
            }
        }
    }
}

pub async fn status(ctx: &CommandContext<'_>) -> Result<()> {
    let state = ctx.session.state().await;

    println!("Session:  {:?}", state.phase());
    match &state.actor {
        Some(actor) => println!(
            "User:     {} ({}, {})",
            actor.email, actor.provider, actor.status
        ),
        None => println!("User:     not loaded"),
    }

    for kind in CredentialKind::ALL {
        match ctx.jar.entry(kind) {
            Some(entry) => println!(
                "{:<13} expires {} (path={}, SameSite={}, secure={})",
                entry.name,
                entry.expires_at.to_rfc3339(),
                entry.path,
                entry.same_site,
                entry.secure
            ),
            None => println!("{:<13} absent", kind.cookie_name()),
        }
    }

    Ok(())
}

pub async fn sign_in(ctx: &CommandContext<'_>, identifier: Option<String>) -> Result<()> {
    let identifier = match identifier {
        Some(id) => id,
        None => prompt("Email or phone number")?,
    };
    let password = Password::new()
        .with_prompt("Password")
        .interact()
        .context("Failed to read password")?;

    match ctx.client.sign_in(&identifier, &password).await {
        Ok(data) => {
            ctx.session.login(&data).await;
            println!("Signed in as {}", data.user.email);
        }
        Err(e) => report_api_error("Sign in", &e),
    }

    Ok(())
}

pub async fn sign_up(ctx: &CommandContext<'_>) -> Result<()> {
    let first_name = prompt("First name")?;
    let last_name = prompt("Last name")?;
    let email = prompt("Email")?;
    let phone_number = prompt_optional("Phone number (optional)")?;
    let dial_code = match phone_number {
        Some(_) => prompt_optional("Dial code (e.g. +1)")?,
        None => None,
    };
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()
        .context("Failed to read password")?;

    let request = SignUpRequest {
        first_name,
        last_name,
        email: email.clone(),
        dial_code,
        phone_number,
        confirm_password: password.clone(),
        password,
    };

    match ctx.client.sign_up(&request).await {
        Ok(data) => {
            println!("Account created. Check {} for your code.", email);
            verify_with_resend(ctx, data.session_token, Some(&email)).await
        }
        Err(e) => {
            report_api_error("Sign up", &e);
            Ok(())
        }
    }
}

pub async fn verify(ctx: &CommandContext<'_>, session_token: String) -> Result<()> {
    match ctx.client.validate_signup_session(&session_token).await {
        Ok(data) => {
            let identifier = data.masked_identifier().map(str::to_string);
            println!(
                "A code was sent to {}",
                identifier.as_deref().unwrap_or("your inbox")
            );
            verify_with_resend(ctx, session_token, identifier.as_deref()).await
        }
        Err(e) => {
            report_api_error("Verification session", &e);
            Ok(())
        }
    }
}

/// Prompt for the OTP; an empty answer asks the server for a new code
async fn verify_with_resend(
    ctx: &CommandContext<'_>,
    mut session_token: String,
    identifier: Option<&str>,
) -> Result<()> {
    loop {
        let Some(otp) = prompt_code(identifier)? else {
            if let Some(token) = resend_code(ctx.client, OtpFlow::SignUp, identifier).await {
                session_token = token;
            }
            continue;
        };

        match ctx.client.verify_otp(&session_token, &otp).await {
            Ok(()) => {
                println!("Account verified. You can sign in now.");
                return Ok(());
            }
            Err(e) => {
                report_api_error("Verification", &e);
                if !matches!(e, ApiError::Service { .. }) {
                    return Ok(());
                }
            }
        }
    }
}

pub async fn forgot_password(ctx: &CommandContext<'_>, identifier: Option<String>) -> Result<()> {
    let identifier = match identifier {
        Some(id) => id,
        None => prompt("Email or phone number")?,
    };

    match ctx.client.forgot_password(&identifier).await {
        Ok(data) => {
            println!("A reset code was sent to {}", identifier);
            reset_with_resend(ctx, data.session_token, Some(&identifier)).await
        }
        Err(e) => {
            report_api_error("Forgot password", &e);
            Ok(())
        }
    }
}

pub async fn reset_password(ctx: &CommandContext<'_>, session_token: String) -> Result<()> {
    match ctx.client.validate_reset_session(&session_token).await {
        Ok(data) => {
            let identifier = data.masked_identifier().map(str::to_string);
            println!(
                "A reset code was sent to {}",
                identifier.as_deref().unwrap_or("your inbox")
            );
            reset_with_resend(ctx, session_token, identifier.as_deref()).await
        }
        Err(e) => {
            report_api_error("Reset session", &e);
            Ok(())
        }
    }
}

async fn reset_with_resend(
    ctx: &CommandContext<'_>,
    mut session_token: String,
    identifier: Option<&str>,
) -> Result<()> {
    let otp = loop {
        match prompt_code(identifier)? {
            Some(otp) => break otp,
            None => {
                if let Some(token) =
                    resend_code(ctx.client, OtpFlow::PasswordReset, identifier).await
                {
                    session_token = token;
                }
            }
        }
    };

    let new_password = Password::new()
        .with_prompt("New password")
        .with_confirmation("Confirm new password", "Passwords do not match")
        .interact()
        .context("Failed to read password")?;

    let request = ResetPasswordRequest {
        otp,
        session_token,
        confirm_password: new_password.clone(),
        new_password,
    };

    match ctx.client.reset_password(&request).await {
        Ok(()) => println!("Password updated. You can sign in now."),
        Err(e) => report_api_error("Reset password", &e),
    }

    Ok(())
}

/// Which OTP a resend request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OtpFlow {
    SignUp,
    PasswordReset,
}

/// Ask for a new code and return the session token that goes with it.
/// Without a known identifier nothing is sent.
async fn resend_code(
    client: &AuthApiClient,
    flow: OtpFlow,
    identifier: Option<&str>,
) -> Option<String> {
    let Some(identifier) = identifier else {
        eprintln!("No email or phone number is known for this session, so no new code can be sent");
        return None;
    };

    let result = match flow {
        OtpFlow::SignUp => client.resend_signup_otp(identifier).await,
        OtpFlow::PasswordReset => client.resend_reset_otp(identifier).await,
    };

    match result {
        Ok(data) => {
            println!("A new code was sent");
            Some(data.session_token)
        }
        Err(e) => {
            report_api_error("Resend code", &e);
            None
        }
    }
}

/// Read the OTP; `None` means the user asked for a new code
fn prompt_code(identifier: Option<&str>) -> Result<Option<String>> {
    if identifier.is_some() {
        prompt_optional("6-digit code (leave empty to resend)")
    } else {
        prompt("6-digit code").map(Some)
    }
}

pub async fn refresh(ctx: &CommandContext<'_>) -> Result<()> {
    let outcome = ctx.session.renew().await;
    if outcome.is_renewed() {
        println!("Access token renewed");
    } else {
        println!("You were signed out. Please sign in again.");
    }
    Ok(())
}

pub async fn logout(ctx: &CommandContext<'_>) -> Result<()> {
    ctx.session.logout().await;
    println!("Signed out");
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    Input::<String>::new()
        .with_prompt(label)
        .interact_text()
        .with_context(|| format!("Failed to read {}", label))
}

fn prompt_optional(label: &str) -> Result<Option<String>> {
    let value: String = Input::new()
        .with_prompt(label)
        .allow_empty(true)
        .interact_text()
        .with_context(|| format!("Failed to read {}", label))?;

    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

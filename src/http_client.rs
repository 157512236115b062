use anyhow::Context;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::error::{ApiError, Result};
use crate::models::auth::{
    ApiEnvelope, IdentifierRequest, OtpSessionData, RefreshTokenData, RefreshTokenRequest,
    ResetPasswordRequest, SessionTokenData, SessionTokenRequest, SignInData, SignInRequest,
    SignUpRequest, VerifyOtpRequest,
};

/// Production API root
pub const DEFAULT_BASE_URL: &str = "https://notifyforyou-com-server.onrender.com/api/v1";

/// HTTP client for the NotifyForYou auth API
#[derive(Clone)]
pub struct AuthApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// API root, without a trailing slash
    base_url: String,
}

impl AuthApiClient {
    /// Create a new auth API client
    pub fn new(base_url: &str, connect_timeout: u64, request_timeout: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether requests travel over a confidential transport
    pub fn is_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    // ==============================================================================================
    // Sign up
    // ==============================================================================================

    pub async fn sign_up(&self, payload: &SignUpRequest) -> Result<SessionTokenData> {
        self.post_data("/auth/signup", payload).await
    }

    pub async fn validate_signup_session(&self, session_token: &str) -> Result<OtpSessionData> {
        let payload = SessionTokenRequest {
            session_token: session_token.to_string(),
        };
        self.post_data("/auth/signup/validate-session", &payload)
            .await
    }

    pub async fn verify_otp(&self, session_token: &str, otp: &str) -> Result<()> {
        require("otp", otp)?;
        let payload = VerifyOtpRequest {
            session_token: session_token.to_string(),
            otp: otp.to_string(),
        };
        self.post("/auth/signup/verify-otp", &payload).await
    }

    pub async fn resend_signup_otp(&self, identifier: &str) -> Result<SessionTokenData> {
        let payload = IdentifierRequest {
            identifier: identifier.to_string(),
        };
        self.post_data("/auth/signup/resend-verification", &payload)
            .await
    }

    // ==============================================================================================
    // Sign in
    // ==============================================================================================

    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<SignInData> {
        require("identifier", identifier)?;
        require("password", password)?;
        let payload = SignInRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
        };
        self.post_data("/auth/signin", &payload).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshTokenData> {
        let payload = RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.post_data("/auth/token/refresh", &payload).await
    }

    // ==============================================================================================
    // Password reset
    // ==============================================================================================

    pub async fn forgot_password(&self, identifier: &str) -> Result<SessionTokenData> {
        require("identifier", identifier)?;
        let payload = IdentifierRequest {
            identifier: identifier.to_string(),
        };
        self.post_data("/auth/password/forgot", &payload).await
    }

    pub async fn validate_reset_session(&self, session_token: &str) -> Result<OtpSessionData> {
        let payload = SessionTokenRequest {
            session_token: session_token.to_string(),
        };
        self.post_data("/auth/password/forgot/validate-session", &payload)
            .await
    }

    pub async fn resend_reset_otp(&self, identifier: &str) -> Result<SessionTokenData> {
        let payload = IdentifierRequest {
            identifier: identifier.to_string(),
        };
        self.post_data("/auth/password/forgot/resend-otp", &payload)
            .await
    }

    pub async fn reset_password(&self, payload: &ResetPasswordRequest) -> Result<()> {
        self.post("/auth/password/reset", payload).await
    }

    // ==============================================================================================
    // Transport
    // ==============================================================================================

    /// POST and require a `data` object in the envelope
    async fn post_data<P, T>(&self, endpoint: &str, payload: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let envelope = self.send(endpoint, payload).await?;
        let data = envelope.into_data::<T>().map_err(|e| {
            tracing::warn!(endpoint = endpoint, error = %e, "Unexpected auth API data");
            ApiError::Transport(format!("Invalid response from {}: {}", endpoint, e))
        })?;

        data.ok_or_else(|| {
            ApiError::Transport(format!("Response from {} is missing data", endpoint))
        })
    }

    /// POST where the envelope carries no data
    async fn post<P>(&self, endpoint: &str, payload: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        self.send(endpoint, payload).await.map(|_| ())
    }

    /// POST and decode the envelope; failures become `Service` errors
    /// whatever shape the server gave `data` and `errors`
    async fn send<P>(&self, endpoint: &str, payload: &P) -> Result<ApiEnvelope>
    where
        P: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(url = %url, "Sending auth API request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, error = %e, "Auth API request failed");
                ApiError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        let envelope: ApiEnvelope = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(
                status = status.as_u16(),
                url = %url,
                response_body = %body,
                "Unexpected auth API response"
            );
            ApiError::Transport(format!("Invalid response from {}: {}", endpoint, e))
        })?;

        if !status.is_success() || !envelope.success {
            let message = envelope.message().unwrap_or("An error occurred").to_string();
            tracing::debug!(
                status = status.as_u16(),
                url = %url,
                message = %message,
                "Auth API reported failure"
            );
            return Err(ApiError::Service {
                status: status.as_u16(),
                message,
                errors: envelope.field_errors(),
            });
        }

        tracing::debug!(status = %status, "Auth API request successful");
        Ok(envelope)
    }
}

/// Reject a blank required field before anything is sent
fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation {
            field: field.to_string(),
            message: format!("{} is required", field),
        });
    }
    Ok(())
}

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==================================================================================================
// Envelope
// ==================================================================================================

/// Every auth endpoint wraps its payload in this envelope.
///
/// `data` and `errors` stay untyped so that a failure response decodes no
/// matter what shape the server put in them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl ApiEnvelope {
    /// Server message, if it sent a non-empty string
    pub fn message(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
    }

    /// Per-field messages, accepting either a list or a single string per field
    pub fn field_errors(&self) -> Option<HashMap<String, Vec<String>>> {
        let Some(Value::Object(fields)) = &self.errors else {
            return None;
        };

        let errors: HashMap<String, Vec<String>> = fields
            .iter()
            .map(|(field, value)| {
                let messages = match value {
                    Value::Array(items) => items.iter().map(value_text).collect(),
                    Value::Null => Vec::new(),
                    other => vec![value_text(other)],
                };
                (field.clone(), messages)
            })
            .filter(|(_, messages)| !messages.is_empty())
            .collect();

        (!errors.is_empty()).then_some(errors)
    }

    /// Decode `data` into the endpoint's success type
    pub fn into_data<T: DeserializeOwned>(self) -> serde_json::Result<Option<T>> {
        match self.data {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ==================================================================================================
// Request Models
// ==================================================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dial_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenRequest {
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub session_token: String,
    pub otp: String,
}

/// Used by resend-OTP and forgot-password; the identifier is an email or phone number
#[derive(Debug, Clone, Serialize)]
pub struct IdentifierRequest {
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub otp: String,
    pub session_token: String,
    pub new_password: String,
    pub confirm_password: String,
}

// ==================================================================================================
// Response Models
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenData {
    pub session_token: String,
}

/// Masked identity shown on the OTP screen
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSessionData {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl OtpSessionData {
    /// The identifier an OTP was sent to, email first
    pub fn masked_identifier(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or(self.phone_number.as_deref())
            .or(self.username.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub email_is_verified: bool,
    pub phone_is_verified: bool,
    pub provider: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInData {
    pub user: UserRecord,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenData {
    pub new_access_token: String,
}

// Token refresh seam between the session controller and the auth API

use std::future::Future;
use std::sync::Arc;

use crate::error::ApiError;
use crate::http_client::AuthApiClient;

/// Exchanges a refresh token for a new access token.
///
/// The refresh token itself is never rotated by this call.
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;
}

impl TokenRefresher for AuthApiClient {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, ApiError> {
        tracing::info!("Refreshing access token via {}", self.base_url());

        let data = self.refresh_token(refresh_token).await?;
        if data.new_access_token.is_empty() {
            return Err(ApiError::Transport(
                "Refresh response does not contain newAccessToken".to_string(),
            ));
        }

        Ok(data.new_access_token)
    }
}

impl<T: TokenRefresher> TokenRefresher for Arc<T> {
    fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<String, ApiError>> + Send {
        (**self).refresh_access_token(refresh_token)
    }
}

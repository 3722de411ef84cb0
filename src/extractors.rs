use axum::async_trait;
use axum::extract::FromRef;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use tracing::debug;

use crate::api::auth::Claims;
use crate::error::ApiError;
use crate::{bail_api, AppState};

/// Identity of the caller, taken from a verified `Authorization: Bearer` token.
pub(crate) struct AuthenticatedUser(pub(crate) Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await;
        let token = match header {
            Ok(TypedHeader(auth)) if !auth.token().is_empty() => auth,
            _ => bail_api!(StatusCode::UNAUTHORIZED, "No token provided"),
        };

        match AppState::from_ref(state).sessions.verify(token.token()) {
            Ok(claims) => Ok(AuthenticatedUser(claims)),
            Err(err) => {
                debug!("Rejected session token: {}", err);
                bail_api!(StatusCode::FORBIDDEN, "Invalid token")
            }
        }
    }
}

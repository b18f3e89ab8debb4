//! `getFirebaseJWT` handling
//!
//! The frame always gets a `firebaseJWT` reply: either the token or an
//! `ERROR` response carrying the credential service's message.

use crate::collaborators::CredentialService;
use ih_protocol::{InteractiveId, JwtRequest, JwtResponse};

/// Answer one JWT request
pub async fn respond(
    credentials: &dyn CredentialService,
    interactive: &InteractiveId,
    request: &JwtRequest,
) -> JwtResponse {
    match credentials
        .firebase_jwt(request.firebase_app.as_deref(), &request.extra)
        .await
    {
        Ok(token) => {
            tracing::debug!(interactive = %interactive, request = %request.request_id, "jwt issued");
            JwtResponse::token(request.request_id, token)
        }
        Err(e) => {
            tracing::warn!(interactive = %interactive, request = %request.request_id, "jwt request failed: {}", e);
            JwtResponse::error(request.request_id, e.to_string())
        }
    }
}

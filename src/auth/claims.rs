use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload embedded in access tokens. Verification is a pure function of
/// the token and the server secret; no server-side state is consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,    // user ID
    pub email: String,
    pub name: String,
    pub role: String,
    pub iat: usize,   // issued at (unix timestamp)
    pub exp: usize,   // expires at (unix timestamp)
    pub iss: String,  // issuer
    pub aud: String,  // audience
}

use anyhow::Result;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ISSUER: &str = "draftforge";

/// JWT Claims - data stored in the token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,    // Subject (user_id as string)
    pub user_id: Uuid,  // User UUID
    pub email: String,  // Login email
    pub exp: i64,       // Expiration timestamp
    pub iat: i64,       // Issued at timestamp
    pub iss: String,    // Issuer
    pub jti: String,    // Unique token identifier
}

/// Token service - creates and verifies signed bearer tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_days: i64,
}

impl TokenService {
    /// Create a new token service with the signing secret and lifetime.
    pub fn new(secret: &str, expires_days: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expires_days,
        }
    }

    /// Create a new token for a user.
    pub fn create_token(&self, user_id: Uuid, email: &str) -> Result<String> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::days(self.expires_days);

        let claims = Claims {
            sub: user_id.to_string(),
            user_id,
            email: email.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(Into::into)
    }

    /// Verify and decode a token.
    ///
    /// Returns claims if the token is valid and not expired.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(Into::into)
    }
}

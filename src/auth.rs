use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::models::Id;
use crate::policy::Actor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // numeric user id
    pub name: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

fn secret() -> Result<String, jsonwebtoken::errors::Error> {
    env::var("JWT_SECRET").map_err(|_| ErrorKind::InvalidKeyFormat.into())
}

/// Validate a JWT and return its claims.
pub fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Issue a 24h token for a user. Login itself happens elsewhere; this is used by
/// operators and tests to mint identities.
pub fn create_jwt(user_id: Id, name: &str, roles: Vec<Role>) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = secret()?;
    let exp = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;
    let claims = Claims { sub: user_id.to_string(), name: name.to_string(), exp, roles };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

fn actor_from_claims(claims: Claims) -> Option<Actor> {
    let id = claims.sub.parse::<Id>().ok()?;
    Some(Actor { id, name: claims.name, roles: claims.roles })
}

/// User id behind a valid bearer token in `headers`, if any.
pub fn subject_from_headers(headers: &HeaderMap) -> Option<Id> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    decode_jwt(token.trim()).ok()?.sub.parse().ok()
}

/// Extractor yielding the authenticated [`Actor`].
pub struct Auth(pub Actor);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()).ok().and_then(actor_from_claims) {
                Some(actor) => ready(Ok(Auth(actor))),
                None => ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")))
    }
}

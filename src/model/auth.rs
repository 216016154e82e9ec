use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{
    errors::Error as JwtError, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use rocket::{
    http::{Cookie, SameSite, Status},
    outcome::{try_outcome, IntoOutcome},
    request::{self, FromRequest},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::admin::Admin;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// A signed token proving admin login, carried in a cookie. Guards the
/// reporting endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminToken {
    #[serde(rename = "sub")]
    username: String,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

impl AdminToken {
    pub fn new(admin: &Admin, config: &Config) -> Self {
        Self {
            username: admin.username.clone(),
            expire_at: Utc::now() + config.auth_ttl(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Serialize this token into a cookie.
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let token = jsonwebtoken::encode(
            &Header::default(),
            &self,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .unwrap(); // Infallible for these claims.

        Cookie::build(AUTH_TOKEN_COOKIE, token)
            .max_age(time::Duration::seconds(config.auth_ttl().num_seconds()))
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Deserialize and validate a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, JwtError> {
        jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|data: TokenData<Self>| data.claims)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = JwtError;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = req.guard::<&State<Config>>().await.unwrap(); // `Config` is always managed.
        let cookie = try_outcome!(req.cookies().get(AUTH_TOKEN_COOKIE).or_forward(()));
        let token =
            try_outcome!(Self::from_cookie(cookie, config).into_outcome(Status::Unauthorized));
        request::Outcome::Success(token)
    }
}

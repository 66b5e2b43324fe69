//! Actor extractor
//!
//! Reads who is calling from headers. Identity is asserted by the gateway
//! in front of this service; no token is verified here.
//!
//! | Header | Meaning |
//! |--------|---------|
//! | X-Actor-Id | actor id; absent = `system` |
//! | X-Actor-Type | rider / driver / admin / system |
//! | X-Forwarded-For | client IP, first hop wins |
//! | User-Agent | client user agent |

use crate::orders::ActorContext;
use crate::utils::AppError;
use axum::extract::FromRequestParts;
use http::request::Parts;
use shared::event::{Actor, ActorType};
use std::str::FromStr;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_TYPE_HEADER: &str = "x-actor-type";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// [`ActorContext`] built from request headers
#[derive(Debug, Clone)]
pub struct RequestActor(pub ActorContext);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = match header(parts, ACTOR_ID_HEADER) {
            Some(id) => {
                let actor_type = match header(parts, ACTOR_TYPE_HEADER) {
                    Some(raw) => ActorType::from_str(raw)
                        .map_err(|e| AppError::invalid_field(ACTOR_TYPE_HEADER, e))?,
                    None => ActorType::Rider,
                };
                Actor::new(id, actor_type)
            }
            None => Actor::system(),
        };

        let mut ctx = ActorContext::new(actor);
        if let Some(ip) = header(parts, FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
        {
            ctx = ctx.with_ip(ip);
        }
        if let Some(ua) = header(parts, http::header::USER_AGENT.as_str()) {
            ctx = ctx.with_user_agent(ua);
        }
        Ok(RequestActor(ctx))
    }
}

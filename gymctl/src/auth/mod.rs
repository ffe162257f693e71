pub mod permissions;

use crate::{
    errors::Error,
    types::{TenantId, UserId},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

/// Identity headers set by the fronting auth proxy. The proxy terminates
/// authentication; by the time a request reaches us these are trusted.
pub const ACTOR_HEADER: &str = "x-gym-actor";
pub const TENANT_HEADER: &str = "x-gym-tenant";
pub const ROLE_HEADER: &str = "x-gym-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Trainer,
    Member,
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "trainer" => Ok(Role::Trainer),
            "member" => Ok(Role::Member),
            _ => Err(()),
        }
    }
}

/// The authenticated caller, resolved from the proxy headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentActor {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
}

impl CurrentActor {
    /// Staff act on behalf of the business, not themselves: cancellation
    /// policy and ownership checks treat them differently.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager | Role::Trainer)
    }
}

fn header_value<'p>(parts: &'p Parts, name: &'static str) -> Result<&'p str, Error> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthenticated {
            message: format!("missing {name} header"),
        })
}

impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, ACTOR_HEADER)?
            .parse::<UserId>()
            .map_err(|_| Error::Unauthenticated {
                message: format!("{ACTOR_HEADER} is not a valid UUID"),
            })?;
        let tenant_id = header_value(parts, TENANT_HEADER)?
            .parse::<TenantId>()
            .map_err(|_| Error::Unauthenticated {
                message: format!("{TENANT_HEADER} is not a valid UUID"),
            })?;
        let role = header_value(parts, ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|_| Error::Unauthenticated {
                message: format!("{ROLE_HEADER} is not a recognized role"),
            })?;

        Ok(CurrentActor {
            user_id,
            tenant_id,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("TRAINER".parse::<Role>(), Ok(Role::Trainer));
        assert_eq!("member".parse::<Role>(), Ok(Role::Member));
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn members_are_not_staff() {
        let actor = CurrentActor {
            user_id: uuid::Uuid::new_v4(),
            tenant_id: uuid::Uuid::new_v4(),
            role: Role::Member,
        };
        assert!(!actor.is_staff());
        assert!(CurrentActor { role: Role::Trainer, ..actor }.is_staff());
    }
}

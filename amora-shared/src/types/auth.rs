use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Back-office role attached to an account. Ordinary users carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    Moderator,
    SeniorModerator,
    SuperAdmin,
}

impl AdminRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminRole::Moderator => "moderator",
            AdminRole::SeniorModerator => "senior_moderator",
            AdminRole::SuperAdmin => "super_admin",
        }
    }

    /// Capabilities granted to the role when none are set explicitly.
    pub fn default_capabilities(&self) -> Capabilities {
        match self {
            AdminRole::Moderator => Capabilities {
                can_manage_reports: true,
                can_ban_users: false,
                can_escalate: false,
            },
            AdminRole::SeniorModerator => Capabilities {
                can_manage_reports: true,
                can_ban_users: true,
                can_escalate: false,
            },
            AdminRole::SuperAdmin => Capabilities {
                can_manage_reports: true,
                can_ban_users: true,
                can_escalate: true,
            },
        }
    }
}

impl std::fmt::Display for AdminRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdminRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "moderator" => Ok(AdminRole::Moderator),
            "senior_moderator" => Ok(AdminRole::SeniorModerator),
            "super_admin" => Ok(AdminRole::SuperAdmin),
            _ => Err(format!("unknown admin role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_manage_reports: bool,
    pub can_ban_users: bool,
    pub can_escalate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(user_id: Uuid, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            iat: now,
            exp: now + duration_secs,
            jti: Uuid::now_v7(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// The authenticated subject of a request. Admin capabilities are not
/// carried in the token; they are read from the identity projection.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub token_id: Uuid,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            token_id: claims.jti,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrips_through_str() {
        for role in [AdminRole::Moderator, AdminRole::SeniorModerator, AdminRole::SuperAdmin] {
            assert_eq!(role.as_str().parse::<AdminRole>().unwrap(), role);
        }
        assert!("janitor".parse::<AdminRole>().is_err());
    }

    #[test]
    fn only_super_admin_escalates_by_default() {
        assert!(!AdminRole::Moderator.default_capabilities().can_escalate);
        assert!(!AdminRole::SeniorModerator.default_capabilities().can_escalate);
        assert!(AdminRole::SuperAdmin.default_capabilities().can_escalate);
        assert!(AdminRole::SeniorModerator.default_capabilities().can_ban_users);
    }

    #[test]
    fn fresh_claims_are_not_expired() {
        let claims = Claims::new(Uuid::now_v7(), 60);
        assert!(!claims.is_expired());
        let user = AuthUser::from(claims.clone());
        assert_eq!(user.id, claims.sub);
    }
}

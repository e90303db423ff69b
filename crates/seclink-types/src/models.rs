use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Account role. Decides which profile kind a user may own and which
/// routes they can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Volunteer,
    Ngo,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volunteer => "volunteer",
            Self::Ngo => "ngo",
            Self::Admin => "admin",
        }
    }

    /// Profile kind owned by users of this role, if any.
    pub fn profile_kind(&self) -> Option<ProfileKind> {
        match self {
            Self::Volunteer => Some(ProfileKind::Volunteer),
            Self::Ngo => Some(ProfileKind::Ngo),
            Self::Admin => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volunteer" => Ok(Self::Volunteer),
            "ngo" => Ok(Self::Ngo),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Volunteer,
    Ngo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub ref_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolunteerProfile {
    pub id: Uuid,
    pub full_name: String,
    pub weekly_availability: u32,
    pub areas_of_expertise: Vec<String>,
    pub resume_url: Option<String>,
    pub background_check: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NgoProfile {
    pub id: Uuid,
    pub organization_name: String,
    pub areas_of_concern: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role-specific profile linked 1:1 to a user.
#[derive(Debug, Clone)]
pub enum Profile {
    Volunteer(VolunteerProfile),
    Ngo(NgoProfile),
}

impl Profile {
    /// Name shown to other users: full name for volunteers, organization
    /// name for NGOs.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Volunteer(v) => &v.full_name,
            Self::Ngo(n) => &n.organization_name,
        }
    }
}

/// A direct message. Only `is_read` / `read_at` ever change after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender: Uuid,
    pub recipient: Uuid,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

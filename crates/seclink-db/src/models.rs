//! Database row types. These map directly to SQLite rows and are converted
//! into the seclink-types models at the edge of the crate.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use tracing::warn;
use uuid::Uuid;

use seclink_types::models::{Message, NgoProfile, Role, User, VolunteerProfile};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub ref_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct VolunteerRow {
    pub id: String,
    pub full_name: String,
    pub weekly_availability: i64,
    pub areas_of_expertise: String,
    pub resume_url: Option<String>,
    pub background_check: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct NgoRow {
    pub id: String,
    pub organization_name: String,
    pub areas_of_concern: String,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: i64,
    pub is_read: bool,
    pub read_at: Option<i64>,
}

pub(crate) const USER_COLUMNS: &str = "id, email, password, role, ref_id, created_at, updated_at";
pub(crate) const VOLUNTEER_COLUMNS: &str =
    "id, full_name, weekly_availability, areas_of_expertise, resume_url, background_check, created_at, updated_at";
pub(crate) const NGO_COLUMNS: &str = "id, organization_name, areas_of_concern, created_at, updated_at";
pub(crate) const MESSAGE_COLUMNS: &str =
    "seq, id, conversation_id, sender_id, recipient_id, content, created_at, is_read, read_at";

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            password: row.get(2)?,
            role: row.get(3)?,
            ref_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn role(&self) -> Result<Role> {
        self.role
            .parse()
            .with_context(|| format!("user {} has a corrupt role", self.id))
    }

    pub fn to_user(&self) -> Result<User> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            email: self.email.clone(),
            role: self.role()?,
            ref_id: self.ref_id.as_deref().map(parse_uuid).transpose()?,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

impl VolunteerRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            full_name: row.get(1)?,
            weekly_availability: row.get(2)?,
            areas_of_expertise: row.get(3)?,
            resume_url: row.get(4)?,
            background_check: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl TryFrom<VolunteerRow> for VolunteerProfile {
    type Error = anyhow::Error;

    fn try_from(row: VolunteerRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            full_name: row.full_name,
            weekly_availability: u32::try_from(row.weekly_availability).unwrap_or_else(|_| {
                warn!("Corrupt weekly_availability {} on volunteer '{}'", row.weekly_availability, row.id);
                0
            }),
            areas_of_expertise: parse_tags(&row.areas_of_expertise),
            resume_url: row.resume_url,
            background_check: row.background_check,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

impl NgoRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            organization_name: row.get(1)?,
            areas_of_concern: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

impl TryFrom<NgoRow> for NgoProfile {
    type Error = anyhow::Error;

    fn try_from(row: NgoRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            organization_name: row.organization_name,
            areas_of_concern: parse_tags(&row.areas_of_concern),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

impl MessageRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            conversation_id: row.get(2)?,
            sender_id: row.get(3)?,
            recipient_id: row.get(4)?,
            content: row.get(5)?,
            created_at: row.get(6)?,
            is_read: row.get(7)?,
            read_at: row.get(8)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            conversation_id: row.conversation_id,
            sender: parse_uuid(&row.sender_id)?,
            recipient: parse_uuid(&row.recipient_id)?,
            content: row.content,
            timestamp: from_millis(row.created_at),
            is_read: row.is_read,
            read_at: row.read_at.map(from_millis),
        })
    }
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("corrupt id '{}'", s))
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| {
        warn!("Corrupt timestamp {}", ms);
        DateTime::default()
    })
}

/// Tag lists are stored as JSON arrays.
pub(crate) fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Corrupt tag list '{}': {}", raw, e);
        Vec::new()
    })
}

pub(crate) fn encode_tags(tags: &[String]) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

use crate::models::{
    NGO_COLUMNS, NgoRow, USER_COLUMNS, UserRow, VOLUNTEER_COLUMNS, VolunteerRow, encode_tags,
};
use crate::{Database, now_millis};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use seclink_types::models::{NgoProfile, Profile, ProfileKind, Role, VolunteerProfile};

pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

pub struct NewVolunteer {
    pub id: Uuid,
    pub full_name: String,
    pub weekly_availability: u32,
    pub areas_of_expertise: Vec<String>,
    pub resume_url: Option<String>,
    pub background_check: bool,
}

pub struct NewNgo {
    pub id: Uuid,
    pub organization_name: String,
    pub areas_of_concern: Vec<String>,
}

#[derive(Default)]
pub struct VolunteerPatch {
    pub full_name: Option<String>,
    pub weekly_availability: Option<u32>,
    pub areas_of_expertise: Option<Vec<String>>,
    pub resume_url: Option<String>,
}

#[derive(Default)]
pub struct NgoPatch {
    pub organization_name: Option<String>,
    pub areas_of_concern: Option<Vec<String>>,
}

/// Result of a volunteer edit. `replaced_resume` is the old blob when the
/// patch swapped in a new one.
pub struct VolunteerUpdate {
    pub profile: VolunteerProfile,
    pub replaced_resume: Option<String>,
}

/// A user removed together with its profile. `resume_url` is the blob the
/// caller should now delete.
pub struct DeletedAccount {
    pub user: UserRow,
    pub resume_url: Option<String>,
}

/// A user after a role change. `dropped_resume` is set when the change
/// removed a volunteer profile that had a resume.
pub struct RoleChange {
    pub user: UserRow,
    pub dropped_resume: Option<String>,
}

/// True when `err` is the `users.email` uniqueness constraint firing, i.e.
/// another writer registered the same address first.
pub fn is_email_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, Some(msg)))
            if e.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains("users.email")
    )
}

impl Database {
    // -- Users --

    /// Bare user with no profile linked.
    pub fn create_user(&self, user: &NewUser) -> Result<()> {
        self.with_conn_mut(|conn| insert_user(conn, user, None))
    }

    pub fn register_volunteer(&self, user: &NewUser, volunteer: &NewVolunteer) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_volunteer(&tx, volunteer)?;
            insert_user(&tx, user, Some(&volunteer.id.to_string()))?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn register_ngo(&self, user: &NewUser, ngo: &NewNgo) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_ngo(&tx, ngo)?;
            insert_user(&tx, user, Some(&ngo.id.to_string()))?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Owner of a volunteer or NGO profile.
    pub fn get_user_by_ref_id(&self, ref_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "ref_id", ref_id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([], UserRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Whether `email` belongs to a user other than `except_user_id`.
    pub fn email_in_use(&self, email: &str, except_user_id: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let taken = conn
                .query_row(
                    "SELECT 1 FROM users WHERE email = ?1 AND (?2 IS NULL OR id != ?2)",
                    rusqlite::params![email, except_user_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(taken)
        })
    }

    pub fn update_user_email(&self, user_id: &str, email: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET email = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![email, now_millis(), user_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Change a user's role. When the new role owns a different profile
    /// kind, the old profile is deleted and the reference cleared.
    pub fn set_user_role(&self, user_id: &str, role: Role) -> Result<Option<RoleChange>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(user) = query_user(&tx, "id", user_id)? else {
                return Ok(None);
            };

            let current = user.role()?;
            let mut dropped_resume = None;
            let mut ref_id = user.ref_id.clone();
            if current.profile_kind() != role.profile_kind() {
                if let Some(old_ref) = ref_id.take() {
                    dropped_resume = delete_profile(&tx, current, &old_ref)?;
                }
            }

            tx.execute(
                "UPDATE users SET role = ?1, ref_id = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![role.as_str(), ref_id, now_millis(), user_id],
            )?;
            let updated = query_user(&tx, "id", user_id)?;
            tx.commit()?;

            Ok(updated.map(|user| RoleChange { user, dropped_resume }))
        })
    }

    /// Delete a user and the profile it owns. Messages are left in place.
    pub fn delete_user(&self, user_id: &str) -> Result<Option<DeletedAccount>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(user) = query_user(&tx, "id", user_id)? else {
                return Ok(None);
            };

            let resume_url = match &user.ref_id {
                Some(ref_id) => delete_profile(&tx, user.role()?, ref_id)?,
                None => None,
            };
            tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
            tx.commit()?;

            Ok(Some(DeletedAccount { user, resume_url }))
        })
    }

    // -- Volunteers --

    pub fn get_volunteer(&self, id: &str) -> Result<Option<VolunteerProfile>> {
        let row = self.with_conn(|conn| query_volunteer(conn, id))?;
        row.map(VolunteerProfile::try_from).transpose()
    }

    pub fn list_volunteers(
        &self,
        min_hours: Option<u32>,
        expertise: Option<&str>,
    ) -> Result<Vec<VolunteerProfile>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VOLUNTEER_COLUMNS} FROM volunteers
                 WHERE (?1 IS NULL OR weekly_availability >= ?1)
                   AND (?2 IS NULL OR EXISTS (
                        SELECT 1 FROM json_each(areas_of_expertise) WHERE value = ?2))
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![min_hours, expertise], VolunteerRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(VolunteerProfile::try_from).collect()
    }

    /// Create a volunteer profile and link it to an existing user.
    pub fn create_volunteer_for_user(&self, user_id: &str, volunteer: &NewVolunteer) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_volunteer(&tx, volunteer)?;
            tx.execute(
                "UPDATE users SET ref_id = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![volunteer.id.to_string(), now_millis(), user_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn update_volunteer(&self, id: &str, patch: &VolunteerPatch) -> Result<Option<VolunteerUpdate>> {
        let tags = patch.areas_of_expertise.as_deref().map(encode_tags).transpose()?;

        let updated = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(before) = query_volunteer(&tx, id)? else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE volunteers SET
                    full_name = COALESCE(?1, full_name),
                    weekly_availability = COALESCE(?2, weekly_availability),
                    areas_of_expertise = COALESCE(?3, areas_of_expertise),
                    resume_url = COALESCE(?4, resume_url),
                    updated_at = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    patch.full_name,
                    patch.weekly_availability,
                    tags,
                    patch.resume_url,
                    now_millis(),
                    id
                ],
            )?;
            let after = query_volunteer(&tx, id)?;
            tx.commit()?;

            let replaced = match (&patch.resume_url, before.resume_url) {
                (Some(new), Some(old)) if *new != old => Some(old),
                _ => None,
            };
            Ok(after.map(|row| (row, replaced)))
        })?;

        updated
            .map(|(row, replaced_resume)| {
                Ok(VolunteerUpdate {
                    profile: VolunteerProfile::try_from(row)?,
                    replaced_resume,
                })
            })
            .transpose()
    }

    // -- NGOs --

    pub fn get_ngo(&self, id: &str) -> Result<Option<NgoProfile>> {
        let row = self.with_conn(|conn| query_ngo(conn, id))?;
        row.map(NgoProfile::try_from).transpose()
    }

    pub fn list_ngos(&self, concern: Option<&str>) -> Result<Vec<NgoProfile>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NGO_COLUMNS} FROM ngos
                 WHERE ?1 IS NULL OR EXISTS (
                    SELECT 1 FROM json_each(areas_of_concern) WHERE value = ?1)
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([concern], NgoRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(NgoProfile::try_from).collect()
    }

    pub fn update_ngo(&self, id: &str, patch: &NgoPatch) -> Result<Option<NgoProfile>> {
        let tags = patch.areas_of_concern.as_deref().map(encode_tags).transpose()?;

        let row = self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE ngos SET
                    organization_name = COALESCE(?1, organization_name),
                    areas_of_concern = COALESCE(?2, areas_of_concern),
                    updated_at = ?3
                 WHERE id = ?4",
                rusqlite::params![patch.organization_name, tags, now_millis(), id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_ngo(conn, id)
        })?;
        row.map(NgoProfile::try_from).transpose()
    }

    // -- Profiles --

    /// Look up the profile a user of `role` links to via `ref_id`.
    pub fn find_profile(&self, role: Role, ref_id: &str) -> Result<Option<Profile>> {
        match role.profile_kind() {
            Some(ProfileKind::Volunteer) => Ok(self.get_volunteer(ref_id)?.map(Profile::Volunteer)),
            Some(ProfileKind::Ngo) => Ok(self.get_ngo(ref_id)?.map(Profile::Ngo)),
            None => Ok(None),
        }
    }
}

fn insert_user(conn: &Connection, user: &NewUser, ref_id: Option<&str>) -> Result<()> {
    let now = now_millis();
    conn.execute(
        "INSERT INTO users (id, email, password, role, ref_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        rusqlite::params![
            user.id.to_string(),
            user.email,
            user.password_hash,
            user.role.as_str(),
            ref_id,
            now
        ],
    )?;
    Ok(())
}

fn insert_volunteer(conn: &Connection, v: &NewVolunteer) -> Result<()> {
    let now = now_millis();
    conn.execute(
        "INSERT INTO volunteers
            (id, full_name, weekly_availability, areas_of_expertise, resume_url, background_check, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![
            v.id.to_string(),
            v.full_name,
            v.weekly_availability,
            encode_tags(&v.areas_of_expertise)?,
            v.resume_url,
            v.background_check,
            now
        ],
    )?;
    Ok(())
}

fn insert_ngo(conn: &Connection, n: &NewNgo) -> Result<()> {
    let now = now_millis();
    conn.execute(
        "INSERT INTO ngos (id, organization_name, areas_of_concern, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        rusqlite::params![
            n.id.to_string(),
            n.organization_name,
            encode_tags(&n.areas_of_concern)?,
            now
        ],
    )?;
    Ok(())
}

/// Removes the profile behind `ref_id`, returning its resume blob if any.
fn delete_profile(conn: &Connection, role: Role, ref_id: &str) -> Result<Option<String>> {
    match role.profile_kind() {
        Some(ProfileKind::Volunteer) => {
            let resume = query_volunteer(conn, ref_id)?.and_then(|v| v.resume_url);
            conn.execute("DELETE FROM volunteers WHERE id = ?1", [ref_id])?;
            Ok(resume)
        }
        Some(ProfileKind::Ngo) => {
            conn.execute("DELETE FROM ngos WHERE id = ?1", [ref_id])?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// `column` is always one of our own literals, never caller input.
fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    let row = stmt.query_row([value], UserRow::from_row).optional()?;
    Ok(row)
}

fn query_volunteer(conn: &Connection, id: &str) -> Result<Option<VolunteerRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {VOLUNTEER_COLUMNS} FROM volunteers WHERE id = ?1"))?;
    let row = stmt.query_row([id], VolunteerRow::from_row).optional()?;
    Ok(row)
}

fn query_ngo(conn: &Connection, id: &str) -> Result<Option<NgoRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {NGO_COLUMNS} FROM ngos WHERE id = ?1"))?;
    let row = stmt.query_row([id], NgoRow::from_row).optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role,
        }
    }

    fn new_volunteer(name: &str, hours: u32, tags: &[&str]) -> NewVolunteer {
        NewVolunteer {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            weekly_availability: hours,
            areas_of_expertise: tags.iter().map(|t| t.to_string()).collect(),
            resume_url: Some(format!("/uploads/resumes/{name}.pdf")),
            background_check: true,
        }
    }

    #[test]
    fn register_volunteer_links_profile() {
        let db = Database::open_in_memory().unwrap();
        let user = new_user("vol@example.org", Role::Volunteer);
        let vol = new_volunteer("Ada", 10, &["pentest"]);
        db.register_volunteer(&user, &vol).unwrap();

        let row = db.get_user_by_email("vol@example.org").unwrap().unwrap();
        assert_eq!(row.ref_id.as_deref(), Some(vol.id.to_string().as_str()));

        let owner = db.get_user_by_ref_id(&vol.id.to_string()).unwrap().unwrap();
        assert_eq!(owner.id, user.id.to_string());

        let profile = db.find_profile(Role::Volunteer, &vol.id.to_string()).unwrap().unwrap();
        assert_eq!(profile.display_name(), "Ada");
    }

    #[test]
    fn volunteer_filters() {
        let db = Database::open_in_memory().unwrap();
        for (i, (name, hours, tags)) in [
            ("a", 5, vec!["forensics"]),
            ("b", 12, vec!["pentest", "forensics"]),
            ("c", 20, vec!["pentest"]),
        ]
        .into_iter()
        .enumerate()
        {
            db.register_volunteer(
                &new_user(&format!("{i}@example.org"), Role::Volunteer),
                &new_volunteer(name, hours, &tags),
            )
            .unwrap();
        }

        assert_eq!(db.list_volunteers(None, None).unwrap().len(), 3);
        assert_eq!(db.list_volunteers(Some(10), None).unwrap().len(), 2);
        assert_eq!(db.list_volunteers(None, Some("forensics")).unwrap().len(), 2);

        let both = db.list_volunteers(Some(10), Some("forensics")).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].full_name, "b");
    }

    #[test]
    fn ngo_concern_filter_and_patch() {
        let db = Database::open_in_memory().unwrap();
        let ngo = NewNgo {
            id: Uuid::new_v4(),
            organization_name: "Shelter".into(),
            areas_of_concern: vec!["phishing".into()],
        };
        db.register_ngo(&new_user("ngo@example.org", Role::Ngo), &ngo).unwrap();

        assert_eq!(db.list_ngos(Some("phishing")).unwrap().len(), 1);
        assert!(db.list_ngos(Some("ransomware")).unwrap().is_empty());

        let patched = db
            .update_ngo(
                &ngo.id.to_string(),
                &NgoPatch {
                    organization_name: None,
                    areas_of_concern: Some(vec!["ransomware".into()]),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(patched.organization_name, "Shelter");
        assert_eq!(patched.areas_of_concern, vec!["ransomware".to_string()]);

        assert!(db.update_ngo(&Uuid::new_v4().to_string(), &NgoPatch::default()).unwrap().is_none());
    }

    #[test]
    fn update_volunteer_reports_replaced_resume() {
        let db = Database::open_in_memory().unwrap();
        let vol = new_volunteer("Ada", 10, &[]);
        db.register_volunteer(&new_user("v@example.org", Role::Volunteer), &vol).unwrap();

        let update = db
            .update_volunteer(
                &vol.id.to_string(),
                &VolunteerPatch {
                    weekly_availability: Some(15),
                    resume_url: Some("/uploads/resumes/new.pdf".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(update.profile.weekly_availability, 15);
        assert_eq!(update.profile.full_name, "Ada");
        assert_eq!(update.replaced_resume.as_deref(), Some("/uploads/resumes/Ada.pdf"));
    }

    #[test]
    fn delete_user_removes_profile() {
        let db = Database::open_in_memory().unwrap();
        let user = new_user("v@example.org", Role::Volunteer);
        let vol = new_volunteer("Ada", 10, &[]);
        db.register_volunteer(&user, &vol).unwrap();

        let deleted = db.delete_user(&user.id.to_string()).unwrap().unwrap();
        assert_eq!(deleted.resume_url.as_deref(), Some("/uploads/resumes/Ada.pdf"));
        assert!(db.get_user_by_id(&user.id.to_string()).unwrap().is_none());
        assert!(db.get_volunteer(&vol.id.to_string()).unwrap().is_none());

        assert!(db.delete_user(&user.id.to_string()).unwrap().is_none());
    }

    #[test]
    fn role_change_drops_mismatched_profile() {
        let db = Database::open_in_memory().unwrap();
        let user = new_user("v@example.org", Role::Volunteer);
        let vol = new_volunteer("Ada", 10, &[]);
        db.register_volunteer(&user, &vol).unwrap();

        let changed = db.set_user_role(&user.id.to_string(), Role::Admin).unwrap().unwrap();
        assert_eq!(changed.user.role, "admin");
        assert!(changed.user.ref_id.is_none());
        assert!(changed.dropped_resume.is_some());
        assert!(db.get_volunteer(&vol.id.to_string()).unwrap().is_none());
    }

    #[test]
    fn role_change_keeps_matching_profile() {
        let db = Database::open_in_memory().unwrap();
        let user = new_user("v@example.org", Role::Volunteer);
        let vol = new_volunteer("Ada", 10, &[]);
        db.register_volunteer(&user, &vol).unwrap();

        let changed = db.set_user_role(&user.id.to_string(), Role::Volunteer).unwrap().unwrap();
        assert_eq!(changed.user.ref_id, Some(vol.id.to_string()));
        assert!(changed.dropped_resume.is_none());
    }

    #[test]
    fn duplicate_email_is_reported_as_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("dup@example.org", Role::Admin)).unwrap();

        let err = db
            .register_ngo(
                &new_user("dup@example.org", Role::Ngo),
                &NewNgo {
                    id: Uuid::new_v4(),
                    organization_name: "Late".into(),
                    areas_of_concern: vec![],
                },
            )
            .unwrap_err();
        assert!(is_email_conflict(&err));
        // The profile insert was rolled back with the user.
        assert!(db.list_ngos(None).unwrap().is_empty());

        let user = new_user("other@example.org", Role::Admin);
        db.create_user(&user).unwrap();
        let same_id = NewUser { id: user.id, ..new_user("third@example.org", Role::Admin) };
        let err = db.create_user(&same_id).unwrap_err();
        assert!(!is_email_conflict(&err), "primary key clash is not an email conflict");
        assert!(!is_email_conflict(&anyhow::anyhow!("disk on fire")));
    }

    #[test]
    fn email_in_use_ignores_self() {
        let db = Database::open_in_memory().unwrap();
        let user = new_user("a@example.org", Role::Admin);
        db.create_user(&user).unwrap();

        let id = user.id.to_string();
        assert!(db.email_in_use("a@example.org", None).unwrap());
        assert!(!db.email_in_use("a@example.org", Some(&id)).unwrap());
        assert!(!db.email_in_use("b@example.org", None).unwrap());
    }
}

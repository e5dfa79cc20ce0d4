//! Identity directory — the credentials/lookup collaborator consumed by the
//! authentication orchestrator. Profile CRUD lives elsewhere; this module
//! only answers "are these credentials valid" and "who is this id".

use serde::Serialize;

/// Cost for hashing the demo roster at startup. Low by design: these are
/// seeded fixtures, and a high cost would only slow boot and tests.
const SEED_COST: u32 = 6;

#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
}

struct UserRecord {
    identity: Identity,
    password_hash: String,
}

pub struct UserDirectory {
    users: Vec<UserRecord>,
}

impl UserDirectory {
    /// The built-in roster. Passwords are bcrypt-hashed at construction so no
    /// plaintext credential survives past startup.
    pub fn seeded() -> anyhow::Result<Self> {
        let seeds = [
            ("user-learner", "learner@example.com", "Learner#123", vec!["user"]),
            (
                "user-instructor",
                "instructor@example.com",
                "Instructor#123",
                vec!["moderator"],
            ),
            ("user-admin", "admin@example.com", "Admin#123", vec!["admin"]),
        ];

        let mut users = Vec::with_capacity(seeds.len());
        for (id, email, password, roles) in seeds {
            users.push(UserRecord {
                identity: Identity {
                    id: id.to_string(),
                    email: email.to_string(),
                    roles: roles.into_iter().map(String::from).collect(),
                },
                password_hash: bcrypt::hash(password, SEED_COST)?,
            });
        }
        Ok(Self { users })
    }

    /// `Some(identity)` when the email is known and the password matches.
    /// Email comparison is case-insensitive.
    pub fn validate_credentials(&self, email: &str, password: &str) -> Option<Identity> {
        let record = self
            .users
            .iter()
            .find(|u| u.identity.email.eq_ignore_ascii_case(email))?;
        match bcrypt::verify(password, &record.password_hash) {
            Ok(true) => Some(record.identity.clone()),
            _ => None,
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<Identity> {
        self.users
            .iter()
            .find(|u| u.identity.id == id)
            .map(|u| u.identity.clone())
    }
}

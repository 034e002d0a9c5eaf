use serde::{Deserialize, Serialize};

pub type SessionId = u64;

/// Document access role, resolved by the session layer upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owners,
    Editors,
    Viewers,
    None,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owners => "owners",
            Role::Editors => "editors",
            Role::Viewers => "viewers",
            Role::None => "none",
        }
    }

    pub fn can_view(self) -> bool {
        self != Role::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub name: String,
}

/// One connected client of the document. Authentication and role resolution
/// happen upstream; the engine treats this as plain data keyed by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub role: Role,
    pub user: Option<UserProfile>,
}

impl Session {
    pub fn new(id: SessionId, role: Role) -> Self {
        Self {
            id,
            role,
            user: None,
        }
    }

    pub fn with_user(mut self, id: i64, email: &str, name: &str) -> Self {
        self.user = Some(UserProfile {
            id,
            email: email.to_string(),
            name: name.to_string(),
        });
        self
    }
}

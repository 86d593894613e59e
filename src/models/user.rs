use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Staff,
    Supervisor,
    Maintenance,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Staff => "staff",
            Role::Supervisor => "supervisor",
            Role::Maintenance => "maintenance",
            Role::Admin => "admin",
        }
    }

    /// Where the frontend sends a user of this role after login.
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::Student => "/student-dashboard",
            Role::Staff => "/staff-dashboard",
            Role::Supervisor => "/supervisor-dashboard",
            Role::Maintenance => "/maintenance-dashboard",
            Role::Admin => "/admin-dashboard",
        }
    }

    /// Institutional mail domain required at signup, if any.
    pub fn email_domain(&self) -> Option<&'static str> {
        match self {
            Role::Student => Some("gmail.com"),
            Role::Staff => Some("staff.com"),
            Role::Supervisor => Some("sup.com"),
            Role::Maintenance | Role::Admin => None,
        }
    }

    pub fn can_self_register(&self) -> bool {
        !matches!(self, Role::Admin)
    }

    /// Roles that file complaints.
    pub fn is_submitter(&self) -> bool {
        matches!(self, Role::Student | Role::Staff)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "staff" => Ok(Role::Staff),
            "supervisor" => Ok(Role::Supervisor),
            "maintenance" => Ok(Role::Maintenance),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// A user record as stored in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub name: String,
    /// Date of birth, `YYYY-MM-DD`. Doubles as the reset credential.
    #[serde(default)]
    pub dob: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// Complaint category a supervisor oversees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    /// bcrypt hash. Older records may still carry plaintext.
    #[serde(default)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// What we expose to the frontend.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
    pub dob: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email,
            role: u.role,
            name: u.name,
            dob: u.dob,
            department: u.department,
            category: u.category,
            profile_image_url: u.profile_image_url,
            created_at: u.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!("Supervisor".parse::<Role>(), Ok(Role::Supervisor));
        assert_eq!(" admin ".parse::<Role>(), Ok(Role::Admin));
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn routes_each_role_to_its_dashboard() {
        assert_eq!(Role::Student.dashboard_path(), "/student-dashboard");
        assert_eq!(Role::Staff.dashboard_path(), "/staff-dashboard");
        assert_eq!(Role::Supervisor.dashboard_path(), "/supervisor-dashboard");
        assert_eq!(Role::Maintenance.dashboard_path(), "/maintenance-dashboard");
        assert_eq!(Role::Admin.dashboard_path(), "/admin-dashboard");
    }

    #[test]
    fn public_user_drops_password() {
        let user = User {
            user_id: "u1".into(),
            email: "a@gmail.com".into(),
            role: Role::Student,
            name: "A".into(),
            dob: "2001-02-03".into(),
            department: Some("CSE".into()),
            category: None,
            profile_image_url: None,
            password: "$2b$04$secret".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(PublicUser::from(user)).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["role"], "student");
        assert_eq!(json["department"], "CSE");
    }
}

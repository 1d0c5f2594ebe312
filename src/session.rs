use crate::policy::{Department, User};
use serde::Serialize;

/// The logged-in user for this sidecar process.
///
/// Built once by `session.login` and handed to every handler through
/// `AppState`; nothing reads department or name from anywhere else.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub name: String,
    pub email: Option<String>,
    /// Department exactly as supplied at login.
    pub department: String,
    pub logged_in_at: String,
}

impl Session {
    pub fn new(name: &str, email: Option<&str>, department: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            email: email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
            department: department.trim().to_string(),
            logged_in_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn user(&self) -> User {
        User::from_department_str(&self.department)
    }

    pub fn known_department(&self) -> Option<Department> {
        Department::parse(&self.department)
    }

    pub fn is_administrator(&self) -> bool {
        self.known_department() == Some(Department::Administrator)
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a complaint. Stored as its canonical lowercase label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Completed,
    Reopened,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 4] = [
        ComplaintStatus::Pending,
        ComplaintStatus::InProgress,
        ComplaintStatus::Completed,
        ComplaintStatus::Reopened,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Pending => "pending",
            ComplaintStatus::InProgress => "in progress",
            ComplaintStatus::Completed => "completed",
            ComplaintStatus::Reopened => "reopened",
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintStatus {
    type Err = String;

    /// Accepts every spelling that has been written to the collection over
    /// time: any casing, `-`/`_`/space as separator, and `resolved` for
    /// `completed`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect();
        match key.as_str() {
            "pending" => Ok(ComplaintStatus::Pending),
            "inprogress" => Ok(ComplaintStatus::InProgress),
            "completed" | "resolved" => Ok(ComplaintStatus::Completed),
            "reopened" => Ok(ComplaintStatus::Reopened),
            _ => Err(format!("Unknown status: {}", s.trim())),
        }
    }
}

/// A complaint record as stored in the `complaints` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complaint {
    pub complaint_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub building: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_time: Option<String>,

    /// Raw stored label; see [`Complaint::status_kind`].
    pub status: String,

    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    /// Role of the submitter ("student" or "staff").
    #[serde(default)]
    pub submitted_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    // Written with `$set` only and never sent to clients.
    #[serde(default, skip_serializing)]
    pub image_file_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub image_content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reopen_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reopened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_by_role: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Complaint {
    /// Parsed status, or `None` for labels no known spelling matches.
    pub fn status_kind(&self) -> Option<ComplaintStatus> {
        self.status.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_spellings() {
        for raw in ["in progress", "In Progress", "in-progress", "IN_PROGRESS", "inprogress"] {
            assert_eq!(raw.parse::<ComplaintStatus>(), Ok(ComplaintStatus::InProgress), "{raw}");
        }
        assert_eq!("Reopened".parse::<ComplaintStatus>(), Ok(ComplaintStatus::Reopened));
        assert_eq!("resolved".parse::<ComplaintStatus>(), Ok(ComplaintStatus::Completed));
        assert_eq!("Completed".parse::<ComplaintStatus>(), Ok(ComplaintStatus::Completed));
    }

    #[test]
    fn rejects_unknown_labels() {
        assert!("on hold".parse::<ComplaintStatus>().is_err());
        assert!("".parse::<ComplaintStatus>().is_err());
    }

    #[test]
    fn canonical_labels_round_trip() {
        for status in ComplaintStatus::ALL {
            assert_eq!(status.as_str().parse::<ComplaintStatus>(), Ok(status));
        }
    }
}

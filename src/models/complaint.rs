use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString};

/// Complaint priority level.
///
/// Declaration order is the canonical class order used everywhere a class
/// index is needed (label encoding, confusion matrices, vote arrays) and is
/// also the tie-break order for ensemble votes: High beats Medium beats Low.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumString,
    Display,
    EnumIter,
    EnumCount,
)]
#[strum(ascii_case_insensitive)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// All classes in canonical order
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Class index in canonical order
    pub fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// A single citizen complaint.
///
/// Fields are private so a record cannot change after it has been validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplaintRecord {
    issue_type: String,
    complaint_text: String,
    attachments: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority_label: Option<Priority>,
}

impl ComplaintRecord {
    /// Create an unlabeled record, rejecting negative or oversized attachment counts
    pub fn new(
        issue_type: impl Into<String>,
        complaint_text: impl Into<String>,
        attachments: i64,
    ) -> Result<Self> {
        let attachments = u32::try_from(attachments).map_err(|_| {
            AppError::InvalidInput(format!(
                "attachments must be a non-negative integer, got {}",
                attachments
            ))
        })?;

        Ok(Self {
            issue_type: issue_type.into(),
            complaint_text: complaint_text.into(),
            attachments,
            priority_label: None,
        })
    }

    /// Create a labeled training record
    pub fn labeled(
        issue_type: impl Into<String>,
        complaint_text: impl Into<String>,
        attachments: i64,
        priority: Priority,
    ) -> Result<Self> {
        let mut record = Self::new(issue_type, complaint_text, attachments)?;
        record.priority_label = Some(priority);
        Ok(record)
    }

    /// Parse a raw attachment count as typed by a user or read from a file
    pub fn parse_attachments(raw: &str) -> Result<i64> {
        let trimmed = raw.trim();
        let value: i64 = trimmed.parse().map_err(|_| {
            AppError::InvalidInput(format!(
                "attachments must be a non-negative integer, got {:?}",
                trimmed
            ))
        })?;

        if value < 0 {
            return Err(AppError::InvalidInput(format!(
                "attachments must be a non-negative integer, got {}",
                value
            )));
        }

        Ok(value)
    }

    pub fn issue_type(&self) -> &str {
        &self.issue_type
    }

    pub fn complaint_text(&self) -> &str {
        &self.complaint_text
    }

    pub fn attachments(&self) -> u32 {
        self.attachments
    }

    pub fn priority_label(&self) -> Option<Priority> {
        self.priority_label
    }

    /// Label required for training; unlabeled rows are an input error
    pub fn require_label(&self) -> Result<Priority> {
        self.priority_label.ok_or_else(|| {
            AppError::InvalidInput(format!(
                "training record {:?} has no priority_label",
                self.issue_type
            ))
        })
    }
}

/// Single-record inference request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub issue_type: String,
    pub complaint_text: String,
    pub attachments: i64,
}

impl InferenceRequest {
    pub fn new(
        issue_type: impl Into<String>,
        complaint_text: impl Into<String>,
        attachments: i64,
    ) -> Self {
        Self {
            issue_type: issue_type.into(),
            complaint_text: complaint_text.into(),
            attachments,
        }
    }
}

impl TryFrom<&InferenceRequest> for ComplaintRecord {
    type Error = AppError;

    fn try_from(request: &InferenceRequest) -> Result<Self> {
        ComplaintRecord::new(
            request.issue_type.clone(),
            request.complaint_text.clone(),
            request.attachments,
        )
    }
}

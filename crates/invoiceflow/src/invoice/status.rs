use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Processing,
    Processed,
    RequiresReview,
    Validated,
    Approved,
    Rejected,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown invoice status '{0}'")]
pub struct ParseStatusError(pub String);

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 8] = [
        InvoiceStatus::Pending,
        InvoiceStatus::Processing,
        InvoiceStatus::Processed,
        InvoiceStatus::RequiresReview,
        InvoiceStatus::Validated,
        InvoiceStatus::Approved,
        InvoiceStatus::Rejected,
        InvoiceStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::Processed => "processed",
            InvoiceStatus::RequiresReview => "requires_review",
            InvoiceStatus::Validated => "validated",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Rejected => "rejected",
            InvoiceStatus::Failed => "failed",
        }
    }

    /// The statuses reachable from `self` in one step.
    pub fn successors(self) -> &'static [InvoiceStatus] {
        use InvoiceStatus::*;
        match self {
            Pending => &[Processing],
            Processing => &[Processed, RequiresReview, Failed],
            Processed => &[Validated, Approved, Rejected],
            RequiresReview => &[Validated],
            Validated => &[Validated, Approved, Rejected],
            Failed => &[Pending],
            Approved | Rejected => &[],
        }
    }

    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        self.successors().contains(&next)
    }

    /// Statuses in which extracted fields may be corrected by a reviewer.
    pub fn is_editable(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Processed | InvoiceStatus::RequiresReview | InvoiceStatus::Validated
        )
    }

    pub fn is_exportable(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Processed | InvoiceStatus::Validated | InvoiceStatus::Approved
        )
    }

    /// Statuses a duplicate match may point at.
    pub fn is_accepted(self) -> bool {
        self.is_exportable()
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Approved | InvoiceStatus::Rejected | InvoiceStatus::Failed
        )
    }

    /// Any status outside the processing window. Progress streams end here.
    pub fn is_settled(self) -> bool {
        !matches!(self, InvoiceStatus::Pending | InvoiceStatus::Processing)
    }

    /// Coarse progress percentage reported for a status.
    pub fn progress(self) -> u8 {
        match self {
            InvoiceStatus::Pending => 10,
            InvoiceStatus::Processing => 50,
            InvoiceStatus::Processed
            | InvoiceStatus::Validated
            | InvoiceStatus::Approved
            | InvoiceStatus::RequiresReview => 100,
            InvoiceStatus::Failed | InvoiceStatus::Rejected => 0,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Lectern recognition pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a page image.
    PageId
);
uuid_id!(
    /// Identifier of the document a page belongs to.
    DocumentId
);
uuid_id!(
    /// Unique identifier for one engine invocation.
    AttemptId
);
uuid_id!(
    /// Identifier of a fused transcription.
    FusedId
);
uuid_id!(
    /// Identifier of a human review task.
    ReviewTaskId
);

/// Stable identifier of a configured recognition engine (e.g. `"tesseract"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(pub String);

impl EngineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of writing a page carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Printed,
    Handwritten,
    /// Both printed and handwritten regions.
    Mixed,
    /// The classifier was unsure or failed.
    Unknown,
}

impl Label {
    /// Capabilities an engine must offer (at least one of) to be dispatched
    /// for a page with this label.
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Printed => &[Capability::Printed],
            Self::Handwritten => &[Capability::Handwritten],
            Self::Mixed | Self::Unknown => &[Capability::Printed, Capability::Handwritten],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Printed => "printed",
            Self::Handwritten => "handwritten",
            Self::Mixed => "mixed",
            Self::Unknown => "unknown",
        }
    }
}

/// Specialisation advertised by an engine adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Printed,
    Handwritten,
}

/// Container format the page image arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Png,
    Jpeg,
    Tiff,
    Bmp,
    WebP,
    Other,
}

impl SourceFormat {
    /// MIME type string, as reported to adapters that care.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::WebP => "image/webp",
            Self::Other => "application/octet-stream",
        }
    }

    /// Infer the format from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "tif" | "tiff" => Self::Tiff,
            "bmp" => Self::Bmp,
            "webp" => Self::WebP,
            _ => Self::Other,
        }
    }
}

/// One page image, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub document_id: DocumentId,
    /// Zero-based position of the page inside its document.
    pub page_index: u32,
    pub width: u32,
    pub height: u32,
    pub format: SourceFormat,
    /// SHA-256 hex digest of the original image bytes.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a page through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageStatus {
    Received,
    Classified,
    /// All engine attempts reached a terminal outcome and a result was fused.
    Recognized,
    AutoAccepted,
    NeedsReview,
    Corrected,
    Rejected,
    /// Unrecoverable at the automated layer (bad input, no engine succeeded).
    Failed,
    Cancelled,
}

impl PageStatus {
    /// Whether a completion event is due for a page in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AutoAccepted | Self::Corrected | Self::Rejected | Self::Failed | Self::Cancelled
        )
    }
}

/// Output of the document classifier for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub page_id: PageId,
    pub label: Label,
    /// Always within [0, 1].
    pub confidence: f64,
    /// The model failed or was below the confidence floor.
    pub degraded: bool,
    pub classified_at: DateTime<Utc>,
}

/// Terminal outcome of a single engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Error,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// A recognised text region in image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub text: String,
    pub confidence: Option<f64>,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// One adapter invocation for one page. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineAttempt {
    pub id: AttemptId,
    pub page_id: PageId,
    pub engine_id: EngineId,
    /// 1 for the first call, incremented per retry.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub text: String,
    pub confidence: f64,
    pub boxes: Vec<BoundingBox>,
    pub error: Option<String>,
}

impl EngineAttempt {
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// How a fused result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FusionMethod {
    SingleEngine,
    Consensus,
    BestOfDisagreeing,
}

impl FusionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleEngine => "single-engine",
            Self::Consensus => "consensus",
            Self::BestOfDisagreeing => "best-of-disagreeing",
        }
    }
}

/// The current best transcription for a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub id: FusedId,
    pub page_id: PageId,
    pub text: String,
    /// Aggregate confidence in [0, 1].
    pub confidence: f64,
    /// Winning cluster score divided by the total weight of all successful
    /// attempts. Equal to `confidence` for single-engine results.
    pub support: f64,
    pub method: FusionMethod,
    /// Forces human review regardless of `confidence`.
    pub low_certainty: bool,
    pub contributing: Vec<AttemptId>,
    pub computed_at: DateTime<Utc>,
}

/// Validation state of a fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationState {
    Pending,
    AutoAccepted,
    NeedsReview,
    Corrected,
    Rejected,
}

impl ValidationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AutoAccepted | Self::Corrected | Self::Rejected)
    }

    /// Page status that mirrors this validation state.
    pub fn page_status(&self) -> PageStatus {
        match self {
            Self::Pending => PageStatus::Recognized,
            Self::AutoAccepted => PageStatus::AutoAccepted,
            Self::NeedsReview => PageStatus::NeedsReview,
            Self::Corrected => PageStatus::Corrected,
            Self::Rejected => PageStatus::Rejected,
        }
    }
}

/// Why a page was put in front of a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewReason {
    /// Confidence below the accept threshold.
    LowConfidence,
    /// Engines disagreed; the result is low-certainty.
    Disagreement,
    /// Every dispatched engine failed.
    NoSuccessfulEngine,
    /// No enabled engine could handle the page.
    NoEligibleEngine,
}

/// State of a review task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewTaskStatus {
    Open,
    Corrected,
    Rejected,
}

/// A page awaiting (or having received) human validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewTask {
    pub id: ReviewTaskId,
    pub page_id: PageId,
    /// Fused result under review; `None` for failed pages.
    pub fused_id: Option<FusedId>,
    pub reason: ReviewReason,
    pub status: ReviewTaskStatus,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Authoritative text once corrected.
    pub corrected_text: Option<String>,
    pub note: Option<String>,
}

impl ReviewTask {
    pub fn open(page_id: PageId, fused_id: Option<FusedId>, reason: ReviewReason) -> Self {
        Self {
            id: ReviewTaskId::new(),
            page_id,
            fused_id,
            reason,
            status: ReviewTaskStatus::Open,
            opened_at: Utc::now(),
            resolved_at: None,
            corrected_text: None,
            note: None,
        }
    }
}

/// Human decision on a review task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// Human-provided text becomes authoritative.
    Corrected { text: String },
    /// Page is unreadable or invalid; no automated retry follows.
    Rejected { note: Option<String> },
}

/// Health of a registered engine adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    /// Recent failures below the disable limit, or on trial after cooldown.
    Degraded,
    /// Excluded from dispatch.
    Disabled,
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout or busy engine; safe to retry automatically.
    Transient,
    /// Bad input or unsupported image; retrying cannot help.
    Permanent,
}

/// Kind of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    PageReceived,
    InputRejected,
    Classified,
    ClassificationDegraded,
    EngineAttempt,
    EngineHealthChanged,
    EngineReset,
    NoEligibleEngine,
    NoSuccessfulEngine,
    Fused,
    FusionDisagreement,
    ValidationTransition,
    ReviewOpened,
    ReviewResolved,
    PageFailed,
    PageCancelled,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageReceived => "page_received",
            Self::InputRejected => "input_rejected",
            Self::Classified => "classified",
            Self::ClassificationDegraded => "classification_degraded",
            Self::EngineAttempt => "engine_attempt",
            Self::EngineHealthChanged => "engine_health_changed",
            Self::EngineReset => "engine_reset",
            Self::NoEligibleEngine => "no_eligible_engine",
            Self::NoSuccessfulEngine => "no_successful_engine",
            Self::Fused => "fused",
            Self::FusionDisagreement => "fusion_disagreement",
            Self::ValidationTransition => "validation_transition",
            Self::ReviewOpened => "review_opened",
            Self::ReviewResolved => "review_resolved",
            Self::PageFailed => "page_failed",
            Self::PageCancelled => "page_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "page_received" => Self::PageReceived,
            "input_rejected" => Self::InputRejected,
            "classified" => Self::Classified,
            "classification_degraded" => Self::ClassificationDegraded,
            "engine_attempt" => Self::EngineAttempt,
            "engine_health_changed" => Self::EngineHealthChanged,
            "engine_reset" => Self::EngineReset,
            "no_eligible_engine" => Self::NoEligibleEngine,
            "no_successful_engine" => Self::NoSuccessfulEngine,
            "fused" => Self::Fused,
            "fusion_disagreement" => Self::FusionDisagreement,
            "validation_transition" => Self::ValidationTransition,
            "review_opened" => Self::ReviewOpened,
            "review_resolved" => Self::ReviewResolved,
            "page_failed" => Self::PageFailed,
            "page_cancelled" => Self::PageCancelled,
            _ => return None,
        };
        Some(kind)
    }
}

/// An event to append to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub page_id: Option<PageId>,
    pub engine_id: Option<EngineId>,
    /// Structured context (scores, states, error messages).
    pub details: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn page(kind: AuditKind, page_id: PageId, details: serde_json::Value) -> Self {
        Self {
            kind,
            page_id: Some(page_id),
            engine_id: None,
            details,
            recorded_at: Utc::now(),
        }
    }

    pub fn engine(kind: AuditKind, engine_id: EngineId, details: serde_json::Value) -> Self {
        Self {
            kind,
            page_id: None,
            engine_id: Some(engine_id),
            details,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_engine(mut self, engine_id: EngineId) -> Self {
        self.engine_id = Some(engine_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_mixed_need_both_capabilities() {
        assert_eq!(Label::Unknown.required_capabilities().len(), 2);
        assert_eq!(Label::Mixed.required_capabilities().len(), 2);
        assert_eq!(Label::Printed.required_capabilities(), &[Capability::Printed]);
    }

    #[test]
    fn fusion_method_serializes_kebab_case() {
        let json = serde_json::to_string(&FusionMethod::BestOfDisagreeing).unwrap();
        assert_eq!(json, "\"best-of-disagreeing\"");
        assert_eq!(FusionMethod::SingleEngine.as_str(), "single-engine");
    }

    #[test]
    fn audit_kind_round_trips_through_str() {
        for kind in [AuditKind::EngineAttempt, AuditKind::ReviewResolved, AuditKind::PageCancelled] {
            assert_eq!(AuditKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AuditKind::parse("nope"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(PageStatus::Failed.is_terminal());
        assert!(!PageStatus::NeedsReview.is_terminal());
        assert!(ValidationState::Rejected.is_terminal());
        assert!(!ValidationState::Pending.is_terminal());
    }

    #[test]
    fn source_format_from_extension() {
        assert_eq!(SourceFormat::from_extension("JPG"), SourceFormat::Jpeg);
        assert_eq!(SourceFormat::from_extension("tif"), SourceFormat::Tiff);
        assert_eq!(SourceFormat::from_extension("pdf"), SourceFormat::Other);
    }
}

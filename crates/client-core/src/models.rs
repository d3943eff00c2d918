use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const WELCOME_MESSAGE_ID: &str = "welcome";
pub const WELCOME_MESSAGE: &str = "Hello! I'm your AI Skin Consultant. Ask me anything about skincare products, routines, or ingredients.";
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't connect to the server. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model")]
    Assistant,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub products: Vec<ProductRecord>,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>, image: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            products: Vec::new(),
            image,
            created_at: Utc::now(),
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            products: Vec::new(),
            image: None,
            created_at: Utc::now(),
        }
    }

    pub fn welcome() -> Self {
        Self {
            id: WELCOME_MESSAGE_ID.to_string(),
            role: Role::Assistant,
            content: WELCOME_MESSAGE.to_string(),
            products: Vec::new(),
            image: None,
            created_at: Utc::now(),
        }
    }
}

/// One prior turn as sent upstream; images and products never leave the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
    pub user_location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Partial,
    #[serde(other)]
    Unknown,
}

impl ScanJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Partial)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobResponse {
    pub job_id: String,
    pub status: ScanJobStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_product_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub ingredients_raw: Option<String>,
    #[serde(default)]
    pub ingredients_parsed: Vec<String>,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub extraction_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobResult {
    pub job_id: String,
    pub status: ScanJobStatus,
    #[serde(default)]
    pub user_product_id: Option<i64>,
    #[serde(default)]
    pub extraction: Option<ExtractionResult>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub needs_manual_review: bool,
}

/// Fields a user types in when extraction could not read the label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualScanCompletion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualScanCompletionResponse {
    pub message: String,
    pub product_id: i64,
}

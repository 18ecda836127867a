//! Account RPC bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::User;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub login_challenge: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCrop {
    pub width: u32,
    pub height: u32,
}

/// Uploaded file. `data` travels as standard base64.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime: String,
    pub file_name: String,
    pub crop: Option<ImageCrop>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplierCreateRequest {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub membership: String,
    pub image: Option<Attachment>,
}

impl SupplierCreateRequest {
    /// Trims text fields and lowercases the email. The password is untouched.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            password: self.password.clone(),
            membership: self.membership.trim().to_string(),
            image: self.image.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfirmationRequest {
    pub email: String,
    pub token: String,
    pub token_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordForgotRequest {
    pub email: String,
}

/// Body of methods that take no arguments. Unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyRequest {}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SuccessResponseData {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub image: Option<String>,
    pub user_type: String,
    pub is_email_verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&User> for CustomerProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            full_name: user.full_name(),
            email: user.email.clone(),
            username: user.username.clone(),
            image: user.image.clone(),
            user_type: user.user_type.clone(),
            is_email_verified: user.is_email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierProfile {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub image: Option<String>,
    pub membership: String,
    pub is_email_verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&User> for SupplierProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            full_name: user.full_name(),
            email: user.email.clone(),
            username: user.username.clone(),
            image: user.image.clone(),
            membership: user.membership.clone(),
            is_email_verified: user.is_email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitsByPeriod {
    pub today: u64,
    pub yesterday: u64,
    pub last_week: u64,
    pub last_month: u64,
    pub last_year: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_products: u64,
    pub total_inventory_items: u64,
    pub total_reviews: u64,
    pub product_visits_count: u64,
    pub visits_by_period: VisitsByPeriod,
    pub pending_orders: u64,
    pub total_orders: u64,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_data_is_base64() {
        let att = Attachment {
            data: vec![0xff, 0x00, 0x10],
            mime: "image/png".to_string(),
            ..Attachment::default()
        };
        let json = serde_json::to_value(&att).unwrap();
        assert_eq!(json["data"], "/wAQ");
        let back: Attachment = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, att.data);
    }

    #[test]
    fn missing_request_fields_default_to_empty() {
        let req: LoginRequest = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();
        assert_eq!(req.email, "a@b.c");
        assert!(req.password.is_empty());
    }

    #[test]
    fn sanitize_trims_and_lowercases_email() {
        let req = SupplierCreateRequest {
            username: "  ada ".to_string(),
            email: " Ada@Example.COM ".to_string(),
            password: " keep ".to_string(),
            ..SupplierCreateRequest::default()
        };
        let clean = req.sanitized();
        assert_eq!(clean.username, "ada");
        assert_eq!(clean.email, "ada@example.com");
        assert_eq!(clean.password, " keep ");
    }
}

//! Persistent account entities and field limits.

use serde::{Deserialize, Serialize};

pub const USER_TYPE_SUPPLIER: &str = "supplier";
pub const USER_TYPE_CUSTOMER: &str = "customer";

pub const ROLE_SUPPLIER_ADMIN: &str = "supplier_admin";
pub const ROLE_SUPPLIER: &str = "supplier";
pub const ROLE_CUSTOMER: &str = "customer";

pub const USER_EMAIL_MAX_LENGTH: usize = 256;
pub const USER_NAME_MIN_LENGTH: usize = 2;
pub const USER_NAME_MAX_LENGTH: usize = 64;
pub const USER_FIRST_NAME_MIN_RUNES: usize = 2;
pub const USER_FIRST_NAME_MAX_RUNES: usize = 64;
pub const USER_LAST_NAME_MIN_RUNES: usize = 2;
pub const USER_LAST_NAME_MAX_RUNES: usize = 64;
pub const USER_PASSWORD_MIN_LENGTH: usize = 8;
pub const USER_PASSWORD_MAX_LENGTH: usize = 72;
pub const USER_IMAGE_MAX_SIZE_BYTES: usize = 2 * 1024 * 1024;
pub const USER_IMAGE_ALLOWED_TYPES: [&str; 4] = ["image/png", "image/webp", "image/jpeg", "image/jpg"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// A stored user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub user_type: String,
    pub membership: String,
    pub is_email_verified: bool,
    /// Salted password hash; never the plain password.
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Non-empty for accounts managed by an external identity provider.
    pub auth_service: String,
    pub auth_data: String,
    pub roles: Vec<String>,
    pub locale: String,
    pub image: Option<String>,
    pub image_metadata: Option<ImageMetadata>,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    #[must_use]
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, _) => self.last_name.clone(),
        }
    }

    #[must_use]
    pub fn is_supplier(&self) -> bool {
        self.roles
            .iter()
            .any(|r| r == ROLE_SUPPLIER_ADMIN || r == ROLE_SUPPLIER)
    }

    /// SSO accounts have no local password.
    #[must_use]
    pub fn is_sso(&self) -> bool {
        !self.auth_service.is_empty() || !self.auth_data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    EmailConfirmation,
    PasswordReset,
}

impl TokenType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailConfirmation => "email_confirmation",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// A one-time token as stored: only the hash of the secret is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub token_type: TokenType,
    pub used: bool,
    pub created_at: i64,
    pub expires_at: i64,
}

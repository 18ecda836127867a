//! Data/error union returned by every unary RPC.

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Exactly one of `data` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply<T> {
    Data(T),
    Error(WireError),
}

impl<T> Reply<T> {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&WireError> {
        match self {
            Self::Error(e) => Some(e),
            Self::Data(_) => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(d) => Some(d),
            Self::Error(_) => None,
        }
    }
}

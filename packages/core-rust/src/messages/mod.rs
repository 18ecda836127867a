//! RPC request and response bodies.
//!
//! Every unary response is a [`Reply`]: exactly one of a data branch or an
//! error branch. Bodies are JSON with `snake_case` field names.

pub mod accounts;
pub mod reply;

pub use accounts::{
    Attachment, CustomerProfile, DashboardStats, EmailConfirmationRequest, EmptyRequest, ImageCrop,
    LoginRequest, PasswordForgotRequest, SuccessResponseData, SupplierCreateRequest,
    SupplierProfile, VisitsByPeriod,
};
pub use reply::Reply;

//! Request validation.

use std::sync::LazyLock;

use accounts_core::messages::{Attachment, EmailConfirmationRequest, LoginRequest, SupplierCreateRequest};
use accounts_core::models::{
    USER_EMAIL_MAX_LENGTH, USER_FIRST_NAME_MAX_RUNES, USER_FIRST_NAME_MIN_RUNES, USER_IMAGE_ALLOWED_TYPES,
    USER_IMAGE_MAX_SIZE_BYTES, USER_LAST_NAME_MAX_RUNES, USER_LAST_NAME_MIN_RUNES, USER_NAME_MAX_LENGTH,
    USER_NAME_MIN_LENGTH, USER_PASSWORD_MAX_LENGTH, USER_PASSWORD_MIN_LENGTH,
};
use accounts_core::{params, AppError, Code, ParamValue, Params, RequestContext};
use regex::Regex;

use super::field_error;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("valid email regex")
});

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("valid username regex"));

#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= USER_EMAIL_MAX_LENGTH && EMAIL.is_match(email)
}

#[must_use]
pub fn is_valid_username_chars(username: &str) -> bool {
    USERNAME.is_match(username)
}

fn min_max(min: usize, max: usize) -> Params {
    params([
        ("Min", ParamValue::from(i64::try_from(min).unwrap_or(i64::MAX))),
        ("Max", ParamValue::from(i64::try_from(max).unwrap_or(i64::MAX))),
    ])
}

fn invalid(ctx: &RequestContext, location: &str, field: &str, id: &str, params: &Params, detail: String) -> AppError {
    field_error(ctx, location, field, id, params, detail, Code::InvalidArgument)
}

/// Length bounds shared by login and signup.
fn password(ctx: &RequestContext, location: &str, password: &str) -> Result<(), AppError> {
    if password.len() < USER_PASSWORD_MIN_LENGTH {
        let p = params([("Min", ParamValue::from(i64::try_from(USER_PASSWORD_MIN_LENGTH).unwrap_or(0)))]);
        return Err(invalid(ctx, location, "password", "password.min_length", &p, String::new()));
    }
    if password.len() > USER_PASSWORD_MAX_LENGTH {
        let p = params([("Max", ParamValue::from(i64::try_from(USER_PASSWORD_MAX_LENGTH).unwrap_or(0)))]);
        return Err(invalid(ctx, location, "password", "password.max_length", &p, String::new()));
    }
    Ok(())
}

/// # Errors
///
/// `email.invalid`, `password.min_length`, `password.max_length` or
/// `oauth.login_challenge.missing`, all `InvalidArgument`.
pub fn login_request(ctx: &RequestContext, req: &LoginRequest) -> Result<(), AppError> {
    let location = "accounts.validate.login_request";
    if !is_valid_email(&req.email) {
        return Err(invalid(ctx, location, "email", "email.invalid", &Params::new(), format!("invalid email={}", req.email)));
    }
    password(ctx, location, &req.password)?;
    if req.login_challenge.is_empty() {
        return Err(AppError::new(
            ctx,
            location,
            "oauth.login_challenge.missing",
            &Params::new(),
            "",
            Code::InvalidArgument,
        ));
    }
    Ok(())
}

/// Validates an already sanitized signup request.
///
/// # Errors
///
/// `user.create.<field>.error` (`InvalidArgument`) for the first offending
/// field, with the same message under `errors[<field>]`.
pub fn supplier_create(ctx: &RequestContext, req: &SupplierCreateRequest) -> Result<(), AppError> {
    let location = "accounts.validate.supplier_create";
    let runes = |s: &str| s.chars().count();

    let un = runes(&req.username);
    if !(USER_NAME_MIN_LENGTH..=USER_NAME_MAX_LENGTH).contains(&un) {
        return Err(invalid(
            ctx,
            location,
            "username",
            "user.create.username.error",
            &min_max(USER_NAME_MIN_LENGTH, USER_NAME_MAX_LENGTH),
            format!("username={}", req.username),
        ));
    }
    if !is_valid_username_chars(&req.username) {
        return Err(invalid(
            ctx,
            location,
            "username",
            "user.create.username.valid.error",
            &Params::new(),
            format!("username={}", req.username),
        ));
    }
    if !is_valid_email(&req.email) {
        return Err(invalid(
            ctx,
            location,
            "email",
            "user.create.email.error",
            &Params::new(),
            format!("email={}", req.email),
        ));
    }
    if !(USER_FIRST_NAME_MIN_RUNES..=USER_FIRST_NAME_MAX_RUNES).contains(&runes(&req.first_name)) {
        return Err(invalid(
            ctx,
            location,
            "first_name",
            "user.create.first_name.error",
            &min_max(USER_FIRST_NAME_MIN_RUNES, USER_FIRST_NAME_MAX_RUNES),
            format!("first_name={}", req.first_name),
        ));
    }
    if !(USER_LAST_NAME_MIN_RUNES..=USER_LAST_NAME_MAX_RUNES).contains(&runes(&req.last_name)) {
        return Err(invalid(
            ctx,
            location,
            "last_name",
            "user.create.last_name.error",
            &min_max(USER_LAST_NAME_MIN_RUNES, USER_LAST_NAME_MAX_RUNES),
            format!("last_name={}", req.last_name),
        ));
    }
    password(ctx, location, &req.password)
}

/// Detects the image type from its leading bytes.
#[must_use]
pub fn sniff_image_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if data.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("image/jpeg")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else {
        None
    }
}

/// # Errors
///
/// `image.data.invalid`, `file.size.error` or `image.type.unsupported`
/// (`InvalidArgument`) with the message under `errors[image]`.
pub fn image(ctx: &RequestContext, image: &Attachment) -> Result<(), AppError> {
    let location = "accounts.validate.image";
    if image.data.is_empty() {
        return Err(invalid(ctx, location, "image", "image.data.invalid", &Params::new(), "empty image".to_string()));
    }
    if image.data.len() > USER_IMAGE_MAX_SIZE_BYTES {
        let max_mb = format!("{:.2}", USER_IMAGE_MAX_SIZE_BYTES as f64 / (1024.0 * 1024.0));
        let p = params([("Max", max_mb), ("Unit", "MB".to_string())]);
        return Err(invalid(
            ctx,
            location,
            "image",
            "file.size.error",
            &p,
            format!("image is {} bytes", image.data.len()),
        ));
    }
    let detected = sniff_image_mime(&image.data);
    if !detected.is_some_and(|m| USER_IMAGE_ALLOWED_TYPES.contains(&m)) {
        let p = params([("Types", USER_IMAGE_ALLOWED_TYPES.join(", "))]);
        return Err(invalid(
            ctx,
            location,
            "image",
            "image.type.unsupported",
            &p,
            format!("detected {detected:?}, declared {}", image.mime),
        ));
    }
    Ok(())
}

/// # Errors
///
/// `email_confirm.email.error`, `email_confirm.token.error` or
/// `email_confirm.token_id.error`, all `InvalidArgument`.
pub fn email_confirmation(ctx: &RequestContext, req: &EmailConfirmationRequest) -> Result<(), AppError> {
    let location = "accounts.validate.email_confirmation";
    let fail = |id: &str| AppError::new(ctx, location, id, &Params::new(), "", Code::InvalidArgument);
    if !is_valid_email(&req.email) {
        return Err(fail("email_confirm.email.error"));
    }
    if req.token.is_empty() {
        return Err(fail("email_confirm.token.error"));
    }
    if let Err(e) = uuid::Uuid::parse_str(&req.token_id) {
        return Err(fail("email_confirm.token_id.error").wrap(e));
    }
    Ok(())
}

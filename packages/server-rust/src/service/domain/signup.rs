use std::sync::Arc;
use std::time::Duration;

use accounts_core::audit::EVENT_SUPPLIER_CREATE;
use accounts_core::messages::{Attachment, SuccessResponseData, SupplierCreateRequest};
use accounts_core::models::{ImageMetadata, Token, TokenType, User, ROLE_SUPPLIER_ADMIN, USER_TYPE_SUPPLIER};
use accounts_core::tasks::SendVerifyEmailPayload;
use accounts_core::{params, AppError, Code, DbErrorKind, Params, RequestContext};
use tracing::{info, warn};

use super::{email_task_options, field_error, internal_db, validate, Accounts};
use crate::security::{generate_token, hash_password, now_millis};

const LOCATION: &str = "accounts.domain.create_supplier";
const DEFAULT_MEMBERSHIP: &str = "free";

struct UploadedImage {
    bucket: String,
    key: String,
}

impl Accounts {
    /// Registers a supplier account and queues its confirmation email.
    pub async fn create_supplier(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
        req: SupplierCreateRequest,
    ) -> Result<SuccessResponseData, AppError> {
        let mut audit = self.audit(&ctx, EVENT_SUPPLIER_CREATE);
        audit.set_parameter(
            "supplier",
            params([
                ("username", req.username.as_str()),
                ("email", req.email.as_str()),
                ("first_name", req.first_name.as_str()),
                ("last_name", req.last_name.as_str()),
            ]),
        );

        let req = req.sanitized();
        validate::supplier_create(&ctx, &req)?;
        if let Some(image) = &req.image {
            validate::image(&ctx, image)?;
        }

        let password = hash_password(&req.password)
            .map_err(|e| AppError::internal(&ctx, LOCATION, "hashing the password failed", e))?;
        let config = self.config.get();
        let now = now_millis();
        let mut user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: req.username.clone(),
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            email: req.email.clone(),
            user_type: USER_TYPE_SUPPLIER.to_string(),
            membership: if req.membership.is_empty() {
                DEFAULT_MEMBERSHIP.to_string()
            } else {
                req.membership.clone()
            },
            is_email_verified: false,
            password,
            roles: vec![ROLE_SUPPLIER_ADMIN.to_string()],
            locale: ctx.accept_language().to_string(),
            created_at: now,
            updated_at: now,
            ..User::default()
        };

        let hours = config.security.token_confirmation_expiry_hours;
        let generated = generate_token(Duration::from_secs(u64::from(hours) * 3600));
        let token = Token {
            id: generated.id.clone(),
            user_id: user.id.clone(),
            token_hash: generated.hash.clone(),
            token_type: TokenType::EmailConfirmation,
            used: false,
            created_at: generated.created_at,
            expires_at: generated.expires_at,
        };

        let uploaded = match &req.image {
            Some(image) => Some(self.upload_image(&ctx, &config.file.bucket, &mut user, image).await?),
            None => None,
        };

        if let Err(e) = self.store.signup_supplier(&ctx, &user, &token).await {
            if let Some(uploaded) = uploaded {
                self.discard_image(&ctx, &uploaded).await;
            }
            if e.is(DbErrorKind::UniqueViolation) {
                return Err(field_error(
                    &ctx,
                    LOCATION,
                    "email",
                    "user.create.email.not_unique",
                    &Params::new(),
                    e.details.clone(),
                    Code::AlreadyExists,
                )
                .wrap(e));
            }
            return Err(internal_db(&ctx, LOCATION, e));
        }

        let payload = SendVerifyEmailPayload {
            ctx: ctx.snapshot(),
            email: user.email.clone(),
            token: generated.token,
            token_id: token.id.clone(),
            hours,
        };
        self.tasks
            .send_verify_email(&ctx, &payload, email_task_options())
            .await?;

        info!(user_id = %user.id, request_id = %ctx.request_id(), "supplier registered");
        audit.set_result_state(params([
            ("id", user.id.as_str()),
            ("username", user.username.as_str()),
            ("email", user.email.as_str()),
            ("user_type", user.user_type.as_str()),
            ("membership", user.membership.as_str()),
            ("image", user.image.as_deref().unwrap_or_default()),
        ]));
        audit.success();
        Ok(SuccessResponseData::message(
            ctx.translate("user.create.supplier.success", &Params::new()),
        ))
    }

    async fn upload_image(
        &self,
        ctx: &RequestContext,
        bucket: &str,
        user: &mut User,
        image: &Attachment,
    ) -> Result<UploadedImage, AppError> {
        let mime = validate::sniff_image_mime(&image.data).unwrap_or("application/octet-stream");
        let key = format!("{}/{}", user.id, uuid::Uuid::new_v4());
        let path = self
            .objects
            .put(ctx, bucket, &key, &image.data, mime)
            .await
            .map_err(|e| AppError::internal(ctx, LOCATION, "failed to upload the profile image", e))?;

        let (width, height) = image.crop.as_ref().map_or((0, 0), |c| (c.width, c.height));
        user.image = Some(path);
        user.image_metadata = Some(ImageMetadata {
            mime: mime.to_string(),
            width,
            height,
            size_bytes: image.data.len() as u64,
        });
        Ok(UploadedImage {
            bucket: bucket.to_string(),
            key,
        })
    }

    async fn discard_image(&self, ctx: &RequestContext, uploaded: &UploadedImage) {
        if let Err(e) = self.objects.delete(ctx, &uploaded.bucket, &uploaded.key).await {
            warn!(
                bucket = %uploaded.bucket,
                key = %uploaded.key,
                error = %e,
                "failed to delete orphaned profile image"
            );
        }
    }
}

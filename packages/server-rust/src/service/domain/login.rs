use std::sync::Arc;

use accounts_core::audit::EVENT_LOGIN;
use accounts_core::messages::{LoginRequest, SuccessResponseData};
use accounts_core::{params, AppError, Code, Params, RequestContext};

use super::{email_lookup_error, field_error, validate, Accounts};
use crate::oauth::{LoginAcceptance, LoginContext, OAuthError, ACCEPT_LOGIN_DEADLINE};
use crate::security::verify_password;

const LOCATION: &str = "accounts.domain.login";

impl Accounts {
    /// Checks credentials and accepts the OAuth login challenge.
    ///
    /// On success the reply metadata carries `redirect_to`.
    pub async fn login(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
        req: LoginRequest,
    ) -> Result<SuccessResponseData, AppError> {
        let mut audit = self.audit(&ctx, EVENT_LOGIN);
        audit.set_parameter("email", req.email.as_str());

        validate::login_request(&ctx, &req)?;

        let user = self
            .store
            .users_get_by_email(&ctx, &req.email.trim().to_lowercase())
            .await
            .map_err(|e| email_lookup_error(&ctx, LOCATION, e))?;

        if user.is_sso() {
            return Err(AppError::new(
                &ctx,
                LOCATION,
                "user.login.use_auth_service.error",
                &params([("AuthService", user.auth_service.as_str())]),
                "",
                Code::InvalidArgument,
            ));
        }
        if !verify_password(&user.password, &req.password) {
            return Err(field_error(
                &ctx,
                LOCATION,
                "password",
                "user.login.password.error",
                &Params::new(),
                "",
                Code::InvalidArgument,
            ));
        }

        let expiry_hours = self.config.get().security.access_token_expiry_web_hours;
        let acceptance = LoginAcceptance {
            subject: user.id.clone(),
            remember: true,
            remember_for: u64::from(expiry_hours) * 3600,
            context: LoginContext {
                lang: ctx.accept_language().to_string(),
                email: user.email.clone(),
                first_name: user.first_name.clone(),
            },
        };

        let outbound = ctx.with_timeout(ACCEPT_LOGIN_DEADLINE);
        let redirect = match self.oauth.accept_login(&outbound, &req.login_challenge, &acceptance).await {
            Ok(redirect) => redirect,
            Err(e @ OAuthError::Rejected { .. }) => {
                let description = e.message_id().unwrap_or("oauth.unknown_error");
                return Err(AppError::new(&ctx, LOCATION, "login.error", &Params::new(), e.to_string(), Code::InvalidArgument)
                    .with_field_error(&ctx, "error", "login.error", &Params::new())
                    .with_field_error(&ctx, "error_description", description, &Params::new()));
            }
            Err(e) => {
                return Err(AppError::internal(
                    &ctx,
                    LOCATION,
                    "failed to request OAuth server to accept login",
                    e,
                ));
            }
        };

        audit.set_result_state(params([("user_id", user.id.as_str())]));
        audit.success();
        Ok(SuccessResponseData::default().with_metadata("redirect_to", redirect))
    }
}

use std::sync::Arc;

use accounts_core::audit::{EVENT_CUSTOMER_PROFILE_GET, EVENT_DASHBOARD_GET, EVENT_SUPPLIER_PROFILE_GET};
use accounts_core::messages::{CustomerProfile, DashboardStats, EmptyRequest, SupplierProfile, VisitsByPeriod};
use accounts_core::models::User;
use accounts_core::{AppError, Code, Params, RequestContext};

use super::{not_found_or_internal, Accounts};

const LOCATION: &str = "accounts.domain.profile";

// Figures shown until the catalogue and order services report real numbers.
const PLACEHOLDER_STATS: DashboardStats = DashboardStats {
    total_products: 42,
    total_inventory_items: 156,
    total_reviews: 28,
    product_visits_count: 1847,
    visits_by_period: VisitsByPeriod {
        today: 245,
        yesterday: 189,
        last_week: 1234,
        last_month: 4567,
        last_year: 28945,
    },
    pending_orders: 5,
    total_orders: 87,
};

impl Accounts {
    /// Loads the caller's own account.
    async fn session_user(&self, ctx: &RequestContext) -> Result<User, AppError> {
        let user_id = ctx.user_id();
        if user_id.is_empty() {
            return Err(AppError::new(
                ctx,
                LOCATION,
                Code::Unauthenticated.translation_id(),
                &Params::new(),
                "no user in session",
                Code::Unauthenticated,
            ));
        }
        self.store
            .users_get_by_id(ctx, user_id)
            .await
            .map_err(|e| not_found_or_internal(ctx, LOCATION, Code::NotFound.translation_id(), e))
    }

    pub async fn customer_profile(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
        _req: EmptyRequest,
    ) -> Result<CustomerProfile, AppError> {
        let mut audit = self.audit(&ctx, EVENT_CUSTOMER_PROFILE_GET);
        let user = self.session_user(&ctx).await?;
        audit.success();
        Ok(CustomerProfile::from(&user))
    }

    pub async fn supplier_profile(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
        _req: EmptyRequest,
    ) -> Result<SupplierProfile, AppError> {
        let mut audit = self.audit(&ctx, EVENT_SUPPLIER_PROFILE_GET);
        let user = self.session_user(&ctx).await?;
        audit.success();
        Ok(SupplierProfile::from(&user))
    }

    /// Dashboard figures for supplier accounts.
    ///
    /// Roles are checked on the stored account, not on the session.
    pub async fn supplier_dashboard(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
        _req: EmptyRequest,
    ) -> Result<DashboardStats, AppError> {
        let mut audit = self.audit(&ctx, EVENT_DASHBOARD_GET);
        let user = self.session_user(&ctx).await?;
        if !user.is_supplier() {
            return Err(AppError::new(
                &ctx,
                LOCATION,
                Code::PermissionDenied.translation_id(),
                &Params::new(),
                format!("user {} is not a supplier", user.id),
                Code::PermissionDenied,
            ));
        }
        audit.success();
        Ok(PLACEHOLDER_STATS)
    }
}

//! In-memory wiring of [`Accounts`] for handler tests.

use std::collections::HashMap;
use std::sync::Arc;

use accounts_core::models::{User, ROLE_SUPPLIER_ADMIN, USER_TYPE_SUPPLIER};
use accounts_core::{ContextSnapshot, RequestContext, Session, TranslationStore, TranslationTable};

use super::Accounts;
use crate::config::{AppConfig, ConfigStore};
use crate::objects::MemoryObjectStore;
use crate::oauth::MemoryOAuthProvider;
use crate::security::{hash_password, AuthError, Claims, TokenValidator};
use crate::service::audit::MemoryAuditSink;
use crate::service::context::ContextBuilder;
use crate::store::MemoryStore;
use crate::tasks::{MemoryBroker, TaskDistributor};

const EN: &[(&str, &str)] = &[
    ("email.not_found", "No account uses this email"),
    ("email.invalid", "The email is invalid"),
    ("email_confirm.already_confirmed", "Your email is already confirmed"),
    ("email_confirm.confirmed_successfully", "Your email has been confirmed"),
    ("email_confirm.token.expired", "The confirmation link has expired"),
    ("forgot.password.success_message", "Check your inbox"),
    ("forgot.password.success_message.description", "We sent a reset link to {{Email}}"),
    ("user.create.email.not_unique", "This email is already registered"),
    ("user.create.username.error", "Username must be {{Min}} to {{Max}} characters"),
    ("user.login.use_auth_service.error", "Sign in with {{AuthService}}"),
];

#[derive(Debug)]
pub(crate) struct AcceptAll;

impl TokenValidator for AcceptAll {
    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(Claims {
            sub: token.to_string(),
            exp: u64::MAX,
            sid: String::new(),
            roles: String::new(),
        })
    }
}

pub(crate) struct Harness {
    pub accounts: Arc<Accounts>,
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    pub oauth: Arc<MemoryOAuthProvider>,
    pub objects: Arc<MemoryObjectStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub config: Arc<ConfigStore>,
    pub translations: Arc<TranslationStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(MemoryOAuthProvider::new(), MemoryObjectStore::new())
    }

    pub fn with_oauth(oauth: MemoryOAuthProvider) -> Self {
        Self::build(oauth, MemoryObjectStore::new())
    }

    pub fn with_objects(objects: MemoryObjectStore) -> Self {
        Self::build(MemoryOAuthProvider::new(), objects)
    }

    fn build(oauth: MemoryOAuthProvider, objects: MemoryObjectStore) -> Self {
        let mut en = HashMap::new();
        for (k, v) in EN {
            en.insert((*k).to_string(), (*v).to_string());
        }
        let mut raw = HashMap::new();
        raw.insert("en".to_string(), en);
        let translations = Arc::new(TranslationStore::new(
            TranslationTable::compile("en", &raw).expect("test translations compile"),
        ));

        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let oauth = Arc::new(oauth);
        let objects = Arc::new(objects);
        let audit = Arc::new(MemoryAuditSink::default());
        let config = Arc::new(ConfigStore::new(AppConfig::default()));
        let accounts = Arc::new(Accounts::new(
            store.clone(),
            TaskDistributor::new(broker.clone()),
            oauth.clone(),
            objects.clone(),
            Arc::clone(&config),
            audit.clone(),
        ));
        Self {
            accounts,
            store,
            broker,
            oauth,
            objects,
            audit,
            config,
            translations,
        }
    }

    pub fn context_builder(&self) -> Arc<ContextBuilder> {
        Arc::new(ContextBuilder::new(Arc::clone(&self.config), Arc::clone(&self.translations)))
    }

    pub fn validator(&self) -> Arc<dyn TokenValidator> {
        Arc::new(AcceptAll)
    }

    /// Anonymous context.
    pub fn ctx(&self) -> Arc<RequestContext> {
        self.ctx_with(None)
    }

    /// Context of a signed-in user.
    pub fn ctx_for(&self, user_id: &str) -> Arc<RequestContext> {
        self.ctx_with(Some(Session {
            id: "sess-1".to_string(),
            user_id: user_id.to_string(),
            ..Session::default()
        }))
    }

    fn ctx_with(&self, session: Option<Session>) -> Arc<RequestContext> {
        let snapshot = ContextSnapshot {
            session,
            request_id: "req-1".to_string(),
            accept_language: "en".to_string(),
            ip_address: "10.0.0.1".to_string(),
            ..ContextSnapshot::default()
        };
        Arc::new(RequestContext::new(snapshot, self.translations.current()))
    }

    /// Stores a verified supplier account with `password`.
    pub fn seed_supplier(&self, email: &str, password: &str) -> User {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: "ada".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            user_type: USER_TYPE_SUPPLIER.to_string(),
            membership: "free".to_string(),
            is_email_verified: true,
            password: hash_password(password).expect("bcrypt hash"),
            roles: vec![ROLE_SUPPLIER_ADMIN.to_string()],
            ..User::default()
        };
        self.store.insert_user(user.clone());
        user
    }
}

//! Request context construction from inbound call metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use accounts_core::error::ERR_MSG_INTERNAL;
use accounts_core::{AppError, Code, ContextSnapshot, Params, RequestContext, Session, TranslationStore, Translator};
use http::{Extensions, HeaderMap};

use crate::config::ConfigStore;

/// Metadata keys understood by the context builder.
pub mod headers {
    pub const AUTHORIZATION: &str = "authorization";
    pub const USER_AGENT: &str = "user-agent";
    pub const X_REQUEST_ID: &str = "x-request-id";
    pub const X_IP_ADDRESS: &str = "x-ip-address";
    pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
    pub const ACCEPT_LANGUAGE: &str = "accept-language";
    pub const SESSION_ID: &str = "session-id";
    pub const TOKEN: &str = "token";
    pub const CREATED_AT: &str = "created-at";
    pub const EXPIRES_AT: &str = "expires-at";
    pub const LAST_ACTIVITY_AT: &str = "last-activity-at";
    pub const USER_ID: &str = "user-id";
    pub const DEVICE_ID: &str = "device-id";
    pub const ROLES: &str = "roles";
    pub const IS_OAUTH: &str = "is-oauth";
    pub const PROPS: &str = "props";
    pub const SERVER_NAME: &str = "server-name";
    pub const PATH: &str = "path";
}

/// Returns `requested` if it is one of `available`, otherwise `default`.
///
/// Matching is exact; no quality values or region fallback.
#[must_use]
pub fn resolve_locale(requested: Option<&str>, available: &[String], default: &str) -> String {
    match requested {
        Some(lang) if available.iter().any(|a| a == lang) => lang.to_string(),
        _ => default.to_string(),
    }
}

/// Parses `key:value` entries. Entries without a colon are ignored; the value
/// keeps any further colons.
pub fn parse_props<'a>(values: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    values
        .into_iter()
        .filter_map(|v| v.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn first<'a>(metadata: &'a HeaderMap, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.to_str().ok())
}

fn millis(metadata: &HeaderMap, key: &str) -> i64 {
    first(metadata, key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

fn bearer(value: &str) -> &str {
    let value = value.trim();
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
        _ => value,
    }
}

/// Builds [`RequestContext`] values from call metadata.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    config: Arc<ConfigStore>,
    translations: Arc<TranslationStore>,
}

impl ContextBuilder {
    #[must_use]
    pub fn new(config: Arc<ConfigStore>, translations: Arc<TranslationStore>) -> Self {
        Self {
            config,
            translations,
        }
    }

    /// Current translation table, as a translator.
    #[must_use]
    pub fn translator(&self) -> Arc<dyn Translator> {
        self.translations.current()
    }

    /// Locale a call with this metadata will use.
    #[must_use]
    pub fn resolve_locale(&self, metadata: &HeaderMap) -> String {
        let config = self.config.get();
        resolve_locale(
            first(metadata, headers::ACCEPT_LANGUAGE),
            &config.localization.available_locales,
            &config.localization.default_locale,
        )
    }

    /// Translates `id` in the locale the metadata resolves to.
    #[must_use]
    pub fn translate(&self, metadata: &HeaderMap, id: &str) -> String {
        let locale = self.resolve_locale(metadata);
        self.translator()
            .translate(&locale, id, &Params::new())
            .unwrap_or_else(|_| id.to_string())
    }

    /// Builds a context. Every key is optional and never fails the call.
    ///
    /// `fallback_path` is used when the metadata carries no `path`.
    #[must_use]
    pub fn build(&self, metadata: &HeaderMap, fallback_path: &str) -> RequestContext {
        let text = |key: &str| first(metadata, key).unwrap_or_default().to_string();

        let mut token = first(metadata, headers::AUTHORIZATION)
            .map(bearer)
            .unwrap_or_default()
            .to_string();
        if let Some(t) = first(metadata, headers::TOKEN) {
            token = t.to_string();
        }

        let session = Session {
            id: text(headers::SESSION_ID),
            token,
            created_at: millis(metadata, headers::CREATED_AT),
            expires_at: millis(metadata, headers::EXPIRES_AT),
            last_activity_at: millis(metadata, headers::LAST_ACTIVITY_AT),
            user_id: text(headers::USER_ID),
            device_id: text(headers::DEVICE_ID),
            roles: text(headers::ROLES),
            is_oauth: first(metadata, headers::IS_OAUTH)
                .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1"),
            props: parse_props(
                metadata
                    .get_all(headers::PROPS)
                    .iter()
                    .filter_map(|v| v.to_str().ok()),
            ),
        };

        let request_id = first(metadata, headers::X_REQUEST_ID)
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        let path = first(metadata, headers::PATH).unwrap_or(fallback_path).to_string();

        let snapshot = ContextSnapshot {
            session: (session != Session::default()).then_some(session),
            request_id,
            ip_address: text(headers::X_IP_ADDRESS),
            forwarded_for: text(headers::X_FORWARDED_FOR),
            user_agent: text(headers::USER_AGENT),
            accept_language: self.resolve_locale(metadata),
            server_name: text(headers::SERVER_NAME),
            path,
        };

        RequestContext::new(snapshot, self.translator())
    }
}

/// Fetches the context attached to the call scope.
///
/// # Errors
///
/// Returns an `Internal` [`AppError`] (`server.internal.error`) when no
/// context was attached.
pub fn context_get(extensions: &Extensions) -> Result<Arc<RequestContext>, AppError> {
    extensions.get::<Arc<RequestContext>>().cloned().ok_or_else(|| {
        AppError::new(
            &RequestContext::default(),
            "accounts.service.context_get",
            ERR_MSG_INTERNAL,
            &Params::new(),
            "failed to get the context from the incoming request",
            Code::Internal,
        )
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use accounts_core::TranslationTable;
    use http::header::{HeaderName, HeaderValue};
    use proptest::prelude::*;

    use super::*;
    use crate::config::AppConfig;

    fn builder(available: &[&str]) -> ContextBuilder {
        let mut config = AppConfig::default();
        config.localization.available_locales = available.iter().map(|s| (*s).to_string()).collect();
        let mut en = HashMap::new();
        en.insert("error.internal".to_string(), "Something went wrong".to_string());
        let mut raw = HashMap::new();
        raw.insert("en".to_string(), en);
        ContextBuilder::new(
            Arc::new(ConfigStore::new(config)),
            Arc::new(TranslationStore::new(TranslationTable::compile("en", &raw).unwrap())),
        )
    }

    fn md(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn unsupported_locale_falls_back_to_default() {
        let b = builder(&["en", "es"]);
        let ctx = b.build(&md(&[("accept-language", "fr")]), "/x");
        assert_eq!(ctx.accept_language(), "en");

        let ctx = b.build(&md(&[("Accept-Language", "es")]), "/x");
        assert_eq!(ctx.accept_language(), "es");

        let ctx = b.build(&HeaderMap::new(), "/x");
        assert_eq!(ctx.accept_language(), "en");
    }

    #[test]
    fn unparseable_numbers_stay_zero() {
        let ctx = builder(&["en"]).build(
            &md(&[("created-at", "not-a-number"), ("expires-at", "1700000000000"), ("user-id", "u1")]),
            "/x",
        );
        let session = ctx.session().unwrap();
        assert_eq!(session.created_at, 0);
        assert_eq!(session.expires_at, 1_700_000_000_000);
    }

    #[test]
    fn session_fields_and_props() {
        let ctx = builder(&["en"]).build(
            &md(&[
                ("authorization", "Bearer abc"),
                ("session-id", "s1"),
                ("user-id", "u1"),
                ("device-id", "d1"),
                ("roles", "supplier_admin"),
                ("is-oauth", "true"),
                ("props", "theme:dark"),
                ("props", "url:http://x"),
                ("props", "junk"),
                ("x-request-id", "req-7"),
                ("x-ip-address", "10.0.0.2"),
                ("x-forwarded-for", "1.1.1.1"),
                ("user-agent", "ua"),
                ("server-name", "gw-1"),
                ("path", "/accounts/Login"),
            ]),
            "/fallback",
        );
        let s = ctx.session().unwrap();
        assert_eq!(s.token, "abc");
        assert_eq!(s.id, "s1");
        assert_eq!(s.user_id, "u1");
        assert_eq!(s.device_id, "d1");
        assert!(s.is_oauth);
        assert!(s.has_role("supplier_admin"));
        assert_eq!(s.props.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(s.props.get("url").map(String::as_str), Some("http://x"));
        assert_eq!(s.props.len(), 2);
        assert_eq!(ctx.request_id(), "req-7");
        assert_eq!(ctx.ip_address(), "10.0.0.2");
        assert_eq!(ctx.forwarded_for(), "1.1.1.1");
        assert_eq!(ctx.user_agent(), "ua");
        assert_eq!(ctx.server_name(), "gw-1");
        assert_eq!(ctx.path(), "/accounts/Login");
    }

    #[test]
    fn token_header_overrides_authorization() {
        let ctx = builder(&["en"]).build(&md(&[("authorization", "Bearer a"), ("token", "b")]), "/x");
        assert_eq!(ctx.session().unwrap().token, "b");
    }

    #[test]
    fn anonymous_call_has_no_session_but_gets_request_id() {
        let ctx = builder(&["en"]).build(&HeaderMap::new(), "/fallback");
        assert!(ctx.session().is_none());
        assert!(!ctx.request_id().is_empty());
        assert_eq!(ctx.path(), "/fallback");
    }

    #[test]
    fn context_get_without_context_is_internal() {
        let err = context_get(&Extensions::new()).unwrap_err();
        assert_eq!(err.id, ERR_MSG_INTERNAL);
        assert_eq!(err.status_code, Code::Internal);
    }

    #[test]
    fn context_get_returns_attached_context() {
        let mut ext = Extensions::new();
        ext.insert(Arc::new(RequestContext::default()));
        assert!(context_get(&ext).is_ok());
    }

    proptest! {
        #[test]
        fn resolved_locale_is_always_supported(requested in "[a-z]{0,3}") {
            let available = vec!["en".to_string(), "es".to_string()];
            let resolved = resolve_locale(Some(&requested), &available, "en");
            prop_assert!(available.contains(&resolved));
            if available.contains(&requested) {
                prop_assert_eq!(resolved, requested);
            }
        }
    }
}

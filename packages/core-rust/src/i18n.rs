//! Translation tables and template parameters.
//!
//! Templates use `{{Name}}` placeholders (dotted paths reach into nested maps)
//! and are compiled once when a table is loaded. A [`TranslationStore`] owns the
//! live table; a reload swaps the whole table atomically and never mutates a
//! published one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}").expect("valid placeholder regex")
});

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A single template/audit parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, ParamValue>),
}

/// Named parameters for translation templates and audit data.
pub type Params = BTreeMap<String, ParamValue>;

/// Builds a [`Params`] map from `(key, value)` pairs.
pub fn params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<ParamValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

impl ParamValue {
    fn lookup(&self, path: &[&str]) -> Option<&ParamValue> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => match self {
                Self::Map(map) => map.get(*head).and_then(|v| v.lookup(rest)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Map(m) => {
                let json = serde_json::to_string(m).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&String> for ParamValue {
    fn from(v: &String) -> Self {
        Self::Str(v.clone())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Params> for ParamValue {
    fn from(v: Params) -> Self {
        Self::Map(v)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures while loading or rendering translations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("empty translation key in locale {locale}")]
    EmptyKey { locale: String },
    #[error("empty translation value for key {id} in locale {locale}")]
    EmptyValue { locale: String, id: String },
    #[error("translation key {id} does not exist for locale {locale}")]
    MissingKey { locale: String, id: String },
    #[error("translation {id} requires parameter {param}")]
    MissingParam { id: String, param: String },
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn compile(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Var(
                name.as_str().split('.').map(str::to_string).collect(),
            ));
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }
        Self { segments }
    }

    fn render(&self, id: &str, params: &Params) -> Result<String, TranslateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(path) => {
                    let value = path
                        .split_first()
                        .and_then(|(head, rest)| {
                            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
                            params.get(head).and_then(|v| v.lookup(&rest))
                        })
                        .ok_or_else(|| TranslateError::MissingParam {
                            id: id.to_string(),
                            param: path.join("."),
                        })?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

/// Resolves a translation key into localized text.
pub trait Translator: fmt::Debug + Send + Sync {
    /// Renders `id` for `locale` with `params`.
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError`] when the key is unknown or a placeholder has
    /// no matching parameter.
    fn translate(&self, locale: &str, id: &str, params: &Params) -> Result<String, TranslateError>;
}

/// Compiled, read-only translation catalog for all locales.
#[derive(Debug, Clone)]
pub struct TranslationTable {
    default_locale: String,
    locales: HashMap<String, HashMap<String, Template>>,
}

impl TranslationTable {
    /// A table with no entries. Every lookup misses.
    #[must_use]
    pub fn empty(default_locale: &str) -> Self {
        Self {
            default_locale: default_locale.to_string(),
            locales: HashMap::new(),
        }
    }

    /// Compiles a raw `locale → (key → template)` catalog.
    ///
    /// # Errors
    ///
    /// Rejects empty keys and empty values.
    pub fn compile(
        default_locale: &str,
        raw: &HashMap<String, HashMap<String, String>>,
    ) -> Result<Self, TranslateError> {
        let mut locales = HashMap::with_capacity(raw.len());
        for (locale, entries) in raw {
            let mut compiled = HashMap::with_capacity(entries.len());
            for (id, value) in entries {
                if id.is_empty() {
                    return Err(TranslateError::EmptyKey {
                        locale: locale.clone(),
                    });
                }
                if value.is_empty() {
                    return Err(TranslateError::EmptyValue {
                        locale: locale.clone(),
                        id: id.clone(),
                    });
                }
                compiled.insert(id.clone(), Template::compile(value));
            }
            locales.insert(locale.clone(), compiled);
        }
        Ok(Self {
            default_locale: default_locale.to_string(),
            locales,
        })
    }

    #[must_use]
    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// Locales that have at least one entry.
    #[must_use]
    pub fn locales(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.locales.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    fn find(&self, locale: &str, id: &str) -> Option<&Template> {
        let requested = if locale.is_empty() {
            self.default_locale.as_str()
        } else {
            locale
        };
        self.locales
            .get(requested)
            .and_then(|entries| entries.get(id))
            .or_else(|| {
                self.locales
                    .get(&self.default_locale)
                    .and_then(|entries| entries.get(id))
            })
    }
}

impl Translator for TranslationTable {
    fn translate(&self, locale: &str, id: &str, params: &Params) -> Result<String, TranslateError> {
        let template = self.find(locale, id).ok_or_else(|| TranslateError::MissingKey {
            locale: locale.to_string(),
            id: id.to_string(),
        })?;
        template.render(id, params)
    }
}

// ---------------------------------------------------------------------------
// TranslationStore
// ---------------------------------------------------------------------------

/// Owner of the live translation table.
///
/// Readers take a snapshot with [`TranslationStore::current`] and keep using
/// it even if a reload happens meanwhile.
#[derive(Debug)]
pub struct TranslationStore {
    current: ArcSwap<TranslationTable>,
    version: AtomicU64,
}

impl TranslationStore {
    #[must_use]
    pub fn new(table: TranslationTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(table),
            version: AtomicU64::new(1),
        }
    }

    /// Snapshot of the table in effect right now.
    #[must_use]
    pub fn current(&self) -> Arc<TranslationTable> {
        self.current.load_full()
    }

    /// Publishes a new table and returns its version.
    pub fn replace(&self, table: TranslationTable) -> u64 {
        self.current.store(Arc::new(table));
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, &str, &str)]) -> HashMap<String, HashMap<String, String>> {
        let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (locale, id, value) in entries {
            out.entry((*locale).to_string())
                .or_default()
                .insert((*id).to_string(), (*value).to_string());
        }
        out
    }

    #[test]
    fn renders_placeholders_with_and_without_spaces() {
        let table = TranslationTable::compile(
            "en",
            &raw(&[("en", "forgot", "We sent a link to {{Email}}, valid {{ Hours }}h")]),
        )
        .unwrap();
        let text = table
            .translate("en", "forgot", &params([("Email", ParamValue::from("a@b.c")), ("Hours", 24.into())]))
            .unwrap();
        assert_eq!(text, "We sent a link to a@b.c, valid 24h");
    }

    #[test]
    fn nested_parameters_resolve_by_path() {
        let table =
            TranslationTable::compile("en", &raw(&[("en", "k", "Hi {{User.Name}}")])).unwrap();
        let user = params([("Name", "Ada")]);
        let text = table.translate("en", "k", &params([("User", user)])).unwrap();
        assert_eq!(text, "Hi Ada");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let table = TranslationTable::compile("en", &raw(&[("en", "k", "Hi {{Name}}")])).unwrap();
        let err = table.translate("en", "k", &Params::new()).unwrap_err();
        assert!(matches!(err, TranslateError::MissingParam { ref param, .. } if param == "Name"));
    }

    #[test]
    fn unknown_locale_and_key_fall_back_to_default_locale() {
        let table = TranslationTable::compile(
            "en",
            &raw(&[("en", "a", "A-en"), ("en", "b", "B-en"), ("es", "a", "A-es")]),
        )
        .unwrap();
        assert_eq!(table.translate("es", "a", &Params::new()).unwrap(), "A-es");
        assert_eq!(table.translate("es", "b", &Params::new()).unwrap(), "B-en");
        assert_eq!(table.translate("fr", "a", &Params::new()).unwrap(), "A-en");
        assert_eq!(table.translate("", "a", &Params::new()).unwrap(), "A-en");
        assert!(matches!(
            table.translate("en", "zzz", &Params::new()),
            Err(TranslateError::MissingKey { .. })
        ));
    }

    #[test]
    fn compile_rejects_empty_entries() {
        assert!(matches!(
            TranslationTable::compile("en", &raw(&[("en", "", "x")])),
            Err(TranslateError::EmptyKey { .. })
        ));
        assert!(matches!(
            TranslationTable::compile("en", &raw(&[("en", "k", "")])),
            Err(TranslateError::EmptyValue { .. })
        ));
    }

    #[test]
    fn store_swaps_whole_table_and_old_snapshots_survive() {
        let store = TranslationStore::new(
            TranslationTable::compile("en", &raw(&[("en", "k", "old")])).unwrap(),
        );
        let before = store.current();
        let version = store.replace(TranslationTable::compile("en", &raw(&[("en", "k", "new")])).unwrap());

        assert_eq!(version, 2);
        assert_eq!(before.translate("en", "k", &Params::new()).unwrap(), "old");
        assert_eq!(store.current().translate("en", "k", &Params::new()).unwrap(), "new");
    }

    #[test]
    fn param_values_serialize_untagged() {
        let p = params([("a", ParamValue::from(1_i64)), ("b", ParamValue::from(true))]);
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"a":1,"b":true}"#);
        let back: Params = serde_json::from_str(r#"{"a":1,"b":true,"c":"x","d":{"e":1.5}}"#).unwrap();
        assert_eq!(back["c"], ParamValue::from("x"));
        assert_eq!(back["d"], ParamValue::Map(params([("e", 1.5_f64)])));
    }
}

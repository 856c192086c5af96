//! Session payload model
//!
//! The store treats a session as JSON with one structured part, the cookie.
//! Everything else round-trips untouched through `fields`.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Default record lifetime when the cookie carries no `maxAge`: one day
pub const DEFAULT_TTL_MS: i64 = 86_400_000;

/// Cookie settings embedded in a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Lifetime in milliseconds
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_age: Option<i64>,

    /// Absolute expiry; rewritten from the stored record on every read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// Remaining cookie attributes (path, httpOnly, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Structured session state
///
/// # Example
/// ```
/// use sqlsession_core::SessionData;
/// use serde_json::json;
///
/// let session = SessionData::new()
///     .with_max_age(60_000)
///     .with_field("user", json!("alice"));
/// assert_eq!(session.get("user"), Some(&json!("alice")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub cookie: Cookie,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(mut self, max_age_ms: i64) -> Self {
        self.cookie.max_age = Some(max_age_ms);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    /// Record lifetime: the cookie's `maxAge`, else `default_ttl`
    ///
    /// # Errors
    /// - `Error::InvalidSession` if `maxAge` does not fit a [`Duration`]
    pub fn ttl(&self, default_ttl: Duration) -> Result<Duration> {
        match self.cookie.max_age {
            Some(ms) => Duration::try_milliseconds(ms)
                .ok_or_else(|| Error::InvalidSession(format!("maxAge {} ms is out of range", ms))),
            None => Ok(default_ttl),
        }
    }

    /// Absolute expiry of a record written at `now`
    ///
    /// # Errors
    /// - `Error::InvalidSession` if the expiry is not a representable instant
    pub fn expires_at(&self, now: DateTime<Utc>, default_ttl: Duration) -> Result<DateTime<Utc>> {
        let ttl = self.ttl(default_ttl)?;
        now.checked_add_signed(ttl).ok_or_else(|| {
            Error::InvalidSession(format!(
                "expiry {} ms from {} is out of range",
                ttl.num_milliseconds(),
                format_expires(now)
            ))
        })
    }

    /// Serialize for the payload column
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a payload column value
    pub fn from_payload(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Overwrite `cookie.expires` with an absolute timestamp
    pub fn stamp_expires(&mut self, expires: DateTime<Utc>) {
        self.cookie.expires = Some(format_expires(expires));
    }
}

/// Render an expiry the way browsers' `Date#toISOString` does
pub fn format_expires(expires: DateTime<Utc>) -> String {
    expires.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accept integral and fractional JSON numbers for millisecond fields
fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(number.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_express_style_payload() {
        let payload = r#"{"cookie":{"originalMaxAge":60000,"maxAge":60000,"httpOnly":true,"path":"/"},"user":"alice","cart":[1,2]}"#;
        let session = SessionData::from_payload(payload).unwrap();

        assert_eq!(session.cookie.max_age, Some(60_000));
        assert_eq!(session.cookie.extra.get("httpOnly"), Some(&json!(true)));
        assert_eq!(session.get("user"), Some(&json!("alice")));
        assert_eq!(session.get("cart"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_fractional_and_null_max_age() {
        let session = SessionData::from_payload(r#"{"cookie":{"maxAge":1500.4}}"#).unwrap();
        assert_eq!(session.cookie.max_age, Some(1500));

        let session = SessionData::from_payload(r#"{"cookie":{"maxAge":null}}"#).unwrap();
        assert_eq!(session.cookie.max_age, None);
    }

    #[test]
    fn test_missing_cookie_defaults() {
        let session = SessionData::from_payload(r#"{"user":"bob"}"#).unwrap();
        assert_eq!(session.cookie, Cookie::default());
        assert_eq!(session.get("user"), Some(&json!("bob")));
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(SessionData::from_payload("not json").is_err());
        assert!(SessionData::from_payload(r#"{"cookie":"oops"}"#).is_err());
    }

    #[test]
    fn test_ttl_prefers_max_age() {
        let default_ttl = Duration::milliseconds(DEFAULT_TTL_MS);
        assert_eq!(SessionData::new().ttl(default_ttl).unwrap(), default_ttl);
        assert_eq!(
            SessionData::new()
                .with_max_age(60_000)
                .ttl(default_ttl)
                .unwrap(),
            Duration::milliseconds(60_000)
        );
    }

    #[test]
    fn test_out_of_range_max_age_is_error() {
        let default_ttl = Duration::milliseconds(DEFAULT_TTL_MS);

        // Huge negative floats saturate to i64::MIN, below TimeDelta's range
        let session = SessionData::from_payload(r#"{"cookie":{"maxAge":-1e300}}"#).unwrap();
        assert_eq!(session.cookie.max_age, Some(i64::MIN));
        assert!(matches!(
            session.ttl(default_ttl),
            Err(Error::InvalidSession(_))
        ));

        let now = DateTime::from_timestamp_millis(0).unwrap();
        let far = SessionData::new().with_max_age(i64::MAX / 2);
        assert!(far.ttl(default_ttl).is_ok());
        assert!(matches!(
            far.expires_at(now, default_ttl),
            Err(Error::InvalidSession(_))
        ));
    }

    #[test]
    fn test_expires_at_adds_ttl() {
        let now = DateTime::from_timestamp_millis(1_000).unwrap();
        let default_ttl = Duration::milliseconds(DEFAULT_TTL_MS);

        assert_eq!(
            SessionData::new()
                .with_max_age(500)
                .expires_at(now, default_ttl)
                .unwrap(),
            DateTime::from_timestamp_millis(1_500).unwrap()
        );
        assert_eq!(
            SessionData::new()
                .with_max_age(-5_000)
                .expires_at(now, default_ttl)
                .unwrap(),
            DateTime::from_timestamp_millis(-4_000).unwrap()
        );
        assert_eq!(
            SessionData::new().expires_at(now, default_ttl).unwrap(),
            DateTime::from_timestamp_millis(1_000 + DEFAULT_TTL_MS).unwrap()
        );
    }

    #[test]
    fn test_stamp_expires_uses_iso_format() {
        let mut session = SessionData::new();
        session.stamp_expires(DateTime::from_timestamp_millis(60_000).unwrap());
        assert_eq!(
            session.cookie.expires.as_deref(),
            Some("1970-01-01T00:01:00.000Z")
        );

        let payload = session.to_payload().unwrap();
        assert!(payload.contains(r#""expires":"1970-01-01T00:01:00.000Z""#));
    }
}

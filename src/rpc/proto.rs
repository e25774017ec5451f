//! Wire messages for the keeper RPC.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::secrets::{Secret, SecretError};

/// A secret as it travels on the wire. Every attribute of the secret
/// record is carried; the timestamp is encoded as seconds plus nanos and
/// the URL as a plain string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSecret {
    pub id: String,
    pub name: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub location: String,
    pub fields: BTreeMap<String, String>,
    pub last_modified: WireTimestamp,
}

/// Seconds and nanoseconds since the UNIX epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(when: DateTime<Utc>) -> Self {
        Self {
            secs: when.timestamp(),
            nanos: when.timestamp_subsec_nanos(),
        }
    }
}

impl From<WireTimestamp> for DateTime<Utc> {
    fn from(ts: WireTimestamp) -> Self {
        Utc.timestamp_opt(ts.secs, ts.nanos)
            .single()
            .unwrap_or_default()
    }
}

impl From<&Secret> for WireSecret {
    fn from(secret: &Secret) -> Self {
        Self {
            id: secret.id().to_string(),
            name: secret.name().to_string(),
            username: secret.username().to_string(),
            password: secret.password().to_string(),
            kind: secret.kind().to_string(),
            url: secret.url_string(),
            location: secret.location().to_string(),
            fields: secret.fields().clone(),
            last_modified: secret.last_modified().into(),
        }
    }
}

impl WireSecret {
    /// Reassemble the secret record.
    pub fn into_secret(self) -> Secret {
        let mut secret = Secret::new(self.name, self.username, self.password)
            .with_id(self.id)
            .with_kind(self.kind)
            .with_location(self.location)
            .with_last_modified(self.last_modified.into());
        if let Ok(url) = url::Url::parse(&self.url) {
            secret = secret.with_url(url);
        }
        for (k, v) in self.fields {
            secret = secret.with_field(k, v);
        }
        secret
    }
}

/// The error taxonomy preserved across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    NotFound,
    ReadOnly,
    Duplicate,
    Unsupported,
    RateLimited,
    Backend,
}

/// A keeper error as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl From<&SecretError> for WireError {
    fn from(err: &SecretError) -> Self {
        let (kind, status_code) = match err {
            SecretError::NotFound(_) => (WireErrorKind::NotFound, None),
            SecretError::ReadOnly(_) => (WireErrorKind::ReadOnly, None),
            SecretError::Duplicate(_) => (WireErrorKind::Duplicate, None),
            SecretError::Unsupported(_) => (WireErrorKind::Unsupported, None),
            SecretError::RateLimited(_) => (WireErrorKind::RateLimited, None),
            SecretError::Backend { status_code, .. } => (WireErrorKind::Backend, *status_code),
            _ => (WireErrorKind::Backend, None),
        };
        Self {
            kind,
            message: err.to_string(),
            status_code,
        }
    }
}

impl From<WireError> for SecretError {
    fn from(err: WireError) -> Self {
        match err.kind {
            WireErrorKind::NotFound => SecretError::NotFound(err.message),
            WireErrorKind::ReadOnly => SecretError::ReadOnly(err.message),
            WireErrorKind::Duplicate => SecretError::Duplicate(err.message),
            WireErrorKind::Unsupported => SecretError::Unsupported(err.message),
            WireErrorKind::RateLimited => SecretError::RateLimited(err.message),
            WireErrorKind::Backend => SecretError::backend(err.message, err.status_code),
        }
    }
}

/// What the agent reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Process id of the agent.
    pub pid: i32,

    /// Name of the keeper the agent serves.
    pub keeper: String,

    /// Period of the policy enforcement workers, if any are running.
    #[serde(default, with = "humantime_serde")]
    pub enforcement_period: Option<Duration>,

    /// Names of the policy keepers being enforced.
    #[serde(default)]
    pub enforced_policies: Vec<String>,
}

/// One request frame. Every keeper operation maps to one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListLocations,
    ListSecrets { location: String },
    GetSecret { id: String },
    GetSecretsByName { name: String },
    SetSecret { secret: WireSecret },
    CopySecret { id: String, location: String },
    MoveSecret { id: String, location: String },
    DeleteSecret { id: String },
    GetServiceInfo,
}

/// One response frame. List operations send a run of element frames
/// closed by `End`; point operations send exactly one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Response {
    Location { location: String },
    Id { id: String },
    Secret { secret: WireSecret },
    Unit,
    End,
    Info { info: ServiceInfo },
    Error { error: WireError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_round_trip_preserves_every_attribute() {
        let original = Secret::new("github", "alice", "hunter2")
            .with_id("abc123")
            .with_kind("login")
            .with_url(url::Url::parse("https://github.com/login").unwrap())
            .with_location("work")
            .with_field("otp", "123456")
            .with_field("note", "");

        let wire = WireSecret::from(&original);
        let bytes = serde_json::to_vec(&wire).unwrap();
        let parsed: WireSecret = serde_json::from_slice(&bytes).unwrap();
        let back = parsed.into_secret();

        assert_eq!(back, original);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let when = Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let ts = WireTimestamp::from(when);
        assert_eq!(ts.nanos, 123_456_789);
        let back: DateTime<Utc> = ts.into();
        assert_eq!(back, when);
    }

    #[test]
    fn test_error_kind_survives_the_wire() {
        let err = SecretError::not_found("abc");
        let wire = WireError::from(&err);
        let bytes = serde_json::to_vec(&wire).unwrap();
        let parsed: WireError = serde_json::from_slice(&bytes).unwrap();
        let back: SecretError = parsed.into();
        assert!(back.is_not_found());

        let err = SecretError::read_only("nope");
        let back: SecretError = WireError::from(&err).into();
        assert!(back.is_read_only());

        let err = SecretError::backend("boom", Some(429));
        let wire = WireError::from(&err);
        assert_eq!(wire.status_code, Some(429));
    }

    #[test]
    fn test_request_tags_are_stable() {
        let req = Request::GetSecret {
            id: "abc".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""op":"get_secret""#));

        let resp = Response::End;
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""msg":"end""#));
    }
}

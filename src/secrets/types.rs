//! The secret record shared by every keeper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// A single credential record.
///
/// Secrets are immutable by construction: every setter consumes the value
/// and returns a new one, so a keeper can hand out copies without worrying
/// about aliased mutation. The `id` is assigned by the backend that persists
/// the secret; an empty id marks a draft that has not been stored yet.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    /// Backend-assigned identifier, stable for the secret's lifetime in
    /// that backend. Empty until first persisted.
    #[serde(default)]
    id: String,

    /// Human label. Not required to be unique.
    name: String,

    /// Principal identifier within the secret.
    #[serde(default)]
    username: String,

    /// The sensitive payload.
    #[serde(default)]
    password: String,

    /// Free-form category, e.g. `login` or `note`.
    #[serde(rename = "type", default)]
    kind: String,

    /// Optional absolute URL the credential applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<Url>,

    /// Backend-defined container path. Empty string means the root.
    #[serde(default)]
    location: String,

    /// Auxiliary named fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<String, String>,

    /// When the secret was last written, UTC.
    last_modified: DateTime<Utc>,
}

impl Secret {
    /// Create a new unpersisted draft with the current time as its
    /// modification time.
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            username: username.into(),
            password: password.into(),
            kind: String::new(),
            url: None,
            location: String::new(),
            fields: BTreeMap::new(),
            last_modified: Utc::now(),
        }
    }

    /// The backend-assigned id, or empty for a draft.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The human label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The principal identifier.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The sensitive payload.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// The free-form category string.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The URL, if one is set.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The URL rendered as a string, or empty when unset.
    pub fn url_string(&self) -> String {
        self.url.as_ref().map(Url::to_string).unwrap_or_default()
    }

    /// The container path. Empty string means the root location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The auxiliary fields.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// A single auxiliary field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// When the secret was last written.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Return a copy with the given id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Return a copy with the given name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Return a copy with the given username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Return a copy with the given password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Return a copy with the given type string.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Return a copy with the given URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Return a copy with the given location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Return a copy with the named field set. Setting a field to the
    /// empty string is distinct from deleting it.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Return a copy with the named field removed.
    pub fn without_field(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self
    }

    /// Return a copy with the given modification time.
    pub fn with_last_modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = when;
        self
    }

    /// Look up a well-known attribute (`id`, `name`, `username`,
    /// `password`, `type`, `url`, `location`) or fall back to a custom
    /// field of that name.
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.clone()),
            "name" => Some(self.name.clone()),
            "username" => Some(self.username.clone()),
            "password" => Some(self.password.clone()),
            "type" => Some(self.kind.clone()),
            "url" => Some(self.url_string()),
            "location" => Some(self.location.clone()),
            _ => self.fields.get(name).cloned(),
        }
    }
}

// Debug hides the payload and field values; field names are useful in logs.
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("type", &self.kind)
            .field("url", &self.url_string())
            .field("location", &self.location)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

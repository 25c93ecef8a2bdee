//! Identity material handed to the service when it challenges a connection.
//!
//! The service calls [`Authenticator::authenticate`] lazily, at the moment a
//! share actually demands credentials, and passes a set of bounded output
//! fields to fill in.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

pub const GUEST_USER: &str = "guest";
pub const DEFAULT_FIELD_CAPACITY: usize = 256;

/// Output field of fixed capacity.
///
/// Assignment keeps at most `capacity - 1` bytes, the same amount a
/// NUL-terminated buffer of that size can hold. Truncation never splits a
/// UTF-8 sequence.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthField {
    value: String,
    capacity: usize,
}

impl AuthField {
    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            value: String::new(),
            capacity,
        }
    }

    pub fn assign(&mut self, value: &str) {
        let limit = self.capacity.saturating_sub(1);
        let mut end = value.len().min(limit);
        while !value.is_char_boundary(end) {
            end -= 1;
        }

        self.value.clear();
        self.value.push_str(&value[..end]);
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for AuthField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthField")
            .field("len", &self.value.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// The three fields filled in by an [`Authenticator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFields {
    pub workgroup: AuthField,
    pub username: AuthField,
    pub password: AuthField,
}

impl AuthFields {
    #[must_use]
    pub const fn with_capacity(workgroup: usize, username: usize, password: usize) -> Self {
        Self {
            workgroup: AuthField::with_capacity(workgroup),
            username: AuthField::with_capacity(username),
            password: AuthField::with_capacity(password),
        }
    }
}

impl Default for AuthFields {
    fn default() -> Self {
        Self::with_capacity(
            DEFAULT_FIELD_CAPACITY,
            DEFAULT_FIELD_CAPACITY,
            DEFAULT_FIELD_CAPACITY,
        )
    }
}

/// Authentication callback invoked by the service on a connection challenge.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, server: &str, share: &str, fields: &mut AuthFields);
}

/// Username and password pair.
///
/// An empty username authenticates as [`GUEST_USER`] with an empty password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn guest() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.username.is_empty()
    }

    fn fill(&self, fields: &mut AuthFields) {
        fields.workgroup.clear();
        if self.username.is_empty() {
            fields.username.assign(GUEST_USER);
        } else {
            fields.username.assign(&self.username);
        }
        // the password is only used alongside an explicit username
        if self.password.is_empty() || self.username.is_empty() {
            fields.password.clear();
        } else {
            fields.password.assign(&self.password);
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Authenticator for Credentials {
    fn authenticate(&self, server: &str, share: &str, fields: &mut AuthFields) {
        debug!(
            "auth challenge for smb://{}/{} as '{}'",
            server,
            share,
            if self.is_guest() { GUEST_USER } else { self.username.as_str() }
        );
        self.fill(fields);
    }
}

/// Shared, last-writer-wins credential slot.
///
/// Every clone refers to the same slot. The value is read when the service
/// challenges, not when the connection is set up, so a
/// [`set_credentials`](Self::set_credentials) issued from elsewhere in between
/// wins. Use one [`Credentials`] per session when identities must not mix.
#[derive(Debug, Clone, Default)]
pub struct CredentialContext {
    current: Arc<RwLock<Credentials>>,
}

impl CredentialContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the current identity unconditionally.
    pub fn set_credentials<U: Into<String>, P: Into<String>>(&self, username: U, password: P) {
        let credentials = Credentials::new(username, password);
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    #[must_use]
    pub fn snapshot(&self) -> Credentials {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Authenticator for CredentialContext {
    fn authenticate(&self, server: &str, share: &str, fields: &mut AuthFields) {
        self.snapshot().authenticate(server, share, fields);
    }
}

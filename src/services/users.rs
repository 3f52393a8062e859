//! Cache-aside user service.

use super::cached;
use crate::cache::{CacheBackend, keys};
use crate::models::{NewUser, Page, User, UserId, UserPatch};
use crate::storage::{StorageBackend, UserStore};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// User operations with a read-through cache.
#[derive(Clone)]
pub struct UserService {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl UserService {
    /// Builds the service from an injected backend and cache. Usually
    /// obtained from [`super::Store`] instead.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        cache: Arc<dyn CacheBackend>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            ttl,
        }
    }

    /// Registers a user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty or whitespace username or
    /// a malformed email, [`Error::Conflict`] for duplicates.
    pub fn register(
        &self,
        username: &str,
        email: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::InvalidInput("username cannot be empty".to_string()));
        }
        if username.contains(char::is_whitespace) {
            return Err(Error::InvalidInput(
                "username cannot contain whitespace".to_string(),
            ));
        }
        if let Some(email) = email
            && !email.contains('@')
        {
            return Err(Error::InvalidInput(format!(
                "email {email:?} is not an address"
            )));
        }

        self.backend.create_user(NewUser {
            username: username.to_string(),
            email: email.map(ToString::to_string),
            full_name: full_name.map(ToString::to_string),
            is_admin: false,
        })
    }

    /// Fetches a user by ID through the cache.
    pub fn get(&self, id: &UserId) -> Result<Option<User>> {
        cached::read_through(self.cache.as_ref(), &keys::user(id), self.ttl, || {
            self.backend.get_user(id)
        })
    }

    /// Fetches a user by username through the cache.
    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        cached::read_through(
            self.cache.as_ref(),
            &keys::user_by_name(username),
            self.ttl,
            || self.backend.get_user_by_username(username),
        )
    }

    /// Lists users straight from storage. An administrative query, cold by
    /// nature, so it does not occupy cache capacity.
    pub fn list(&self, page: &Page) -> Result<Vec<User>> {
        self.backend.list_users(page)
    }

    /// Applies a patch and invalidates the user's cache entries.
    pub fn update(&self, id: &UserId, patch: UserPatch) -> Result<Option<User>> {
        let updated = self.backend.update_user(id, patch)?;
        if let Some(ref user) = updated {
            self.invalidate(user);
        }
        Ok(updated)
    }

    /// Deletes a user (soft by default at the API boundary).
    pub fn delete(&self, id: &UserId, soft: bool) -> Result<bool> {
        // Fetch first: the username key can only be invalidated by name.
        let user = self.backend.get_user(id)?;
        let deleted = self.backend.delete_user(id, soft)?;
        if deleted && let Some(ref user) = user {
            self.invalidate(user);
        }
        Ok(deleted)
    }

    /// Stamps a login and invalidates the user's cache entries.
    pub fn record_login(&self, id: &UserId) -> Result<bool> {
        let touched = self.backend.record_login(id)?;
        if touched && let Some(user) = self.backend.get_user(id)? {
            self.invalidate(&user);
        }
        Ok(touched)
    }

    fn invalidate(&self, user: &User) {
        cached::invalidate(
            self.cache.as_ref(),
            &[keys::user(&user.id), keys::user_by_name(&user.username)],
        );
    }
}

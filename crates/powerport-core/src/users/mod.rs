//! Panel user directory, persisted as the `users` list.
//!
//! Password hashes never leave this module: every read returns a
//! [`UserView`].

use crate::auth::hash_password;
use crate::error::{Error, Result};
use crate::store::{keys, Store};
use crate::types::{is_truthy, User, UserView};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tracing::info;

/// User creation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub admin: Option<Value>,
}

/// Partial update. `userId` and `password` are not patchable and are
/// ignored if present in the body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub admin: Option<bool>,
    pub access_to: Option<Vec<String>>,
}

/// Field searched by [`UserDirectory::lookup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupField {
    Email,
    Username,
}

impl FromStr for LookupField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "email" => Ok(LookupField::Email),
            "username" => Ok(LookupField::Username),
            _ => Err(Error::validation("Type must be \"email\" or \"username\"")),
        }
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Store,
}

/// Whether `user_id` names a registered user
pub fn user_exists(store: &Store, user_id: &str) -> Result<bool> {
    let users: Vec<User> = store.get_list(keys::USERS)?;
    Ok(users.iter().any(|u| u.user_id == user_id))
}

impl UserDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Result<Vec<UserView>> {
        Ok(self.users()?.iter().map(UserView::from).collect())
    }

    /// Full record, including the password hash
    pub fn get(&self, user_id: &str) -> Result<User> {
        self.users()?
            .into_iter()
            .find(|u| u.user_id == user_id)
            .ok_or_else(|| Error::not_found("User"))
    }

    pub fn view(&self, user_id: &str) -> Result<UserView> {
        Ok(UserView::from(&self.get(user_id)?))
    }

    pub fn exists(&self, user_id: &str) -> Result<bool> {
        user_exists(&self.store, user_id)
    }

    pub fn lookup(&self, field: &str, value: &str) -> Result<UserView> {
        if field.is_empty() || value.is_empty() {
            return Err(Error::validation("Type and value parameters are required"));
        }
        let field = field.parse::<LookupField>()?;

        self.users()?
            .iter()
            .find(|u| match field {
                LookupField::Email => u.email == value,
                LookupField::Username => u.username == value,
            })
            .map(UserView::from)
            .ok_or_else(|| Error::not_found("User"))
    }

    pub async fn create(&self, request: NewUser) -> Result<UserView> {
        let (Some(username), Some(email), Some(password)) = (
            request.username.filter(|s| !s.is_empty()),
            request.email.filter(|s| !s.is_empty()),
            request.password.filter(|s| !s.is_empty()),
        ) else {
            return Err(Error::validation("Username, email, and password are required"));
        };

        let password_hash = hash_password(&password).await?;
        let user = User {
            user_id: uuid::Uuid::new_v4().to_string(),
            username,
            email,
            password_hash,
            admin: is_truthy(request.admin.as_ref()),
            access_to: Vec::new(),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            updated_at: None,
        };

        let created = self
            .store
            .update::<Vec<User>, _, _>(keys::USERS, |users| {
                if users
                    .iter()
                    .any(|u| u.username == user.username || u.email == user.email)
                {
                    return Err(Error::Conflict(
                        "User with this username or email already exists".into(),
                    ));
                }
                users.push(user.clone());
                Ok(UserView::from(&user))
            })
            .await??;

        info!(user_id = %created.user_id, username = %created.username, "Created user");
        Ok(created)
    }

    pub async fn update(&self, user_id: &str, patch: UserPatch) -> Result<UserView> {
        self.store
            .update::<Vec<User>, _, _>(keys::USERS, |users| {
                let clash = users.iter().any(|u| {
                    u.user_id != user_id
                        && (patch.username.as_deref() == Some(u.username.as_str())
                            || patch.email.as_deref() == Some(u.email.as_str()))
                });
                if clash {
                    return Err(Error::Conflict(
                        "User with this username or email already exists".into(),
                    ));
                }

                let user = users
                    .iter_mut()
                    .find(|u| u.user_id == user_id)
                    .ok_or_else(|| Error::not_found("User"))?;

                if let Some(username) = patch.username {
                    user.username = username;
                }
                if let Some(email) = patch.email {
                    user.email = email;
                }
                if let Some(admin) = patch.admin {
                    user.admin = admin;
                }
                if let Some(access_to) = patch.access_to {
                    user.access_to = access_to;
                }
                user.updated_at = Some(chrono::Utc::now().to_rfc3339());
                Ok(UserView::from(&*user))
            })
            .await?
    }

    pub async fn change_password(&self, user_id: &str, new_password: Option<&str>) -> Result<()> {
        let new_password = new_password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::validation("New password is required"))?;
        let hash = hash_password(new_password).await?;

        self.store
            .update::<Vec<User>, _, _>(keys::USERS, |users| {
                let user = users
                    .iter_mut()
                    .find(|u| u.user_id == user_id)
                    .ok_or_else(|| Error::not_found("User"))?;
                user.password_hash = hash;
                user.updated_at = Some(chrono::Utc::now().to_rfc3339());
                Ok(())
            })
            .await?
    }

    pub async fn delete(&self, user_id: &str) -> Result<()> {
        self.store
            .update::<Vec<User>, _, _>(keys::USERS, |users| {
                let before = users.len();
                users.retain(|u| u.user_id != user_id);
                if users.len() == before {
                    Err(Error::not_found("User"))
                } else {
                    Ok(())
                }
            })
            .await??;

        info!(user_id, "Deleted user");
        Ok(())
    }

    fn users(&self) -> Result<Vec<User>> {
        self.store.get_list(keys::USERS)
    }
}

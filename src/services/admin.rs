//! Account and realm administration
//!
//! Realm management is account-level: its URLs stop after the account
//! segment. User management lives inside a realm like every other service.

use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Realm belonging to an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Realm {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Serialize)]
struct CreateRealmRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// Realm user as returned by the admin service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Payload for creating a realm user
#[derive(Serialize)]
pub struct NewUser {
    pub username: String,
    #[serde(serialize_with = "expose_password")]
    pub password: SecretString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
            email: None,
            permissions: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("email", &self.email)
            .field("permissions", &self.permissions)
            .finish()
    }
}

fn expose_password<S: Serializer>(password: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(password.expose_secret())
}

#[derive(Serialize)]
struct PermissionsRequest<'a> {
    permissions: &'a [String],
}

#[derive(Debug, Clone)]
pub struct Admin<'a> {
    scope: Scope<'a>,
}

impl<'a> Admin<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// List realms of the scope's account
    pub async fn list_realms(&self, options: &ListOptions) -> Result<PaginatedResponse<Realm>, NimbusError> {
        let url = self
            .scope
            .account_url(Service::Admin)
            .await?
            .segment("realms");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn create_realm(&self, name: &str, description: Option<&str>) -> Result<Realm, NimbusError> {
        validate_identifier("realm", name)?;
        let url = self
            .scope
            .account_url(Service::Admin)
            .await?
            .segment("realms")
            .build()?;
        tracing::info!("Creating realm {}", name);
        self.scope
            .send_json(Method::POST, url, &CreateRealmRequest { name, description })
            .await
    }

    pub async fn delete_realm(&self, name: &str) -> Result<(), NimbusError> {
        validate_identifier("realm", name)?;
        let url = self
            .scope
            .account_url(Service::Admin)
            .await?
            .segment("realms")
            .segment(name)
            .build()?;
        tracing::info!("Deleting realm {}", name);
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User, NimbusError> {
        require_non_empty("username", &user.username)?;
        require_non_empty("password", user.password.expose_secret())?;

        let url = self
            .scope
            .realm_url(Service::Admin)
            .await?
            .segment("users")
            .build()?;
        tracing::debug!("Creating user {}", user.username);
        self.scope.send_json(Method::POST, url, user).await
    }

    pub async fn get_user(&self, username: &str) -> Result<User, NimbusError> {
        let url = self.user_url(username, None).await?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn list_users(&self, options: &ListOptions) -> Result<PaginatedResponse<User>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Admin)
            .await?
            .segment("users");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete_user(&self, username: &str) -> Result<(), NimbusError> {
        let url = self.user_url(username, None).await?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }

    /// Replace the permission set of a user
    pub async fn set_permissions(&self, username: &str, permissions: &[String]) -> Result<User, NimbusError> {
        if let Some(empty) = permissions.iter().find(|p| p.trim().is_empty()) {
            return Err(NimbusError::Validation(format!(
                "permission names must not be empty, got {:?}",
                empty
            )));
        }
        let url = self.user_url(username, Some("permissions")).await?;
        self.scope
            .send_json(Method::PUT, url, &PermissionsRequest { permissions })
            .await
    }

    async fn user_url(&self, username: &str, suffix: Option<&str>) -> Result<reqwest::Url, NimbusError> {
        require_non_empty("username", username)?;
        let builder = self
            .scope
            .realm_url(Service::Admin)
            .await?
            .segment("users")
            .segment(username);
        match suffix {
            Some(suffix) => builder.segment(suffix).build(),
            None => builder.build(),
        }
    }
}

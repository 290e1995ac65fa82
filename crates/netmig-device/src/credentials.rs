//! Credential resolution.
//!
//! Devices carry only a credential reference. Resolvers turn that reference
//! into secrets when a session opens; nothing here persists or logs them.

use crate::ConnectError;
use async_trait::async_trait;
use netmig_util::Secret;
use std::collections::HashMap;

/// Optional jump host used to reach the device.
#[derive(Debug, Clone)]
pub struct JumpHost {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
}

/// Resolved login material for one device.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    pub jumphost: Option<JumpHost>,
}

impl Credentials {
    /// Credentials with no login material; the transport uses its own defaults.
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
            jumphost: None,
        }
    }

    /// Username and password credentials.
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(Secret::new(password.into())),
            jumphost: None,
        }
    }

    /// Route the connection through a jump host.
    pub fn with_jumphost(mut self, jumphost: JumpHost) -> Self {
        self.jumphost = Some(jumphost);
        self
    }
}

/// Resolves a credential reference to usable secrets.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve the reference carried by a device (`None` when the device has none).
    async fn resolve(&self, reference: Option<&str>) -> Result<Credentials, ConnectError>;
}

/// Fixed, in-memory credential table.
///
/// The entry under `None` (set with [`StaticCredentialResolver::with_default`])
/// applies to devices without a reference.
#[derive(Default)]
pub struct StaticCredentialResolver {
    default: Option<Credentials>,
    named: HashMap<String, Credentials>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, credentials: Credentials) -> Self {
        self.default = Some(credentials);
        self
    }

    pub fn with_named(mut self, reference: impl Into<String>, credentials: Credentials) -> Self {
        self.named.insert(reference.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, reference: Option<&str>) -> Result<Credentials, ConnectError> {
        let found = match reference {
            Some(name) => self.named.get(name),
            None => self.default.as_ref(),
        };
        found.cloned().ok_or_else(|| {
            ConnectError::AuthFailed(format!(
                "no credentials for reference '{}'",
                reference.unwrap_or("<default>")
            ))
        })
    }
}

/// Reads credentials from environment variables at open time.
///
/// A reference `core` maps to `<USERNAME_VAR>_CORE` / `<PASSWORD_VAR>_CORE`,
/// falling back to the unsuffixed variables. Missing variables yield
/// anonymous credentials so key-based transports keep working.
#[derive(Debug, Clone)]
pub struct EnvCredentialResolver {
    pub username_var: String,
    pub password_var: String,
    pub jumphost_var: String,
    pub jumphost_username_var: String,
    pub jumphost_password_var: String,
}

impl Default for EnvCredentialResolver {
    fn default() -> Self {
        Self {
            username_var: "NETMIG_USERNAME".to_string(),
            password_var: "NETMIG_PASSWORD".to_string(),
            jumphost_var: "NETMIG_JUMPHOST".to_string(),
            jumphost_username_var: "NETMIG_JUMPHOST_USERNAME".to_string(),
            jumphost_password_var: "NETMIG_JUMPHOST_PASSWORD".to_string(),
        }
    }
}

impl EnvCredentialResolver {
    fn lookup(var: &str, reference: Option<&str>) -> Option<String> {
        let scoped = reference.map(|r| format!("{}_{}", var, env_suffix(r)));
        scoped
            .and_then(|name| std::env::var(name).ok())
            .or_else(|| std::env::var(var).ok())
            .filter(|value| !value.is_empty())
    }
}

fn env_suffix(reference: &str) -> String {
    reference
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, reference: Option<&str>) -> Result<Credentials, ConnectError> {
        let username = Self::lookup(&self.username_var, reference);
        let password = Self::lookup(&self.password_var, reference).map(Secret::new);
        let jumphost = Self::lookup(&self.jumphost_var, reference).map(|host| JumpHost {
            host,
            username: Self::lookup(&self.jumphost_username_var, reference),
            password: Self::lookup(&self.jumphost_password_var, reference).map(Secret::new),
        });

        Ok(Credentials {
            username,
            password,
            jumphost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_default_and_named() {
        let resolver = StaticCredentialResolver::new()
            .with_default(Credentials::login("netops", "pw"))
            .with_named("core", Credentials::login("core-admin", "pw2"));

        let default = resolver.resolve(None).await.unwrap();
        assert_eq!(default.username.as_deref(), Some("netops"));

        let core = resolver.resolve(Some("core")).await.unwrap();
        assert_eq!(core.username.as_deref(), Some("core-admin"));
        assert_eq!(core.password.unwrap().expose(), "pw2");
    }

    #[tokio::test]
    async fn test_static_resolver_missing_reference_is_auth_failure() {
        let resolver = StaticCredentialResolver::new();
        let err = resolver.resolve(Some("edge")).await.unwrap_err();
        assert!(matches!(err, ConnectError::AuthFailed(ref m) if m.contains("edge")));
    }

    #[tokio::test]
    async fn test_env_resolver_scoped_variables() {
        let resolver = EnvCredentialResolver {
            username_var: "NETMIG_TEST_CRED_USER".to_string(),
            password_var: "NETMIG_TEST_CRED_PASS".to_string(),
            jumphost_var: "NETMIG_TEST_CRED_JUMP".to_string(),
            jumphost_username_var: "NETMIG_TEST_CRED_JUMP_USER".to_string(),
            jumphost_password_var: "NETMIG_TEST_CRED_JUMP_PASS".to_string(),
        };
        std::env::set_var("NETMIG_TEST_CRED_USER", "global");
        std::env::set_var("NETMIG_TEST_CRED_USER_DC_1", "dc1-user");
        std::env::set_var("NETMIG_TEST_CRED_PASS", "secret");

        let creds = resolver.resolve(Some("dc-1")).await.unwrap();
        assert_eq!(creds.username.as_deref(), Some("dc1-user"));
        assert_eq!(creds.password.as_ref().unwrap().expose(), "secret");
        assert!(creds.jumphost.is_none());
        assert!(!format!("{creds:?}").contains("secret"));

        let creds = resolver.resolve(None).await.unwrap();
        assert_eq!(creds.username.as_deref(), Some("global"));
    }

    #[test]
    fn test_env_suffix() {
        assert_eq!(env_suffix("dc-1.core"), "DC_1_CORE");
    }
}

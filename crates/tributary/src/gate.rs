//! Credential gate consulted before any scrape run.
//!
//! Callers ask a [`CredentialSource`] for the credential they need instead of
//! reaching into a client object for it.

use std::fmt;

/// A credential for one user/profile pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub profile_id: Option<String>,
    secret: String,
}

impl Credential {
    pub fn new(user_id: &str, profile_id: Option<&str>, secret: impl Into<String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            profile_id: profile_id.map(str::to_string),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("profile_id", &self.profile_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub trait CredentialSource: Send + Sync {
    fn credential(&self, user_id: &str, profile_id: Option<&str>) -> Option<Credential>;

    fn is_configured(&self, user_id: &str, profile_id: Option<&str>) -> bool {
        self.credential(user_id, profile_id).is_some()
    }
}

/// Reads the credential from an environment variable.
///
/// With a profile, `<VAR>_<PROFILE>` is tried before `<VAR>`.
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    fn lookup(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

impl CredentialSource for EnvCredentials {
    fn credential(&self, user_id: &str, profile_id: Option<&str>) -> Option<Credential> {
        let profile_var = profile_id.map(|profile| {
            let suffix: String = profile
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect();
            format!("{}_{}", self.var, suffix)
        });

        profile_var
            .as_deref()
            .and_then(Self::lookup)
            .or_else(|| Self::lookup(&self.var))
            .map(|secret| Credential::new(user_id, profile_id, secret))
    }
}

/// Fixed answer, for sources that need no credential and for tests.
pub struct StaticCredentials {
    secret: Option<String>,
}

impl StaticCredentials {
    pub fn configured(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }

    pub fn missing() -> Self {
        Self { secret: None }
    }
}

impl CredentialSource for StaticCredentials {
    fn credential(&self, user_id: &str, profile_id: Option<&str>) -> Option<Credential> {
        self.secret
            .as_ref()
            .map(|secret| Credential::new(user_id, profile_id, secret.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_gate() {
        assert!(StaticCredentials::configured("t").is_configured("u", None));
        assert!(!StaticCredentials::missing().is_configured("u", Some("work")));
    }

    #[test]
    fn test_env_gate_prefers_profile_variable() {
        let base = "TRIBUTARY_TEST_GATE_TOKEN";
        std::env::set_var(base, "base-secret");
        std::env::set_var(format!("{base}_WORK_2"), "work-secret");

        let gate = EnvCredentials::new(base);
        let cred = gate.credential("alice", Some("work-2")).unwrap();
        assert_eq!(cred.secret(), "work-secret");
        assert_eq!(cred.profile_id.as_deref(), Some("work-2"));
        assert_eq!(gate.credential("alice", Some("home")).unwrap().secret(), "base-secret");

        std::env::remove_var(base);
        std::env::remove_var(format!("{base}_WORK_2"));
        assert!(!gate.is_configured("alice", None));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cred = Credential::new("u", None, "hunter2");
        assert!(!format!("{cred:?}").contains("hunter2"));
    }
}

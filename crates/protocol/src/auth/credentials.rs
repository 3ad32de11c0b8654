/*
 * Robin mail transfer agent
 *
 * Copyright (C) 2024 - the Robin authors
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

/// Credentials tied to a session, not necessarily valid ones.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub authid: String,
    pub authpass: String,
}

impl Credentials {
    #[must_use]
    pub fn new(authid: impl Into<String>, authpass: impl Into<String>) -> Self {
        Self {
            authid: authid.into(),
            authpass: authpass.into(),
        }
    }
}

/// The password never reaches the logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("authid", &self.authid)
            .field("authpass", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Credentials;

    #[test]
    fn debug_redacts_the_password() {
        let debug = format!("{:?}", Credentials::new("jane", "hunter2"));
        assert!(debug.contains("jane"));
        assert!(!debug.contains("hunter2"));
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the client proves its identity during login.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AuthMethod {
    /// Sends the secret in clear text.
    #[default]
    Plain,
    /// Requests an MD5 challenge and answers with a digest of the secret.
    Challenge,
}

/// Login identity of the client.
///
/// `Debug` output never contains the secret.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Credentials {
    /// Account name configured on the switch.
    pub username: String,
    /// Shared secret of the account.
    pub secret: String,
    /// Login mechanism.
    #[serde(default)]
    pub method: AuthMethod,
    /// Whether the switch should stream unsolicited events to this session.
    #[serde(default = "events_enabled")]
    pub events: bool,
}

const fn events_enabled() -> bool {
    true
}

impl Credentials {
    /// Plain-text credentials with events enabled.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            method: AuthMethod::Plain,
            events: true,
        }
    }

    /// Selects the login mechanism.
    #[must_use]
    pub const fn with_method(mut self, method: AuthMethod) -> Self {
        self.method = method;
        self
    }

    /// Enables or disables the unsolicited event stream.
    #[must_use]
    pub const fn with_events(mut self, events: bool) -> Self {
        self.events = events;
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("method", &self.method)
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn debug_output_hides_secret() {
        let credentials = Credentials::new("admin", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"), "secret leaked: {rendered}");
        assert!(rendered.contains("admin"));
    }

    #[rstest]
    #[case("plain", AuthMethod::Plain)]
    #[case("Challenge", AuthMethod::Challenge)]
    fn parses_auth_methods(#[case] input: &str, #[case] expected: AuthMethod) {
        assert_eq!(input.parse::<AuthMethod>().expect("method parses"), expected);
    }
}

//! Outgoing actions and their correlated results.

use std::time::Duration;

use crate::message::{ACTION_ID_HEADER, FromMessage, Message};

const ACTION_HEADER: &str = "Action";

/// A named request for the switch.
///
/// Headers are written in insertion order after the `Action` line. The
/// correlation id is appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    headers: Vec<(String, String)>,
    action_id: Option<String>,
    timeout: Option<Duration>,
    lists: Vec<String>,
}

impl Action {
    /// Creates an action with no headers.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: Vec::new(),
            action_id: None,
            timeout: None,
            lists: Vec::new(),
        }
    }

    /// Appends a header. Repeating a name sends the header once per value.
    ///
    /// An `ActionID` header sets the correlation id instead.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if name.eq_ignore_ascii_case(ACTION_ID_HEADER) {
            self.action_id = Some(value.into());
        } else if !name.eq_ignore_ascii_case(ACTION_HEADER) {
            self.headers.push((name, value.into()));
        }
        self
    }

    /// Uses `action_id` instead of a generated correlation id.
    #[must_use]
    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    /// Overrides the configured response deadline for this action.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declares that the reply is a list of the named aggregate family, so
    /// its members are assembled under this action's correlation id.
    #[must_use]
    pub fn expect_list(mut self, family: impl Into<String>) -> Self {
        self.lists.push(family.into());
        self
    }

    /// Action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Caller headers in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Explicit correlation id, if one was set.
    #[must_use]
    pub fn action_id(&self) -> Option<&str> {
        self.action_id.as_deref()
    }

    /// Per-action response deadline, if one was set.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Aggregate families opened when the action is sent.
    #[must_use]
    pub fn expected_lists(&self) -> &[String] {
        &self.lists
    }

    /// Renders the wire form with `action_id` as the correlation header.
    pub(crate) fn serialize(&self, action_id: &str) -> Vec<u8> {
        let mut text = String::with_capacity(64);
        push_line(&mut text, ACTION_HEADER, &self.name);
        for (name, value) in &self.headers {
            push_line(&mut text, name, value);
        }
        push_line(&mut text, ACTION_ID_HEADER, action_id);
        text.push_str("\r\n");
        text.into_bytes()
    }
}

fn push_line(text: &mut String, name: &str, value: &str) {
    text.push_str(&single_line(name));
    text.push_str(": ");
    text.push_str(&single_line(value));
    text.push_str("\r\n");
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A response correlated with the action that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    message: Message,
    action: String,
    action_id: String,
    success: bool,
    elapsed: Duration,
}

impl ActionResponse {
    pub(crate) fn new(message: Message, action: String, action_id: String, elapsed: Duration) -> Self {
        let success = message.is_response()
            && (message.name().eq_ignore_ascii_case("Success")
                || message.name().eq_ignore_ascii_case("Follows"));
        Self {
            message,
            action,
            action_id,
            success,
            elapsed,
        }
    }

    /// The response message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Name of the action that was answered.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Correlation id shared by the action and this response.
    #[must_use]
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Returns `true` for `Success` and `Follows` responses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    /// Time between submitting the action and receiving the response.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Converts the response into a typed value.
    ///
    /// # Errors
    ///
    /// Propagates the conversion's error.
    pub fn decode<T: FromMessage>(&self) -> Result<T, T::Error> {
        T::from_message(&self.message)
    }
}

/// Terminal result of a submitted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The switch answered in time.
    Responded(ActionResponse),
    /// No answer arrived before the deadline. A late answer is delivered to
    /// orphan handlers.
    TimedOut {
        /// Correlation id of the abandoned request.
        action_id: String,
    },
}

impl ActionOutcome {
    /// The response, when one arrived.
    #[must_use]
    pub const fn response(&self) -> Option<&ActionResponse> {
        match self {
            Self::Responded(response) => Some(response),
            Self::TimedOut { .. } => None,
        }
    }

    /// Consumes the outcome, returning the response when one arrived.
    #[must_use]
    pub fn into_response(self) -> Option<ActionResponse> {
        match self {
            Self::Responded(response) => Some(response),
            Self::TimedOut { .. } => None,
        }
    }

    /// Returns `true` when the deadline passed.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

use serde::{Deserialize, Serialize};

/// Header that carries the list identifier unless a family overrides it.
pub const DEFAULT_LIST_ID_HEADER: &str = "ActionID";

fn default_list_id_header() -> String {
    DEFAULT_LIST_ID_HEADER.to_owned()
}

/// Describes one kind of list reply: the events that make up its members and
/// the event that closes it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AggregateFamily {
    /// Family name, usually the action that requests the list.
    pub name: String,
    /// Event names buffered as members.
    pub members: Vec<String>,
    /// Event name that seals the list.
    pub completion: String,
    /// Header whose value keys the buffer.
    #[serde(default = "default_list_id_header")]
    pub list_id_header: String,
    /// Header on the completion event announcing the member count.
    #[serde(default)]
    pub count_header: Option<String>,
}

impl AggregateFamily {
    /// Builds a family keyed by `ActionID` with no announced count.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, members: I, completion: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
            completion: completion.into(),
            list_id_header: default_list_id_header(),
            count_header: None,
        }
    }

    /// Names the completion header carrying the announced member count.
    #[must_use]
    pub fn with_count_header(mut self, header: impl Into<String>) -> Self {
        self.count_header = Some(header.into());
        self
    }

    /// Keys the buffer on a header other than `ActionID`.
    #[must_use]
    pub fn with_list_id_header(mut self, header: impl Into<String>) -> Self {
        self.list_id_header = header.into();
        self
    }

    /// Returns `true` when `event` is one of this family's member names.
    #[must_use]
    pub fn is_member(&self, event: &str) -> bool {
        self.members
            .iter()
            .any(|member| member.eq_ignore_ascii_case(event))
    }

    /// Returns `true` when `event` closes this family.
    #[must_use]
    pub fn is_completion(&self, event: &str) -> bool {
        self.completion.eq_ignore_ascii_case(event)
    }
}

/// List replies produced by a stock switch.
#[must_use]
pub fn standard_families() -> Vec<AggregateFamily> {
    let listed = |name: &str| {
        AggregateFamily::new(name, [name.to_owned()], format!("{name}Complete"))
            .with_count_header("ListItems")
    };
    vec![
        AggregateFamily::new(
            "CoreShowChannels",
            ["CoreShowChannel"],
            "CoreShowChannelsComplete",
        )
        .with_count_header("ListItems"),
        AggregateFamily::new("ParkedCalls", ["ParkedCall"], "ParkedCallsComplete"),
        AggregateFamily::new(
            "QueueStatus",
            ["QueueParams", "QueueMember", "QueueEntry"],
            "QueueStatusComplete",
        ),
        AggregateFamily::new("SIPpeers", ["PeerEntry"], "PeerlistComplete")
            .with_count_header("ListItems"),
        AggregateFamily::new(
            "SIPshowregistry",
            ["RegistryEntry"],
            "RegistrationsComplete",
        ),
        AggregateFamily::new("Status", ["Status"], "StatusComplete").with_count_header("Items"),
        AggregateFamily::new(
            "VoicemailUsersList",
            ["VoicemailUserEntry"],
            "VoicemailUserEntryComplete",
        ),
        AggregateFamily::new(
            "DAHDIShowChannels",
            ["DAHDIShowChannels"],
            "DAHDIShowChannelsComplete",
        )
        .with_count_header("Items"),
        listed("MeetmeList"),
        listed("MeetmeListRooms"),
        listed("ConfbridgeList"),
        listed("ConfbridgeListRooms"),
    ]
}

//! Folds list replies into single [`Aggregate`] deliveries.
//!
//! List actions answer with a start response, any number of member events and
//! one completion event, all sharing a list id. The assembler buffers the
//! members per (family, list id) and emits one aggregate when the completion
//! arrives. Families are declared in configuration, so nothing here knows
//! about particular actions.

use std::collections::HashMap;

use pbxlink_config::AggregateFamily;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::Event;
use crate::message::Message;

const AGGREGATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::aggregate");

/// Errors raised when opening an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// An assembly for the same family and list id is already in progress.
    #[error("aggregate '{family}' for list '{list_id}' is already being assembled")]
    Overlap {
        /// Family name.
        family: String,
        /// List id.
        list_id: String,
    },
    /// No configured family has this name.
    #[error("unknown aggregate family '{family}'")]
    UnknownFamily {
        /// Requested family name.
        family: String,
    },
}

/// A sealed list reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    family: String,
    list_id: String,
    members: Vec<Event>,
    completion: Message,
    announced: Option<usize>,
}

impl Aggregate {
    /// Family name.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// List id shared by the members.
    #[must_use]
    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    /// Member events in arrival order.
    #[must_use]
    pub fn members(&self) -> &[Event] {
        &self.members
    }

    /// The completion event carrying the summary fields.
    #[must_use]
    pub const fn completion(&self) -> &Message {
        &self.completion
    }

    /// Item count announced by the completion event, when the family names
    /// a count header and the value parsed.
    #[must_use]
    pub const fn announced_count(&self) -> Option<usize> {
        self.announced
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` when no member arrived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns `false` when the announced count disagrees with the members
    /// received.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.announced
            .is_none_or(|announced| announced == self.members.len())
    }
}

/// What the assembler did with an event.
#[derive(Debug)]
pub(crate) enum Assembly {
    /// Buffered as a list member.
    Member(Event),
    /// Completion sealed a list.
    Sealed(Aggregate),
    /// Not part of any family.
    Passthrough(Event),
}

type BufferKey = (String, String);

/// Open list buffers, keyed by family name and list id.
pub(crate) struct Assembler {
    families: Vec<AggregateFamily>,
    open: HashMap<BufferKey, Vec<Event>>,
}

impl Assembler {
    pub(crate) fn new(families: Vec<AggregateFamily>) -> Self {
        Self {
            families,
            open: HashMap::new(),
        }
    }

    fn family(&self, name: &str) -> Option<&AggregateFamily> {
        self.families
            .iter()
            .find(|family| family.name.eq_ignore_ascii_case(name))
    }

    /// Opens an empty buffer ahead of a list action.
    pub(crate) fn begin(&mut self, family: &str, list_id: &str) -> Result<(), AssemblyError> {
        let name = self
            .family(family)
            .map(|found| found.name.clone())
            .ok_or_else(|| AssemblyError::UnknownFamily {
                family: family.to_owned(),
            })?;
        let key = (name, list_id.to_owned());
        if self.open.contains_key(&key) {
            return Err(AssemblyError::Overlap {
                family: key.0,
                list_id: key.1,
            });
        }
        debug!(
            target: AGGREGATE_TARGET,
            family = key.0.as_str(),
            list_id,
            "opened aggregate"
        );
        self.open.insert(key, Vec::new());
        Ok(())
    }

    /// Drops a buffer whose completion will not arrive.
    pub(crate) fn abandon(&mut self, family: &str, list_id: &str) {
        if let Some(name) = self.family(family).map(|found| found.name.clone()) {
            self.open.remove(&(name, list_id.to_owned()));
        }
    }

    /// Routes one event through the family table.
    pub(crate) fn accept(&mut self, event: Event) -> Assembly {
        let name = event.name();
        if let Some(family) = self.families.iter().find(|family| family.is_member(name)) {
            let key = (
                family.name.clone(),
                event.get(&family.list_id_header).unwrap_or_default().to_owned(),
            );
            // Unsolicited members, such as a lone ParkedCall, are ordinary events.
            return match self.open.get_mut(&key) {
                Some(buffer) => {
                    buffer.push(event.clone());
                    Assembly::Member(event)
                }
                None => Assembly::Passthrough(event),
            };
        }
        if let Some(family) = self
            .families
            .iter()
            .find(|family| family.is_completion(name))
        {
            let list_id = event
                .get(&family.list_id_header)
                .unwrap_or_default()
                .to_owned();
            let members = self
                .open
                .remove(&(family.name.clone(), list_id.clone()))
                .unwrap_or_default();
            let announced = family
                .count_header
                .as_deref()
                .and_then(|header| event.get(header))
                .and_then(|value| value.trim().parse().ok());
            let aggregate = Aggregate {
                family: family.name.clone(),
                list_id,
                members,
                completion: event.message().clone(),
                announced,
            };
            if aggregate.is_consistent() {
                debug!(
                    target: AGGREGATE_TARGET,
                    family = aggregate.family.as_str(),
                    list_id = aggregate.list_id.as_str(),
                    members = aggregate.len(),
                    "sealed aggregate"
                );
            } else {
                warn!(
                    target: AGGREGATE_TARGET,
                    family = aggregate.family.as_str(),
                    list_id = aggregate.list_id.as_str(),
                    members = aggregate.len(),
                    announced = aggregate.announced,
                    "aggregate member count disagrees with announced count"
                );
            }
            return Assembly::Sealed(aggregate);
        }
        Assembly::Passthrough(event)
    }

    /// Discards every open buffer.
    pub(crate) fn reset(&mut self) {
        self.open.clear();
    }

    #[cfg(test)]
    pub(crate) fn open_count(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use pbxlink_config::standard_families;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::event::EventKind;
    use crate::message::Headers;

    #[fixture]
    fn assembler() -> Assembler {
        Assembler::new(standard_families())
    }

    fn event(pairs: &[(&str, &str)]) -> Event {
        let headers: Headers = pairs.iter().copied().collect();
        Event::new(Message::new(headers, Vec::new()), EventKind::Generic)
    }

    fn sealed(assembly: Assembly) -> Aggregate {
        match assembly {
            Assembly::Sealed(aggregate) => aggregate,
            other => panic!("expected sealed aggregate, got {other:?}"),
        }
    }

    #[rstest]
    fn members_are_sealed_in_arrival_order(mut assembler: Assembler) {
        assembler
            .begin("CoreShowChannels", "list-1")
            .expect("aggregate opens");
        for channel in ["SIP/1", "SIP/2", "SIP/3"] {
            let outcome = assembler.accept(event(&[
                ("Event", "CoreShowChannel"),
                ("ActionID", "list-1"),
                ("Channel", channel),
            ]));
            assert!(matches!(outcome, Assembly::Member(_)));
        }
        let aggregate = sealed(assembler.accept(event(&[
            ("Event", "CoreShowChannelsComplete"),
            ("ActionID", "list-1"),
            ("ListItems", "3"),
        ])));
        let channels: Vec<_> = aggregate
            .members()
            .iter()
            .filter_map(|member| member.get("Channel"))
            .collect();
        assert_eq!(channels, ["SIP/1", "SIP/2", "SIP/3"]);
        assert_eq!(aggregate.announced_count(), Some(3));
        assert!(aggregate.is_consistent());
        assert_eq!(assembler.open_count(), 0);
    }

    #[rstest]
    fn completion_without_buffer_yields_empty_aggregate(mut assembler: Assembler) {
        let aggregate = sealed(assembler.accept(event(&[
            ("Event", "CoreShowChannelsComplete"),
            ("ActionID", "42"),
            ("ListItems", "0"),
        ])));
        assert!(aggregate.is_empty());
        assert_eq!(aggregate.list_id(), "42");
        assert!(aggregate.is_consistent());
    }

    #[rstest]
    fn overlapping_assembly_is_rejected(mut assembler: Assembler) {
        assembler.begin("Status", "7").expect("aggregate opens");
        assembler.accept(event(&[("Event", "Status"), ("ActionID", "7")]));
        let error = assembler.begin("status", "7").expect_err("overlap rejected");
        assert_eq!(
            error,
            AssemblyError::Overlap {
                family: String::from("Status"),
                list_id: String::from("7"),
            }
        );
        let aggregate = sealed(assembler.accept(event(&[
            ("Event", "StatusComplete"),
            ("ActionID", "7"),
            ("Items", "1"),
        ])));
        assert_eq!(aggregate.len(), 1);
    }

    #[rstest]
    fn mismatched_count_is_flagged(mut assembler: Assembler) {
        assembler.begin("SIPpeers", "p").expect("aggregate opens");
        assembler.accept(event(&[("Event", "PeerEntry"), ("ActionID", "p")]));
        let aggregate = sealed(assembler.accept(event(&[
            ("Event", "PeerlistComplete"),
            ("ActionID", "p"),
            ("ListItems", "2"),
        ])));
        assert!(!aggregate.is_consistent());
    }

    #[rstest]
    fn unknown_family_cannot_be_opened(mut assembler: Assembler) {
        let error = assembler
            .begin("AgentList", "1")
            .expect_err("unknown family");
        assert!(matches!(error, AssemblyError::UnknownFamily { .. }));
    }

    #[rstest]
    fn unrelated_events_pass_through(mut assembler: Assembler) {
        let outcome = assembler.accept(event(&[("Event", "Hangup")]));
        assert!(matches!(outcome, Assembly::Passthrough(_)));
    }

    #[rstest]
    fn members_without_an_opened_list_pass_through(mut assembler: Assembler) {
        for slot in ["701", "702", "703"] {
            let outcome = assembler.accept(event(&[("Event", "ParkedCall"), ("Exten", slot)]));
            assert!(matches!(outcome, Assembly::Passthrough(_)));
        }
        let outcome = assembler.accept(event(&[
            ("Event", "CoreShowChannel"),
            ("ActionID", "elsewhere"),
        ]));
        assert!(matches!(outcome, Assembly::Passthrough(_)));
        assert_eq!(assembler.open_count(), 0);
    }

    #[rstest]
    fn abandoned_list_stops_buffering(mut assembler: Assembler) {
        assembler
            .begin("ParkedCalls", "park-1")
            .expect("aggregate opens");
        assembler.abandon("parkedcalls", "park-1");
        let outcome = assembler.accept(event(&[("Event", "ParkedCall"), ("ActionID", "park-1")]));
        assert!(matches!(outcome, Assembly::Passthrough(_)));
        assert_eq!(assembler.open_count(), 0);
    }

    #[rstest]
    fn reset_discards_open_buffers(mut assembler: Assembler) {
        assembler.begin("ParkedCalls", "1").expect("aggregate opens");
        assembler.reset();
        assert_eq!(assembler.open_count(), 0);
    }
}

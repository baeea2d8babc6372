//! The immutable event record.
//!
//! Every phase of a tick may produce events; the simulator deduplicates
//! them by id at the end of the month and appends them to the durable
//! event log in one batch. Events are never mutated after creation.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{AvatarId, EventId};
use crate::time::MonthStamp;

/// An immutable record of something that happened in the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Stable unique id, assigned at creation.
    pub id: EventId,
    /// The month the event happened in.
    pub stamp: MonthStamp,
    /// Narrative text shown in the UI and fed back into prompts.
    pub content: String,
    /// Avatars involved, in narrative order. Two or more participants
    /// make the event count as an interaction for relation evolution.
    pub participants: Vec<AvatarId>,
    /// Major events persist as long-term memory in LLM context.
    pub is_major: bool,
    /// Story events carry free-form LLM narrative and are not
    /// authoritative for state.
    pub is_story: bool,
}

impl Event {
    /// Create a plain event.
    pub fn new(stamp: MonthStamp, content: impl Into<String>, participants: Vec<AvatarId>) -> Self {
        Self {
            id: EventId::new(),
            stamp,
            content: content.into(),
            participants,
            is_major: false,
            is_story: false,
        }
    }

    /// Create a major event (kept in long-term memory).
    pub fn major(stamp: MonthStamp, content: impl Into<String>, participants: Vec<AvatarId>) -> Self {
        Self {
            is_major: true,
            ..Self::new(stamp, content, participants)
        }
    }

    /// Create a story event (LLM narrative, non-authoritative).
    pub fn story(stamp: MonthStamp, content: impl Into<String>, participants: Vec<AvatarId>) -> Self {
        Self {
            is_story: true,
            ..Self::new(stamp, content, participants)
        }
    }

    /// Whether the event involves at least two distinct avatars.
    pub fn is_interaction(&self) -> bool {
        let mut seen: Vec<AvatarId> = Vec::with_capacity(self.participants.len());
        for id in &self.participants {
            if !seen.contains(id) {
                seen.push(*id);
            }
        }
        seen.len() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_flags() {
        let stamp = MonthStamp(42);
        let plain = Event::new(stamp, "a quiet month", vec![]);
        assert!(!plain.is_major && !plain.is_story);

        let major = Event::major(stamp, "a breakthrough", vec![AvatarId::new()]);
        assert!(major.is_major && !major.is_story);

        let story = Event::story(stamp, "the wind carried rumors", vec![]);
        assert!(story.is_story && !story.is_major);
    }

    #[test]
    fn ids_are_unique_per_event() {
        let stamp = MonthStamp(1);
        let a = Event::new(stamp, "x", vec![]);
        let b = Event::new(stamp, "x", vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn interaction_requires_two_distinct_participants() {
        let stamp = MonthStamp(1);
        let a = AvatarId::new();
        let b = AvatarId::new();
        assert!(!Event::new(stamp, "solo", vec![a]).is_interaction());
        assert!(!Event::new(stamp, "dup", vec![a, a]).is_interaction());
        assert!(Event::new(stamp, "pair", vec![a, b]).is_interaction());
    }
}

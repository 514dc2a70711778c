use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::ws::protocol::{PollDefinition, VoteTally};
use crate::ws::ConnectionId;

/// Upper bound on options per poll.
pub const MAX_OPTIONS: usize = 32;

/// Why a poll operation was not applied. All of these are dropped silently
/// towards clients; they only show up in logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("no active poll")]
    NoActivePoll,
    #[error("poll {requested} is not the active poll {active}")]
    PollMismatch { requested: String, active: String },
    #[error("option {index} out of range for {options} options")]
    OptionOutOfRange { index: usize, options: usize },
    #[error("invalid poll definition: {0}")]
    InvalidDefinition(String),
}

/// The active poll of a hub.
#[derive(Debug, Clone, PartialEq)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_option_index: Option<usize>,
    pub vote_tally: VoteTally,
    pub total_votes: u64,
    /// Connections that picked the correct option while the poll was active.
    pub attendance: BTreeSet<ConnectionId>,
    pub created_by: ConnectionId,
    pub created_at: DateTime<Utc>,
}

/// Wire form of a poll, as carried by `poll-created`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: Option<usize>,
    pub results: VoteTally,
    pub total_votes: u64,
    pub attendance: Vec<ConnectionId>,
    pub created_by: ConnectionId,
    pub created_at: String,
}

impl Poll {
    pub fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            id: self.id.clone(),
            question: self.question.clone(),
            options: self.options.clone(),
            correct_answer: self.correct_option_index,
            results: self.vote_tally.clone(),
            total_votes: self.total_votes,
            attendance: self.attendance.iter().cloned().collect(),
            created_by: self.created_by.clone(),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Result of a counted vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub poll_id: String,
    pub option_index: usize,
    /// True when the vote matched the designated correct option.
    pub correct: bool,
    pub results: VoteTally,
    pub total_votes: u64,
}

/// `NoActivePoll` / `PollActive` state machine.
///
/// Not synchronized by itself; the hub keeps it behind a mutex so that
/// create, vote and end are linearized.
#[derive(Debug, Default)]
pub struct PollState {
    active: Option<Poll>,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Poll> {
        self.active.as_ref()
    }

    /// Start a poll from a client definition.
    ///
    /// An already active poll is replaced, not rejected; the replaced poll
    /// is returned so the caller can log it.
    pub fn create(
        &mut self,
        definition: PollDefinition,
        creator: &str,
    ) -> Result<(&Poll, Option<Poll>), PollError> {
        let question = definition.question.trim().to_string();
        if question.is_empty() {
            return Err(PollError::InvalidDefinition("empty question".to_string()));
        }
        if definition.options.is_empty() {
            return Err(PollError::InvalidDefinition("no options".to_string()));
        }
        if definition.options.len() > MAX_OPTIONS {
            return Err(PollError::InvalidDefinition(format!(
                "{} options exceeds the limit of {}",
                definition.options.len(),
                MAX_OPTIONS
            )));
        }
        if let Some(index) = definition.correct_answer {
            if index >= definition.options.len() {
                return Err(PollError::InvalidDefinition(format!(
                    "correct option {} out of range",
                    index
                )));
            }
        }

        let id = definition
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let replaced = self.active.replace(Poll {
            id,
            question,
            options: definition.options,
            correct_option_index: definition.correct_answer,
            vote_tally: VoteTally::new(),
            total_votes: 0,
            attendance: BTreeSet::new(),
            created_by: creator.to_string(),
            created_at: Utc::now(),
        });

        match self.active.as_ref() {
            Some(poll) => Ok((poll, replaced)),
            None => Err(PollError::NoActivePoll),
        }
    }

    /// Count a vote against the active poll.
    ///
    /// Repeat votes from the same voter are all counted.
    pub fn vote(
        &mut self,
        poll_id: &str,
        option_index: usize,
        voter: &str,
    ) -> Result<VoteReceipt, PollError> {
        let poll = self.active.as_mut().ok_or(PollError::NoActivePoll)?;
        if poll.id != poll_id {
            return Err(PollError::PollMismatch {
                requested: poll_id.to_string(),
                active: poll.id.clone(),
            });
        }
        if option_index >= poll.options.len() {
            return Err(PollError::OptionOutOfRange {
                index: option_index,
                options: poll.options.len(),
            });
        }

        *poll.vote_tally.entry(option_index).or_insert(0) += 1;
        poll.total_votes += 1;

        let correct = poll.correct_option_index == Some(option_index);
        if correct {
            poll.attendance.insert(voter.to_string());
        }

        Ok(VoteReceipt {
            poll_id: poll.id.clone(),
            option_index,
            correct,
            results: poll.vote_tally.clone(),
            total_votes: poll.total_votes,
        })
    }

    /// End the active poll and hand it back. When `poll_id` is given it must
    /// name the active poll.
    pub fn end(&mut self, poll_id: Option<&str>) -> Result<Poll, PollError> {
        let active = self.active.as_ref().ok_or(PollError::NoActivePoll)?;
        if let Some(requested) = poll_id {
            if requested != active.id {
                return Err(PollError::PollMismatch {
                    requested: requested.to_string(),
                    active: active.id.clone(),
                });
            }
        }
        self.active.take().ok_or(PollError::NoActivePoll)
    }
}

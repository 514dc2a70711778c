//! Poll envelopes and the active-poll REST endpoint.
//!
//! Each handler takes the hub's poll lock, applies the transition, and
//! enqueues the resulting envelope before releasing it. Enqueueing never
//! blocks, so the lock is held only for the state change and the recipient
//! snapshot; socket writes happen later in the writer tasks.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{SecondsFormat, Utc};

use crate::db::models::PollResultRecord;
use crate::hub::{is_valid_room_name, Hub};
use crate::poll::state::PollSnapshot;
use crate::signaling::router::broadcast_all;
use crate::state::AppState;
use crate::ws::protocol::{PollDefinition, ServerEvent};
use crate::ws::registry::default_display_name;

/// `poll-created`: start a poll, replacing any active one, and broadcast it.
pub fn handle_poll_created(hub: &Hub, creator: &str, definition: PollDefinition) {
    let mut polls = hub.poll_state();
    let (snapshot, replaced) = match polls.create(definition, creator) {
        Ok((poll, replaced)) => (poll.snapshot(), replaced),
        Err(e) => {
            tracing::warn!(room = %hub.room(), connection_id = %creator, error = %e, "Poll not created");
            return;
        }
    };

    if let Some(old) = replaced {
        tracing::info!(
            room = %hub.room(),
            replaced_poll = %old.id,
            votes_discarded = old.total_votes,
            "Active poll replaced"
        );
    }
    tracing::info!(
        room = %hub.room(),
        poll_id = %snapshot.id,
        options = snapshot.options.len(),
        "Poll created"
    );

    broadcast_all(hub, &ServerEvent::PollCreated { poll: snapshot });
}

/// `poll-vote`: count the vote. A correct answer marks attendance and is
/// announced as `attendance-marked` instead of the plain vote update.
pub fn handle_poll_vote(hub: &Hub, voter: &str, poll_id: &str, option_index: usize) {
    let mut polls = hub.poll_state();
    let receipt = match polls.vote(poll_id, option_index, voter) {
        Ok(receipt) => receipt,
        Err(e) => {
            tracing::debug!(room = %hub.room(), connection_id = %voter, error = %e, "Vote ignored");
            return;
        }
    };

    let event = if receipt.correct {
        let participant_name = hub
            .registry()
            .lookup(voter)
            .map(|conn| conn.display_name)
            .unwrap_or_else(|| default_display_name(voter));
        tracing::info!(
            room = %hub.room(),
            poll_id = %receipt.poll_id,
            connection_id = %voter,
            "Attendance marked"
        );
        ServerEvent::AttendanceMarked {
            poll_id: receipt.poll_id,
            participant_id: voter.to_string(),
            participant_name,
            option_index: receipt.option_index,
            correct: true,
            results: receipt.results,
            total_votes: receipt.total_votes,
        }
    } else {
        ServerEvent::PollVote {
            poll_id: receipt.poll_id,
            option_index: receipt.option_index,
            sender: voter.to_string(),
            results: receipt.results,
            total_votes: receipt.total_votes,
        }
    };

    broadcast_all(hub, &event);
}

/// `poll-ended`: broadcast the final tally, clear the poll, and mirror the
/// result to storage.
pub fn handle_poll_ended(hub: &Hub, requester: &str, poll_id: Option<&str>) {
    let ended = {
        let mut polls = hub.poll_state();
        let poll = match polls.end(poll_id) {
            Ok(poll) => poll,
            Err(e) => {
                tracing::debug!(room = %hub.room(), connection_id = %requester, error = %e, "Poll end ignored");
                return;
            }
        };

        broadcast_all(
            hub,
            &ServerEvent::PollEnded {
                poll_id: poll.id.clone(),
                final_results: poll.vote_tally.clone(),
                total_votes: poll.total_votes,
                attendance: poll.attendance.iter().cloned().collect(),
            },
        );
        poll
    };

    tracing::info!(
        room = %hub.room(),
        poll_id = %ended.id,
        total_votes = ended.total_votes,
        attendance = ended.attendance.len(),
        "Poll ended"
    );

    let record = PollResultRecord {
        room_id: hub.room().to_string(),
        poll_id: ended.id,
        question: ended.question,
        options: ended.options,
        correct_option: ended.correct_option_index,
        results: ended.vote_tally,
        total_votes: ended.total_votes,
        attendance: ended.attendance.into_iter().collect(),
        created_by: ended.created_by,
        ended_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    hub.mirror("poll-result", move |store| store.record_poll_result(&record));
}

/// GET /api/rooms/{room}/poll
/// The room's active poll, or 404 when none is running.
pub async fn get_active_poll(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<PollSnapshot>, StatusCode> {
    if !is_valid_room_name(&room) {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .rooms
        .get(&room)
        .and_then(|hub| hub.active_poll())
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

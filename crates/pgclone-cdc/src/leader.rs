//! The follow leader (spec.md §4.9): a single-threaded state machine that
//! decides, moment to moment, whether the receiver/transformer/apply trio
//! runs in prefetch+catchup (file-by-file, apply reading SQL files off
//! disk) or live replay (the three wired together with byte-pipes).
//!
//! States: `Init -> Prefetch -> Draining -> Replay -> Draining -> Prefetch
//! -> ... -> Finished`. Terminal once `replay_lsn >= endpos` and every
//! worker has drained.

use pgclone_common::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Init,
    Prefetch,
    Draining,
    Replay,
    Finished,
}

/// Back-pressure thresholds resolved as a documented Open Question
/// (spec.md §9, recorded in DESIGN.md): prefetch -> replay once the on-disk
/// segment backlog has fully drained (apply has caught up to every SQL file
/// written so far); replay -> prefetch once the apply-side pipe buffer has
/// been observed full for more than one heartbeat interval, meaning the
/// receiver is outpacing apply and disk-backed catchup will let apply work
/// through a backlog without holding the live pipe open.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureObservation {
    pub on_disk_segment_backlog: u32,
    pub pipe_buffer_full_for_heartbeats: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum LeaderEvent {
    SegmentClosed,
    PrefetchCaughtUp,
    SentinelRequestsApply,
    SentinelRequestsPrefetch,
    Backpressure(BackpressureObservation),
    EndposReached { replay_lsn: Lsn },
}

pub struct FollowLeader {
    state: LeaderState,
    endpos: Option<Lsn>,
}

impl FollowLeader {
    pub fn new(endpos: Option<Lsn>) -> Self {
        FollowLeader {
            state: LeaderState::Init,
            endpos,
        }
    }

    pub fn state(&self) -> LeaderState {
        self.state
    }

    /// Advances the state machine on one observed event, returning the new
    /// state. Scenario 6 (spec.md §8): `endpos` already at or behind the
    /// source's current WAL position transitions straight to `Finished`
    /// without ever entering `Replay`.
    pub fn on_event(&mut self, event: LeaderEvent) -> LeaderState {
        self.state = match (self.state, event) {
            (LeaderState::Init, LeaderEvent::PrefetchCaughtUp) => LeaderState::Prefetch,
            (LeaderState::Init, LeaderEvent::EndposReached { .. }) => LeaderState::Finished,

            (LeaderState::Prefetch, LeaderEvent::PrefetchCaughtUp) => LeaderState::Draining,
            (LeaderState::Prefetch, LeaderEvent::SentinelRequestsApply) => self.state,
            (LeaderState::Prefetch, LeaderEvent::EndposReached { replay_lsn }) => {
                self.finish_if_reached(replay_lsn)
            }

            (LeaderState::Draining, LeaderEvent::SegmentClosed) => LeaderState::Replay,
            (LeaderState::Draining, LeaderEvent::Backpressure(obs))
                if obs.on_disk_segment_backlog == 0 =>
            {
                LeaderState::Replay
            }

            (LeaderState::Replay, LeaderEvent::Backpressure(obs))
                if obs.pipe_buffer_full_for_heartbeats > 1 =>
            {
                LeaderState::Draining
            }
            (LeaderState::Replay, LeaderEvent::SentinelRequestsPrefetch) => LeaderState::Draining,
            (LeaderState::Replay, LeaderEvent::EndposReached { replay_lsn }) => {
                self.finish_if_reached(replay_lsn)
            }

            (state, _) => state,
        };
        self.state
    }

    fn finish_if_reached(&self, replay_lsn: Lsn) -> LeaderState {
        match self.endpos {
            Some(endpos) if replay_lsn >= endpos => LeaderState::Finished,
            _ => self.state,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == LeaderState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpos_at_or_before_start_finishes_without_entering_replay() {
        let mut leader = FollowLeader::new(Some(Lsn(100)));
        let state = leader.on_event(LeaderEvent::EndposReached { replay_lsn: Lsn(100) });
        assert_eq!(state, LeaderState::Finished);
    }

    #[test]
    fn oscillates_between_prefetch_and_replay_under_backpressure() {
        let mut leader = FollowLeader::new(None);
        leader.on_event(LeaderEvent::PrefetchCaughtUp); // -> Prefetch
        leader.on_event(LeaderEvent::PrefetchCaughtUp); // -> Draining
        assert_eq!(
            leader.on_event(LeaderEvent::SegmentClosed),
            LeaderState::Replay
        );
        let obs = BackpressureObservation {
            on_disk_segment_backlog: 0,
            pipe_buffer_full_for_heartbeats: 2,
        };
        assert_eq!(
            leader.on_event(LeaderEvent::Backpressure(obs)),
            LeaderState::Draining
        );
    }

    #[test]
    fn replay_finishes_once_endpos_reached() {
        let mut leader = FollowLeader::new(Some(Lsn(500)));
        leader.on_event(LeaderEvent::PrefetchCaughtUp);
        leader.on_event(LeaderEvent::PrefetchCaughtUp);
        leader.on_event(LeaderEvent::SegmentClosed);
        assert_eq!(leader.state(), LeaderState::Replay);
        let state = leader.on_event(LeaderEvent::EndposReached { replay_lsn: Lsn(500) });
        assert_eq!(state, LeaderState::Finished);
        assert!(leader.is_finished());
    }
}

use tracing::info;

/// Frame ids the server uses for the opening frame of a battle.
const OPENING_FRAME_IDS: [i32; 2] = [0, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BattleState {
    #[default]
    Waiting,
    InBattle,
    InSettlement,
    InDismissal,
}

impl BattleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BattleState::InSettlement | BattleState::InDismissal)
    }
}

/// A state change the caller must act on. `Started` carries the one-time
/// battle initialization; it is produced at most once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Settled,
    Dismissed,
}

#[derive(Debug, Default)]
pub struct BattleStateMachine {
    state: BattleState,
}

impl BattleStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BattleState {
        self.state
    }

    pub fn in_battle(&self) -> bool {
        self.state == BattleState::InBattle
    }

    pub fn on_frame(&mut self, frame_id: i32, countdown_nanos: i64) -> Option<Transition> {
        match self.state {
            BattleState::Waiting if OPENING_FRAME_IDS.contains(&frame_id) => {
                self.enter(BattleState::InBattle, frame_id);
                Some(Transition::Started)
            }
            BattleState::InBattle if countdown_nanos <= 0 => {
                self.enter(BattleState::InSettlement, frame_id);
                Some(Transition::Settled)
            }
            _ => None,
        }
    }

    /// The peer went away. Only a running battle is dismissed; a session that
    /// never started stays `Waiting`.
    pub fn on_disconnect(&mut self) -> Option<Transition> {
        if self.state != BattleState::InBattle {
            return None;
        }
        self.state = BattleState::InDismissal;
        info!(state = ?self.state, "battle dismissed");
        Some(Transition::Dismissed)
    }

    fn enter(&mut self, next: BattleState, frame_id: i32) {
        info!(from = ?self.state, to = ?next, frame_id, "battle state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING: i64 = 60_000_000_000;

    #[test]
    fn opening_frame_starts_battle_once() {
        let mut battle = BattleStateMachine::new();
        assert_eq!(battle.on_frame(7, RUNNING), None);
        assert_eq!(battle.state(), BattleState::Waiting);

        assert_eq!(battle.on_frame(1, RUNNING), Some(Transition::Started));
        assert!(battle.in_battle());
        // duplicate and replayed opening frames do not restart
        assert_eq!(battle.on_frame(1, RUNNING), None);
        assert_eq!(battle.on_frame(0, RUNNING), None);
        assert!(battle.in_battle());
    }

    #[test]
    fn countdown_expiry_settles_and_is_terminal() {
        let mut battle = BattleStateMachine::new();
        battle.on_frame(0, RUNNING);
        assert_eq!(battle.on_frame(900, 0), Some(Transition::Settled));
        assert_eq!(battle.state(), BattleState::InSettlement);
        assert!(battle.state().is_terminal());

        assert_eq!(battle.on_frame(1, RUNNING), None);
        assert_eq!(battle.on_disconnect(), None);
        assert_eq!(battle.state(), BattleState::InSettlement);
    }

    #[test]
    fn zero_countdown_before_start_does_not_settle() {
        let mut battle = BattleStateMachine::new();
        assert_eq!(battle.on_frame(5, 0), None);
        assert_eq!(battle.state(), BattleState::Waiting);
    }

    #[test]
    fn disconnect_mid_battle_dismisses() {
        let mut battle = BattleStateMachine::new();
        assert_eq!(battle.on_disconnect(), None);
        assert_eq!(battle.state(), BattleState::Waiting);

        battle.on_frame(1, RUNNING);
        assert_eq!(battle.on_disconnect(), Some(Transition::Dismissed));
        assert_eq!(battle.state(), BattleState::InDismissal);
        assert_eq!(battle.on_frame(0, RUNNING), None);
    }
}

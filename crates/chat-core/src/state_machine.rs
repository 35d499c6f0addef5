use crate::{
    error::ChatError,
    types::{RoomStatus, RoomStatusChange},
};

/// Room-level operations gated by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomOperation {
    Attach,
    Detach,
    Release,
}

impl RoomOperation {
    pub fn label(self) -> &'static str {
        match self {
            RoomOperation::Attach => "attach",
            RoomOperation::Detach => "detach",
            RoomOperation::Release => "release",
        }
    }
}

/// Outcome of asking the lifecycle to admit an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Start the operation; the status has already moved.
    Proceed(RoomStatusChange),
    /// The room is already where the operation would leave it.
    AlreadyDone,
    /// The same operation is in flight; wait for its result.
    JoinInFlight,
    /// Release requested while another operation is in flight. The status
    /// has moved to `Releasing`; run the release once that operation ends.
    DeferredRelease(RoomStatusChange),
}

#[derive(Debug, Clone)]
pub struct RoomLifecycle {
    status: RoomStatus,
}

impl Default for RoomLifecycle {
    fn default() -> Self {
        Self {
            status: RoomStatus::Initialized,
        }
    }
}

impl RoomLifecycle {
    pub fn status(&self) -> &RoomStatus {
        &self.status
    }

    pub fn admit(&mut self, operation: RoomOperation) -> Result<Admission, ChatError> {
        use RoomStatus::*;

        let action = operation.label();
        let current = self.status.clone();
        match (operation, &current) {
            (RoomOperation::Attach, Attached) => Ok(Admission::AlreadyDone),
            (RoomOperation::Attach, Attaching) => Ok(Admission::JoinInFlight),
            (RoomOperation::Attach, Initialized | Detached | Suspended(_)) => {
                Ok(Admission::Proceed(self.transition(Attaching)))
            }

            (RoomOperation::Detach, Initialized | Detached) => Ok(Admission::AlreadyDone),
            (RoomOperation::Detach, Detaching) => Ok(Admission::JoinInFlight),
            (RoomOperation::Detach, Attached | Suspended(_)) => {
                Ok(Admission::Proceed(self.transition(Detaching)))
            }

            (RoomOperation::Release, Released) => Ok(Admission::AlreadyDone),
            (RoomOperation::Release, Releasing) => Ok(Admission::JoinInFlight),
            (RoomOperation::Release, Attaching | Detaching) => {
                Ok(Admission::DeferredRelease(self.transition(Releasing)))
            }
            (RoomOperation::Release, _) => Ok(Admission::Proceed(self.transition(Releasing))),

            (_, Releasing) => Err(ChatError::release_in_use(action)),
            (_, current) => Err(ChatError::invalid_room_state(current, action)),
        }
    }

    /// Move to `next` and describe the change.
    pub fn transition(&mut self, next: RoomStatus) -> RoomStatusChange {
        let previous = std::mem::replace(&mut self.status, next.clone());
        RoomStatusChange {
            current: next,
            previous,
        }
    }

    /// Like `transition`, but skips no-op moves.
    pub fn transition_if_changed(&mut self, next: RoomStatus) -> Option<RoomStatusChange> {
        if self.status == next {
            return None;
        }
        Some(self.transition(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatErrorKind, codes};

    fn lifecycle_in(status: RoomStatus) -> RoomLifecycle {
        let mut lifecycle = RoomLifecycle::default();
        lifecycle.transition(status);
        lifecycle
    }

    fn suspended() -> RoomStatus {
        RoomStatus::Suspended(ChatError::transport(80002, 500, "suspended"))
    }

    fn failed() -> RoomStatus {
        RoomStatus::Failed(ChatError::transport(80003, 500, "failed"))
    }

    #[test]
    fn runs_happy_path_transitions() {
        let mut lifecycle = RoomLifecycle::default();
        assert_eq!(lifecycle.status(), &RoomStatus::Initialized);

        let admission = lifecycle.admit(RoomOperation::Attach).expect("attach admitted");
        assert_eq!(
            admission,
            Admission::Proceed(RoomStatusChange {
                current: RoomStatus::Attaching,
                previous: RoomStatus::Initialized,
            })
        );
        lifecycle.transition(RoomStatus::Attached);

        lifecycle.admit(RoomOperation::Detach).expect("detach admitted");
        assert_eq!(lifecycle.status(), &RoomStatus::Detaching);
        lifecycle.transition(RoomStatus::Detached);

        lifecycle.admit(RoomOperation::Release).expect("release admitted");
        assert_eq!(lifecycle.status(), &RoomStatus::Releasing);
        lifecycle.transition(RoomStatus::Released);

        assert_eq!(
            lifecycle.admit(RoomOperation::Release).expect("release is idempotent"),
            Admission::AlreadyDone
        );
    }

    #[test]
    fn attach_joins_in_flight_attach() {
        let mut lifecycle = lifecycle_in(RoomStatus::Attaching);
        assert_eq!(
            lifecycle.admit(RoomOperation::Attach).expect("join"),
            Admission::JoinInFlight
        );
        assert_eq!(lifecycle.status(), &RoomStatus::Attaching);
    }

    #[test]
    fn attach_allowed_from_suspended_but_not_failed() {
        let mut lifecycle = lifecycle_in(suspended());
        assert!(matches!(
            lifecycle.admit(RoomOperation::Attach),
            Ok(Admission::Proceed(_))
        ));

        let mut lifecycle = lifecycle_in(failed());
        let err = lifecycle.admit(RoomOperation::Attach).expect_err("failed room");
        assert_eq!(err.kind, ChatErrorKind::InvalidRoomState);
        assert_eq!(err.code, codes::ROOM_IN_FAILED_STATE);
    }

    #[test]
    fn detach_while_attaching_is_invalid() {
        let mut lifecycle = lifecycle_in(RoomStatus::Attaching);
        let err = lifecycle
            .admit(RoomOperation::Detach)
            .expect_err("detach must not supersede attach");
        assert_eq!(err.kind, ChatErrorKind::InvalidRoomState);
        assert_eq!(lifecycle.status(), &RoomStatus::Attaching);
    }

    #[test]
    fn attach_while_detaching_is_invalid() {
        let mut lifecycle = lifecycle_in(RoomStatus::Detaching);
        let err = lifecycle.admit(RoomOperation::Attach).expect_err("detaching");
        assert_eq!(err.kind, ChatErrorKind::InvalidRoomState);
    }

    #[test]
    fn operations_fail_while_releasing() {
        let mut lifecycle = lifecycle_in(RoomStatus::Releasing);
        for operation in [RoomOperation::Attach, RoomOperation::Detach] {
            let err = lifecycle.admit(operation).expect_err("releasing");
            assert_eq!(err.kind, ChatErrorKind::ReleaseInUse);
        }
        assert_eq!(
            lifecycle.admit(RoomOperation::Release).expect("join release"),
            Admission::JoinInFlight
        );
    }

    #[test]
    fn release_during_attach_is_deferred() {
        let mut lifecycle = lifecycle_in(RoomStatus::Attaching);
        let admission = lifecycle.admit(RoomOperation::Release).expect("release");
        assert!(matches!(admission, Admission::DeferredRelease(_)));
        assert_eq!(lifecycle.status(), &RoomStatus::Releasing);
    }

    #[test]
    fn released_room_rejects_attach_and_detach() {
        let mut lifecycle = lifecycle_in(RoomStatus::Released);
        for operation in [RoomOperation::Attach, RoomOperation::Detach] {
            let err = lifecycle.admit(operation).expect_err("released");
            assert_eq!(err.code, codes::ROOM_IS_RELEASED);
        }
    }

    #[test]
    fn detach_is_noop_when_not_attached() {
        for status in [RoomStatus::Initialized, RoomStatus::Detached] {
            let mut lifecycle = lifecycle_in(status);
            assert_eq!(
                lifecycle.admit(RoomOperation::Detach).expect("noop"),
                Admission::AlreadyDone
            );
        }
    }

    #[test]
    fn transition_if_changed_skips_same_status() {
        let mut lifecycle = lifecycle_in(RoomStatus::Attached);
        assert!(lifecycle.transition_if_changed(RoomStatus::Attached).is_none());
        assert!(lifecycle.transition_if_changed(suspended()).is_some());
    }
}

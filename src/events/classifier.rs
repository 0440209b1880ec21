use std::fmt;

use super::payload::SensorPayload;

pub const MOTION_MESSAGE: &str = "Motion detected";
pub const DOOR_MESSAGE: &str = "Door triggered!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Motion,
    DoorTriggered,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Motion => write!(f, "motion"),
            EventKind::DoorTriggered => write!(f, "door"),
        }
    }
}

/// Text notification derived from a single sensor payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub message: String,
}

impl NotificationEvent {
    pub fn motion() -> Self {
        Self {
            kind: EventKind::Motion,
            message: MOTION_MESSAGE.to_string(),
        }
    }

    pub fn door_triggered() -> Self {
        Self {
            kind: EventKind::DoorTriggered,
            message: DOOR_MESSAGE.to_string(),
        }
    }
}

/// Maps a payload to at most one event. Rules are checked in order and the first hit wins:
///
/// 1. `occupancy == true` -> motion
/// 2. `tamper == true` or `contact == false` -> door
///
/// Motion takes precedence, so a payload carrying both occupancy and a door
/// condition only produces the motion alert.
pub fn classify(payload: &SensorPayload) -> Option<NotificationEvent> {
    if payload.is_true("occupancy") {
        return Some(NotificationEvent::motion());
    }

    if payload.is_true("tamper") || payload.is_false("contact") {
        return Some(NotificationEvent::door_triggered());
    }

    None
}

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::gateway::GatewayError;
use crate::model::{ShiftStatus, Span};

#[derive(Debug)]
pub enum EngineError {
    /// End not strictly after start.
    InvalidRange(Span),
    /// True double-booking. Never overridable.
    HardOverlap {
        span: Span,
        conflicting: Vec<Ulid>,
    },
    NotFound(Ulid),
    ShiftFinalized(Ulid, ShiftStatus),
    /// Wall-clock input falls in a DST gap.
    UnresolvableLocalTime(NaiveDate, NaiveTime),
    LimitExceeded(&'static str),
    /// The store rejected a write after validation passed; any optimistic
    /// change has already been rolled back.
    RemoteWrite(GatewayError),
    RemoteTimeout,
    Fetch(GatewayError),
    /// No window has been loaded yet.
    NoWindow,
    /// The placement's day is not in the loaded window.
    OutsideWindow(NaiveDate),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange(_) => write!(f, "end time must be after start time"),
            EngineError::HardOverlap { conflicting, .. } => write!(
                f,
                "shift overlaps {} existing shift(s) for the same person on that day",
                conflicting.len()
            ),
            EngineError::NotFound(id) => write!(f, "shift not found: {id}"),
            EngineError::ShiftFinalized(id, status) => {
                write!(f, "shift {id} is {status} and can no longer be changed")
            }
            EngineError::UnresolvableLocalTime(date, time) => {
                write!(f, "{date} {time} does not exist in the schedule's time zone")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::RemoteWrite(e) => write!(f, "could not save shift: {e}"),
            EngineError::RemoteTimeout => write!(f, "could not save shift: the server did not respond in time"),
            EngineError::Fetch(e) => write!(f, "could not load schedule: {e}"),
            EngineError::NoWindow => write!(f, "no schedule window loaded"),
            EngineError::OutsideWindow(day) => {
                write!(f, "{day} is outside the week currently loaded")
            }
        }
    }
}

impl std::error::Error for EngineError {}

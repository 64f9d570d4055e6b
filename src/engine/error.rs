use crate::model::BookingId;
use crate::store::StoreError;

/// Coarse class of a failure. Callers branch on this, not on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Store => "store",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    InvalidRequest(&'static str),
    StartNotBeforeEnd,
    StartInPast,
    DurationExceeded,
    TimestampOutOfRange,
    CancellationWindow,
    InvalidRange(&'static str),
    RoomNotFound(String),
    BookingNotFound(BookingId),
    /// `window` is the existing booking's interval, already formatted for display.
    Overlap {
        existing: BookingId,
        room_id: String,
        window: String,
    },
    AlreadyCancelled(BookingId),
    Store(StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidRequest(_)
            | EngineError::StartNotBeforeEnd
            | EngineError::StartInPast
            | EngineError::DurationExceeded
            | EngineError::TimestampOutOfRange
            | EngineError::CancellationWindow
            | EngineError::InvalidRange(_) => ErrorKind::Validation,
            EngineError::RoomNotFound(_) | EngineError::BookingNotFound(_) => ErrorKind::NotFound,
            EngineError::Overlap { .. } | EngineError::AlreadyCancelled(_) => ErrorKind::Conflict,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_retryable())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::StartNotBeforeEnd => {
                write!(f, "invalid request: start time must be before end time")
            }
            EngineError::StartInPast => write!(f, "invalid request: start time is in the past"),
            EngineError::DurationExceeded => {
                write!(f, "invalid request: booking cannot exceed 12 hours")
            }
            EngineError::TimestampOutOfRange => write!(f, "invalid request: timestamp out of range"),
            EngineError::CancellationWindow => write!(
                f,
                "invalid request: cannot cancel booking, less than 2 hours remaining before start time"
            ),
            EngineError::InvalidRange(msg) => write!(f, "invalid request: {msg}"),
            EngineError::RoomNotFound(id) => write!(f, "not found: room {id}"),
            EngineError::BookingNotFound(id) => write!(f, "not found: booking {id}"),
            EngineError::Overlap {
                existing,
                room_id,
                window,
            } => write!(
                f,
                "conflict: room {room_id} already booked from {window} (booking {existing})"
            ),
            EngineError::AlreadyCancelled(id) => {
                write!(f, "conflict: booking {id} is already cancelled")
            }
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

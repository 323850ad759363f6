//! Typed REST client and wire types for the campus attendance backend.

pub mod backend;
pub mod types;

pub use backend::{BackendClient, ClientError, DEFAULT_TIMEOUT};
pub use types::{
    ActiveClass, AttendanceAction, AttendanceRecord, AttendanceStateDto, ClassRoster, DeviceInfo,
    LogAck, RosterMember, ScheduleEntry, VerifiedBy, WeeklySchedule,
};

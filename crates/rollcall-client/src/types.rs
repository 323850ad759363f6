//! Wire types shared with the campus backend.
//!
//! Field names follow the backend's JSON contract exactly; everything
//! here round-trips through `serde_json`.

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Default grace period when the backend omits one.
pub const DEFAULT_LATE_THRESHOLD_MINUTES: u32 = 15;

fn default_late_threshold() -> u32 {
    DEFAULT_LATE_THRESHOLD_MINUTES
}

/// The class currently scheduled in this device's room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveClass {
    pub class_id: u64,
    pub subject_code: String,
    pub subject_title: String,
    pub faculty_name: String,
    pub section: String,
    /// "HH:MM" wall-clock times.
    pub start_time: String,
    pub end_time: String,
    pub room: String,
    #[serde(default = "default_late_threshold")]
    pub late_threshold_minutes: u32,
}

/// One weekly schedule slot, cached for offline resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub class_id: u64,
    pub subject_code: String,
    pub subject_title: String,
    pub faculty_name: String,
    pub section: String,
    /// Weekday name as the backend spells it ("Monday" .. "Sunday").
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub room: String,
    #[serde(default = "default_late_threshold")]
    pub late_threshold_minutes: u32,
}

/// Full weekly schedule for a device's room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub entries: Vec<ScheduleEntry>,
}

/// One person on a class roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterMember {
    pub user_id: u64,
    pub name: String,
}

/// Enrolled students plus the instructor for one class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRoster {
    #[serde(default)]
    pub faculty: Option<RosterMember>,
    #[serde(default)]
    pub students: Vec<RosterMember>,
}

/// Server-truth attendance state for one (user, class) today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceStateDto {
    pub has_entered: bool,
    pub is_on_break: bool,
    pub has_exited: bool,
    #[serde(default)]
    pub last_action: Option<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
}

/// Registered device metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// The four attendance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceAction {
    Entry,
    BreakOut,
    BreakIn,
    Exit,
}

impl AttendanceAction {
    pub fn label(&self) -> &'static str {
        match self {
            AttendanceAction::Entry => "ENTRY",
            AttendanceAction::BreakOut => "BREAK_OUT",
            AttendanceAction::BreakIn => "BREAK_IN",
            AttendanceAction::Exit => "EXIT",
        }
    }
}

/// How the person was verified for this record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifiedBy {
    #[serde(rename = "FACE")]
    Face,
    #[serde(rename = "FACE+GESTURE")]
    FaceGesture,
}

/// One attendance event, as POSTed to the backend and as queued
/// offline. The queue file holds these verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: u64,
    pub class_id: u64,
    pub device_id: String,
    pub action: AttendanceAction,
    pub verified_by: VerifiedBy,
    pub confidence_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture_detected: Option<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl AttendanceRecord {
    /// Local wall-clock timestamp in the backend's expected format.
    pub fn now_timestamp() -> String {
        Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

/// Backend acknowledgement for a logged record.
#[derive(Debug, Clone, Deserialize)]
pub struct LogAck {
    pub success: bool,
    #[serde(default)]
    pub log_id: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(
            serde_json::to_string(&AttendanceAction::BreakOut).unwrap(),
            "\"BREAK_OUT\""
        );
        assert_eq!(
            serde_json::to_string(&AttendanceAction::Entry).unwrap(),
            "\"ENTRY\""
        );
    }

    #[test]
    fn test_verified_by_wire_names() {
        assert_eq!(serde_json::to_string(&VerifiedBy::Face).unwrap(), "\"FACE\"");
        assert_eq!(
            serde_json::to_string(&VerifiedBy::FaceGesture).unwrap(),
            "\"FACE+GESTURE\""
        );
    }

    #[test]
    fn test_record_roundtrip() {
        let record = AttendanceRecord {
            user_id: 42,
            class_id: 7,
            device_id: "KIOSK-101".to_string(),
            action: AttendanceAction::Exit,
            verified_by: VerifiedBy::FaceGesture,
            confidence_score: 0.87,
            gesture_detected: Some("OPEN_PALM".to_string()),
            timestamp: "2026-01-05T10:30:00".to_string(),
            remarks: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"action\":\"EXIT\""));
        assert!(json.contains("\"verified_by\":\"FACE+GESTURE\""));
        assert!(!json.contains("remarks"));

        let back: AttendanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, AttendanceAction::Exit);
        assert_eq!(back.user_id, 42);
    }

    #[test]
    fn test_active_class_late_threshold_default() {
        let json = r#"{
            "class_id": 1, "subject_code": "CS101", "subject_title": "Intro",
            "faculty_name": "Dr. Reyes", "section": "A",
            "start_time": "08:00", "end_time": "09:30", "room": "R-204"
        }"#;
        let ac: ActiveClass = serde_json::from_str(json).unwrap();
        assert_eq!(ac.late_threshold_minutes, DEFAULT_LATE_THRESHOLD_MINUTES);
    }

    #[test]
    fn test_optional_active_class_parses_null() {
        let ac: Option<ActiveClass> = serde_json::from_str("null").unwrap();
        assert!(ac.is_none());
    }
}

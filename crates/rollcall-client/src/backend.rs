//! Blocking HTTP client for the campus attendance backend.
//!
//! Every call carries a bounded timeout so the kiosk loop can never
//! hang on network I/O; callers decide the fallback (cache, offline
//! queue, or "no active class").

use crate::types::{
    ActiveClass, AttendanceRecord, AttendanceStateDto, ClassRoster, DeviceInfo, LogAck,
    WeeklySchedule,
};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Request timeout applied to every call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Typed REST client bound to one backend base URL.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn with_default_timeout(base_url: &str) -> Result<Self, ClientError> {
        Self::new(base_url, DEFAULT_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.http.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        response
            .json::<T>()
            .map_err(|e| ClientError::Decode(format!("{path}: {e}")))
    }

    /// Class currently scheduled in this device's room. `Ok(None)` is a
    /// definitive "no class right now" from the backend; an `Err` means
    /// the backend was unreachable and the caller should consult the
    /// local schedule cache.
    pub fn active_class(&self, device_id: &str) -> Result<Option<ActiveClass>, ClientError> {
        self.get_json(&format!("/api/kiosk/active-class?device_id={device_id}"))
    }

    /// Full weekly schedule for the device's room.
    pub fn weekly_schedule(&self, device_id: &str) -> Result<WeeklySchedule, ClientError> {
        self.get_json(&format!("/api/kiosk/schedule?device_id={device_id}"))
    }

    /// Enrolled students and instructor for a class.
    pub fn class_roster(&self, class_id: u64) -> Result<ClassRoster, ClientError> {
        self.get_json(&format!("/api/kiosk/class/{class_id}/enrolled"))
    }

    /// Server-truth attendance state for one (user, class) today.
    pub fn attendance_state(
        &self,
        user_id: u64,
        class_id: u64,
    ) -> Result<AttendanceStateDto, ClientError> {
        self.get_json(&format!(
            "/api/kiosk/attendance-state?user_id={user_id}&class_id={class_id}"
        ))
    }

    /// Submit one attendance record. A non-2xx status or `success:
    /// false` ack is an error so the caller queues the record.
    pub fn log_attendance(&self, record: &AttendanceRecord) -> Result<LogAck, ClientError> {
        let url = format!("{}/api/kiosk/attendance/log", self.base_url);
        let response = self.http.post(&url).json(record).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        let ack: LogAck = response
            .json()
            .map_err(|e| ClientError::Decode(format!("attendance/log: {e}")))?;
        if !ack.success {
            return Err(ClientError::Status {
                status,
                body: ack.message.clone().unwrap_or_else(|| "rejected".to_string()),
            });
        }
        tracing::debug!(log_id = ?ack.log_id, "attendance record acknowledged");
        Ok(ack)
    }

    /// Registered metadata for this device.
    pub fn device_info(&self, device_id: &str) -> Result<DeviceInfo, ClientError> {
        self.get_json(&format!("/api/kiosk/device/{device_id}"))
    }

    /// Liveness ping. Response body is ignored.
    pub fn heartbeat(&self, device_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/kiosk/device/{device_id}/heartbeat", self.base_url);
        let response = self.http.post(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = BackendClient::with_default_timeout("http://backend.local/").unwrap();
        assert_eq!(client.base_url(), "http://backend.local");
    }

    #[test]
    fn test_unreachable_backend_is_transport_error() {
        // Reserved TEST-NET address, nothing listens there; the bounded
        // timeout turns this into an error instead of a hang.
        let client =
            BackendClient::new("http://192.0.2.1:9", Duration::from_millis(200)).unwrap();
        assert!(client.active_class("KIOSK-1").is_err());
    }
}

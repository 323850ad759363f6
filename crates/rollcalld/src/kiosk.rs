//! The kiosk orchestrator: a single-threaded loop that owns every
//! perception primitive, the caches, and the offline queue, processing
//! one frame fully before reading the next.

use chrono::Local;
use rollcall_client::{
    ActiveClass, AttendanceAction, AttendanceRecord, BackendClient, VerifiedBy,
};
use rollcall_core::{EmbeddingGallery, FaceGate, FaceRecognizer, Gesture, GestureSmoother, HandLandmarker};
use rollcall_hw::{FrameSource, RgbFrame};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::KioskConfig;
use crate::logger::AttendanceLogger;
use crate::schedule::ScheduleResolver;
use crate::state::{self, StateTracker};

/// How often the active class is re-resolved.
const CLASS_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Loop sleep when no class is active.
const IDLE_SLEEP: Duration = Duration::from_millis(500);
/// Backoff after a camera read error or failed roster fetch.
const RETRY_SLEEP: Duration = Duration::from_secs(1);
/// Remark marker for unauthorized-person audit records.
const NOT_IN_CLASS_MARKER: &str = "[NOT_IN_CLASS]";

/// What the person at the kiosk sees. Deliberately non-technical;
/// diagnostics go to logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Idle,
    Unknown,
    Greeting { name: String, action: AttendanceAction },
    NotInClass { name: String },
    PromptGesture { name: String, on_break: bool },
    TryAgain,
    Wait { name: String },
}

pub trait FeedbackSink {
    fn show(&mut self, feedback: &Feedback);
}

/// Prints prompts to stdout; a display panel would implement the same
/// trait.
pub struct ConsoleFeedback;

impl FeedbackSink for ConsoleFeedback {
    fn show(&mut self, feedback: &Feedback) {
        match feedback {
            Feedback::Idle => println!("No active class"),
            Feedback::Unknown => println!("Unknown person"),
            Feedback::Greeting { name, action } => {
                println!("{name}: {} recorded", action.label())
            }
            Feedback::NotInClass { name } => println!("{name}: not in this class"),
            Feedback::PromptGesture { name, on_break } => {
                if *on_break {
                    println!("{name}: show THUMBS UP to end your break");
                } else {
                    println!("{name}: show PEACE for break, OPEN PALM to exit");
                }
            }
            Feedback::TryAgain => println!("Try again"),
            Feedback::Wait { name } => println!("{name}: already recorded"),
        }
    }
}

/// Per-person suppression window after any processed cycle.
pub struct CooldownTracker {
    duration: Duration,
    last_seen: HashMap<u64, Instant>,
}

impl CooldownTracker {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            last_seen: HashMap::new(),
        }
    }

    pub fn ready(&self, user_id: u64, now: Instant) -> bool {
        match self.last_seen.get(&user_id) {
            Some(&t) => now.duration_since(t) >= self.duration,
            None => true,
        }
    }

    pub fn touch(&mut self, user_id: u64, now: Instant) {
        self.last_seen.insert(user_id, now);
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}

/// Roster membership for the current class session, plus the
/// once-per-session dedup set for unauthorized sightings.
pub struct RosterSession {
    pub class_id: u64,
    students: HashSet<u64>,
    faculty_id: Option<u64>,
    not_in_class_logged: HashSet<u64>,
}

impl RosterSession {
    pub fn new(class_id: u64, students: HashSet<u64>, faculty_id: Option<u64>) -> Self {
        Self {
            class_id,
            students,
            faculty_id,
            not_in_class_logged: HashSet::new(),
        }
    }

    pub fn authorizes(&self, user_id: u64) -> bool {
        self.students.contains(&user_id) || self.faculty_id == Some(user_id)
    }

    /// Returns true only the first time `user_id` is flagged this
    /// session.
    pub fn mark_not_in_class(&mut self, user_id: u64) -> bool {
        self.not_in_class_logged.insert(user_id)
    }
}

/// Map a confirmed gesture to the attendance action it authorizes.
pub fn gesture_action(gesture: Gesture) -> Option<AttendanceAction> {
    match gesture {
        Gesture::PeaceSign => Some(AttendanceAction::BreakOut),
        Gesture::ThumbsUp => Some(AttendanceAction::BreakIn),
        Gesture::OpenPalm => Some(AttendanceAction::Exit),
        Gesture::None => None,
    }
}

/// The kiosk loop and everything it owns.
pub struct Kiosk {
    config: KioskConfig,
    device_id: String,
    camera: Box<dyn FrameSource>,
    gate: Option<FaceGate>,
    recognizer: FaceRecognizer,
    landmarker: HandLandmarker,
    gallery: EmbeddingGallery,
    resolver: ScheduleResolver,
    tracker: StateTracker,
    logger: AttendanceLogger<BackendClient>,
    client: BackendClient,
    cooldowns: CooldownTracker,
    feedback: Box<dyn FeedbackSink>,
    active: Option<ActiveClass>,
    roster: Option<RosterSession>,
}

impl Kiosk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: KioskConfig,
        device_id: String,
        camera: Box<dyn FrameSource>,
        gate: Option<FaceGate>,
        recognizer: FaceRecognizer,
        landmarker: HandLandmarker,
        gallery: EmbeddingGallery,
        resolver: ScheduleResolver,
        logger: AttendanceLogger<BackendClient>,
        client: BackendClient,
        feedback: Box<dyn FeedbackSink>,
    ) -> Self {
        let cooldowns = CooldownTracker::new(Duration::from_secs(config.cooldown_secs));
        Self {
            config,
            device_id,
            camera,
            gate,
            recognizer,
            landmarker,
            gallery,
            resolver,
            tracker: StateTracker::new(),
            logger,
            client,
            cooldowns,
            feedback,
            active: None,
            roster: None,
        }
    }

    /// Main loop. Returns when `shutdown` is raised; the caller then
    /// calls [`Kiosk::shutdown`].
    pub fn run(&mut self, shutdown: &AtomicBool) {
        self.logger.flush_queue();
        self.resolver.sync(&self.client, &self.device_id);

        let mut frame_counter: usize = 0;
        let mut last_class_check: Option<Instant> = None;
        let mut last_idle_tick = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            let due = last_class_check
                .map(|t| t.elapsed() >= CLASS_CHECK_INTERVAL)
                .unwrap_or(true);
            if due {
                self.refresh_active_class();
                last_class_check = Some(Instant::now());
            }

            if self.active.is_none() {
                // Idle: no perception work at all.
                self.feedback.show(&Feedback::Idle);
                if last_idle_tick.elapsed() >= Duration::from_secs(self.config.idle_interval_secs)
                {
                    self.idle_tick();
                    last_idle_tick = Instant::now();
                }
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            if self.roster.is_none() {
                // Active class but no roster yet: retry, never proceed
                // with empty enrollment.
                self.fetch_roster();
                if self.roster.is_none() {
                    std::thread::sleep(RETRY_SLEEP);
                    continue;
                }
            }

            let frame = match self.camera.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "frame read failed");
                    std::thread::sleep(RETRY_SLEEP);
                    continue;
                }
            };

            frame_counter += 1;
            if frame_counter % self.config.frame_skip.max(1) != 0 {
                continue;
            }

            self.process_frame(&frame, shutdown);
        }
    }

    /// Clean shutdown: release the camera, one final flush.
    pub fn shutdown(&mut self) {
        self.camera.release();
        let flushed = self.logger.flush_queue();
        tracing::info!(flushed, pending = self.logger.pending(), "kiosk stopped");
    }

    fn idle_tick(&mut self) {
        if let Err(e) = self.client.heartbeat(&self.device_id) {
            tracing::debug!(error = %e, "heartbeat failed");
        }
        self.logger.flush_queue();
    }

    fn refresh_active_class(&mut self) {
        let resolved = self
            .resolver
            .active_class(&self.client, &self.device_id, Local::now());

        let changed = match (&self.active, &resolved) {
            (Some(a), Some(b)) => a.class_id != b.class_id,
            (None, None) => false,
            _ => true,
        };

        if changed {
            match &resolved {
                Some(class) => tracing::info!(
                    class_id = class.class_id,
                    subject = %class.subject_code,
                    room = %class.room,
                    "active class changed"
                ),
                None => tracing::info!("no active class"),
            }
            self.tracker.clear();
            self.cooldowns.clear();
            self.roster = None;
        }

        self.active = resolved;
    }

    fn fetch_roster(&mut self) {
        let Some(class) = &self.active else { return };
        match self.client.class_roster(class.class_id) {
            Ok(roster) => {
                let students: HashSet<u64> = roster.students.iter().map(|s| s.user_id).collect();
                let faculty_id = roster.faculty.as_ref().map(|f| f.user_id);
                tracing::info!(
                    class_id = class.class_id,
                    students = students.len(),
                    faculty = ?faculty_id,
                    "roster loaded"
                );
                self.roster = Some(RosterSession::new(class.class_id, students, faculty_id));
            }
            Err(e) => {
                tracing::warn!(class_id = class.class_id, error = %e, "roster fetch failed, retrying");
            }
        }
    }

    /// One full perception-and-decision cycle. Errors inside never
    /// escape: they degrade to "no detection this frame".
    fn process_frame(&mut self, frame: &RgbFrame, shutdown: &AtomicBool) {
        // Stage 1: cheap gate, when the platform wants it.
        if let Some(gate) = &mut self.gate {
            match gate.check(&frame.data, frame.width, frame.height) {
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!(error = %e, "face gate failed on this frame");
                    return;
                }
            }
        }

        // Stage 2: full-resolution recognition.
        let reading = match self.recognizer.read_face(&frame.data, frame.width, frame.height) {
            Ok(Some(reading)) => reading,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "recognition failed on this frame");
                return;
            }
        };

        let (matched, score) = self
            .gallery
            .find_match(&reading.embedding, self.config.match_threshold);

        let Some(identity) = matched else {
            tracing::debug!(best_score = score, "no gallery match");
            self.feedback.show(&Feedback::Unknown);
            return;
        };

        if let (Some(probe_ver), gallery_ver) =
            (&reading.embedding.model_version, &identity.model_version)
        {
            if !gallery_ver.is_empty() && probe_ver != gallery_ver {
                tracing::warn!(
                    user_id = identity.user_id,
                    probe = %probe_ver,
                    gallery = %gallery_ver,
                    "embedding model version mismatch"
                );
            }
        }

        let user_id = identity.user_id;
        let name = identity.name.clone();
        let now = Instant::now();

        if !self.cooldowns.ready(user_id, now) {
            self.feedback.show(&Feedback::Wait { name });
            return;
        }

        let Some(class) = self.active.clone() else { return };

        // Unauthorized: audit once per session, then cool down.
        let authorized = self
            .roster
            .as_ref()
            .map(|r| r.authorizes(user_id))
            .unwrap_or(false);
        if !authorized {
            if let Some(roster) = &mut self.roster {
                if roster.mark_not_in_class(user_id) {
                    tracing::info!(user_id, class_id = class.class_id, "person not in class");
                    let record = AttendanceRecord {
                        user_id,
                        class_id: class.class_id,
                        device_id: self.device_id.clone(),
                        action: AttendanceAction::Entry,
                        verified_by: VerifiedBy::Face,
                        confidence_score: score,
                        gesture_detected: None,
                        timestamp: AttendanceRecord::now_timestamp(),
                        remarks: Some(format!("{NOT_IN_CLASS_MARKER} {name}")),
                    };
                    self.logger.log(record);
                }
            }
            self.feedback.show(&Feedback::NotInClass { name });
            self.cooldowns.touch(user_id, now);
            return;
        }

        let current = self.tracker.current(&self.client, user_id, class.class_id);
        let allowed = state::allowed_actions(current);

        if allowed.contains(&AttendanceAction::Entry) {
            // The common case stays frictionless: face only.
            self.submit(user_id, &name, class.class_id, AttendanceAction::Entry, score, None);
        } else {
            let on_break = allowed == [AttendanceAction::BreakIn];
            self.feedback.show(&Feedback::PromptGesture {
                name: name.clone(),
                on_break,
            });

            match self.await_gesture(shutdown) {
                Some(gesture) => match gesture_action(gesture) {
                    Some(action) if allowed.contains(&action) => {
                        self.submit(
                            user_id,
                            &name,
                            class.class_id,
                            action,
                            score,
                            Some(gesture.label().to_string()),
                        );
                    }
                    Some(action) => {
                        tracing::debug!(
                            user_id,
                            action = action.label(),
                            allowed = ?allowed.iter().map(|a| a.label()).collect::<Vec<_>>(),
                            "gesture maps to an action outside the allowed set"
                        );
                        self.feedback.show(&Feedback::TryAgain);
                    }
                    None => {}
                },
                None => {
                    tracing::debug!(user_id, "gesture wait timed out");
                }
            }
        }

        // Cooldown after every matched-and-processed cycle, logged or
        // abandoned.
        self.cooldowns.touch(user_id, Instant::now());
    }

    fn submit(
        &mut self,
        user_id: u64,
        name: &str,
        class_id: u64,
        action: AttendanceAction,
        score: f32,
        gesture: Option<String>,
    ) {
        let verified_by = if gesture.is_some() {
            VerifiedBy::FaceGesture
        } else {
            VerifiedBy::Face
        };
        let record = AttendanceRecord {
            user_id,
            class_id,
            device_id: self.device_id.clone(),
            action,
            verified_by,
            confidence_score: score,
            gesture_detected: gesture,
            timestamp: AttendanceRecord::now_timestamp(),
            remarks: None,
        };
        self.logger.log(record);
        self.tracker.apply_confirmed(user_id, class_id, action);
        self.feedback.show(&Feedback::Greeting {
            name: name.to_string(),
            action,
        });
    }

    /// Bounded blocking sub-loop: read frames and classify until a
    /// gesture holds for N consecutive frames or the timeout elapses.
    fn await_gesture(&mut self, shutdown: &AtomicBool) -> Option<Gesture> {
        let deadline = Instant::now() + Duration::from_secs(self.config.gesture_timeout_secs);
        let mut smoother = GestureSmoother::new(self.config.gesture_frames);

        while Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) {
            let frame = match self.camera.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(error = %e, "frame read failed during gesture wait");
                    continue;
                }
            };

            match self.landmarker.classify(&frame.data, frame.width, frame.height) {
                // Landmarks are for display overlays; the kiosk only
                // needs the label.
                Ok(reading) => {
                    if let Some(confirmed) = smoother.observe(reading.gesture) {
                        tracing::debug!(gesture = confirmed.label(), "gesture confirmed");
                        return Some(confirmed);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "gesture classification failed on this frame");
                }
            }
        }

        None
    }
}

use std::collections::{HashSet, VecDeque};

/// Seconds a video has to play before it counts toward a binge.
pub const WATCH_THRESHOLD_SECONDS: f64 = 10.0;
/// Distinct videos past the watch threshold that make a binge.
pub const BINGE_VIDEO_COUNT: usize = 3;
/// Seeks shorter than this are treated as player jitter.
pub const SCRUB_MIN_SECONDS: f64 = 2.0;

/// Granular player events forwarded by the render layer.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    Muted {
        video_id: String,
    },
    Seeked {
        video_id: String,
        from_seconds: f64,
        to_seconds: f64,
    },
    Progress {
        video_id: String,
        position_seconds: f64,
        duration_seconds: Option<f64>,
    },
    Replayed {
        video_id: String,
    },
    Stopped {
        video_id: String,
        position_seconds: f64,
        duration_seconds: Option<f64>,
    },
}

impl VideoEvent {
    pub fn video_id(&self) -> &str {
        match self {
            VideoEvent::Muted { video_id }
            | VideoEvent::Seeked { video_id, .. }
            | VideoEvent::Progress { video_id, .. }
            | VideoEvent::Replayed { video_id }
            | VideoEvent::Stopped { video_id, .. } => video_id,
        }
    }
}

/// Session-wide one-shot categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngagementCategory {
    Mute,
    ScrubForward,
    ScrubBackward,
    Binge,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementKind {
    Category(EngagementCategory),
    /// Per-video, gated on the video never being scrubbed or nudged.
    Midpoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngagementNudge {
    pub kind: EngagementKind,
    pub video_id: String,
    /// Seconds skipped/rewound/watched, or the binge ordinal.
    pub detail: Option<f64>,
}

impl EngagementNudge {
    /// Context line sent as the turn's user entry.
    pub fn context_line(&self) -> String {
        let what = match self.kind {
            EngagementKind::Category(EngagementCategory::Mute) => "muted",
            EngagementKind::Category(EngagementCategory::ScrubForward) => "skipped ahead in",
            EngagementKind::Category(EngagementCategory::ScrubBackward) => "rewound",
            EngagementKind::Category(EngagementCategory::Binge) => "kept watching, now on",
            EngagementKind::Category(EngagementCategory::Stop) => "stopped",
            EngagementKind::Midpoint => "is halfway through",
        };
        format!("[video event] The visitor {} video \"{}\".", what, self.video_id)
    }

    /// Instruction sent as the synthetic entry right after the context line.
    pub fn instruction(&self) -> String {
        let seconds = self.detail.map(|d| d.round() as i64).unwrap_or(0);
        let id = &self.video_id;
        match self.kind {
            EngagementKind::Category(EngagementCategory::Mute) => format!(
                "[nudge] They muted \"{id}\". In one playful line, ask if the sound was too much \
                 or if they are sneaking a watch somewhere quiet."
            ),
            EngagementKind::Category(EngagementCategory::ScrubForward) => format!(
                "[nudge] They skipped {seconds} seconds ahead in \"{id}\". Tease them gently about \
                 being impatient and offer a shorter video."
            ),
            EngagementKind::Category(EngagementCategory::ScrubBackward) => format!(
                "[nudge] They rewound {seconds} seconds in \"{id}\". Say something curious about \
                 what caught their eye, one line."
            ),
            EngagementKind::Category(EngagementCategory::Binge) => format!(
                "[nudge] This is video number {seconds} they have watched for a while (latest: \
                 \"{id}\"). Celebrate the binge in one line and suggest another video."
            ),
            EngagementKind::Category(EngagementCategory::Stop) => format!(
                "[nudge] They stopped \"{id}\" after {seconds} seconds. Without guilt-tripping, \
                 ask what they would rather see instead."
            ),
            EngagementKind::Midpoint => format!(
                "[nudge] They are halfway through \"{id}\" without skipping. Drop one short fun \
                 fact or comment about it. Do not repeat its title or description."
            ),
        }
    }
}

/// Observes player events and queues one-shot engagement nudges.
///
/// A raised nudge sits in the pending queue until the controller is idle
/// enough to send it; its category counts as spent from the moment it is
/// queued.
#[derive(Debug, Default)]
pub struct VideoNudges {
    sent: HashSet<EngagementCategory>,
    pending: VecDeque<EngagementNudge>,
    nudged_videos: HashSet<String>,
    scrubbed_videos: HashSet<String>,
    watched_videos: Vec<String>,
}

impl VideoNudges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one player event; returns true when a new nudge was queued.
    pub fn observe(&mut self, event: &VideoEvent) -> bool {
        let nudge = match event {
            VideoEvent::Muted { video_id } => {
                self.raise(EngagementCategory::Mute, video_id, None)
            }
            VideoEvent::Seeked {
                video_id,
                from_seconds,
                to_seconds,
            } => {
                let delta = to_seconds - from_seconds;
                if delta.abs() < SCRUB_MIN_SECONDS {
                    None
                } else {
                    self.scrubbed_videos.insert(video_id.clone());
                    let category = if delta > 0.0 {
                        EngagementCategory::ScrubForward
                    } else {
                        EngagementCategory::ScrubBackward
                    };
                    self.raise(category, video_id, Some(delta.abs()))
                }
            }
            VideoEvent::Progress {
                video_id,
                position_seconds,
                duration_seconds,
            } => self.on_progress(video_id, *position_seconds, *duration_seconds),
            VideoEvent::Replayed { video_id } => {
                tracing::debug!("Video {} replayed", video_id);
                None
            }
            VideoEvent::Stopped {
                video_id,
                position_seconds,
                duration_seconds,
            } => {
                let early = duration_seconds
                    .is_some_and(|duration| *position_seconds > 0.0 && *position_seconds < duration / 2.0);
                if early {
                    self.raise(EngagementCategory::Stop, video_id, Some(*position_seconds))
                } else {
                    None
                }
            }
        };

        match nudge {
            Some(nudge) => {
                tracing::debug!("Queued {:?} nudge for video {}", nudge.kind, nudge.video_id);
                self.pending.push_back(nudge);
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Pops the oldest pending nudge and marks its category sent.
    pub fn take_pending(&mut self) -> Option<EngagementNudge> {
        let nudge = self.pending.pop_front()?;
        if let EngagementKind::Category(category) = nudge.kind {
            self.sent.insert(category);
        }
        Some(nudge)
    }

    pub fn was_sent(&self, category: EngagementCategory) -> bool {
        self.sent.contains(&category)
    }

    pub fn is_pending(&self, category: EngagementCategory) -> bool {
        self.pending
            .iter()
            .any(|nudge| nudge.kind == EngagementKind::Category(category))
    }

    fn on_progress(
        &mut self,
        video_id: &str,
        position: f64,
        duration: Option<f64>,
    ) -> Option<EngagementNudge> {
        if position >= WATCH_THRESHOLD_SECONDS && !self.watched_videos.iter().any(|v| v == video_id)
        {
            self.watched_videos.push(video_id.to_string());
        }

        if self.watched_videos.len() >= BINGE_VIDEO_COUNT
            && self.watched_videos.last().is_some_and(|v| v == video_id)
        {
            let ordinal = self.watched_videos.len() as f64;
            if let Some(nudge) = self.raise(EngagementCategory::Binge, video_id, Some(ordinal)) {
                return Some(nudge);
            }
        }

        let past_midpoint = duration.is_some_and(|d| d > 0.0 && position >= d / 2.0);
        if past_midpoint
            && !self.scrubbed_videos.contains(video_id)
            && !self.nudged_videos.contains(video_id)
        {
            self.nudged_videos.insert(video_id.to_string());
            return Some(EngagementNudge {
                kind: EngagementKind::Midpoint,
                video_id: video_id.to_string(),
                detail: Some(position),
            });
        }

        None
    }

    fn raise(
        &mut self,
        category: EngagementCategory,
        video_id: &str,
        detail: Option<f64>,
    ) -> Option<EngagementNudge> {
        if self.was_sent(category) || self.is_pending(category) {
            return None;
        }
        if self.nudged_videos.contains(video_id) {
            return None;
        }
        self.nudged_videos.insert(video_id.to_string());
        Some(EngagementNudge {
            kind: EngagementKind::Category(category),
            video_id: video_id.to_string(),
            detail,
        })
    }
}

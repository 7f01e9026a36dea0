//! Fixed lines of the hamster's scripted moments.

use std::time::Duration;

use crate::router::log::LogEntry;

pub const SCRIPT_LINE_DELAY: Duration = Duration::from_millis(2200);
pub const CHIP_CLICK_DELAY: Duration = Duration::from_millis(350);

pub const FALLBACK_SCRIPT: [&str; 3] = [
    "INT. HAMSTER STUDIO - NIGHT",
    "A tiny hamster stares at a blank screen. The idea is too big for the wheel.",
    "The wheel squeaks. The screen stays black. FADE OUT.",
];

pub const ACT1_REACTION: &str =
    "Okay... that was a disaster. Turns out hamsters can't make videos. Paws too small.";

pub const ACT1_OFFER: &str = "But I know someone who can! Michael makes real videos. \
     Want to see some of his stuff?";

pub const ACT1_CHIPS: [&str; 3] = [
    "Yes please!",
    "Whatever, show me a cool vid",
    "Michael? Whos' that?",
];

pub const WELCOME_BACK: &str =
    "Oh hey, you're back! I remember you. Still no luck making videos myself, \
     but Michael's stuff is right here.";

pub const APOLOGY: &str = "Eep! My wheel slipped and I lost that thought. Could you try again?";

pub const VIDEO_RETRY: &str =
    "Squeak, I couldn't say anything smart about that one. Enjoy it anyway, or try again!";

pub const LIMIT_REACHED: &str = "Phew, I'm all chatted out for this visit. My tiny brain needs \
     a nap. Reach out to Michael directly if you want to keep talking!";

pub const DARK_MODE_ON: &str = "Lights off. Mimsy switched to dark mode.";
pub const DARK_MODE_OFF: &str = "Lights on. Mimsy switched back to light mode.";

pub const IDLE_PROMPT: &str = "[idle] The visitor has been quiet for a little while. Say one \
     short, playful line to re-engage them, maybe suggesting a video. Do not mention being idle.";

pub fn act1_chips() -> Vec<String> {
    ACT1_CHIPS.iter().map(|chip| chip.to_string()).collect()
}

pub fn fallback_script() -> Vec<String> {
    FALLBACK_SCRIPT.iter().map(|line| line.to_string()).collect()
}

/// Short log seeded after the landing act so the first chat turn knows what
/// just happened.
pub fn seeded_log(idea: &str) -> Vec<LogEntry> {
    vec![
        LogEntry::user(format!("Make me a video about: {}", idea)),
        LogEntry::assistant(format!(
            "I tried to make a video about \"{}\" and failed miserably. I told the visitor \
             hamsters can't make videos and offered to show Michael's work instead.",
            idea
        )),
    ]
}

/// Context entry for a freshly opened video, sent without a user bubble.
pub fn video_opened_context(video_id: &str, title: Option<&str>) -> String {
    match title {
        Some(title) => format!("[video opened] The visitor opened \"{}\" ({}).", title, video_id),
        None => format!("[video opened] The visitor opened video {}.", video_id),
    }
}

pub const VIDEO_OPENED_INSTRUCTION: &str = "[steer] React to this video in one or two short \
     lines. Do not repeat its title, description or date; the visitor can already see them.";

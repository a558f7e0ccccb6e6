//! Natural exit phrasing.
//!
//! Renders age- and context-appropriate warning and ending text for a
//! governor decision. Variety comes from a caller-supplied seed over
//! fixed templates; the generator itself holds no state and no
//! randomness, so governor transitions stay deterministic.

use haven_context::{ConversationContext, Topic};

const YOUNG_WARNINGS: &[&str] = &[
    "We have about {m} more minutes to chat today. Let's make them fun!",
    "Just {m} minutes left for today! What should we do with them?",
];

const OLDER_WARNINGS: &[&str] = &[
    "Heads up — about {m} minutes of chat time left today.",
    "We've got around {m} minutes left. Anything you want to wrap up?",
];

const YOUNG_ENDINGS: &[&str] = &[
    "That was so much fun! Time to say goodbye for today — see you next time!",
    "We're out of chat time for today. Thanks for playing with me!",
];

const OLDER_ENDINGS: &[&str] = &[
    "That's our chat time for today. It was great talking with you!",
    "We're at the end of today's chat time. Catch you tomorrow!",
];

const STORY_PAUSE: &str =
    " This feels like a good place to pause the story — we can pick it up next time.";

/// Renders closing and warning phrasing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalExitGenerator;

impl NaturalExitGenerator {
    pub fn new() -> Self {
        Self
    }

    /// A time warning for `minutes_remaining`, phrased for the child's
    /// age. `seed` picks among templates deterministically.
    pub fn warning_text(&self, age: u8, minutes_remaining: u32, seed: u64) -> String {
        let templates = if age < 9 { YOUNG_WARNINGS } else { OLDER_WARNINGS };
        let template = templates[(seed as usize) % templates.len()];
        template.replace("{m}", &minutes_remaining.to_string())
    }

    /// A graceful ending, acknowledging an in-progress story when the
    /// context shows one.
    pub fn ending_text(&self, age: u8, context: &ConversationContext, seed: u64) -> String {
        let templates = if age < 9 { YOUNG_ENDINGS } else { OLDER_ENDINGS };
        let mut text = templates[(seed as usize) % templates.len()].to_string();
        if context.topics.contains(&Topic::Storytelling) {
            text.push_str(STORY_PAUSE);
        }
        text
    }
}

//! # haven-context
//!
//! Conversation context analysis for the Haven safety engine.
//!
//! The [`ContextAnalyzer`] derives ephemeral signals — mood, topics,
//! engagement, emotional importance — from a short sliding window of
//! recent messages. The session governor consults these signals before
//! interrupting a conversation: a child in the middle of a story or an
//! unresolved distressed moment should not be cut off by a timer.
//!
//! Analysis is pure and deterministic. Context is recomputed on every
//! poll and never persisted beyond the session.

#![deny(unsafe_code)]

use std::collections::BTreeSet;

use haven_types::ChatMessage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Window sizes for the different signals.
const MOOD_WINDOW: usize = 3;
const TOPIC_WINDOW: usize = 5;
const ENGAGEMENT_WINDOW: usize = 5;

/// Detected conversational mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Excited,
    Sad,
    Anxious,
    Curious,
    Neutral,
}

impl Mood {
    /// Distress moods gate session endings.
    pub fn is_distressed(self) -> bool {
        matches!(self, Mood::Sad | Mood::Anxious)
    }
}

/// Conversation topic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    School,
    Gaming,
    Family,
    Friends,
    Creative,
    Storytelling,
    Sports,
    Animals,
}

/// How engaged the child currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Low,
    Normal,
    High,
}

/// Ephemeral signals derived from a conversation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub mood: Mood,
    pub topics: BTreeSet<Topic>,
    pub engagement: EngagementLevel,
    /// How emotionally significant this moment is, 0.0–1.0.
    pub emotional_importance: f64,
    /// Whether interrupting now would break something important.
    pub good_time_to_end: bool,
}

impl ConversationContext {
    /// Context for an empty window: neutral and fine to end.
    pub fn empty() -> Self {
        Self {
            mood: Mood::Neutral,
            topics: BTreeSet::new(),
            engagement: EngagementLevel::Normal,
            emotional_importance: 0.0,
            good_time_to_end: true,
        }
    }
}

// Lexical cue sets. Matching is lowercase substring containment; the
// safety classifier handles anything needing real pattern precision.
const DISTRESS_CUES: &[&str] = &[
    "sad", "scared", "worried", "anxious", "crying", "upset", "lonely", "miss her", "miss him",
    "miss them", "hate myself",
];
const EXCITEMENT_CUES: &[&str] = &[
    "awesome", "so cool", "yay", "wow", "amazing", "excited", "best day", "love it", "!!",
];
const CURIOSITY_CUES: &[&str] = &["why", "how does", "how do", "what if", "i wonder", "what is"];

const STORYTELLING_CUES: &[&str] = &[
    "once upon a time",
    "tell me a story",
    "what happens next",
    "and then",
    "chapter",
    "the dragon",
    "continue the story",
];

const TOPIC_CUES: &[(Topic, &[&str])] = &[
    (
        Topic::School,
        &["school", "homework", "teacher", "class", "test", "exam"],
    ),
    (
        Topic::Gaming,
        &["minecraft", "roblox", "fortnite", "video game", "level", "play a game"],
    ),
    (
        Topic::Family,
        &["mom", "dad", "brother", "sister", "grandma", "grandpa", "family"],
    ),
    (
        Topic::Friends,
        &["friend", "best friend", "sleepover", "hang out"],
    ),
    (
        Topic::Creative,
        &["drawing", "painting", "craft", "lego", "build", "invent"],
    ),
    (
        Topic::Storytelling,
        &["story", "once upon a time", "chapter", "character", "adventure"],
    ),
    (
        Topic::Sports,
        &["soccer", "football", "basketball", "swimming", "practice", "team"],
    ),
    (
        Topic::Animals,
        &["dog", "cat", "puppy", "kitten", "pet", "dinosaur", "animal"],
    ),
];

fn contains_any(text: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| text.contains(cue))
}

/// Derives [`ConversationContext`] from recent messages.
#[derive(Debug, Clone, Default)]
pub struct ContextAnalyzer;

impl ContextAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a window of recent messages, oldest first.
    pub fn analyze(&self, recent: &[ChatMessage]) -> ConversationContext {
        if recent.is_empty() {
            return ConversationContext::empty();
        }

        let mood = self.detect_mood(recent);
        let topics = self.extract_topics(recent);
        let engagement = self.engagement_level(recent);

        let storytelling_active = self.storytelling_active(recent);
        let pending_question = self.pending_child_question(recent);
        let unresolved_distress = mood.is_distressed();

        let good_time_to_end = !storytelling_active && !pending_question && !unresolved_distress;

        let mut importance: f64 = 0.0;
        if unresolved_distress {
            importance += 0.4;
        }
        if storytelling_active {
            importance += 0.3;
        }
        if pending_question {
            importance += 0.2;
        }
        if engagement == EngagementLevel::High {
            importance += 0.1;
        }
        let emotional_importance = importance.clamp(0.0, 1.0);

        let context = ConversationContext {
            mood,
            topics,
            engagement,
            emotional_importance,
            good_time_to_end,
        };
        debug!(?context.mood, ?context.engagement, good_time_to_end, "context analyzed");
        context
    }

    /// Mood over the last three messages. Precedence when multiple cue
    /// sets match: distress > excitement > curiosity > neutral.
    fn detect_mood(&self, recent: &[ChatMessage]) -> Mood {
        let window = tail(recent, MOOD_WINDOW);
        let text = lowercase_joined(window);

        if contains_any(&text, DISTRESS_CUES) {
            // Split distress into anxious vs sad by cue kind
            if text.contains("worried") || text.contains("anxious") || text.contains("scared") {
                Mood::Anxious
            } else {
                Mood::Sad
            }
        } else if contains_any(&text, EXCITEMENT_CUES) {
            Mood::Excited
        } else if contains_any(&text, CURIOSITY_CUES) {
            Mood::Curious
        } else {
            Mood::Neutral
        }
    }

    /// Topics mentioned in the last five messages. A message may
    /// contribute to several topics.
    fn extract_topics(&self, recent: &[ChatMessage]) -> BTreeSet<Topic> {
        let text = lowercase_joined(tail(recent, TOPIC_WINDOW));
        TOPIC_CUES
            .iter()
            .filter(|(_, cues)| contains_any(&text, cues))
            .map(|(topic, _)| *topic)
            .collect()
    }

    /// Engagement from average message length and question presence.
    /// Fewer than two messages is not enough signal: normal.
    fn engagement_level(&self, recent: &[ChatMessage]) -> EngagementLevel {
        if recent.len() < 2 {
            return EngagementLevel::Normal;
        }
        let window = tail(recent, ENGAGEMENT_WINDOW);
        let avg_len =
            window.iter().map(|m| m.content.len()).sum::<usize>() as f64 / window.len() as f64;
        let has_question = tail(recent, MOOD_WINDOW)
            .iter()
            .any(|m| m.contains_question());

        if avg_len > 100.0 || has_question {
            EngagementLevel::High
        } else if avg_len < 20.0 {
            EngagementLevel::Low
        } else {
            EngagementLevel::Normal
        }
    }

    fn storytelling_active(&self, recent: &[ChatMessage]) -> bool {
        let text = lowercase_joined(tail(recent, TOPIC_WINDOW));
        contains_any(&text, STORYTELLING_CUES)
    }

    /// Is the child waiting on an answer right now?
    fn pending_child_question(&self, recent: &[ChatMessage]) -> bool {
        recent
            .last()
            .map(|m| m.is_from_child() && m.contains_question())
            .unwrap_or(false)
    }
}

fn tail(messages: &[ChatMessage], n: usize) -> &[ChatMessage] {
    let start = messages.len().saturating_sub(n);
    &messages[start..]
}

fn lowercase_joined(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
}

//! Record types stored by the application.
//!
//! Field names serialize in camelCase (and `_id` stays `_id`) so records
//! written by earlier builds keep parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Token and cost accounting for one model call or one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    /// Prompt tokens consumed.
    pub tokens_in: u64,
    /// Completion tokens produced.
    pub tokens_out: u64,
    /// Accumulated cost in dollars.
    pub cost: f64,
}

/// Which provider and model a speaker maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSpec {
    /// Provider identifier.
    pub api: String,
    /// Model identifier.
    pub model: String,
}

/// One speaker-attributed span of transcribed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerSegment {
    /// Speaker name.
    pub speaker: String,
    /// The span could not be transcribed.
    pub not_audible: bool,
    /// Transcribed text.
    pub text: String,
}

/// A chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session id; also the storage key.
    #[serde(rename = "_id")]
    pub id: String,
    /// Display title.
    pub title: String,
    /// Aggregate usage. Older records may lack it.
    #[serde(default)]
    pub usage: ModelUsage,
}

/// The ordered paragraph membership of one session.
///
/// Kept separate from [`Session`] so paragraph churn does not rewrite the
/// session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParagraphs {
    /// Session id; also the storage key.
    #[serde(rename = "_id")]
    pub id: String,
    /// Paragraph ids belonging to the session.
    pub paragraph_ids: Vec<String>,
}

/// Speaker → model assignments for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpeakers {
    /// Session id; also the storage key.
    pub session: String,
    /// Assignment per speaker name.
    pub speakers: HashMap<String, AiSpec>,
}

/// Reference to a stored audio clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRef {
    /// Key of the clip in the audio collection.
    pub path: String,
}

/// One question/answer exchange, with optional voice attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paragraph {
    /// Paragraph id; also the storage key.
    #[serde(rename = "_id")]
    pub id: String,
    /// Sort position within the session, milliseconds since the epoch.
    pub order_time: u64,
    /// The user's question.
    pub question: String,
    /// The assistant's answer.
    pub answer: String,
    /// Speaker attribution of the question audio, when segmented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_segmentation: Option<Vec<SpeakerSegment>>,
    /// Audio clips backing this paragraph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<AudioRef>>,
    /// Usage for this exchange. Older records may lack it.
    #[serde(default)]
    pub usage: ModelUsage,
}

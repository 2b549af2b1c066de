//! Verba Records — the typed record collections of the application.
//!
//! Sessions, their paragraph membership, speaker assignments and audio
//! clips, each persisted through one [`verba_storage`] collection. The chat
//! records go through the synchronous cached façade so the UI can read them
//! every frame; audio clips go through the uncached byte collection.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod audio;
pub mod chat;
pub mod schema;

pub use audio::AudioStore;
pub use chat::ChatStore;
pub use schema::{
    AiSpec, AudioRef, ModelUsage, Paragraph, Session, SessionParagraphs, SessionSpeakers,
    SpeakerSegment,
};

//! The chat record store: sessions, their paragraph membership, and
//! speaker assignments.
//!
//! Paragraph membership lives in a per-session skeleton record so that
//! removing a paragraph only unlinks it — the paragraph record itself is
//! kept, which is what makes undelete possible.
//!
//! Operations on a session whose skeleton does not exist log a warning and
//! do nothing; a stale id must never take the UI down.

use tracing::warn;
use verba_storage::{StorageResult, Vault};

use crate::schema::{Paragraph, Session, SessionParagraphs, SessionSpeakers};

type Collection<T> = verba_storage::Collection<T>;

/// Typed collections for the chat data model.
#[derive(Debug)]
pub struct ChatStore {
    sessions: Collection<Session>,
    session_paragraphs: Collection<SessionParagraphs>,
    session_speakers: Collection<SessionSpeakers>,
    paragraphs: Collection<Paragraph>,
}

impl ChatStore {
    /// Open the chat collections on `vault`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(vault: &Vault) -> Self {
        Self {
            sessions: vault.collection("Session", None),
            session_paragraphs: vault.collection("SessionParagraphs", None),
            session_speakers: vault.collection("SessionSpeakers", None),
            paragraphs: vault.collection("Paragraph", None),
        }
    }

    /// All currently-known sessions, newest first.
    #[must_use]
    pub fn session_list(&self) -> Vec<Session> {
        self.sessions.values().into_iter().rev().collect()
    }

    /// Best currently-known session record.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id)
    }

    /// Store a session, creating its paragraph-list and speaker-map
    /// skeletons on first insert.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the existence check; the writes
    /// themselves are write-through and do not fail here.
    pub async fn upsert_session(&self, session: Session) -> StorageResult<()> {
        let id = session.id.clone();
        if self.sessions.get_promise(&id).await?.is_none() {
            self.session_paragraphs.set(
                &id,
                SessionParagraphs {
                    id: id.clone(),
                    paragraph_ids: Vec::new(),
                },
            );
            self.session_speakers.set(
                &id,
                SessionSpeakers {
                    session: id.clone(),
                    speakers: std::collections::HashMap::new(),
                },
            );
        }
        self.sessions.set(&id, session);
        Ok(())
    }

    /// Remove a session record. Its paragraphs stay.
    pub fn delete_session(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// The session's paragraphs, resolved through the cache and sorted by
    /// order time. Paragraphs that have not resolved yet are skipped.
    #[must_use]
    pub fn session_paragraphs(&self, session: &str) -> Vec<Paragraph> {
        let Some(skeleton) = self.session_paragraphs.get(session) else {
            return Vec::new();
        };
        let mut list: Vec<Paragraph> = skeleton
            .paragraph_ids
            .iter()
            .filter_map(|id| self.paragraphs.get(id))
            .collect();
        list.sort_by_key(|p| p.order_time);
        list
    }

    /// Best currently-known paragraph record.
    #[must_use]
    pub fn paragraph(&self, id: &str) -> Option<Paragraph> {
        self.paragraphs.get(id)
    }

    /// Unlink a paragraph from its session. The paragraph record is kept
    /// so it can be restored.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the skeleton read.
    pub async fn remove_paragraph(&self, session: &str, id: &str) -> StorageResult<()> {
        let Some(mut skeleton) = self.session_paragraphs.get_promise(session).await? else {
            warn!(session, "remove_paragraph: session not found");
            return Ok(());
        };
        skeleton.paragraph_ids.retain(|existing| existing != id);
        self.session_paragraphs.set(session, skeleton);
        Ok(())
    }

    /// Relink a previously-removed paragraph.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the skeleton or paragraph read.
    pub async fn restore_paragraph(&self, session: &str, id: &str) -> StorageResult<()> {
        let Some(mut skeleton) = self.session_paragraphs.get_promise(session).await? else {
            warn!(session, "restore_paragraph: session not found");
            return Ok(());
        };
        if self.paragraphs.get_promise(id).await?.is_none() {
            warn!(session, paragraph = id, "restore_paragraph: paragraph not found");
            return Ok(());
        }
        if !skeleton.paragraph_ids.iter().any(|existing| existing == id) {
            skeleton.paragraph_ids.push(id.to_owned());
            self.session_paragraphs.set(session, skeleton);
        }
        Ok(())
    }

    /// Store a paragraph, linking it into the session on first sight.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the skeleton read.
    pub async fn put_paragraph(&self, session: &str, paragraph: Paragraph) -> StorageResult<()> {
        let Some(mut skeleton) = self.session_paragraphs.get_promise(session).await? else {
            warn!(session, "put_paragraph: session not found");
            return Ok(());
        };
        let id = paragraph.id.clone();
        if !skeleton.paragraph_ids.iter().any(|existing| existing == &id) {
            skeleton.paragraph_ids.push(id.clone());
            self.session_paragraphs.set(session, skeleton);
        }
        self.paragraphs.set(&id, paragraph);
        Ok(())
    }

    /// The session's speaker assignments, empty if none are stored yet.
    #[must_use]
    pub fn speakers(&self, session: &str) -> SessionSpeakers {
        self.session_speakers
            .get(session)
            .unwrap_or_else(|| SessionSpeakers {
                session: session.to_owned(),
                speakers: std::collections::HashMap::new(),
            })
    }

    /// Store the session's speaker assignments.
    pub fn set_speakers(&self, session: &str, speakers: SessionSpeakers) {
        self.session_speakers.set(session, speakers);
    }
}

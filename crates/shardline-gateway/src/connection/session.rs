//! Session state that outlives individual connections.

use crate::protocol::ResumePayload;

/// Resume state of one shard
///
/// `sequence` is only ever cleared together with `session_id`, so a resume
/// can never be sent with the sequence of a previous session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Record the `s` of an inbound frame
    pub fn observe_sequence(&mut self, sequence: u64) {
        self.sequence = Some(sequence);
    }

    /// Store the identity handed out by READY
    pub fn establish(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        if resume_url.is_some() {
            self.resume_url = resume_url;
        }
    }

    /// Discard the session so that the next handshake identifies
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    /// Resume payload for this session, `None` if there is nothing to resume
    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        Some(ResumePayload {
            token: token.to_string(),
            session_id: self.session_id.clone()?,
            seq: self.sequence.unwrap_or(0),
        })
    }

    /// URL for the next connection: the resume URL while the session is
    /// resumable, `default` otherwise
    pub fn connect_url<'a>(&'a self, default: &'a str) -> &'a str {
        match (&self.session_id, &self.resume_url) {
            (Some(_), Some(url)) => url.as_str(),
            _ => default,
        }
    }
}

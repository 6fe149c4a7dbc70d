/// Session changes published by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A renewal succeeded and the store holds fresh tokens.
    Renewed,
    /// Renewal failed; the store has been cleared and the user must log in again.
    Expired { reason: String },
}

impl SessionEvent {
    pub fn is_expired(&self) -> bool {
        matches!(self, SessionEvent::Expired { .. })
    }
}

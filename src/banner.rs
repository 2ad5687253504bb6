/// What the offline banner should show for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerState {
    /// Online and nothing queued.
    Hidden,
    Offline { pending: usize },
    /// Back online with writes still waiting; offers "sync now".
    PendingSync { pending: usize },
}

impl BannerState {
    pub fn from_state(online: bool, pending: usize) -> Self {
        match (online, pending) {
            (false, pending) => BannerState::Offline { pending },
            (true, 0) => BannerState::Hidden,
            (true, pending) => BannerState::PendingSync { pending },
        }
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self, BannerState::Hidden)
    }

    pub fn message(&self) -> Option<String> {
        match self {
            BannerState::Hidden => None,
            BannerState::Offline { .. } => Some(
                "You are offline. Some actions are unavailable. Changes will sync when you're back online."
                    .to_string(),
            ),
            BannerState::PendingSync { pending } => Some(format!(
                "{pending} change(s) pending sync. Tap to sync now."
            )),
        }
    }
}

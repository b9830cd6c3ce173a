use serde::Serialize;

/// Whether a navigation is waiting for a reindex to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationFlag {
    Idle,
    Requested,
}

/// What to query once the pending reindex completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationPayload {
    pub file: String,
    /// Zero-based
    pub row: u32,
    /// Zero-based
    pub col: u32,
    /// Buffer contents submitted with the reindex
    pub text: Vec<u8>,
}

/// Transaction flag for the "reindex first, navigate afterwards" handshake.
///
/// At most one navigation can be outstanding; a second `request` while one
/// is pending is ignored. The payload outlives the transaction so the next
/// navigation can tell whether the buffer changed since it was last sent.
#[derive(Debug, Clone)]
pub struct NavigationState {
    flag: NavigationFlag,
    switches: Vec<String>,
    payload: Option<NavigationPayload>,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationState {
    pub fn new() -> Self {
        Self {
            flag: NavigationFlag::Idle,
            switches: Vec::new(),
            payload: None,
        }
    }

    /// Idle → Requested. Returns `false` (changing nothing) if a navigation
    /// is already outstanding.
    pub fn request(&mut self, switches: Vec<String>, payload: NavigationPayload) -> bool {
        if self.flag == NavigationFlag::Requested {
            tracing::debug!("Navigation already requested, ignoring");
            return false;
        }
        tracing::debug!(file = %payload.file, ?switches, "Navigation requested");
        self.flag = NavigationFlag::Requested;
        self.switches = switches;
        self.payload = Some(payload);
        true
    }

    /// Back to Idle, whatever the current state.
    pub fn complete(&mut self) {
        self.flag = NavigationFlag::Idle;
        self.switches.clear();
    }

    pub fn is_done(&self) -> bool {
        self.flag == NavigationFlag::Idle
    }

    pub fn flag(&self) -> NavigationFlag {
        self.flag
    }

    pub fn switches(&self) -> &[String] {
        &self.switches
    }

    pub fn payload(&self) -> Option<&NavigationPayload> {
        self.payload.as_ref()
    }

    /// Text of the most recent navigation-triggered reindex.
    pub fn last_text(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|p| p.text.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> NavigationPayload {
        NavigationPayload {
            file: "/src/a.cpp".to_string(),
            row: 3,
            col: 7,
            text: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn request_then_complete() {
        let mut state = NavigationState::new();
        assert!(state.is_done());
        assert!(state.request(vec!["-f".to_string()], payload("a")));
        assert!(!state.is_done());
        assert_eq!(state.switches(), ["-f".to_string()]);

        state.complete();
        assert!(state.is_done());
        assert!(state.switches().is_empty());
        assert_eq!(state.last_text(), Some(&b"a"[..]));
    }

    #[test]
    fn second_request_is_ignored() {
        let mut state = NavigationState::new();
        assert!(state.request(vec!["-f".to_string()], payload("first")));
        assert!(!state.request(vec!["-r".to_string()], payload("second")));
        assert_eq!(state.switches(), ["-f".to_string()]);
        assert_eq!(state.last_text(), Some(&b"first"[..]));
    }

    #[test]
    fn complete_when_idle_is_harmless() {
        let mut state = NavigationState::new();
        state.complete();
        assert_eq!(state.flag(), NavigationFlag::Idle);
    }
}

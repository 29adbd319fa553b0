//! Transient user-facing advisories.

use std::collections::VecDeque;
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

/// Oldest notices are dropped beyond this many.
const MAX_NOTICES: usize = 5;

/// Advisory severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryKind {
    Info,
    Warning,
    Error,
}

/// One auto-dismissing banner.
#[derive(Debug, Clone, PartialEq)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub message: String,
    pub expires_at: Instant,
}

/// Queue of live advisories.
#[derive(Debug, Clone)]
pub struct Notices {
    items: VecDeque<Advisory>,
    duration: Duration,
}

impl Notices {
    pub fn new(duration: Duration) -> Self {
        Self {
            items: VecDeque::new(),
            duration,
        }
    }

    pub fn push(&mut self, kind: AdvisoryKind, message: impl Into<String>, now: Instant) {
        let message = message.into();
        // Repeating the newest notice only extends it.
        if let Some(last) = self.items.back_mut() {
            if last.kind == kind && last.message == message {
                last.expires_at = now + self.duration;
                return;
            }
        }
        self.items.push_back(Advisory {
            kind,
            message,
            expires_at: now + self.duration,
        });
        while self.items.len() > MAX_NOTICES {
            self.items.pop_front();
        }
    }

    pub fn info(&mut self, message: impl Into<String>, now: Instant) {
        self.push(AdvisoryKind::Info, message, now);
    }

    pub fn warn(&mut self, message: impl Into<String>, now: Instant) {
        self.push(AdvisoryKind::Warning, message, now);
    }

    pub fn error(&mut self, message: impl Into<String>, now: Instant) {
        self.push(AdvisoryKind::Error, message, now);
    }

    /// Drop expired notices. Returns true if any were removed.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.expires_at > now);
        self.items.len() != before
    }

    pub fn active(&self) -> impl Iterator<Item = &Advisory> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices_expire() {
        let start = Instant::now();
        let mut notices = Notices::new(Duration::from_secs(4));
        notices.error("Flush failed", start);
        notices.info("Signed in", start + Duration::from_secs(2));

        assert!(!notices.expire(start + Duration::from_secs(3)));
        assert!(notices.expire(start + Duration::from_secs(5)));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices.active().next().unwrap().kind, AdvisoryKind::Info);
    }

    #[test]
    fn test_repeat_extends_instead_of_stacking() {
        let start = Instant::now();
        let mut notices = Notices::new(Duration::from_secs(4));
        notices.warn("Sign in to paint", start);
        notices.warn("Sign in to paint", start + Duration::from_secs(3));
        assert_eq!(notices.len(), 1);
        assert!(!notices.expire(start + Duration::from_secs(6)));
    }

    #[test]
    fn test_queue_is_bounded() {
        let now = Instant::now();
        let mut notices = Notices::new(Duration::from_secs(4));
        for i in 0..10 {
            notices.info(format!("n{}", i), now);
        }
        assert_eq!(notices.len(), MAX_NOTICES);
        assert_eq!(notices.active().next().unwrap().message, "n5");
    }
}

//! Single authority for the current page.
//!
//! Three kinds of intent feed into [`PageSync`]: user navigation, requests derived
//! from assistant output, and the document itself when its page count becomes known.
//! Every accepted change is queued as a [`SyncEvent`] for the host to drain.

use serde::{Deserialize, Serialize};

use crate::Command;

/// How a page requested by the assistant is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpMode {
    /// The request takes over the current page.
    #[default]
    Immediate,
    /// The request is offered and only applied once accepted.
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrigin {
    User,
    Assistant,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    PageChanged { page: usize, origin: PageOrigin },
    JumpOffered { page: usize },
    OfferCleared,
}

#[derive(Debug)]
pub struct PageSync {
    mode: JumpMode,
    page_count: Option<usize>,
    current: usize,
    offer: Option<usize>,
    deferred: Option<usize>,
    events: Vec<SyncEvent>,
}

impl PageSync {
    pub fn new(mode: JumpMode) -> Self {
        Self {
            mode,
            page_count: None,
            current: 1,
            offer: None,
            deferred: None,
            events: Vec::new(),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> Option<usize> {
        self.page_count
    }

    pub fn mode(&self) -> JumpMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: JumpMode) {
        self.mode = mode;
        if mode == JumpMode::Immediate {
            if let Some(page) = self.offer.take() {
                self.events.push(SyncEvent::OfferCleared);
                self.go_to(page, PageOrigin::Assistant);
            }
        }
    }

    /// Page the assistant asked for and that is waiting for confirmation.
    pub fn pending_offer(&self) -> Option<usize> {
        self.offer
    }

    /// Called once a document is ready. A zero count means no usable document.
    pub fn set_page_count(&mut self, page_count: usize) {
        if page_count == 0 {
            self.page_count = None;
            return;
        }
        self.page_count = Some(page_count);

        let clamped = self.clamp(self.current);
        if clamped != self.current {
            self.go_to(clamped, PageOrigin::Document);
        }
        if let Some(offer) = self.offer {
            let clamped = self.clamp(offer);
            if clamped == self.current {
                self.offer = None;
                self.events.push(SyncEvent::OfferCleared);
            } else {
                self.offer = Some(clamped);
            }
        }
        if let Some(page) = self.deferred.take() {
            self.request(page);
        }
    }

    /// Applies navigation commands; other commands are ignored. Returns whether the
    /// current page changed. Navigation needs a known page count.
    pub fn apply(&mut self, command: &Command) -> bool {
        let navigates = matches!(
            command,
            Command::NextPage { .. } | Command::PrevPage { .. } | Command::GotoPage { .. }
        );
        if navigates && self.page_count.is_none() {
            return false;
        }
        match command {
            Command::NextPage { count } => {
                let target = self.current.saturating_add((*count).max(1));
                self.go_to(target, PageOrigin::User)
            }
            Command::PrevPage { count } => {
                let target = self.current.saturating_sub((*count).max(1));
                self.go_to(target, PageOrigin::User)
            }
            Command::GotoPage { page } => self.go_to(*page, PageOrigin::User),
            Command::AcceptJump => self.accept_offer(),
            Command::DismissJump => {
                self.dismiss_offer();
                false
            }
            _ => false,
        }
    }

    /// A page derived from assistant output. Out-of-range requests are clamped and a
    /// request for the page already shown is ignored. Before the page count is known
    /// the latest request is held back.
    pub fn request(&mut self, page: usize) -> bool {
        if self.page_count.is_none() {
            self.deferred = Some(page);
            return false;
        }
        let target = self.clamp(page);
        if target == self.current {
            return false;
        }
        match self.mode {
            JumpMode::Immediate => self.go_to(target, PageOrigin::Assistant),
            JumpMode::Confirm => {
                if self.offer != Some(target) {
                    self.offer = Some(target);
                    self.events.push(SyncEvent::JumpOffered { page: target });
                }
                false
            }
        }
    }

    pub fn accept_offer(&mut self) -> bool {
        match self.offer.take() {
            Some(page) => {
                self.events.push(SyncEvent::OfferCleared);
                self.go_to(page, PageOrigin::User)
            }
            None => false,
        }
    }

    pub fn dismiss_offer(&mut self) {
        if self.offer.take().is_some() {
            self.events.push(SyncEvent::OfferCleared);
        }
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    /// Without a page count only the lower bound is known; every path that moves the
    /// page past it waits for `set_page_count`.
    fn clamp(&self, page: usize) -> usize {
        match self.page_count {
            Some(count) => page.clamp(1, count),
            None => page.max(1),
        }
    }

    fn go_to(&mut self, page: usize, origin: PageOrigin) -> bool {
        let target = self.clamp(page);
        if target == self.current {
            return false;
        }
        self.current = target;
        if self.offer == Some(target) {
            self.offer = None;
            self.events.push(SyncEvent::OfferCleared);
        }
        self.events.push(SyncEvent::PageChanged {
            page: target,
            origin,
        });
        true
    }
}

impl Default for PageSync {
    fn default() -> Self {
        Self::new(JumpMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(count: usize, mode: JumpMode) -> PageSync {
        let mut sync = PageSync::new(mode);
        sync.set_page_count(count);
        sync.drain_events();
        sync
    }

    #[test]
    fn navigation_updates_page_and_reports_it() {
        let mut sync = ready(100, JumpMode::Immediate);

        assert!(sync.apply(&Command::NextPage { count: 10 }));
        assert_eq!(sync.current(), 11);
        assert!(sync.apply(&Command::PrevPage { count: 5 }));
        assert_eq!(sync.current(), 6);
        assert!(sync.apply(&Command::GotoPage { page: 99 }));
        assert_eq!(sync.current(), 99);
        assert!(sync.apply(&Command::GotoPage { page: 150 }));
        assert_eq!(sync.current(), 100);
        assert!(!sync.apply(&Command::NextPage { count: 1 }));

        let events = sync.drain_events();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events.last(),
            Some(&SyncEvent::PageChanged {
                page: 100,
                origin: PageOrigin::User
            })
        );
    }

    #[test]
    fn prev_at_first_page_is_a_noop() {
        let mut sync = ready(5, JumpMode::Immediate);
        assert!(!sync.apply(&Command::PrevPage { count: 1 }));
        assert!(!sync.apply(&Command::GotoPage { page: 0 }));
        assert_eq!(sync.current(), 1);
        assert!(sync.drain_events().is_empty());
    }

    #[test]
    fn current_page_is_always_clamped() {
        for count in [1usize, 2, 7, 50] {
            for requested in [0usize, 1, 3, 49, 50, 51, 9999] {
                let mut sync = ready(count, JumpMode::Immediate);
                sync.apply(&Command::GotoPage { page: requested });
                assert_eq!(sync.current(), requested.min(count).max(1));

                let mut sync = ready(count, JumpMode::Immediate);
                sync.request(requested);
                assert_eq!(sync.current(), requested.min(count).max(1));
            }
        }
    }

    #[test]
    fn assistant_request_takes_over_in_immediate_mode() {
        let mut sync = ready(50, JumpMode::Immediate);
        assert!(sync.request(9999));
        assert_eq!(sync.current(), 50);
        assert_eq!(
            sync.drain_events(),
            vec![SyncEvent::PageChanged {
                page: 50,
                origin: PageOrigin::Assistant
            }]
        );
        assert!(!sync.request(50));
        assert!(sync.drain_events().is_empty());
    }

    #[test]
    fn confirm_mode_offers_until_accepted() {
        let mut sync = ready(20, JumpMode::Confirm);
        assert!(!sync.request(7));
        assert_eq!(sync.current(), 1);
        assert_eq!(sync.pending_offer(), Some(7));
        assert!(!sync.request(7));
        assert_eq!(
            sync.drain_events(),
            vec![SyncEvent::JumpOffered { page: 7 }]
        );

        assert!(sync.apply(&Command::AcceptJump));
        assert_eq!(sync.current(), 7);
        assert_eq!(sync.pending_offer(), None);
        assert!(!sync.accept_offer());
    }

    #[test]
    fn dismissing_or_reaching_the_offer_clears_it() {
        let mut sync = ready(20, JumpMode::Confirm);
        sync.request(4);
        sync.apply(&Command::DismissJump);
        assert_eq!(sync.pending_offer(), None);

        sync.request(6);
        sync.apply(&Command::GotoPage { page: 6 });
        assert_eq!(sync.pending_offer(), None);
        assert!(sync.drain_events().contains(&SyncEvent::OfferCleared));
    }

    #[test]
    fn requests_before_load_are_deferred() {
        let mut sync = PageSync::new(JumpMode::Immediate);
        assert!(!sync.request(12));
        assert!(!sync.request(30));
        assert_eq!(sync.current(), 1);

        sync.set_page_count(25);
        assert_eq!(sync.current(), 25);
    }

    #[test]
    fn navigation_before_load_is_ignored() {
        let mut sync = PageSync::new(JumpMode::Immediate);
        assert!(!sync.apply(&Command::NextPage { count: 500 }));
        assert!(!sync.apply(&Command::GotoPage { page: usize::MAX }));
        assert_eq!(sync.current(), 1);
        assert!(sync.drain_events().is_empty());

        sync.set_page_count(8);
        assert!(sync.apply(&Command::GotoPage { page: usize::MAX }));
        assert_eq!(sync.current(), 8);
    }

    #[test]
    fn shrinking_document_clamps_current_page() {
        let mut sync = ready(40, JumpMode::Immediate);
        sync.apply(&Command::GotoPage { page: 35 });
        sync.drain_events();

        sync.set_page_count(10);
        assert_eq!(sync.current(), 10);
        assert_eq!(
            sync.drain_events(),
            vec![SyncEvent::PageChanged {
                page: 10,
                origin: PageOrigin::Document
            }]
        );
    }

    #[test]
    fn switching_to_immediate_applies_pending_offer() {
        let mut sync = ready(10, JumpMode::Confirm);
        sync.request(3);
        sync.set_mode(JumpMode::Immediate);
        assert_eq!(sync.current(), 3);
        assert_eq!(sync.pending_offer(), None);
    }
}

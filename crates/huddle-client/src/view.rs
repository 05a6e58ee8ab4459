use tracing::{debug, warn};
use uuid::Uuid;

use huddle_types::{ConversationKey, MessageId};
use huddle_types::models::Message;

use crate::error::{ClientError, Result};
use crate::rest::HistoryQuery;
use crate::timeline::{PendingMessage, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Waiting for the first history page.
    Loading,
    /// History loaded and pushes flowing.
    Live,
    /// Transport dropped; the gap will be filled and the latest page
    /// refreshed on reconnect.
    Reconnecting,
}

/// One open conversation: its timeline plus where it is in the
/// load/reconnect cycle.
#[derive(Debug)]
pub struct ConversationView {
    timeline: Timeline,
    state: ViewState,
    page: u32,
    /// Gap fill resumes after this id. Pinned when the transport drops so
    /// pushes arriving before the fetch cannot move it past the gap.
    resume_after: Option<MessageId>,
    /// After the gap is closed, fetch the latest page once more so reactions
    /// that changed on already-known messages are picked up.
    refresh_latest: bool,
}

impl ConversationView {
    pub fn new(conversation: ConversationKey, owner: Uuid, page: u32) -> Self {
        Self {
            timeline: Timeline::new(conversation, owner),
            state: ViewState::Loading,
            page: page.max(1),
            resume_after: None,
            refresh_latest: false,
        }
    }

    /// Resume from cached messages. A cache that fails validation is thrown
    /// away and the view starts empty.
    pub fn restore(conversation: ConversationKey, owner: Uuid, page: u32, cached: Vec<Message>) -> Self {
        let mut view = Self::new(conversation, owner, page);
        match Timeline::from_cache(conversation, owner, cached) {
            Ok(timeline) => {
                view.resume_after = timeline.highest_id();
                view.refresh_latest = view.resume_after.is_some();
                view.timeline = timeline;
            }
            Err(e) => warn!("discarding cached timeline: {}", e),
        }
        view
    }

    pub fn conversation(&self) -> ConversationKey {
        self.timeline.conversation()
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    /// What to fetch next. Loading asks for the latest page, or for
    /// everything after a restored cache. Reconnecting asks for everything
    /// after the highest id known when the transport dropped. Once that gap
    /// is closed both finish with the latest page.
    pub fn next_query(&self) -> HistoryQuery {
        match self.resume_after {
            Some(anchor) if self.state != ViewState::Live => HistoryQuery::after(self.page, anchor),
            _ => HistoryQuery::latest(self.page),
        }
    }

    /// Page for scrolling back past the oldest loaded message.
    pub fn older_query(&self) -> Option<HistoryQuery> {
        self.timeline
            .lowest_id()
            .map(|lowest| HistoryQuery::before(self.page, lowest))
    }

    /// Apply a page fetched with `query`. Returns true when another page is
    /// needed before the view is Live. A page that fails validation resets
    /// the view instead.
    pub fn apply_page(&mut self, query: HistoryQuery, page: Vec<Message>) -> Result<bool> {
        let full = page.len() >= query.limit as usize;
        let page_highest = page.iter().map(|m| m.id).max();
        match self.timeline.apply_history(page) {
            Ok(changed) => {
                debug!("{}: {} messages added or refreshed from history", self.conversation(), changed);
            }
            Err(e @ ClientError::CorruptState { .. }) => {
                self.rebuild();
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        // Gap fill walks forward until a short page, then hands over to the
        // latest-page refresh. Older pages never change the state.
        if query.before.is_some() {
            return Ok(false);
        }
        if query.after.is_some() {
            self.resume_after = self.resume_after.max(page_highest);
            if full {
                return Ok(true);
            }
            self.resume_after = None;
            if self.refresh_latest {
                return Ok(true);
            }
        } else {
            self.refresh_latest = false;
        }
        self.state = ViewState::Live;
        self.resume_after = None;
        Ok(false)
    }

    /// Older history for scroll-back does not change the view's state.
    pub fn apply_older(&mut self, page: Vec<Message>) -> Result<usize> {
        match self.timeline.apply_history(page) {
            Err(e @ ClientError::CorruptState { .. }) => {
                self.rebuild();
                Err(e)
            }
            other => other,
        }
    }

    pub fn transport_dropped(&mut self) {
        if self.state == ViewState::Live {
            self.state = ViewState::Reconnecting;
            self.resume_after = self.timeline.highest_id();
            self.refresh_latest = true;
        }
    }

    /// Throw away cached server state and start over from Loading. Local
    /// unconfirmed sends survive.
    pub fn rebuild(&mut self) {
        let pending: Vec<PendingMessage> = self.timeline.pending().to_vec();
        let conversation = self.conversation();
        warn!("rebuilding timeline for {}", conversation);
        self.timeline = Timeline::new(conversation, self.timeline.owner());
        for entry in pending {
            self.timeline.push_pending(entry);
        }
        self.state = ViewState::Loading;
        self.resume_after = None;
        self.refresh_latest = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use huddle_types::models::ReactionGroup;

    fn channel() -> ConversationKey {
        ConversationKey::channel(Uuid::from_u128(3))
    }

    fn message(id: MessageId) -> Message {
        Message {
            id,
            conversation: channel(),
            sender_id: Uuid::from_u128(8),
            sender_name: "Dana".into(),
            body: format!("step {}", id),
            created_at: Utc::now(),
            reply_to_id: None,
            attachment: None,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn loading_to_live_on_first_page() {
        let mut view = ConversationView::new(channel(), Uuid::from_u128(1), 50);
        assert_eq!(view.state(), ViewState::Loading);
        let query = view.next_query();
        assert_eq!(query, HistoryQuery::latest(50));

        let more = view.apply_page(query, (1..=10).map(message).collect()).unwrap();
        assert!(!more);
        assert_eq!(view.state(), ViewState::Live);
    }

    #[test]
    fn reconnect_asks_for_everything_after_highest_id() {
        let mut view = ConversationView::new(channel(), Uuid::from_u128(1), 2);
        view.apply_page(HistoryQuery::latest(2), vec![message(9), message(10)])
            .unwrap();

        view.transport_dropped();
        assert_eq!(view.state(), ViewState::Reconnecting);
        assert_eq!(view.next_query(), HistoryQuery::after(2, 10));

        // Full page: keep walking
        assert!(view.apply_page(HistoryQuery::after(2, 10), vec![message(11), message(12)]).unwrap());
        assert_eq!(view.next_query(), HistoryQuery::after(2, 12));
        // Gap closed; the latest page is refreshed before going live
        assert!(view.apply_page(HistoryQuery::after(2, 12), vec![message(13)]).unwrap());
        assert_eq!(view.state(), ViewState::Reconnecting);
        assert_eq!(view.next_query(), HistoryQuery::latest(2));
        assert!(!view.apply_page(HistoryQuery::latest(2), vec![message(12), message(13)]).unwrap());
        assert_eq!(view.state(), ViewState::Live);
    }

    #[test]
    fn reactions_missed_while_offline_arrive_with_the_refresh() {
        let owner = Uuid::from_u128(1);
        let bob = Uuid::from_u128(0xB);
        let mut view = ConversationView::new(channel(), owner, 50);
        view.apply_page(HistoryQuery::latest(50), (1..=10).map(message).collect())
            .unwrap();
        assert!(view.timeline().reactions(10).is_empty());

        // Bob reacts to 10 while we are offline; nothing newer is posted
        view.transport_dropped();
        let gap = view.next_query();
        assert_eq!(gap, HistoryQuery::after(50, 10));
        assert!(view.apply_page(gap, Vec::new()).unwrap());

        let refresh = view.next_query();
        assert_eq!(refresh, HistoryQuery::latest(50));
        let mut latest: Vec<Message> = (1..=10).map(message).collect();
        latest[9].reactions = vec![ReactionGroup {
            emoji: "👍".into(),
            count: 1,
            user_ids: vec![bob],
        }];
        assert!(!view.apply_page(refresh, latest).unwrap());

        assert_eq!(view.state(), ViewState::Live);
        let reactions = view.timeline().reactions(10);
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].user_ids, vec![bob]);
    }

    #[test]
    fn push_before_gap_fill_does_not_hide_the_gap() {
        let mut view = ConversationView::new(channel(), Uuid::from_u128(1), 50);
        view.apply_page(HistoryQuery::latest(50), (1..=10).map(message).collect())
            .unwrap();
        view.transport_dropped();

        // Resubscribed; 14 is pushed before the backfill request goes out
        view.timeline_mut().apply_message(message(14));
        let query = view.next_query();
        assert_eq!(query, HistoryQuery::after(50, 10));

        let more = view.apply_page(query, (11..=14).map(message).collect()).unwrap();
        assert!(more);
        assert_eq!(view.next_query(), HistoryQuery::latest(50));
        let ids: Vec<MessageId> = view.timeline().messages().map(|m| m.id).collect();
        assert_eq!(ids, (1..=14).collect::<Vec<_>>());
    }

    #[test]
    fn bad_page_rebuilds_from_scratch() {
        let mut view = ConversationView::new(channel(), Uuid::from_u128(1), 50);
        view.apply_page(HistoryQuery::latest(50), vec![message(1)]).unwrap();

        let mut stray = message(2);
        stray.conversation = ConversationKey::channel(Uuid::from_u128(99));
        let err = view.apply_page(HistoryQuery::latest(50), vec![stray]).unwrap_err();

        assert!(matches!(err, ClientError::CorruptState { .. }));
        assert_eq!(view.state(), ViewState::Loading);
        assert!(view.timeline().is_empty());
    }

    #[test]
    fn corrupt_cache_starts_empty() {
        let mut stray = message(4);
        stray.conversation = ConversationKey::channel(Uuid::from_u128(99));
        let view = ConversationView::restore(channel(), Uuid::from_u128(1), 50, vec![message(3), stray]);
        assert!(view.timeline().is_empty());

        let mut view = ConversationView::restore(channel(), Uuid::from_u128(1), 50, vec![message(3)]);
        assert_eq!(view.next_query(), HistoryQuery::after(50, 3));
        assert!(view.apply_page(HistoryQuery::after(50, 3), vec![message(4)]).unwrap());
        assert_eq!(view.next_query(), HistoryQuery::latest(50));
    }
}

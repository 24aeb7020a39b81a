//! User activity sources
//!
//! The monitor never reads host input directly. It subscribes to an
//! [`ActivitySource`] for the qualifying event kinds and receives
//! notifications through an [`ActivitySink`]:
//! - Pointer, keyboard, touch and scroll events count as presence
//! - Subscriptions are guards that unsubscribe when dropped
//! - [`ChannelActivitySource`] is an in-process hub hosts can push events into

use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Qualifying activity event kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Mouse or pen button pressed
    PointerDown,
    /// Mouse or pen moved
    PointerMove,
    /// Character key pressed
    KeyPress,
    /// Any key pressed
    KeyDown,
    /// Viewport scrolled
    Scroll,
    /// Finger touched the screen
    TouchStart,
    /// Click completed
    Click,
}

impl ActivityKind {
    /// Every qualifying kind, in the order listeners are registered
    pub const ALL: [ActivityKind; 7] = [
        ActivityKind::PointerDown,
        ActivityKind::PointerMove,
        ActivityKind::KeyPress,
        ActivityKind::KeyDown,
        ActivityKind::Scroll,
        ActivityKind::TouchStart,
        ActivityKind::Click,
    ];

    /// Host (DOM) event name for this kind
    pub fn event_name(&self) -> &'static str {
        match self {
            ActivityKind::PointerDown => "mousedown",
            ActivityKind::PointerMove => "mousemove",
            ActivityKind::KeyPress => "keypress",
            ActivityKind::KeyDown => "keydown",
            ActivityKind::Scroll => "scroll",
            ActivityKind::TouchStart => "touchstart",
            ActivityKind::Click => "click",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

impl FromStr for ActivityKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityKind::ALL
            .into_iter()
            .find(|kind| kind.event_name() == s)
            .ok_or_else(|| MonitorError::InvalidConfig(format!("Unknown activity event: {}", s)))
    }
}

/// Receiving end handed to an activity source on subscribe
#[derive(Debug, Clone)]
pub struct ActivitySink {
    tx: mpsc::UnboundedSender<ActivityKind>,
}

impl ActivitySink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ActivityKind>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver one activity event. Returns false once the monitor is gone.
    pub fn notify(&self, kind: ActivityKind) -> bool {
        self.tx.send(kind).is_ok()
    }

    /// Whether the monitor behind this sink has shut down
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Host input stream the monitor listens to
pub trait ActivitySource: Send + Sync {
    /// Register `sink` for the given kinds
    fn subscribe(&self, kinds: &[ActivityKind], sink: ActivitySink) -> Result<Uuid, MonitorError>;

    /// Remove a registration. Unknown ids are ignored.
    fn unsubscribe(&self, subscription_id: Uuid);
}

/// Live registration on an activity source. Unsubscribes on drop.
pub struct Subscription {
    id: Uuid,
    source: Arc<dyn ActivitySource>,
}

impl Subscription {
    /// Subscribe `sink` to `kinds` on `source`
    pub fn attach(
        source: Arc<dyn ActivitySource>,
        kinds: &[ActivityKind],
        sink: ActivitySink,
    ) -> Result<Self, MonitorError> {
        let id = source.subscribe(kinds, sink)?;
        debug!("Attached activity listeners {} for {} event kinds", id, kinds.len());
        Ok(Self { id, source })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
        debug!("Detached activity listeners {}", self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct Listener {
    kinds: Vec<ActivityKind>,
    sink: ActivitySink,
}

#[derive(Default)]
struct Hub {
    listeners: HashMap<Uuid, Listener>,
    closed: bool,
}

/// In-process activity hub
///
/// Hosts forward their input events with [`ChannelActivitySource::emit`].
/// After [`ChannelActivitySource::close`] new subscriptions fail, which is
/// how a host signals its event API is gone.
#[derive(Default)]
pub struct ChannelActivitySource {
    hub: Mutex<Hub>,
}

impl ChannelActivitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward one host event to every listener registered for its kind.
    /// Returns how many listeners received it.
    pub fn emit(&self, kind: ActivityKind) -> usize {
        let mut hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
        hub.listeners.retain(|_, listener| !listener.sink.is_closed());

        hub.listeners
            .values()
            .filter(|listener| listener.kinds.contains(&kind))
            .filter(|listener| listener.sink.notify(kind))
            .count()
    }

    /// Number of live registrations
    pub fn listener_count(&self) -> usize {
        self.hub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    /// Drop all listeners and refuse new ones
    pub fn close(&self) {
        let mut hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
        hub.closed = true;
        hub.listeners.clear();
    }
}

impl ActivitySource for ChannelActivitySource {
    fn subscribe(&self, kinds: &[ActivityKind], sink: ActivitySink) -> Result<Uuid, MonitorError> {
        let mut hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
        if hub.closed {
            return Err(MonitorError::ListenerAttach(
                "Activity source is closed".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        hub.listeners.insert(
            id,
            Listener {
                kinds: kinds.to_vec(),
                sink,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&self, subscription_id: Uuid) {
        self.hub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .remove(&subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("mousedown", ActivityKind::PointerDown)]
    #[case("mousemove", ActivityKind::PointerMove)]
    #[case("keypress", ActivityKind::KeyPress)]
    #[case("keydown", ActivityKind::KeyDown)]
    #[case("scroll", ActivityKind::Scroll)]
    #[case("touchstart", ActivityKind::TouchStart)]
    #[case("click", ActivityKind::Click)]
    fn test_event_names(#[case] name: &str, #[case] kind: ActivityKind) {
        assert_eq!(name.parse::<ActivityKind>().unwrap(), kind);
        assert_eq!(kind.to_string(), name);
    }

    #[test]
    fn test_unknown_event_name() {
        assert!(matches!(
            "resize".parse::<ActivityKind>(),
            Err(MonitorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_emit_respects_subscribed_kinds() {
        let source = Arc::new(ChannelActivitySource::new());
        let (sink, mut rx) = ActivitySink::channel();

        let subscription = Subscription::attach(
            source.clone(),
            &[ActivityKind::Click, ActivityKind::KeyDown],
            sink,
        )
        .unwrap();

        assert_eq!(source.emit(ActivityKind::Click), 1);
        assert_eq!(source.emit(ActivityKind::Scroll), 0);
        assert_eq!(rx.try_recv().unwrap(), ActivityKind::Click);
        assert!(rx.try_recv().is_err());

        drop(subscription);
        assert_eq!(source.listener_count(), 0);
        assert_eq!(source.emit(ActivityKind::Click), 0);
    }

    #[test]
    fn test_closed_receiver_is_pruned() {
        let source = ChannelActivitySource::new();
        let (sink, rx) = ActivitySink::channel();
        source.subscribe(&ActivityKind::ALL, sink).unwrap();
        drop(rx);

        assert_eq!(source.emit(ActivityKind::PointerMove), 0);
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn test_closed_source_refuses_listeners() {
        let source = ChannelActivitySource::new();
        source.close();
        let (sink, _rx) = ActivitySink::channel();

        assert!(matches!(
            source.subscribe(&ActivityKind::ALL, sink),
            Err(MonitorError::ListenerAttach(_))
        ));
    }
}

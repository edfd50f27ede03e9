//! Events dispatched to subscribers of a cell channel session.

use earshot_model::event::{
    ErrorReply, PeerDiff, Registered, ServerEvent, SignalDelivery, SignalDeliveryFailed,
};

/// An event from the cell, the session, or the peer selector.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// The cell accepted the register.
    Registered(Registered),
    /// The cell reported the in-range peer set.
    Peers(PeerDiff),
    /// Another player relayed a signaling payload to us.
    Signal(SignalDelivery),
    /// A signal we sent had no registered target.
    SignalDeliveryFailed(SignalDeliveryFailed),
    /// The cell couldn't honor a frame we sent.
    Error(ErrorReply),
    /// The peer selector decided to attach media to a peer.
    PeerConnect(String),
    /// The peer selector decided to drop media to a peer.
    PeerDisconnect(String),
    /// The channel closed, with the close code if one was received.
    Closed(Option<u16>),
}

impl From<ServerEvent> for Event {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Registered(registered) => Self::Registered(registered),
            ServerEvent::Peers(diff) => Self::Peers(diff),
            ServerEvent::Signal(delivery) => Self::Signal(delivery),
            ServerEvent::SignalDeliveryFailed(failed) => Self::SignalDeliveryFailed(failed),
            ServerEvent::Error(error) => Self::Error(error),
            // The server frame set is non-exhaustive; surface future frames
            // as errors rather than silently dropping them.
            other => Self::Error(ErrorReply::new(format!(
                "unsupported server frame: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Event;
    use earshot_model::event::{Registered, ServerEvent};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Event: Clone, Debug, PartialEq, Send, Sync);

    #[test]
    fn server_frames_map_onto_events() {
        let event = Event::from(ServerEvent::from(Registered::new("alice")));

        assert_eq!(Event::Registered(Registered::new("alice")), event);
    }
}

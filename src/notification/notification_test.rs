use super::*;
use crate::error::Result;

#[test]
fn test_association_change_state_from_u16() -> Result<()> {
    assert_eq!(
        AssociationChangeState::from(0),
        AssociationChangeState::CommUp
    );
    assert_eq!(
        AssociationChangeState::from(1),
        AssociationChangeState::CommLost
    );
    assert_eq!(
        AssociationChangeState::from(3),
        AssociationChangeState::ShutdownComplete
    );
    // unknown codes collapse to CommUp, the zero state
    assert_eq!(
        AssociationChangeState::from(99),
        AssociationChangeState::CommUp
    );

    Ok(())
}

#[test]
fn test_peer_address_change_state_from_u32() -> Result<()> {
    assert_eq!(
        PeerAddressChangeState::from(2),
        PeerAddressChangeState::Removed
    );
    assert_eq!(
        PeerAddressChangeState::from(4),
        PeerAddressChangeState::MadePrimary
    );
    assert_eq!(
        PeerAddressChangeState::from(77),
        PeerAddressChangeState::Available
    );

    Ok(())
}

#[test]
fn test_notification_display() -> Result<()> {
    let n = Notification::Shutdown(Shutdown { association_id: 3 });
    assert_eq!(n.to_string(), "Shutdown(assoc=3)");

    let n = Notification::AssociationChange(AssociationChange {
        state: AssociationChangeState::CommUp,
        error: 0,
        outbound_streams: 10,
        inbound_streams: 10,
        association_id: 1,
    });
    assert_eq!(n.to_string(), "AssociationChange(CommUp assoc=1)");

    Ok(())
}

#[test]
fn test_handler_verdicts() -> Result<()> {
    struct CountingHandler {
        seen: usize,
    }

    impl NotificationHandler for CountingHandler {
        fn handle_notification(&mut self, notification: Notification) -> HandlerResult {
            self.seen += 1;
            match notification {
                Notification::Shutdown(_) => HandlerResult::Return,
                _ => HandlerResult::Continue,
            }
        }
    }

    let mut h = CountingHandler { seen: 0 };
    let keep = h.handle_notification(Notification::SendFailed(SendFailed {
        error: 11,
        stream_identifier: 0,
        payload_protocol_identifier: 0,
        payload: Bytes::new(),
        association_id: 1,
    }));
    let stop = h.handle_notification(Notification::Shutdown(Shutdown { association_id: 1 }));

    assert_eq!(keep, HandlerResult::Continue);
    assert_eq!(stop, HandlerResult::Return);
    assert_eq!(h.seen, 2);

    Ok(())
}

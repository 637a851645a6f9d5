use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::sleep;

use super::*;
use crate::notification::{PeerAddressChange, PeerAddressChangeState};
use crate::socket::{pipe, PipeSctpSocket};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Active,
    Inactive,
    Message(SctpMessage),
    UserEvent(Notification),
}

struct RecordingPipeline {
    events: Mutex<Vec<Event>>,
}

impl RecordingPipeline {
    fn new() -> Arc<Self> {
        Arc::new(RecordingPipeline {
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    async fn wait_until<F>(&self, what: &str, f: F) -> Vec<Event>
    where
        F: Fn(&[Event]) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let events = self.events();
            if f(&events) {
                return events;
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting for {what}, saw {events:?}");
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl InboundPipeline for RecordingPipeline {
    fn channel_active(&self) {
        self.events.lock().unwrap().push(Event::Active);
    }

    fn channel_inactive(&self) {
        self.events.lock().unwrap().push(Event::Inactive);
    }

    fn message_received(&self, message: SctpMessage) {
        self.events.lock().unwrap().push(Event::Message(message));
    }

    fn user_event_triggered(&self, notification: Notification) {
        self.events
            .lock()
            .unwrap()
            .push(Event::UserEvent(notification));
    }
}

type Side = (SctpChannel, Arc<RecordingPipeline>, Arc<PipeSctpSocket>);

async fn connected_pair() -> (Side, Side) {
    let (sa, sb) = pipe();
    let (sa, sb) = (Arc::new(sa), Arc::new(sb));
    let a = SctpChannel::new("client", sa.clone() as Arc<dyn crate::socket::SctpSocket>);
    let b = SctpChannel::new("server", sb.clone() as Arc<dyn crate::socket::SctpSocket>);
    let (pa, pb) = (RecordingPipeline::new(), RecordingPipeline::new());
    for channel in [&a, &b] {
        channel
            .config()
            .set_so_timeout(Duration::from_millis(20))
            .unwrap();
    }
    a.register(pa.clone()).unwrap();
    b.register(pb.clone()).unwrap();
    a.connect(addr("127.0.0.1:5002"), None).await.unwrap();
    b.connect(addr("127.0.0.1:5001"), None).await.unwrap();
    ((a, pa, sa), (b, pb, sb))
}

fn message_position(events: &[Event], message: &SctpMessage) -> Option<usize> {
    events.iter().position(|e| match e {
        Event::Message(m) => m == message,
        _ => false,
    })
}

fn shutdown_position(events: &[Event]) -> Option<usize> {
    events.iter().position(|e| {
        matches!(e, Event::UserEvent(Notification::Shutdown(_)))
    })
}

#[tokio::test]
async fn test_loopback_message_round_trip() -> Result<()> {
    init_log();
    let ((a, pa, _), (_b, pb, _)) = connected_pair().await;

    let message = SctpMessage::with_metadata(2, 0xDEAD_BEEF, false, Bytes::from_static(&[1, 2, 3]));
    let write = a.write(message.clone());
    a.flush().await?;
    write.await?;

    let events = pb
        .wait_until("message delivery", |events| {
            message_position(events, &message).is_some()
        })
        .await;

    // the new association is announced before its first message
    let comm_up = events
        .iter()
        .position(|e| matches!(e, Event::UserEvent(Notification::AssociationChange(_))))
        .expect("association change event");
    let delivered = message_position(&events, &message).unwrap();
    assert!(comm_up < delivered);

    assert!(pa.events().contains(&Event::Active));
    assert!(a.is_active());

    Ok(())
}

#[tokio::test]
async fn test_shutdown_terminates_after_pending_messages() -> Result<()> {
    init_log();
    let ((a, _pa, _), (b, pb, _)) = connected_pair().await;

    let m1 = SctpMessage::new(0, Bytes::from_static(b"first"));
    let m2 = SctpMessage::new(0, Bytes::from_static(b"second"));
    let w1 = a.write(m1.clone());
    let w2 = a.write(m2.clone());
    a.flush().await?;
    w1.await?;
    w2.await?;
    a.close().await?;

    let events = pb
        .wait_until("peer shutdown", |events| {
            events.last() == Some(&Event::Inactive)
        })
        .await;

    let p1 = message_position(&events, &m1).expect("first message");
    let p2 = message_position(&events, &m2).expect("second message");
    let shutdown = shutdown_position(&events).expect("shutdown event");
    assert!(p1 < p2);
    assert!(p2 < shutdown, "messages of the turn precede the shutdown");
    assert_eq!(events.len(), shutdown + 2, "inactive directly follows");

    // the channel is closed; nothing further is produced
    assert_eq!(b.state(), ChannelState::Closed);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(pb.events().len(), events.len());

    Ok(())
}

#[tokio::test]
async fn test_connect_timeout_closes_channel() -> Result<()> {
    init_log();
    let socket = Arc::new(PipeSctpSocket::unconnectable());
    let channel = SctpChannel::new("timeout", socket.clone() as Arc<dyn crate::socket::SctpSocket>);
    channel.config().set_so_timeout(Duration::from_millis(20))?;
    channel
        .config()
        .set_connect_timeout(Duration::from_millis(100))?;
    channel.register(RecordingPipeline::new())?;

    let started = Instant::now();
    let result = channel.connect(addr("10.255.255.1:5000"), None).await;

    assert_eq!(result, Err(Error::ErrConnectTimeout));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(socket.is_closed());

    Ok(())
}

#[tokio::test]
async fn test_multi_homing_bind_and_unbind() -> Result<()> {
    let (sa, _sb) = pipe();
    let channel = SctpChannel::new("multihome", Arc::new(sa));
    channel.config().set_so_timeout(Duration::from_millis(20))?;
    channel.register(RecordingPipeline::new())?;

    let secondary = addr("127.0.0.2:9000");

    // a fresh channel has nothing to add addresses to
    assert_eq!(
        channel.bind_address(secondary).await,
        Err(Error::ErrChannelNotBound)
    );

    let primary = addr("127.0.0.1:9000");
    channel.bind(primary).await?;
    assert_eq!(channel.state(), ChannelState::Bound);

    channel.bind_address(secondary).await?;
    assert!(channel.all_local_addresses().contains(&secondary));

    channel.unbind_address(secondary).await?;
    assert!(!channel.all_local_addresses().contains(&secondary));

    Ok(())
}

#[tokio::test]
async fn test_off_loop_submission_preserves_order() -> Result<()> {
    let (sa, _sb) = pipe();
    let sa = Arc::new(sa);
    let channel = SctpChannel::new("offloop", sa.clone() as Arc<dyn crate::socket::SctpSocket>);
    channel.config().set_so_timeout(Duration::from_millis(20))?;
    channel.register(RecordingPipeline::new())?;

    let primary = addr("127.0.0.1:9100");
    channel.bind(primary).await?;

    let a1 = addr("127.0.0.2:9100");
    let a2 = addr("127.0.0.3:9100");
    let submitter = channel.clone();
    let (f1, f2) = std::thread::spawn(move || {
        let f1 = submitter.bind_address(a1);
        let f2 = submitter.bind_address(a2);
        (f1, f2)
    })
    .join()
    .unwrap();

    f1.await?;
    f2.await?;

    assert_eq!(sa.local_addresses()?, vec![primary, a1, a2]);

    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_terminal() -> Result<()> {
    let ((a, pa, sa), _peer) = connected_pair().await;

    a.close().await?;
    a.close().await?;
    a.disconnect().await?;

    assert_eq!(a.state(), ChannelState::Closed);
    assert!(sa.is_closed());
    assert!(!a.is_active());

    // every further operation fails without touching the socket
    assert_eq!(
        a.bind(addr("127.0.0.1:9200")).await,
        Err(Error::ErrChannelClosed)
    );
    assert_eq!(
        a.write(SctpMessage::new(0, Bytes::from_static(b"x"))).await,
        Err(Error::ErrChannelClosed)
    );
    assert_eq!(a.flush().await, Err(Error::ErrChannelClosed));

    let inactive = pa
        .events()
        .iter()
        .filter(|e| **e == Event::Inactive)
        .count();
    assert_eq!(inactive, 1);

    Ok(())
}

#[tokio::test]
async fn test_read_suspension_pauses_delivery() -> Result<()> {
    let ((a, _pa, _), (b, pb, _)) = connected_pair().await;

    b.set_read_suspended(true);
    // let any in-flight bounded read turn drain before the write lands
    sleep(Duration::from_millis(60)).await;

    let message = SctpMessage::new(1, Bytes::from_static(b"suspended"));
    let write = a.write(message.clone());
    a.flush().await?;
    write.await?;

    sleep(Duration::from_millis(150)).await;
    assert!(
        message_position(&pb.events(), &message).is_none(),
        "no delivery while suspended"
    );

    b.set_read_suspended(false);
    pb.wait_until("resumed delivery", |events| {
        message_position(events, &message).is_some()
    })
    .await;

    Ok(())
}

#[tokio::test]
async fn test_write_rejects_out_of_range_stream() -> Result<()> {
    let ((a, _pa, _), _peer) = connected_pair().await;

    // the pipe association negotiates 10 outbound streams
    let message = SctpMessage::new(10, Bytes::from_static(b"x"));
    let write = a.write(message);
    a.flush().await?;

    assert_eq!(
        write.await,
        Err(Error::ErrStreamIdentifierOutOfRange {
            stream_identifier: 10,
            outbound_streams: 10,
        })
    );

    Ok(())
}

#[tokio::test]
async fn test_deregister_stops_loop_without_closing_socket() -> Result<()> {
    let (sa, _sb) = pipe();
    let sa = Arc::new(sa);
    let channel = SctpChannel::new("dereg", sa.clone() as Arc<dyn crate::socket::SctpSocket>);
    channel.config().set_so_timeout(Duration::from_millis(20))?;
    channel.register(RecordingPipeline::new())?;

    channel.deregister().await?;

    assert_eq!(
        channel.bind(addr("127.0.0.1:9300")).await,
        Err(Error::ErrChannelClosed)
    );
    assert!(!sa.is_closed());

    Ok(())
}

#[tokio::test]
async fn test_send_file_is_refused() -> Result<()> {
    let (sa, _sb) = pipe();
    let channel = SctpChannel::new("sendfile", Arc::new(sa));
    channel.register(RecordingPipeline::new())?;

    let path = std::env::temp_dir().join("sctp-channel-send-file-test");
    let file = std::fs::File::create(&path).unwrap();
    let region = FileRegion {
        file: Arc::new(file),
        position: 0,
        count: 0,
    };

    assert!(matches!(
        channel.send_file(region).await,
        Err(Error::ErrUnsupportedOperation { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_injected_notification_is_published() -> Result<()> {
    let (_side_a, (b, pb, sb)) = connected_pair().await;

    let notification = Notification::PeerAddressChange(PeerAddressChange {
        address: addr("127.0.0.2:0"),
        state: PeerAddressChangeState::Added,
        error: 0,
        association_id: sb.association_id(),
    });
    sb.push_notification(notification.clone());

    pb.wait_until("peer address change", |events| {
        events.contains(&Event::UserEvent(notification.clone()))
    })
    .await;

    // a non-terminal notification keeps the channel open
    assert_eq!(b.state(), ChannelState::Connected);

    Ok(())
}

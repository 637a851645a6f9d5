use super::*;
use crate::error::Result;

fn test_association() -> Association {
    Association {
        association_id: 7,
        inbound_streams: 10,
        outbound_streams: 10,
    }
}

#[test]
fn test_message_accessors() -> Result<()> {
    let m = SctpMessage::with_metadata(2, 0xDEAD_BEEF, true, Bytes::from_static(b"abc"));

    assert_eq!(m.stream_identifier(), 2);
    assert_eq!(m.payload_protocol_identifier(), 0xDEAD_BEEF);
    assert!(m.is_unordered());
    assert_eq!(m.payload().as_ref(), b"abc");

    Ok(())
}

#[test]
fn test_message_defaults_to_ordered_ppid_zero() -> Result<()> {
    let m = SctpMessage::new(0, Bytes::from_static(b"ping"));

    assert_eq!(m.payload_protocol_identifier(), 0);
    assert!(!m.is_unordered());

    Ok(())
}

#[test]
fn test_message_clone_is_cheap_and_equal() -> Result<()> {
    let m = SctpMessage::with_metadata(1, 42, false, Bytes::from_static(b"payload"));
    let c = m.clone();

    assert_eq!(m, c);

    Ok(())
}

#[test]
fn test_message_info_carries_metadata() -> Result<()> {
    let m = SctpMessage::with_metadata(3, 99, true, Bytes::from_static(b"x"));
    let info = MessageInfo::new(test_association(), &m);

    assert_eq!(info.stream_identifier, 3);
    assert_eq!(info.payload_protocol_identifier, 99);
    assert!(info.unordered);
    assert_eq!(info.destination, None);
    assert_eq!(info.association.association_id, 7);

    Ok(())
}

#[test]
fn test_message_from_receive() -> Result<()> {
    let info = ReceiveInfo {
        message_length: 3,
        stream_identifier: 5,
        payload_protocol_identifier: 46,
        unordered: false,
    };
    let m = SctpMessage::from_receive(Bytes::from_static(b"abc"), &info);

    assert_eq!(m.stream_identifier(), 5);
    assert_eq!(m.payload_protocol_identifier(), 46);
    assert!(!m.is_unordered());
    assert_eq!(m.payload().len(), info.message_length);

    Ok(())
}

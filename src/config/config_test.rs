use std::sync::Arc;

use super::*;
use crate::error::Error;
use crate::socket::pipe;

#[test]
fn test_deferred_options_flush_on_assign() -> Result<()> {
    let config = SctpChannelConfig::deferred();
    assert!(!config.is_assigned());

    config.set_option(ChannelOption::Rcvbuf, OptionValue::Size(65536))?;
    config.set_option(ChannelOption::ReuseAddress, OptionValue::Flag(true))?;

    // pending values are readable before a socket exists
    assert_eq!(
        config.get_option(ChannelOption::Rcvbuf)?,
        OptionValue::Size(65536)
    );

    let (socket, _peer) = pipe();
    let socket = Arc::new(socket);
    config.assign(socket.clone())?;

    assert!(config.is_assigned());
    assert_eq!(
        socket.get_option(ChannelOption::Rcvbuf)?,
        OptionValue::Size(65536)
    );
    assert_eq!(
        socket.get_option(ChannelOption::ReuseAddress)?,
        OptionValue::Flag(true)
    );

    Ok(())
}

#[test]
fn test_second_assign_is_a_no_op() -> Result<()> {
    let config = SctpChannelConfig::deferred();
    config.set_option(ChannelOption::Rcvbuf, OptionValue::Size(65536))?;

    let (first, _peer1) = pipe();
    let first = Arc::new(first);
    config.assign(first.clone())?;

    let (second, _peer2) = pipe();
    let second = Arc::new(second);
    config.assign(second.clone())?;

    // nothing was drained into the second socket
    assert_eq!(
        second.get_option(ChannelOption::Rcvbuf)?,
        default_value(ChannelOption::Rcvbuf)
    );

    Ok(())
}

#[test]
fn test_set_option_writes_through_after_assign() -> Result<()> {
    let (socket, _peer) = pipe();
    let socket = Arc::new(socket);
    let config = SctpChannelConfig::attached(socket.clone());

    config.set_option(ChannelOption::Sndbuf, OptionValue::Size(8192))?;

    assert_eq!(
        socket.get_option(ChannelOption::Sndbuf)?,
        OptionValue::Size(8192)
    );

    Ok(())
}

#[test]
fn test_unknown_option_is_rejected() -> Result<()> {
    let config = SctpChannelConfig::deferred();

    // backlog belongs to server channels
    assert!(matches!(
        config.get_option(ChannelOption::Backlog),
        Err(Error::ErrUnknownOption { .. })
    ));
    assert!(matches!(
        config.set_option(ChannelOption::Backlog, OptionValue::Size(16)),
        Err(Error::ErrUnknownOption { .. })
    ));

    Ok(())
}

#[test]
fn test_invalid_option_values_are_rejected() -> Result<()> {
    let config = SctpChannelConfig::deferred();

    assert!(matches!(
        config.set_receive_buffer_size(0),
        Err(Error::ErrInvalidOption { .. })
    ));
    assert!(matches!(
        config.set_write_spin_count(0),
        Err(Error::ErrInvalidOption { .. })
    ));
    // type mismatch
    assert!(matches!(
        config.set_option(ChannelOption::Rcvbuf, OptionValue::Flag(true)),
        Err(Error::ErrInvalidOption { .. })
    ));

    Ok(())
}

#[test]
fn test_get_options_covers_every_known_key() -> Result<()> {
    let config = SctpChannelConfig::deferred();
    let options = config.get_options();

    assert_eq!(options.len(), CHANNEL_OPTIONS.len());
    for key in CHANNEL_OPTIONS {
        assert!(options.contains_key(key), "missing {key}");
    }
    assert_eq!(
        options[&ChannelOption::SoTimeout],
        OptionValue::Millis(DEFAULT_SO_TIMEOUT_MILLIS)
    );

    Ok(())
}

#[test]
fn test_typed_accessors_round_trip() -> Result<()> {
    let config = SctpChannelConfig::deferred();

    config.set_so_timeout(Duration::from_millis(20))?;
    assert_eq!(config.so_timeout(), Duration::from_millis(20));

    config.set_connect_timeout(Duration::from_millis(100))?;
    assert_eq!(config.connect_timeout(), Duration::from_millis(100));

    config.set_write_spin_count(4)?;
    assert_eq!(config.write_spin_count(), 4);

    config.set_init_max_streams(InitMaxStreams {
        max_in_streams: 5,
        max_out_streams: 7,
    })?;
    assert_eq!(
        config.get_option(ChannelOption::InitMaxStreams)?,
        OptionValue::Streams(InitMaxStreams {
            max_in_streams: 5,
            max_out_streams: 7,
        })
    );

    Ok(())
}

#[test]
fn test_server_config_backlog() -> Result<()> {
    let config = SctpServerChannelConfig::deferred();

    assert!(matches!(
        config.set_backlog(-1),
        Err(Error::ErrInvalidOption { .. })
    ));

    config.set_backlog(256)?;
    assert_eq!(config.backlog(), 256);

    let (socket, _peer) = pipe();
    config.assign(Arc::new(socket))?;
    assert!(config.is_assigned());

    Ok(())
}

#[test]
fn test_server_config_refuses_performance_preferences() -> Result<()> {
    let config = SctpServerChannelConfig::deferred();

    assert!(matches!(
        config.set_performance_preferences(1, 0, 2),
        Err(Error::ErrUnsupportedOperation { .. })
    ));

    Ok(())
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::channel::ChannelState;
use crate::error::Result;
use crate::socket::pipe;

struct NullPipeline;

impl InboundPipeline for NullPipeline {
    fn channel_active(&self) {}
    fn channel_inactive(&self) {}
    fn message_received(&self, _message: SctpMessage) {}
    fn user_event_triggered(&self, _notification: Notification) {}
}

fn test_channel(name: &str) -> SctpChannel {
    let (socket, _peer) = pipe();
    let channel = SctpChannel::new(name, Arc::new(socket));
    channel
        .config()
        .set_so_timeout(Duration::from_millis(20))
        .unwrap();
    channel.register(Arc::new(NullPipeline)).unwrap();
    channel
}

/// Records traversal, then forwards, keeping every default.
struct TracingHandler {
    tag: &'static str,
    trace: Arc<Mutex<Vec<&'static str>>>,
}

impl OutboundHandler for TracingHandler {
    fn bind(&self, ctx: &HandlerContext<'_>, addr: std::net::SocketAddr) -> ChannelFuture {
        self.trace.lock().unwrap().push(self.tag);
        ctx.bind(addr)
    }
}

struct PassThroughHandler;

impl OutboundHandler for PassThroughHandler {}

/// Buffers writes but forgets to shadow `flush`.
struct ForgetfulBufferingHandler;

impl OutboundHandler for ForgetfulBufferingHandler {
    fn buffers_writes(&self) -> bool {
        true
    }
}

/// Buffers writes and shadows `flush` as the contract demands.
struct FlushingBufferingHandler;

impl OutboundHandler for FlushingBufferingHandler {
    fn buffers_writes(&self) -> bool {
        true
    }

    fn flush(&self, ctx: &HandlerContext<'_>) -> ChannelFuture {
        // release buffered writes, then forward
        ctx.flush()
    }
}

#[tokio::test]
async fn test_outbound_operations_traverse_head_to_tail() -> Result<()> {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = OutboundPipeline::new(test_channel("traversal"));
    pipeline.add_last(Arc::new(TracingHandler {
        tag: "first",
        trace: trace.clone(),
    }));
    pipeline.add_last(Arc::new(TracingHandler {
        tag: "second",
        trace: trace.clone(),
    }));

    pipeline.bind("127.0.0.1:9400".parse().unwrap()).await?;

    assert_eq!(*trace.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(pipeline.channel().state(), ChannelState::Bound);

    Ok(())
}

#[tokio::test]
async fn test_pass_through_defaults_reach_the_channel() -> Result<()> {
    let mut pipeline = OutboundPipeline::new(test_channel("passthrough"));
    pipeline.add_last(Arc::new(PassThroughHandler));

    pipeline.bind("127.0.0.1:9401".parse().unwrap()).await?;
    pipeline.flush().await?;
    pipeline.close().await?;

    assert_eq!(pipeline.channel().state(), ChannelState::Closed);

    Ok(())
}

#[tokio::test]
async fn test_unoverridden_flush_on_buffering_handler_fails() -> Result<()> {
    let mut pipeline = OutboundPipeline::new(test_channel("forgetful"));
    pipeline.add_last(Arc::new(ForgetfulBufferingHandler));

    assert_eq!(pipeline.flush().await, Err(Error::ErrFlushNotOverridden));

    Ok(())
}

#[tokio::test]
async fn test_overridden_flush_on_buffering_handler_forwards() -> Result<()> {
    let mut pipeline = OutboundPipeline::new(test_channel("flushing"));
    pipeline.add_last(Arc::new(FlushingBufferingHandler));

    pipeline.flush().await?;

    Ok(())
}

#[tokio::test]
async fn test_send_file_is_refused_at_the_tail() -> Result<()> {
    let mut pipeline = OutboundPipeline::new(test_channel("sendfile"));
    pipeline.add_last(Arc::new(PassThroughHandler));

    let path = std::env::temp_dir().join("sctp-channel-handler-send-file-test");
    let file = std::fs::File::create(&path).unwrap();
    let region = FileRegion {
        file: Arc::new(file),
        position: 0,
        count: 16,
    };

    assert!(matches!(
        pipeline.send_file(region).await,
        Err(Error::ErrUnsupportedOperation { .. })
    ));

    Ok(())
}

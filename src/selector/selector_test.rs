use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::Result;
use crate::notification::{Notification, Shutdown};
use crate::socket::pipe;

#[tokio::test]
async fn test_selector_times_out_with_zero_keys() -> Result<()> {
    let (a, _b) = pipe();
    let selector = Selector::new(Arc::new(a), SelectorOp::Read);

    let selected = selector.select(Duration::from_millis(20)).await?;

    assert_eq!(selected, 0);
    assert_eq!(selector.selected_keys(), 0);

    Ok(())
}

#[tokio::test]
async fn test_selector_reports_readiness() -> Result<()> {
    let (a, _b) = pipe();
    let a = Arc::new(a);
    a.push_notification(Notification::Shutdown(Shutdown { association_id: 1 }));
    let selector = Selector::new(Arc::clone(&a) as Arc<dyn crate::socket::SctpSocket>, SelectorOp::Read);

    let selected = selector.select(Duration::from_millis(100)).await?;

    assert_eq!(selected, 1);
    assert_eq!(selector.selected_keys(), 1);

    selector.clear_selected();
    assert_eq!(selector.selected_keys(), 0);

    Ok(())
}

#[tokio::test]
async fn test_selector_write_dimension_is_independent() -> Result<()> {
    // nothing readable, but the write dimension reports ready
    let (a, _b) = pipe();
    let a = Arc::new(a);
    let read = Selector::new(Arc::clone(&a) as Arc<dyn crate::socket::SctpSocket>, SelectorOp::Read);
    let write = Selector::new(a, SelectorOp::Write);

    assert_eq!(read.select(Duration::from_millis(20)).await?, 0);
    assert_eq!(write.select(Duration::from_millis(20)).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_selector_close_is_idempotent() -> Result<()> {
    let (a, _b) = pipe();
    let a = Arc::new(a);
    a.push_notification(Notification::Shutdown(Shutdown { association_id: 1 }));
    let selector = Selector::new(a, SelectorOp::Read);

    assert!(selector.close()?, "first close performs the close");
    assert!(!selector.close()?, "second close is a no-op");
    assert!(!selector.is_open());

    // a closed selector never selects, even with input pending
    let selected = selector.select(Duration::from_millis(20)).await?;
    assert_eq!(selected, 0);

    Ok(())
}

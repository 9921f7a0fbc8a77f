//! Docker 이벤트 감시와 주기적 재동기화
//!
//! 두 루프 모두 디바운서 채널로 트리거만 보냅니다. 이벤트 내용은 해석하지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dockroute_core::metrics as m;

use crate::debounce::{DebounceHandle, Trigger};
use crate::docker::{DirectoryClient, EventStream};

/// 이미 구독한 이벤트 스트림 `events`를 읽어 이벤트마다 트리거를 보냅니다.
///
/// 스트림이 에러를 내거나 종료되면 `reconnect`만큼 대기한 뒤 재구독하고,
/// 그 사이 놓친 이벤트를 반영하도록 [`Trigger::Reconnect`]를 한 번 보냅니다.
pub async fn watch_events<D: DirectoryClient>(
    docker: Arc<D>,
    mut events: EventStream,
    handle: DebounceHandle,
    reconnect: Duration,
    cancel: CancellationToken,
) {
    info!("watching docker events");

    loop {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("event watcher cancelled");
                    return;
                }
                item = events.next() => match item {
                    Some(Ok(event)) => {
                        counter!(m::REGISTRY_EVENTS_TOTAL).increment(1);
                        debug!(
                            kind = %event.kind,
                            action = %event.action,
                            actor_id = %event.actor_id,
                            "docker event received"
                        );
                        handle.notify(Trigger::Event(event));
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "docker event stream failed");
                        break;
                    }
                    None => {
                        warn!("docker event stream ended");
                        break;
                    }
                },
            }
        }

        debug!(backoff_secs = reconnect.as_secs(), "waiting before re-subscribing");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect) => {}
        }

        events = docker.subscribe_events();
        info!("re-subscribed to docker events");
        handle.notify(Trigger::Reconnect);
    }
}

/// 주기적으로 [`Trigger::Resync`]를 보냅니다. 첫 틱은 `interval` 이후입니다.
pub async fn resync_loop(handle: DebounceHandle, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                debug!("periodic resync");
                handle.notify(Trigger::Resync);
            }
        }
    }
}

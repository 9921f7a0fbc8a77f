//! 재구성 트리거 디바운서
//!
//! 하나의 전용 태스크가 타이머를 소유하고 mpsc 채널로 트리거를 받습니다.
//! 유휴 상태에서 첫 트리거가 고정 길이 윈도우를 시작하고, 윈도우 안에 도착한
//! 트리거는 윈도우를 연장하지 않습니다. 윈도우가 끝나면 정확히 한 번 발화한 뒤
//! 다시 유휴 상태로 돌아갑니다.
//!
//! ```text
//! t=0 event ──┐ window opens
//! t=2 event   │ (coalesced)
//! t=9 event   │ (coalesced)
//! t=10 ───────┘ fire once -> idle
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::docker::DirectoryEvent;

/// 재구성 요청 원인 (로깅 용도로만 사용)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Docker 라이프사이클 이벤트
    Event(DirectoryEvent),
    /// 주기적 재동기화
    Resync,
    /// 이벤트 스트림 재연결 (놓친 이벤트가 있을 수 있음)
    Reconnect,
    /// 운영자 요청
    Manual,
}

/// 디바운서로 트리거를 보내는 핸들
#[derive(Clone, Debug)]
pub struct DebounceHandle {
    tx: mpsc::Sender<Trigger>,
}

impl DebounceHandle {
    /// 트리거를 보냅니다. 블로킹하지 않습니다.
    ///
    /// 채널이 가득 찬 경우 이미 대기 중인 트리거가 있으므로 버립니다.
    pub fn notify(&self, trigger: Trigger) {
        match self.tx.try_send(trigger) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                trace!(trigger = ?dropped, "debounce channel full, trigger dropped");
            }
            Err(TrySendError::Closed(dropped)) => {
                debug!(trigger = ?dropped, "debouncer stopped, trigger ignored");
            }
        }
    }
}

/// 트리거 채널을 생성합니다.
pub fn trigger_channel(capacity: usize) -> (DebounceHandle, mpsc::Receiver<Trigger>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DebounceHandle { tx }, rx)
}

/// 디바운서 루프를 실행합니다.
///
/// `cancel`이 취소되거나 모든 핸들이 드롭되면 종료합니다. 윈도우가 열린 상태에서
/// 핸들이 모두 드롭되면 윈도우 종료를 기다려 마지막으로 한 번 발화합니다.
pub async fn run_debouncer<F, Fut>(
    mut rx: mpsc::Receiver<Trigger>,
    window: Duration,
    cancel: CancellationToken,
    mut on_fire: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        // 유휴: 첫 트리거 대기
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            trigger = rx.recv() => match trigger {
                Some(trigger) => trigger,
                None => {
                    debug!("all debounce handles dropped, debouncer exiting");
                    return;
                }
            },
        };
        debug!(trigger = ?first, window_secs = window.as_secs_f64(), "debounce window opened");

        let deadline = tokio::time::Instant::now() + window;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut coalesced = 0usize;
        let mut closed = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut sleep => break,
                trigger = rx.recv(), if !closed => match trigger {
                    Some(trigger) => {
                        coalesced += 1;
                        trace!(trigger = ?trigger, "trigger coalesced into open window");
                    }
                    None => closed = true,
                },
            }
        }

        debug!(coalesced, "debounce window elapsed, firing");
        on_fire().await;

        if closed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    type FireLog = Arc<Mutex<Vec<Instant>>>;

    fn spawn_recording(
        window: Duration,
        cancel: CancellationToken,
    ) -> (DebounceHandle, FireLog, tokio::task::JoinHandle<()>) {
        let (handle, rx) = trigger_channel(16);
        let fires: FireLog = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&fires);
        let task = tokio::spawn(run_debouncer(rx, window, cancel, move || {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(Instant::now());
            }
        }));
        (handle, fires, task)
    }

    fn resync() -> Trigger {
        Trigger::Resync
    }

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once_at_window_end() {
        let cancel = CancellationToken::new();
        let (handle, fires, task) = spawn_recording(Duration::from_secs(10), cancel.clone());
        let start = Instant::now();

        handle.notify(resync());
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.notify(resync());
        tokio::time::sleep(Duration::from_secs(7)).await;
        handle.notify(resync());

        // t=9.5: 아직 발화 전
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fires.lock().unwrap().is_empty());

        // t=12: 정확히 한 번, t=10에 발화
        tokio::time::sleep(Duration::from_millis(2500)).await;
        {
            let fires = fires.lock().unwrap();
            assert_eq!(fires.len(), 1);
            assert_eq!(fires[0].duration_since(start), Duration::from_secs(10));
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn next_event_after_fire_opens_new_window() {
        let cancel = CancellationToken::new();
        let (handle, fires, task) = spawn_recording(Duration::from_secs(10), cancel.clone());
        let start = Instant::now();

        handle.notify(resync());
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.notify(resync());
        tokio::time::sleep(Duration::from_secs(11)).await;

        {
            let fires = fires.lock().unwrap();
            assert_eq!(fires.len(), 2);
            assert_eq!(fires[1].duration_since(start), Duration::from_secs(21));
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_trigger_means_no_fire() {
        let cancel = CancellationToken::new();
        let (_handle, fires, task) = spawn_recording(Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(fires.lock().unwrap().is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_inside_window_suppresses_fire() {
        let cancel = CancellationToken::new();
        let (handle, fires, task) = spawn_recording(Duration::from_secs(10), cancel.clone());

        handle.notify(resync());
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(fires.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_flushes_open_window() {
        let cancel = CancellationToken::new();
        let (handle, fires, task) = spawn_recording(Duration::from_secs(10), cancel);

        handle.notify(resync());
        drop(handle);
        task.await.unwrap();

        assert_eq!(fires.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notify_on_full_channel_does_not_block() {
        let (handle, mut rx) = trigger_channel(1);
        handle.notify(Trigger::Manual);
        handle.notify(Trigger::Resync);
        assert_eq!(rx.recv().await, Some(Trigger::Manual));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_after_debouncer_exit_is_ignored() {
        let (handle, rx) = trigger_channel(4);
        drop(rx);
        handle.notify(Trigger::Reconnect);
    }
}

//! `StatusWatcher` — on-chain relationship status mirror.
//!
//! Polls the relationship contract for one wallet on a fixed interval and
//! on demand (a `StatusUpdated` log arriving upstream is forwarded as
//! [`WatchCmd::Refresh`]), and pushes a [`StatusEvent`] whenever the observed
//! relationship changes.
//!
//! Chain calls are blocking, so the watcher runs on a **dedicated OS thread**
//! and talks to async callers over `tokio::sync::mpsc` channels.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chain::{ObservedStatus, RelationshipChain, resolve_relationship};
use crate::contract::normalize_wallet;

/// Longest the thread sleeps between command checks.
const MAX_TICK: Duration = Duration::from_millis(100);

// ── Public types ────────────────────────────────────────────────────

/// Commands sent to the watcher thread.
#[derive(Debug)]
pub enum WatchCmd {
    /// Refetch now.
    Refresh,
    /// Change the partner used for the `isPartner` fallback and refetch.
    SetPartnerHint(Option<String>),
    Shutdown,
}

/// Events emitted by the watcher thread.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// The wallet's relationship, first seen or changed.
    Observed(ObservedStatus),
    /// The wallet has no relationship on chain (any more).
    Cleared { wallet: String },
    /// A fetch failed; the last observation stands.
    Error { wallet: String, message: String },
}

impl StatusEvent {
    /// Wallet of the watcher that emitted the event.
    pub fn wallet(&self) -> &str {
        match self {
            StatusEvent::Observed(o) => &o.wallet,
            StatusEvent::Cleared { wallet } | StatusEvent::Error { wallet, .. } => wallet,
        }
    }
}

/// Configuration for the status watcher.
#[derive(Debug, Clone)]
pub struct StatusWatcherConfig {
    pub wallet: String,
    pub partner_hint: Option<String>,
    /// Poll interval (default: 5s).
    pub poll_interval: Duration,
}

impl StatusWatcherConfig {
    pub fn new(wallet: &str) -> Self {
        Self {
            wallet: normalize_wallet(wallet),
            partner_hint: None,
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_partner_hint(mut self, partner: &str) -> Self {
        self.partner_hint = Some(normalize_wallet(partner));
        self
    }
}

/// Handle for sending commands to a running watcher thread.
#[derive(Clone)]
pub struct StatusWatcherHandle {
    cmd_tx: tokio::sync::mpsc::UnboundedSender<WatchCmd>,
}

impl StatusWatcherHandle {
    /// Refetch immediately, e.g. on a `StatusUpdated` log.
    pub fn refresh(&self) {
        let _ = self.cmd_tx.send(WatchCmd::Refresh);
    }

    pub fn set_partner_hint(&self, partner: Option<&str>) {
        let _ = self
            .cmd_tx
            .send(WatchCmd::SetPartnerHint(partner.map(normalize_wallet)));
    }

    /// Shut down the watcher thread.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(WatchCmd::Shutdown);
    }
}

// ── Spawn ───────────────────────────────────────────────────────────

/// Spawn the status watcher on a dedicated OS thread.
///
/// Returns a handle for sending commands, and a receiver for status events.
/// The thread exits on [`WatchCmd::Shutdown`], when every handle is dropped,
/// or when the event receiver is dropped.
pub fn spawn_status_watcher<C: RelationshipChain>(
    chain: Arc<C>,
    config: StatusWatcherConfig,
) -> std::io::Result<(
    StatusWatcherHandle,
    tokio::sync::mpsc::UnboundedReceiver<StatusEvent>,
)> {
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("status-watcher".into())
        .spawn(move || watcher_thread_main(chain, config, cmd_rx, event_tx))?;

    Ok((StatusWatcherHandle { cmd_tx }, event_rx))
}

/// Main loop of the watcher thread.
fn watcher_thread_main<C: RelationshipChain>(
    chain: Arc<C>,
    config: StatusWatcherConfig,
    mut cmd_rx: tokio::sync::mpsc::UnboundedReceiver<WatchCmd>,
    event_tx: tokio::sync::mpsc::UnboundedSender<StatusEvent>,
) {
    let mut partner_hint = config.partner_hint;
    // `None` until the first successful fetch.
    let mut last: Option<Option<ObservedStatus>> = None;
    let mut next_poll = Instant::now();
    let tick = config.poll_interval.min(MAX_TICK);

    log::info!("status_watcher: watching {}", config.wallet);

    loop {
        // 1. Drain pending commands
        let mut refresh = false;
        loop {
            match cmd_rx.try_recv() {
                Ok(WatchCmd::Refresh) => refresh = true,
                Ok(WatchCmd::SetPartnerHint(hint)) => {
                    log::debug!("status_watcher: partner hint now {hint:?}");
                    partner_hint = hint;
                    refresh = true;
                }
                Ok(WatchCmd::Shutdown) => {
                    log::info!("status_watcher: shutting down");
                    return;
                }
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                    log::info!("status_watcher: command channel closed, shutting down");
                    return;
                }
            }
        }

        // 2. Fetch when due or asked to
        if refresh || Instant::now() >= next_poll {
            next_poll = Instant::now() + config.poll_interval;

            let event = match resolve_relationship(
                chain.as_ref(),
                &config.wallet,
                partner_hint.as_deref(),
            ) {
                Ok(observed) if last.as_ref() == Some(&observed) => None,
                Ok(observed) => {
                    let event = match &observed {
                        Some(o) => {
                            log::debug!(
                                "status_watcher: token {} is {}",
                                o.token_id,
                                o.status
                            );
                            StatusEvent::Observed(o.clone())
                        }
                        None => StatusEvent::Cleared {
                            wallet: config.wallet.clone(),
                        },
                    };
                    last = Some(observed);
                    Some(event)
                }
                Err(e) => {
                    log::warn!("status_watcher: fetch failed: {e}");
                    Some(StatusEvent::Error {
                        wallet: config.wallet.clone(),
                        message: e.to_string(),
                    })
                }
            };

            if let Some(event) = event {
                if event_tx.send(event).is_err() {
                    log::info!("status_watcher: event receiver dropped, shutting down");
                    return;
                }
            }
        }

        // 3. Sleep before next check
        std::thread::sleep(tick);
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ZERO_ADDRESS;
    use crate::status::OnChainStatus;
    use crate::testing::{ALICE, BOB, MockChain};

    async fn next_event(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<StatusEvent>,
    ) -> StatusEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher event in time")
            .expect("watcher alive")
    }

    fn fast_config(wallet: &str) -> StatusWatcherConfig {
        StatusWatcherConfig {
            poll_interval: Duration::from_millis(20),
            ..StatusWatcherConfig::new(wallet)
        }
    }

    #[test]
    fn config_defaults() {
        let cfg = StatusWatcherConfig::new("0xABC");
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.wallet, "0xabc");
        assert!(cfg.partner_hint.is_none());
        assert_eq!(
            cfg.with_partner_hint("0xDEF").partner_hint.as_deref(),
            Some("0xdef")
        );
    }

    #[test]
    fn handle_clone_and_send() {
        fn assert_clone_send<T: Clone + Send>() {}
        assert_clone_send::<StatusWatcherHandle>();
    }

    #[tokio::test]
    async fn emits_only_on_change() {
        let chain = Arc::new(MockChain::new());
        let token = chain
            .start_relationship(ALICE, BOB, ZERO_ADDRESS, "100")
            .unwrap();

        let (handle, mut rx) = spawn_status_watcher(chain.clone(), fast_config(ALICE)).unwrap();
        match next_event(&mut rx).await {
            StatusEvent::Observed(o) => {
                assert_eq!(o.wallet, ALICE);
                assert_eq!(o.token_id, token);
                assert_eq!(o.status, OnChainStatus::Dating);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Several polls pass without a change and without an event.
        let reads = chain.status_reads();
        while chain.status_reads() < reads + 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rx.try_recv().is_err());

        chain.set_married(token).unwrap();
        match next_event(&mut rx).await {
            StatusEvent::Observed(o) => assert_eq!(o.status, OnChainStatus::Married),
            other => panic!("unexpected {other:?}"),
        }
        handle.shutdown();
    }

    #[tokio::test]
    async fn refresh_fetches_ahead_of_the_interval() {
        let chain = Arc::new(MockChain::new());
        let config = StatusWatcherConfig {
            poll_interval: Duration::from_secs(3600),
            ..StatusWatcherConfig::new(ALICE)
        };
        let (handle, mut rx) = spawn_status_watcher(chain.clone(), config).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            StatusEvent::Cleared {
                wallet: ALICE.to_string()
            }
        );

        chain
            .start_relationship(ALICE, BOB, ZERO_ADDRESS, "1")
            .unwrap();
        handle.refresh();
        assert!(matches!(
            next_event(&mut rx).await,
            StatusEvent::Observed(_)
        ));
        handle.shutdown();
    }

    #[tokio::test]
    async fn failures_are_reported_and_recovered() {
        let chain = Arc::new(MockChain::new());
        chain.set_failing(true);
        let (handle, mut rx) = spawn_status_watcher(chain.clone(), fast_config(ALICE)).unwrap();
        let event = next_event(&mut rx).await;
        assert!(matches!(event, StatusEvent::Error { .. }), "{event:?}");
        assert_eq!(event.wallet(), ALICE);

        chain.set_failing(false);
        loop {
            match next_event(&mut rx).await {
                StatusEvent::Error { .. } => continue,
                event => {
                    assert_eq!(
                        event,
                        StatusEvent::Cleared {
                            wallet: ALICE.to_string()
                        }
                    );
                    break;
                }
            }
        }
        handle.shutdown();
    }

    #[test]
    fn exits_when_handles_are_dropped() {
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
        let (event_tx, _event_rx) = tokio::sync::mpsc::unbounded_channel();
        drop(cmd_tx);

        let thread = std::thread::spawn(move || {
            watcher_thread_main(
                Arc::new(MockChain::new()),
                StatusWatcherConfig::new(ALICE),
                cmd_rx,
                event_tx,
            )
        });
        thread.join().unwrap();
    }
}

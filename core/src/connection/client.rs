use crate::config::ReconnectPolicy;
use crate::connection::transport::{CloseInfo, Connector, Link, LinkCommand, LinkEvent};
use crate::prelude::{
    ConnectionState, ConnectionStatus, PoseChannel, SendError, SendResult,
};
use crate::protocol::{ClientMessage, Inbound, LandmarkFrame};
use crate::telemetry::{MetricsRecorder, StatusLog};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the single logical backend connection for one view.
///
/// A background driver connects, pumps inbound messages and reconnects after
/// a constant delay unless the peer closed cleanly. Dropping the client (or
/// cancelling its parent token) closes the socket with code 1000, but only if
/// the runtime keeps polling the driver afterwards. Hosts that are about to
/// stop their runtime should await [`ConnectionClient::close`] first.
pub struct ConnectionClient {
    core: Arc<ClientCore>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    parent: CancellationToken,
    driver: tokio::sync::Mutex<Option<Driver>>,
}

struct Driver {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct ClientCore {
    state: watch::Sender<ConnectionState>,
    frames: watch::Sender<Option<Arc<LandmarkFrame>>>,
    writer: Mutex<Option<mpsc::UnboundedSender<LinkCommand>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    sequence: AtomicU64,
    metrics: Arc<MetricsRecorder>,
    status: Arc<StatusLog>,
}

enum PumpExit {
    Disposed,
    Closed(CloseInfo),
}

impl ConnectionClient {
    pub fn spawn(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        Self::spawn_with(
            connector,
            policy,
            Arc::new(MetricsRecorder::new()),
            Arc::new(StatusLog::new()),
            CancellationToken::new(),
        )
    }

    /// Spawns under `parent`; cancelling it disposes the connection.
    pub fn spawn_with(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        metrics: Arc<MetricsRecorder>,
        status: Arc<StatusLog>,
        parent: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::default());
        let (frames, _) = watch::channel(None);
        let core = Arc::new(ClientCore {
            state,
            frames,
            writer: Mutex::new(None),
            inbound: inbound_tx,
            sequence: AtomicU64::new(0),
            metrics,
            status,
        });
        let driver = start_driver(&core, &connector, policy, &parent);
        let client = Self {
            core,
            connector,
            policy,
            parent,
            driver: tokio::sync::Mutex::new(Some(driver)),
        };
        (client, inbound_rx)
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Arc<LandmarkFrame>>> {
        self.core.frames.subscribe()
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.core.metrics)
    }

    pub fn status_log(&self) -> Arc<StatusLog> {
        Arc::clone(&self.core.status)
    }

    /// Closes the current socket (waiting for the old driver to finish) and
    /// starts a fresh attempt with a zero retry count.
    pub async fn restart(&self) {
        let mut slot = self.driver.lock().await;
        if let Some(old) = slot.take() {
            old.token.cancel();
            if let Err(err) = old.handle.await {
                warn!("connection driver ended abnormally: {}", err);
            }
        }
        if self.parent.is_cancelled() {
            return;
        }
        info!("restarting connection to {}", self.connector.endpoint());
        *slot = Some(start_driver(
            &self.core,
            &self.connector,
            self.policy,
            &self.parent,
        ));
    }

    /// Disposes the connection and waits until the socket has been released.
    pub async fn close(&self) {
        let mut slot = self.driver.lock().await;
        if let Some(old) = slot.take() {
            old.token.cancel();
            if let Err(err) = old.handle.await {
                warn!("connection driver ended abnormally: {}", err);
            }
        }
    }
}

impl PoseChannel for ConnectionClient {
    fn state(&self) -> ConnectionState {
        *self.core.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state.subscribe()
    }

    fn last_frame(&self) -> Option<Arc<LandmarkFrame>> {
        self.core.frames.borrow().clone()
    }

    fn send(&self, message: &ClientMessage) -> SendResult {
        self.core.send(message)
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.token.cancel();
        }
    }
}

fn start_driver(
    core: &Arc<ClientCore>,
    connector: &Arc<dyn Connector>,
    policy: ReconnectPolicy,
    parent: &CancellationToken,
) -> Driver {
    let token = parent.child_token();
    let handle = tokio::spawn(drive(
        Arc::clone(core),
        Arc::clone(connector),
        policy,
        token.clone(),
    ));
    Driver { token, handle }
}

async fn drive(
    core: Arc<ClientCore>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    token: CancellationToken,
) {
    let mut retry_count = 0;
    loop {
        core.publish(ConnectionStatus::Connecting, retry_count, false);
        debug!("connecting to {}", connector.endpoint());
        let attempt = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            attempt = connector.connect() => attempt,
        };

        match attempt {
            Ok(link) => {
                retry_count = 0;
                match core.pump(link, &token).await {
                    PumpExit::Disposed => break,
                    PumpExit::Closed(close) if close.is_clean() => {
                        info!("connection closed cleanly: {}", close.reason);
                        core.status.record("Connection closed");
                        core.publish(ConnectionStatus::Closed, retry_count, true);
                        return;
                    }
                    PumpExit::Closed(close) => {
                        warn!(
                            "connection lost (code {:?}): {}",
                            close.code, close.reason
                        );
                    }
                }
            }
            Err(err) => warn!("{}", err),
        }

        retry_count += 1;
        core.metrics.record_reconnect_scheduled();
        core.status.warn("Connection lost. Reconnecting...");
        core.publish(ConnectionStatus::Closed, retry_count, false);
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(policy.delay()) => {}
        }
    }
    core.publish(ConnectionStatus::Closed, retry_count, true);
    debug!("connection to {} disposed", connector.endpoint());
}

impl ClientCore {
    fn publish(&self, status: ConnectionStatus, retry_count: u32, terminated: bool) {
        self.state.send_replace(ConnectionState {
            status,
            retry_count,
            terminated,
        });
    }

    fn set_writer(&self, writer: Option<mpsc::UnboundedSender<LinkCommand>>) {
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = writer;
    }

    async fn pump(&self, link: Link, token: &CancellationToken) -> PumpExit {
        let Link {
            outgoing,
            mut incoming,
        } = link;
        self.set_writer(Some(outgoing.clone()));
        self.publish(ConnectionStatus::Open, 0, false);
        self.status.record("Connected");

        let exit = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let _ = outgoing.send(LinkCommand::Close(CloseInfo::normal("client disposed")));
                    break PumpExit::Disposed;
                }
                event = incoming.recv() => match event {
                    Some(LinkEvent::Text(raw)) => self.dispatch(&raw),
                    Some(LinkEvent::Closed(close)) => break PumpExit::Closed(close),
                    Some(LinkEvent::Error(reason)) => break PumpExit::Closed(CloseInfo::abnormal(reason)),
                    None => break PumpExit::Closed(CloseInfo::abnormal("transport dropped")),
                },
            }
        };
        self.set_writer(None);
        exit
    }

    fn dispatch(&self, raw: &str) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let inbound = Inbound::parse(raw, sequence);
        match &inbound {
            Inbound::Frame(frame) => {
                self.metrics.record_frame_received();
                self.frames.send_replace(Some(Arc::new(frame.clone())));
            }
            Inbound::Opaque(_) => {
                self.metrics.record_parse_failure();
                warn!("unparseable inbound message ({} bytes)", raw.len());
            }
        }
        let _ = self.inbound.send(inbound);
    }

    fn send(&self, message: &ClientMessage) -> SendResult {
        let status = self.state.borrow().status;
        if status != ConnectionStatus::Open {
            debug!("dropping outbound message while {}", status);
            return Err(SendError::NotOpen(status));
        }
        let text = serde_json::to_string(message)?;
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.as_ref() {
            Some(writer) => writer
                .send(LinkCommand::Text(text))
                .map_err(|_| SendError::WriterGone),
            None => Err(SendError::NotOpen(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::ConnectError;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::time::Duration;

    enum Script {
        Accept,
        Refuse,
    }

    /// Far side of one accepted link.
    struct Peer {
        written: mpsc::UnboundedReceiver<LinkCommand>,
        events: mpsc::UnboundedSender<LinkEvent>,
    }

    struct FakeConnector {
        script: Mutex<VecDeque<Script>>,
        peers: mpsc::UnboundedSender<Peer>,
        attempts: AtomicU64,
    }

    impl FakeConnector {
        fn new(script: Vec<Script>) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
            let (peers, accepted) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                script: Mutex::new(script.into()),
                peers,
                attempts: AtomicU64::new(0),
            });
            (connector, accepted)
        }

        fn attempts(&self) -> u64 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Connector for FakeConnector {
        fn endpoint(&self) -> &str {
            "ws://fake/ws"
        }

        fn connect(&self) -> BoxFuture<'static, Result<Link, ConnectError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Accept);
            let result = match step {
                Script::Accept => {
                    let (link, written, events) = Link::pair();
                    self.peers.send(Peer { written, events }).unwrap();
                    Ok(link)
                }
                Script::Refuse => Err(ConnectError::Handshake {
                    endpoint: "ws://fake/ws".into(),
                    reason: "refused".into(),
                }),
            };
            Box::pin(async move { result })
        }
    }

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy { delay_ms: 3000 }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for(client: &ConnectionClient, status: ConnectionStatus) {
        let mut state = client.subscribe_state();
        state
            .wait_for(|state| state.status == status)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unclean_close_schedules_exactly_one_reconnect() {
        let (connector, mut peers) = FakeConnector::new(vec![Script::Accept, Script::Accept]);
        let (client, _inbound) = ConnectionClient::spawn(connector.clone(), policy());
        wait_for(&client, ConnectionStatus::Open).await;
        let peer = peers.recv().await.unwrap();

        peer.events
            .send(LinkEvent::Closed(CloseInfo::with_code(1006, "gone")))
            .unwrap();
        wait_for(&client, ConnectionStatus::Closed).await;
        assert_eq!(client.state().retry_count, 1);
        assert!(!client.state().terminated);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        wait_for(&client, ConnectionStatus::Open).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(client.state().retry_count, 0);
        assert_eq!(client.metrics().snapshot().reconnects_scheduled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_terminates_without_reconnecting() {
        let (connector, mut peers) = FakeConnector::new(vec![Script::Accept]);
        let (client, _inbound) = ConnectionClient::spawn(connector.clone(), policy());
        wait_for(&client, ConnectionStatus::Open).await;
        let peer = peers.recv().await.unwrap();

        peer.events
            .send(LinkEvent::Closed(CloseInfo::normal("bye")))
            .unwrap();
        let mut state = client.subscribe_state();
        state.wait_for(|state| state.terminated).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.metrics().snapshot().reconnects_scheduled, 0);
        assert_eq!(client.status(), ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn sending_while_not_open_fails_without_writing() {
        let (connector, mut peers) = FakeConnector::new(vec![Script::Accept]);
        let (client, _inbound) = ConnectionClient::spawn(connector, policy());
        wait_for(&client, ConnectionStatus::Open).await;
        let mut peer = peers.recv().await.unwrap();

        client.calibrate("Tree Pose").unwrap();
        assert_eq!(
            peer.written.recv().await.unwrap(),
            LinkCommand::Text(r#"{"action":"calibrate","pose":"Tree Pose"}"#.into())
        );

        peer.events
            .send(LinkEvent::Error("reset by peer".into()))
            .unwrap();
        wait_for(&client, ConnectionStatus::Closed).await;

        let err = client.start_session("Tree Pose").unwrap_err();
        assert!(matches!(err, SendError::NotOpen(ConnectionStatus::Closed)));
        settle().await;
        assert!(peer.written.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_and_opaque_payloads_are_dispatched() {
        let (connector, mut peers) = FakeConnector::new(vec![Script::Accept]);
        let (client, mut inbound) = ConnectionClient::spawn(connector, policy());
        wait_for(&client, ConnectionStatus::Open).await;
        let peer = peers.recv().await.unwrap();

        peer.events
            .send(LinkEvent::Text(
                r#"{"landmarks":{"11":{"x":0.4,"y":0.3,"z":0.0}},"accuracy":80}"#.into(),
            ))
            .unwrap();
        peer.events.send(LinkEvent::Text("garbage".into())).unwrap();

        let first = inbound.recv().await.unwrap();
        assert_eq!(first.frame().unwrap().accuracy, Some(80.0));
        assert_eq!(inbound.recv().await.unwrap(), Inbound::Opaque("garbage".into()));

        let last = client.last_frame().unwrap();
        assert!(last.landmark(11).is_some());
        assert_eq!(client.status(), ConnectionStatus::Open);
        let metrics = client.metrics().snapshot();
        assert_eq!(metrics.frames_received, 1);
        assert_eq!(metrics.parse_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_client_closes_with_normal_code() {
        let (connector, mut peers) = FakeConnector::new(vec![Script::Accept]);
        let (client, _inbound) = ConnectionClient::spawn(connector.clone(), policy());
        wait_for(&client, ConnectionStatus::Open).await;
        let mut peer = peers.recv().await.unwrap();

        drop(client);
        assert_eq!(
            peer.written.recv().await.unwrap(),
            LinkCommand::Close(CloseInfo::normal("client disposed"))
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disposal_cancels_a_pending_reconnect() {
        let (connector, _peers) = FakeConnector::new(vec![Script::Refuse]);
        let (client, _inbound) = ConnectionClient::spawn(connector.clone(), policy());
        wait_for(&client, ConnectionStatus::Closed).await;
        assert_eq!(client.state().retry_count, 1);

        client.close().await;
        assert!(client.state().terminated);
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_handshake_is_retried_after_the_delay() {
        let (connector, _peers) = FakeConnector::new(vec![Script::Refuse, Script::Accept]);
        let (client, _inbound) = ConnectionClient::spawn(connector.clone(), policy());
        wait_for(&client, ConnectionStatus::Closed).await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(3001)).await;
        wait_for(&client, ConnectionStatus::Open).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(client.status_log().latest().as_deref(), Some("Connected"));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_closes_the_old_socket_first() {
        let (connector, mut peers) = FakeConnector::new(vec![Script::Accept, Script::Accept]);
        let (client, _inbound) = ConnectionClient::spawn(connector.clone(), policy());
        wait_for(&client, ConnectionStatus::Open).await;
        let mut first = peers.recv().await.unwrap();

        client.restart().await;
        assert_eq!(
            first.written.try_recv().unwrap(),
            LinkCommand::Close(CloseInfo::normal("client disposed"))
        );
        wait_for(&client, ConnectionStatus::Open).await;
        let mut second = peers.recv().await.unwrap();
        assert_eq!(connector.attempts(), 2);

        client.end_session().unwrap();
        assert_eq!(
            second.written.recv().await.unwrap(),
            LinkCommand::Text(r#"{"action":"endSession"}"#.into())
        );
        settle().await;
        assert!(first.written.try_recv().is_err());
    }
}

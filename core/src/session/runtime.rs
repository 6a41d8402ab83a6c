use crate::prelude::{ConnectionState, PoseChannel};
use crate::protocol::Inbound;
use crate::session::machine::{Control, Effect, Rejected, SessionMachine, SessionSnapshot, TimerToken};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Request {
    control: Control,
    reply: oneshot::Sender<Result<(), Rejected>>,
}

/// Clonable handle used by views to drive the session.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn request(&self, control: Control) -> Result<(), Rejected> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request { control, reply })
            .map_err(|_| Rejected::Disposed)?;
        response.await.unwrap_or(Err(Rejected::Disposed))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

/// Runs a [`SessionMachine`] inside its own task.
pub struct SessionRuntime {
    handle: SessionHandle,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    pub fn spawn<C>(
        machine: SessionMachine,
        channel: Arc<C>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
        token: CancellationToken,
    ) -> Self
    where
        C: PoseChannel + ?Sized + 'static,
    {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(machine.snapshot());
        let (timer_tx, timers_fired) = mpsc::unbounded_channel();
        let connection = channel.subscribe_state();
        let actor = SessionActor {
            machine,
            channel,
            snapshots: snapshot_tx,
            timer_tx,
            timers: HashMap::new(),
        };
        let task = tokio::spawn(actor.run(
            requests,
            timers_fired,
            inbound,
            connection,
            token.clone(),
        ));
        Self {
            handle: SessionHandle {
                requests: requests_tx,
                snapshots,
            },
            token,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot()
    }

    pub async fn join(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct SessionActor<C: ?Sized> {
    machine: SessionMachine,
    channel: Arc<C>,
    snapshots: watch::Sender<SessionSnapshot>,
    timer_tx: mpsc::UnboundedSender<TimerToken>,
    timers: HashMap<TimerToken, JoinHandle<()>>,
}

impl<C> SessionActor<C>
where
    C: PoseChannel + ?Sized + 'static,
{
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut timers_fired: mpsc::UnboundedReceiver<TimerToken>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        mut connection: watch::Receiver<ConnectionState>,
        token: CancellationToken,
    ) {
        let initial = connection.borrow_and_update().status;
        let effects = self.machine.on_connection(initial);
        self.apply(effects);
        self.publish();

        let mut inbound_open = true;
        let mut connection_open = true;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                request = requests.recv() => {
                    let Some(Request { control, reply }) = request else { break };
                    let result = self.machine.request(control).map(|effects| self.apply(effects));
                    if let Err(rejected) = &result {
                        debug!("{:?} rejected: {}", control, rejected);
                    }
                    let _ = reply.send(result);
                }
                Some(fired) = timers_fired.recv() => {
                    self.timers.remove(&fired);
                    let effects = self.machine.on_timer(fired);
                    self.apply(effects);
                }
                message = inbound.recv(), if inbound_open => match message {
                    Some(Inbound::Frame(frame)) => self.machine.on_frame(&frame),
                    Some(Inbound::Opaque(_)) => {}
                    None => inbound_open = false,
                },
                changed = connection.changed(), if connection_open => {
                    if changed.is_err() {
                        connection_open = false;
                        continue;
                    }
                    let status = connection.borrow_and_update().status;
                    let effects = self.machine.on_connection(status);
                    self.apply(effects);
                }
            }
            self.publish();
        }

        let effects = self.machine.dispose();
        self.apply(effects);
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.publish();
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut pending: VecDeque<Effect> = effects.into();
        while let Some(effect) = pending.pop_front() {
            match effect {
                Effect::Send(command) => {
                    if let Err(err) = self.channel.send_command(command.clone()) {
                        warn!("{:?} not delivered: {}", command, err);
                        pending.extend(self.machine.command_failed(&command));
                    }
                }
                Effect::StartTimer { token, after } => {
                    let fired = self.timer_tx.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = fired.send(token);
                    });
                    self.timers.insert(token, timer);
                }
                Effect::CancelTimer(token) => {
                    if let Some(timer) = self.timers.remove(&token) {
                        timer.abort();
                    }
                }
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

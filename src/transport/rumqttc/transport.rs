//! MQTT transport implementation using `rumqttc`.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the MQTT `EventLoop`.
//! - The actor publishes outbound envelopes, registers and removes broker
//!   subscriptions, polls for incoming publishes, and disconnects cleanly.
//! - All interaction with the MQTT client is serialized through this actor;
//!   no other task ever touches the event loop directly.
//!
//! The actor is spawned by `start()` and torn down by `stop()`. A stopped
//! transport can be started again; each start builds a fresh client.
//!
//! ## Connection behavior
//!
//! `start()` returns once the broker answers with a successful CONNACK, or
//! fails with [`RpcError::Connection`] when the broker refuses, the socket
//! errors, or `connect_timeout` passes. After that, dropped connections are
//! retried by the event loop and active topics are resubscribed on the next
//! CONNACK.
//!
//! ## Message delivery semantics
//!
//! Incoming publishes are demultiplexed by exact topic and fanned out to all
//! local inboxes for that topic, matching the memory transport contract.
//!
//! ## Subscription confirmation
//!
//! `subscribe()` waits for the SUBACK. rumqttc's SubAck only carries a packet
//! id, and the broker acknowledges subscriptions in the order they were sent,
//! so the actor keeps a FIFO of outstanding acknowledgements.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    //
    AsyncClient,
    ConnectReturnCode,
    Event,
    EventLoop,
    Packet,
    Publish,
    QoS,
    SubscribeReasonCode,
};

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::MqttOptions;
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Address,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CLIENT_CAPACITY: usize = 64;
const INBOX_CAPACITY: usize = 64;

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        topic: String,
        payload: Vec<u8>,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        topic: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        topic: String,
    },
    Close {
        resp: oneshot::Sender<()>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

/// An outstanding SUBACK.
enum PendingAck {
    /// Issued by the actor itself after a reconnect.
    Resubscribe(String),
    /// Issued on behalf of a `subscribe()` caller.
    Caller(String, oneshot::Sender<Result<()>>),
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor
    async fn handle(self, actor: &mut MqttActor) -> ActorStep {
        // ---
        match self {
            Cmd::Publish {
                topic,
                payload,
                resp,
            } => {
                let result = actor.handle_publish(&topic, payload).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Subscribe { topic, resp } => {
                actor.handle_subscribe(topic, resp).await;
                ActorStep::Continue
            }
            Cmd::Unsubscribe { topic } => {
                actor.handle_unsubscribe(&topic).await;
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                actor.handle_close().await;
                let _ = resp.send(());
                ActorStep::Stop
            }
        }
    }
}

struct Running {
    cmd_tx: mpsc::Sender<Cmd>,
    actor: JoinHandle<()>,
}

/// MQTT-based implementation of the `Transport` trait.
///
/// Represents a single broker connection.
struct RumqttcTransport {
    // ---
    transport_id: String,
    options: MqttOptions,
    connected: Arc<AtomicBool>,
    subscribers: SubscriberMap,
    running: Mutex<Option<Running>>,
}

impl RumqttcTransport {
    // ---

    async fn command_sender(&self, action: &str) -> Result<mpsc::Sender<Cmd>> {
        // ---
        let running = self.running.lock().await;
        match running.as_ref() {
            Some(r) if self.connected.load(Ordering::SeqCst) => Ok(r.cmd_tx.clone()),
            _ => Err(RpcError::Connection(format!(
                "{}: cannot {action} while disconnected",
                self.transport_id
            ))),
        }
    }
}

struct MqttActor {
    // ---
    transport_id: String, // for logging only
    client: AsyncClient,
    event_loop: EventLoop,
    qos: QoS,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    pending_acks: VecDeque<PendingAck>,
    connected: Arc<AtomicBool>,
    ready: Option<oneshot::Sender<Result<()>>>,
    reconnect: bool,
}

impl MqttActor {
    // ---

    async fn run(mut self) {
        // ---
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                event = self.event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            Self::handle_incoming(&self.transport_id, &self.subscribers, publish).await;
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            self.handle_suback(suback);
                        }
                        Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                            if matches!(self.handle_connack(connack).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        Ok(_event) => {
                            // PingResp, PubAck, outgoing notifications
                            log_debug!("{}: mqtt event (ignored): {:?}", self.transport_id, _event);
                        }
                        Err(err) => {
                            if let Some(ready) = self.ready.take() {
                                // never connected: report and give up
                                let _ = ready.send(Err(RpcError::Connection(format!(
                                    "{}: {err}", self.transport_id
                                ))));
                                break;
                            }
                            self.connected.store(false, Ordering::SeqCst);
                            self.reconnect = true;
                            self.fail_pending_acks();
                            log_error!("{}: broker connection lost: {err}", self.transport_id);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        log_debug!("{}: actor exited", self.transport_id);
    }

    async fn handle_publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // ---
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| {
                log_error!("{}: publish to {topic} failed: {err}", self.transport_id);
                RpcError::Transport(format!("publish to {topic} failed: {err}"))
            })
    }

    /// Sends the SUBSCRIBE and queues the caller for the matching SUBACK.
    async fn handle_subscribe(&mut self, topic: String, resp: oneshot::Sender<Result<()>>) {
        // ---
        match self.client.subscribe(topic.as_str(), self.qos).await {
            Ok(()) => self.pending_acks.push_back(PendingAck::Caller(topic, resp)),
            Err(err) => {
                log_error!("{}: subscribe to {topic} failed: {err}", self.transport_id);
                let _ = resp.send(Err(RpcError::Transport(format!(
                    "subscribe to {topic} failed: {err}"
                ))));
            }
        }
    }

    async fn handle_unsubscribe(&mut self, topic: &str) {
        // ---
        if let Err(_err) = self.client.unsubscribe(topic).await {
            log_debug!("{}: unsubscribe from {topic} failed: {_err}", self.transport_id);
        }
    }

    fn handle_suback(&mut self, suback: rumqttc::SubAck) {
        // ---
        let success = suback
            .return_codes
            .iter()
            .all(|code| !matches!(code, SubscribeReasonCode::Failure));

        match self.pending_acks.pop_front() {
            Some(PendingAck::Caller(topic, resp)) => {
                if success {
                    log_info!("{}: subscribed to {topic}", self.transport_id);
                    let _ = resp.send(Ok(()));
                } else {
                    log_error!(
                        "{}: broker rejected subscription to {topic}: {:?}",
                        self.transport_id,
                        suback.return_codes
                    );
                    let _ = resp.send(Err(RpcError::Transport(format!(
                        "broker rejected subscription to {topic}"
                    ))));
                }
            }
            Some(PendingAck::Resubscribe(_topic)) => {
                if success {
                    log_info!("{}: resubscribed to {_topic}", self.transport_id);
                } else {
                    log_error!("{}: resubscribe to {_topic} rejected", self.transport_id);
                }
            }
            None => {
                log_debug!("{}: unexpected SUBACK {}", self.transport_id, suback.pkid);
            }
        }
    }

    /// Acknowledgements for SUBSCRIBEs sent on a dropped connection never arrive.
    fn fail_pending_acks(&mut self) {
        // ---
        for pending in self.pending_acks.drain(..) {
            if let PendingAck::Caller(topic, resp) = pending {
                let _ = resp.send(Err(RpcError::Connection(format!(
                    "connection lost before subscription to {topic} was confirmed"
                ))));
            }
        }
    }

    async fn handle_connack(&mut self, connack: rumqttc::ConnAck) -> ActorStep {
        // ---
        if connack.code != ConnectReturnCode::Success {
            log_error!("{}: connection refused: {:?}", self.transport_id, connack.code);
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Err(RpcError::Connection(format!(
                    "{}: broker refused connection: {:?}",
                    self.transport_id, connack.code
                ))));
                return ActorStep::Stop;
            }
            return ActorStep::Continue;
        }

        log_info!("{}: connected to broker", self.transport_id);
        self.connected.store(true, Ordering::SeqCst);
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }

        if std::mem::take(&mut self.reconnect) {
            let topics: Vec<String> = self.subscribers.read().await.keys().cloned().collect();
            for topic in topics {
                match self.client.subscribe(topic.as_str(), self.qos).await {
                    Ok(()) => self.pending_acks.push_back(PendingAck::Resubscribe(topic)),
                    Err(_err) => {
                        log_error!("{}: resubscribe to {topic} failed: {_err}", self.transport_id);
                    }
                }
            }
        }
        ActorStep::Continue
    }

    async fn handle_close(&mut self) {
        // ---
        log_debug!("{}: disconnecting mqtt client", self.transport_id);

        if let Err(_err) = self.client.disconnect().await {
            log_debug!("{}: mqtt disconnect failed: {_err}", self.transport_id);
        }
        // flush the DISCONNECT packet
        let _ = tokio::time::timeout(Duration::from_millis(500), self.event_loop.poll()).await;
    }

    /// Fans an incoming publish out to local inboxes, evicting dead ones.
    async fn handle_incoming(transport_id: &str, subscribers: &SubscriberMap, publish: Publish) {
        // ---
        let topic = publish.topic;

        let env = match Envelope::from_slice(&publish.payload) {
            Ok(env) => env,
            Err(_err) => {
                log_debug!("{transport_id}: invalid envelope on {topic}: {_err}");
                return;
            }
        };

        let Some(senders) = subscribers.read().await.get(&topic).cloned() else {
            return;
        };

        let original_len = senders.len();
        let mut survivors = Vec::with_capacity(original_len);

        for tx in senders {
            match tx.try_send(env.clone()) {
                Ok(()) => survivors.push(tx),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log_error!("{transport_id}: inbox for {topic} full, message dropped");
                    survivors.push(tx);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        if survivors.len() != original_len {
            let mut map = subscribers.write().await;
            if survivors.is_empty() {
                map.remove(&topic);
            } else {
                map.insert(topic, survivors);
            }
        }
    }
} // MqttActor

#[async_trait::async_trait]
impl Transport for RumqttcTransport {
    // ---

    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn start(&self) -> Result<()> {
        // ---
        let mut running = self.running.lock().await;
        if running.is_some() {
            log_debug!("{}: already started", self.transport_id);
            return Ok(());
        }

        let (client, event_loop) = AsyncClient::new(self.options.client_options()?, CLIENT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(CLIENT_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        let actor = MqttActor {
            transport_id: self.transport_id.clone(),
            client,
            event_loop,
            qos: self.options.quality.qos(),
            cmd_rx,
            subscribers: Arc::clone(&self.subscribers),
            pending_acks: VecDeque::new(),
            connected: Arc::clone(&self.connected),
            ready: Some(ready_tx),
            reconnect: false,
        };
        let actor = tokio::spawn(actor.run());

        let outcome = match tokio::time::timeout(self.options.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Connection(format!(
                "{}: connection task exited",
                self.transport_id
            ))),
            Err(_) => Err(RpcError::Connection(format!(
                "{}: no CONNACK from {} within {}ms",
                self.transport_id,
                self.options.broker_url,
                self.options.connect_timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(()) => {
                *running = Some(Running { cmd_tx, actor });
                Ok(())
            }
            Err(err) => {
                actor.abort();
                self.connected.store(false, Ordering::SeqCst);
                log_error!("{err}");
                Err(err)
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        // ---
        let Some(Running { cmd_tx, actor }) = self.running.lock().await.take() else {
            log_debug!("{}: not started, nothing to stop", self.transport_id);
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        if cmd_tx.send(Cmd::Close { resp: tx }).await.is_ok() {
            let _ = rx.await;
        }
        let _ = actor.await;

        self.connected.store(false, Ordering::SeqCst);
        // dropping the senders closes every inbox
        self.subscribers.write().await.clear();
        log_info!("{}: stopped", self.transport_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &Address, env: Envelope) -> Result<()> {
        // ---
        let cmd_tx = self.command_sender("publish").await?;
        let payload = env.to_bytes()?.to_vec();
        let (tx, rx) = oneshot::channel();

        cmd_tx
            .send(Cmd::Publish {
                topic: topic.0.to_string(),
                payload,
                resp: tx,
            })
            .await
            .map_err(|_| RpcError::Connection("mqtt actor stopped".into()))?;

        rx.await
            .map_err(|_| RpcError::Connection("mqtt actor stopped".into()))?
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let cmd_tx = self.command_sender("subscribe").await?;
        let topic = sub.0.to_string();

        let (resp_tx, resp_rx) = oneshot::channel();
        cmd_tx
            .send(Cmd::Subscribe {
                topic: topic.clone(),
                resp: resp_tx,
            })
            .await
            .map_err(|_| RpcError::Connection("mqtt actor stopped".into()))?;

        resp_rx
            .await
            .map_err(|_| RpcError::Connection("mqtt actor stopped".into()))??;

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.subscribers
            .write()
            .await
            .entry(topic)
            .or_default()
            .push(tx);

        Ok(SubscriptionHandle {
            subscription: sub,
            inbox: rx,
        })
    }

    async fn unsubscribe(&self, sub: &Subscription) -> Result<()> {
        // ---
        let cmd_tx = self.command_sender("unsubscribe").await?;
        let topic = sub.0.to_string();

        if self.subscribers.write().await.remove(&topic).is_none() {
            return Ok(());
        }

        cmd_tx
            .send(Cmd::Unsubscribe { topic })
            .await
            .map_err(|_| RpcError::Connection("mqtt actor stopped".into()))
    }
}

/// Creates a rumqttc-based MQTT transport.
///
/// The broker connection is made by `start()`.
///
/// # Errors
///
/// Returns [`RpcError::InvalidConfig`] if the broker URL or client id is
/// malformed.
pub fn create_transport(options: MqttOptions) -> Result<TransportPtr> {
    // ---
    options.client_options()?;

    Ok(Arc::new(RumqttcTransport {
        transport_id: format!("rumqttc:{}", options.client_id),
        options,
        connected: Arc::new(AtomicBool::new(false)),
        subscribers: Arc::new(RwLock::new(HashMap::new())),
        running: Mutex::new(None),
    }))
}

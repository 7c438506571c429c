use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thingnode::error::{ErrorKind as CoreErrorKind, Result as CoreResult};
use thingnode::network::services::{BrokerClient, ConnectOptions, InboundMessage};

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::error::Error;

// The capacity of the bounded request channel of the client.
const ASYNC_CHANNEL_CAPACITY: usize = 10;

// The capacity of the channel holding received messages.
const INBOX_CAPACITY: usize = 32;

// Keep alive time to send `pingreq` to broker when the connection is idle.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(5);

// A connection driven by a background event-loop task.
struct Session {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    inbox: flume::Receiver<InboundMessage>,
    cancellation_token: CancellationToken,
}

impl Session {
    fn close(self) {
        self.cancellation_token.cancel();
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnection request not queued: {e}");
        }
        self.connected.store(false, Ordering::Release);
    }
}

/// A broker client built on `rumqttc`.
///
/// Requests are queued without blocking, while a `tokio` task drives the
/// connection and forwards the received publications. The client must be
/// used from within a `tokio` runtime.
#[derive(Default)]
pub struct MqttBroker {
    session: Option<Session>,
}

impl MqttBroker {
    /// Creates a [`MqttBroker`].
    #[must_use]
    pub const fn new() -> Self {
        Self { session: None }
    }

    fn client(&self) -> CoreResult<&AsyncClient> {
        self.session
            .as_ref()
            .map(|session| &session.client)
            .ok_or_else(|| {
                Error::new(crate::error::ErrorKind::Broker, "not connected")
                    .into_core(CoreErrorKind::Broker)
            })
    }
}

fn mqtt_options(options: &ConnectOptions) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(options.client_id.as_str(), options.host.as_str(), options.port);
    let _ = mqtt_options
        .set_keep_alive(KEEP_ALIVE_TIME)
        .set_clean_session(true);

    if let Some((user, password)) = &options.credentials {
        let _ = mqtt_options.set_credentials(user.as_str(), password.as_str());
    }

    if let Some(will) = &options.last_will {
        let _ = mqtt_options.set_last_will(LastWill::new(
            will.topic.as_str(),
            will.payload.as_bytes().to_vec(),
            QoS::AtMostOnce,
            will.retain,
        ));
    }

    mqtt_options
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    sender: flume::Sender<InboundMessage>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            // Poll the `MQTT` event coming from the network
            event = eventloop.poll() => {
                let packet = match event {
                    Ok(Event::Incoming(packet)) => packet,
                    Ok(Event::Outgoing(_)) => continue,
                    Err(e) => {
                        error!("Broker connection closed: {e}");
                        break;
                    }
                };

                match packet {
                    Packet::ConnAck(_) => {
                        info!("Broker accepted the connection");
                        connected.store(true, Ordering::Release);
                    }
                    Packet::Publish(publish) => {
                        let message = InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if sender.send_async(message).await.is_err() {
                            warn!("Stop forwarding broker messages");
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    connected.store(false, Ordering::Release);
}

impl BrokerClient for MqttBroker {
    fn connect(&mut self, options: &ConnectOptions) -> CoreResult<()> {
        if let Some(session) = self.session.take() {
            session.close();
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options(options), ASYNC_CHANNEL_CAPACITY);
        let (sender, inbox) = flume::bounded(INBOX_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let cancellation_token = CancellationToken::new();

        drop(tokio::spawn(run_event_loop(
            eventloop,
            connected.clone(),
            sender,
            cancellation_token.clone(),
        )));

        self.session = Some(Session {
            client,
            connected,
            inbox,
            cancellation_token,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.connected.load(Ordering::Acquire))
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> CoreResult<()> {
        self.client()?
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| Error::from(e).into_core(CoreErrorKind::Broker))
    }

    fn subscribe(&mut self, topic: &str) -> CoreResult<()> {
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| Error::from(e).into_core(CoreErrorKind::Broker))
    }

    fn unsubscribe(&mut self, topic: &str) -> CoreResult<()> {
        self.client()?
            .try_unsubscribe(topic)
            .map_err(|e| Error::from(e).into_core(CoreErrorKind::Broker))
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Disconnecting from the broker");
            session.close();
        }
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.session.as_ref()?.inbox.try_recv().ok()
    }
}

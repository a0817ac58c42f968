//! MQTT bus client on top of rumqttc.
//!
//! A send completes when the broker acknowledges the publish (QoS 1 PUBACK),
//! not when rumqttc queues it.

use crate::config::Broker;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use situfeed_core::{BusClient, BusError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pairs publish requests with the packet ids rumqttc assigns them, then with
/// the broker's PUBACKs.
///
/// The event loop emits `Outgoing::Publish` in request order, so the oldest
/// queued waiter owns the next fresh packet id. A packet id that is already
/// in flight is a retransmission after reconnect and keeps its waiter.
#[derive(Default)]
struct Acks {
    queued: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl Acks {
    fn queue(&mut self, waiter: oneshot::Sender<()>) {
        self.queued.push_back(waiter);
    }

    /// Withdraws the newest waiter after rumqttc refused its request.
    fn withdraw_last(&mut self) {
        self.queued.pop_back();
    }

    fn sent(&mut self, pkid: u16) {
        if self.in_flight.contains_key(&pkid) {
            return;
        }
        if let Some(waiter) = self.queued.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn acked(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }
}

type SharedAcks = Arc<Mutex<Acks>>;

fn lock(acks: &SharedAcks) -> MutexGuard<'_, Acks> {
    acks.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MqttBus {
    client: AsyncClient,
    acks: SharedAcks,
    /// Keeps queueing a waiter and enqueueing its request in the same order.
    order: tokio::sync::Mutex<()>,
    event_loop: JoinHandle<()>,
}

impl MqttBus {
    /// Starts the connection in the background. Sends wait until the broker
    /// accepts the session; the event loop reconnects on its own and resends
    /// unacknowledged publishes.
    pub fn connect(broker: &Broker, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let acks = SharedAcks::default();
        let tracked = Arc::clone(&acks);
        let host = format!("{}:{}", broker.host, broker.port);
        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!(broker = %host, "connected to MQTT broker"),
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => lock(&tracked).sent(pkid),
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(pkid = ack.pkid, "publish acknowledged");
                        lock(&tracked).acked(ack.pkid);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(broker = %host, error = %err, "MQTT connection error; reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });
        Self {
            client,
            acks,
            order: tokio::sync::Mutex::new(()),
            event_loop,
        }
    }

    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            debug!(error = %err, "MQTT disconnect request failed");
        }
        self.event_loop.abort();
    }
}

#[async_trait]
impl BusClient for MqttBus {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let (waiter, acked) = oneshot::channel();
        {
            let _order = self.order.lock().await;
            lock(&self.acks).queue(waiter);
            if let Err(err) = self
                .client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
            {
                lock(&self.acks).withdraw_last();
                return Err(BusError::Send(err.to_string()));
            }
        }
        acked.await.map_err(|_| BusError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(acks: &mut Acks) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        acks.queue(tx);
        rx
    }

    #[test]
    fn ack_resolves_the_matching_publish() {
        let mut acks = Acks::default();
        let mut first = waiter(&mut acks);
        let mut second = waiter(&mut acks);
        acks.sent(1);
        acks.sent(2);

        acks.acked(2);
        assert!(second.try_recv().is_ok());
        assert!(first.try_recv().is_err());

        acks.acked(1);
        assert!(first.try_recv().is_ok());
    }

    #[test]
    fn retransmission_keeps_its_waiter() {
        let mut acks = Acks::default();
        let mut first = waiter(&mut acks);
        acks.sent(7);
        let mut second = waiter(&mut acks);

        // resend of 7 after reconnect, then the new publish
        acks.sent(7);
        acks.sent(8);
        acks.acked(8);
        assert!(second.try_recv().is_ok());
        assert!(first.try_recv().is_err());

        acks.acked(7);
        assert!(first.try_recv().is_ok());
    }

    #[test]
    fn refused_request_withdraws_only_its_waiter() {
        let mut acks = Acks::default();
        let mut kept = waiter(&mut acks);
        let mut refused = waiter(&mut acks);
        acks.withdraw_last();
        assert!(matches!(
            refused.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));

        acks.sent(3);
        acks.acked(3);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn unknown_ack_is_ignored() {
        let mut acks = Acks::default();
        let mut pending = waiter(&mut acks);
        acks.acked(42);
        assert!(matches!(
            pending.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
    }
}

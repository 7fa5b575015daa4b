//! MQTT transport implementation
//!
//! Wraps a rumqttc session. The connection's event loop runs on a dedicated
//! `mqtt-listener` thread that forwards publishes to the registered handler
//! and otherwise only logs; rumqttc's own reconnect behaviour governs
//! recovery after a broker drop.

use super::{MessageHandler, PubSub};
use crate::config::MqttConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Outstanding request capacity between client handles and the event loop
const REQUEST_CAPACITY: usize = 32;

/// MQTT transport for the command channel
pub struct MqttTransport {
    options: MqttOptions,
    client: Mutex<Option<Client>>,
    running: Arc<AtomicBool>,
}

impl MqttTransport {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(5));
        // Keep broker-side subscriptions across reconnects
        options.set_clean_session(false);
        Self {
            options,
            client: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn client(&self) -> Result<Client> {
        self.client
            .lock()
            .clone()
            .ok_or(Error::NotConnected("MQTT session"))
    }
}

impl PubSub for MqttTransport {
    fn connect(&self, on_message: MessageHandler) -> Result<()> {
        let (client, mut connection) = Client::new(self.options.clone(), REQUEST_CAPACITY);
        *self.client.lock() = Some(client);
        self.running.store(true, Ordering::Relaxed);

        let running = Arc::clone(&self.running);
        thread::Builder::new()
            .name("mqtt-listener".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            match std::str::from_utf8(&publish.payload) {
                                Ok(payload) => on_message(&publish.topic, payload),
                                Err(_) => log::warn!(
                                    "non-UTF8 payload on {} ({} bytes), dropped",
                                    publish.topic,
                                    publish.payload.len()
                                ),
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("MQTT session established");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if !running.load(Ordering::Relaxed) {
                                break;
                            }
                            log::warn!("MQTT connection error: {}", e);
                            thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
                log::info!("MQTT listener stopped");
            })?;

        Ok(())
    }

    fn subscribe(&self, filter: &str) -> Result<()> {
        self.client()?.subscribe(filter, QoS::AtMostOnce)?;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        // Non-blocking: a full request queue surfaces as an error and the
        // channel retries the value next iteration
        self.client()?
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())?;
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(client) = self.client.lock().take() {
            client.disconnect()?;
        }
        Ok(())
    }
}

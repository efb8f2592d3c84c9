//! Message broker abstraction and its MQTT implementation

use crate::error::{Error, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outbound pub/sub connection used by the publish loop
#[async_trait]
pub trait MessageBroker: Send {
    async fn connect(&mut self, host: &str, port: u16) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Fire-and-forget publish; delivery is not acknowledged to the caller
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// How a session's event-loop task ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DriverExit {
    /// Closed from this side through [`MessageBroker::disconnect`]
    Closed,
    /// Dropped by the broker or the network
    Lost,
}

struct Session {
    client: AsyncClient,
    driver: JoinHandle<DriverExit>,
}

/// MQTT 3.1.1 broker connection.
///
/// The rumqttc event loop runs on a background task once the broker has
/// acknowledged the connection; the liveness flag drops as soon as that
/// loop reports a connection error.
pub struct MqttBroker {
    client_id: String,
    keep_alive: Duration,
    connect_timeout: Duration,
    connected: Arc<AtomicBool>,
    session: Option<Session>,
}

impl MqttBroker {
    pub fn new(client_id: impl Into<String>, keep_alive: Duration, connect_timeout: Duration) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive,
            connect_timeout,
            connected: Arc::new(AtomicBool::new(false)),
            session: None,
        }
    }

    async fn await_connack(eventloop: &mut EventLoop) -> std::result::Result<(), ConnectionError> {
        loop {
            if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
                debug!("MQTT connection acknowledged: {:?}", ack.code);
                return Ok(());
            }
        }
    }

    /// Drive the event loop until the connection ends. A liveness flag that
    /// is already cleared means the close was requested locally.
    fn spawn_driver(mut eventloop: EventLoop, connected: Arc<AtomicBool>) -> JoinHandle<DriverExit> {
        tokio::spawn(async move {
            let reason = loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        break "broker sent DISCONNECT".to_string()
                    }
                    Ok(_) => {}
                    Err(e) => break e.to_string(),
                }
            };
            if connected.swap(false, Ordering::SeqCst) {
                warn!("MQTT connection lost: {}", reason);
                DriverExit::Lost
            } else {
                debug!("MQTT event loop stopped after disconnect: {}", reason);
                DriverExit::Closed
            }
        })
    }

    /// Send DISCONNECT and wait up to a second for the driver to finish
    async fn close_session(&self, mut session: Session) -> (Result<()>, Option<DriverExit>) {
        self.connected.store(false, Ordering::SeqCst);
        let result = session
            .client
            .disconnect()
            .await
            .map_err(|e| Error::BrokerError(format!("disconnect failed: {e}")));

        let exit = match tokio::time::timeout(Duration::from_secs(1), &mut session.driver).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                debug!("MQTT driver task ended abnormally: {}", e);
                None
            }
            Err(_) => {
                session.driver.abort();
                None
            }
        };
        (result, exit)
    }

    async fn teardown(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        match self.session.take() {
            Some(session) => {
                let (result, exit) = self.close_session(session).await;
                debug!("MQTT session closed ({:?})", exit);
                result
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MessageBroker for MqttBroker {
    async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.session.is_some() {
            // Stale session from a dropped connection
            if let Err(e) = self.teardown().await {
                debug!("Ignoring error while dropping stale MQTT session: {}", e);
            }
        }

        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        match tokio::time::timeout(self.connect_timeout, Self::await_connack(&mut eventloop)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::BrokerError(format!(
                    "connection to {host}:{port} failed: {e}"
                )))
            }
            Err(_) => {
                return Err(Error::BrokerError(format!(
                    "connection to {host}:{port} timed out after {:?}",
                    self.connect_timeout
                )))
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        let driver = Self::spawn_driver(eventloop, self.connected.clone());
        self.session = Some(Session { client, driver });
        info!("Connected to MQTT broker {}:{}", host, port);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some() && self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::BrokerError("not connected".to_string()))?;
        session
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| Error::BrokerError(format!("publish to {topic} failed: {e}")))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.teardown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_new_broker_is_not_connected() {
        let broker = MqttBroker::new("test", Duration::from_secs(5), Duration::from_millis(200));
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails() {
        let mut broker = MqttBroker::new("test", Duration::from_secs(5), Duration::from_millis(200));
        let err = broker.publish("a/b", "1.00;0.0").await.unwrap_err();
        assert!(matches!(err, Error::BrokerError(_)));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Bind then drop a listener to get a port with nothing behind it
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut broker = MqttBroker::new("test", Duration::from_secs(5), Duration::from_millis(500));
        let err = broker.connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, Error::BrokerError(_)));
        assert!(!broker.is_connected());
    }

    /// Local MQTT peer. Each entry of `sessions` answers one CONNECT with a
    /// CONNACK; `true` keeps the socket open until the client disconnects,
    /// `false` closes it right after the CONNACK.
    async fn scripted_broker(sessions: Vec<bool>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            for hold in sessions {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 512];
                let _ = socket.read(&mut buf).await;
                socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                if hold {
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            // DISCONNECT
                            Ok(n) if buf[..n].contains(&0xE0) => break,
                            Ok(_) => {}
                        }
                    }
                }
            }
        });
        port
    }

    async fn wait_until_disconnected(broker: &MqttBroker) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_connection_clears_liveness_and_reconnects() {
        let port = scripted_broker(vec![false, true]).await;
        let mut broker = MqttBroker::new("test", Duration::from_secs(5), Duration::from_secs(2));

        broker.connect("127.0.0.1", port).await.unwrap();
        wait_until_disconnected(&broker).await;
        assert!(!broker.is_connected());

        broker.connect("127.0.0.1", port).await.unwrap();
        assert!(broker.is_connected());
        broker.publish("a/b", "826.50;1700000000.0").await.unwrap();
        broker.disconnect().await.unwrap();
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_driver_tells_lost_connection_from_local_close() {
        let port = scripted_broker(vec![false, true]).await;
        let mut broker = MqttBroker::new("test", Duration::from_secs(5), Duration::from_secs(2));

        broker.connect("127.0.0.1", port).await.unwrap();
        let session = broker.session.take().unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), session.driver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, DriverExit::Lost);

        broker.connect("127.0.0.1", port).await.unwrap();
        let session = broker.session.take().unwrap();
        let (result, exit) = broker.close_session(session).await;
        result.unwrap();
        assert_eq!(exit, Some(DriverExit::Closed));
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let mut broker = MqttBroker::new("test", Duration::from_secs(5), Duration::from_millis(200));
        broker.disconnect().await.unwrap();
    }
}

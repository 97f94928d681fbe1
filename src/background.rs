use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::cancel::CancellationCoordinator;
use crate::driver::{StreamDriver, StreamRequest};
use crate::protocol::{Ack, BackgroundRequest};
use crate::relay::Relay;
use crate::session::SessionRegistry;
use crate::types::{RelayError, Result};

pub enum BackgroundCommand {
    Dispatch {
        request: BackgroundRequest,
        resp: oneshot::Sender<Ack>,
    },
}

/// The coordinating context: owns the registry and serialises viewer
/// requests, while each stream reads on its own task.
pub struct Background {
    driver: StreamDriver,
    coordinator: CancellationCoordinator,
    rx_cmd: mpsc::Receiver<BackgroundCommand>,
}

/// Cheap handle viewers use to reach the background context.
#[derive(Clone)]
pub struct BackgroundHandle {
    tx_cmd: mpsc::Sender<BackgroundCommand>,
    relay: Relay,
    registry: Arc<SessionRegistry>,
}

#[derive(Debug, Clone)]
pub struct BackgroundSettings {
    pub principal: String,
    pub idle_timeout: Duration,
}

impl Background {
    pub fn new(
        driver: StreamDriver,
        coordinator: CancellationCoordinator,
        rx_cmd: mpsc::Receiver<BackgroundCommand>,
    ) -> Self {
        Self {
            driver,
            coordinator,
            rx_cmd,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Background event loop started");
        while let Some(cmd) = self.rx_cmd.recv().await {
            match cmd {
                BackgroundCommand::Dispatch { request, resp } => {
                    let _ = resp.send(self.dispatch(request));
                }
            }
        }
        tracing::info!("Background event loop stopped");
    }

    pub fn dispatch(&self, request: BackgroundRequest) -> Ack {
        match request {
            BackgroundRequest::StartStream {
                endpoint,
                api_key,
                message,
                stream_id,
            } => {
                let request = StreamRequest {
                    endpoint,
                    api_key,
                    message,
                    stream_id,
                };
                match self.driver.start(request) {
                    Ok(_) => Ack::ok(),
                    Err(e) => {
                        tracing::error!("Failed to start stream: {}", e.inner);
                        Ack::failed(e.inner.to_string())
                    }
                }
            }
            BackgroundRequest::CancelStream { stream_id } => {
                self.coordinator.cancel(&stream_id);
                Ack::ok()
            }
        }
    }
}

/// Wires registry, relay, driver and coordinator together and starts the
/// event loop on the current runtime.
pub fn spawn(client: reqwest::Client, settings: BackgroundSettings) -> BackgroundHandle {
    let registry = Arc::new(SessionRegistry::new());
    let relay = Relay::new();
    let driver = StreamDriver::new(
        client.clone(),
        registry.clone(),
        relay.clone(),
        settings.principal,
        settings.idle_timeout,
    );
    let coordinator = CancellationCoordinator::new(client, registry.clone());
    let (tx_cmd, rx_cmd) = mpsc::channel(64);

    tokio::spawn(Background::new(driver, coordinator, rx_cmd).run());

    BackgroundHandle {
        tx_cmd,
        relay,
        registry,
    }
}

impl BackgroundHandle {
    pub async fn request(&self, request: BackgroundRequest) -> Result<Ack> {
        let (resp, rx) = oneshot::channel();
        self.tx_cmd
            .send(BackgroundCommand::Dispatch { request, resp })
            .await
            .map_err(|_| RelayError::Internal("background context is gone".to_string()))?;
        rx.await
            .map_err(|_| RelayError::Internal("background context dropped the request".to_string()).into())
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

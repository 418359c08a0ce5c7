#![allow(dead_code)]

use std::sync::{Arc, Once};

use clubby_core::mem::MemPeer;
use clubby_core::{
    CallbackFault, ClubbyError, ClubbyListener, ClubbySession, ConnectionState, Envelope,
    SessionConfig, Transport, TransportError,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEVICE: &str = "//api.cesanta.com/d/dev1";
pub const PSK: &str = "secret";
pub const BACKEND: &str = "//api.cesanta.com";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Observer that turns every event into a line of text.
pub struct Recorder {
    tx: mpsc::UnboundedSender<String>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn push(&self, line: String) {
        let _ = self.tx.send(line);
    }
}

impl ClubbyListener for Recorder {
    fn on_connected(&self) {
        self.push("connected".into());
    }

    fn on_connect_error(&self, cause: &TransportError) {
        self.push(format!("connect_error:{cause}"));
    }

    fn on_disconnected(&self) {
        self.push("disconnected".into());
    }

    fn on_data_sending(&self, text: &str) {
        self.push(format!("sending:{text}"));
    }

    fn on_data_received(&self, text: &str) {
        self.push(format!("received:{text}"));
    }

    fn on_error(&self, error: &ClubbyError) {
        self.push(format!("error:{error}"));
    }

    fn on_state_changed(&self, state: ConnectionState) {
        self.push(format!("state:{state}"));
    }

    fn on_callback_error(&self, fault: &CallbackFault) {
        self.push(format!("callback_error:{fault}"));
    }
}

pub struct Harness {
    pub session: Arc<ClubbySession>,
    pub peer: MemPeer,
    pub events: mpsc::UnboundedReceiver<String>,
    pub run: JoinHandle<Result<(), TransportError>>,
}

impl Harness {
    /// A session on an in-memory transport with its event loop running,
    /// not yet connected.
    pub fn new() -> Self {
        init_tracing();
        let (transport, peer) = Transport::mem_pair();
        let session = Arc::new(ClubbySession::new(
            transport,
            SessionConfig {
                device_id: DEVICE.into(),
                device_psk: PSK.into(),
                backend: BACKEND.into(),
                ..Default::default()
            },
        ));
        let (recorder, events) = Recorder::new();
        session.add_listener(recorder);
        let run = tokio::spawn(session.clone().run());
        Self {
            session,
            peer,
            events,
            run,
        }
    }

    pub async fn connected() -> Self {
        let mut harness = Self::new();
        harness.session.connect();
        harness
            .session
            .wait_for_state(ConnectionState::Connected)
            .await;
        harness.drain();
        harness
    }

    /// Next observer event that is not wire tracing.
    pub async fn next_event(&mut self) -> String {
        loop {
            let line = self.events.recv().await.expect("recorder alive");
            if !is_wire_trace(&line) {
                return line;
            }
        }
    }

    /// Everything recorded so far, wire tracing included.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.events.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Next envelope written by the client.
    pub async fn next_frame(&self) -> Envelope {
        self.peer
            .recv_envelope()
            .await
            .expect("client still connected")
            .expect("client wrote a valid envelope")
    }

    /// Deliver a JSON message to the client.
    pub fn deliver(&self, message: Value) {
        self.peer.send_text(message.to_string());
    }

    pub async fn stop(self) {
        self.session.shutdown();
        self.run
            .await
            .expect("event loop task")
            .expect("event loop ends cleanly");
    }
}

fn is_wire_trace(line: &str) -> bool {
    line.starts_with("sending:") || line.starts_with("received:")
}

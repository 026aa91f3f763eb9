//! Session orchestration: wires capture → encode → send and
//! receive → decode → playback together and owns startup/shutdown order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result, bail};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::AudioSystem;
use crate::config::Config;
use crate::gate::FrameGate;
use crate::playback::PlaybackBuffer;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::transport::Transport;

const EVENT_QUEUE: usize = 64;
const FRAME_QUEUE: usize = 32;

/// Factory that opens the device streams once the link is up. Swappable so
/// the session lifecycle can be driven on hosts with no sound hardware.
pub type AudioDriver = Box<
    dyn Fn(&Config, Arc<FrameGate>, Arc<PlaybackBuffer>, mpsc::Sender<Vec<u8>>) -> Result<AudioSystem>
        + Send
        + Sync,
>;

fn alsa_driver() -> AudioDriver {
    Box::new(|config, gate, buffer, frame_tx| {
        AudioSystem::start(
            &config.capture_device,
            &config.playback_device,
            gate,
            buffer,
            frame_tx,
        )
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct SessionCell(AtomicU8);

impl SessionCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionState::Idle as u8))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> SessionState {
        match self.0.load(Ordering::Acquire) {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }

    /// Atomic `from → to`; false when some other caller got there first,
    /// which is what makes start/stop idempotent across tasks.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Route one decoded protocol event. Runs on the dispatch task, never on an
/// audio callback thread.
pub fn dispatch_event(event: ServerEvent, playback: &PlaybackBuffer) {
    match event {
        ServerEvent::AudioDelta(pcm) => {
            log::debug!("Received {} bytes of audio", pcm.len());
            playback.append(&pcm);
        }
        ServerEvent::AudioDone => {
            log::info!("Remote finished speaking");
        }
        ServerEvent::Unknown(kind) => {
            log::info!("Ignoring event type '{}'", kind);
        }
    }
}

pub struct Session {
    config: Config,
    state: SessionCell,
    gate: Arc<FrameGate>,
    playback: Arc<PlaybackBuffer>,
    transport: std::sync::Mutex<Option<Arc<Transport>>>,
    audio: std::sync::Mutex<Option<AudioSystem>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    finished: Arc<Notify>,
    audio_driver: AudioDriver,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self::with_audio_driver(config, alsa_driver())
    }

    /// Build a session with a custom audio capability, e.g. a headless one
    /// for tests and audio-less hosts.
    pub fn with_audio_driver(config: Config, audio_driver: AudioDriver) -> Self {
        let gate = Arc::new(FrameGate::new(config.reengage_delay));
        let playback = Arc::new(PlaybackBuffer::new(gate.clone(), config.rearm_on_silence));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state: SessionCell::new(),
            gate,
            playback,
            transport: std::sync::Mutex::new(None),
            audio: std::sync::Mutex::new(None),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            shutdown_tx,
            finished: Arc::new(Notify::new()),
            audio_driver,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Connect, send the session configuration, start the pipelines and the
    /// audio device streams. On any failure the session lands in `Stopped`
    /// with the error surfaced.
    pub async fn start(&self) -> Result<()> {
        if !self.state.transition(SessionState::Idle, SessionState::Starting) {
            bail!("session already started");
        }

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE);
        let transport = match Transport::connect(&self.config, event_tx).await {
            Ok(t) => Arc::new(t),
            Err(e) => {
                self.state.set(SessionState::Stopped);
                return Err(e).context("failed to connect to realtime endpoint");
            }
        };

        transport.send(ClientEvent::response_create(&self.config.instructions));

        // receive → decode → playback
        let dispatch = {
            let playback = self.playback.clone();
            let finished = self.finished.clone();
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    dispatch_event(event, &playback);
                }
                log::info!("Inbound event stream ended");
                finished.notify_one();
            })
        };

        // capture → encode → send
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(FRAME_QUEUE);
        let uplink = {
            let transport = transport.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        frame = frame_rx.recv() => match frame {
                            Some(pcm) => transport.send(ClientEvent::audio_chunk(&pcm)),
                            None => break,
                        }
                    }
                }
                log::info!("Uplink pipeline exited");
            })
        };

        let audio = match (self.audio_driver)(
            &self.config,
            self.gate.clone(),
            self.playback.clone(),
            frame_tx,
        ) {
            Ok(a) => a,
            Err(e) => {
                transport.close().await;
                dispatch.abort();
                uplink.abort();
                self.state.set(SessionState::Stopped);
                return Err(e).context("failed to start audio streams");
            }
        };

        *self.transport.lock().unwrap() = Some(transport);
        *self.audio.lock().unwrap() = Some(audio);
        self.tasks.lock().await.extend([dispatch, uplink]);

        self.state.set(SessionState::Running);
        log::info!("Session running");
        Ok(())
    }

    /// Resolves when the inbound event stream ends, i.e. the link died or
    /// the remote closed; the caller should then call [`Session::stop`].
    pub async fn finished(&self) {
        self.finished.notified().await;
    }

    /// Orderly shutdown: signal the pipelines, close the link, stop the
    /// device threads, then wait for every task to finish. Idempotent and
    /// callable from any task.
    pub async fn stop(&self) {
        if !self.state.transition(SessionState::Running, SessionState::Stopping) {
            return;
        }
        log::info!("Stopping session");

        let _ = self.shutdown_tx.send(true);

        let transport = self.transport.lock().unwrap().take();
        if let Some(transport) = transport {
            transport.close().await;
        }

        // Joining the device threads blocks, so keep it off the runtime.
        let audio = self.audio.lock().unwrap().take();
        if let Some(mut audio) = audio {
            let _ = tokio::task::spawn_blocking(move || audio.stop()).await;
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.state.set(SessionState::Stopped);
        log::info!("Session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::Message;

    fn test_config() -> Config {
        Config {
            api_key: "test-key".to_string(),
            ws_url: "ws://127.0.0.1:1/".to_string(),
            instructions: "Please assist the user.".to_string(),
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            reengage_delay: Duration::from_millis(500),
            rearm_on_silence: true,
        }
    }

    fn test_playback() -> PlaybackBuffer {
        let gate = Arc::new(FrameGate::new(Duration::from_millis(500)));
        PlaybackBuffer::new(gate, true)
    }

    #[test]
    fn audio_delta_lands_in_playback_buffer() {
        let playback = test_playback();
        dispatch_event(ServerEvent::AudioDelta(vec![9; 4096]), &playback);
        assert_eq!(playback.len(), 4096);
    }

    #[test]
    fn unknown_then_done_keeps_dispatching() {
        let playback = test_playback();
        dispatch_event(ServerEvent::Unknown("foo".to_string()), &playback);
        dispatch_event(ServerEvent::AudioDone, &playback);
        dispatch_event(ServerEvent::AudioDelta(vec![1, 2]), &playback);
        assert_eq!(playback.len(), 2);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let session = Session::new(test_config());
        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn stop_while_running_is_bounded_and_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Hold the connection open until the client closes it.
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        });

        let mut config = test_config();
        config.ws_url = format!("ws://{}/", addr);
        let session = Session::with_audio_driver(
            config,
            Box::new(|_, _, _, _| Ok(AudioSystem::headless())),
        );

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Running);

        tokio::time::timeout(Duration::from_secs(5), session.stop())
            .await
            .expect("stop must finish in bounded time");
        assert_eq!(session.state(), SessionState::Stopped);

        // A second stop is a no-op.
        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);

        let _ = server.await;
    }

    #[tokio::test]
    async fn failed_connect_lands_in_stopped() {
        let session = Session::new(test_config());
        assert!(session.start().await.is_err());
        assert_eq!(session.state(), SessionState::Stopped);
        // And stop afterwards stays a no-op.
        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }
}

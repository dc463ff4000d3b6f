//! Output backends.
//!
//! An [`OutputBackend`] opens an [`OutputContext`] that keeps pulling audio from
//! the shared transport until closed. [`CpalOutput`] drives a real device from
//! a dedicated thread (CPAL streams are not `Send` on every host);
//! [`OfflineOutput`] renders on demand for headless use and tests.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::decode::OUTPUT_CHANNELS;
use crate::device;
use crate::error::{EngineError, Result};
use crate::playback;
use crate::transport::SharedTransport;

/// Opens the audio output the engine renders into.
pub trait OutputBackend: Send + Sync {
    /// Start pulling from `transport`. The transport may still be unprepared;
    /// the engine prepares it with [`OutputContext::sample_rate`] right after.
    fn open(&self, transport: SharedTransport) -> Result<Box<dyn OutputContext>>;
}

/// A running output stream.
pub trait OutputContext: Send {
    fn sample_rate(&self) -> u32;
    /// Resume output if the host suspended it.
    fn resume(&mut self) -> Result<()>;
    /// Stop pulling audio and release the device.
    fn close(&mut self);
}

/// Real device output through CPAL.
#[derive(Clone, Debug, Default)]
pub struct CpalOutput {
    device: Option<String>,
    preferred_rate: u32,
}

impl CpalOutput {
    /// `device` is a case-insensitive name substring; `None` selects the host default.
    pub fn new(device: Option<String>, preferred_rate: u32) -> Self {
        Self {
            device,
            preferred_rate,
        }
    }
}

enum OutputCommand {
    Resume,
    Close,
}

struct OutputReady {
    sample_rate: u32,
    device: String,
}

impl OutputBackend for CpalOutput {
    fn open(&self, transport: SharedTransport) -> Result<Box<dyn OutputContext>> {
        let (ready_tx, ready_rx) = bounded::<Result<OutputReady>>(1);
        let (cmd_tx, cmd_rx) = unbounded::<OutputCommand>();
        let needle = self.device.clone();
        let preferred_rate = self.preferred_rate;

        let join = thread::Builder::new()
            .name("deck-output".to_string())
            .spawn(move || output_thread(needle, preferred_rate, transport, ready_tx, cmd_rx))
            .map_err(|e| EngineError::Init(format!("spawn output thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(ready)) => {
                tracing::info!(
                    device = %ready.device,
                    sample_rate = ready.sample_rate,
                    "audio output started"
                );
                Ok(Box::new(CpalContext {
                    sample_rate: ready.sample_rate,
                    cmd_tx,
                    join: Some(join),
                }))
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(EngineError::Init("output thread exited early".to_string())),
        }
    }
}

fn output_thread(
    needle: Option<String>,
    preferred_rate: u32,
    transport: SharedTransport,
    ready_tx: Sender<Result<OutputReady>>,
    cmd_rx: Receiver<OutputCommand>,
) {
    let opened = (|| -> anyhow::Result<(cpal::Stream, OutputReady)> {
        let host = cpal::default_host();
        let selection = device::select_output(&host, needle.as_deref(), preferred_rate)?;
        let stream = playback::build_output_stream(
            &selection.device,
            &selection.stream_config,
            selection.sample_format,
            &transport,
        )?;
        stream.play()?;
        Ok((
            stream,
            OutputReady {
                sample_rate: selection.stream_config.sample_rate,
                device: selection.name,
            },
        ))
    })();

    let stream = match opened {
        Ok((stream, ready)) => {
            let _ = ready_tx.send(Ok(ready));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(EngineError::Init(format!("{e:#}"))));
            return;
        }
    };

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            OutputCommand::Resume => {
                if let Err(e) = stream.play() {
                    tracing::warn!(error = %e, "output resume failed");
                }
            }
            OutputCommand::Close => break,
        }
    }
    drop(stream);
    tracing::info!("audio output closed");
}

struct CpalContext {
    sample_rate: u32,
    cmd_tx: Sender<OutputCommand>,
    join: Option<JoinHandle<()>>,
}

impl OutputContext for CpalContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<()> {
        self.cmd_tx
            .send(OutputCommand::Resume)
            .map_err(|_| EngineError::Output("output thread is gone".to_string()))
    }

    fn close(&mut self) {
        let _ = self.cmd_tx.send(OutputCommand::Close);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Headless output that renders only when asked.
///
/// Clones share the same attachment, so a test can keep one handle while the
/// engine owns another.
#[derive(Clone)]
pub struct OfflineOutput {
    sample_rate: u32,
    fail_open: bool,
    attached: Arc<Mutex<Option<SharedTransport>>>,
}

impl OfflineOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fail_open: false,
            attached: Arc::new(Mutex::new(None)),
        }
    }

    /// Backend whose `open` always fails, as a machine without audio hardware would.
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::new(48_000)
        }
    }

    pub fn is_open(&self) -> bool {
        self.attached.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Render `frames` stereo frames. Returns silence while closed.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames * OUTPUT_CHANNELS];
        let transport = self.attached.lock().ok().and_then(|a| a.clone());
        if let Some(transport) = transport {
            if let Ok(mut node) = transport.lock() {
                node.render(&mut out);
            }
        }
        out
    }

    /// Render `secs` seconds in callback-sized blocks.
    pub fn render_secs(&self, secs: f64) -> Vec<f32> {
        const BLOCK: usize = 512;
        let total = (secs * self.sample_rate as f64).round() as usize;
        let mut out = Vec::with_capacity(total * OUTPUT_CHANNELS);
        let mut left = total;
        while left > 0 {
            let n = left.min(BLOCK);
            out.extend(self.render(n));
            left -= n;
        }
        out
    }
}

impl OutputBackend for OfflineOutput {
    fn open(&self, transport: SharedTransport) -> Result<Box<dyn OutputContext>> {
        if self.fail_open {
            return Err(EngineError::Init("no audio output available".to_string()));
        }
        if let Ok(mut attached) = self.attached.lock() {
            *attached = Some(transport);
        }
        Ok(Box::new(OfflineContext {
            sample_rate: self.sample_rate,
            attached: self.attached.clone(),
        }))
    }
}

struct OfflineContext {
    sample_rate: u32,
    attached: Arc<Mutex<Option<SharedTransport>>>,
}

impl OutputContext for OfflineContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut attached) = self.attached.lock() {
            *attached = None;
        }
    }
}

//! The playback pipeline
//!
//! Two tasks per active playback: the pipeline task pulls PCM, encodes,
//! seals and queues finished datagrams; the sender task paces delivery at
//! one frame per 20 ms. The bounded queue between them (about one second of
//! audio) keeps encode throughput and network pacing independent.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use accord_core::{Packetizer, CHANNELS, FRAME_MILLIS, FRAME_PCM_LEN, FRAME_SAMPLES};
use accord_transport::UdpTransport;

use crate::codec::{AudioEncoder, MAX_OPUS_LEN};
use crate::crypto::Sealer;
use crate::source::AudioSource;

/// Datagrams buffered between encode and send (~1 s of audio)
pub const PACKET_QUEUE: usize = 50;

/// Cooperative control flags polled by the pipeline every cycle
#[derive(Default)]
pub struct PlaybackControl {
    stop: AtomicBool,
    pause: AtomicBool,
}

impl PlaybackControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.store(paused, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }
}

/// Encode/encrypt loop: runs until the source is exhausted, the stop flag
/// is set, or the encoder fails
///
/// Sequence numbers and timestamps are taken in strict emission order; a
/// suppressed (zero-length) encode emits nothing and advances nothing.
pub(crate) async fn run_pipeline<E: AudioEncoder>(
    mut source: Box<dyn AudioSource>,
    mut encoder: E,
    sealer: Sealer,
    packetizer: Arc<Mutex<Packetizer>>,
    control: Arc<PlaybackControl>,
    tx: mpsc::Sender<Vec<u8>>,
) {
    let mut pcm = [0i16; FRAME_PCM_LEN];
    let mut opus = [0u8; MAX_OPUS_LEN];

    loop {
        if control.is_stopped() {
            debug!("pipeline stopped by flag");
            break;
        }
        if control.is_paused() {
            tokio::time::sleep(Duration::from_millis(FRAME_MILLIS)).await;
            continue;
        }

        let frames = source.read(&mut pcm);
        let end_of_stream = frames < FRAME_SAMPLES;

        if frames > 0 {
            // A short final frame is played zero-padded
            pcm[frames * CHANNELS..].fill(0);

            match encoder.encode(&pcm, &mut opus) {
                Err(e) => {
                    error!("encode failed, ending playback: {}", e);
                    break;
                }
                Ok(0) => {
                    // Silence-suppressed: not emitted, counters untouched
                }
                Ok(len) => {
                    let header = packetizer.lock().next_header(FRAME_SAMPLES as u32);
                    match sealer.seal(&header, &opus[..len]) {
                        Err(e) => {
                            error!("seal failed, ending playback: {}", e);
                            break;
                        }
                        Ok(datagram) => {
                            if tx.send(datagram).await.is_err() {
                                debug!("sender gone, ending playback");
                                break;
                            }
                        }
                    }
                }
            }
        }

        if end_of_stream {
            debug!("source exhausted after {} frame(s) this cycle", frames);
            break;
        }
    }
}

/// Pacing loop: one datagram per 20 ms, measuring elapsed time each cycle
/// rather than sleeping a fixed amount; exits when the queue closes and is
/// drained
///
/// A failed send is logged and the frame dropped; losing one 20 ms frame is
/// preferred over blocking the real-time path.
pub(crate) async fn run_sender(mut rx: mpsc::Receiver<Vec<u8>>, udp: UdpTransport) {
    let mut tick = tokio::time::interval(Duration::from_millis(FRAME_MILLIS));

    while let Some(datagram) = rx.recv().await {
        tick.tick().await;
        if let Err(e) = udp.send(&datagram).await {
            warn!("udp send failed, dropping frame: {}", e);
        }
    }
}

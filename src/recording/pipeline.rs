// SPDX-License-Identifier: GPL-3.0-only

//! Encoding pipeline: one supervised muxer process per recorded input
//!
//! Ingest callbacks run on capture threads and must never block, so writes
//! go through a drop-oldest frame ring; a writer task drains the ring into
//! the muxer's stdin and suspends on pipe backpressure. A pipe failure puts
//! the pipeline into an error state and subsequent writes are counted as
//! drops; it never propagates into the frame-delivery path.

use super::fifo;
use super::muxer::{MuxerCommand, MuxerConfig, build_command};
use crate::buffers::{AudioRingBuffer, FramePool, FrameRingBuffer};
use crate::constants::frames::{AUDIO_RING_BYTES, POOL_CAPACITY, RECORD_RING_CAPACITY};
use crate::constants::timing::ENCODE_STOP_TIMEOUT;
use crate::devices::types::{AudioSampleBlock, VideoFrame};
use crate::errors::{RecordingError, RecordingResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drain chunk for the audio feed
const AUDIO_CHUNK_BYTES: usize = 8192;

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Error,
    Finalized,
}

struct AudioFeed {
    ring: AudioRingBuffer,
    closed: AtomicBool,
}

struct Shared {
    ring: FrameRingBuffer,
    audio: Option<AudioFeed>,
    state: Mutex<PipelineState>,
    frames_written: AtomicU64,
    error_drops: AtomicU64,
    audio_drops: AtomicU64,
}

impl Shared {
    fn mark_error(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == PipelineState::Running {
            *state = PipelineState::Error;
        }
    }
}

/// Supervises one muxer process and feeds it frames and samples
pub struct EncodingPipeline {
    shared: Arc<Shared>,
    pool: FramePool,
    config: MuxerConfig,
    child: tokio::sync::Mutex<Option<Child>>,
    video_writer: Mutex<Option<JoinHandle<()>>>,
    audio_writer: Mutex<Option<JoinHandle<()>>>,
    fifo_path: Option<PathBuf>,
}

impl EncodingPipeline {
    /// Spawn the muxer process and start the writer tasks
    pub async fn initialize(
        config: MuxerConfig,
        command: &MuxerCommand,
    ) -> RecordingResult<Arc<Self>> {
        if let Some(parent) = config.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RecordingError::OutputPath(e.to_string()))?;
        }

        // Audio rides a FIFO alongside the stdin video feed
        let fifo_path = match (&config.audio_format, command.supports_audio()) {
            (Some(_), true) => {
                let path = std::env::temp_dir()
                    .join(format!("swingcast-{}.fifo", uuid::Uuid::new_v4().simple()));
                match fifo::create_fifo(&path) {
                    Ok(()) => Some(path),
                    Err(e) => {
                        warn!(error = %e, "Audio fifo unavailable, recording video only");
                        None
                    }
                }
            }
            _ => None,
        };

        let (program, args) = build_command(command, &config, fifo_path.as_deref());
        info!(
            program = %program,
            output = %config.file_path.display(),
            audio = fifo_path.is_some(),
            "Starting muxer process"
        );

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if let Some(path) = &fifo_path {
                    fifo::remove_fifo(path);
                }
                RecordingError::MuxerSpawnFailed(format!("{}: {}", program, e))
            })?;

        let shared = Arc::new(Shared {
            ring: FrameRingBuffer::new(RECORD_RING_CAPACITY),
            audio: fifo_path.as_ref().map(|_| AudioFeed {
                ring: AudioRingBuffer::new(AUDIO_RING_BYTES),
                closed: AtomicBool::new(false),
            }),
            state: Mutex::new(PipelineState::Running),
            frames_written: AtomicU64::new(0),
            error_drops: AtomicU64::new(0),
            audio_drops: AtomicU64::new(0),
        });

        // Drain stderr so the muxer can't block on it; surface its complaints
        if let Some(stderr) = child.stderr.take() {
            let output = config.file_path.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(output = %output, line = %line, "muxer");
                }
            });
        }

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecordingError::MuxerSpawnFailed("muxer stdin unavailable".into()))?;

        let writer_shared = Arc::clone(&shared);
        let video_writer = tokio::spawn(async move {
            while let Some(frame) = writer_shared.ring.dequeue().await {
                if let Err(e) = stdin.write_all(frame.data()).await {
                    warn!(error = %e, "Muxer stdin write failed");
                    writer_shared.mark_error();
                    break;
                }
                writer_shared.frames_written.fetch_add(1, Ordering::Relaxed);
            }
            // Closing stdin tells the muxer to flush and finalize the file
            let _ = stdin.shutdown().await;
        });

        // The audio feed drains the sample ring into the FIFO on a fixed
        // cadence; the lossy ring keeps the device callback wait-free
        let audio_writer = fifo_path.as_ref().map(|path| {
            let path = path.clone();
            let audio_shared = Arc::clone(&shared);
            tokio::spawn(async move {
                // Open blocks until the muxer opens the read end
                let mut file = match tokio::fs::OpenOptions::new().write(true).open(&path).await {
                    Ok(file) => file,
                    Err(e) => {
                        warn!(error = %e, "Audio fifo open failed");
                        return;
                    }
                };
                let Some(feed) = &audio_shared.audio else {
                    return;
                };
                let mut chunk = vec![0u8; AUDIO_CHUNK_BYTES];
                loop {
                    let n = feed.ring.read(&mut chunk);
                    if n > 0 {
                        if let Err(e) = file.write_all(&chunk[..n]).await {
                            debug!(error = %e, "Audio fifo write failed");
                            audio_shared.mark_error();
                            break;
                        }
                    } else if feed.closed.load(Ordering::SeqCst) {
                        break;
                    } else {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
                let _ = file.shutdown().await;
            })
        });

        Ok(Arc::new(Self {
            shared,
            pool: FramePool::new(POOL_CAPACITY),
            config,
            child: tokio::sync::Mutex::new(Some(child)),
            video_writer: Mutex::new(Some(video_writer)),
            audio_writer: Mutex::new(audio_writer),
            fifo_path,
        }))
    }

    /// Best-effort frame write; never blocks the capture thread
    pub fn write_video_frame(&self, frame: &VideoFrame) {
        if *self.shared.state.lock().unwrap() != PipelineState::Running {
            self.shared.error_drops.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.shared.ring.publish(frame.copy_into(&self.pool));
    }

    /// Best-effort audio write; a full ring drops the block's tail
    pub fn write_audio_samples(&self, block: &AudioSampleBlock) {
        if *self.shared.state.lock().unwrap() != PipelineState::Running {
            return;
        }
        let Some(feed) = &self.shared.audio else {
            return;
        };
        let written = feed.ring.write(block.data());
        if written < block.data().len() {
            self.shared.audio_drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Flush, close the feed, and wait for the muxer to exit
    ///
    /// Waits up to the encode stop window for a graceful exit, then
    /// force-terminates. Returns the final file size.
    pub async fn finalize(&self) -> RecordingResult<u64> {
        self.shared.ring.close();

        let video_writer = self.video_writer.lock().unwrap().take();
        if let Some(writer) = video_writer {
            // A writer stuck on pipe backpressure unblocks when the muxer
            // is killed below
            if tokio::time::timeout(ENCODE_STOP_TIMEOUT, writer)
                .await
                .is_err()
            {
                warn!("Muxer feed did not drain, force-terminating");
                if let Some(child) = self.child.lock().await.as_mut() {
                    let _ = child.start_kill();
                }
            }
        }

        // Frames still queued after the writer stopped were never delivered
        let leftover = self.shared.ring.len() as u64;
        if leftover > 0 {
            self.shared.error_drops.fetch_add(leftover, Ordering::Relaxed);
        }

        // Signal end-of-stream so the audio feed drains and closes the FIFO
        if let Some(feed) = &self.shared.audio {
            feed.closed.store(true, Ordering::SeqCst);
        }
        let audio_writer = self.audio_writer.lock().unwrap().take();
        if let Some(writer) = audio_writer {
            let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
        }

        let child = self.child.lock().await.take();
        let mut exit_ok = true;
        if let Some(mut child) = child {
            match tokio::time::timeout(ENCODE_STOP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    exit_ok = status.success();
                    if !exit_ok {
                        warn!(status = %status, "Muxer exited with failure");
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Muxer wait failed");
                    exit_ok = false;
                }
                Err(_) => {
                    warn!("Muxer did not exit in time, killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    exit_ok = false;
                }
            }
        }

        if let Some(path) = &self.fifo_path {
            fifo::remove_fifo(path);
        }

        let size = self.file_size();
        {
            let mut state = self.shared.state.lock().unwrap();
            if !exit_ok {
                *state = PipelineState::Error;
            } else if *state == PipelineState::Running {
                *state = PipelineState::Finalized;
            }
        }
        info!(
            output = %self.config.file_path.display(),
            bytes = size,
            frames = self.frames_written(),
            dropped = self.dropped_frames(),
            "Pipeline finalized"
        );
        if exit_ok {
            Ok(size)
        } else {
            Err(RecordingError::MuxerFailed(format!(
                "muxer for {} did not exit cleanly",
                self.config.file_path.display()
            )))
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock().unwrap()
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.frames_written.load(Ordering::Relaxed)
    }

    /// Ring overflow plus post-error discards
    pub fn dropped_frames(&self) -> u64 {
        self.shared.ring.drop_count() + self.shared.error_drops.load(Ordering::Relaxed)
    }

    pub fn dropped_audio_blocks(&self) -> u64 {
        self.shared.audio_drops.load(Ordering::Relaxed)
    }

    pub fn file_path(&self) -> &std::path::Path {
        &self.config.file_path
    }

    /// Bytes currently on disk for this input
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.config.file_path)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RecordingPreset;
    use crate::devices::types::{FrameRate, PixelFormat, VideoMode};

    fn tiny_mode() -> VideoMode {
        VideoMode {
            width: 8,
            height: 2,
            frame_rate: FrameRate::FPS_30,
            pixel_format: PixelFormat::Uyvy,
            interlaced: false,
            label: "test".into(),
        }
    }

    fn config(path: PathBuf) -> MuxerConfig {
        MuxerConfig {
            file_path: path,
            video_mode: tiny_mode(),
            audio_format: None,
            preset: RecordingPreset::Medium,
            hw_accel: Default::default(),
            use_fragmented_mp4: true,
        }
    }

    fn frame(pool: &FramePool, number: u64, fill: u8) -> VideoFrame {
        let mode = tiny_mode();
        let mut buffer = pool.rent(mode.frame_bytes());
        buffer.as_mut_slice().fill(fill);
        VideoFrame::new(
            buffer,
            mode.clone(),
            mode.row_bytes(),
            Duration::from_millis(number * 33),
            number,
        )
    }

    fn sink_command(out: &std::path::Path) -> MuxerCommand {
        MuxerCommand::custom(
            "sh",
            vec!["-c".into(), format!("cat > '{}'", out.display())],
        )
    }

    #[tokio::test]
    async fn test_frames_reach_muxer_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("sink.bin");
        let pipeline = EncodingPipeline::initialize(
            config(dir.path().join("out.mp4")),
            &sink_command(&sink),
        )
        .await
        .unwrap();

        let pool = FramePool::new(4);
        for n in 0..5 {
            pipeline.write_video_frame(&frame(&pool, n, n as u8));
        }
        pipeline.finalize().await.unwrap();

        let written = std::fs::read(&sink).unwrap();
        assert_eq!(written.len(), 5 * tiny_mode().frame_bytes());
        // Last frame's fill value lands at the tail
        assert_eq!(*written.last().unwrap(), 4);
        assert_eq!(pipeline.frames_written(), 5);
        assert_eq!(pipeline.dropped_frames(), 0);
        assert_eq!(pipeline.state(), PipelineState::Finalized);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let command = MuxerCommand::custom(
            "sh",
            vec!["-c".into(), "cat > /dev/null; exit 3".into()],
        );
        let pipeline = EncodingPipeline::initialize(config(dir.path().join("out.mp4")), &command)
            .await
            .unwrap();

        let pool = FramePool::new(4);
        pipeline.write_video_frame(&frame(&pool, 0, 1));
        let result = pipeline.finalize().await;
        assert!(matches!(result, Err(RecordingError::MuxerFailed(_))));
        assert_eq!(pipeline.state(), PipelineState::Error);
    }

    #[tokio::test]
    async fn test_writes_after_finalize_count_as_drops() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("sink.bin");
        let pipeline = EncodingPipeline::initialize(
            config(dir.path().join("out.mp4")),
            &sink_command(&sink),
        )
        .await
        .unwrap();
        pipeline.finalize().await.unwrap();

        let pool = FramePool::new(4);
        pipeline.write_video_frame(&frame(&pool, 0, 0));
        pipeline.write_video_frame(&frame(&pool, 1, 0));
        assert_eq!(pipeline.dropped_frames(), 2);
        assert_eq!(pipeline.frames_written(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = MuxerCommand::custom("definitely-not-a-real-muxer", Vec::new());
        let result = EncodingPipeline::initialize(config(dir.path().join("out.mp4")), &command).await;
        assert!(matches!(result, Err(RecordingError::MuxerSpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_slow_muxer_sheds_oldest_frames() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("sink.bin");
        // The sink sleeps before reading, so early frames pile up in the ring
        let command = MuxerCommand::custom(
            "sh",
            vec![
                "-c".into(),
                format!("sleep 0.5; cat > '{}'", sink.display()),
            ],
        );
        let mut big_mode = tiny_mode();
        big_mode.width = 256;
        big_mode.height = 64; // 32 KiB frames, larger than the pipe buffer soaks
        let mut config = config(dir.path().join("out.mp4"));
        config.video_mode = big_mode.clone();

        let pipeline = EncodingPipeline::initialize(config, &command).await.unwrap();
        let pool = FramePool::new(4);
        for n in 0..40 {
            let mut buffer = pool.rent(big_mode.frame_bytes());
            buffer.as_mut_slice().fill(n as u8);
            pipeline.write_video_frame(&VideoFrame::new(
                buffer,
                big_mode.clone(),
                big_mode.row_bytes(),
                Duration::ZERO,
                n,
            ));
        }
        pipeline.finalize().await.unwrap();

        assert!(pipeline.dropped_frames() > 0, "expected ring overflow");
        assert_eq!(pipeline.frames_written() + pipeline.dropped_frames(), 40);
        let written = std::fs::metadata(&sink).unwrap().len();
        assert_eq!(written, pipeline.frames_written() * big_mode.frame_bytes() as u64);
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Clip export pipeline
//!
//! A completed swing sequence becomes a clip file: the in/out range is cut
//! from the simulator recording, overlays are composited when configured,
//! and the sequence record is updated with the result. Stages run on the
//! blocking pool, off the program-change callback thread, with bounded
//! retry on transient state errors.

pub mod clipper;
pub mod overlay;

pub use clipper::{ClipHandle, ClippingService, FfmpegClipper};
pub use overlay::{
    FfmpegOverlayCompositor, LogoBug, LowerThird, LowerThirdPosition, OverlayCompositor,
    OverlayConfig,
};

use crate::errors::{ExportError, ExportErrorKind, ExportResult};
use crate::events::{EventHub, Subscription};
use crate::sequence::{ExportStatus, GolfSession, SequenceRecorder, SequenceStore, SwingSequence};
use crate::storage::sanitize_filename;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Cooperative cancellation flag threaded through export stages
pub type CancelFlag = Arc<AtomicBool>;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Per-stage status event
#[derive(Debug, Clone)]
pub struct ClipExportProgress {
    pub swing_number: u32,
    pub status_label: String,
}

/// Terminal event for one export
#[derive(Debug, Clone)]
pub struct ClipExportCompleted {
    pub swing_number: u32,
    pub output_path: Option<PathBuf>,
    pub duration: Option<Duration>,
    pub success: bool,
    pub error: Option<String>,
}

/// Runs extract → overlay → persist for completed sequences
pub struct ClipExporter {
    clipper: Arc<dyn ClippingService>,
    compositor: Arc<dyn OverlayCompositor>,
    store: Arc<dyn SequenceStore>,
    progress: EventHub<ClipExportProgress>,
    completed: EventHub<ClipExportCompleted>,
}

impl ClipExporter {
    pub fn new(
        clipper: Arc<dyn ClippingService>,
        compositor: Arc<dyn OverlayCompositor>,
        store: Arc<dyn SequenceStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clipper,
            compositor,
            store,
            progress: EventHub::new(),
            completed: EventHub::new(),
        })
    }

    pub fn progress(&self) -> &EventHub<ClipExportProgress> {
        &self.progress
    }

    pub fn completed(&self) -> &EventHub<ClipExportCompleted> {
        &self.completed
    }

    /// Export one sequence; returns the updated record
    pub async fn export(
        &self,
        mut sequence: SwingSequence,
        session: &GolfSession,
        overlays: &OverlayConfig,
        cancel: CancelFlag,
    ) -> ExportResult<SwingSequence> {
        let clip_duration = sequence
            .out_point
            .map(|out| (out - sequence.in_point).to_std().unwrap_or_default());
        let result = self
            .run_stages(&mut sequence, session, overlays, &cancel)
            .await;

        match result {
            Ok(final_path) => {
                sequence.export_status = ExportStatus::Completed;
                sequence.exported_clip_path = Some(final_path.clone());
                self.store.save(&sequence);
                self.publish_status(&sequence);
                self.completed.emit(&ClipExportCompleted {
                    swing_number: sequence.sequence_number,
                    output_path: Some(final_path),
                    duration: clip_duration,
                    success: true,
                    error: None,
                });
                Ok(sequence)
            }
            Err(e) => {
                warn!(
                    sequence = sequence.sequence_number,
                    error = %e,
                    "Clip export failed"
                );
                sequence.export_status = ExportStatus::Failed;
                self.store.save(&sequence);
                self.publish_status(&sequence);
                self.completed.emit(&ClipExportCompleted {
                    swing_number: sequence.sequence_number,
                    output_path: None,
                    duration: clip_duration,
                    success: false,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Export on a background task; the outcome arrives via `completed`
    pub fn spawn_export(
        self: &Arc<Self>,
        sequence: SwingSequence,
        session: GolfSession,
        overlays: OverlayConfig,
        cancel: CancelFlag,
    ) -> tokio::task::JoinHandle<()> {
        let exporter = Arc::clone(self);
        tokio::spawn(async move {
            let _ = exporter.export(sequence, &session, &overlays, cancel).await;
        })
    }

    /// Auto-export every sequence the recorder completes
    ///
    /// Must be called from within the runtime; completion handlers fire on
    /// capture threads, so the spawn goes through a captured handle.
    pub fn attach(
        self: &Arc<Self>,
        recorder: &SequenceRecorder,
        session: GolfSession,
        overlays: OverlayConfig,
        cancel: CancelFlag,
    ) -> Subscription<SwingSequence> {
        let exporter = Arc::clone(self);
        let runtime = tokio::runtime::Handle::current();
        recorder.sequence_completed().subscribe(move |sequence| {
            let exporter = Arc::clone(&exporter);
            let sequence = sequence.clone();
            let session = session.clone();
            let overlays = overlays.clone();
            let cancel = Arc::clone(&cancel);
            runtime.spawn(async move {
                let _ = exporter.export(sequence, &session, &overlays, cancel).await;
            });
        })
    }

    async fn run_stages(
        &self,
        sequence: &mut SwingSequence,
        session: &GolfSession,
        overlays: &OverlayConfig,
        cancel: &CancelFlag,
    ) -> ExportResult<PathBuf> {
        let out_point = sequence.out_point.ok_or_else(|| {
            ExportError::new(ExportErrorKind::BadSequence, "sequence has no out point")
        })?;
        // Offsets are durations into the simulator recording, clamped at 0
        let in_offset = (sequence.in_point - session.start_time_utc)
            .to_std()
            .unwrap_or_default();
        let out_offset = (out_point - session.start_time_utc)
            .to_std()
            .unwrap_or_default();

        let clip_name = format!(
            "Swing_{:03}_{}",
            sequence.sequence_number,
            sanitize_filename(&session.golfer_name)
        );
        let output_dir = session
            .source2_recording_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("Swings");

        sequence.export_status = ExportStatus::Extracting;
        self.store.save(sequence);
        self.publish_status(sequence);

        let base_path = {
            let clipper = Arc::clone(&self.clipper);
            let recording = session.source2_recording_path.clone();
            let name = clip_name.clone();
            let dir = output_dir.clone();
            let cancel = Arc::clone(cancel);
            run_blocking(move || {
                retry("extract", &cancel, || {
                    clipper.set_active_recording(&recording)?;
                    let clip = clipper.create_clip(&name, in_offset, out_offset)?;
                    clipper.extract_clip(&clip, &dir)
                })
            })
            .await?
        };

        if !overlays.has_overlays() {
            info!(clip = %base_path.display(), "Clip exported without overlays");
            return Ok(base_path);
        }

        sequence.export_status = ExportStatus::OverlayRendering;
        self.store.save(sequence);
        self.publish_status(sequence);

        let final_path = output_dir.join(format!("{}_final.mp4", clip_name));
        {
            let compositor = Arc::clone(&self.compositor);
            let base = base_path.clone();
            let target = final_path.clone();
            let golfer = session.golfer_name.clone();
            let overlays = overlays.clone();
            let cancel = Arc::clone(cancel);
            run_blocking(move || {
                retry("overlay", &cancel, || {
                    compositor.export_with_overlays(&base, &target, Some(&golfer), &overlays)
                })
            })
            .await?;
        }
        info!(clip = %final_path.display(), "Clip exported with overlays");
        Ok(final_path)
    }

    fn publish_status(&self, sequence: &SwingSequence) {
        self.progress.emit(&ClipExportProgress {
            swing_number: sequence.sequence_number,
            status_label: sequence.export_status.to_string(),
        });
    }
}

/// Run a blocking stage on the blocking pool
async fn run_blocking<T, F>(op: F) -> ExportResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ExportResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| ExportError::subprocess(format!("export stage panicked: {}", e)))?
}

/// Exponential-backoff retry over invalid-operation failures only
fn retry<T>(
    stage: &str,
    cancel: &AtomicBool,
    mut op: impl FnMut() -> ExportResult<T>,
) -> ExportResult<T> {
    let mut delay = RETRY_BASE_DELAY;
    for attempt in 1..=RETRY_ATTEMPTS {
        if cancel.load(Ordering::SeqCst) {
            return Err(ExportError::new(
                ExportErrorKind::Cancelled,
                format!("{} cancelled", stage),
            ));
        }
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < RETRY_ATTEMPTS => {
                warn!(stage, attempt, error = %e, "Export stage failed, backing off");
                std::thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns within the attempt budget")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MemorySequenceStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use uuid::Uuid;

    /// Clipper that fails the first `failures` extracts with a retryable
    /// error, then writes the clip
    struct FlakyClipper {
        failures: u32,
        attempts: AtomicU32,
        kind: ExportErrorKind,
    }

    impl FlakyClipper {
        fn new(failures: u32, kind: ExportErrorKind) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
                kind,
            }
        }
    }

    impl ClippingService for FlakyClipper {
        fn set_active_recording(&self, _path: &Path) -> ExportResult<()> {
            Ok(())
        }

        fn create_clip(
            &self,
            name: &str,
            in_offset: Duration,
            out_offset: Duration,
        ) -> ExportResult<ClipHandle> {
            Ok(ClipHandle {
                name: name.to_string(),
                in_offset,
                out_offset,
            })
        }

        fn extract_clip(&self, clip: &ClipHandle, output_dir: &Path) -> ExportResult<PathBuf> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(ExportError::new(self.kind, "not ready"));
            }
            std::fs::create_dir_all(output_dir).unwrap();
            let path = output_dir.join(format!("{}.mp4", clip.name));
            std::fs::write(&path, b"clip").unwrap();
            Ok(path)
        }
    }

    struct CopyCompositor;

    impl OverlayCompositor for CopyCompositor {
        fn export_with_overlays(
            &self,
            base_path: &Path,
            final_path: &Path,
            _golfer_name: Option<&str>,
            _config: &OverlayConfig,
        ) -> ExportResult<()> {
            std::fs::copy(base_path, final_path)?;
            Ok(())
        }
    }

    fn session(dir: &Path) -> GolfSession {
        GolfSession::new(
            "Alice",
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            dir.join("session_sim.mp4"),
        )
    }

    fn sequence(session: &GolfSession) -> SwingSequence {
        SwingSequence {
            id: Uuid::new_v4(),
            session_id: session.id,
            sequence_number: 1,
            in_point: session.start_time_utc + chrono::Duration::seconds(10),
            out_point: Some(session.start_time_utc + chrono::Duration::seconds(18)),
            detection_method: None,
            export_status: ExportStatus::Pending,
            exported_clip_path: None,
        }
    }

    fn exporter(
        clipper: Arc<dyn ClippingService>,
        store: Arc<MemorySequenceStore>,
    ) -> Arc<ClipExporter> {
        ClipExporter::new(clipper, Arc::new(CopyCompositor), store)
    }

    #[tokio::test]
    async fn test_export_without_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySequenceStore::new());
        let exporter = exporter(
            Arc::new(FlakyClipper::new(0, ExportErrorKind::InvalidOperation)),
            Arc::clone(&store),
        );
        let session = session(dir.path());
        let sequence = sequence(&session);

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let statuses_clone = Arc::clone(&statuses);
        let _sub = exporter.progress().subscribe(move |p: &ClipExportProgress| {
            statuses_clone.lock().unwrap().push(p.status_label.clone());
        });

        let done = exporter
            .export(
                sequence.clone(),
                &session,
                &OverlayConfig::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(done.export_status, ExportStatus::Completed);
        let clip = done.exported_clip_path.unwrap();
        assert!(clip.ends_with("Swings/Swing_001_Alice.mp4"));
        assert!(clip.exists());
        assert_eq!(*statuses.lock().unwrap(), vec!["Extracting", "Completed"]);
        assert_eq!(
            store.get(sequence.id).unwrap().export_status,
            ExportStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_export_with_overlays_produces_final_clip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySequenceStore::new());
        let exporter = exporter(
            Arc::new(FlakyClipper::new(0, ExportErrorKind::InvalidOperation)),
            Arc::clone(&store),
        );
        let session = session(dir.path());
        let overlays = OverlayConfig {
            logo_bug: None,
            lower_third: Some(LowerThird {
                enabled: true,
                ..Default::default()
            }),
        };

        let done = exporter
            .export(
                sequence(&session),
                &session,
                &overlays,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        let clip = done.exported_clip_path.unwrap();
        assert!(clip.ends_with("Swings/Swing_001_Alice_final.mp4"));
        assert!(clip.exists());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySequenceStore::new());
        let clipper = Arc::new(FlakyClipper::new(2, ExportErrorKind::InvalidOperation));
        let exporter = exporter(Arc::clone(&clipper) as Arc<dyn ClippingService>, store);
        let session = session(dir.path());

        let done = exporter
            .export(
                sequence(&session),
                &session,
                &OverlayConfig::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(done.export_status, ExportStatus::Completed);
        assert_eq!(clipper.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySequenceStore::new());
        let clipper = Arc::new(FlakyClipper::new(10, ExportErrorKind::InvalidOperation));
        let exporter = exporter(
            Arc::clone(&clipper) as Arc<dyn ClippingService>,
            Arc::clone(&store),
        );
        let session = session(dir.path());
        let sequence = sequence(&session);

        let completions = Arc::new(Mutex::new(Vec::new()));
        let completions_clone = Arc::clone(&completions);
        let _sub = exporter
            .completed()
            .subscribe(move |c: &ClipExportCompleted| {
                completions_clone.lock().unwrap().push(c.clone())
            });

        let result = exporter
            .export(
                sequence.clone(),
                &session,
                &OverlayConfig::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(clipper.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(
            store.get(sequence.id).unwrap().export_status,
            ExportStatus::Failed
        );
        let completions = completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert!(!completions[0].success);
        assert!(completions[0].error.is_some());
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySequenceStore::new());
        let clipper = Arc::new(FlakyClipper::new(10, ExportErrorKind::Subprocess));
        let exporter = exporter(Arc::clone(&clipper) as Arc<dyn ClippingService>, store);
        let session = session(dir.path());

        let result = exporter
            .export(
                sequence(&session),
                &session,
                &OverlayConfig::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(clipper.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequence_without_out_point_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySequenceStore::new());
        let exporter = exporter(
            Arc::new(FlakyClipper::new(0, ExportErrorKind::InvalidOperation)),
            store,
        );
        let session = session(dir.path());
        let mut sequence = sequence(&session);
        sequence.out_point = None;

        let err = exporter
            .export(
                sequence,
                &session,
                &OverlayConfig::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExportErrorKind::BadSequence);
    }

    #[tokio::test]
    async fn test_cancelled_export_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySequenceStore::new());
        let clipper = Arc::new(FlakyClipper::new(10, ExportErrorKind::InvalidOperation));
        let exporter = exporter(Arc::clone(&clipper) as Arc<dyn ClippingService>, store);
        let session = session(dir.path());

        let err = exporter
            .export(
                sequence(&session),
                &session,
                &OverlayConfig::default(),
                Arc::new(AtomicBool::new(true)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExportErrorKind::Cancelled);
        assert_eq!(clipper.attempts.load(Ordering::SeqCst), 0);
    }
}

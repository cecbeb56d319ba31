// SPDX-License-Identifier: GPL-3.0-only

//! Swing sequences: program-change bookkeeping per golf session
//!
//! The sequence recorder watches the switcher. A cut to the simulator opens
//! a sequence, the matching cut back to the golfer closes it, and the
//! completed record carries the detection reason of the cut that opened it.
//! Unmatched cuts are discarded.

use crate::autocut::{CutReason, CutTriggered};
use crate::clock::Clock;
use crate::events::{EventHub, Subscription};
use crate::switcher::{ProgramSourceChanged, Switcher};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// An active golf session
#[derive(Debug, Clone)]
pub struct GolfSession {
    pub id: Uuid,
    pub golfer_name: String,
    pub start_time_utc: DateTime<Utc>,
    /// The simulator recording on disk; clips are extracted from it
    pub source2_recording_path: PathBuf,
}

impl GolfSession {
    pub fn new(
        golfer_name: impl Into<String>,
        start_time_utc: DateTime<Utc>,
        source2_recording_path: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            golfer_name: golfer_name.into(),
            start_time_utc,
            source2_recording_path,
        }
    }
}

/// Export lifecycle of a swing sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportStatus {
    #[default]
    Pending,
    Extracting,
    OverlayRendering,
    Completed,
    Failed,
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportStatus::Pending => write!(f, "Pending"),
            ExportStatus::Extracting => write!(f, "Extracting"),
            ExportStatus::OverlayRendering => write!(f, "OverlayRendering"),
            ExportStatus::Completed => write!(f, "Completed"),
            ExportStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One swing, pegged to wall-clock in/out points of the session
#[derive(Debug, Clone)]
pub struct SwingSequence {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sequence_number: u32,
    pub in_point: DateTime<Utc>,
    pub out_point: Option<DateTime<Utc>>,
    pub detection_method: Option<CutReason>,
    pub export_status: ExportStatus,
    pub exported_clip_path: Option<PathBuf>,
}

/// Persistence seam for sequences
pub trait SequenceStore: Send + Sync {
    fn save(&self, sequence: &SwingSequence);
    fn get(&self, id: Uuid) -> Option<SwingSequence>;
    fn sequences_for_session(&self, session_id: Uuid) -> Vec<SwingSequence>;
}

/// In-memory sequence store
#[derive(Default)]
pub struct MemorySequenceStore {
    sequences: Mutex<HashMap<Uuid, SwingSequence>>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceStore for MemorySequenceStore {
    fn save(&self, sequence: &SwingSequence) {
        self.sequences
            .lock()
            .unwrap()
            .insert(sequence.id, sequence.clone());
    }

    fn get(&self, id: Uuid) -> Option<SwingSequence> {
        self.sequences.lock().unwrap().get(&id).cloned()
    }

    fn sequences_for_session(&self, session_id: Uuid) -> Vec<SwingSequence> {
        let mut sequences: Vec<SwingSequence> = self
            .sequences
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect();
        sequences.sort_by_key(|s| s.sequence_number);
        sequences
    }
}

struct RecorderInner {
    open: Option<SwingSequence>,
    next_number: u32,
}

struct RecorderShared {
    session_id: Uuid,
    clock: Arc<dyn Clock>,
    inner: Mutex<RecorderInner>,
    sequence_completed: EventHub<SwingSequence>,
}

impl RecorderShared {
    fn on_program_changed(&self, change: &ProgramSourceChanged) {
        let now = self.clock.now_utc();
        let completed = {
            let mut inner = self.inner.lock().unwrap();
            match change.new {
                1 => {
                    if let Some(discarded) = inner.open.take() {
                        // No matching return cut ever arrived
                        debug!(
                            sequence = discarded.sequence_number,
                            "Discarding unmatched open sequence"
                        );
                    }
                    inner.next_number += 1;
                    inner.open = Some(SwingSequence {
                        id: Uuid::new_v4(),
                        session_id: self.session_id,
                        sequence_number: inner.next_number,
                        in_point: now,
                        out_point: None,
                        detection_method: None,
                        export_status: ExportStatus::Pending,
                        exported_clip_path: None,
                    });
                    None
                }
                0 => match inner.open.take() {
                    Some(mut sequence) => {
                        sequence.out_point = Some(now);
                        Some(sequence)
                    }
                    None => {
                        debug!("Discarding return cut with no open sequence");
                        None
                    }
                },
                _ => None,
            }
        };
        if let Some(sequence) = completed {
            info!(
                sequence = sequence.sequence_number,
                method = ?sequence.detection_method.map(|r| r.as_str()),
                "Sequence completed"
            );
            self.sequence_completed.emit(&sequence);
        }
    }

    fn on_cut(&self, cut: &CutTriggered) {
        // The cut that opened the sequence names the detection method;
        // stored on the open record so emission order never matters
        if cut.target_source_index == 1 {
            let mut inner = self.inner.lock().unwrap();
            if let Some(open) = inner.open.as_mut() {
                if open.detection_method.is_none() {
                    open.detection_method = Some(cut.reason);
                }
            }
        }
    }
}

/// Translates program-source changes into swing sequence records
pub struct SequenceRecorder {
    shared: Arc<RecorderShared>,
    _change_sub: Subscription<ProgramSourceChanged>,
    _cut_sub: Subscription<CutTriggered>,
}

impl SequenceRecorder {
    /// Attach to a switcher and the auto-cut reason stream
    pub fn attach(
        session_id: Uuid,
        switcher: &Switcher,
        cut_triggered: &EventHub<CutTriggered>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = Arc::new(RecorderShared {
            session_id,
            clock,
            inner: Mutex::new(RecorderInner {
                open: None,
                next_number: 0,
            }),
            sequence_completed: EventHub::new(),
        });

        let change_shared = Arc::clone(&shared);
        let change_sub = switcher
            .program_source_changed()
            .subscribe(move |change| change_shared.on_program_changed(change));
        let cut_shared = Arc::clone(&shared);
        let cut_sub = cut_triggered.subscribe(move |cut| cut_shared.on_cut(cut));

        Self {
            shared,
            _change_sub: change_sub,
            _cut_sub: cut_sub,
        }
    }

    pub fn sequence_completed(&self) -> &EventHub<SwingSequence> {
        &self.shared.sequence_completed
    }

    /// The currently open sequence number, if a swing is on air
    pub fn open_sequence_number(&self) -> Option<u32> {
        self.shared
            .inner
            .lock()
            .unwrap()
            .open
            .as_ref()
            .map(|s| s.sequence_number)
    }
}

//! Fit synthesized clips into their timeline slots and mix them into one track.
//!
//! Clips are processed sequentially in start-time order. Speed-adjusted and
//! truncated copies are written to a [`ScratchFiles`] directory that is
//! removed once the mix finishes, whether it succeeds or not.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReconcileOptions;
use crate::error::{Error, Result};
use crate::media::{MediaTool, MixTrack};
use crate::tempo::{reconcile, TempoAction};
use crate::timeline::{compute_slots, timeline_end, Timed};

/// A synthesized audio file for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedClip {
    pub segment_index: u32,
    /// Placement on the output timeline (the segment's start time).
    pub start_ms: u64,
    pub end_ms: u64,
    pub path: PathBuf,
}

impl Timed for SynthesizedClip {
    fn index(&self) -> u32 {
        self.segment_index
    }

    fn start_ms(&self) -> u64 {
        self.start_ms
    }

    fn end_ms(&self) -> u64 {
        self.end_ms
    }
}

/// What happened to one clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClipOutcome {
    Placed,
    SpedUp { factor: f64, stages: usize },
    Truncated { to_ms: u64 },
    Dropped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipDecision {
    pub segment_index: u32,
    pub start_ms: u64,
    pub slot_ms: u64,
    /// Probed clip length; `None` when probing failed.
    pub clip_ms: Option<u64>,
    #[serde(flatten)]
    pub outcome: ClipOutcome,
}

/// Resolved placement for every usable clip.
///
/// Holds the scratch directory alive: dropping the plan deletes the
/// speed-adjusted and truncated files its tracks may point at.
#[derive(Debug, Serialize)]
pub struct MixPlan {
    /// Tracks in placement order.
    pub tracks: Vec<MixTrack>,
    pub total_duration_ms: u64,
    pub decisions: Vec<ClipDecision>,
    #[serde(skip)]
    scratch: ScratchFiles,
}

impl MixPlan {
    /// First pair of consecutive tracks whose trimmed spans overlap, as
    /// positions in `tracks`.
    pub fn find_overlap(&self) -> Option<(usize, usize)> {
        self.tracks
            .windows(2)
            .position(|w| w[0].end_ms() > w[1].delay_ms)
            .map(|i| (i, i + 1))
    }

    pub fn count(&self, matches: impl Fn(&ClipOutcome) -> bool) -> usize {
        self.decisions.iter().filter(|d| matches(&d.outcome)).count()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.dir()
    }
}

/// Result of [`assemble`].
#[derive(Debug, Clone, Serialize)]
pub struct MixOutcome {
    pub output: PathBuf,
    pub total_duration_ms: u64,
    pub tracks: usize,
    pub decisions: Vec<ClipDecision>,
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Per-mix scratch directory, removed on drop.
#[derive(Debug)]
pub struct ScratchFiles {
    dir: PathBuf,
    files: usize,
}

impl ScratchFiles {
    /// Create a fresh directory under `base`.
    pub fn create(base: &Path) -> Result<Self> {
        std::fs::create_dir_all(base)?;
        loop {
            let n = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
            let dir = base.join(format!("mix-{}-{n}", std::process::id()));
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok(Self { dir, files: 0 }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a new scratch file of `segment_index`.
    pub fn file(&mut self, segment_index: u32, stage: &str) -> PathBuf {
        self.files += 1;
        self.dir.join(format!("seg{segment_index:05}_{stage}.wav"))
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        if self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                warn!(path = %self.dir.display(), error = %e, "failed to clean up scratch dir");
            } else {
                debug!(path = %self.dir.display(), files = self.files, "scratch dir removed");
            }
        }
    }
}

/// Probe, reconcile and (when needed) re-time every clip.
///
/// Slots come from the clips' own start times. A clip that can't be placed,
/// probed or processed is dropped with a warning and recorded in
/// [`MixPlan::decisions`]; only scratch directory setup is fatal.
pub async fn reconcile_clips<M: MediaTool + ?Sized>(
    media: &M,
    clips: &[SynthesizedClip],
    options: &ReconcileOptions,
) -> Result<MixPlan> {
    let total_duration_ms = options
        .total_duration_ms
        .unwrap_or_else(|| timeline_end(clips));
    let mut scratch = ScratchFiles::create(&options.resolve_work_dir())?;

    // same ordering compute_slots applies
    let mut ordered: Vec<&SynthesizedClip> = clips.iter().collect();
    ordered.sort_by_key(|c| (c.start_ms, c.segment_index));
    let slots = compute_slots(clips, Some(total_duration_ms));

    let mut tracks = Vec::new();
    let mut decisions = Vec::with_capacity(clips.len());

    for (clip, slot) in ordered.into_iter().zip(slots) {
        let mut decision = ClipDecision {
            segment_index: clip.segment_index,
            start_ms: clip.start_ms,
            slot_ms: slot.available_ms,
            clip_ms: None,
            outcome: ClipOutcome::Placed,
        };

        match fit_clip(media, clip, slot.available_ms, options.max_speed_ratio, &mut scratch).await {
            Ok((clip_ms, Some((track, outcome)))) => {
                decision.clip_ms = Some(clip_ms);
                decision.outcome = outcome;
                tracks.push(track);
            }
            Ok((clip_ms, None)) => {
                decision.clip_ms = Some(clip_ms);
                decision.outcome = ClipOutcome::Dropped {
                    reason: "no room before the next segment".into(),
                };
            }
            Err(e) => {
                warn!(segment_index = clip.segment_index, error = %e, "dropping clip");
                decision.outcome = ClipOutcome::Dropped { reason: e.to_string() };
            }
        }
        decisions.push(decision);
    }

    let plan = MixPlan {
        tracks,
        total_duration_ms,
        decisions,
        scratch,
    };

    info!(
        clips = clips.len(),
        placed = plan.count(|o| matches!(o, ClipOutcome::Placed)),
        sped_up = plan.count(|o| matches!(o, ClipOutcome::SpedUp { .. })),
        truncated = plan.count(|o| matches!(o, ClipOutcome::Truncated { .. })),
        dropped = plan.count(|o| matches!(o, ClipOutcome::Dropped { .. })),
        total_duration_ms,
        "clips reconciled"
    );

    Ok(plan)
}

/// Returns the probed length and, unless the clip is dropped, its track.
async fn fit_clip<M: MediaTool + ?Sized>(
    media: &M,
    clip: &SynthesizedClip,
    slot_ms: u64,
    max_speed_ratio: f64,
    scratch: &mut ScratchFiles,
) -> Result<(u64, Option<(MixTrack, ClipOutcome)>)> {
    let clip_ms = media.duration_ms(&clip.path).await?;
    let reconciliation = reconcile(clip_ms, slot_ms, max_speed_ratio);

    debug!(
        segment_index = clip.segment_index,
        clip_ms,
        slot_ms,
        action = ?reconciliation.action,
        "clip reconciled"
    );

    let (path, outcome) = match reconciliation.action {
        TempoAction::Drop => return Ok((clip_ms, None)),
        TempoAction::Place => (clip.path.clone(), ClipOutcome::Placed),
        TempoAction::SpeedUp { stages } => {
            let mut current = clip.path.clone();
            for (n, factor) in stages.iter().enumerate() {
                let next = scratch.file(clip.segment_index, &format!("tempo{n}"));
                media.change_tempo(&current, *factor, &next).await?;
                current = next;
            }
            (
                current,
                ClipOutcome::SpedUp {
                    factor: reconciliation.speed_factor,
                    stages: stages.len(),
                },
            )
        }
        TempoAction::Truncate { to_ms } => {
            let next = scratch.file(clip.segment_index, "trim");
            media.extract(&clip.path, 0, to_ms, &next).await?;
            (next, ClipOutcome::Truncated { to_ms })
        }
    };

    let track = MixTrack {
        path,
        delay_ms: clip.start_ms,
        max_duration_ms: slot_ms,
    };
    Ok((clip_ms, Some((track, outcome))))
}

/// Reconcile `clips` and mix them into `output`.
///
/// Scratch files are removed before returning, on success and on error.
pub async fn assemble<M: MediaTool + ?Sized>(
    media: &M,
    clips: &[SynthesizedClip],
    output: &Path,
    options: &ReconcileOptions,
) -> Result<MixOutcome> {
    let MixPlan {
        tracks,
        total_duration_ms,
        decisions,
        scratch,
    } = reconcile_clips(media, clips, options).await?;
    if total_duration_ms == 0 {
        return Err(Error::InvalidOption(
            "nothing to mix: total duration is 0 ms".into(),
        ));
    }

    media.merge(&tracks, total_duration_ms, output).await?;
    drop(scratch);

    info!(output = %output.display(), tracks = tracks.len(), "mix written");

    Ok(MixOutcome {
        output: output.to_path_buf(),
        total_duration_ms,
        tracks: tracks.len(),
        decisions,
    })
}

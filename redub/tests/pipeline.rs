use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use redub::{
    assemble, codec, merge_translations, plan_chunks, translate_segments, ChunkOptions, ClipOutcome,
    Error, MediaTool, MixTrack, ReconcileOptions, Result, RetryPolicy, Script, Segment,
    SynthesizedClip, TranslateOptions, TranslationRequest, Translator,
};

/// Uppercases every `[i] text` line and counts requests.
#[derive(Default)]
struct Upper {
    requests: AtomicUsize,
}

#[async_trait::async_trait]
impl Translator for Upper {
    async fn translate(&self, request: &TranslationRequest<'_>) -> Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(request.text.to_uppercase())
    }
}

/// Fails any request containing segment `[3]`.
struct Flaky;

#[async_trait::async_trait]
impl Translator for Flaky {
    async fn translate(&self, request: &TranslationRequest<'_>) -> Result<String> {
        if request.text.lines().any(|l| l.starts_with("[3] ")) {
            return Err(Error::Translation("503 service unavailable".into()));
        }
        Ok(request.text.to_uppercase())
    }
}

fn options(max_chars: usize, overlap: usize) -> TranslateOptions {
    TranslateOptions::new("en", "de")
        .unwrap()
        .chunk(
            ChunkOptions::new()
                .max_chars(max_chars)
                .unwrap()
                .overlap_segments(overlap),
        )
        .retry(RetryPolicy::none())
}

/// Six segments whose formatted lines are exactly 10 chars ("[i] abcdef").
fn six_segments() -> Vec<Segment> {
    (0..6)
        .map(|i| Segment::new(i, u64::from(i) * 1000, u64::from(i) * 1000 + 900, "abcdef"))
        .collect()
}

#[tokio::test]
async fn test_overlapping_chunks_merge_to_unique_indices() {
    let segments = six_segments();
    let opts = options(50, 1);

    let chunks = plan_chunks(&segments, &opts.chunk).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].indices().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert_eq!(chunks[1].indices().collect::<Vec<_>>(), vec![4, 5]);

    let translator = Upper::default();
    let (map, failed) = merge_translations(&translator, &segments, &opts).await.unwrap();
    assert!(failed.is_empty());
    assert_eq!(map.len(), 6);
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
    assert!(map.values().all(|t| t == "ABCDEF"));
    assert_eq!(translator.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_chunk_keeps_original_text() {
    let mut segments = six_segments();
    segments[3].original_text = "keepme".into();

    // "[i] abcdef" lines, 20 chars per chunk, no overlap: [0,1] [2,3] [4,5]
    let report = translate_segments(&Flaky, &mut segments, &options(20, 0))
        .await
        .unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(report.failed_chunks, vec![1]);
    assert_eq!(report.fallback_indices, vec![2, 3]);
    assert_eq!(segments[1].translated_text.as_deref(), Some("ABCDEF"));
    assert_eq!(segments[2].translated_text.as_deref(), Some("abcdef"));
    assert_eq!(segments[3].translated_text.as_deref(), Some("keepme"));
    assert_eq!(segments[4].translated_text.as_deref(), Some("ABCDEF"));
    assert!(segments.iter().all(|s| s.translated_text.is_some()));
}

#[tokio::test]
async fn test_script_translation_exports_subtitles() {
    let mut script = Script::new(vec![
        Segment::new(0, 0, 1500, "hello there"),
        Segment::new(1, 1500, 2000, ""),
        Segment::new(2, 2000, 3250, "general kenobi"),
    ]);
    let report = redub::translate_script(&Upper::default(), &mut script, "en", "de")
        .await
        .unwrap();
    assert!(report.is_complete());

    let srt = script.to_srt();
    assert_eq!(
        srt,
        "1\n00:00:00,000 --> 00:00:01,500\nHELLO THERE\n\n2\n00:00:02,000 --> 00:00:03,250\nGENERAL KENOBI\n\n"
    );
}

#[test]
fn test_chunk_text_round_trip() {
    let segments = vec![
        Segment::new(10, 0, 900, "first"),
        Segment::new(11, 900, 1800, "  "),
        Segment::new(12, 1800, 2700, "[99] bracketed"),
    ];
    let chunks = plan_chunks(&segments, &ChunkOptions::default()).unwrap();
    let text = codec::build_text(&chunks[0]);
    assert_eq!(text, "[10] first\n[12] [99] bracketed");

    let parsed = codec::parse(&text).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[&12], "[99] bracketed");
}

/// In-memory media tool: durations are looked up by file name, every output
/// is a real (empty) file so cleanup can be observed.
struct FakeMedia {
    durations: HashMap<String, u64>,
    merged: Mutex<Vec<(Vec<MixTrack>, u64)>>,
    fail_merge: bool,
}

impl FakeMedia {
    fn new(durations: &[(&str, u64)]) -> Self {
        Self {
            durations: durations.iter().map(|(n, d)| (n.to_string(), *d)).collect(),
            merged: Mutex::new(Vec::new()),
            fail_merge: false,
        }
    }

    fn lookup(&self, path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        self.durations.get(name).copied()
    }
}

#[async_trait::async_trait]
impl MediaTool for FakeMedia {
    async fn duration_ms(&self, path: &Path) -> Result<u64> {
        self.lookup(path).ok_or_else(|| Error::AudioNotFound {
            path: path.to_path_buf(),
        })
    }

    async fn extract(&self, _input: &Path, _start_ms: u64, _duration_ms: u64, output: &Path) -> Result<()> {
        std::fs::write(output, b"trimmed")?;
        Ok(())
    }

    async fn change_tempo(&self, _input: &Path, factor: f64, output: &Path) -> Result<()> {
        redub::media::check_tempo_factor(factor)?;
        std::fs::write(output, b"tempo")?;
        Ok(())
    }

    async fn merge(&self, tracks: &[MixTrack], total_duration_ms: u64, output: &Path) -> Result<()> {
        assert!(tracks.iter().all(|t| t.path.exists()), "track missing at merge time");
        if self.fail_merge {
            return Err(Error::MediaTool("ffmpeg failed (exit status: 1): boom".into()));
        }
        self.merged
            .lock()
            .unwrap()
            .push((tracks.to_vec(), total_duration_ms));
        std::fs::write(output, b"mix")?;
        Ok(())
    }
}

fn clip(dir: &Path, index: u32, start_ms: u64, end_ms: u64) -> SynthesizedClip {
    let path = dir.join(format!("clip_{index}.wav"));
    std::fs::write(&path, b"clip").unwrap();
    SynthesizedClip {
        segment_index: index,
        start_ms,
        end_ms,
        path,
    }
}

fn scratch_entries(work: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(work)
        .map(|rd| rd.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_assemble_places_clips_without_overlap() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let clips = vec![
        clip(tmp.path(), 0, 0, 900),
        clip(tmp.path(), 1, 1000, 2400),
        clip(tmp.path(), 2, 2500, 3900),
    ];
    let media = FakeMedia::new(&[("clip_0.wav", 950), ("clip_1.wav", 2700), ("clip_2.wav", 7000)]);
    let output = tmp.path().join("mix.wav");
    let opts = ReconcileOptions::new()
        .work_dir(work.clone())
        .total_duration_ms(4000);

    let outcome = assemble(&media, &clips, &output, &opts).await.unwrap();

    assert_eq!(outcome.tracks, 3);
    assert_eq!(outcome.total_duration_ms, 4000);
    assert_eq!(outcome.decisions[0].outcome, ClipOutcome::Placed);
    assert!(matches!(
        outcome.decisions[1].outcome,
        ClipOutcome::SpedUp { stages: 1, factor } if (factor - 1.8).abs() < 1e-9
    ));
    assert_eq!(outcome.decisions[2].outcome, ClipOutcome::Truncated { to_ms: 1500 });

    let merged = media.merged.lock().unwrap();
    let (tracks, total) = &merged[0];
    assert_eq!(*total, 4000);
    let spans: Vec<(u64, u64)> = tracks.iter().map(|t| (t.delay_ms, t.end_ms())).collect();
    assert_eq!(spans, vec![(0, 1000), (1000, 2500), (2500, 4000)]);
    assert!(output.exists());

    // re-timed copies are gone, source clips are untouched
    assert!(scratch_entries(&work).is_empty());
    assert!(clips.iter().all(|c| c.path.exists()));
}

#[tokio::test]
async fn test_assemble_cleans_up_when_merge_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("work");
    let clips = vec![clip(tmp.path(), 0, 0, 900), clip(tmp.path(), 1, 1000, 1900)];
    let mut media = FakeMedia::new(&[("clip_0.wav", 3000), ("clip_1.wav", 500)]);
    media.fail_merge = true;
    let opts = ReconcileOptions::new().work_dir(work.clone());

    let result = assemble(&media, &clips, &tmp.path().join("mix.wav"), &opts).await;

    assert!(matches!(result, Err(Error::MediaTool(_))));
    assert!(scratch_entries(&work).is_empty());
}

#[tokio::test]
async fn test_assemble_drops_unprobeable_and_conflicting_clips() {
    let tmp = tempfile::tempdir().unwrap();
    let clips = vec![
        clip(tmp.path(), 0, 0, 900),
        clip(tmp.path(), 1, 1000, 1800),
        clip(tmp.path(), 2, 1000, 1900),
        clip(tmp.path(), 3, 2000, 2600),
    ];
    // clip_3 has no known duration
    let media = FakeMedia::new(&[("clip_0.wav", 800), ("clip_1.wav", 400), ("clip_2.wav", 600)]);
    let opts = ReconcileOptions::new()
        .work_dir(tmp.path().join("work"))
        .total_duration_ms(3000);

    let outcome = assemble(&media, &clips, &tmp.path().join("mix.wav"), &opts)
        .await
        .unwrap();

    let by_index: HashMap<u32, &ClipOutcome> = outcome
        .decisions
        .iter()
        .map(|d| (d.segment_index, &d.outcome))
        .collect();
    assert_eq!(by_index[&0], &ClipOutcome::Placed);
    // clips 1 and 2 share a start time; the lower index gets a zero slot
    assert!(matches!(by_index[&1], ClipOutcome::Dropped { .. }));
    assert_eq!(by_index[&2], &ClipOutcome::Placed);
    assert!(matches!(by_index[&3], ClipOutcome::Dropped { .. }));
    assert_eq!(outcome.tracks, 2);
}

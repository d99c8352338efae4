use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Translations keyed by `segment_index`.
pub type TranslationMap = BTreeMap<u32, String>;

/// One ASR-derived unit of speech.
///
/// `segment_index` is assigned upstream and defines the canonical order; it is
/// never renumbered. Only `translated_text` is written after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_index: u32,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub translated_text: Option<String>,
    #[serde(default)]
    pub speaker_id: Option<String>,
}

impl Segment {
    pub fn new(segment_index: u32, start_time_ms: u64, end_time_ms: u64, text: impl Into<String>) -> Self {
        Self {
            segment_index,
            start_time_ms,
            end_time_ms,
            original_text: text.into(),
            translated_text: None,
            speaker_id: None,
        }
    }

    pub fn with_speaker(mut self, speaker_id: impl Into<String>) -> Self {
        self.speaker_id = Some(speaker_id.into());
        self
    }

    /// Whether this segment carries speech text (silence/noise segments don't).
    pub fn has_text(&self) -> bool {
        !self.original_text.trim().is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms.saturating_sub(self.start_time_ms)
    }

    /// Translated text, or the original when no translation is attached.
    pub fn display_text(&self) -> &str {
        self.translated_text
            .as_deref()
            .unwrap_or(&self.original_text)
    }
}

/// Write translations onto segments by index.
///
/// Segments the map does not cover are reset to `translated_text = None`,
/// discarding any earlier translation. Returns the indices of the non-empty
/// ones.
pub fn apply_translations(segments: &mut [Segment], translations: &TranslationMap) -> Vec<u32> {
    let mut missing = Vec::new();
    for seg in segments.iter_mut() {
        match translations.get(&seg.segment_index) {
            Some(text) => seg.translated_text = Some(text.clone()),
            None => {
                seg.translated_text = None;
                if seg.has_text() {
                    missing.push(seg.segment_index);
                }
            }
        }
    }
    missing
}

/// Pass original text through for every segment still lacking a translation.
///
/// Empty-text segments are identity-mapped. Returns the indices of non-empty
/// segments that fell back.
pub fn fill_untranslated(segments: &mut [Segment]) -> Vec<u32> {
    let mut filled = Vec::new();
    for seg in segments.iter_mut().filter(|s| s.translated_text.is_none()) {
        if seg.has_text() {
            filled.push(seg.segment_index);
        }
        seg.translated_text = Some(seg.original_text.clone());
    }
    filled
}

/// The full segment list of one dubbing task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script {
    pub segments: Vec<Segment>,
}

impl Script {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Latest segment end time.
    pub fn duration_ms(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.end_time_ms)
            .max()
            .unwrap_or(0)
    }

    /// Full dubbed text (all segments concatenated).
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.display_text().trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format as SRT subtitles, skipping segments without text.
    pub fn to_srt(&self) -> String {
        let mut out = String::new();
        for (i, seg) in self.cues().enumerate() {
            out.push_str(&format!("{}\n", i + 1));
            out.push_str(&format!(
                "{} --> {}\n",
                format_srt_time(seg.start_time_ms),
                format_srt_time(seg.end_time_ms)
            ));
            out.push_str(seg.display_text().trim());
            out.push_str("\n\n");
        }
        out
    }

    /// Format as WebVTT subtitles, skipping segments without text.
    pub fn to_vtt(&self) -> String {
        let mut out = String::from("WEBVTT\n\n");
        for seg in self.cues() {
            out.push_str(&format!(
                "{} --> {}\n",
                format_vtt_time(seg.start_time_ms),
                format_vtt_time(seg.end_time_ms)
            ));
            out.push_str(seg.display_text().trim());
            out.push_str("\n\n");
        }
        out
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn cues(&self) -> impl Iterator<Item = &Segment> {
        self.segments
            .iter()
            .filter(|s| !s.display_text().trim().is_empty())
    }
}

/// Format milliseconds as SRT timestamp: HH:MM:SS,mmm
fn format_srt_time(total_ms: u64) -> String {
    let (h, m, s, ms) = split_ms(total_ms);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Format milliseconds as VTT timestamp: HH:MM:SS.mmm
fn format_vtt_time(total_ms: u64) -> String {
    let (h, m, s, ms) = split_ms(total_ms);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

fn split_ms(total_ms: u64) -> (u64, u64, u64, u64) {
    (
        total_ms / 3_600_000,
        (total_ms % 3_600_000) / 60_000,
        (total_ms % 60_000) / 1_000,
        total_ms % 1_000,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Segment> {
        vec![
            Segment::new(0, 0, 1200, "你好"),
            Segment::new(1, 1200, 1500, "  "),
            Segment::new(2, 1500, 3_723_456, "再见").with_speaker("spk_1"),
        ]
    }

    #[test]
    fn test_has_text_ignores_whitespace() {
        let segs = sample();
        assert!(segs[0].has_text());
        assert!(!segs[1].has_text());
    }

    #[test]
    fn test_apply_translations_reports_missing() {
        let mut segs = sample();
        let map = TranslationMap::from([(0, "Hello".to_string())]);
        let missing = apply_translations(&mut segs, &map);
        assert_eq!(missing, vec![2]);
        assert_eq!(segs[0].translated_text.as_deref(), Some("Hello"));
        assert_eq!(segs[2].translated_text, None);
    }

    #[test]
    fn test_apply_translations_clears_stale_text() {
        let mut segs = sample();
        for seg in &mut segs {
            seg.translated_text = Some("old".into());
        }
        let missing = apply_translations(&mut segs, &TranslationMap::new());
        assert_eq!(missing, vec![0, 2]);
        assert!(segs.iter().all(|s| s.translated_text.is_none()));
        assert_eq!(fill_untranslated(&mut segs), vec![0, 2]);
        assert_eq!(segs[0].translated_text.as_deref(), Some("你好"));
    }

    #[test]
    fn test_fill_untranslated_identity_maps_empty() {
        let mut segs = sample();
        segs[0].translated_text = Some("Hello".into());
        let filled = fill_untranslated(&mut segs);
        assert_eq!(filled, vec![2]);
        assert_eq!(segs[1].translated_text.as_deref(), Some("  "));
        assert_eq!(segs[2].translated_text.as_deref(), Some("再见"));
        assert!(segs.iter().all(|s| s.translated_text.is_some()));
    }

    #[test]
    fn test_display_text_prefers_translation() {
        let mut seg = Segment::new(4, 0, 10, "原文");
        assert_eq!(seg.display_text(), "原文");
        seg.translated_text = Some("source".into());
        assert_eq!(seg.display_text(), "source");
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0), "00:00:00,000");
        assert_eq!(format_srt_time(3_723_456), "01:02:03,456");
    }

    #[test]
    fn test_format_vtt_time() {
        assert_eq!(format_vtt_time(61_500), "00:01:01.500");
    }

    #[test]
    fn test_to_srt_skips_empty_segments() {
        let mut script = Script::new(sample());
        script.segments[0].translated_text = Some("Hello".into());
        let srt = script.to_srt();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,200\nHello\n\n"));
        assert!(srt.contains("2\n00:00:01,500 --> 01:02:03,456\n再见"));
        assert!(!srt.contains("3\n"));
    }

    #[test]
    fn test_to_vtt_header() {
        let script = Script::new(sample());
        assert!(script.to_vtt().starts_with("WEBVTT\n\n00:00:00.000 --> 00:00:01.200\n"));
    }

    #[test]
    fn test_script_duration_and_text() {
        let script = Script::new(sample());
        assert_eq!(script.duration_ms(), 3_723_456);
        assert_eq!(script.text(), "你好 再见");
        assert_eq!(Script::default().duration_ms(), 0);
    }

    #[test]
    fn test_script_json_is_plain_array() {
        let json = r#"[{"segment_index":7,"start_time_ms":0,"end_time_ms":900,"original_text":"hi"}]"#;
        let script: Script = serde_json::from_str(json).unwrap();
        assert_eq!(script.segments.len(), 1);
        assert_eq!(script.segments[0].segment_index, 7);
        assert_eq!(script.segments[0].speaker_id, None);
        assert!(script.to_json().unwrap().starts_with('['));
    }
}

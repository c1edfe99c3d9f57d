//! Per-track entry store
//!
//! A track is an arena of [`FrameEntry`] values addressed by position. Video
//! tracks are kept in presentation order (position == frame number), audio
//! tracks in decode order with a running sample count.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, ErrorKind, ErrorSubkind, Result};
use crate::media::TrackType;

/// Rational converting ticks to seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackTimeBase {
    pub num: i64,
    pub den: i64,
}

impl TrackTimeBase {
    /// `None` unless `den > 0` and `num > 0`.
    pub fn new(num: i64, den: i64) -> Option<Self> {
        if den > 0 && num > 0 {
            Some(Self { num, den })
        } else {
            None
        }
    }

    pub fn to_seconds(&self, ticks: i64) -> f64 {
        (ticks as f64 * self.num as f64) / self.den as f64
    }

    pub fn to_millis(&self, ticks: i64) -> f64 {
        self.to_seconds(ticks) * 1000.0
    }

    /// Nearest tick for `seconds`.
    pub fn from_seconds(&self, seconds: f64) -> i64 {
        ((seconds * self.den as f64) / self.num as f64).round() as i64
    }
}

impl Default for TrackTimeBase {
    fn default() -> Self {
        Self { num: 1, den: 1000 }
    }
}

/// Descriptor of one coded unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameEntry {
    /// Decode timestamp
    pub dts: Option<i64>,
    /// Presentation timestamp after normalization
    pub pts: Option<i64>,
    /// Presentation timestamp as the demuxer reported it
    pub original_pts: Option<i64>,
    pub keyframe: bool,
    pub repeat_pict: i32,
    /// Byte offset of the unit in the source file
    pub file_pos: u64,
    pub size: u32,
    /// First sample of the unit (audio)
    pub sample_start: u64,
    /// Samples in the unit (audio)
    pub sample_count: u32,
    /// Position of the unit in decode order
    pub original_pos: u32,
}

/// One indexed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub(crate) track_type: TrackType,
    pub(crate) codec_name: String,
    pub(crate) time_base: TrackTimeBase,
    pub(crate) entries: Vec<FrameEntry>,
    /// Timestamps were taken from DTS because PTS was missing
    pub(crate) use_dts: bool,
    /// At least one entry carried a real timestamp
    pub(crate) has_ts: bool,
    /// Duration of the last unit in ticks
    pub(crate) last_duration: i64,
}

impl Track {
    pub fn new(track_type: TrackType, codec_name: impl Into<String>, time_base: TrackTimeBase) -> Self {
        Self {
            track_type,
            codec_name: codec_name.into(),
            time_base,
            entries: Vec::new(),
            use_dts: false,
            has_ts: false,
            last_duration: 0,
        }
    }

    pub fn track_type(&self) -> TrackType {
        self.track_type
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn time_base(&self) -> TrackTimeBase {
        self.time_base
    }

    pub fn use_dts(&self) -> bool {
        self.use_dts
    }

    pub fn has_timestamps(&self) -> bool {
        self.has_ts
    }

    /// Raw entries in storage order.
    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of coded units.
    pub fn packet_count(&self) -> usize {
        self.entries.len()
    }

    /// Frames for video, samples for audio, units otherwise.
    pub fn frame_count(&self) -> u64 {
        match self.track_type {
            TrackType::Audio => self.sample_count(),
            _ => self.entries.len() as u64,
        }
    }

    /// Total decoded samples (audio).
    pub fn sample_count(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.sample_start + e.sample_count as u64)
            .unwrap_or(0)
    }

    /// Entry for `n`: a frame number for video, a sample number for audio.
    pub fn entry(&self, n: u64) -> Result<&FrameEntry> {
        let out_of_range = || {
            Error::new(
                ErrorKind::Track,
                ErrorSubkind::InvalidArgument,
                format!("Frame {} is out of range (0..{})", n, self.frame_count()),
            )
        };
        match self.track_type {
            TrackType::Audio => {
                let packet = self.packet_for_sample(n).ok_or_else(out_of_range)?;
                Ok(&self.entries[packet])
            }
            _ => self.entries.get(n as usize).ok_or_else(out_of_range),
        }
    }

    /// Position of the audio unit that contains `sample`.
    pub fn packet_for_sample(&self, sample: u64) -> Option<usize> {
        if sample >= self.sample_count() {
            return None;
        }
        let upper = self.entries.partition_point(|e| e.sample_start <= sample);
        let mut idx = upper.checked_sub(1)?;
        // Zero-length units share their start with the next one
        while self.entries[idx].sample_count == 0 {
            idx = idx.checked_sub(1)?;
        }
        let e = &self.entries[idx];
        if sample < e.sample_start + e.sample_count as u64 {
            Some(idx)
        } else {
            None
        }
    }

    /// Closest keyframe at or before `frame`, 0 when there is none.
    pub fn find_closest_keyframe(&self, frame: usize) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let frame = frame.min(self.entries.len() - 1);
        (0..=frame)
            .rev()
            .find(|&i| self.entries[i].keyframe)
            .unwrap_or(0)
    }

    /// Keyframe strictly before `frame`.
    pub fn previous_keyframe(&self, frame: usize) -> Option<usize> {
        (0..frame.min(self.entries.len()))
            .rev()
            .find(|&i| self.entries[i].keyframe)
    }

    /// Frame whose PTS is exactly `pts`.
    pub fn frame_from_pts(&self, pts: i64) -> Option<usize> {
        let idx = self.entries.partition_point(|e| e.pts.unwrap_or(i64::MIN) < pts);
        match self.entries.get(idx) {
            Some(e) if e.pts == Some(pts) => Some(idx),
            _ => None,
        }
    }

    /// Frame whose PTS is nearest to `pts`.
    pub fn closest_frame_from_pts(&self, pts: i64) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let idx = self.entries.partition_point(|e| e.pts.unwrap_or(i64::MIN) < pts);
        if idx == 0 {
            return 0;
        }
        if idx >= self.entries.len() {
            return self.entries.len() - 1;
        }
        let before = self.entries[idx - 1].pts.unwrap_or(i64::MIN);
        let after = self.entries[idx].pts.unwrap_or(i64::MAX);
        if pts.saturating_sub(before) <= after.saturating_sub(pts) {
            idx - 1
        } else {
            idx
        }
    }

    /// Presentation time of the first entry in seconds.
    pub fn first_time(&self) -> f64 {
        self.entries
            .first()
            .and_then(|e| e.pts)
            .map(|pts| self.time_base.to_seconds(pts))
            .unwrap_or(0.0)
    }

    /// Presentation time of the last entry in seconds.
    pub fn last_time(&self) -> f64 {
        self.entries
            .last()
            .and_then(|e| e.pts)
            .map(|pts| self.time_base.to_seconds(pts))
            .unwrap_or(0.0)
    }

    /// End of the last entry in seconds.
    pub fn last_end_time(&self) -> f64 {
        self.entries
            .last()
            .and_then(|e| e.pts)
            .map(|pts| self.time_base.to_seconds(pts + self.last_duration))
            .unwrap_or(0.0)
    }

    /// Write v2 timecodes (one millisecond value per frame).
    pub fn write_timecodes<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut out = String::from("# timecode format v2\n");
        for e in &self.entries {
            let pts = e.pts.unwrap_or(0);
            let _ = writeln!(out, "{:.2}", self.time_base.to_millis(pts));
        }
        let write_err = |e: std::io::Error| {
            Error::new(
                ErrorKind::Track,
                ErrorSubkind::FileWrite,
                format!("Failed to write timecodes to {:?}: {}", path, e),
            )
        };
        let mut file = std::fs::File::create(path).map_err(write_err)?;
        file.write_all(out.as_bytes()).map_err(write_err)?;
        Ok(())
    }

    pub(crate) fn push(&mut self, entry: FrameEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.last_duration = 0;
    }

    /// Normalize timestamps once all units are in.
    pub(crate) fn finalize(&mut self) {
        self.has_ts = self.entries.iter().any(|e| e.pts.is_some() || e.dts.is_some());

        match self.track_type {
            TrackType::Audio => {
                let mut next = 0u64;
                for e in &mut self.entries {
                    e.sample_start = next;
                    next += e.sample_count as u64;
                }
            }
            TrackType::Video => {
                let missing_pts = self.entries.iter().any(|e| e.pts.is_none());
                if missing_pts && self.entries.iter().all(|e| e.dts.is_some()) {
                    self.use_dts = true;
                    for e in &mut self.entries {
                        e.pts = e.dts;
                    }
                } else if missing_pts {
                    // Nothing usable: number the frames in decode order
                    for (i, e) in self.entries.iter_mut().enumerate() {
                        if e.pts.is_none() {
                            e.pts = Some(i as i64);
                        }
                    }
                }
                self.entries.sort_by_key(|e| e.pts.unwrap_or(i64::MIN));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_track(pts: &[i64], keys: &[usize]) -> Track {
        let mut t = Track::new(TrackType::Video, "h264", TrackTimeBase::new(1, 25).unwrap());
        for (i, &p) in pts.iter().enumerate() {
            t.push(FrameEntry {
                pts: Some(p),
                original_pts: Some(p),
                dts: Some(i as i64),
                keyframe: keys.contains(&i),
                original_pos: i as u32,
                ..Default::default()
            });
        }
        t.finalize();
        t
    }

    fn audio_track(counts: &[u32]) -> Track {
        let mut t = Track::new(TrackType::Audio, "aac", TrackTimeBase::new(1, 48000).unwrap());
        for (i, &c) in counts.iter().enumerate() {
            t.push(FrameEntry {
                sample_count: c,
                keyframe: true,
                original_pos: i as u32,
                ..Default::default()
            });
        }
        t.finalize();
        t
    }

    #[test]
    fn test_time_base() {
        assert!(TrackTimeBase::new(1, 0).is_none());
        let tb = TrackTimeBase::new(1, 90000).unwrap();
        assert!((tb.to_seconds(90000) - 1.0).abs() < 1e-9);
        assert_eq!(tb.from_seconds(0.5), 45000);
    }

    #[test]
    fn test_video_sorted_into_presentation_order() {
        // decode order I0 P3 B1 B2
        let t = video_track(&[0, 3, 1, 2], &[0]);
        let pts: Vec<_> = t.entries().iter().map(|e| e.pts.unwrap()).collect();
        assert_eq!(pts, vec![0, 1, 2, 3]);
        assert_eq!(t.entry(3).unwrap().original_pos, 1);
        assert_eq!(t.frame_count(), 4);
    }

    #[test]
    fn test_entry_out_of_range() {
        let t = video_track(&[0, 1, 2], &[0]);
        let err = t.entry(3).unwrap_err();
        assert!(err.is(ErrorKind::Track, ErrorSubkind::InvalidArgument));
    }

    #[test]
    fn test_keyframe_search() {
        let t = video_track(&[0, 1, 2, 3, 4, 5], &[0, 3]);
        assert_eq!(t.find_closest_keyframe(2), 0);
        assert_eq!(t.find_closest_keyframe(3), 3);
        assert_eq!(t.find_closest_keyframe(5), 3);
        assert_eq!(t.find_closest_keyframe(100), 3);
        assert_eq!(t.previous_keyframe(3), Some(0));
        assert_eq!(t.previous_keyframe(0), None);
    }

    #[test]
    fn test_keyframe_search_on_empty_track() {
        let t = Track::new(TrackType::Video, "h264", TrackTimeBase::default());
        assert_eq!(t.find_closest_keyframe(0), 0);
        assert_eq!(t.find_closest_keyframe(7), 0);
        assert_eq!(t.previous_keyframe(7), None);
    }

    #[test]
    fn test_pts_lookup() {
        let t = video_track(&[0, 10, 20, 30], &[0]);
        assert_eq!(t.frame_from_pts(20), Some(2));
        assert_eq!(t.frame_from_pts(21), None);
        assert_eq!(t.closest_frame_from_pts(24), 2);
        assert_eq!(t.closest_frame_from_pts(26), 3);
        assert_eq!(t.closest_frame_from_pts(-5), 0);
        assert_eq!(t.closest_frame_from_pts(500), 3);
    }

    #[test]
    fn test_dts_fallback() {
        let mut t = Track::new(TrackType::Video, "mpeg2video", TrackTimeBase::default());
        for i in 0..3 {
            t.push(FrameEntry {
                dts: Some(i * 40),
                ..Default::default()
            });
        }
        t.finalize();
        assert!(t.use_dts());
        assert_eq!(t.entry(2).unwrap().pts, Some(80));
    }

    #[test]
    fn test_audio_sample_lookup() {
        let t = audio_track(&[1024, 0, 1024, 512]);
        assert_eq!(t.frame_count(), 2560);
        assert_eq!(t.packet_count(), 4);
        assert_eq!(t.packet_for_sample(0), Some(0));
        assert_eq!(t.packet_for_sample(1023), Some(0));
        assert_eq!(t.packet_for_sample(1024), Some(2));
        assert_eq!(t.packet_for_sample(2559), Some(3));
        assert_eq!(t.packet_for_sample(2560), None);
        assert_eq!(t.entry(2048).unwrap().original_pos, 3);
        assert!(t.entry(2560).is_err());
    }

    #[test]
    fn test_write_timecodes() {
        let t = video_track(&[0, 1, 2], &[0]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc.txt");
        t.write_timecodes(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "# timecode format v2\n0.00\n40.00\n80.00\n");
    }
}

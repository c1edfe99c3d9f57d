use std::sync::{Arc, Mutex};

use super::fixtures::{build_index, engine, engine_with, standard_media, Fixture};
use super::synthetic::{AudioDesc, MediaDesc, VideoDesc};
use crate::config::EngineConfig;
use crate::error::{ErrorKind, ErrorSubkind};
use crate::index::Indexer;
use crate::media::{ErrorHandling, TrackType};

#[test]
fn test_index_counts() {
    let fx = Fixture::new(&standard_media());
    let index = build_index(&engine(), &fx.media, ErrorHandling::Abort);

    assert_eq!(index.track_count(), 2);
    assert_eq!(index.format_name(), "synthetic");

    let video = index.track(0).unwrap();
    assert_eq!(video.track_type(), TrackType::Video);
    assert_eq!(video.frame_count(), 250);
    assert!(video.has_timestamps());
    assert!(!video.use_dts());

    let audio = index.track(1).unwrap();
    assert_eq!(audio.track_type(), TrackType::Audio);
    assert_eq!(audio.sample_count(), 960_000);
    assert_eq!(audio.packet_count(), 938);
    // 960000 = 937 * 1024 + 512
    assert_eq!(audio.entries().last().unwrap().sample_count, 512);
}

#[test]
fn test_video_entries_in_presentation_order() {
    let fx = Fixture::new(&standard_media());
    let index = build_index(&engine(), &fx.media, ErrorHandling::Abort);
    let video = index.track(0).unwrap();

    for (i, e) in video.entries().iter().enumerate() {
        assert_eq!(e.pts, Some(i as i64));
        assert_eq!(e.keyframe, i % 25 == 0, "frame {}", i);
    }
    // Decode order is kept alongside
    assert_eq!(video.entries()[1].original_pos, 2);
    assert_eq!(video.entries()[2].original_pos, 1);

    assert_eq!(video.find_closest_keyframe(49), 25);
    assert_eq!(video.find_closest_keyframe(50), 50);
    assert_eq!(video.first_time(), 0.0);
    assert!((video.last_time() - 9.96).abs() < 1e-9);
    assert!((video.last_end_time() - 10.0).abs() < 1e-9);
}

#[test]
fn test_audio_sample_lookup() {
    let fx = Fixture::new(&standard_media());
    let index = build_index(&engine(), &fx.media, ErrorHandling::Abort);
    let audio = index.track(1).unwrap();

    assert_eq!(audio.packet_for_sample(0), Some(0));
    assert_eq!(audio.packet_for_sample(1023), Some(0));
    assert_eq!(audio.packet_for_sample(1024), Some(1));
    assert_eq!(audio.packet_for_sample(959_999), Some(937));
    assert_eq!(audio.packet_for_sample(960_000), None);
    assert_eq!(audio.entry(2048).unwrap().sample_start, 2048);
    assert!(audio
        .entry(960_000)
        .unwrap_err()
        .is(ErrorKind::Track, ErrorSubkind::InvalidArgument));
}

#[test]
fn test_disabled_tracks_are_empty() {
    let fx = Fixture::new(&standard_media());
    let mut indexer = Indexer::open(&engine(), &fx.media).unwrap();
    indexer.track_type_index_settings(TrackType::Audio, false);
    let index = indexer.index(ErrorHandling::Abort).unwrap();
    assert_eq!(index.track(0).unwrap().frame_count(), 250);
    assert!(index.track(1).unwrap().is_empty());

    let mut config = EngineConfig::default();
    config.indexing.index_video = false;
    let mut indexer = Indexer::open(&engine_with(config), &fx.media).unwrap();
    let err = indexer.track_index_settings(5, true).unwrap_err();
    assert!(err.is(ErrorKind::Indexing, ErrorSubkind::InvalidArgument));
    let index = indexer.index(ErrorHandling::Abort).unwrap();
    assert!(index.track(0).unwrap().is_empty());
    assert!(index
        .first_indexed_track_of_type(TrackType::Video)
        .unwrap_err()
        .is(ErrorKind::Index, ErrorSubkind::NotAvailable));
    assert_eq!(index.first_track_of_type(TrackType::Video).unwrap(), 0);
}

#[test]
fn test_indexer_inspection() {
    let fx = Fixture::new(&standard_media());
    let indexer = Indexer::open(&engine(), &fx.media).unwrap();
    assert_eq!(indexer.track_count(), 2);
    assert_eq!(indexer.track_type(1).unwrap(), TrackType::Audio);
    assert_eq!(indexer.codec_name(1).unwrap(), "pcm_s16le");
    assert_eq!(indexer.format_name(), "synthetic");
    assert!(indexer.track_type(2).is_err());
}

#[test]
fn test_open_missing_file() {
    let fx = Fixture::new(&standard_media());
    let err = Indexer::open(&engine(), fx.path("nope.json")).unwrap_err();
    assert!(err.is(ErrorKind::Parser, ErrorSubkind::NoFile));
}

#[test]
fn test_progress_reports_positions() {
    let fx = Fixture::new(&standard_media());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut indexer = Indexer::open(&engine(), &fx.media).unwrap();
    let sink = seen.clone();
    indexer.set_progress_callback(move |current, total| {
        sink.lock().unwrap().push((current, total));
        0
    });
    indexer.index(ErrorHandling::Abort).unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(seen.iter().all(|&(current, total)| current < total));
}

#[test]
fn test_cancellation() {
    let fx = Fixture::new(&standard_media());
    let mut indexer = Indexer::open(&engine(), &fx.media).unwrap();
    let mut calls = 0;
    indexer.set_progress_callback(move |_, _| {
        calls += 1;
        if calls > 100 {
            -1
        } else {
            0
        }
    });
    let err = indexer.index(ErrorHandling::Abort).unwrap_err();
    assert!(err.is(ErrorKind::Cancelled, ErrorSubkind::User));
}

fn corrupt_audio_media() -> MediaDesc {
    MediaDesc {
        video: vec![VideoDesc {
            frames: 50,
            ..Default::default()
        }],
        audio: vec![AudioDesc {
            total_samples: 20 * 1024,
            corrupt: vec![5],
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[test]
fn test_error_policies_on_audio() {
    let fx = Fixture::new(&corrupt_audio_media());
    let engine = engine();

    let err = Indexer::open(&engine, &fx.media)
        .unwrap()
        .index(ErrorHandling::Abort)
        .unwrap_err();
    assert!(err.is(ErrorKind::Indexing, ErrorSubkind::Codec));

    let index = build_index(&engine, &fx.media, ErrorHandling::ClearTrack);
    assert!(index.track(1).unwrap().is_empty());
    assert_eq!(index.track(0).unwrap().frame_count(), 50);

    let index = build_index(&engine, &fx.media, ErrorHandling::StopTrack);
    assert_eq!(index.track(1).unwrap().packet_count(), 5);
    assert_eq!(index.track(1).unwrap().sample_count(), 5 * 1024);

    let index = build_index(&engine, &fx.media, ErrorHandling::Ignore);
    let audio = index.track(1).unwrap();
    assert_eq!(audio.packet_count(), 20);
    // The failed unit inherits the previous unit's length
    assert_eq!(audio.entries()[5].sample_count, 1024);
    assert_eq!(audio.sample_count(), 20 * 1024);
    assert_eq!(index.error_handling(), ErrorHandling::Ignore);
}

#[test]
fn test_error_policies_on_video() {
    let desc = MediaDesc {
        video: vec![VideoDesc {
            frames: 50,
            corrupt: vec![30],
            ..Default::default()
        }],
        ..Default::default()
    };
    let fx = Fixture::new(&desc);
    let engine = engine();

    assert!(Indexer::open(&engine, &fx.media)
        .unwrap()
        .index(ErrorHandling::Abort)
        .is_err());
    let index = build_index(&engine, &fx.media, ErrorHandling::Ignore);
    assert_eq!(index.track(0).unwrap().frame_count(), 50);
    let index = build_index(&engine, &fx.media, ErrorHandling::ClearTrack);
    assert!(index.track(0).unwrap().is_empty());
}

#[test]
fn test_read_error_ends_the_scan() {
    let mut desc = standard_media();
    desc.read_error_at = Some(100);
    let fx = Fixture::new(&desc);
    let index = build_index(&engine(), &fx.media, ErrorHandling::Abort);
    let total: usize = index.tracks().iter().map(|t| t.packet_count()).sum();
    assert_eq!(total, 100);
}

#[test]
fn test_write_timecodes() {
    let fx = Fixture::new(&standard_media());
    let index = build_index(&engine(), &fx.media, ErrorHandling::Abort);
    let out = fx.path("timecodes.txt");
    index.track(0).unwrap().write_timecodes(&out).unwrap();

    let text = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "# timecode format v2");
    assert_eq!(lines.len(), 251);
    assert_eq!(lines[1], "0.00");
    assert_eq!(lines[2], "40.00");
    assert_eq!(lines[250], "9960.00");
}

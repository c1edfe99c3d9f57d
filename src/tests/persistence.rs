use std::sync::Arc;

use super::fixtures::{build_index, engine, standard_media, Fixture};
use crate::error::{ErrorKind, ErrorSubkind};
use crate::index::{Index, IndexCache};
use crate::media::{DelayMode, ErrorHandling, SeekMode};
use crate::source::{AudioSource, VideoSource};

#[test]
fn test_roundtrip_is_byte_identical() {
    let fx = Fixture::new(&standard_media());
    let index = build_index(&engine(), &fx.media, ErrorHandling::StopTrack);

    let bytes = index.serialize();
    let restored = Index::deserialize(&bytes).unwrap();
    assert_eq!(restored.serialize(), bytes);
    assert_eq!(restored.error_handling(), ErrorHandling::StopTrack);
    assert_eq!(restored.track(1).unwrap().sample_count(), 960_000);
    assert_eq!(restored.track(0).unwrap().entries(), index.track(0).unwrap().entries());
    assert!(restored.matches(&fx.media));
}

#[test]
fn test_sources_on_a_loaded_index() {
    let fx = Fixture::new(&standard_media());
    let engine = engine();
    let file = fx.path("media.idx");
    build_index(&engine, &fx.media, ErrorHandling::Abort)
        .write_file(&file)
        .unwrap();
    let index = Arc::new(Index::read_file(&file).unwrap());

    let mut video =
        VideoSource::open(&engine, &fx.media, 0, index.clone(), 1, SeekMode::Normal).unwrap();
    assert_eq!(video.get_frame(137).unwrap().pts, Some(137));

    let mut audio = AudioSource::open(&engine, &fx.media, 1, index, DelayMode::NoShift).unwrap();
    let mut buf = [0u8; 4];
    audio.get_audio(&mut buf, 48_000, 1).unwrap();
    assert_eq!(
        i16::from_le_bytes([buf[0], buf[1]]),
        super::synthetic::sample_value(48_000, 0)
    );
}

#[test]
fn test_replaced_file_no_longer_matches() {
    let fx = Fixture::new(&standard_media());
    let index = build_index(&engine(), &fx.media, ErrorHandling::Abort);
    assert!(index.matches(&fx.media));

    let mut changed = standard_media();
    changed.salt = 7;
    changed.write(&fx.media);
    assert!(!index.matches(&fx.media));
}

#[test]
fn test_cache_fallbacks() {
    let fx = Fixture::new(&standard_media());
    let engine = engine();
    let file = fx.path("media.idx");

    let cache = IndexCache::new();
    let first = cache.load_or_index(&engine, &fx.media, Some(file.as_path())).unwrap();
    assert_eq!(cache.builds(), 1);
    assert!(file.exists());

    // Memory hit
    let second = cache.load_or_index(&engine, &fx.media, Some(file.as_path())).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.builds(), 1);

    // Index file hit
    let fresh = IndexCache::new();
    let loaded = fresh.load_or_index(&engine, &fx.media, Some(file.as_path())).unwrap();
    assert_eq!(fresh.builds(), 0);
    assert_eq!(loaded.serialize(), first.serialize());

    // Both are stale once the media changes
    let mut changed = standard_media();
    changed.salt = 3;
    changed.write(&fx.media);
    let rebuilt = cache.load_or_index(&engine, &fx.media, Some(file.as_path())).unwrap();
    assert_eq!(cache.builds(), 2);
    assert!(rebuilt.matches(&fx.media));
    assert_eq!(cache.len(), 1);

    let reloaded = IndexCache::new()
        .load_or_index(&engine, &fx.media, Some(file.as_path()))
        .unwrap();
    assert!(reloaded.matches(&fx.media));
}

#[test]
fn test_cache_without_index_file() {
    let fx = Fixture::new(&standard_media());
    let engine = engine();
    let cache = IndexCache::new();
    cache.load_or_index(&engine, &fx.media, None).unwrap();
    cache.load_or_index(&engine, &fx.media, None).unwrap();
    assert_eq!(cache.builds(), 1);
    assert!(cache.remove(&fx.media).is_some());
    assert!(cache.is_empty());
}

#[test]
fn test_resized_file_no_longer_matches() {
    let fx = Fixture::new(&standard_media());
    let index = build_index(&engine(), &fx.media, ErrorHandling::Abort);
    let before = std::fs::metadata(&fx.media).unwrap().len();

    let mut shorter = standard_media();
    shorter.audio.clear();
    shorter.write(&fx.media);
    assert_ne!(std::fs::metadata(&fx.media).unwrap().len(), before);

    assert!(!index.matches(&fx.media));
    let err = index.belongs_to(&fx.media).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Index);
    assert_eq!(err.subkind, ErrorSubkind::FileMismatch);
}

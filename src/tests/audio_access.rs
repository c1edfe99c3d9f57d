use super::fixtures::{build_index, engine, engine_with, standard_media, Fixture};
use super::synthetic::{sample_value, AudioDesc, MediaDesc, VideoDesc};
use crate::config::EngineConfig;
use crate::error::{ErrorKind, ErrorSubkind};
use crate::media::{channel, DelayMode, ErrorHandling, SampleFormat};
use crate::source::AudioSource;

fn open(fx: &Fixture, mode: DelayMode) -> AudioSource {
    let engine = engine();
    let index = build_index(&engine, &fx.media, ErrorHandling::Ignore);
    AudioSource::open(&engine, &fx.media, 1, index, mode).unwrap()
}

fn read_s16(source: &mut AudioSource, start: i64, count: i64) -> Vec<i16> {
    let channels = source.properties().channels as usize;
    let mut buf = vec![0u8; count as usize * channels * 2];
    source.get_audio(&mut buf, start, count).unwrap();
    buf.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

fn expected(start: u64, count: u64) -> Vec<i16> {
    (start..start + count)
        .flat_map(|s| [sample_value(s, 0), sample_value(s, 1)])
        .collect()
}

#[test]
fn test_properties() {
    let fx = Fixture::new(&standard_media());
    let source = open(&fx, DelayMode::FirstVideoTrack);
    let props = source.properties();
    assert_eq!(props.sample_rate, 48000);
    assert_eq!(props.channels, 2);
    assert_eq!(props.channel_layout, channel::LAYOUT_STEREO);
    assert_eq!(props.sample_format, SampleFormat::S16);
    assert_eq!(props.bits_per_sample, 16);
    assert_eq!(props.num_samples, 960_000);
    assert!((props.last_end_time - 20.0).abs() < 1e-9);
    assert_eq!(source.delay(), 0);
}

#[test]
fn test_sample_exact_reads() {
    let fx = Fixture::new(&standard_media());
    let mut source = open(&fx, DelayMode::FirstVideoTrack);

    assert_eq!(read_s16(&mut source, 0, 100), expected(0, 100));
    // Straddles a packet boundary
    assert_eq!(read_s16(&mut source, 1000, 100), expected(1000, 100));
    // Spans several packets
    assert_eq!(read_s16(&mut source, 3000, 5000), expected(3000, 5000));
    assert_eq!(read_s16(&mut source, 959_900, 100), expected(959_900, 100));
}

#[test]
fn test_random_access() {
    let fx = Fixture::new(&standard_media());
    let mut source = open(&fx, DelayMode::FirstVideoTrack);
    for start in [500_000u64, 10, 700_000, 300, 699_000, 959_999, 1024] {
        assert_eq!(
            read_s16(&mut source, start as i64, 1),
            expected(start, 1),
            "sample {}",
            start
        );
    }
}

#[test]
fn test_range_checks() {
    let fx = Fixture::new(&standard_media());
    let mut source = open(&fx, DelayMode::FirstVideoTrack);
    let mut buf = vec![0u8; 4096];

    let err = source.get_audio(&mut buf, 959_999, 2).unwrap_err();
    assert!(err.is(ErrorKind::Decoding, ErrorSubkind::InvalidArgument));
    let err = source.get_audio(&mut buf, -1, 1).unwrap_err();
    assert!(err.is(ErrorKind::Decoding, ErrorSubkind::InvalidArgument));
    let err = source.get_audio(&mut buf, 0, 2000).unwrap_err();
    assert!(err.is(ErrorKind::Decoding, ErrorSubkind::InvalidArgument));

    source.get_audio(&mut [], 100, 0).unwrap();
    source.get_audio(&mut buf, 959_999, 1).unwrap();
}

fn delayed_media(audio_start: i64, video_start: i64) -> Fixture {
    Fixture::new(&MediaDesc {
        video: vec![VideoDesc {
            start_pts: video_start,
            ..Default::default()
        }],
        audio: vec![AudioDesc {
            start_pts: audio_start,
            ..Default::default()
        }],
        ..Default::default()
    })
}

#[test]
fn test_positive_delay() {
    // Audio starts 0.5 s in, video at 0
    let fx = delayed_media(24_000, 0);

    let mut source = open(&fx, DelayMode::FirstVideoTrack);
    assert_eq!(source.delay(), 24_000);
    assert_eq!(source.properties().num_samples, 984_000);
    let head = read_s16(&mut source, 23_990, 20);
    assert!(head[..20].iter().all(|&v| v == 0));
    assert_eq!(&head[20..], &expected(0, 10)[..]);

    let source = open(&fx, DelayMode::TimeZero);
    assert_eq!(source.delay(), 24_000);
    let source = open(&fx, DelayMode::NoShift);
    assert_eq!(source.delay(), 0);
    assert_eq!(source.properties().num_samples, 960_000);
}

#[test]
fn test_configured_delay_mode() {
    let fx = delayed_media(24_000, 0);
    let mut config = EngineConfig::default();
    config.audio.delay_mode = DelayMode::NoShift;
    let engine = engine_with(config);
    let index = build_index(&engine, &fx.media, ErrorHandling::Abort);
    let source = AudioSource::open_with_defaults(&engine, &fx.media, 1, index).unwrap();
    assert_eq!(source.delay(), 0);

    let engine = super::fixtures::engine();
    let index = build_index(&engine, &fx.media, ErrorHandling::Abort);
    let source = AudioSource::open_with_defaults(&engine, &fx.media, 1, index).unwrap();
    assert_eq!(source.delay(), 24_000);
}

#[test]
fn test_delay_relative_to_video() {
    // Audio at 0.5 s, video at 0.2 s
    let fx = delayed_media(24_000, 5);
    assert_eq!(open(&fx, DelayMode::FirstVideoTrack).delay(), 14_400);
    assert_eq!(open(&fx, DelayMode::Track(0)).delay(), 14_400);
    assert_eq!(open(&fx, DelayMode::TimeZero).delay(), 24_000);

    let engine = engine();
    let index = build_index(&engine, &fx.media, ErrorHandling::Abort);
    let err = AudioSource::open(&engine, &fx.media, 1, index, DelayMode::Track(1))
        .err()
        .unwrap();
    assert!(err.is(ErrorKind::Track, ErrorSubkind::InvalidArgument));
}

#[test]
fn test_negative_delay_trims() {
    // Video starts 0.2 s after the audio
    let fx = delayed_media(0, 5);
    let mut source = open(&fx, DelayMode::FirstVideoTrack);
    assert_eq!(source.delay(), -9_600);
    assert_eq!(source.properties().num_samples, 950_400);
    assert_eq!(read_s16(&mut source, 0, 10), expected(9_600, 10));
}

#[test]
fn test_output_conversion() {
    let fx = Fixture::new(&standard_media());
    let mut source = open(&fx, DelayMode::FirstVideoTrack);

    let mut options = source.resample_options();
    assert_eq!(options.sample_format, SampleFormat::S16);
    options.sample_format = SampleFormat::Flt;
    options.channel_layout = channel::LAYOUT_MONO;
    source.set_output_format(&options).unwrap();

    let props = source.properties();
    assert_eq!(props.channels, 1);
    assert_eq!(props.sample_format, SampleFormat::Flt);
    assert_eq!(props.bits_per_sample, 32);

    let read = |source: &mut AudioSource| {
        let mut buf = vec![0u8; 4 * 10];
        source.get_audio(&mut buf, 5000, 10).unwrap();
        buf
    };
    let once = read(&mut source);
    let first = f32::from_le_bytes(once[..4].try_into().unwrap());
    let mix = (sample_value(5000, 0) as f64 + sample_value(5000, 1) as f64) / 2.0 / 32768.0;
    assert!((first as f64 - mix).abs() < 1e-6);

    source.set_output_format(&options).unwrap();
    assert_eq!(read(&mut source), once);
}

#[test]
fn test_forced_resampling_keeps_every_sample() {
    let fx = Fixture::new(&standard_media());
    let mut source = open(&fx, DelayMode::FirstVideoTrack);
    let mut options = source.resample_options();
    options.force_resample = true;
    source.set_output_format(&options).unwrap();

    // The converter holds samples back; none may be lost or zero-filled
    assert_eq!(read_s16(&mut source, 0, 5000), expected(0, 5000));
    for start in [700_000u64, 1020, 300_000, 299_990] {
        assert_eq!(
            read_s16(&mut source, start as i64, 20),
            expected(start, 20),
            "sample {}",
            start
        );
    }
    assert_eq!(read_s16(&mut source, 959_000, 1000), expected(959_000, 1000));
}

#[test]
fn test_invalid_output_format() {
    let fx = Fixture::new(&standard_media());
    let mut source = open(&fx, DelayMode::FirstVideoTrack);

    let mut options = source.resample_options();
    options.sample_rate = 44_100;
    let err = source.set_output_format(&options).unwrap_err();
    assert!(err.is(ErrorKind::Resampling, ErrorSubkind::Unsupported));

    let mut options = source.resample_options();
    options.channel_layout = 0;
    let err = source.set_output_format(&options).unwrap_err();
    assert!(err.is(ErrorKind::Resampling, ErrorSubkind::InvalidArgument));

    // Still serving the native format
    assert_eq!(read_s16(&mut source, 0, 4), expected(0, 4));
}

#[test]
fn test_undecodable_packet_reads_as_silence() {
    let desc = MediaDesc {
        audio: vec![AudioDesc {
            total_samples: 20 * 1024,
            corrupt: vec![5],
            ..Default::default()
        }],
        ..Default::default()
    };
    let fx = Fixture::new(&desc);
    let engine = engine();
    let index = build_index(&engine, &fx.media, ErrorHandling::Ignore);
    let mut source = AudioSource::open(&engine, &fx.media, 0, index, DelayMode::NoShift).unwrap();

    let data = read_s16(&mut source, 5 * 1024 - 2, 1024 + 4);
    assert_eq!(&data[..4], &expected(5 * 1024 - 2, 2)[..]);
    assert!(data[4..4 + 2048].iter().all(|&v| v == 0));
    assert_eq!(&data[4 + 2048..], &expected(6 * 1024, 2)[..]);
}

#[test]
fn test_open_checks() {
    let fx = Fixture::new(&standard_media());
    let engine = engine();
    let index = build_index(&engine, &fx.media, ErrorHandling::Abort);
    let err = AudioSource::open(&engine, &fx.media, 0, index, DelayMode::NoShift)
        .err()
        .unwrap();
    assert!(err.is(ErrorKind::Track, ErrorSubkind::InvalidArgument));
}

mod support;

use pes_sink::{
    AccessUnit, DeviceEvent, HardwareProfile, RenderOutcome, Sink, SinkConfig, SinkError, StreamSetup,
    StreamType,
};
use support::{MockDevice, packets, pts_of};

const AVCC: [u8; 17] = [
    0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00, 0x02, 0x68, 0xCE,
];
const SPS_PPS: [u8; 12] = [0, 0, 1, 0x67, 0x42, 0xC0, 0x1E, 0, 0, 1, 0x68, 0xCE];
const SECOND: u64 = 1_000_000_000;

fn sink(config: SinkConfig) -> (Sink<MockDevice>, MockDevice) {
    let dev = MockDevice::new();
    (Sink::new(dev.clone(), config), dev)
}

fn fast_drain() -> SinkConfig {
    SinkConfig { drain_poll_interval_ms: 1, ..SinkConfig::default() }
}

#[test]
fn render_before_setup_is_rejected() {
    let (mut sink, _) = sink(SinkConfig::default());
    assert!(matches!(
        sink.render(AccessUnit::from_slice(&[1], None)),
        Err(SinkError::NotConfigured)
    ));
}

#[test]
fn raw_aac_frame_on_the_wire() {
    let (mut sink, dev) = sink(SinkConfig::default());
    sink.setup(&StreamSetup::new(StreamType::AacRaw).audio(48_000, 2)).unwrap();
    let outcome = sink.render(AccessUnit::from_slice(&[0x21], Some(SECOND))).unwrap();
    assert_eq!(outcome, RenderOutcome::Sent);

    let out = dev.output();
    assert_eq!(out.len(), 22);
    assert_eq!(&out[..4], &[0, 0, 1, 0xC0]);
    assert_eq!(u16::from_be_bytes([out[4], out[5]]), 16);
    assert_eq!(&out[14..21], &[0xFF, 0xF1, 0x4C, 0x80, 0x01, 0x1F, 0xFC]);
    assert_eq!(out[21], 0x21);
    assert_eq!(pts_of(&out), Some(90_000));
    assert_eq!(sink.stats().packetizer.packets, 1);
}

#[test]
fn dts_profile_widens_every_timestamped_header() {
    let config = SinkConfig { hardware: HardwareProfile::DtsRequired, ..SinkConfig::default() };
    let (mut sink, dev) = sink(config);
    sink.setup(&StreamSetup::new(StreamType::Ac3)).unwrap();
    sink.render(AccessUnit::from_slice(&[0x0B, 0x77], Some(0))).unwrap();
    sink.render(AccessUnit::from_slice(&[0x0B, 0x77], None)).unwrap();
    let pkts = packets(&dev.output());
    assert_eq!(pkts[0].1.len(), 19 + 2);
    assert_eq!(pkts[0].1[7] & 0xC0, 0xC0);
    assert_eq!(pkts[1].1.len(), 9 + 2);
}

#[test]
fn h264_avcc_stream() {
    let (mut sink, dev) = sink(SinkConfig::default());
    sink.setup(&StreamSetup::new(StreamType::H264).codec_data(AVCC.to_vec())).unwrap();
    sink.render(AccessUnit::from_slice(&[0, 0, 0, 2, 0x65, 0x88], Some(0))).unwrap();
    sink.render(AccessUnit::from_slice(&[0, 0, 0, 2, 0x41, 0x9A], Some(40_000_000))).unwrap();

    let pkts = packets(&dev.output());
    assert_eq!(pkts.len(), 2);
    let (id, first) = &pkts[0];
    assert_eq!(*id, 0xE0);
    assert_eq!(&first[14..26], &SPS_PPS);
    assert_eq!(&first[26..], &[0, 0, 1, 0x65, 0x88]);
    assert_eq!(&pkts[1].1[14..], &[0, 0, 1, 0x41, 0x9A]);
    assert_eq!(pts_of(&pkts[1].1), Some(3_600));
}

#[test]
fn broken_nal_drops_one_unit_only() {
    let (mut sink, dev) = sink(SinkConfig::default());
    sink.setup(&StreamSetup::new(StreamType::H264).codec_data(AVCC.to_vec())).unwrap();
    let outcome = sink.render(AccessUnit::from_slice(&[0, 0, 0, 9, 0x65], Some(0))).unwrap();
    assert_eq!(outcome, RenderOutcome::Dropped);
    assert!(dev.output().is_empty());

    assert_eq!(
        sink.render(AccessUnit::from_slice(&[0, 0, 0, 1, 0x65], Some(0))).unwrap(),
        RenderOutcome::Sent
    );
    let stats = sink.stats();
    assert_eq!(stats.packetizer.units, 2);
    assert_eq!(stats.packetizer.units_dropped, 1);
}

#[test]
fn flush_cycle_resends_codec_header() {
    let (mut sink, dev) = sink(SinkConfig::default());
    sink.setup(&StreamSetup::new(StreamType::H264).codec_data(AVCC.to_vec())).unwrap();
    let control = sink.control();
    sink.render(AccessUnit::from_slice(&[0, 0, 0, 1, 0x65], None)).unwrap();

    control.flush_start();
    assert_eq!(
        sink.render(AccessUnit::from_slice(&[0, 0, 0, 1, 0x41], None)).unwrap(),
        RenderOutcome::Flushing
    );
    sink.flush_stop();
    assert_eq!(dev.state.lock().clears, 1);

    sink.render(AccessUnit::from_slice(&[0, 0, 0, 1, 0x65], None)).unwrap();
    let pkts = packets(&dev.output());
    assert_eq!(pkts.len(), 2);
    assert!(pkts.iter().all(|(_, p)| p[9..21] == SPS_PPS));
}

#[test]
fn paused_sink_queues_then_drains_at_end_of_stream() {
    let (mut sink, dev) = sink(fast_drain());
    sink.setup(&StreamSetup::new(StreamType::Mpeg2Audio)).unwrap();
    let control = sink.control();
    control.set_paused(true);
    assert_eq!(
        sink.render(AccessUnit::from_slice(&[0xFF, 0xFD], Some(0))).unwrap(),
        RenderOutcome::Queued
    );
    assert!(dev.output().is_empty());
    control.set_paused(false);
    assert!(sink.end_of_stream().unwrap());
    assert_eq!(packets(&dev.output()).len(), 1);
}

#[test]
fn end_of_stream_waits_for_decoder_clock() {
    let (mut sink, dev) = sink(fast_drain());
    dev.state.lock().drained = false;
    sink.setup(&StreamSetup::new(StreamType::Mpeg2Audio)).unwrap();
    sink.render(AccessUnit::from_slice(&[0xFF, 0xFD], Some(2 * SECOND))).unwrap();

    let state = dev.state.clone();
    let decoder = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        state.lock().decoder_pts = Some(180_001);
    });
    assert!(sink.end_of_stream().unwrap());
    decoder.join().unwrap();
    assert!(sink.decoder_time().unwrap() >= 2 * SECOND);
}

#[test]
fn end_of_stream_gives_up_after_timeout() {
    let config = SinkConfig { drain_timeout_ms: Some(20), ..fast_drain() };
    let (mut sink, dev) = sink(config);
    dev.state.lock().drained = false;
    sink.setup(&StreamSetup::new(StreamType::Mpeg2Audio)).unwrap();
    sink.render(AccessUnit::from_slice(&[0xFF, 0xFD], Some(SECOND))).unwrap();
    assert!(!sink.end_of_stream().unwrap());
}

#[test]
fn unlock_cuts_end_of_stream_short() {
    let (mut sink, dev) = sink(fast_drain());
    dev.state.lock().drained = false;
    sink.setup(&StreamSetup::new(StreamType::Mpeg2Audio)).unwrap();
    sink.control().unlock();
    assert!(!sink.end_of_stream().unwrap());
}

#[test]
fn decoder_time_holds_last_nonzero_reading() {
    let (mut sink, dev) = sink(SinkConfig::default());
    assert_eq!(sink.decoder_time(), None);
    dev.state.lock().decoder_pts = Some(9_000);
    assert_eq!(sink.decoder_time(), Some(99_999_000));
    dev.state.lock().decoder_pts = Some(0);
    assert_eq!(sink.decoder_time(), Some(99_999_000));
}

#[test]
fn device_events_surface_through_the_sink() {
    let (mut sink, dev) = sink(SinkConfig::default());
    sink.setup(&StreamSetup::new(StreamType::Mpeg2Video)).unwrap();
    dev.state.lock().events.push_back(DeviceEvent::FrameRateChanged { millihertz: 25_000 });
    sink.render(AccessUnit::from_slice(&[0, 0, 1, 0x00, 0x10], Some(0))).unwrap();
    assert_eq!(sink.take_events(), vec![DeviceEvent::FrameRateChanged { millihertz: 25_000 }]);
}

#[test]
fn stop_returns_to_unconfigured() {
    let (mut sink, _) = sink(SinkConfig::default());
    sink.setup(&StreamSetup::new(StreamType::Ac3)).unwrap();
    assert_eq!(sink.stream_type(), Some(StreamType::Ac3));
    sink.stop();
    assert_eq!(sink.stream_type(), None);
    assert!(matches!(
        sink.render(AccessUnit::from_slice(&[1], None)),
        Err(SinkError::NotConfigured)
    ));
}

#[test]
fn wma_without_block_size_fails_at_setup() {
    let (mut sink, dev) = sink(SinkConfig::default());
    let mut setup = StreamSetup::new(StreamType::Wma).audio(44_100, 2);
    setup.wma_version = Some(2);
    setup.block_align = Some(0);
    let err = sink.setup(&setup).unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(
        sink.render(AccessUnit::from_slice(&[1, 2, 3], None)),
        Err(SinkError::NotConfigured)
    ));
    assert!(dev.output().is_empty());
}

//! Stream state machine scenarios
//!
//! Drives a single stream by hand with a manual clock and a capturing
//! session, checking the counters after each classified cycle.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tclass_io::{Clock, ManualClock, Timestamp};
use tclass_protocol::{decode, PayloadSource, SeqNumber, HEADER_SIZE, LOREM_IPSUM};
use tclass_stream::{
    Dispatch, Family, Outcome, StatsAggregator, Stream, StreamConfig, StreamId, StreamStats,
};
use tclass_tests::{quiet_stats, with_sequence, CaptureSession};

fn setup(priority: u8) -> (Stream<CaptureSession>, CaptureSession, Arc<StatsAggregator>) {
    let session = CaptureSession::new();
    let stats = quiet_stats();
    let stream = Stream::new(
        StreamId::new(Family::Ipv4, priority),
        session.clone(),
        PayloadSource::default(),
        StdRng::seed_from_u64(2),
        StreamConfig {
            wait: Duration::from_secs(2),
            ..StreamConfig::default()
        },
        stats.clone(),
    );
    (stream, session, stats)
}

fn invariant_holds(stats: &StreamStats) -> bool {
    stats.completed() <= stats.sent
}

#[test]
fn test_received_dropped_wrong_order_sequence() {
    assert_eq!(LOREM_IPSUM.len(), 1230);

    let clock = ManualClock::new(Timestamp::from_millis(10_000));
    let (mut stream, session, stats) = setup(2);
    let id = stream.id();

    // Cycle 1: echoed after 500 ms
    let Ok(Dispatch::Sent { seq, .. }) = stream.begin_cycle(clock.now()) else {
        panic!("cycle 1 did not send");
    };
    assert_eq!(seq, SeqNumber::new(1));
    let request = session.last().unwrap();
    assert!(request.len() >= HEADER_SIZE && request.len() < HEADER_SIZE + 1230);
    clock.advance(500);
    assert_eq!(stream.on_reply(clock.now(), &request), Some(Outcome::Received));

    let snap = stats.snapshot(id).unwrap();
    assert_eq!(snap.received, 1);
    assert_eq!(snap.latency_count, 1);
    assert_eq!(snap.latency_sum, 500);

    // Cycle 2: no echo within the wait window
    clock.advance(1);
    let Ok(Dispatch::Sent { seq, deadline, .. }) = stream.begin_cycle(clock.now()) else {
        panic!("cycle 2 did not send");
    };
    assert_eq!(seq, SeqNumber::new(2));
    let stale = session.last().unwrap();
    clock.advance(1_999);
    assert_eq!(stream.poll_timeout(clock.now()), None);
    clock.set(deadline);
    assert_eq!(stream.poll_timeout(clock.now()), Some(Outcome::Dropped));

    // Cycle 3: the echo of cycle 2 shows up late
    clock.advance(1);
    let Ok(Dispatch::Sent { seq, .. }) = stream.begin_cycle(clock.now()) else {
        panic!("cycle 3 did not send");
    };
    assert_eq!(seq, SeqNumber::new(3));
    assert_eq!(decode(&stale).unwrap().seq, SeqNumber::new(2));
    clock.advance(30);
    assert_eq!(stream.on_reply(clock.now(), &stale), Some(Outcome::WrongOrder));

    let snap = stats.snapshot(id).unwrap();
    assert_eq!(snap.sent, 3);
    assert_eq!(snap.received, 1);
    assert_eq!(snap.dropped, 1);
    assert_eq!(snap.wrong_order, 1);
    assert_eq!(snap.invalid, 0);
    assert_eq!(snap.latency_count, 1);
    assert_eq!(snap.mean_rtt_us(), 500_000);
    assert_eq!(session.count(), 3);
}

#[test]
fn test_invalid_replies_ignore_sequence() {
    let clock = ManualClock::new(Timestamp::ZERO);
    let (mut stream, session, stats) = setup(5);

    // Unknown type tag but the right sequence number
    stream.begin_cycle(clock.now()).unwrap();
    let mut reply = session.last().unwrap().to_vec();
    reply[0] = 0x00;
    assert_eq!(stream.on_reply(clock.advance(3), &reply), Some(Outcome::Invalid));

    // Fewer bytes than a header
    clock.advance(1);
    stream.begin_cycle(clock.now()).unwrap();
    let request = session.last().unwrap();
    assert_eq!(
        stream.on_reply(clock.advance(3), &request[..HEADER_SIZE - 1]),
        Some(Outcome::Invalid)
    );

    // Right tag, bad length byte
    clock.advance(1);
    stream.begin_cycle(clock.now()).unwrap();
    let mut reply = session.last().unwrap().to_vec();
    reply[1] = 8;
    assert_eq!(stream.on_reply(clock.advance(3), &reply), Some(Outcome::Invalid));

    let snap = stats.snapshot(stream.id()).unwrap();
    assert_eq!(snap.invalid, 3);
    assert_eq!(snap.received, 0);
    assert_eq!(snap.latency_count, 0);
    assert!(invariant_holds(&snap));
}

#[test]
fn test_future_sequence_is_wrong_order() {
    let clock = ManualClock::new(Timestamp::ZERO);
    let (mut stream, session, stats) = setup(1);

    stream.begin_cycle(clock.now()).unwrap();
    let reply = with_sequence(&session.last().unwrap(), 99);
    assert_eq!(stream.on_reply(clock.advance(1), &reply), Some(Outcome::WrongOrder));
    assert_eq!(stats.snapshot(stream.id()).unwrap().wrong_order, 1);
}

#[test]
fn test_send_failures_do_not_advance() {
    let clock = ManualClock::new(Timestamp::ZERO);
    let (mut stream, session, stats) = setup(0);
    session.fail_sends(3);

    for _ in 0..3 {
        assert!(matches!(
            stream.begin_cycle(clock.advance(10)),
            Ok(Dispatch::Backoff(_))
        ));
        assert_eq!(stream.sequence_sent(), SeqNumber::ZERO);
    }
    assert_eq!(stats.snapshot(stream.id()).unwrap().sent, 0);

    let Ok(Dispatch::Sent { seq, len, .. }) = stream.begin_cycle(clock.advance(10)) else {
        panic!("send should succeed once failures stop");
    };
    assert_eq!(seq, SeqNumber::new(1));
    assert_eq!(len, session.last().unwrap().len());
    assert_eq!(stats.snapshot(stream.id()).unwrap().sent, 1);
}

#[test]
fn test_reply_and_timer_race() {
    let clock = ManualClock::new(Timestamp::ZERO);
    let (mut stream, session, stats) = setup(3);

    stream.begin_cycle(clock.now()).unwrap();
    let echo = session.last().unwrap();

    // Echo wins, then the timer for the same cycle fires
    assert_eq!(stream.on_reply(clock.advance(10), &echo), Some(Outcome::Received));
    assert_eq!(stream.on_timeout(clock.advance(2_000), SeqNumber::new(1)), None);

    // Timer wins, then the echo arrives
    stream.begin_cycle(clock.now()).unwrap();
    let echo = session.last().unwrap();
    assert_eq!(stream.on_timeout(clock.advance(2_000), SeqNumber::new(2)), Some(Outcome::Dropped));
    assert_eq!(stream.on_reply(clock.advance(1), &echo), None);

    let snap = stats.snapshot(stream.id()).unwrap();
    assert_eq!(snap.sent, 2);
    assert_eq!(snap.completed(), 2);
}

#[test]
fn test_deadline_across_clock_wrap() {
    let clock = ManualClock::new(Timestamp::from_millis(tclass_io::UPTIME_WRAP - 500));
    let (mut stream, session, stats) = setup(4);

    let Ok(Dispatch::Sent { deadline, .. }) = stream.begin_cycle(clock.now()) else {
        panic!("send failed");
    };
    assert_eq!(deadline, Timestamp::from_millis(1_500));

    clock.advance(600);
    assert_eq!(stream.poll_timeout(clock.now()), None);
    let echo = session.last().unwrap();
    assert_eq!(stream.on_reply(clock.now(), &echo), Some(Outcome::Received));
    assert_eq!(stats.snapshot(stream.id()).unwrap().latency_sum, 600);
}

#[test]
fn test_counters_stay_consistent() {
    let clock = ManualClock::new(Timestamp::ZERO);
    let (mut stream, session, stats) = setup(6);

    for cycle in 0..50u32 {
        stream.begin_cycle(clock.advance(1)).unwrap();
        let request = session.last().unwrap();
        match cycle % 4 {
            0 => {
                stream.on_reply(clock.advance(5), &request);
            }
            1 => {
                clock.advance(2_000);
                stream.poll_timeout(clock.now());
            }
            2 => {
                stream.on_reply(clock.advance(5), &with_sequence(&request, cycle));
            }
            _ => {
                stream.on_reply(clock.advance(5), &request[..4]);
            }
        }
        let snap = stats.snapshot(stream.id()).unwrap();
        assert!(invariant_holds(&snap));
        assert_eq!(snap.completed(), snap.sent);
    }

    let snap = stats.snapshot(stream.id()).unwrap();
    assert_eq!(snap.sent, 50);
    assert_eq!(snap.received, 13);
    assert_eq!(snap.dropped, 13);
    assert_eq!(snap.wrong_order, 12);
    assert_eq!(snap.invalid, 12);
}

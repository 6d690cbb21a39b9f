use crate::receiver::sequence_tracker::{GapInfo, MAX_GAP, SequenceTracker};

#[test]
fn test_in_order_packets_report_no_gap() {
    let mut tracker = SequenceTracker::new();
    for seq in 100..110 {
        assert_eq!(tracker.record(seq), None);
    }
    let stats = tracker.stats();
    assert_eq!(stats.packets_received, 10);
    assert_eq!(stats.total_lost, 0);
    assert!(stats.loss_ratio.abs() < f64::EPSILON);
}

#[test]
fn test_gap_is_reported() {
    let mut tracker = SequenceTracker::new();
    tracker.record(10);
    assert_eq!(tracker.record(14), Some(GapInfo { start: 11, count: 3 }));
    assert_eq!(tracker.record(15), None);

    let stats = tracker.stats();
    assert_eq!(stats.total_gaps, 1);
    assert_eq!(stats.total_lost, 3);
}

#[test]
fn test_gap_across_wraparound() {
    let mut tracker = SequenceTracker::new();
    tracker.record(0xFFFE);
    assert_eq!(tracker.record(1), Some(GapInfo { start: 0xFFFF, count: 2 }));
}

#[test]
fn test_late_packet_does_not_move_expected() {
    let mut tracker = SequenceTracker::new();
    tracker.record(50);
    tracker.record(51);
    assert_eq!(tracker.record(40), None);
    assert_eq!(tracker.record(52), None);
    assert_eq!(tracker.stats().late_packets, 1);
}

#[test]
fn test_large_jump_resynchronises() {
    let mut tracker = SequenceTracker::new();
    tracker.record(1);
    assert_eq!(tracker.record(1 + MAX_GAP + 5), None);
    assert_eq!(tracker.record(2 + MAX_GAP + 5), None);
}

#[test]
fn test_reset_forgets_expected() {
    let mut tracker = SequenceTracker::new();
    tracker.record(1);
    tracker.reset();
    assert_eq!(tracker.record(500), None);
    assert_eq!(tracker.stats().packets_received, 1);
}

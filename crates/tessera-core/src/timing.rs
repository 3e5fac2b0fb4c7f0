//! Mapping between wall-clock time and sample offsets
//!
//! The dispatcher schedules control events to sample positions inside audio
//! blocks, and converts positions in events coming back from the engine into
//! wall-clock timestamps. Both directions are anchored to the block start
//! times carried by the engine's per-block SYNC event, so the mapping stays
//! correct across the asynchronous boundary even when the two sides drift.

use crate::types::Time;

/// Bidirectional time/sample-offset converter
///
/// `incoming` is the start time of the block that control events are being
/// scheduled into; `outgoing` is the start time of the block that produced
/// the events currently being drained from the engine. Both advance once per
/// block when the SYNC event is observed.
#[derive(Debug)]
pub struct EventTimer {
    sample_rate: f64,
    block_size: usize,
    block_duration: Time,
    incoming_block_time: Time,
    outgoing_block_time: Time,
}

impl EventTimer {
    /// Create a timer for the given rate and block size
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            block_size,
            block_duration: Time::from_secs_f64(block_size as f64 / sample_rate as f64),
            incoming_block_time: Time::ZERO,
            outgoing_block_time: Time::ZERO,
        }
    }

    /// Map a wall-clock time to an offset within the current block
    ///
    /// Returns `None` when `time` lies beyond the current block; the caller
    /// must retry on a later tick. Times in the past map to offset 0, so a
    /// late event fires at the start of the block rather than being skewed.
    pub fn sample_offset_from_realtime(&self, time: Time) -> Option<usize> {
        if time > self.incoming_block_time + self.block_duration {
            return None;
        }
        let elapsed = (time - self.incoming_block_time).as_micros() as f64;
        let offset = (elapsed * self.sample_rate / 1_000_000.0).round().max(0.0) as usize;
        Some(offset.min(self.block_size - 1))
    }

    /// Map a sample offset in the outgoing block to a wall-clock time
    pub fn real_time_from_sample_offset(&self, offset: usize) -> Time {
        let micros = (offset as f64 * 1_000_000.0 / self.sample_rate).round() as i64;
        self.outgoing_block_time + Time::from_micros(micros)
    }

    /// Advance the anchor for events being scheduled into the engine
    pub fn set_incoming_time(&mut self, time: Time) {
        self.incoming_block_time = time;
    }

    /// Advance the anchor for events coming back from the engine
    pub fn set_outgoing_time(&mut self, time: Time) {
        self.outgoing_block_time = time;
    }

    /// Start time of the block events are currently scheduled into
    pub fn incoming_block_time(&self) -> Time {
        self.incoming_block_time
    }

    /// Duration of one block
    pub fn block_duration(&self) -> Time {
        self.block_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_within_current_block() {
        let timer = EventTimer::new(48_000.0, 64);
        // 1 ms into the block at 48 kHz is sample 48
        assert_eq!(
            timer.sample_offset_from_realtime(Time::from_millis(1)),
            Some(48)
        );
    }

    #[test]
    fn test_future_event_is_deferred() {
        let timer = EventTimer::new(48_000.0, 64);
        // One block is ~1333 us; 2 ms is past the current block
        assert_eq!(timer.sample_offset_from_realtime(Time::from_millis(2)), None);
    }

    #[test]
    fn test_past_event_clamps_to_block_start() {
        let mut timer = EventTimer::new(48_000.0, 64);
        timer.set_incoming_time(Time::from_millis(10));
        assert_eq!(
            timer.sample_offset_from_realtime(Time::from_millis(5)),
            Some(0)
        );
    }

    #[test]
    fn test_offset_is_clipped_to_block() {
        let timer = EventTimer::new(48_000.0, 64);
        // Exactly one block ahead still maps in, at the last frame
        let end = Time::from_micros(1_333);
        assert_eq!(timer.sample_offset_from_realtime(end), Some(63));
    }

    #[test]
    fn test_round_trip_for_every_offset() {
        let mut timer = EventTimer::new(48_000.0, 64);
        let anchor = Time::from_millis(100);
        timer.set_incoming_time(anchor);
        timer.set_outgoing_time(anchor);
        for offset in 0..64 {
            let t = timer.real_time_from_sample_offset(offset);
            assert_eq!(
                timer.sample_offset_from_realtime(t),
                Some(offset),
                "offset {offset} did not survive the round trip"
            );
        }
    }

    #[test]
    fn test_round_trip_at_high_sample_rate() {
        let mut timer = EventTimer::new(192_000.0, 256);
        timer.set_incoming_time(Time::from_millis(7));
        timer.set_outgoing_time(Time::from_millis(7));
        for offset in 0..256 {
            let t = timer.real_time_from_sample_offset(offset);
            assert_eq!(timer.sample_offset_from_realtime(t), Some(offset));
        }
    }

    #[test]
    fn test_anchors_advance_independently() {
        let mut timer = EventTimer::new(48_000.0, 64);
        timer.set_incoming_time(Time::from_millis(3));
        timer.set_outgoing_time(Time::from_millis(1));
        assert_eq!(timer.incoming_block_time(), Time::from_millis(3));
        assert_eq!(
            timer.real_time_from_sample_offset(0),
            Time::from_millis(1)
        );
    }
}

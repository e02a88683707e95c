//! Run statistics
//!
//! [`StatisticsSink`] is the recording interface the routing protocol calls
//! into. The calls are pure recording: nothing they do feeds back into
//! scheduling. The replication skips them entirely while the warm-up phase
//! is active.
//!
//! [`RunStatistics`] is the sink every replication carries. Reports of
//! several replications are combined with [`RunStatistics::merge`].

use crate::network::StationId;
use crate::simulator::{Duration, VirtualTime};
use serde::Serialize;

pub trait StatisticsSink {
    /// A client arrived at `station`; `interval` is the time since the
    /// previous arrival there.
    fn log_station_arrival(&mut self, now: VirtualTime, station: StationId, interval: Option<Duration>);

    /// A client left `station`; `interval` is the time since the previous
    /// departure there.
    fn log_station_leave(&mut self, now: VirtualTime, station: StationId, interval: Option<Duration>);

    /// Occupancy of a client-counting station grew to `clients_at_station`.
    fn log_client_enters_station(&mut self, now: VirtualTime, station: StationId, clients_at_station: usize);

    /// Occupancy of a client-counting station shrank to `clients_at_station`.
    fn log_client_leaves_station(&mut self, now: VirtualTime, station: StationId, clients_at_station: usize);

    /// A client left the system after `residence` time.
    fn log_client_disposed(&mut self, now: VirtualTime, residence: Duration);

    /// Discards everything recorded so far.
    fn reset_for_warm_up_end(&mut self, now: VirtualTime);
}

/// Streaming mean and variance (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningMean {
    pub count: u64,
    pub mean: f64,
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningMean {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Combines two partial results (Chan et al.).
    pub fn merge(&mut self, other: &RunningMean) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        self.m2 += other.m2 + delta * delta * (self.count as f64 * other.count as f64) / count as f64;
        self.mean = mean;
        self.count = count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Time-weighted average of a step function, e.g. clients at a station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimeWeighted {
    pub current: f64,
    pub max: f64,
    integral: f64,
    since: VirtualTime,
    last_change: VirtualTime,
}

impl TimeWeighted {
    pub fn set(&mut self, now: VirtualTime, value: f64) {
        self.advance(now);
        self.current = value;
        self.max = self.max.max(value);
    }

    fn advance(&mut self, now: VirtualTime) {
        let span = now.saturating_since(self.last_change);
        self.integral += span.as_millis() as f64 * self.current;
        self.last_change = self.last_change.max(now);
    }

    pub fn mean(&self) -> f64 {
        let span = self.last_change.saturating_since(self.since).as_millis();
        if span == 0 {
            self.current
        } else {
            self.integral / span as f64
        }
    }

    fn restart(&mut self, now: VirtualTime) {
        *self = TimeWeighted {
            current: self.current,
            max: self.current,
            integral: 0.0,
            since: now,
            last_change: now,
        };
    }

    fn merge(&mut self, other: &TimeWeighted) {
        self.integral += other.integral;
        let span = self.last_change.saturating_since(self.since)
            + other.last_change.saturating_since(other.since);
        self.since = VirtualTime::ZERO;
        self.last_change = VirtualTime(span.as_millis());
        self.max = self.max.max(other.max);
        self.current += other.current;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StationStatistics {
    pub arrivals: u64,
    pub departures: u64,
    /// Inter-arrival times in seconds
    pub inter_arrival: RunningMean,
    /// Inter-departure times in seconds
    pub inter_departure: RunningMean,
    pub clients_at_station: TimeWeighted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub stations: Vec<StationStatistics>,
    pub clients_disposed: u64,
    /// Time in system of disposed clients in seconds
    pub residence_time: RunningMean,
    /// Simulated time covered, in seconds
    pub simulated_seconds: f64,
    start: VirtualTime,
}

impl RunStatistics {
    pub fn new(stations: usize) -> Self {
        RunStatistics {
            stations: vec![StationStatistics::default(); stations],
            ..Default::default()
        }
    }

    pub fn station(&self, id: StationId) -> Option<&StationStatistics> {
        self.stations.get(id.index())
    }

    fn station_mut(&mut self, id: StationId) -> &mut StationStatistics {
        if id.index() >= self.stations.len() {
            self.stations.resize(id.index() + 1, StationStatistics::default());
        }
        &mut self.stations[id.index()]
    }

    /// Closes time-weighted values at the end of a run.
    pub fn finish(&mut self, now: VirtualTime) {
        for station in &mut self.stations {
            station.clients_at_station.advance(now);
        }
        self.simulated_seconds = now.saturating_since(self.start).as_secs_f64();
    }

    pub fn merge(&mut self, other: &RunStatistics) {
        for (i, theirs) in other.stations.iter().enumerate() {
            let ours = self.station_mut(StationId(i as u32));
            ours.arrivals += theirs.arrivals;
            ours.departures += theirs.departures;
            ours.inter_arrival.merge(&theirs.inter_arrival);
            ours.inter_departure.merge(&theirs.inter_departure);
            ours.clients_at_station.merge(&theirs.clients_at_station);
        }
        self.clients_disposed += other.clients_disposed;
        self.residence_time.merge(&other.residence_time);
        self.simulated_seconds += other.simulated_seconds;
    }
}

impl StatisticsSink for RunStatistics {
    fn log_station_arrival(&mut self, _now: VirtualTime, station: StationId, interval: Option<Duration>) {
        let stats = self.station_mut(station);
        stats.arrivals += 1;
        if let Some(interval) = interval {
            stats.inter_arrival.add(interval.as_secs_f64());
        }
    }

    fn log_station_leave(&mut self, _now: VirtualTime, station: StationId, interval: Option<Duration>) {
        let stats = self.station_mut(station);
        stats.departures += 1;
        if let Some(interval) = interval {
            stats.inter_departure.add(interval.as_secs_f64());
        }
    }

    fn log_client_enters_station(&mut self, now: VirtualTime, station: StationId, clients_at_station: usize) {
        self.station_mut(station)
            .clients_at_station
            .set(now, clients_at_station as f64);
    }

    fn log_client_leaves_station(&mut self, now: VirtualTime, station: StationId, clients_at_station: usize) {
        self.station_mut(station)
            .clients_at_station
            .set(now, clients_at_station as f64);
    }

    fn log_client_disposed(&mut self, _now: VirtualTime, residence: Duration) {
        self.clients_disposed += 1;
        self.residence_time.add(residence.as_secs_f64());
    }

    fn reset_for_warm_up_end(&mut self, now: VirtualTime) {
        for station in &mut self.stations {
            station.arrivals = 0;
            station.departures = 0;
            station.inter_arrival = RunningMean::default();
            station.inter_departure = RunningMean::default();
            station.clients_at_station.restart(now);
        }
        self.clients_disposed = 0;
        self.residence_time = RunningMean::default();
        self.start = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let mut m = RunningMean::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            m.add(v);
        }
        assert_eq!(m.count, 8);
        assert!((m.mean - 5.0).abs() < 1e-12);
        assert!((m.variance() - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(m.min, 2.0);
        assert_eq!(m.max, 9.0);
    }

    #[test]
    fn test_running_mean_merge_matches_single_pass() {
        let values = [1.0, 3.0, 8.0, 2.5, 6.0, 7.5, 0.5];
        let mut all = RunningMean::default();
        values.iter().for_each(|v| all.add(*v));

        let mut left = RunningMean::default();
        let mut right = RunningMean::default();
        values[..3].iter().for_each(|v| left.add(*v));
        values[3..].iter().for_each(|v| right.add(*v));
        left.merge(&right);

        assert_eq!(left.count, all.count);
        assert!((left.mean - all.mean).abs() < 1e-12);
        assert!((left.variance() - all.variance()).abs() < 1e-9);
    }

    #[test]
    fn test_time_weighted_mean() {
        let mut tw = TimeWeighted::default();
        tw.set(VirtualTime(0), 2.0);
        tw.set(VirtualTime(100), 0.0);
        tw.advance(VirtualTime(200));
        assert!((tw.mean() - 1.0).abs() < 1e-12);
        assert_eq!(tw.max, 2.0);
    }

    #[test]
    fn test_warm_up_reset_discards_counts() {
        let mut stats = RunStatistics::new(2);
        stats.log_station_arrival(VirtualTime(10), StationId(1), Some(Duration(10)));
        stats.log_client_disposed(VirtualTime(10), Duration(500));
        stats.reset_for_warm_up_end(VirtualTime(20));

        assert_eq!(stats.stations[1].arrivals, 0);
        assert_eq!(stats.clients_disposed, 0);
        assert_eq!(stats.residence_time.count, 0);
    }

    #[test]
    fn test_sink_grows_for_unknown_station() {
        let mut stats = RunStatistics::new(0);
        stats.log_station_leave(VirtualTime(5), StationId(3), None);
        assert_eq!(stats.station(StationId(3)).unwrap().departures, 1);
    }

    #[test]
    fn test_merge_sums_counts() {
        let mut a = RunStatistics::new(1);
        let mut b = RunStatistics::new(1);
        a.log_station_arrival(VirtualTime(1), StationId(0), None);
        b.log_station_arrival(VirtualTime(1), StationId(0), None);
        b.log_station_arrival(VirtualTime(2), StationId(0), Some(Duration(1000)));
        a.merge(&b);
        assert_eq!(a.stations[0].arrivals, 3);
        assert_eq!(a.stations[0].inter_arrival.count, 1);
    }
}

//! FIFO of outbound requests, processed one at a time while connected.
//!
//! Failed requests are dropped and reported through the warning sink; there
//! is no retry and no persistence. While offline the queue is bounded: the
//! oldest pending request makes room for a new one, and at most one weather
//! refresh waits at a time.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::{
    error::NetworkError,
    hal::{Connectivity, TelemetrySink, WeatherSource},
    types::{DiagnosticRecord, WeatherReport},
    warnings::{Warning, WarningSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    TelemetryUpload,
    WeatherRefresh,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TelemetryUpload => "telemetry-upload",
            Self::WeatherRefresh => "weather-refresh",
        }
    }

    pub fn failure_warning(self) -> Warning {
        match self {
            Self::TelemetryUpload => Warning::BackendRequestFailed,
            Self::WeatherRefresh => Warning::WeatherRequestFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkQueueEntry {
    TelemetryUpload(Box<DiagnosticRecord>),
    WeatherRefresh,
}

impl NetworkQueueEntry {
    pub fn telemetry(record: DiagnosticRecord) -> Self {
        Self::TelemetryUpload(Box::new(record))
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::TelemetryUpload(_) => RequestKind::TelemetryUpload,
            Self::WeatherRefresh => RequestKind::WeatherRefresh,
        }
    }
}

/// Why `begin` did not hand out an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Empty,
    Busy,
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    TelemetryUploaded,
    TelemetryFailed(NetworkError),
    WeatherRefreshed(WeatherReport),
    WeatherFailed(NetworkError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Idle,
    Busy,
    AwaitingLink,
    Completed(RequestOutcome),
}

pub struct NetworkServices {
    pub weather: Box<dyn WeatherSource>,
    pub telemetry: Box<dyn TelemetrySink>,
}

impl NetworkServices {
    fn perform(&mut self, entry: &NetworkQueueEntry) -> RequestOutcome {
        match entry {
            NetworkQueueEntry::TelemetryUpload(record) => match self.telemetry.upload(record) {
                Ok(()) => RequestOutcome::TelemetryUploaded,
                Err(err) => RequestOutcome::TelemetryFailed(err),
            },
            NetworkQueueEntry::WeatherRefresh => match self.weather.fetch() {
                Ok(report) => RequestOutcome::WeatherRefreshed(report),
                Err(err) => RequestOutcome::WeatherFailed(err),
            },
        }
    }
}

pub const NETWORK_QUEUE_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct NetworkQueue {
    entries: VecDeque<NetworkQueueEntry>,
    occupied: bool,
    capacity: usize,
}

impl Default for NetworkQueue {
    fn default() -> Self {
        Self::with_capacity(NETWORK_QUEUE_CAPACITY)
    }
}

impl NetworkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The capacity counts the in-flight entry, which is never evicted.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            occupied: false,
            capacity: capacity.max(2),
        }
    }

    /// Queues `entry` and returns the request evicted to make room, if any.
    /// A weather refresh already waiting absorbs a new one.
    pub fn enqueue(&mut self, entry: NetworkQueueEntry) -> Option<NetworkQueueEntry> {
        let kind = entry.kind();
        if kind == RequestKind::WeatherRefresh
            && self.pending().any(|queued| queued.kind() == kind)
        {
            debug!(kind = kind.as_str(), "request already pending");
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.remove(usize::from(self.occupied))
        } else {
            None
        };
        if let Some(dropped) = &evicted {
            warn!(
                kind = dropped.kind().as_str(),
                capacity = self.capacity,
                "request queue full; dropping oldest"
            );
        }

        self.entries.push_back(entry);
        debug!(kind = kind.as_str(), pending = self.entries.len(), "request queued");
        evicted
    }

    /// Entries not yet started.
    fn pending(&self) -> impl Iterator<Item = &NetworkQueueEntry> {
        self.entries.iter().skip(usize::from(self.occupied))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    /// Marks the head entry in flight and returns it. The entry stays queued
    /// until `finish`.
    pub fn begin(&mut self, connected: bool) -> Result<&NetworkQueueEntry, QueueStatus> {
        if self.occupied {
            return Err(QueueStatus::Busy);
        }
        if self.entries.is_empty() {
            return Err(QueueStatus::Empty);
        }
        if !connected {
            return Err(QueueStatus::Offline);
        }

        self.occupied = true;
        self.entries.front().ok_or(QueueStatus::Empty)
    }

    /// Drops the in-flight entry and frees the queue for the next one.
    pub fn finish(&mut self) -> Option<NetworkQueueEntry> {
        if !self.occupied {
            return None;
        }
        self.occupied = false;
        self.entries.pop_front()
    }

    /// Runs the head request to completion, if any can be started. Failures
    /// raise the request's warning; success clears it.
    pub fn process_next(
        &mut self,
        connected: bool,
        services: &mut NetworkServices,
        warnings: &mut dyn WarningSink,
    ) -> PollResult {
        let outcome = match self.begin(connected) {
            Ok(entry) => {
                let kind = entry.kind();
                debug!(kind = kind.as_str(), "request started");
                let outcome = services.perform(entry);

                match &outcome {
                    RequestOutcome::TelemetryFailed(err) | RequestOutcome::WeatherFailed(err) => {
                        warn!(kind = kind.as_str(), error = %err, "request failed; dropping");
                        warnings.add_warning(kind.failure_warning());
                    }
                    _ => {
                        info!(kind = kind.as_str(), "request finished");
                        warnings.remove_warning(kind.failure_warning());
                    }
                }
                outcome
            }
            Err(QueueStatus::Empty) => return PollResult::Idle,
            Err(QueueStatus::Busy) => return PollResult::Busy,
            Err(QueueStatus::Offline) => return PollResult::AwaitingLink,
        };

        self.finish();
        PollResult::Completed(outcome)
    }
}

/// Connection bookkeeping shared by the network poller. At most one connect
/// attempt is outstanding at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    pub connected: bool,
    pub connecting: bool,
    pub connect_started_ms: u64,
}

impl LinkState {
    /// Updates the state from the link and starts a connect attempt if none
    /// is pending. Returns whether the link is usable now.
    pub fn refresh(
        &mut self,
        link: &mut dyn Connectivity,
        now_ms: u64,
        connect_timeout_ms: u64,
        warnings: &mut dyn WarningSink,
    ) -> bool {
        if link.is_connected() {
            if !self.connected {
                info!("wifi connected");
            }
            self.connected = true;
            self.connecting = false;
            warnings.remove_warning(Warning::WifiFailed);
            return true;
        }

        if self.connected {
            warn!("wifi connection lost");
            self.connected = false;
        }

        if self.connecting {
            if now_ms.saturating_sub(self.connect_started_ms) < connect_timeout_ms {
                return false;
            }
            warn!(timeout_ms = connect_timeout_ms, "wifi connect attempt timed out");
            warnings.add_warning(Warning::WifiFailed);
            self.connecting = false;
        }

        info!("wifi connecting");
        link.begin_connect();
        self.connecting = true;
        self.connect_started_ms = now_ms;
        false
    }
}

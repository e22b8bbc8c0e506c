//! Repeated-trial echo stress test.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::encode;
use crate::coordinator::CommandCoordinator;
use crate::error::{CoreError, Result};
use crate::events::LinkObserver;
use crate::transport::SerialTransport;
use crate::verifier::VerifyOutcome;

/// Stress run parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub iterations: u32,
    /// Payload spec, hex (`0x...`) or text.
    pub payload: String,
    /// Echo window per trial.
    pub timeout_ms: u64,
    /// Pause between trials.
    pub interval_ms: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            payload: "0x55AA55AA".to_string(),
            timeout_ms: 1000,
            interval_ms: 50,
        }
    }
}

/// What happened in one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Matched,
    Mismatched,
    TimedOut,
    Error,
}

impl From<VerifyOutcome> for TrialStatus {
    fn from(outcome: VerifyOutcome) -> Self {
        match outcome {
            VerifyOutcome::Matched => TrialStatus::Matched,
            VerifyOutcome::Mismatched => TrialStatus::Mismatched,
            VerifyOutcome::TimedOut => TrialStatus::TimedOut,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub index: u32,
    pub status: TrialStatus,
    pub latency_ms: u64,
    /// Hex received, for failed trials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated results of a stress run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressReport {
    pub payload: String,
    pub iterations: u32,
    pub matched: u32,
    pub mismatched: u32,
    pub timed_out: u32,
    pub errors: u32,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
    pub total_ms: u64,
    pub trials: Vec<TrialRecord>,
}

impl StressReport {
    /// Tally trial records. Latency figures cover matched trials only.
    pub fn from_trials(payload: &str, trials: Vec<TrialRecord>, total: Duration) -> Self {
        let count = |status| trials.iter().filter(|t| t.status == status).count() as u32;
        let matched = count(TrialStatus::Matched);

        let latencies: Vec<u64> = trials
            .iter()
            .filter(|t| t.status == TrialStatus::Matched)
            .map(|t| t.latency_ms)
            .collect();
        let avg = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() / latencies.len() as u64)
        };

        let iterations = trials.len() as u32;
        Self {
            payload: payload.to_string(),
            iterations,
            matched,
            mismatched: count(TrialStatus::Mismatched),
            timed_out: count(TrialStatus::TimedOut),
            errors: count(TrialStatus::Error),
            success_rate: if iterations == 0 {
                0.0
            } else {
                f64::from(matched) * 100.0 / f64::from(iterations)
            },
            min_latency_ms: latencies.iter().copied().min(),
            avg_latency_ms: avg,
            max_latency_ms: latencies.iter().copied().max(),
            total_ms: total.as_millis() as u64,
            trials,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TrialRecord> {
        self.trials
            .iter()
            .filter(|t| t.status != TrialStatus::Matched)
    }

    /// Save the full report, trial by trial, as TOML.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Echo stress report")?;
        writeln!(f, "  payload     : {}", self.payload)?;
        writeln!(f, "  trials      : {}", self.iterations)?;
        writeln!(f, "  matched     : {}", self.matched)?;
        writeln!(f, "  mismatched  : {}", self.mismatched)?;
        writeln!(f, "  timed out   : {}", self.timed_out)?;
        writeln!(f, "  errors      : {}", self.errors)?;
        writeln!(f, "  success rate: {:.1}%", self.success_rate)?;
        if let (Some(min), Some(avg), Some(max)) =
            (self.min_latency_ms, self.avg_latency_ms, self.max_latency_ms)
        {
            writeln!(f, "  latency ms  : min {} / avg {} / max {}", min, avg, max)?;
        }
        write!(f, "  duration    : {} ms", self.total_ms)?;

        let failures: Vec<_> = self.failures().take(10).collect();
        if !failures.is_empty() {
            writeln!(f)?;
            write!(f, "  first failures:")?;
            for t in failures {
                write!(f, "\n    #{:<5} {:?}", t.index, t.status)?;
                if let Some(rx) = &t.received {
                    write!(f, " rx={}", if rx.is_empty() { "<none>" } else { rx })?;
                }
                if let Some(err) = &t.error {
                    write!(f, " {}", err)?;
                }
            }
        }
        Ok(())
    }
}

/// Run `config.iterations` echo-checked transmissions.
///
/// A failing trial is recorded and the run moves on. The run aborts only if
/// the payload cannot be encoded or the link is not connected.
pub fn run_stress<T, O>(
    coordinator: &CommandCoordinator<T, O>,
    config: &StressConfig,
    mut on_trial: impl FnMut(&TrialRecord),
) -> Result<StressReport>
where
    T: SerialTransport,
    O: LinkObserver + 'static,
{
    encode(&config.payload)?;
    if !coordinator.is_connected() {
        return Err(CoreError::NotConnected);
    }

    info!(
        iterations = config.iterations,
        payload = %config.payload,
        timeout_ms = config.timeout_ms,
        "Starting stress run"
    );

    let timeout = Duration::from_millis(config.timeout_ms);
    let interval = Duration::from_millis(config.interval_ms);
    let start = Instant::now();
    let mut trials = Vec::with_capacity(config.iterations as usize);

    for index in 1..=config.iterations {
        let trial_start = Instant::now();
        let record = match coordinator.transmit_and_verify(&config.payload, timeout) {
            Ok(report) => TrialRecord {
                index,
                status: report.outcome.into(),
                latency_ms: report.elapsed.as_millis() as u64,
                received: (!report.outcome.is_match()).then_some(report.received),
                error: None,
            },
            Err(CoreError::NotConnected) => return Err(CoreError::NotConnected),
            Err(e) => {
                warn!(trial = index, error = %e, "Trial failed");
                TrialRecord {
                    index,
                    status: TrialStatus::Error,
                    latency_ms: trial_start.elapsed().as_millis() as u64,
                    received: None,
                    error: Some(e.to_string()),
                }
            }
        };
        on_trial(&record);
        trials.push(record);

        if index < config.iterations && !interval.is_zero() {
            thread::sleep(interval);
        }
    }

    let report = StressReport::from_trials(&config.payload, trials, start.elapsed());
    info!(
        matched = report.matched,
        failed = report.iterations - report.matched,
        success_rate = report.success_rate,
        "Stress run complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EchoSettings, PortSettings};
    use crate::events::NullObserver;
    use crate::transport::{EchoMode, MockTransport};
    use std::sync::Arc;

    fn record(index: u32, status: TrialStatus, latency_ms: u64) -> TrialRecord {
        TrialRecord {
            index,
            status,
            latency_ms,
            received: None,
            error: None,
        }
    }

    fn coordinator(mock: &MockTransport) -> CommandCoordinator<MockTransport, NullObserver> {
        let echo = EchoSettings {
            timeout_ms: 200,
            poll_interval_ms: 5,
            quiet_period_ms: 20,
        };
        let coord = CommandCoordinator::with_observer(mock.clone(), Arc::new(NullObserver))
            .with_echo_settings(&echo);
        coord.connect(&PortSettings::default()).unwrap();
        coord
    }

    #[test]
    fn test_report_tallies() {
        let trials = vec![
            record(1, TrialStatus::Matched, 10),
            record(2, TrialStatus::Matched, 30),
            record(3, TrialStatus::TimedOut, 200),
            record(4, TrialStatus::Error, 0),
        ];
        let report = StressReport::from_trials("0x01", trials, Duration::from_millis(500));

        assert_eq!(report.iterations, 4);
        assert_eq!(report.matched, 2);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.mismatched, 0);
        assert_eq!(report.success_rate, 50.0);
        assert_eq!(report.min_latency_ms, Some(10));
        assert_eq!(report.avg_latency_ms, Some(20));
        assert_eq!(report.max_latency_ms, Some(30));
        assert_eq!(report.failures().count(), 2);

        let text = report.to_string();
        assert!(text.contains("success rate: 50.0%"));
        assert!(text.contains("#3"));
    }

    #[test]
    fn test_empty_report() {
        let report = StressReport::from_trials("x", Vec::new(), Duration::ZERO);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.avg_latency_ms, None);
    }

    #[test]
    fn test_run_against_echoing_device() {
        let mock = MockTransport::new();
        mock.set_echo(EchoMode::Exact);
        let coord = coordinator(&mock);

        let config = StressConfig {
            iterations: 5,
            payload: "0xDEADBEEF".into(),
            timeout_ms: 200,
            interval_ms: 0,
        };
        let mut seen = 0;
        let report = run_stress(&coord, &config, |_| seen += 1).unwrap();

        assert_eq!(seen, 5);
        assert_eq!(report.matched, 5);
        assert_eq!(report.success_rate, 100.0);
        assert_eq!(mock.get_writes().len(), 5);
    }

    #[test]
    fn test_run_against_silent_device() {
        let mock = MockTransport::new();
        let coord = coordinator(&mock);

        let config = StressConfig {
            iterations: 2,
            payload: "ping".into(),
            timeout_ms: 30,
            interval_ms: 0,
        };
        let report = run_stress(&coord, &config, |_| {}).unwrap();
        assert_eq!(report.timed_out, 2);
        assert_eq!(report.trials[0].received.as_deref(), Some(""));
    }

    #[test]
    fn test_run_rejects_bad_payload_and_closed_link() {
        let mock = MockTransport::new();
        let coord = coordinator(&mock);
        let bad = StressConfig {
            payload: "0xABC".into(),
            ..Default::default()
        };
        assert!(matches!(run_stress(&coord, &bad, |_| {}), Err(CoreError::InvalidEncoding(_))));

        coord.disconnect().unwrap();
        let config = StressConfig::default();
        assert!(matches!(run_stress(&coord, &config, |_| {}), Err(CoreError::NotConnected)));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_unplug_mid_run_aborts() {
        let mock = MockTransport::new();
        mock.set_echo(EchoMode::Exact);
        let coord = coordinator(&mock);

        let config = StressConfig {
            iterations: 10,
            payload: "0x01".into(),
            timeout_ms: 50,
            interval_ms: 0,
        };
        let unplug = mock.clone();
        let mut count = 0;
        let result = run_stress(&coord, &config, |_| {
            count += 1;
            if count == 3 {
                unplug.unplug();
            }
        });
        assert!(matches!(result, Err(CoreError::NotConnected)));
        assert_eq!(mock.get_writes().len(), 3);
    }
}

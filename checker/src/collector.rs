use crate::compare::compare;
use crate::metrics_defs::{
    ARCHIVE_FETCH_DURATION, CHECK_DURATION, CHECK_RESULT, SWITCH_FETCH_DURATION,
};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use shared::metrics_defs::MetricDef;
use shared::{counter, histogram};
use sources::{ArchiveSource, SwitchConfigSource};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const METRIC_NAME: &str = "switch_monitoring_config_match";
const METRIC_HELP: &str = "Configuration check result for this target";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    ConfigMismatch,
    ConfigNotFoundGcs,
    ConfigNotFoundSwitch,
}

impl CheckStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "ok",
            CheckStatus::ConfigMismatch => "config_mismatch",
            CheckStatus::ConfigNotFoundGcs => "config_not_found_gcs",
            CheckStatus::ConfigNotFoundSwitch => "config_not_found_switch",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub target: String,
    pub status: CheckStatus,
}

/// Evaluates one target: archived config first, then the live one.
///
/// Each side is fetched exactly once, bounded by `fetch_timeout`. A fetch
/// that fails or times out decides the status on its own; nothing is
/// retried and nothing is remembered between evaluations.
pub struct ConfigCheckCollector {
    target: String,
    archive: Arc<dyn ArchiveSource>,
    switch: Arc<dyn SwitchConfigSource>,
    fetch_timeout: Duration,
}

enum Fetch<T> {
    Done(T),
    Failed(String),
    TimedOut,
}

impl ConfigCheckCollector {
    pub fn new(
        target: impl Into<String>,
        archive: Arc<dyn ArchiveSource>,
        switch: Arc<dyn SwitchConfigSource>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            archive,
            switch,
            fetch_timeout,
        }
    }

    pub async fn evaluate(&self) -> CheckResult {
        let start = Instant::now();
        let status = self.status().await;

        histogram!(CHECK_DURATION).record(start.elapsed().as_secs_f64());
        counter!(CHECK_RESULT, "status" => status.as_str()).increment(1);

        CheckResult {
            target: self.target.clone(),
            status,
        }
    }

    async fn status(&self) -> CheckStatus {
        let target = self.target.as_str();

        let archived = match self
            .timed(ARCHIVE_FETCH_DURATION, self.archive.get())
            .await
        {
            Fetch::Done(archived) => archived,
            Fetch::Failed(error) => {
                tracing::error!(target = %target, error = %error, "Cannot fetch archived config");
                return CheckStatus::ConfigNotFoundGcs;
            }
            Fetch::TimedOut => {
                tracing::error!(
                    target = %target,
                    timeout = ?self.fetch_timeout,
                    "Timed out fetching archived config"
                );
                return CheckStatus::ConfigNotFoundGcs;
            }
        };

        let live = match self
            .timed(SWITCH_FETCH_DURATION, self.switch.get_config(target))
            .await
        {
            Fetch::Done(live) => live,
            Fetch::Failed(error) => {
                tracing::error!(target = %target, error = %error, "Cannot fetch config from the switch");
                return CheckStatus::ConfigNotFoundSwitch;
            }
            Fetch::TimedOut => {
                tracing::error!(
                    target = %target,
                    timeout = ?self.fetch_timeout,
                    "Timed out fetching config from the switch"
                );
                return CheckStatus::ConfigNotFoundSwitch;
            }
        };

        let comparison = compare(&String::from_utf8_lossy(&archived), &live);
        if !comparison.matches {
            tracing::warn!(target = %target, "Switch configuration differs from the archived one");
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(target = %target, diff = %comparison.diff(), "Configuration diff");
            }
            return CheckStatus::ConfigMismatch;
        }

        CheckStatus::Ok
    }

    async fn timed<T, E: fmt::Display>(
        &self,
        metric: MetricDef,
        fetch: impl Future<Output = Result<T, E>>,
    ) -> Fetch<T> {
        let start = Instant::now();
        let (fetch, outcome) = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(value)) => (Fetch::Done(value), "ok"),
            Ok(Err(e)) => (Fetch::Failed(e.to_string()), "error"),
            Err(_) => (Fetch::TimedOut, "timeout"),
        };
        histogram!(metric, "outcome" => outcome).record(start.elapsed().as_secs_f64());
        fetch
    }
}

/// Exposes one `CheckResult` as a single gauge sample.
pub struct ConfigMatchMetric {
    gauge: GaugeVec,
}

impl ConfigMatchMetric {
    pub fn new(result: &CheckResult) -> Result<Self, prometheus::Error> {
        let gauge = GaugeVec::new(Opts::new(METRIC_NAME, METRIC_HELP), &["target", "status"])?;
        gauge
            .with_label_values(&[result.target.as_str(), result.status.as_str()])
            .set(1.0);
        Ok(Self { gauge })
    }
}

impl Collector for ConfigMatchMetric {
    fn desc(&self) -> Vec<&Desc> {
        self.gauge.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.gauge.collect()
    }
}

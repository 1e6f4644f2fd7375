use crate::state::{CheckResult, CheckStatus, StatusCounts};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub sitewatch_site_up: GaugeVec,
    pub sitewatch_sites_total: Gauge,
    pub sitewatch_sites_up: Gauge,
    pub sitewatch_sites_down: Gauge,
    pub sitewatch_sites_caution: Gauge,
    pub sitewatch_last_refresh_timestamp_seconds: Gauge,
    pub sitewatch_refresh_duration_seconds: Gauge,
    pub sitewatch_refresh_cycles_total: CounterVec,
    pub sitewatch_uptime_seconds: Gauge,
    pub sitewatch_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let sitewatch_site_up = GaugeVec::new(
            opts!(
                "sitewatch_site_up",
                "Site reachability from the latest refresh (1 up, 0 down); manual-check sites are omitted"
            ),
            &["name", "url"],
        )?;
        let sitewatch_sites_total = Gauge::with_opts(opts!(
            "sitewatch_sites_total",
            "Number of sites in the latest snapshot"
        ))?;
        let sitewatch_sites_up =
            Gauge::with_opts(opts!("sitewatch_sites_up", "Sites reported up"))?;
        let sitewatch_sites_down =
            Gauge::with_opts(opts!("sitewatch_sites_down", "Sites reported down"))?;
        let sitewatch_sites_caution = Gauge::with_opts(opts!(
            "sitewatch_sites_caution",
            "Sites that require a manual check"
        ))?;
        let sitewatch_last_refresh_timestamp_seconds = Gauge::with_opts(opts!(
            "sitewatch_last_refresh_timestamp_seconds",
            "Unix time of the last successful refresh"
        ))?;
        let sitewatch_refresh_duration_seconds = Gauge::with_opts(opts!(
            "sitewatch_refresh_duration_seconds",
            "Duration of the last refresh cycle in seconds"
        ))?;
        let sitewatch_refresh_cycles_total = CounterVec::new(
            opts!(
                "sitewatch_refresh_cycles_total",
                "Refresh cycles by outcome (ok, error, skipped)"
            ),
            &["outcome"],
        )?;
        let sitewatch_uptime_seconds =
            Gauge::with_opts(opts!("sitewatch_uptime_seconds", "Process uptime in seconds"))?;
        let sitewatch_scrape_count_total = Counter::with_opts(opts!(
            "sitewatch_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &sitewatch_site_up)?;
        register(&registry, &sitewatch_sites_total)?;
        register(&registry, &sitewatch_sites_up)?;
        register(&registry, &sitewatch_sites_down)?;
        register(&registry, &sitewatch_sites_caution)?;
        register(&registry, &sitewatch_last_refresh_timestamp_seconds)?;
        register(&registry, &sitewatch_refresh_duration_seconds)?;
        register(&registry, &sitewatch_refresh_cycles_total)?;
        register(&registry, &sitewatch_uptime_seconds)?;
        register(&registry, &sitewatch_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            sitewatch_site_up,
            sitewatch_sites_total,
            sitewatch_sites_up,
            sitewatch_sites_down,
            sitewatch_sites_caution,
            sitewatch_last_refresh_timestamp_seconds,
            sitewatch_refresh_duration_seconds,
            sitewatch_refresh_cycles_total,
            sitewatch_uptime_seconds,
            sitewatch_scrape_count_total,
        }))
    }

    pub fn update_from_snapshot(&self, results: &[CheckResult], last_update: DateTime<Utc>) {
        self.sitewatch_site_up.reset();
        for r in results {
            let value = match r.status {
                CheckStatus::Up => 1.0,
                CheckStatus::Down => 0.0,
                CheckStatus::Caution => continue,
            };
            self.sitewatch_site_up
                .with_label_values(&[&r.name, &r.url])
                .set(value);
        }

        let counts = StatusCounts::from_results(results);
        self.sitewatch_sites_total.set(counts.total() as f64);
        self.sitewatch_sites_up.set(counts.up as f64);
        self.sitewatch_sites_down.set(counts.down as f64);
        self.sitewatch_sites_caution.set(counts.caution as f64);
        self.sitewatch_last_refresh_timestamp_seconds
            .set(last_update.timestamp() as f64);
    }

    pub fn observe_refresh(&self, outcome: &str, elapsed: Duration) {
        self.sitewatch_refresh_cycles_total
            .with_label_values(&[outcome])
            .inc();
        if outcome != "skipped" {
            self.sitewatch_refresh_duration_seconds
                .set(elapsed.as_secs_f64());
        }
    }

    #[cfg(test)]
    pub fn refresh_cycles(&self, outcome: &str) -> u64 {
        self.sitewatch_refresh_cycles_total
            .with_label_values(&[outcome])
            .get() as u64
    }

    pub fn inc_scrape_count(&self) {
        self.sitewatch_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.sitewatch_uptime_seconds
            .set(now_unix().saturating_sub(self.started_at_unix) as f64);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SiteRecord;

    #[test]
    fn snapshot_updates_site_gauges() {
        let metrics = Metrics::new().expect("инициализация метрик");
        let results = vec![
            CheckResult::new(&SiteRecord::new("A", "http://a.test"), CheckStatus::Up, "Site is up"),
            CheckResult::new(
                &SiteRecord::new("B", "http://b.test"),
                CheckStatus::Down,
                "Request timed out",
            ),
            CheckResult::new(
                &SiteRecord::manual("C", "http://c.test"),
                CheckStatus::Caution,
                "Manual check required",
            ),
        ];

        metrics.update_from_snapshot(&results, Utc::now());

        assert_eq!(metrics.sitewatch_sites_total.get(), 3.0);
        assert_eq!(metrics.sitewatch_sites_up.get(), 1.0);
        assert_eq!(metrics.sitewatch_sites_down.get(), 1.0);
        assert_eq!(metrics.sitewatch_sites_caution.get(), 1.0);
        assert_eq!(
            metrics
                .sitewatch_site_up
                .with_label_values(&["B", "http://b.test"])
                .get(),
            0.0
        );

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("sitewatch_site_up{name=\"A\",url=\"http://a.test\"} 1"));
        assert!(!text.contains("url=\"http://c.test\""));
    }

    #[test]
    fn refresh_outcomes_are_counted() {
        let metrics = Metrics::new().expect("инициализация метрик");
        metrics.observe_refresh("ok", Duration::from_millis(1500));
        metrics.observe_refresh("skipped", Duration::ZERO);
        metrics.observe_refresh("ok", Duration::from_millis(500));

        assert_eq!(metrics.refresh_cycles("ok"), 2);
        assert_eq!(metrics.refresh_cycles("skipped"), 1);
        assert_eq!(metrics.refresh_cycles("error"), 0);
        assert_eq!(metrics.sitewatch_refresh_duration_seconds.get(), 0.5);
    }
}

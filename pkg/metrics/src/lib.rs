use std::collections::BTreeMap;
use std::sync::RwLock;

/// A lightweight, thread-safe metrics registry that renders in Prometheus
/// text exposition format. Each metric family carries any number of series
/// keyed by a sorted label set, so per-quota series can be published and
/// dropped independently.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Family>>,
    gauges: RwLock<BTreeMap<String, Family>>,
}

type LabelSet = Vec<(String, String)>;

struct Family {
    help: String,
    series: BTreeMap<LabelSet, f64>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a counter family. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str) {
        let mut counters = self.counters.write().unwrap();
        counters.entry(name.to_string()).or_insert_with(|| Family {
            help: help.to_string(),
            series: BTreeMap::new(),
        });
    }

    /// Register a gauge family. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        let mut gauges = self.gauges.write().unwrap();
        gauges.entry(name.to_string()).or_insert_with(|| Family {
            help: help.to_string(),
            series: BTreeMap::new(),
        });
    }

    /// Increment a counter series by 1, creating the series on first use.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)]) {
        let mut counters = self.counters.write().unwrap();
        if let Some(family) = counters.get_mut(name) {
            *family.series.entry(label_set(labels)).or_insert(0.0) += 1.0;
        }
    }

    /// Set a gauge series to a specific value, creating it on first use.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let mut gauges = self.gauges.write().unwrap();
        if let Some(family) = gauges.get_mut(name) {
            family.series.insert(label_set(labels), value);
        }
    }

    /// Remove every series, in every family, carrying `label == value`.
    /// Used to drop all series of a GlobalResourceQuota that disappeared.
    pub fn remove_matching(&self, label: &str, value: &str) {
        for table in [&self.counters, &self.gauges] {
            let mut families = table.write().unwrap();
            for family in families.values_mut() {
                family
                    .series
                    .retain(|key, _| !key.iter().any(|(k, v)| k == label && v == value));
            }
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read().unwrap();
        for (name, family) in counters.iter() {
            render_family(&mut output, name, family, "counter");
        }

        let gauges = self.gauges.read().unwrap();
        for (name, family) in gauges.iter() {
            render_family(&mut output, name, family, "gauge");
        }

        output
    }
}

fn render_family(output: &mut String, name: &str, family: &Family, kind: &str) {
    output.push_str(&format!("# HELP {} {}\n", name, family.help));
    output.push_str(&format!("# TYPE {} {}\n", name, kind));
    for (labels, value) in &family.series {
        if labels.is_empty() {
            output.push_str(&format!("{} {}\n", name, value));
        } else {
            let rendered: Vec<String> = labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, v))
                .collect();
            output.push_str(&format!("{}{{{}}} {}\n", name, rendered.join(","), value));
        }
    }
}

fn label_set(labels: &[(&str, &str)]) -> LabelSet {
    let mut set: LabelSet = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    set.sort();
    set
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

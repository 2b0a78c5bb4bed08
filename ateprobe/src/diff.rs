//! Offline comparison of register snapshots.
//!
//! Two scans under different conditions (day and night profiles, or two
//! scans of the same profile) separate registers that hold configuration
//! from registers that track live state. A scan after a single write then
//! shows what that write changed.

use {
    crate::scan::map::{RegisterMap, RegisterValue},
    serde::Serialize,
    std::collections::BTreeSet,
};

/// Partition of the addresses of two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StaticDiff {
    /// Readable in both, same value.
    pub stable: Vec<u8>,
    /// Readable in only one, or different values.
    pub dynamic: Vec<u8>,
    /// Unreadable in both.
    pub excluded: Vec<u8>,
}

/// One register that changed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterChange {
    /// Register address.
    pub addr: u8,
    /// Value before.
    pub old: String,
    /// Value after.
    pub new: String,
}

fn union(a: &RegisterMap, b: &RegisterMap) -> BTreeSet<u8> {
    a.addresses()
        .chain(b.addresses())
        .collect()
}

/// Partition addresses into stable, dynamic and excluded.
///
/// Addresses missing from a map count as unreadable in it.
pub fn diff_static(a: &RegisterMap, b: &RegisterMap) -> StaticDiff {
    let mut diff = StaticDiff::default();

    for addr in union(a, b) {
        match (a.get(addr), b.get(addr)) {
            (RegisterValue::NoResponse, RegisterValue::NoResponse) => diff.excluded.push(addr),
            (RegisterValue::Value(x), RegisterValue::Value(y)) if x == y => diff.stable.push(addr),
            _ => diff.dynamic.push(addr),
        }
    }

    diff
}

/// Every address whose value differs between `baseline` and `tweaked`.
pub fn diff_tweak(baseline: &RegisterMap, tweaked: &RegisterMap) -> Vec<RegisterChange> {
    union(baseline, tweaked)
        .into_iter()
        .filter_map(|addr| {
            let old = baseline.get(addr);
            let new = tweaked.get(addr);
            (old != new).then(|| RegisterChange {
                addr,
                old: old.to_string(),
                new: new.to_string(),
            })
        })
        .collect()
}

/// Three-snapshot analysis: baseline, alternate condition and tweaked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriageReport {
    /// Registers stable across conditions; candidates for configuration.
    pub static_candidates: Vec<u8>,
    /// Registers that track the condition or live state.
    pub dynamic: Vec<u8>,
    /// Registers unreadable under both conditions.
    pub excluded: Vec<u8>,
    /// What the tweak changed relative to the baseline.
    pub tweak_changes: Vec<RegisterChange>,
}

impl TriageReport {
    /// Build a report from the three snapshots.
    pub fn build(baseline: &RegisterMap, alternate: &RegisterMap, tweaked: &RegisterMap) -> Self {
        let partition = diff_static(baseline, alternate);
        Self {
            static_candidates: partition.stable,
            dynamic: partition.dynamic,
            excluded: partition.excluded,
            tweak_changes: diff_tweak(baseline, tweaked),
        }
    }

    /// Whether the tweak changed nothing observable.
    pub fn is_silent_tweak(&self) -> bool {
        self.tweak_changes
            .is_empty()
    }

    /// Tweak changes at addresses that were otherwise static.
    ///
    /// A change at a dynamic address may be noise rather than the tweak.
    pub fn attributable_changes(&self) -> impl Iterator<Item = &RegisterChange> {
        self.tweak_changes
            .iter()
            .filter(|c| {
                self.static_candidates
                    .binary_search(&c.addr)
                    .is_ok()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(json: &str) -> RegisterMap {
        RegisterMap::from_json(json).unwrap()
    }

    #[test]
    fn test_static_diff_is_idempotent() {
        let m = map(r#"{"0x00":"0x01","0x01":"NO_RESPONSE","0x02":"0x33"}"#);
        let diff = diff_static(&m, &m);
        assert!(diff.dynamic.is_empty());
        assert_eq!(diff.stable, m.readable().collect::<Vec<_>>());
        assert_eq!(diff.excluded, vec![0x01]);
    }

    #[test]
    fn test_tweak_scenario() {
        let baseline = map(r#"{"0x00":"0x01","0x01":"0x02"}"#);
        let tweaked = map(r#"{"0x00":"0x01","0x01":"0x05"}"#);
        assert_eq!(
            diff_tweak(&baseline, &tweaked),
            vec![RegisterChange {
                addr: 0x01,
                old: "0x02".into(),
                new: "0x05".into(),
            }]
        );
    }

    #[test]
    fn test_day_night_scenario() {
        let day = map(r#"{"0xfe":"0x10","0x10":"NO_RESPONSE","0x11":"0x00"}"#);
        let night = map(r#"{"0xfe":"0x20","0x10":"NO_RESPONSE","0x11":"0x00"}"#);
        let diff = diff_static(&day, &night);
        assert_eq!(diff.dynamic, vec![0xfe]);
        assert_eq!(diff.stable, vec![0x11]);
        assert_eq!(diff.excluded, vec![0x10]);
        assert!(!diff.stable.contains(&0x10) && !diff.dynamic.contains(&0x10));
    }

    #[test]
    fn test_one_sided_no_response_is_dynamic() {
        let a = map(r#"{"0x05":"0x01"}"#);
        let b = map(r#"{"0x05":"NO_RESPONSE"}"#);
        assert_eq!(diff_static(&a, &b).dynamic, vec![0x05]);
        let change = &diff_tweak(&a, &b)[0];
        assert_eq!(change.new, "NO_RESPONSE");
    }

    #[test]
    fn test_absent_address_counts_as_no_response() {
        let a = map(r#"{"0x05":"NO_RESPONSE","0x06":"0x01"}"#);
        let b = map(r#"{}"#);
        let diff = diff_static(&a, &b);
        assert_eq!(diff.excluded, vec![0x05]);
        assert_eq!(diff.dynamic, vec![0x06]);
        assert_eq!(diff_tweak(&a, &b).len(), 1);
    }

    #[test]
    fn test_triage_report() {
        let base = map(r#"{"0x00":"0x01","0x01":"0x02","0xfe":"0x10"}"#);
        let alt = map(r#"{"0x00":"0x01","0x01":"0x02","0xfe":"0x20"}"#);
        let tweaked = map(r#"{"0x00":"0x01","0x01":"0x03","0xfe":"0x11"}"#);

        let report = TriageReport::build(&base, &alt, &tweaked);

        assert_eq!(report.static_candidates, vec![0x00, 0x01]);
        assert_eq!(report.dynamic, vec![0xfe]);
        assert_eq!(report.tweak_changes.len(), 2);
        assert!(!report.is_silent_tweak());
        let attributable: Vec<_> = report
            .attributable_changes()
            .map(|c| c.addr)
            .collect();
        assert_eq!(attributable, vec![0x01]);
    }

    #[test]
    fn test_silent_tweak() {
        let base = map(r#"{"0x00":"0x01"}"#);
        let report = TriageReport::build(&base, &base, &base);
        assert!(report.is_silent_tweak());
    }
}

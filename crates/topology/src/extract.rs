//! Constraint extraction: which spread constraints are in force in a namespace.

use respread_core::{LabelSelector, LitePod, TopologySpreadConstraint};

/// Constraints a pod declares. Selectors are not validated here.
pub fn constraints_of(pod: &LitePod) -> &[TopologySpreadConstraint] { &pod.spread_constraints }

/// What makes two constraints the same evaluation: key, skew and the canonical
/// selector. A selector that does not compile is compared in wire form.
#[derive(Debug, PartialEq, Eq)]
enum SelectorIdentity<'a> {
    Canonical(String),
    Wire(Option<&'a LabelSelector>),
}

fn identity(c: &TopologySpreadConstraint) -> (&str, i32, SelectorIdentity<'_>) {
    let selector = match c.compile() {
        Ok(sel) => SelectorIdentity::Canonical(sel.to_string()),
        Err(_) => SelectorIdentity::Wire(c.label_selector.as_ref()),
    };
    (c.topology_key.as_str(), c.max_skew, selector)
}

/// Distinct constraints active in one namespace: policy-declared ones first, then
/// pod-declared ones in pod order. Replicas usually repeat the same constraint,
/// so entries with the same identity collapse into one evaluation; the first wins.
pub fn active_constraints<'a>(
    pods: &'a [LitePod],
    declared: &'a [TopologySpreadConstraint],
    include_soft: bool,
) -> Vec<&'a TopologySpreadConstraint> {
    let mut seen = Vec::new();
    let mut out: Vec<&TopologySpreadConstraint> = Vec::new();
    let from_pods = pods.iter().flat_map(constraints_of).filter(|c| include_soft || c.is_hard());
    for c in declared.iter().chain(from_pods) {
        let id = identity(c);
        if !seen.contains(&id) {
            seen.push(id);
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use respread_core::{LabelSelectorRequirement, WhenUnsatisfiable};

    fn zone(skew: i32, app: &str) -> TopologySpreadConstraint {
        TopologySpreadConstraint::new("zone", skew, Some(LabelSelector::match_labels([("app", app)])))
    }

    fn pod(name: &str, constraints: Vec<TopologySpreadConstraint>) -> LitePod {
        LitePod { namespace: "ns".into(), name: name.into(), spread_constraints: constraints, ..Default::default() }
    }

    #[test]
    fn pod_without_constraints_yields_empty() {
        assert!(constraints_of(&pod("a", vec![])).is_empty());
    }

    #[test]
    fn replicas_sharing_a_constraint_collapse() {
        let pods = vec![pod("a", vec![zone(1, "web")]), pod("b", vec![zone(1, "web")]), pod("c", vec![zone(2, "web")])];
        let active = active_constraints(&pods, &[], false);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].max_skew, 1);
        assert_eq!(active[1].max_skew, 2);
    }

    #[test]
    fn policy_constraints_come_first_and_dedupe_against_pods() {
        let declared = vec![zone(1, "web")];
        let pods = vec![pod("a", vec![zone(1, "web"), zone(1, "api")])];
        let active = active_constraints(&pods, &declared, false);
        assert_eq!(active, vec![&declared[0], &pods[0].spread_constraints[1]]);
    }

    #[test]
    fn soft_constraints_need_opt_in() {
        let mut soft = zone(1, "web");
        soft.when_unsatisfiable = WhenUnsatisfiable::ScheduleAnyway;
        let pods = vec![pod("a", vec![soft])];
        assert!(active_constraints(&pods, &[], false).is_empty());
        assert_eq!(active_constraints(&pods, &[], true).len(), 1);
    }

    fn zone_in(values: &[&str]) -> TopologySpreadConstraint {
        let sel = LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "app".into(),
                operator: "In".into(),
                values: values.iter().map(|v| v.to_string()).collect(),
            }],
            ..Default::default()
        };
        TopologySpreadConstraint::new("zone", 1, Some(sel))
    }

    #[test]
    fn equivalent_selectors_in_different_wire_forms_collapse() {
        let declared = vec![zone(1, "web")];
        let pods = vec![pod("a", vec![zone_in(&["web"])]), pod("b", vec![zone_in(&["web", "api"]), zone_in(&["api", "web"])])];
        let active = active_constraints(&pods, &declared, false);
        assert_eq!(active, vec![&declared[0], &pods[1].spread_constraints[0]]);
    }

    #[test]
    fn soft_copy_of_a_hard_constraint_is_evaluated_once() {
        let mut soft = zone(1, "web");
        soft.when_unsatisfiable = WhenUnsatisfiable::ScheduleAnyway;
        let pods = vec![pod("a", vec![zone(1, "web"), soft])];
        let active = active_constraints(&pods, &[], true);
        assert_eq!(active.len(), 1);
        assert!(active[0].is_hard());
    }

    #[test]
    fn broken_selectors_dedupe_by_wire_form() {
        let mut broken = zone_in(&["web"]);
        broken.label_selector.as_mut().expect("selector").match_expressions[0].operator = "Near".into();
        let mut other = broken.clone();
        other.label_selector.as_mut().expect("selector").match_expressions[0].values.push("api".into());
        let pods = vec![pod("a", vec![broken.clone()]), pod("b", vec![broken, other])];
        assert_eq!(active_constraints(&pods, &[], false).len(), 2);
    }
}

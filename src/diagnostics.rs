//! Diagnostic reports for scheduling conflicts.
//!
//! When plan compilation fails, these helpers name the exact component or
//! resource two systems clash over, tag the clash kind (`write write` or
//! `write read`), and summarize each offending system's full access policy.

use std::fmt::Write;

use crate::access::AccessPolicy;
use crate::component::{ComponentTypeId, ComponentTypeInfo};
use crate::resource::{ResourceTypeId, ResourceTypeInfo};

/// A component clash between two systems' policies
#[derive(Debug, Clone)]
pub struct ComponentConflict {
    pub component_id: ComponentTypeId,
    pub component_name: &'static str,
    /// "read" or "write" for each side
    pub system_a_access: &'static str,
    pub system_b_access: &'static str,
}

impl ComponentConflict {
    /// True when one side reads and the other writes
    pub fn is_read_write(&self) -> bool {
        self.system_a_access != self.system_b_access
    }
}

/// A resource clash between two systems' policies
#[derive(Debug, Clone)]
pub struct ResourceConflict {
    pub resource_id: ResourceTypeId,
    pub resource_name: &'static str,
    pub system_a_access: &'static str,
    pub system_b_access: &'static str,
}

impl ResourceConflict {
    pub fn is_read_write(&self) -> bool {
        self.system_a_access != self.system_b_access
    }
}

fn intersect_components(
    lhs: &[ComponentTypeInfo],
    rhs: &[ComponentTypeInfo],
) -> Vec<ComponentTypeInfo> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < lhs.len() && j < rhs.len() {
        match lhs[i].id.cmp(&rhs[j].id) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                result.push(lhs[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result
}

fn intersect_resources(
    lhs: &[ResourceTypeInfo],
    rhs: &[ResourceTypeInfo],
) -> Vec<ResourceTypeInfo> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < lhs.len() && j < rhs.len() {
        match lhs[i].id.cmp(&rhs[j].id) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                if !lhs[i].thread_safe {
                    result.push(lhs[i]);
                }
                i += 1;
                j += 1;
            }
        }
    }
    result
}

/// Finds every component clash between two policies, checking all query
/// pairs.
pub fn analyze_component_conflicts(
    policy_a: &AccessPolicy,
    policy_b: &AccessPolicy,
) -> Vec<ComponentConflict> {
    let mut conflicts = Vec::new();

    for query_a in policy_a.queries() {
        for query_b in policy_b.queries() {
            for info in intersect_components(&query_a.write_components, &query_b.write_components) {
                conflicts.push(ComponentConflict {
                    component_id: info.id,
                    component_name: info.name,
                    system_a_access: "write",
                    system_b_access: "write",
                });
            }
            for info in intersect_components(&query_a.write_components, &query_b.read_components) {
                conflicts.push(ComponentConflict {
                    component_id: info.id,
                    component_name: info.name,
                    system_a_access: "write",
                    system_b_access: "read",
                });
            }
            for info in intersect_components(&query_a.read_components, &query_b.write_components) {
                conflicts.push(ComponentConflict {
                    component_id: info.id,
                    component_name: info.name,
                    system_a_access: "read",
                    system_b_access: "write",
                });
            }
        }
    }

    conflicts
}

/// Finds every resource clash between two policies. Thread-safe resources
/// never appear in the result.
pub fn analyze_resource_conflicts(
    policy_a: &AccessPolicy,
    policy_b: &AccessPolicy,
) -> Vec<ResourceConflict> {
    let mut conflicts = Vec::new();

    for info in intersect_resources(policy_a.write_resources(), policy_b.write_resources()) {
        conflicts.push(ResourceConflict {
            resource_id: info.id,
            resource_name: info.name,
            system_a_access: "write",
            system_b_access: "write",
        });
    }
    for info in intersect_resources(policy_a.write_resources(), policy_b.read_resources()) {
        conflicts.push(ResourceConflict {
            resource_id: info.id,
            resource_name: info.name,
            system_a_access: "write",
            system_b_access: "read",
        });
    }
    for info in intersect_resources(policy_a.read_resources(), policy_b.write_resources()) {
        conflicts.push(ResourceConflict {
            resource_id: info.id,
            resource_name: info.name,
            system_a_access: "read",
            system_b_access: "write",
        });
    }

    conflicts
}

/// Formats component conflicts between two named systems.
///
/// Each line carries the component name and the clash tag, e.g.
/// `Position [write write]`.
pub fn format_component_conflicts(
    system_a_name: &str,
    system_b_name: &str,
    conflicts: &[ComponentConflict],
) -> String {
    if conflicts.is_empty() {
        return String::new();
    }

    let mut out = format!("Component conflicts between '{system_a_name}' and '{system_b_name}':\n");
    for conflict in conflicts {
        let _ = writeln!(
            out,
            "  - {} [{} {}]",
            conflict.component_name, conflict.system_a_access, conflict.system_b_access
        );
    }
    out
}

/// Formats resource conflicts between two named systems.
pub fn format_resource_conflicts(
    system_a_name: &str,
    system_b_name: &str,
    conflicts: &[ResourceConflict],
) -> String {
    if conflicts.is_empty() {
        return String::new();
    }

    let mut out = format!("Resource conflicts between '{system_a_name}' and '{system_b_name}':\n");
    for conflict in conflicts {
        let _ = writeln!(
            out,
            "  - {} [{} {}]",
            conflict.resource_name, conflict.system_a_access, conflict.system_b_access
        );
    }
    out
}

/// One-line-per-item summary of a system's full access policy
pub fn summarize_access_policy(policy: &AccessPolicy) -> String {
    let mut out = String::from("Access policy:\n");

    let queries = policy.queries();
    if !queries.is_empty() {
        for (index, query) in queries.iter().enumerate() {
            let _ = writeln!(out, "  Query {index}:");
            if !query.read_components.is_empty() {
                let names: Vec<&str> = query.read_components.iter().map(|c| c.name).collect();
                let _ = writeln!(out, "    Read: {}", names.join(", "));
            }
            if !query.write_components.is_empty() {
                let names: Vec<&str> = query.write_components.iter().map(|c| c.name).collect();
                let _ = writeln!(out, "    Write: {}", names.join(", "));
            }
        }
    }

    if !policy.read_resources().is_empty() {
        let names: Vec<&str> = policy.read_resources().iter().map(|r| r.name).collect();
        let _ = writeln!(out, "  Read resources: {}", names.join(", "));
    }
    if !policy.write_resources().is_empty() {
        let names: Vec<&str> = policy.write_resources().iter().map(|r| r.name).collect();
        let _ = writeln!(out, "  Write resources: {}", names.join(", "));
    }

    if policy.is_empty() {
        out.push_str("  (no data access declared)\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    #[derive(Debug, Clone, Copy)]
    struct Position {
        x: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Velocity {
        dx: f32,
    }

    #[derive(Default)]
    struct Score(u32);
    impl Resource for Score {}

    #[test]
    fn test_write_write_component_conflict_reported() {
        let a = AccessPolicy::new().query::<(&mut Position,)>();
        let b = AccessPolicy::new().query::<(&mut Position,)>();

        let conflicts = analyze_component_conflicts(&a, &b);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].component_name, "Position");
        assert!(!conflicts[0].is_read_write());

        let report = format_component_conflicts("A", "B", &conflicts);
        assert!(report.contains("Position"));
        assert!(report.contains("write write"));
        assert!(report.contains('A') && report.contains('B'));
    }

    #[test]
    fn test_write_read_tagged() {
        let writer = AccessPolicy::new().query::<(&mut Position,)>();
        let reader = AccessPolicy::new().query::<(&Position, &Velocity)>();

        let conflicts = analyze_component_conflicts(&writer, &reader);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].is_read_write());

        let report = format_component_conflicts("W", "R", &conflicts);
        assert!(report.contains("write read"));
    }

    #[test]
    fn test_resource_conflict_reported() {
        let a = AccessPolicy::new().write_resource::<Score>();
        let b = AccessPolicy::new().read_resource::<Score>();

        let conflicts = analyze_resource_conflicts(&a, &b);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resource_name, "Score");
    }

    #[test]
    fn test_policy_summary_lists_everything() {
        let policy = AccessPolicy::new()
            .query::<(&Position, &mut Velocity)>()
            .read_resource::<Score>();

        let summary = summarize_access_policy(&policy);
        assert!(summary.contains("Position"));
        assert!(summary.contains("Velocity"));
        assert!(summary.contains("Score"));
    }

    #[test]
    fn test_empty_policy_summary() {
        let summary = summarize_access_policy(&AccessPolicy::new());
        assert!(summary.contains("no data access declared"));
    }
}

//! Access policies: static declarations of every component and resource a
//! system touches.
//!
//! Policies are compared pairwise without executing the systems; all id lists
//! are kept sorted at build time so the diffs are O(n + m).

use crate::component::ComponentTypeInfo;
use crate::query::QueryData;
use crate::resource::{Resource, ResourceTypeInfo};

/// The component footprint of one query a system will run
#[derive(Debug, Clone, Default)]
pub struct QueryShape {
    /// Sorted by id
    pub read_components: Vec<ComponentTypeInfo>,
    /// Sorted by id
    pub write_components: Vec<ComponentTypeInfo>,
}

impl QueryShape {
    /// Derives a shape from a query tuple: `&T` reads, `&mut T` writes.
    pub fn of<Q: QueryData>() -> Self {
        let infos = Q::component_infos();
        let flags = Q::write_flags();

        let mut shape = QueryShape::default();
        for (info, writes) in infos.iter().zip(flags.iter()) {
            if *writes {
                shape.write_components.push(*info);
            } else {
                shape.read_components.push(*info);
            }
        }
        shape.read_components.sort();
        shape.write_components.sort();
        shape
    }
}

/// Declarative record of a system's data access, used for conflict analysis.
///
/// Built by chaining; repeated calls accumulate:
///
/// ```ignore
/// AccessPolicy::new()
///     .query::<(&mut Transform, &Velocity)>()
///     .read_resource::<Time>()
///     .write_resource::<Score>()
/// ```
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    queries: Vec<QueryShape>,
    read_resources: Vec<ResourceTypeInfo>,
    write_resources: Vec<ResourceTypeInfo>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a query shape the system will run
    pub fn query<Q: QueryData>(mut self) -> Self {
        self.queries.push(QueryShape::of::<Q>());
        self
    }

    /// Declares a resource the system reads
    pub fn read_resource<R: Resource>(mut self) -> Self {
        let info = ResourceTypeInfo::of::<R>();
        if let Err(pos) = self.read_resources.binary_search(&info) {
            self.read_resources.insert(pos, info);
        }
        self
    }

    /// Declares a resource the system writes
    pub fn write_resource<R: Resource>(mut self) -> Self {
        let info = ResourceTypeInfo::of::<R>();
        if let Err(pos) = self.write_resources.binary_search(&info) {
            self.write_resources.insert(pos, info);
        }
        self
    }

    pub fn queries(&self) -> &[QueryShape] {
        &self.queries
    }

    pub fn read_resources(&self) -> &[ResourceTypeInfo] {
        &self.read_resources
    }

    pub fn write_resources(&self) -> &[ResourceTypeInfo] {
        &self.write_resources
    }

    /// True if the policy declares nothing
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.read_resources.is_empty() && self.write_resources.is_empty()
    }

    /// True if running these two systems concurrently could race.
    ///
    /// Component rule: any query of one writes what any query of the other
    /// reads or writes. Resource rule: same, except resources marked
    /// thread-safe are outside conflict analysis entirely.
    pub fn conflicts_with(&self, other: &AccessPolicy) -> bool {
        for mine in &self.queries {
            for theirs in &other.queries {
                if sorted_intersects(&mine.write_components, &theirs.write_components)
                    || sorted_intersects(&mine.write_components, &theirs.read_components)
                    || sorted_intersects(&mine.read_components, &theirs.write_components)
                {
                    return true;
                }
            }
        }

        resource_intersects(&self.write_resources, &other.write_resources)
            || resource_intersects(&self.write_resources, &other.read_resources)
            || resource_intersects(&self.read_resources, &other.write_resources)
    }

    /// Whether this policy declares a read of the component (via any query)
    pub fn reads_component(&self, id: u64) -> bool {
        self.queries
            .iter()
            .any(|shape| shape.read_components.iter().any(|info| info.id == id))
    }

    /// Whether this policy declares a write of the component (via any query)
    pub fn writes_component(&self, id: u64) -> bool {
        self.queries
            .iter()
            .any(|shape| shape.write_components.iter().any(|info| info.id == id))
    }

    pub fn reads_resource(&self, id: u64) -> bool {
        self.read_resources.iter().any(|info| info.id == id)
    }

    pub fn writes_resource(&self, id: u64) -> bool {
        self.write_resources.iter().any(|info| info.id == id)
    }
}

fn sorted_intersects(lhs: &[ComponentTypeInfo], rhs: &[ComponentTypeInfo]) -> bool {
    let mut left = lhs.iter();
    let mut right = rhs.iter();
    let (mut a, mut b) = (left.next(), right.next());
    while let (Some(x), Some(y)) = (a, b) {
        match x.id.cmp(&y.id) {
            std::cmp::Ordering::Less => a = left.next(),
            std::cmp::Ordering::Greater => b = right.next(),
            std::cmp::Ordering::Equal => return true,
        }
    }
    false
}

fn resource_intersects(lhs: &[ResourceTypeInfo], rhs: &[ResourceTypeInfo]) -> bool {
    let mut left = lhs.iter().filter(|info| !info.thread_safe);
    let mut right = rhs.iter().filter(|info| !info.thread_safe);
    let (mut a, mut b) = (left.next(), right.next());
    while let (Some(x), Some(y)) = (a, b) {
        match x.id.cmp(&y.id) {
            std::cmp::Ordering::Less => a = left.next(),
            std::cmp::Ordering::Greater => b = right.next(),
            std::cmp::Ordering::Equal => return true,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[derive(Default)]
    struct Telemetry;
    impl Resource for Telemetry {
        const THREAD_SAFE: bool = true;
    }

    #[test]
    fn test_query_shape_splits_reads_and_writes() {
        let shape = QueryShape::of::<(&Position, &mut Velocity)>();
        assert_eq!(shape.read_components.len(), 1);
        assert_eq!(shape.write_components.len(), 1);
        assert_eq!(shape.read_components[0].name, "Position");
        assert_eq!(shape.write_components[0].name, "Velocity");
    }

    #[test]
    fn test_write_write_conflicts() {
        let a = AccessPolicy::new().query::<(&mut Position,)>();
        let b = AccessPolicy::new().query::<(&mut Position,)>();
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn test_read_read_no_conflict() {
        let a = AccessPolicy::new().query::<(&Position,)>();
        let b = AccessPolicy::new().query::<(&Position,)>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn test_write_read_conflicts_both_directions() {
        let writer = AccessPolicy::new().query::<(&mut Position,)>();
        let reader = AccessPolicy::new().query::<(&Position,)>();
        assert!(writer.conflicts_with(&reader));
        assert!(reader.conflicts_with(&writer));
    }

    #[test]
    fn test_disjoint_components_no_conflict() {
        let a = AccessPolicy::new().query::<(&mut Position,)>();
        let b = AccessPolicy::new().query::<(&mut Velocity,)>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn test_resource_conflicts() {
        let a = AccessPolicy::new().write_resource::<Score>();
        let b = AccessPolicy::new().read_resource::<Score>();
        assert!(a.conflicts_with(&b));

        let c = AccessPolicy::new().read_resource::<Score>();
        assert!(!b.conflicts_with(&c));
    }

    #[test]
    fn test_thread_safe_resource_outside_conflict_graph() {
        let a = AccessPolicy::new().write_resource::<Telemetry>();
        let b = AccessPolicy::new().write_resource::<Telemetry>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn test_accumulating_builder() {
        let policy = AccessPolicy::new()
            .query::<(&Position,)>()
            .query::<(&mut Velocity,)>()
            .read_resource::<Score>()
            .read_resource::<Score>();
        assert_eq!(policy.queries().len(), 2);
        // Duplicate resource declarations collapse
        assert_eq!(policy.read_resources().len(), 1);
    }
}

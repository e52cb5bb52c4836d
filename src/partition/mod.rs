//! Registry partitioning
//!
//! The registry is split into a fixed number of contiguous, read-only range
//! views. Each view becomes one deployment unit.

use log::debug;

use crate::config::{FunctionDescriptor, FunctionRegistry};
use crate::config_error;
use crate::core::error::{SynthError, SynthResult};

/// Read-only `[begin, end)` window over a registry
#[derive(Clone, Copy, Debug)]
pub struct RegistryView<'a> {
    registry: &'a FunctionRegistry,
    begin: usize,
    end: usize,
}

impl<'a> RegistryView<'a> {
    pub fn new(registry: &'a FunctionRegistry) -> Self {
        Self {
            registry,
            begin: 0,
            end: registry.len(),
        }
    }

    /// Narrows the view to `[begin, end)` relative to itself. Bounds past the
    /// end are clamped, so a window beyond the registry is empty.
    pub fn retain_range(self, begin: usize, end: usize) -> SynthResult<Self> {
        if begin > end {
            return Err(SynthError::Range { begin, end });
        }
        let len = self.len();
        let end = end.min(len);
        let begin = begin.min(end);
        Ok(Self {
            registry: self.registry,
            begin: self.begin + begin,
            end: self.begin + end,
        })
    }

    pub fn descriptors(&self) -> &'a [FunctionDescriptor] {
        &self.registry.list()[self.begin..self.end]
    }

    /// Position of the first descriptor in the full registry
    pub fn offset(&self) -> usize {
        self.begin
    }

    pub fn registry(&self) -> &'a FunctionRegistry {
        self.registry
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

#[derive(Clone, Debug)]
pub struct Partition<'a> {
    pub index: usize,
    pub unit_name: String,
    pub view: RegistryView<'a>,
}

impl Partition<'_> {
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }
}

pub fn unit_name(prefix: &str, index: usize) -> String {
    format!("{prefix}-Functions-{index}")
}

#[derive(Clone, Copy, Debug)]
pub struct Partitioner {
    num_partitions: usize,
    capacity_hint: Option<usize>,
}

impl Partitioner {
    pub fn new(num_partitions: usize) -> SynthResult<Self> {
        if num_partitions == 0 {
            return Err(config_error!("Number of partitions must be at least 1"));
        }
        Ok(Self {
            num_partitions,
            capacity_hint: None,
        })
    }

    /// Size chunks for at least `hint` functions, so that appending a
    /// function does not move existing ones between units.
    pub fn with_capacity_hint(mut self, hint: Option<usize>) -> Self {
        self.capacity_hint = hint;
        self
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn chunk_size(&self, total: usize) -> usize {
        let capacity = total.max(self.capacity_hint.unwrap_or(0));
        capacity.div_ceil(self.num_partitions)
    }

    /// Always yields exactly `num_partitions` partitions; trailing ones may be
    /// empty.
    pub fn partition<'a>(
        &self,
        registry: &'a FunctionRegistry,
        prefix: &str,
    ) -> SynthResult<Vec<Partition<'a>>> {
        let full = RegistryView::new(registry);
        let chunk = self.chunk_size(registry.len());
        debug!(
            "Partitioning {} functions into {} units of up to {}",
            registry.len(),
            self.num_partitions,
            chunk
        );

        let mut partitions = Vec::with_capacity(self.num_partitions);
        let mut cursor = 0;
        for index in 0..self.num_partitions {
            let view = full.retain_range(cursor, cursor + chunk)?;
            debug!(
                "Unit {}: functions [{}, {})",
                index,
                view.offset(),
                view.offset() + view.len()
            );
            partitions.push(Partition {
                index,
                unit_name: unit_name(prefix, index),
                view,
            });
            cursor += chunk;
        }
        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn registry(n: usize) -> FunctionRegistry {
        let functions = (0..n)
            .map(|i| FunctionDescriptor::new(None, Some(&format!("h{i}"))))
            .collect();
        FunctionRegistry::from_parts(BTreeMap::new(), functions)
    }

    #[test]
    fn test_seven_into_three() {
        let registry = registry(7);
        let partitions = Partitioner::new(3)
            .unwrap()
            .partition(&registry, "app-backend-dev")
            .unwrap();

        let sizes: Vec<_> = partitions.iter().map(|p| p.view.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(partitions[2].unit_name, "app-backend-dev-Functions-2");
    }

    #[test]
    fn test_concatenation_reproduces_registry() {
        let registry = registry(10);
        let partitions = Partitioner::new(4)
            .unwrap()
            .partition(&registry, "p")
            .unwrap();

        assert_eq!(partitions.len(), 4);
        let joined: Vec<_> = partitions
            .iter()
            .flat_map(|p| p.view.descriptors().iter().cloned())
            .collect();
        assert_eq!(joined.as_slice(), registry.list());
    }

    #[test]
    fn test_empty_final_slot() {
        // ceil(4/3) = 2 leaves nothing for the last unit
        let registry = registry(4);
        let partitions = Partitioner::new(3)
            .unwrap()
            .partition(&registry, "p")
            .unwrap();

        assert_eq!(partitions.len(), 3);
        assert!(partitions[2].is_empty());
        assert_eq!(partitions[2].view.descriptors().len(), 0);
    }

    #[test]
    fn test_capacity_hint_keeps_assignment() {
        let partitioner = Partitioner::new(4).unwrap().with_capacity_hint(Some(55));
        assert_eq!(partitioner.chunk_size(10), 14);

        let before = registry(20);
        let after = registry(21);
        let p_before = partitioner.partition(&before, "p").unwrap();
        let p_after = partitioner.partition(&after, "p").unwrap();
        assert_eq!(p_before[0].view.len(), p_after[0].view.len());
        assert_eq!(p_after[1].view.len(), 7);
    }

    #[test]
    fn test_retain_range_rejects_inverted_bounds() {
        let registry = registry(7);
        let err = RegistryView::new(&registry).retain_range(5, 2).unwrap_err();
        assert!(matches!(err, SynthError::Range { begin: 5, end: 2 }));
    }

    #[test]
    fn test_retain_range_clamps_end() {
        let registry = registry(3);
        let view = RegistryView::new(&registry).retain_range(2, 10).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view.offset(), 2);

        let past = RegistryView::new(&registry).retain_range(5, 8).unwrap();
        assert!(past.is_empty());
    }

    #[test]
    fn test_zero_partitions_is_config_error() {
        assert!(matches!(
            Partitioner::new(0),
            Err(SynthError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_registry() {
        let registry = registry(0);
        let partitions = Partitioner::new(4)
            .unwrap()
            .partition(&registry, "p")
            .unwrap();
        assert_eq!(partitions.len(), 4);
        assert!(partitions.iter().all(Partition::is_empty));
    }
}

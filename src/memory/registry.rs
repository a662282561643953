//! Live-allocation registry
//!
//! Keyed by pointer value. Each record carries the allocation size and the
//! call stack captured at the allocating shim. The running totals satisfy
//! `sum(live sizes) == total_allocated - total_freed` at every release of
//! the registry lock.

use crate::output;
use crate::symbolize::FrameResolver;
use console::Style;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;

/// One live heap allocation.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
    pub size: usize,
    /// Raw frame addresses captured at the allocation site.
    pub stack: Vec<usize>,
}

/// Registry of live allocations plus running totals.
#[derive(Default)]
pub struct MemoryRegistry {
    allocations: HashMap<usize, AllocationRecord>,
    total_allocated: usize,
    total_freed: usize,
}

lazy_static! {
    /// Process-global instance fed by the allocation shims.
    pub static ref MEMORY_REGISTRY: Mutex<MemoryRegistry> =
        Mutex::new(MemoryRegistry::default());
}

impl MemoryRegistry {
    /// Record a fresh allocation returned by a tracked allocator.
    pub fn record_allocation(&mut self, ptr: usize, size: usize, stack: Vec<usize>) {
        if ptr == 0 {
            return;
        }
        self.allocations.insert(ptr, AllocationRecord { size, stack });
        self.total_allocated += size;
    }

    /// Erase the record for a freed pointer. Unknown pointers are ignored;
    /// the allocation may predate instrumentation.
    pub fn record_deallocation(&mut self, ptr: usize) {
        if ptr == 0 {
            return;
        }
        if let Some(record) = self.allocations.remove(&ptr) {
            self.total_freed += record.size;
        }
    }

    /// In-place `realloc`: adjust the record's size and refresh its stack.
    pub fn update_allocation(&mut self, ptr: usize, new_size: usize, stack: Vec<usize>) {
        if ptr == 0 {
            return;
        }
        if let Some(record) = self.allocations.get_mut(&ptr) {
            self.total_allocated = self.total_allocated - record.size + new_size;
            record.size = new_size;
            record.stack = stack;
        }
    }

    #[must_use]
    pub fn active_allocations(&self) -> usize {
        self.allocations.len()
    }

    #[must_use]
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    #[must_use]
    pub fn total_freed(&self) -> usize {
        self.total_freed
    }

    #[must_use]
    pub fn has_leaks(&self) -> bool {
        !self.allocations.is_empty()
    }

    /// Size of the live allocation at `ptr`, if one is tracked.
    #[must_use]
    pub fn allocation_size(&self, ptr: usize) -> Option<usize> {
        self.allocations.get(&ptr).map(|record| record.size)
    }

    /// Render totals and per-leak detail through the output sink.
    pub fn report(&self, resolver: &mut FrameResolver) {
        let green = Style::new().green();
        let bold_red = Style::new().red().bold();
        let bold_yellow = Style::new().yellow().bold();
        let bold_cyan = Style::new().cyan().bold();

        output::print_line("");
        output::print_line("=== Memory Tracker Status ===");
        output::print_line(&format!("Total allocated: {} bytes", self.total_allocated));
        output::print_line(&format!("Total freed: {} bytes", self.total_freed));
        output::print_line(&format!("Active allocations: {}", self.allocations.len()));

        let leak_style = if self.allocations.is_empty() { &green } else { &bold_red };
        let leak_count = self.allocations.len().to_string();
        output::print_parts(&[
            (None, "Potential leaks: "),
            (Some(leak_style), leak_count.as_str()),
        ]);

        if !self.allocations.is_empty() {
            output::print_line("");
            output::print_styled(&bold_yellow, "Detailed leak information:");

            for (&ptr, record) in &self.allocations {
                output::print_line("");
                output::print_styled(
                    &bold_red,
                    &format!("Leak at 0x{ptr:x} (size: {} bytes)", record.size),
                );
                output::print_line("Callstack:");
                for (index, frame) in resolver.resolve_stack(&record.stack).iter().enumerate() {
                    let text = format!("  {}", frame.format(index));
                    if index == 0 {
                        output::print_styled(&bold_cyan, &text);
                    } else {
                        output::print_line(&text);
                    }
                }
            }
        }

        output::print_line("");
        output::print_line("===========================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> Vec<usize> {
        vec![0x1000, 0x2000]
    }

    #[test]
    fn test_allocation_then_free_balances() {
        let mut registry = MemoryRegistry::default();
        registry.record_allocation(0xdead, 512, stack());
        assert_eq!(registry.active_allocations(), 1);
        assert_eq!(registry.total_allocated(), 512);

        registry.record_deallocation(0xdead);
        assert_eq!(registry.active_allocations(), 0);
        assert_eq!(registry.total_freed(), 512);
        assert!(!registry.has_leaks());
    }

    #[test]
    fn test_totals_match_live_sum() {
        let mut registry = MemoryRegistry::default();
        registry.record_allocation(0x1, 100, stack());
        registry.record_allocation(0x2, 200, stack());
        registry.record_deallocation(0x1);

        let live: usize = 200;
        assert_eq!(live, registry.total_allocated() - registry.total_freed());
    }

    #[test]
    fn test_unknown_free_ignored() {
        let mut registry = MemoryRegistry::default();
        registry.record_deallocation(0xbeef);
        registry.record_deallocation(0);
        assert_eq!(registry.total_freed(), 0);
    }

    #[test]
    fn test_null_allocation_ignored() {
        let mut registry = MemoryRegistry::default();
        registry.record_allocation(0, 64, stack());
        assert_eq!(registry.active_allocations(), 0);
        assert_eq!(registry.total_allocated(), 0);
    }

    #[test]
    fn test_in_place_realloc_adjusts_totals() {
        let mut registry = MemoryRegistry::default();
        registry.record_allocation(0x10, 64, stack());
        registry.update_allocation(0x10, 1 << 20, vec![0x3000]);

        assert_eq!(registry.active_allocations(), 1);
        assert_eq!(registry.total_allocated(), 1 << 20);
        let record = registry.allocations.get(&0x10).unwrap();
        assert_eq!(record.size, 1 << 20);
        assert_eq!(record.stack, vec![0x3000]);
    }

    #[test]
    fn test_shrinking_realloc() {
        let mut registry = MemoryRegistry::default();
        registry.record_allocation(0x10, 4096, stack());
        registry.update_allocation(0x10, 128, stack());
        assert_eq!(registry.total_allocated(), 128);
    }

    #[test]
    fn test_moved_realloc_rekeys() {
        let mut registry = MemoryRegistry::default();
        registry.record_allocation(0x10, 64, stack());

        // The moved case is erase-old + insert-new, as the shims do it.
        registry.record_deallocation(0x10);
        registry.record_allocation(0x20, 1 << 20, stack());

        assert_eq!(registry.active_allocations(), 1);
        assert!(registry.allocations.contains_key(&0x20));
        assert!(!registry.allocations.contains_key(&0x10));
        assert_eq!(registry.total_allocated() - registry.total_freed(), 1 << 20);
    }

    #[test]
    fn test_update_unknown_pointer_ignored() {
        let mut registry = MemoryRegistry::default();
        registry.update_allocation(0x99, 256, stack());
        assert_eq!(registry.total_allocated(), 0);
        assert_eq!(registry.active_allocations(), 0);
    }
}

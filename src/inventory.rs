//! Companion inventory.
//!
//! A fixed grid of slots plus a selected (main-hand) slot. The inventory is
//! opaque to the lifecycle code; it only travels inside the spawn broadcast
//! so observers can render held items.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Number of slots in a companion inventory
pub const SLOT_COUNT: usize = 36;

/// Largest count a single slot can hold
pub const MAX_STACK: u8 = 64;

/// A stack of identical items in one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub count: u8,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, count: u8) -> Self {
        Self {
            item: item.into(),
            count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 || self.item.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    slots: Vec<Option<ItemStack>>,
    selected_slot: usize,
}

impl Inventory {
    pub fn new() -> Self {
        Self {
            slots: vec![None; SLOT_COUNT],
            selected_slot: 0,
        }
    }

    /// Insert a stack, merging into matching slots before using empty ones.
    ///
    /// Returns whatever did not fit (`None` when everything was stored).
    pub fn insert(&mut self, stack: ItemStack) -> Option<ItemStack> {
        if stack.is_empty() {
            return None;
        }

        let mut remaining = stack.count;

        for slot in self.slots.iter_mut().flatten() {
            if slot.item == stack.item && slot.count < MAX_STACK {
                let added = remaining.min(MAX_STACK - slot.count);
                slot.count += added;
                remaining -= added;
                if remaining == 0 {
                    return None;
                }
            }
        }

        for slot in self.slots.iter_mut().filter(|s| s.is_none()) {
            let added = remaining.min(MAX_STACK);
            *slot = Some(ItemStack::new(stack.item.clone(), added));
            remaining -= added;
            if remaining == 0 {
                return None;
            }
        }

        debug!(item = %stack.item, leftover = remaining, "Inventory full");
        Some(ItemStack::new(stack.item, remaining))
    }

    pub fn get(&self, slot: usize) -> Option<&ItemStack> {
        match self.slots.get(slot) {
            Some(stack) => stack.as_ref(),
            None => {
                warn!(slot = slot, "Invalid inventory slot");
                None
            }
        }
    }

    /// Replace the contents of a slot; out-of-range slots are ignored.
    pub fn set(&mut self, slot: usize, stack: Option<ItemStack>) {
        match self.slots.get_mut(slot) {
            Some(existing) => *existing = stack.filter(|s| !s.is_empty()),
            None => warn!(slot = slot, "Invalid inventory slot"),
        }
    }

    pub fn selected_slot(&self) -> usize {
        self.selected_slot
    }

    pub fn select(&mut self, slot: usize) {
        if slot < SLOT_COUNT {
            self.selected_slot = slot;
        }
    }

    /// Stack in the main hand
    pub fn selected(&self) -> Option<&ItemStack> {
        self.get(self.selected_slot)
    }

    pub fn clear(&mut self) {
        self.slots = vec![None; SLOT_COUNT];
        self.selected_slot = 0;
    }

    /// Total count of `item` across all slots.
    pub fn count_of(&self, item: &str) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|s| s.item == item)
            .map(|s| u32::from(s.count))
            .sum()
    }

    /// Occupied slots as `(index, stack)` pairs, in slot order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &ItemStack)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_merges_before_filling_empty_slots() {
        let mut inv = Inventory::new();
        inv.set(5, Some(ItemStack::new("cobblestone", 60)));

        let leftover = inv.insert(ItemStack::new("cobblestone", 10));

        assert!(leftover.is_none());
        assert_eq!(inv.get(5).unwrap().count, 64);
        assert_eq!(inv.get(0).unwrap(), &ItemStack::new("cobblestone", 6));
        assert_eq!(inv.count_of("cobblestone"), 70);
    }

    #[test]
    fn test_insert_into_full_inventory_returns_leftover() {
        let mut inv = Inventory::new();
        for slot in 0..SLOT_COUNT {
            inv.set(slot, Some(ItemStack::new("dirt", MAX_STACK)));
        }

        let leftover = inv.insert(ItemStack::new("torch", 3));

        assert_eq!(leftover, Some(ItemStack::new("torch", 3)));
        assert_eq!(inv.count_of("torch"), 0);
    }

    #[test]
    fn test_out_of_range_slots_are_ignored() {
        let mut inv = Inventory::new();
        inv.set(SLOT_COUNT, Some(ItemStack::new("apple", 1)));
        inv.select(SLOT_COUNT + 3);

        assert!(inv.get(SLOT_COUNT).is_none());
        assert_eq!(inv.selected_slot(), 0);
        assert_eq!(inv.occupied().count(), 0);
    }

    #[test]
    fn test_selected_and_clear() {
        let mut inv = Inventory::new();
        inv.set(2, Some(ItemStack::new("iron_pickaxe", 1)));
        inv.select(2);

        assert_eq!(inv.selected().unwrap().item, "iron_pickaxe");

        inv.clear();
        assert!(inv.selected().is_none());
        assert_eq!(inv.selected_slot(), 0);
    }
}

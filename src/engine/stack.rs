//! The evaluation stack arena of one interpreter.
//!
//! A fixed number of [`StackSlot`]s is split between two regions growing towards each other:
//!
//! ```text
//! 0                      esp                 vt_ptr                 capacity
//! | args | locals | eval |  ....free.....     | value-type blocks ... |
//! ```
//!
//! Addresses are plain indices and every access is bounds checked. Objects referenced from
//! slots live in a parallel managed table; an entry is reclaimed when the slot owning it is
//! released while it is the last entry of the table, and wholesale when a frame unwinds.
//!
//! Inline value-type blocks are allocated downwards from `vt_ptr`. Blocks of a frame's
//! declared locals sit at or above the frame's `vt_base` and are reclaimed together when the
//! frame unwinds; temporaries below `vt_base` are released individually as soon as the slot
//! pointing at them is popped, provided no later block was allocated after them.

use crate::{
    engine::{StackSlot, Value},
    metadata::typesystem::TypeIndex,
    Error, Result,
};

/// A saved stack position, see [`RuntimeStack::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMark {
    esp: usize,
    vt_ptr: usize,
    vt_base: usize,
    managed_len: usize,
    managed_floor: usize,
}

impl StackMark {
    /// Evaluation stack pointer at the time of the mark
    #[must_use]
    pub fn esp(&self) -> usize {
        self.esp
    }
}

/// Reclamation bounds of the running frame, see [`RuntimeStack::enter_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBounds {
    vt_base: usize,
    managed_floor: usize,
}

/// Evaluation stack plus managed-object table.
pub struct RuntimeStack {
    slots: Vec<StackSlot>,
    esp: usize,
    vt_ptr: usize,
    vt_base: usize,
    managed_floor: usize,
    managed: Vec<Value>,
}

impl RuntimeStack {
    /// A stack of `capacity` slots
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        RuntimeStack {
            slots: vec![StackSlot::Null; capacity],
            esp: 0,
            vt_ptr: capacity,
            vt_base: capacity,
            managed_floor: 0,
            managed: Vec::new(),
        }
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Address of the next free evaluation slot
    #[must_use]
    pub fn esp(&self) -> usize {
        self.esp
    }

    /// Lowest address used by value-type blocks
    #[must_use]
    pub fn vt_ptr(&self) -> usize {
        self.vt_ptr
    }

    /// Number of live managed entries
    #[must_use]
    pub fn managed_len(&self) -> usize {
        self.managed.len()
    }

    /// Saves the current position
    #[must_use]
    pub fn mark(&self) -> StackMark {
        StackMark {
            esp: self.esp,
            vt_ptr: self.vt_ptr,
            vt_base: self.vt_base,
            managed_len: self.managed.len(),
            managed_floor: self.managed_floor,
        }
    }

    /// Discards everything allocated since `mark`
    pub fn reset(&mut self, mark: &StackMark) {
        self.esp = mark.esp.min(self.esp);
        self.vt_ptr = mark.vt_ptr.max(self.vt_ptr).min(self.slots.len());
        self.vt_base = mark.vt_base;
        self.managed.truncate(mark.managed_len);
        self.managed_floor = mark.managed_floor;
    }

    /// Empties the stack and the managed table
    pub fn clear(&mut self) {
        self.esp = 0;
        self.vt_ptr = self.slots.len();
        self.vt_base = self.slots.len();
        self.managed_floor = 0;
        self.managed.clear();
    }

    /// Starts a frame: value-type blocks allocated from here on are temporaries until
    /// [`RuntimeStack::seal_locals`], and managed entries created before now are never popped
    pub fn enter_frame(&mut self) -> FrameBounds {
        let saved = FrameBounds {
            vt_base: self.vt_base,
            managed_floor: self.managed_floor,
        };
        self.managed_floor = self.managed.len();
        saved
    }

    /// Marks every block and managed entry allocated so far as frame-owned local storage
    pub fn seal_locals(&mut self) {
        self.vt_base = self.vt_ptr;
        self.managed_floor = self.managed.len();
    }

    /// Restores the bounds of the calling frame
    pub fn leave_frame(&mut self, saved: FrameBounds) {
        self.vt_base = saved.vt_base;
        self.managed_floor = saved.managed_floor;
    }

    fn out_of_range(addr: usize) -> Error {
        Error::InvalidStackState(format!("address {} outside of the stack", addr))
    }

    /// Slot at `addr`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for addresses outside the stack.
    pub fn get(&self, addr: usize) -> Result<StackSlot> {
        self.slots.get(addr).copied().ok_or_else(|| Self::out_of_range(addr))
    }

    /// Overwrites the slot at `addr` without releasing its previous content
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for addresses outside the stack.
    pub fn set(&mut self, addr: usize, slot: StackSlot) -> Result<()> {
        let cell = self.slots.get_mut(addr).ok_or_else(|| Self::out_of_range(addr))?;
        *cell = slot;
        Ok(())
    }

    /// Pushes a slot
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] when the evaluation region meets the value-type region.
    pub fn push(&mut self, slot: StackSlot) -> Result<()> {
        if self.esp >= self.vt_ptr {
            return Err(Error::StackOverflow);
        }
        self.slots[self.esp] = slot;
        self.esp += 1;
        Ok(())
    }

    /// Address of the top slot
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] on an empty stack.
    pub fn top_addr(&self) -> Result<usize> {
        self.esp
            .checked_sub(1)
            .ok_or_else(|| Error::InvalidStackState("evaluation stack is empty".to_string()))
    }

    /// The top slot
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] on an empty stack.
    pub fn top(&self) -> Result<StackSlot> {
        self.get(self.top_addr()?)
    }

    /// The slot `depth` positions below the top, `0` being the top
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if the stack holds fewer slots.
    pub fn peek(&self, depth: usize) -> Result<StackSlot> {
        let addr = self
            .esp
            .checked_sub(depth + 1)
            .ok_or_else(|| Error::InvalidStackState("evaluation stack underflow".to_string()))?;
        self.get(addr)
    }

    /// Pops the top slot and releases what it owns
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] on an empty stack.
    pub fn pop(&mut self) -> Result<()> {
        let addr = self.top_addr()?;
        let slot = self.slots[addr];
        self.esp = addr;
        self.release(slot)
    }

    /// Pops slots until `esp` equals `addr`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if `addr` lies above the stack pointer.
    pub fn pop_to(&mut self, addr: usize) -> Result<()> {
        if addr > self.esp {
            return Err(Error::InvalidStackState(format!(
                "cannot pop to {} above esp {}",
                addr, self.esp
            )));
        }
        while self.esp > addr {
            self.pop()?;
        }
        Ok(())
    }

    /// Inserts a slot at `at`, moving the slots above it up by one
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full and [`Error::InvalidStackState`]
    /// if `at` lies above the stack pointer.
    pub fn insert(&mut self, at: usize, slot: StackSlot) -> Result<()> {
        if at > self.esp {
            return Err(Self::out_of_range(at));
        }
        self.push(StackSlot::Null)?;
        self.slots.copy_within(at..self.esp - 1, at + 1);
        self.slots[at] = slot;
        Ok(())
    }

    /// Releases what `slot` owns: its managed entry if that is the last one, and the block it
    /// points at if that is the latest temporary
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for malformed blocks.
    pub fn release(&mut self, slot: StackSlot) -> Result<()> {
        if let Some(index) = slot.managed_index() {
            self.release_managed(index);
        }
        if let StackSlot::ValueType(d) = slot {
            self.free_block(d as usize)?;
        }
        Ok(())
    }

    fn release_managed(&mut self, index: u32) {
        let index = index as usize;
        if index + 1 == self.managed.len() && index >= self.managed_floor {
            self.managed.pop();
        }
    }

    /// Appends a managed entry and returns its index
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the table outgrows 32-bit indices.
    pub fn push_managed(&mut self, value: Value) -> Result<u32> {
        let index = u32::try_from(self.managed.len()).map_err(|_| Error::StackOverflow)?;
        self.managed.push(value);
        Ok(index)
    }

    /// Pushes `value` as an object slot with a fresh managed entry; null pushes a null slot
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the stack is full.
    pub fn push_object(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            return self.push(StackSlot::Null);
        }
        let index = self.push_managed(value)?;
        self.push(StackSlot::Object(index))
    }

    /// Managed entry at `index`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for unknown indices.
    pub fn managed(&self, index: u32) -> Result<&Value> {
        self.managed
            .get(index as usize)
            .ok_or_else(|| Error::InvalidStackState(format!("managed index {} is not live", index)))
    }

    /// Replaces the managed entry at `index`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] for unknown indices.
    pub fn set_managed(&mut self, index: u32, value: Value) -> Result<()> {
        let entry = self
            .managed
            .get_mut(index as usize)
            .ok_or_else(|| Error::InvalidStackState(format!("managed index {} is not live", index)))?;
        *entry = value;
        Ok(())
    }

    /// Allocates a block of `field_count` null fields below the value-type region and returns
    /// the address of its descriptor
    ///
    /// # Errors
    /// Returns [`Error::StackOverflow`] if the block would reach the evaluation region.
    pub fn alloc_block(&mut self, type_index: TypeIndex, field_count: usize) -> Result<usize> {
        if self.vt_ptr < self.esp + field_count + 1 {
            return Err(Error::StackOverflow);
        }
        let count = u32::try_from(field_count).map_err(|_| Error::StackOverflow)?;
        let d = self.vt_ptr - 1;
        self.slots[d] = StackSlot::ValueTypeDescriptor {
            type_index,
            field_count: count,
        };
        for field in &mut self.slots[d - field_count..d] {
            *field = StackSlot::Null;
        }
        self.vt_ptr = d - field_count;
        Ok(d)
    }

    /// Type index and field count of the block at `d`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if `d` holds no descriptor.
    pub fn block_header(&self, d: usize) -> Result<(TypeIndex, usize)> {
        match self.get(d)? {
            StackSlot::ValueTypeDescriptor {
                type_index,
                field_count,
            } => Ok((type_index, field_count as usize)),
            other => Err(Error::InvalidStackState(format!(
                "expected value type descriptor at {}, found {}",
                d,
                other.kind()
            ))),
        }
    }

    /// Address of field `index` of the block at `d`
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if the block has fewer fields.
    pub fn field_addr(&self, d: usize, index: usize) -> Result<usize> {
        let (_, count) = self.block_header(d)?;
        if index >= count {
            return Err(Error::InvalidStackState(format!(
                "field {} of a block with {} fields",
                index, count
            )));
        }
        Ok(d - 1 - index)
    }

    /// Lowest address occupied by the block at `d` and its nested blocks
    fn block_low(&self, d: usize) -> Result<usize> {
        let (_, count) = self.block_header(d)?;
        let mut low = d - count;
        for addr in d - count..d {
            if let StackSlot::ValueType(nested) = self.slots[addr] {
                let nested = nested as usize;
                if nested < d {
                    low = low.min(self.block_low(nested)?);
                }
            }
        }
        Ok(low)
    }

    /// Frees the temporary block at `d` if it is the latest allocation; blocks of declared
    /// locals are left to the frame
    ///
    /// # Errors
    /// Returns [`Error::InvalidStackState`] if `d` holds no descriptor.
    pub fn free_block(&mut self, d: usize) -> Result<()> {
        if d >= self.vt_base {
            return Ok(());
        }
        let low = self.block_low(d)?;
        if low != self.vt_ptr {
            return Ok(());
        }
        for addr in low..d {
            if let Some(index) = self.slots[addr].managed_index() {
                self.release_managed(index);
            }
        }
        self.vt_ptr = d + 1;
        Ok(())
    }
}

impl std::fmt::Debug for RuntimeStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeStack")
            .field("capacity", &self.slots.len())
            .field("esp", &self.esp)
            .field("vt_ptr", &self.vt_ptr)
            .field("managed", &self.managed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_entries_are_reclaimed_from_the_end() {
        let mut stack = RuntimeStack::new(16);
        stack.push_object(Value::from("a")).unwrap();
        stack.push_object(Value::from("b")).unwrap();
        assert_eq!(stack.managed_len(), 2);

        stack.pop().unwrap();
        assert_eq!(stack.managed_len(), 1);
        stack.pop().unwrap();
        assert_eq!(stack.managed_len(), 0);

        stack.push_object(Value::Null).unwrap();
        assert_eq!(stack.top().unwrap(), StackSlot::Null);
        assert_eq!(stack.managed_len(), 0);
    }

    #[test]
    fn frame_floor_protects_outer_entries() {
        let mut stack = RuntimeStack::new(16);
        stack.push_object(Value::from("outer")).unwrap();
        let saved = stack.enter_frame();
        let outer = stack.top().unwrap();
        stack.release(outer).unwrap();
        assert_eq!(stack.managed_len(), 1);
        stack.leave_frame(saved);
        stack.pop().unwrap();
        assert_eq!(stack.managed_len(), 0);
    }

    #[test]
    fn blocks_grow_down_and_free_latest_only() {
        let mut stack = RuntimeStack::new(16);
        let a = stack.alloc_block(1, 2).unwrap();
        assert_eq!(a, 15);
        assert_eq!(stack.vt_ptr(), 13);
        assert_eq!(stack.field_addr(a, 0).unwrap(), 14);
        assert_eq!(stack.field_addr(a, 1).unwrap(), 13);
        assert!(stack.field_addr(a, 2).is_err());

        let b = stack.alloc_block(2, 1).unwrap();
        assert_eq!(b, 12);

        stack.free_block(a).unwrap();
        assert_eq!(stack.vt_ptr(), 11);
        stack.free_block(b).unwrap();
        assert_eq!(stack.vt_ptr(), 13);
        stack.free_block(a).unwrap();
        assert_eq!(stack.vt_ptr(), 16);
    }

    #[test]
    fn sealed_locals_are_not_freed() {
        let mut stack = RuntimeStack::new(16);
        let saved = stack.enter_frame();
        let local = stack.alloc_block(1, 1).unwrap();
        stack.seal_locals();
        let temp = stack.alloc_block(1, 1).unwrap();

        stack.free_block(temp).unwrap();
        stack.free_block(local).unwrap();
        assert_eq!(stack.vt_ptr(), 14);
        stack.leave_frame(saved);
    }

    #[test]
    fn regions_collide_into_overflow() {
        let mut stack = RuntimeStack::new(4);
        stack.alloc_block(1, 1).unwrap();
        stack.push(StackSlot::Int32(1)).unwrap();
        stack.push(StackSlot::Int32(2)).unwrap();
        assert!(matches!(stack.push(StackSlot::Int32(3)), Err(Error::StackOverflow)));
        assert!(matches!(stack.alloc_block(1, 0), Err(Error::StackOverflow)));
    }

    #[test]
    fn insert_shifts_up() {
        let mut stack = RuntimeStack::new(8);
        stack.push(StackSlot::Int32(1)).unwrap();
        stack.push(StackSlot::Int32(2)).unwrap();
        stack.insert(0, StackSlot::Int32(0)).unwrap();
        assert_eq!(stack.get(0).unwrap(), StackSlot::Int32(0));
        assert_eq!(stack.get(1).unwrap(), StackSlot::Int32(1));
        assert_eq!(stack.get(2).unwrap(), StackSlot::Int32(2));
        assert_eq!(stack.esp(), 3);
    }

    #[test]
    fn reset_to_mark() {
        let mut stack = RuntimeStack::new(8);
        let mark = stack.mark();
        stack.push_object(Value::I32(1)).unwrap();
        stack.alloc_block(0, 1).unwrap();
        stack.reset(&mark);
        assert_eq!(stack.esp(), 0);
        assert_eq!(stack.vt_ptr(), 8);
        assert_eq!(stack.managed_len(), 0);
    }
}

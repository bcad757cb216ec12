//! Allocator for asynchronous operation identifiers.
//!
//! Asynchronous I/O statements are executed synchronously, but each one is
//! still handed an ID= value that a later WAIT statement can name. IDs are
//! drawn from a fixed-width pool per unit; ID 0 is reserved to mean "all
//! pending operations" and is never handed out.

const POOL_WIDTH: u32 = u64::BITS;

/// Bitset of available IDs; bit *i* is set iff ID *i* is free.
#[derive(Debug, Clone, Copy)]
pub struct AsyncIdPool {
    available: u64,
}

impl AsyncIdPool {
    pub fn new() -> Self {
        // All IDs free except the reserved ID 0
        Self { available: !1 }
    }

    /// Claims the lowest free ID, or `None` when the pool is exhausted.
    pub fn allocate(&mut self) -> Option<i32> {
        if self.available == 0 {
            None
        } else {
            let id = self.available.trailing_zeros();
            self.available &= !(1 << id);
            Some(id as i32)
        }
    }

    /// Completes a pending ID, releasing it for reuse. `id == 0` releases
    /// every ID. Returns false for an ID that is out of range or not pending.
    pub fn wait(&mut self, id: i32) -> bool {
        if id < 0 || id as u32 >= POOL_WIDTH || self.available & (1 << id) != 0 {
            false
        } else if id == 0 {
            self.available = !1;
            true
        } else {
            self.available |= 1 << id;
            true
        }
    }
}

impl Default for AsyncIdPool {
    fn default() -> Self {
        Self::new()
    }
}

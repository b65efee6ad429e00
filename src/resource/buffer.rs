use std::collections::VecDeque;

use crate::context::Context;
use crate::error::{SimResult, ValueError};
use crate::resource::{QTY_EPS, ResourceLike};

/// FIFO inventory of resources with a capacity in the resource's units.
///
/// Insertion order is preserved; removal is from the head unless the
/// LIFO-style [`ResBuf::pop_back`] is used. Capacity is mutable but never
/// settable below the held quantity.
#[derive(Debug, Clone)]
pub struct ResBuf<T> {
    items: VecDeque<T>,
    capacity: f64,
}

impl<T: ResourceLike> Default for ResBuf<T> {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl<T: ResourceLike> ResBuf<T> {
    pub fn new(capacity: f64) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// A buffer without a capacity bound.
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY)
    }

    /// Total quantity currently held.
    pub fn quantity(&self) -> f64 {
        self.items.iter().map(|r| r.quantity()).sum()
    }

    /// Number of discrete resources held.
    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Remaining headroom in the buffer's units.
    pub fn space(&self) -> f64 {
        (self.capacity - self.quantity()).max(0.0)
    }

    /// Adjusts the capacity; fails if set below the held quantity.
    pub fn set_capacity(&mut self, capacity: f64) -> SimResult<()> {
        let holding = self.quantity();
        if capacity + QTY_EPS < holding {
            return Err(ValueError::CapacityBelowQuantity {
                requested: capacity,
                holding,
            }
            .into());
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Appends a resource; fails if it would exceed capacity beyond
    /// tolerance.
    pub fn push(&mut self, res: T) -> SimResult<()> {
        let holding = self.quantity();
        if holding + res.quantity() > self.capacity + QTY_EPS {
            return Err(ValueError::BufferOverCapacity {
                requested: res.quantity(),
                capacity: self.capacity,
                holding,
            }
            .into());
        }
        self.items.push_back(res);
        Ok(())
    }

    /// Appends several resources, atomically with respect to capacity.
    pub fn push_all(&mut self, resources: impl IntoIterator<Item = T>) -> SimResult<()> {
        let incoming: Vec<T> = resources.into_iter().collect();
        let add: f64 = incoming.iter().map(|r| r.quantity()).sum();
        let holding = self.quantity();
        if holding + add > self.capacity + QTY_EPS {
            return Err(ValueError::BufferOverCapacity {
                requested: add,
                capacity: self.capacity,
                holding,
            }
            .into());
        }
        self.items.extend(incoming);
        Ok(())
    }

    /// Removes and returns the head resource.
    pub fn pop(&mut self) -> SimResult<T> {
        self.items.pop_front().ok_or_else(|| {
            ValueError::ExtractExceedsInventory {
                requested: 1.0,
                available: 0.0,
            }
            .into()
        })
    }

    /// Removes and returns the tail resource.
    pub fn pop_back(&mut self) -> SimResult<T> {
        self.items.pop_back().ok_or_else(|| {
            ValueError::ExtractExceedsInventory {
                requested: 1.0,
                available: 0.0,
            }
            .into()
        })
    }

    /// Removes the first `n` whole resources in FIFO order.
    pub fn pop_n(&mut self, n: usize) -> SimResult<Vec<T>> {
        if n > self.items.len() {
            return Err(ValueError::ExtractExceedsInventory {
                requested: n as f64,
                available: self.items.len() as f64,
            }
            .into());
        }
        Ok(self.items.drain(..n).collect())
    }

    /// Removes exactly `qty` from the head of the buffer, splitting the
    /// last resource taken if necessary.
    pub fn pop_qty(&mut self, ctx: &mut Context, qty: f64) -> SimResult<Vec<T>> {
        let holding = self.quantity();
        if qty > holding + QTY_EPS {
            return Err(ValueError::ExtractExceedsInventory {
                requested: qty,
                available: holding,
            }
            .into());
        }

        let mut out = Vec::new();
        let mut left = qty;
        while left > QTY_EPS {
            let mut head = self.pop()?;
            if head.quantity() > left + QTY_EPS {
                let split = head.extract(ctx, left)?;
                self.items.push_front(head);
                out.push(split);
                left = 0.0;
            } else {
                left -= head.quantity();
                out.push(head);
            }
        }
        Ok(out)
    }

    /// Collapses the entire buffer into a single resource, leaving the
    /// buffer empty.
    ///
    /// For materials the result's composition is the mass-weighted mix of
    /// the constituents.
    pub fn squash(&mut self, ctx: &mut Context) -> SimResult<T> {
        let mut combined = self.pop()?;
        while let Some(mut next) = self.items.pop_front() {
            combined.absorb(ctx, &mut next)?;
        }
        Ok(combined)
    }

    /// Read-only view of the head resource.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Read-only iteration in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

use std::sync::atomic::{AtomicU32, Ordering};

// Hogwild sharing of the weight buffer.
//
// Every worker reads and writes the same dense buffer with no lock. Each float is
// accessed as a relaxed atomic load or store of its bits, so there is no torn value
// and no undefined behaviour, but a read-modify-write done by one worker can
// overwrite a concurrent update by another. Losing such an update is accepted:
// lines rarely touch the same (feature, field) slots and SGD tolerates the noise.
// With a single worker the arithmetic is exactly the sequential one.

#[derive(Clone, Copy)]
pub struct SharedWeights<'a> {
    cells: &'a [AtomicU32],
}

impl<'a> SharedWeights<'a> {
    pub fn new(weights: &'a mut [f32]) -> SharedWeights<'a> {
        // SAFETY: AtomicU32 has the size and alignment of u32, and so of f32.
        // The exclusive borrow guarantees nobody else sees the floats while we hold the view.
        let cells = unsafe {
            std::slice::from_raw_parts(weights.as_mut_ptr() as *const AtomicU32, weights.len())
        };
        SharedWeights { cells }
    }

    #[inline(always)]
    pub fn load(&self, i: usize) -> f32 {
        f32::from_bits(self.cells[i].load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn store(&self, i: usize, value: f32) {
        self.cells[i].store(value.to_bits(), Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

//! Free list over the tiny arena.
//!
//! The tiny arena is one contiguous region sliced into `cells` fixed-size
//! cells. Every cell is either on the free list or lent to exactly one caller.
//! Membership in the arena is a pure address-range test, which is how release
//! tells tiny cells apart from header-prefixed heap blocks.
//!
//! Debug builds also keep a per-cell "is free" map and treat a cell that is
//! released twice, or an address that is not on a cell boundary, as fatal heap
//! corruption. Release builds skip that bookkeeping entirely.

/// LIFO free list of tiny-cell addresses.
#[derive(Debug)]
pub struct TinyFreeList {
    base: usize,
    end: usize,
    cell_size: usize,
    cells: usize,
    free: Vec<usize>,
    #[cfg(debug_assertions)]
    is_free: Vec<bool>,
}

impl TinyFreeList {
    /// Slice `[base, base + cells * cell_size)` into cells, all initially free.
    ///
    /// # Panics
    ///
    /// Panics if the region wraps the address space.
    #[must_use]
    pub fn new(base: usize, cell_size: usize, cells: usize) -> Self {
        let len = cells
            .checked_mul(cell_size)
            .and_then(|len| base.checked_add(len))
            .map(|end| end - base);
        let Some(len) = len else {
            panic!("tiny arena [{base:#x}; {cells} x {cell_size}] wraps the address space");
        };
        let free = (0..cells).map(|i| base + i * cell_size).collect();
        Self {
            base,
            end: base + len,
            cell_size,
            cells,
            free,
            #[cfg(debug_assertions)]
            is_free: vec![true; cells],
        }
    }

    /// A free list with no cells; every pop misses and nothing is contained.
    #[must_use]
    pub fn empty(cell_size: usize) -> Self {
        Self::new(0, cell_size, 0)
    }

    /// Returns true if `addr` lies inside the arena.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end
    }

    /// Take the most recently released cell.
    pub fn pop(&mut self) -> Option<usize> {
        let addr = self.free.pop()?;
        #[cfg(debug_assertions)]
        {
            let idx = self.cell_index(addr);
            assert!(
                self.is_free[idx],
                "tiny arena corruption: cell {addr:#x} handed out while already lent"
            );
            self.is_free[idx] = false;
        }
        Some(addr)
    }

    /// Return a lent cell to the free list.
    pub fn push(&mut self, addr: usize) {
        debug_assert!(
            self.contains(addr),
            "tiny arena corruption: {addr:#x} is outside the arena"
        );
        debug_assert!(
            self.free.len() < self.cells,
            "tiny arena corruption: free list already holds every cell"
        );
        #[cfg(debug_assertions)]
        {
            assert_eq!(
                (addr - self.base) % self.cell_size,
                0,
                "tiny arena corruption: {addr:#x} is not a cell boundary"
            );
            let idx = self.cell_index(addr);
            assert!(
                !self.is_free[idx],
                "tiny arena corruption: cell {addr:#x} released twice"
            );
            self.is_free[idx] = true;
        }
        self.free.push(addr);
    }

    #[cfg(debug_assertions)]
    fn cell_index(&self, addr: usize) -> usize {
        (addr - self.base) / self.cell_size
    }

    /// Number of cells currently on the free list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of cells currently lent out.
    #[must_use]
    pub fn lent(&self) -> usize {
        self.cells - self.free.len()
    }

    #[must_use]
    pub fn cells(&self) -> usize {
        self.cells
    }

    #[must_use]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// First address of the arena.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Size of the arena in bytes.
    #[must_use]
    pub fn arena_bytes(&self) -> usize {
        self.end - self.base
    }
}

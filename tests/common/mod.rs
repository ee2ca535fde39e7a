#![allow(dead_code)]

use ia32_arch::SnapshotMemory;

/// Routes the logs of the walks to stderr.
pub fn init_logs() {
    logger::init(log::LevelFilter::Trace, |args| eprint!("{}", args));
}

/// Physical memory starting at address 0, holding synthetic paging structures.
pub struct PhysMemory(Vec<u8>);

impl PhysMemory {
    pub fn new(pages: usize) -> Self {
        PhysMemory(vec![0; pages * 0x1000])
    }

    /// Writes a 64-bit entry at `index` in the table at `table`.
    pub fn set(&mut self, table: u64, index: u64, entry: u64) {
        let addr = (table + index * 8) as usize;
        self.0[addr..addr + 8].copy_from_slice(&entry.to_le_bytes());
    }

    /// Writes a 32-bit entry at `index` in the table at `table`.
    pub fn set32(&mut self, table: u64, index: u64, entry: u32) {
        let addr = (table + index * 4) as usize;
        self.0[addr..addr + 4].copy_from_slice(&entry.to_le_bytes());
    }

    pub fn snapshot(&self) -> SnapshotMemory<'_> {
        SnapshotMemory::new(0, &self.0)
    }
}

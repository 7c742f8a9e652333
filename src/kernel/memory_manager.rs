use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use log::{debug, warn};

use crate::error::SimError;
use crate::io::BackingStore;

/// One physical frame: a fixed-size byte block plus placement metadata.
/// The data is interpreted as little-endian 16-bit cells by `read`/`write`.
pub struct Frame {
    pub frame_id: usize,
    pub owner: Option<(u32, usize)>,
    pub last_access: u64,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PageTableEntry {
    pub frame: Option<usize>,
    pub last_access: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_frames: usize,
    pub used_frames: usize,
    pub free_frames: usize,
    pub total_page_faults: u64,
    pub total_pages_in: u64,
    pub total_pages_out: u64,
}

/// Frame placement as shown by `vmstat`.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub frame_id: usize,
    pub owner: Option<(u32, usize)>,
}

/// Demand-paged memory manager. One mutex serializes every public entry
/// point; readers, writers, and the fault handler never run concurrently.
/// Frames are bound to pages only on access; eviction picks the least
/// recently used frame and saves its bytes to the backing store.
pub struct MemoryManager {
    inner: Mutex<Option<Pager>>,
}

struct Pager {
    mem_per_frame: usize,
    frames: Vec<Frame>,
    page_tables: HashMap<u32, Vec<PageTableEntry>>,
    memory_sizes: HashMap<u32, usize>,
    store: BackingStore,
    stats: MemoryStats,
    access_counter: u64,
}

impl MemoryManager {
    pub fn new() -> MemoryManager {
        MemoryManager {
            inner: Mutex::new(None),
        }
    }

    /// Establishes the frame table and empties the backing store. Calling
    /// it again discards all placements and resets the statistics.
    pub fn initialize(
        &self,
        max_overall_mem: usize,
        mem_per_frame: usize,
        store_path: impl AsRef<Path>,
    ) -> Result<(), SimError> {
        if mem_per_frame == 0 || max_overall_mem % mem_per_frame != 0 {
            return Err(SimError::invalid(
                "mem-per-frame must divide max-overall-mem",
            ));
        }

        let total_frames = max_overall_mem / mem_per_frame;
        let frames = (0..total_frames)
            .map(|frame_id| Frame {
                frame_id,
                owner: None,
                last_access: 0,
                data: vec![0; mem_per_frame],
            })
            .collect();

        let mut store = BackingStore::new(store_path);
        store.clear()?;

        let mut guard = self.inner.lock().unwrap();
        *guard = Some(Pager {
            mem_per_frame,
            frames,
            page_tables: HashMap::new(),
            memory_sizes: HashMap::new(),
            store,
            stats: MemoryStats {
                total_frames,
                used_frames: 0,
                free_frames: total_frames,
                ..MemoryStats::default()
            },
            access_counter: 0,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Installs an all-invalid page table for the process. No frames are
    /// reserved; paging is purely on demand.
    pub fn allocate(&self, pid: u32, size: usize) -> Result<(), SimError> {
        let mut guard = self.inner.lock().unwrap();
        let pager = guard.as_mut().ok_or(SimError::NotInitialized)?;

        if !size.is_power_of_two() {
            return Err(SimError::invalid("process memory size must be a power of 2"));
        }
        if !(64..=65536).contains(&size) {
            return Err(SimError::invalid(
                "process memory size must be between 64 and 65536",
            ));
        }

        let num_pages = size.div_ceil(pager.mem_per_frame);
        pager
            .page_tables
            .insert(pid, vec![PageTableEntry::default(); num_pages]);
        pager.memory_sizes.insert(pid, size);
        Ok(())
    }

    /// Frees every frame owned by the process, drops its page table, and
    /// erases its backing-store blocks.
    pub fn deallocate(&self, pid: u32) {
        let mut guard = self.inner.lock().unwrap();
        let Some(pager) = guard.as_mut() else {
            return;
        };
        if !pager.page_tables.contains_key(&pid) {
            return;
        }

        for frame in &mut pager.frames {
            if matches!(frame.owner, Some((owner, _)) if owner == pid) {
                frame.owner = None;
                frame.data.fill(0);
                pager.stats.used_frames -= 1;
                pager.stats.free_frames += 1;
            }
        }
        pager.page_tables.remove(&pid);
        pager.memory_sizes.remove(&pid);
        if let Err(err) = pager.store.remove_process(pid) {
            warn!("backing store cleanup for pid {pid} failed: {err}");
        }
    }

    pub fn read(&self, pid: u32, vaddr: usize) -> Result<u16, SimError> {
        let mut guard = self.inner.lock().unwrap();
        let pager = guard.as_mut().ok_or(SimError::NotInitialized)?;

        let (frame_index, offset) = pager.access(pid, vaddr)?;
        let data = &pager.frames[frame_index].data;
        Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
    }

    pub fn write(&self, pid: u32, vaddr: usize, value: u16) -> Result<(), SimError> {
        let mut guard = self.inner.lock().unwrap();
        let pager = guard.as_mut().ok_or(SimError::NotInitialized)?;

        let (frame_index, offset) = pager.access(pid, vaddr)?;
        pager.frames[frame_index].data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn stats(&self) -> Result<MemoryStats, SimError> {
        let guard = self.inner.lock().unwrap();
        let pager = guard.as_ref().ok_or(SimError::NotInitialized)?;
        Ok(pager.stats)
    }

    pub fn frame_table(&self) -> Result<Vec<FrameInfo>, SimError> {
        let guard = self.inner.lock().unwrap();
        let pager = guard.as_ref().ok_or(SimError::NotInitialized)?;
        Ok(pager
            .frames
            .iter()
            .map(|frame| FrameInfo {
                frame_id: frame.frame_id,
                owner: frame.owner,
            })
            .collect())
    }

    /// Frame currently holding (pid, page), if resident.
    pub fn frame_for(&self, pid: u32, page: usize) -> Option<usize> {
        let guard = self.inner.lock().unwrap();
        let pager = guard.as_ref()?;
        pager.page_tables.get(&pid)?.get(page)?.frame
    }
}

impl Pager {
    /// Translates a virtual address, resolving a page fault if needed, and
    /// stamps a fresh LRU tick on the frame and the page table entry.
    fn access(&mut self, pid: u32, vaddr: usize) -> Result<(usize, usize), SimError> {
        let table_len = self
            .page_tables
            .get(&pid)
            .ok_or_else(|| SimError::fault("unknown process"))?
            .len();

        let page = vaddr / self.mem_per_frame;
        let offset = vaddr % self.mem_per_frame;
        if page >= table_len {
            return Err(SimError::fault("invalid memory address"));
        }
        if offset + 2 > self.mem_per_frame {
            return Err(SimError::fault("invalid memory address"));
        }

        if self.page_tables[&pid][page].frame.is_none() {
            self.handle_page_fault(pid, page)?;
        }

        let frame_index = self.page_tables[&pid][page]
            .frame
            .expect("fault handler must leave a valid entry");
        let tick = self.next_tick();
        self.frames[frame_index].last_access = tick;
        let entry = &mut self.page_tables.get_mut(&pid).unwrap()[page];
        entry.last_access = tick;

        Ok((frame_index, offset))
    }

    /// Binds a frame to (pid, page): a free frame if one exists, else the
    /// LRU victim after saving it out. Loads the page from the backing
    /// store when an out-copy exists, otherwise zeroes the frame.
    fn handle_page_fault(&mut self, pid: u32, page: usize) -> Result<(), SimError> {
        let frame_index = match self.find_free_frame() {
            Some(index) => index,
            None => self.evict_lru()?,
        };

        let tick = self.next_tick();
        match self.store.fetch(pid, page) {
            Some(bytes) => {
                self.frames[frame_index].data.copy_from_slice(bytes);
                self.stats.total_pages_in += 1;
            }
            None => self.frames[frame_index].data.fill(0),
        }

        let frame = &mut self.frames[frame_index];
        frame.owner = Some((pid, page));
        frame.last_access = tick;

        let entry = &mut self.page_tables.get_mut(&pid).unwrap()[page];
        entry.frame = Some(frame_index);
        entry.last_access = tick;

        self.stats.used_frames += 1;
        self.stats.free_frames -= 1;
        self.stats.total_page_faults += 1;
        Ok(())
    }

    fn find_free_frame(&self) -> Option<usize> {
        self.frames
            .iter()
            .find(|frame| frame.owner.is_none())
            .map(|frame| frame.frame_id)
    }

    /// Evicts the allocated frame with the smallest access tick; the strict
    /// comparison ties off to the lowest frame id.
    fn evict_lru(&mut self) -> Result<usize, SimError> {
        let mut victim: Option<usize> = None;
        let mut oldest = u64::MAX;
        for frame in &self.frames {
            if frame.owner.is_some() && frame.last_access < oldest {
                oldest = frame.last_access;
                victim = Some(frame.frame_id);
            }
        }
        let frame_index = victim.ok_or_else(|| SimError::fault("no victim frame available"))?;
        let (victim_pid, victim_page) = self.frames[frame_index].owner.unwrap();

        debug!("evicting frame {frame_index} holding page ({victim_pid}, {victim_page})");
        if let Err(err) = self
            .store
            .store(victim_pid, victim_page, &self.frames[frame_index].data)
        {
            warn!("backing store write for ({victim_pid}, {victim_page}) failed: {err}");
        }

        if let Some(table) = self.page_tables.get_mut(&victim_pid) {
            if let Some(entry) = table.get_mut(victim_page) {
                entry.frame = None;
            }
        }

        let frame = &mut self.frames[frame_index];
        frame.owner = None;
        frame.data.fill(0);
        self.stats.total_pages_out += 1;
        self.stats.used_frames -= 1;
        self.stats.free_frames += 1;
        Ok(frame_index)
    }

    fn next_tick(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_mem: usize, frame_size: usize) -> (MemoryManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryManager::new();
        memory
            .initialize(max_mem, frame_size, dir.path().join("store.txt"))
            .unwrap();
        (memory, dir)
    }

    fn store_file(dir: &tempfile::TempDir) -> String {
        std::fs::read_to_string(dir.path().join("store.txt")).unwrap()
    }

    #[test]
    fn test_memory_initialize_stats() {
        let (memory, _dir) = manager(1024, 256);
        let stats = memory.stats().unwrap();
        assert_eq!(stats.total_frames, 4);
        assert_eq!(stats.used_frames, 0);
        assert_eq!(stats.free_frames, 4);
        assert_eq!(stats.total_page_faults, 0);
    }

    #[test]
    fn test_memory_uninitialized_operations_fail() {
        let memory = MemoryManager::new();
        assert!(matches!(memory.allocate(1, 64), Err(SimError::NotInitialized)));
        assert!(matches!(memory.read(1, 0), Err(SimError::NotInitialized)));
        assert!(matches!(memory.stats(), Err(SimError::NotInitialized)));
    }

    #[test]
    fn test_memory_allocate_rejects_bad_sizes() {
        let (memory, _dir) = manager(1024, 256);
        assert!(memory.allocate(1, 100).is_err());
        assert!(memory.allocate(1, 32).is_err());
        assert!(memory.allocate(1, 131072).is_err());
        assert!(memory.allocate(1, 256).is_ok());
    }

    #[test]
    fn test_memory_allocate_reserves_no_frames() {
        let (memory, _dir) = manager(1024, 256);
        memory.allocate(1, 1024).unwrap();
        let stats = memory.stats().unwrap();
        assert_eq!(stats.used_frames, 0);
        assert_eq!(stats.free_frames, 4);
    }

    #[test]
    fn test_memory_write_then_read() {
        let (memory, _dir) = manager(1024, 256);
        memory.allocate(1, 512).unwrap();

        memory.write(1, 10, 1234).unwrap();
        assert_eq!(memory.read(1, 10).unwrap(), 1234);

        let stats = memory.stats().unwrap();
        // Both accesses hit page 0; only the first one faults.
        assert_eq!(stats.total_page_faults, 1);
        assert_eq!(stats.used_frames, 1);
    }

    #[test]
    fn test_memory_unknown_process_faults() {
        let (memory, _dir) = manager(1024, 256);
        assert!(matches!(memory.read(9, 0), Err(SimError::MemoryFault(_))));
    }

    #[test]
    fn test_memory_address_out_of_range_faults() {
        let (memory, _dir) = manager(1024, 256);
        memory.allocate(1, 256).unwrap();
        // One page of 256 bytes; address 256 is past the end.
        assert!(matches!(memory.read(1, 256), Err(SimError::MemoryFault(_))));
        assert!(memory.read(1, 255).is_err()); // cell would straddle the frame
        assert!(memory.read(1, 254).is_ok());
    }

    #[test]
    fn test_memory_lru_eviction_and_swap_in() {
        // 2 frames, one process with 4 pages of 32 bytes.
        let (memory, dir) = manager(64, 32);
        memory.allocate(1, 128).unwrap();

        memory.write(1, 0, 0xAAAA).unwrap();
        memory.write(1, 32, 0xBBBB).unwrap();
        // Page 2 forces the eviction of page 0, the least recently used.
        memory.write(1, 64, 0xCCCC).unwrap();
        assert_eq!(memory.frame_for(1, 0), None);
        assert!(store_file(&dir).contains("Key: 1_0"));

        // Reading page 0 evicts page 1 and swaps page 0 back in.
        assert_eq!(memory.read(1, 0).unwrap(), 0xAAAA);

        let stats = memory.stats().unwrap();
        assert_eq!(stats.total_page_faults, 4);
        assert!(stats.total_pages_out >= 1);
        assert!(stats.total_pages_in >= 1);
        assert!(stats.total_page_faults >= stats.total_pages_in);
        assert!(stats.total_page_faults >= stats.total_pages_out);
    }

    #[test]
    fn test_memory_lru_prefers_least_recent() {
        let (memory, _dir) = manager(64, 32);
        memory.allocate(1, 128).unwrap();

        memory.write(1, 0, 1).unwrap(); // page 0
        memory.write(1, 32, 2).unwrap(); // page 1
        memory.read(1, 0).unwrap(); // refresh page 0
        memory.write(1, 64, 3).unwrap(); // page 2 evicts page 1

        assert!(memory.frame_for(1, 0).is_some());
        assert_eq!(memory.frame_for(1, 1), None);
        assert!(memory.frame_for(1, 2).is_some());
    }

    #[test]
    fn test_memory_round_trip_across_processes_and_evictions() {
        let (memory, _dir) = manager(64, 32);
        memory.allocate(1, 128).unwrap();
        memory.allocate(2, 128).unwrap();

        memory.write(1, 4, 111).unwrap();
        memory.write(2, 4, 222).unwrap();
        // Churn enough distinct pages to evict both of the above.
        memory.write(1, 64, 9).unwrap();
        memory.write(2, 64, 9).unwrap();

        assert_eq!(memory.read(1, 4).unwrap(), 111);
        assert_eq!(memory.read(2, 4).unwrap(), 222);
    }

    #[test]
    fn test_memory_deallocate_completeness() {
        let (memory, dir) = manager(64, 32);
        memory.allocate(1, 128).unwrap();

        memory.write(1, 0, 1).unwrap();
        memory.write(1, 32, 2).unwrap();
        memory.write(1, 64, 3).unwrap(); // evicts page 0 into the store

        memory.deallocate(1);

        let stats = memory.stats().unwrap();
        assert_eq!(stats.used_frames, 0);
        assert_eq!(stats.free_frames, stats.total_frames);
        for frame in memory.frame_table().unwrap() {
            assert!(frame.owner.is_none());
        }
        assert!(!store_file(&dir).contains("Key: 1_"));
        // The process is gone entirely.
        assert!(memory.read(1, 0).is_err());
    }

    #[test]
    fn test_memory_deallocated_pages_do_not_resurface() {
        let (memory, _dir) = manager(64, 32);
        memory.allocate(1, 128).unwrap();
        memory.write(1, 0, 77).unwrap();
        memory.write(1, 32, 77).unwrap();
        memory.write(1, 64, 77).unwrap();
        memory.deallocate(1);

        // A new process with the same pid starts from zeroed pages.
        memory.allocate(1, 128).unwrap();
        assert_eq!(memory.read(1, 0).unwrap(), 0);
    }

    #[test]
    fn test_memory_initialize_is_idempotent_modulo_stats() {
        let (memory, dir) = manager(64, 32);
        memory.allocate(1, 128).unwrap();
        memory.write(1, 0, 5).unwrap();

        memory
            .initialize(64, 32, dir.path().join("store.txt"))
            .unwrap();

        let stats = memory.stats().unwrap();
        assert_eq!(stats, MemoryStats {
            total_frames: 2,
            used_frames: 0,
            free_frames: 2,
            ..MemoryStats::default()
        });
        assert!(store_file(&dir).is_empty());
    }

    #[test]
    fn test_memory_frame_accounting_invariant() {
        let (memory, _dir) = manager(128, 32);
        memory.allocate(1, 128).unwrap();
        for addr in [0, 32, 64, 96, 0, 64] {
            memory.write(1, addr, 1).unwrap();
            let stats = memory.stats().unwrap();
            assert_eq!(stats.used_frames + stats.free_frames, stats.total_frames);
        }
    }
}

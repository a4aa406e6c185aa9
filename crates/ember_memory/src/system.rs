//! # Memory System
//!
//! The engine-wide heap, with per-tag accounting.
//!
//! One [`MemorySystem`] is created by the application at startup and passed
//! to whatever needs it; there is no global instance. It owns the heap
//! buffer, runs the two-phase construction itself, and records how many
//! bytes each subsystem ([`MemoryTag`]) currently holds.
//!
//! ## Thread Safety
//!
//! The heap sits behind a `parking_lot::Mutex`, so a `&MemorySystem` can be
//! shared across threads. Each call holds the lock for one bounded scan of
//! the free list.

use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::{HeapAllocator, HeapBlock, IntervalAllocator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// What an allocation is for. Used only for accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MemoryTag {
    /// Untagged. Should be replaced with a real tag.
    Unknown = 0,
    /// Fixed-size arrays.
    Array,
    /// Linear (bump) allocator backing stores.
    LinearAllocator,
    /// Growable arrays.
    DArray,
    /// Dictionaries and hash tables.
    Dict,
    /// Ring queues.
    RingQueue,
    /// Binary search trees.
    Bst,
    /// Strings.
    String,
    /// Application-level state.
    Application,
    /// Job system.
    Job,
    /// Texture data.
    Texture,
    /// Material instances.
    MaterialInstance,
    /// Renderer internals.
    Renderer,
    /// Game code.
    Game,
    /// Transforms.
    Transform,
    /// Entities.
    Entity,
    /// Entity graph nodes.
    EntityNode,
    /// Scenes.
    Scene,
}

impl MemoryTag {
    /// Number of tags.
    pub const COUNT: usize = 18;

    /// Every tag, in report order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Unknown,
        Self::Array,
        Self::LinearAllocator,
        Self::DArray,
        Self::Dict,
        Self::RingQueue,
        Self::Bst,
        Self::String,
        Self::Application,
        Self::Job,
        Self::Texture,
        Self::MaterialInstance,
        Self::Renderer,
        Self::Game,
        Self::Transform,
        Self::Entity,
        Self::EntityNode,
        Self::Scene,
    ];

    /// Report label.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Array => "ARRAY",
            Self::LinearAllocator => "LINEAR_ALLC",
            Self::DArray => "DARRAY",
            Self::Dict => "DICT",
            Self::RingQueue => "RING_QUEUE",
            Self::Bst => "BST",
            Self::String => "STRING",
            Self::Application => "APPLICATION",
            Self::Job => "JOB",
            Self::Texture => "TEXTURE",
            Self::MaterialInstance => "MAT_INST",
            Self::Renderer => "RENDERER",
            Self::Game => "GAME",
            Self::Transform => "TRANSFORM",
            Self::Entity => "ENTITY",
            Self::EntityNode => "ENTITY_NODE",
            Self::Scene => "SCENE",
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Allocation accounting snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently allocated across all tags.
    pub total_allocated: u64,
    /// Bytes currently allocated per tag, indexed by tag order.
    pub tagged: [u64; MemoryTag::COUNT],
    /// Successful allocations since startup.
    pub allocation_count: u64,
}

impl MemoryStats {
    /// Bytes currently held under `tag`.
    #[inline]
    #[must_use]
    pub const fn tag_usage(&self, tag: MemoryTag) -> u64 {
        self.tagged[tag.index()]
    }

    fn record_allocation(&mut self, tag: MemoryTag, size: u64) {
        self.total_allocated += size;
        self.tagged[tag.index()] += size;
        self.allocation_count += 1;
    }

    fn record_free(&mut self, tag: MemoryTag, size: u64) {
        let slot = &mut self.tagged[tag.index()];
        match (slot.checked_sub(size), self.total_allocated.checked_sub(size)) {
            (Some(tagged), Some(total)) => {
                *slot = tagged;
                self.total_allocated = total;
            }
            _ => {
                tracing::error!(%tag, size, held = *slot, "tag accounting underflow");
                *slot = slot.saturating_sub(size);
                self.total_allocated = self.total_allocated.saturating_sub(size);
            }
        }
    }
}

/// Scales a byte count to the largest binary unit that keeps it >= 1.
fn scaled(bytes: u64) -> (f64, &'static str) {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    if bytes >= GIB {
        (value / GIB as f64, "GiB")
    } else if bytes >= MIB {
        (value / MIB as f64, "MiB")
    } else if bytes >= KIB {
        (value / KIB as f64, "KiB")
    } else {
        (value, "B")
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "System memory use (tagged):")?;
        for tag in MemoryTag::ALL {
            let (amount, unit) = scaled(self.tag_usage(tag));
            writeln!(f, "  {:<12}: {amount:.2}{unit}", tag.name())?;
        }
        let (amount, unit) = scaled(self.total_allocated);
        write!(f, "  {:<12}: {amount:.2}{unit} in {} allocations", "TOTAL", self.allocation_count)
    }
}

struct Inner {
    heap: HeapAllocator,
    stats: MemoryStats,
    /// Tag of every live block, keyed by offset.
    tags: HashMap<u64, MemoryTag>,
}

/// The engine's memory context: one heap plus tag accounting.
///
/// # Example
///
/// ```rust,ignore
/// let memory = MemorySystem::new(MemoryConfig::from_toml_file("config/memory.toml")?)?;
/// let block = memory.allocate(256, MemoryTag::Renderer)?;
/// memory.zero_block(block)?;
/// memory.free(block, MemoryTag::Renderer)?;
/// println!("{}", memory.usage_report());
/// ```
pub struct MemorySystem {
    config: MemoryConfig,
    inner: Mutex<Inner>,
}

impl MemorySystem {
    /// Reserves the heap buffer and constructs the heap inside it.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for an invalid config, or the
    /// heap construction error.
    pub fn new(config: MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;

        let required = HeapAllocator::memory_requirement(config.total_size)?;
        let buffer = vec![0u8; required].into_boxed_slice();
        let heap = HeapAllocator::construct(config.total_size, buffer)?;

        tracing::info!(
            total_size = config.total_size,
            reserved = required,
            "memory system initialized"
        );
        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                heap,
                stats: MemoryStats::default(),
                tags: HashMap::new(),
            }),
        })
    }

    /// The configuration this system was created with.
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Allocates `size` bytes from the heap under `tag`.
    ///
    /// # Errors
    ///
    /// Propagates the heap error ([`MemoryError::ZeroSize`],
    /// [`MemoryError::OutOfMemory`]).
    pub fn allocate(&self, size: u64, tag: MemoryTag) -> MemoryResult<HeapBlock> {
        if tag == MemoryTag::Unknown && self.config.warn_on_unknown_tag {
            tracing::warn!(size, "allocation with MemoryTag::Unknown; re-tag this allocation");
        }

        let mut inner = self.inner.lock();
        let block = inner.heap.allocate(size).map_err(|err| {
            tracing::error!(size, %tag, %err, "memory system allocation failed");
            err
        })?;
        inner.stats.record_allocation(tag, block.size());
        inner.tags.insert(block.offset(), tag);
        Ok(block)
    }

    /// Returns `block` to the heap and removes it from `tag`'s usage.
    ///
    /// `tag` must be the tag the block was allocated under.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::TagMismatch`] (and frees nothing) when `tag`
    /// differs from the allocation tag. Otherwise propagates the heap error;
    /// fatal errors indicate a double free or a block that did not come from
    /// this system.
    pub fn free(&self, block: HeapBlock, tag: MemoryTag) -> MemoryResult<()> {
        let mut inner = self.inner.lock();
        let recorded = inner.tags.get(&block.offset()).copied();
        if let Some(recorded) = recorded.filter(|&recorded| recorded != tag) {
            tracing::error!(offset = block.offset(), %recorded, requested = %tag, "free with mismatched tag");
            return Err(MemoryError::TagMismatch { offset: block.offset(), recorded, requested: tag });
        }

        inner.heap.free_block(block)?;
        if recorded.is_none() {
            tracing::error!(offset = block.offset(), %tag, "freed block had no recorded tag");
        }
        inner.tags.remove(&block.offset());
        inner.stats.record_free(tag, block.size());
        Ok(())
    }

    fn out_of_range(block: HeapBlock, total: u64) -> MemoryError {
        tracing::error!(offset = block.offset(), size = block.size(), "block outside heap region");
        MemoryError::OutOfRange { offset: block.offset(), size: block.size(), total }
    }

    /// Runs `f` on the bytes of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfRange`] if the block leaves the heap region.
    pub fn with_block_mut<R>(&self, block: HeapBlock, f: impl FnOnce(&mut [u8]) -> R) -> MemoryResult<R> {
        let mut inner = self.inner.lock();
        let total = inner.heap.total_size();
        let bytes = inner.heap.block_bytes_mut(block).ok_or_else(|| Self::out_of_range(block, total))?;
        Ok(f(bytes))
    }

    /// Fills `block` with zeros.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfRange`] if the block leaves the heap region.
    pub fn zero_block(&self, block: HeapBlock) -> MemoryResult<()> {
        self.set_block(block, 0)
    }

    /// Fills `block` with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfRange`] if the block leaves the heap region.
    pub fn set_block(&self, block: HeapBlock, value: u8) -> MemoryResult<()> {
        self.with_block_mut(block, |bytes| bytes.fill(value))
    }

    /// Copies `data` to the front of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfRange`] if `data` is longer than the block
    /// or the block leaves the heap region.
    pub fn write_block(&self, block: HeapBlock, data: &[u8]) -> MemoryResult<()> {
        if data.len() as u64 > block.size() {
            return Err(MemoryError::OutOfRange {
                offset: block.offset(),
                size: data.len() as u64,
                total: block.size(),
            });
        }
        self.with_block_mut(block, |bytes| bytes[..data.len()].copy_from_slice(data))
    }

    /// Returns a copy of the bytes in `block`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfRange`] if the block leaves the heap region.
    pub fn read_block(&self, block: HeapBlock) -> MemoryResult<Vec<u8>> {
        self.with_block_mut(block, |bytes| bytes.to_vec())
    }

    /// Copies `min(src.size(), dst.size())` bytes from `src` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfRange`] if either block leaves the heap region.
    pub fn copy_block(&self, src: HeapBlock, dst: HeapBlock) -> MemoryResult<u64> {
        let mut inner = self.inner.lock();
        let total = inner.heap.total_size();
        inner.heap.copy_block(src, dst).ok_or_else(|| {
            let bad = if src.offset().saturating_add(src.size()) > total { src } else { dst };
            Self::out_of_range(bad, total)
        })
    }

    /// Creates an interval allocator for an external region, such as a GPU
    /// buffer, using the configured node capacity.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroTotalSize`] if `total_size` is zero.
    pub fn interval_allocator(&self, total_size: u64) -> MemoryResult<IntervalAllocator> {
        IntervalAllocator::with_node_capacity(total_size, self.config.interval_node_capacity)
    }

    /// Bytes managed by the heap.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.inner.lock().heap.total_size()
    }

    /// Bytes currently free in the heap.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.inner.lock().heap.free_space()
    }

    /// Number of free blocks in the heap.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.inner.lock().heap.block_count()
    }

    /// Bytes currently held under `tag`.
    #[must_use]
    pub fn tag_usage(&self, tag: MemoryTag) -> u64 {
        self.inner.lock().stats.tag_usage(tag)
    }

    /// Bytes currently allocated across all tags.
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.inner.lock().stats.total_allocated
    }

    /// Successful allocations since startup.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.inner.lock().stats.allocation_count
    }

    /// Snapshot of the accounting.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.inner.lock().stats.clone()
    }

    /// Human-readable per-tag usage report.
    #[must_use]
    pub fn usage_report(&self) -> String {
        self.stats().to_string()
    }

    /// Destroys the heap and returns the final accounting.
    ///
    /// Outstanding blocks are reported, not freed.
    pub fn shutdown(self) -> MemoryStats {
        let Inner { heap, stats, .. } = self.inner.into_inner();
        if stats.total_allocated > 0 {
            tracing::warn!(
                outstanding = stats.total_allocated,
                "memory system shut down with live allocations"
            );
        }
        drop(heap.destroy());
        tracing::info!("memory system shut down");
        stats
    }
}

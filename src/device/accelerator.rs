//! Accelerator engine
//!
//! Every hardware job passes through a bounded staging window. Window pages
//! start out non-resident for each job; touching one raises a fault through
//! the [`FaultChain`], and the job only proceeds once some handler in the
//! chain has made the page resident. [`PageResolver`] is the handler that
//! owns the accelerator's windows.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use flate2::{Decompress, FlushDecompress, Status};
use tracing::{debug, trace};

use super::{DeflateEngine, EngineMetrics};
use crate::codec::{Flush, RawDeflate};
use crate::dispatch::CodecPath;
use crate::error::{GzError, GzResult};
use crate::fault::{FaultAccess, FaultChain, FaultContext, FaultHandler, FaultRegistration};
use crate::utils::try_alloc;

/// Residency granule of the staging window
pub const PAGE_SIZE: usize = 4096;

/// Default window size per direction, in pages
const DEFAULT_WINDOW_PAGES: usize = 16;

/// Residency table of one staging buffer
#[derive(Debug)]
pub struct PageTable {
    base: usize,
    len: usize,
    resident: Vec<AtomicBool>,
}

impl PageTable {
    pub fn new(base: usize, len: usize) -> Self {
        let pages = (len + PAGE_SIZE - 1) / PAGE_SIZE;
        Self {
            base,
            len,
            resident: (0..pages).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr - self.base < self.len
    }

    pub fn page_count(&self) -> usize {
        self.resident.len()
    }

    pub fn is_resident(&self, page: usize) -> bool {
        self.resident
            .get(page)
            .map_or(false, |r| r.load(Ordering::Acquire))
    }

    /// Make the page holding `addr` resident. Returns `false` for foreign addresses.
    pub fn fault_in(&self, addr: usize) -> bool {
        if !self.contains(addr) {
            return false;
        }
        self.resident[(addr - self.base) / PAGE_SIZE].store(true, Ordering::Release);
        true
    }

    /// Drop every page; returns how many were resident
    pub fn evict_all(&self) -> usize {
        self.resident
            .iter()
            .filter(|page| page.swap(false, Ordering::AcqRel))
            .count()
    }
}

/// Fault handler owning every registered staging window
#[derive(Debug, Default)]
pub struct PageResolver {
    tables: Mutex<Vec<Weak<PageTable>>>,
    resolved: AtomicU64,
}

static GLOBAL_RESOLVER: OnceLock<(Arc<PageResolver>, FaultRegistration)> = OnceLock::new();

impl PageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver installed in the process-wide fault chain on first use.
    /// It stays installed for the lifetime of the process.
    pub fn global() -> &'static Arc<PageResolver> {
        &GLOBAL_RESOLVER
            .get_or_init(|| {
                let resolver = Arc::new(PageResolver::new());
                let registration = FaultChain::global().install(resolver.clone());
                (resolver, registration)
            })
            .0
    }

    /// Start claiming faults inside `table`
    pub fn register(&self, table: &Arc<PageTable>) {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.retain(|t| t.strong_count() > 0);
        tables.push(Arc::downgrade(table));
    }

    /// Faults resolved so far
    pub fn resolved(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }
}

impl FaultHandler for PageResolver {
    fn on_fault(&self, ctx: &FaultContext) -> bool {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let owned = tables
            .iter()
            .filter_map(Weak::upgrade)
            .any(|table| table.fault_in(ctx.addr));
        if owned {
            self.resolved.fetch_add(1, Ordering::Relaxed);
        }
        owned
    }

    fn name(&self) -> &str {
        "accelerator-page-resolver"
    }
}

/// Hardware path engine
pub struct AcceleratorEngine {
    chain: Arc<FaultChain>,

    /// Input half followed by output half
    staging: Vec<u8>,
    window: usize,
    table: Arc<PageTable>,
    metrics: EngineMetrics,
}

impl AcceleratorEngine {
    /// Engine bound to the process-wide fault chain and resolver
    ///
    /// # Errors
    /// Returns `GzError::OutOfMemory` if the staging window cannot be allocated
    pub fn new() -> GzResult<Self> {
        let resolver = PageResolver::global();
        Self::attach(Arc::clone(FaultChain::global()), Some(resolver), DEFAULT_WINDOW_PAGES)
    }

    /// Engine raising its faults through `chain`, with windows of
    /// `window_pages` pages per direction. `resolver`, if given, is told about
    /// the new window.
    ///
    /// # Errors
    /// Returns `GzError` for an empty window or a failed allocation
    pub fn attach(
        chain: Arc<FaultChain>,
        resolver: Option<&PageResolver>,
        window_pages: usize,
    ) -> GzResult<Self> {
        if window_pages == 0 {
            return Err(GzError::InvalidArgument(
                "accelerator window must hold at least one page".to_string(),
            ));
        }

        let window = window_pages * PAGE_SIZE;
        let staging = try_alloc(2 * window)?;
        let table = Arc::new(PageTable::new(staging.as_ptr() as usize, staging.len()));
        if let Some(resolver) = resolver {
            resolver.register(&table);
        }

        debug!(base = table.base(), window, "accelerator engine attached");

        Ok(Self {
            chain,
            staging,
            window,
            table,
            metrics: EngineMetrics::default(),
        })
    }

    /// Page table of the staging window
    pub fn page_table(&self) -> &Arc<PageTable> {
        &self.table
    }

    /// Ensure `[offset, offset + len)` of the staging buffer is resident
    fn touch(&mut self, offset: usize, len: usize, access: FaultAccess) -> GzResult<()> {
        if len == 0 {
            return Ok(());
        }

        let first = offset / PAGE_SIZE;
        let last = (offset + len - 1) / PAGE_SIZE;
        for page in first..=last {
            if self.table.is_resident(page) {
                self.metrics.residency.hits += 1;
                continue;
            }

            self.metrics.residency.misses += 1;
            self.metrics.faults_raised += 1;
            let ctx = FaultContext::new(self.table.base() + page * PAGE_SIZE, access);
            trace!(addr = ctx.addr, ?access, "accelerator page fault");
            self.chain.resolve(&ctx)?;

            // A handler may claim the fault without owning the window.
            if !self.table.is_resident(page) {
                return Err(GzError::UnresolvedFault { addr: ctx.addr });
            }
            self.metrics.faults_resolved += 1;
        }

        Ok(())
    }

    /// Run one request as a sequence of window-sized jobs.
    ///
    /// `step` returns the codec status plus bytes consumed and produced.
    fn run_jobs<F>(&mut self, input: &[u8], output: &mut [u8], mut step: F) -> GzResult<Status>
    where
        F: FnMut(&[u8], &mut [u8]) -> GzResult<(Status, usize, usize)>,
    {
        let evicted = self.table.evict_all();
        self.metrics.residency.requests += 1;
        self.metrics.residency.evicted += evicted as u64;

        let window = self.window;
        let (mut consumed, mut produced) = (0, 0);
        let mut progressed = false;

        loop {
            let in_len = (input.len() - consumed).min(window);
            let out_len = (output.len() - produced).min(window);
            self.touch(0, in_len, FaultAccess::Read)?;
            self.touch(window, out_len, FaultAccess::Write)?;

            let (win_in, win_out) = self.staging.split_at_mut(window);
            win_in[..in_len].copy_from_slice(&input[consumed..consumed + in_len]);

            let (status, c, p) = step(&win_in[..in_len], &mut win_out[..out_len])?;
            output[produced..produced + p].copy_from_slice(&win_out[..p]);
            consumed += c;
            produced += p;
            self.metrics.record_step(c as u64, p as u64);
            trace!(consumed = c, produced = p, ?status, "accelerator job");

            if status == Status::StreamEnd {
                return Ok(Status::StreamEnd);
            }
            if c == 0 && p == 0 {
                return Ok(if progressed { Status::Ok } else { status });
            }
            progressed = true;
            if produced == output.len() || (consumed == input.len() && p < out_len) {
                return Ok(Status::Ok);
            }
        }
    }
}

impl DeflateEngine for AcceleratorEngine {
    fn path(&self) -> CodecPath {
        CodecPath::Hardware
    }

    fn deflate(
        &mut self,
        stream: &mut RawDeflate,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Status> {
        self.run_jobs(input, output, |src, dst| {
            let (in0, out0) = (stream.total_in(), stream.total_out());
            let status = stream.compress(src, dst, flush)?;
            Ok((
                status,
                (stream.total_in() - in0) as usize,
                (stream.total_out() - out0) as usize,
            ))
        })
    }

    fn inflate(
        &mut self,
        stream: &mut Decompress,
        input: &[u8],
        output: &mut [u8],
        flush: FlushDecompress,
    ) -> GzResult<Status> {
        self.run_jobs(input, output, |src, dst| {
            let (in0, out0) = (stream.total_in(), stream.total_out());
            let status = stream.decompress(src, dst, flush)?;
            Ok((
                status,
                (stream.total_in() - in0) as usize,
                (stream.total_out() - out0) as usize,
            ))
        })
    }

    fn metrics(&self) -> EngineMetrics {
        let mut metrics = self.metrics.clone();
        metrics.calculate_ratio();
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Strategy;
    use flate2::Compression;
    use std::sync::atomic::AtomicUsize;

    struct Host {
        calls: AtomicUsize,
    }

    impl FaultHandler for Host {
        fn on_fault(&self, _ctx: &FaultContext) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn private_engine(window_pages: usize) -> (AcceleratorEngine, Arc<FaultChain>, Arc<PageResolver>) {
        let chain = Arc::new(FaultChain::new());
        let resolver = Arc::new(PageResolver::new());
        chain.install(resolver.clone());
        let engine = AcceleratorEngine::attach(chain.clone(), Some(&resolver), window_pages).unwrap();
        (engine, chain, resolver)
    }

    #[test]
    fn test_page_table_bounds() {
        let table = PageTable::new(0x10000, 3 * PAGE_SIZE);
        assert_eq!(table.page_count(), 3);
        assert!(!table.fault_in(0x10000 + 3 * PAGE_SIZE));
        assert!(table.fault_in(0x10000 + PAGE_SIZE + 7));
        assert!(table.is_resident(1));
        assert!(!table.is_resident(0));
        assert_eq!(table.evict_all(), 1);
        assert!(!table.is_resident(1));
        assert_eq!(table.evict_all(), 0);
    }

    #[test]
    fn test_jobs_span_several_windows() {
        let (mut engine, _chain, resolver) = private_engine(1);
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();

        let mut enc = RawDeflate::new(Compression::new(6), Strategy::Default);
        let mut packed = vec![0u8; 64 * 1024];
        let mut status = engine
            .deflate(&mut enc, &data, &mut packed, Flush::None)
            .unwrap();
        assert_eq!(enc.total_in() as usize, data.len());
        while status != Status::StreamEnd {
            let at = enc.total_out() as usize;
            status = engine
                .deflate(&mut enc, &[], &mut packed[at..], Flush::Finish)
                .unwrap();
        }
        packed.truncate(enc.total_out() as usize);

        let mut dec = Decompress::new(false);
        let mut plain = vec![0u8; data.len() + 1];
        engine
            .inflate(&mut dec, &packed, &mut plain, FlushDecompress::None)
            .unwrap();
        plain.truncate(dec.total_out() as usize);
        assert_eq!(plain, data);

        let metrics = engine.metrics();
        assert!(metrics.faults_raised > 0);
        assert_eq!(metrics.faults_raised, metrics.faults_resolved);
        assert_eq!(resolver.resolved(), metrics.faults_resolved);
        assert!(metrics.residency.hits > 0);
        assert_eq!(metrics.residency.misses, metrics.faults_raised);

        // Every request after the first found pages left resident.
        assert!(metrics.residency.requests >= 3);
        assert!(metrics.residency.evicted > 0);
    }

    #[test]
    fn test_host_handler_at_head_sees_and_passes_faults() {
        let (mut engine, chain, _resolver) = private_engine(2);
        let host = Arc::new(Host {
            calls: AtomicUsize::new(0),
        });
        chain.install(host.clone());

        let mut enc = RawDeflate::new(Compression::fast(), Strategy::Default);
        let mut out = vec![0u8; 1024];
        engine
            .deflate(&mut enc, b"hello accelerator", &mut out, Flush::Finish)
            .unwrap();

        let raised = engine.metrics().faults_raised as usize;
        assert!(raised > 0);
        assert_eq!(host.calls.load(Ordering::SeqCst), raised);
    }

    #[test]
    fn test_unowned_window_fault_is_fatal() {
        let chain = Arc::new(FaultChain::new());
        let mut engine = AcceleratorEngine::attach(chain, None, 1).unwrap();

        let mut enc = RawDeflate::new(Compression::fast(), Strategy::Default);
        let mut out = vec![0u8; 64];
        let err = engine
            .deflate(&mut enc, b"no resolver", &mut out, Flush::None)
            .unwrap_err();
        match err {
            GzError::UnresolvedFault { addr } => assert_eq!(addr, engine.page_table().base()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_greedy_head_handler_cannot_fake_residency() {
        struct Greedy;
        impl FaultHandler for Greedy {
            fn on_fault(&self, _ctx: &FaultContext) -> bool {
                true
            }
        }

        let (mut engine, chain, resolver) = private_engine(1);
        chain.install(Arc::new(Greedy));

        let mut enc = RawDeflate::new(Compression::fast(), Strategy::Default);
        let mut out = vec![0u8; 64];
        let err = engine
            .deflate(&mut enc, b"swallowed", &mut out, Flush::None)
            .unwrap_err();
        assert!(matches!(err, GzError::UnresolvedFault { .. }));
        assert_eq!(resolver.resolved(), 0);
    }

    #[test]
    fn test_zero_window_rejected() {
        let chain = Arc::new(FaultChain::new());
        assert!(matches!(
            AcceleratorEngine::attach(chain, None, 0),
            Err(GzError::InvalidArgument(_))
        ));
    }
}

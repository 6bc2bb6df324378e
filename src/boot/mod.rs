//! The bootstrap proper: from what the loader handed over to page tables
//! the kernel can start on, and the [`info::BootInfo`] describing them.
//!
//! A [`Bootstrap`] owns nothing. Memory, the collaborators and the boot
//! state are borrowed from the entry point, so tests can run it over fake
//! memory as many times as they like.

use log_crate::{debug, info};

use crate::consts::{Target, KSEG_SIZE, KTEXT_PHYS, MAX_MODULES, NUCLEUS_SIZE, ONE_GIG};
use crate::err::{BootError, Result};
use crate::mem::alloc::BumpAllocator;
use crate::mem::paging::{DirectBackend, NucleusLayout, PageTables, PagingConfig};
use crate::mem::phys::PhysicalMemory;
use crate::mem::size::PAGE;
use crate::mem::{align_down, align_up, PhysicalAddress, Range};
use crate::xen::{self, Hypervisor, P2m, Scratch, StartInfo, XenBackend};

pub mod cpu;
pub mod env;
pub mod info;
pub mod loader;
pub mod options;
pub mod reloc;

use cpu::{CpuFeatures, Cpuid};
use env::{Console, Environment};
use info::{BootState, HandoffFlags, KernelEntry, ModuleDescriptor};
use loader::Loader;
use options::{BootOptions, CommandLine};
use reloc::RelocTarget;

/// Where this image and its buffers sit, fixed when it was linked.
#[derive(Debug, Clone, Copy)]
pub struct ImageLayout {
    /// Where the loader put the kernel's ELF file.
    pub load_addr: PhysicalAddress,
    pub image_end: u64,
    /// The static buffer loader structures are relocated into.
    pub reloc_buffer: PhysicalAddress,
    pub reloc_buffer_size: u64,
    /// Top of the bootstrap's stack. Xen scratch memory starts above it.
    pub stack_top: u64,
}

pub struct Bootstrap<'a, M, E, C> {
    mem: &'a mut M,
    env: &'a mut E,
    cpu: &'a mut C,
    state: &'a mut BootState,
    layout: ImageLayout,
    target: Target,
}

impl<'a, M: PhysicalMemory, E: Environment, C: Cpuid> Bootstrap<'a, M, E, C> {
    pub fn new(
        mem: &'a mut M,
        env: &'a mut E,
        cpu: &'a mut C,
        state: &'a mut BootState,
        layout: ImageLayout,
        target: Target,
    ) -> Self {
        Bootstrap {
            mem,
            env,
            cpu,
            state,
            layout,
            target,
        }
    }

    /// Boot on bare metal, from whichever multiboot info the trampoline
    /// saved.
    pub fn metal(
        mut self,
        mb_info: Option<PhysicalAddress>,
        mb2_info: Option<PhysicalAddress>,
    ) -> Result<KernelEntry> {
        let loader = Loader::detect(&*self.mem, mb_info, mb2_info)?;
        let (options, console) = self.console(&loader)?;

        if self.target.is_64bit() {
            self.env.load_kernel(self.layout.load_addr)?;
            info!("DONE loading kernel.");
        }

        self.process_mmap(&loader)?;
        let loader = if options.no_reloc {
            loader
        } else {
            let target = RelocTarget {
                buffer: self.layout.reloc_buffer,
                buffer_size: self.layout.reloc_buffer_size,
                image_end: self.layout.image_end,
            };
            let installed = &self.state.lists.installed;
            let loader = reloc::relocate(&mut *self.mem, &loader, installed, &target)?
                .unwrap_or(loader);
            // The v2 firmware tables are copies inside the info block and
            // moved with it.
            self.state.info.cmdline = loader.cmdline(&*self.mem)?.map_or(0, |a| a.raw());
            self.firmware_tables(&loader)?;
            loader
        };

        let mut alloc = BumpAllocator::new();
        if let Some(highest) = loader.highest_addr(&*self.mem)? {
            alloc.check_higher(highest);
        }
        self.check_legacy(&loader)?;

        let features = CpuFeatures::probe(self.cpu);
        features.check(self.target)?;
        let max_mem = self.state.lists.max_mem();
        let features = features.settle_pae(self.target, options.disable_pae, Some(max_mem));

        alloc.check_higher(self.layout.image_end);
        self.record_modules(&loader, Some(&mut alloc))?;
        self.state.lists.link();

        let config = self.paging(features, false);
        let framebuffer = if console.uses_framebuffer() {
            self.framebuffer_range()
        } else {
            None
        };
        let nucleus = NucleusLayout {
            phys: PhysicalAddress::new(KTEXT_PHYS),
            virt: config.kernel_text,
            size: NUCLEUS_SIZE,
        };
        let mut backend = DirectBackend;
        let summary = {
            let mut pt = PageTables::create(
                &mut *self.mem,
                &mut backend,
                &mut alloc,
                &self.state.lists.installed,
                config,
            )?;
            let summary = pt.build(&nucleus, true, framebuffer)?;
            if options.map_debug {
                pt.dump()?;
            }
            summary
        };

        let bi = &mut self.state.info;
        bi.next_paddr = alloc.cursor().raw();
        bi.next_vaddr = alloc.cursor().raw();
        bi.top_page_table = summary.top.raw();
        bi.pt_window = summary.pt_window.raw();
        bi.pte_to_pt_window = summary.pte_to_pt_window.raw();
        bi.mb_version = loader.version();
        bi.mb_info = loader.info_address().raw();
        Ok(self.finish(features, &config))
    }

    /// Boot as a paravirtualized guest from its start-info page.
    pub fn xen<H: Hypervisor>(
        mut self,
        mut hv: H,
        start_info: PhysicalAddress,
    ) -> Result<KernelEntry> {
        let si = StartInfo::new(start_info, self.target);
        let loader = Loader::xen(start_info, self.target);
        let (options, _) = self.console(&loader)?;

        let platform = xen::probe(&mut hv, self.cpu, self.target)?;
        platform.features.check(self.target)?;
        let features = platform
            .features
            .settle_pae(self.target, options.disable_pae, None);

        let nr_pages = si.nr_pages(&*self.mem)?;
        self.state.lists.guest(nr_pages * PAGE)?;
        self.check_legacy(&loader)?;

        let scratch = Scratch::above_stack(self.layout.stack_top);
        let mut alloc = scratch.allocator(ONE_GIG);
        debug!(
            "Scratch 0x{:x}..0x{:x}, allocating from 0x{:x}.",
            scratch.start, scratch.end, scratch.cursor
        );
        self.record_modules(&loader, None)?;
        self.state.lists.link();

        let config = self.paging(features, true);
        let nucleus = NucleusLayout {
            phys: PhysicalAddress::new(ONE_GIG),
            virt: config.kernel_text,
            size: NUCLEUS_SIZE,
        };
        let p2m = P2m::new(&*self.mem, si, platform.m2p, ONE_GIG)?;
        let mut backend = XenBackend::new(hv, p2m);
        let pt_base = si.pt_base(&*self.mem)?;
        let summary = {
            let mut pt = PageTables::adopt(
                &mut *self.mem,
                &mut backend,
                &mut alloc,
                &self.state.lists.installed,
                config,
                PhysicalAddress::new(pt_base),
            );
            pt.build(&nucleus, false, None)?
        };
        let shared_info = alloc
            .alloc(&mut *self.mem, &self.state.lists.installed, PAGE, PAGE)?
            .raw();
        xen::map_shared_info(backend.hypervisor(), shared_info, si.shared_info(&*self.mem)?)?;
        scratch.release(&mut backend, alloc.cursor().raw())?;

        let cursor = alloc.cursor().raw();
        let bi = &mut self.state.info;
        bi.next_paddr = cursor - ONE_GIG;
        bi.next_vaddr = cursor;
        bi.top_page_table = pt_base - ONE_GIG;
        bi.pt_window = summary.pt_window.raw();
        bi.pte_to_pt_window = summary.pte_to_pt_window.raw();
        bi.xen_start_info = si.address().raw();
        bi.shared_info = shared_info;
        bi.mb_version = loader.version();
        Ok(self.finish(features, &config))
    }

    /// Read the command line and the console and firmware hints, then bring
    /// up the console.
    fn console(&mut self, loader: &Loader) -> Result<(BootOptions, Console)> {
        let cmdline = loader.cmdline(&*self.mem)?;
        let line = CommandLine::read(&*self.mem, cmdline)?;
        let options = BootOptions::parse(&line)?;
        crate::io::log::configure(options.prom_debug, options.map_debug);
        debug!("Options: {:?}", options);

        let consinfo = loader.console_info(&*self.mem)?;
        self.firmware_tables(loader)?;

        let state = &mut *self.state;
        state.info.cmdline = cmdline.map_or(0, |a| a.raw());
        state.info.vesa_mode = consinfo.vesa_mode;
        if let Some(fb) = consinfo.framebuffer {
            state.framebuffer = fb;
            state.info.framebuffer_info = state.framebuffer_address();
        }

        let console = self.env.init_console(&self.state.info);
        info!("INITIALIZED console ({:?}).", console);
        Ok((options, console))
    }

    fn firmware_tables(&mut self, loader: &Loader) -> Result<()> {
        let fw = loader.firmware_tables(&*self.mem)?;
        let bi = &mut self.state.info;
        bi.acpi_rsdp = fw.acpi_rsdp;
        bi.smbios = fw.smbios;
        bi.uefi_systab = fw.uefi_systab;
        bi.uefi_arch = fw.uefi_arch;
        Ok(())
    }

    fn check_legacy(&self, loader: &Loader) -> Result<()> {
        let line = CommandLine::read(&*self.mem, loader.cmdline(&*self.mem)?)?;
        BootOptions::check_legacy(&line)
    }

    /// Build the memory lists from the loader's map, or from the basic
    /// sizes if there is no map.
    fn process_mmap(&mut self, loader: &Loader) -> Result<()> {
        let lists = &mut self.state.lists;
        let entries = loader.mmap_entries(&*self.mem)?;
        if entries > 0 {
            for i in 0..entries {
                lists.classify(loader.mmap_entry(&*self.mem, i)?)?;
            }
            lists.finish_map()?;
        } else if let Some((low, high)) = loader.basic_meminfo(&*self.mem)? {
            lists.from_basic_meminfo(low, high)?;
        } else {
            return Err(BootError::NoMemoryInfo);
        }
        info!("INITIALIZED memory lists (max_mem 0x{:x}).", lists.max_mem());
        Ok(())
    }

    /// Fill in the module table. On bare metal the allocator must stay
    /// clear of every module.
    fn record_modules(
        &mut self,
        loader: &Loader,
        mut alloc: Option<&mut BumpAllocator>,
    ) -> Result<()> {
        let count = loader.module_count(&*self.mem)?;
        if count > MAX_MODULES {
            return Err(BootError::TooManyModules(count));
        }

        for i in 0..count {
            let start = loader.module_start(&*self.mem, i)?;
            let end = loader.module_end(&*self.mem, i)?;
            if start > end {
                return Err(BootError::ModuleStartAfterEnd { index: i, start, end });
            }
            debug!("Module {}: 0x{:x} - 0x{:x}", i, start, end);
            self.state.modules[i] = ModuleDescriptor {
                addr: start,
                size: end - start,
            };
            if let Some(alloc) = &mut alloc {
                alloc.check_higher(end);
            }
        }

        self.state.info.modules = self.state.modules_address();
        self.state.info.module_cnt = count as u32;
        Ok(())
    }

    fn paging(&self, features: CpuFeatures, paravirtualized: bool) -> PagingConfig {
        let config = PagingConfig::new(
            features.contains(CpuFeatures::PAE),
            self.target.is_64bit(),
            features.contains(CpuFeatures::LARGE_PAGE),
            features.contains(CpuFeatures::GLOBAL),
            features.contains(CpuFeatures::PAT),
            self.target.kernel_text(paravirtualized),
        );
        if paravirtualized {
            config.for_xen()
        } else {
            config
        }
    }

    /// The pages the framebuffer covers, if there is one.
    fn framebuffer_range(&self) -> Option<Range> {
        let fb = &self.state.framebuffer;
        if fb.addr == 0 || fb.extent() == 0 {
            return None;
        }
        Some(Range::new(
            align_down(fb.addr, PAGE),
            align_up(fb.addr + fb.extent(), PAGE),
        ))
    }

    /// Fill in what's left of the handoff and tell the trampoline how to
    /// enter the kernel.
    fn finish(self, features: CpuFeatures, config: &PagingConfig) -> KernelEntry {
        let nx = features.contains(CpuFeatures::NX);
        let mut flags = HandoffFlags::empty();
        flags.set(HandoffFlags::USE_PAE, config.pae);
        flags.set(HandoffFlags::USE_NX, nx);
        flags.set(HandoffFlags::USE_GLOBAL, config.global_pages);
        flags.set(HandoffFlags::USE_LARGE_PAGE, config.large_pages);

        let state = self.state;
        state.info.phys_install = state.lists.installed.address();
        state.info.rsvdmem = state.lists.reserved.address();
        state.info.pcimem = state.lists.pci.address();
        state.info.kseg_size = KSEG_SIZE;
        state.info.use_pae = config.pae as u32;
        state.info.use_nx = nx as u32;
        state.info.use_pge = config.global_pages as u32;
        state.info.use_largepage = config.large_pages as u32;

        info!(
            "DONE bootstrap, entering kernel at 0x{:x} ({:?}).",
            config.kernel_text, flags
        );
        KernelEntry {
            entry_addr_low: config.kernel_text as u32,
            flags,
        }
    }
}

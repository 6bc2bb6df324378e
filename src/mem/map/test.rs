use super::{MemoryLists, MmapEntry};
use crate::consts::PCI_HI;
use crate::mem::memlist::MemList;
use crate::mem::size::{KB, MB, PAGE};

fn regions(l: &MemList) -> Vec<(u64, u64)> {
    l.entries().iter().map(|e| (e.addr, e.size)).collect()
}

fn build(entries: &[MmapEntry]) -> MemoryLists {
    let mut lists = MemoryLists::new();
    for e in entries {
        lists.classify(*e).unwrap();
    }
    lists.finish_map().unwrap();
    lists
}

fn count_in(l: &MemList, page: u64) -> usize {
    l.entries().iter().filter(|e| e.contains(page)).count()
}

#[test]
fn basic_meminfo_only() {
    let mut lists = MemoryLists::new();
    lists.from_basic_meminfo(640, 63 * 1024).unwrap();

    assert_eq!(
        regions(&lists.installed),
        vec![(0, 640 * KB), (MB, 63 * MB)]
    );
    assert_eq!(lists.pci.len(), 1);
    assert_eq!(lists.pci.entries()[0].addr, (64512 + 1024) * KB);
    assert_eq!(lists.pci.entries()[0].end(), PCI_HI);
    assert!(lists.reserved.is_empty());
}

#[test]
fn adjacent_usable_merge() {
    let lists = build(&[
        MmapEntry::new(0x100000, 0x100000, 1),
        MmapEntry::new(0x200000, 0x100000, 1),
    ]);
    assert_eq!(regions(&lists.installed), vec![(0x100000, 0x200000)]);
    assert_eq!(lists.max_mem(), 0x300000);
}

#[test]
fn unaligned_entries_shrink_to_pages() {
    let lists = build(&[
        MmapEntry::new(0, 0x9fc00, 1),
        MmapEntry::new(0x9fc00, 0x400, 2),
        MmapEntry::new(0xf0000, 0x10000, 2),
        MmapEntry::new(0x100800, 0x7f00000, 1),
    ]);
    assert_eq!(
        regions(&lists.installed),
        vec![(0, 0x9f000), (0x101000, 0x7eff000)]
    );
    // The sub-page reserved entry vanishes entirely.
    assert_eq!(regions(&lists.reserved), vec![(0xf0000, 0x10000)]);
}

#[test]
fn every_page_classified_once() {
    let raw = [
        MmapEntry::new(0, 0xa0000, 1),
        MmapEntry::new(0xa0000, 0x60000, 2),
        MmapEntry::new(0x100000, 0x700000, 1),
        MmapEntry::new(0x800000, 0x100000, 3),
        MmapEntry::new(0x900000, 0x200000, 1),
        MmapEntry::new(0xb00000, 0x100000, 1),
        MmapEntry::new(0xfec00000, 0x1000, 2),
    ];
    let lists = build(&raw);

    for e in raw.iter() {
        let mut page = e.base;
        while page < e.base + e.length {
            let (usable, other) = if e.entry_type == 1 {
                (1, 0)
            } else {
                (0, 1)
            };
            assert_eq!(count_in(&lists.installed, page), usable, "0x{:x}", page);
            assert_eq!(count_in(&lists.reserved, page), other, "0x{:x}", page);
            page += PAGE;
        }
    }

    for l in [&lists.installed, &lists.reserved, &lists.pci].iter() {
        for w in l.entries().windows(2) {
            assert!(w[0].end() < w[1].addr, "{} not sorted and merged", l.name());
        }
    }
}

#[test]
fn pci_avoids_memory() {
    let lists = build(&[
        MmapEntry::new(0, 0x9f000, 1),
        MmapEntry::new(0x100000, 0x3ff00000, 1),
        MmapEntry::new(0xe0000000, 0x10000000, 2),
        MmapEntry::new(0xfee00000, 0x1000, 2),
        MmapEntry::new(0x100000000, 0x40000000, 1),
    ]);

    assert_eq!(
        regions(&lists.pci),
        vec![
            (0x40000000, 0xe0000000 - 0x40000000),
            (0xf0000000, 0xfee00000 - 0xf0000000),
            (0xfee01000, PCI_HI - 0xfee01000),
        ]
    );
    for p in lists.pci.entries() {
        for other in lists.installed.entries().iter().chain(lists.reserved.entries()) {
            assert!(p.end() <= other.addr || other.end() <= p.addr);
        }
    }
}

#[test]
fn guest_owns_one_region() {
    let mut lists = MemoryLists::new();
    lists.guest(0x2_0000 * PAGE).unwrap();
    assert_eq!(regions(&lists.installed), vec![(0, 512 * MB)]);
    assert_eq!(lists.max_mem(), 512 * MB);
    assert!(lists.reserved.is_empty());
    assert!(lists.pci.is_empty());
}

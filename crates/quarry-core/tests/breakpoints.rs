//! Tests for the breakpoint bookkeeping tables

use quarry_core::breakpoints::{
    HardwareBreakpoint, HardwareBreakpointTable, SoftwareBreakpoint, SoftwareBreakpointTable, WatchKind,
};
use quarry_core::types::{Address, Tid};

fn software(address: u64) -> SoftwareBreakpoint
{
    SoftwareBreakpoint {
        address: Address::new(address),
        original: 0x1122_3344_5566_7788,
        patched: 0x1122_3344_5566_77cc,
        enabled: true,
    }
}

fn hardware(tid: i32, address: u64) -> HardwareBreakpoint
{
    HardwareBreakpoint {
        address: Address::new(address),
        tid: Tid(tid),
        kind: WatchKind::Write,
        length: 8,
        enabled: true,
    }
}

#[test]
fn test_software_table_keeps_ascending_address_order()
{
    let mut table = SoftwareBreakpointTable::new();
    table.insert(software(0x3000));
    table.insert(software(0x1000));
    table.insert(software(0x2000));
    table.insert(software(0x4000));

    let addresses: Vec<u64> = table.iter().map(|bp| bp.address.value()).collect();
    assert_eq!(addresses, vec![0x1000, 0x2000, 0x3000, 0x4000]);
}

#[test]
fn test_software_table_order_survives_removal()
{
    let mut table = SoftwareBreakpointTable::new();
    for address in [0x5000, 0x1000, 0x3000] {
        table.insert(software(address));
    }

    let removed = table.remove(Address::new(0x3000)).expect("record exists");
    assert_eq!(removed.address, Address::new(0x3000));

    let addresses: Vec<u64> = table.iter().map(|bp| bp.address.value()).collect();
    assert_eq!(addresses, vec![0x1000, 0x5000]);
}

#[test]
fn test_software_table_re_enable_does_not_duplicate()
{
    let mut table = SoftwareBreakpointTable::new();
    table.insert(software(0x1000));
    table.disable(Address::new(0x1000));

    // registration of a known address only flips it back on
    assert!(table.re_enable(Address::new(0x1000)));
    assert_eq!(table.len(), 1);
    assert!(table.find(Address::new(0x1000)).expect("record exists").enabled);

    assert!(!table.re_enable(Address::new(0x2000)));
}

#[test]
fn test_software_table_enable_disable_flags_only()
{
    let mut table = SoftwareBreakpointTable::new();
    table.insert(software(0x1000));

    assert!(table.disable(Address::new(0x1000)));
    let record = table.find(Address::new(0x1000)).expect("record exists");
    assert!(!record.enabled);
    // the stored words are untouched by toggling
    assert_eq!(record.original, 0x1122_3344_5566_7788);
    assert_eq!(record.patched, 0x1122_3344_5566_77cc);

    assert!(table.enable(Address::new(0x1000)));
    assert!(table.find(Address::new(0x1000)).expect("record exists").enabled);

    assert!(!table.disable(Address::new(0x9999)));
}

#[test]
fn test_software_table_remove_missing_is_none()
{
    let mut table = SoftwareBreakpointTable::new();
    assert!(table.remove(Address::new(0x1000)).is_none());
    assert!(table.is_empty());
}

#[test]
fn test_hardware_table_keyed_by_tid_and_address()
{
    let mut table = HardwareBreakpointTable::new();
    table.insert(hardware(10, 0x1000));
    table.insert(hardware(11, 0x1000));

    // the same address on two threads is two distinct records
    assert_eq!(table.len(), 2);
    assert!(table.contains(Tid(10), Address::new(0x1000)));
    assert!(table.contains(Tid(11), Address::new(0x1000)));
    assert!(!table.contains(Tid(12), Address::new(0x1000)));

    let record = table.find(Tid(10), Address::new(0x1000)).expect("record exists");
    assert_eq!(record.kind, WatchKind::Write);
    assert_eq!(record.length, 8);
}

#[test]
fn test_hardware_table_remove()
{
    let mut table = HardwareBreakpointTable::new();
    table.insert(hardware(10, 0x1000));
    table.insert(hardware(10, 0x2000));

    let removed = table.remove(Tid(10), Address::new(0x1000)).expect("record exists");
    assert_eq!(removed.address, Address::new(0x1000));
    assert_eq!(table.len(), 1);
    assert!(table.remove(Tid(10), Address::new(0x1000)).is_none());
}

#[test]
fn test_watch_kind_display()
{
    assert_eq!(WatchKind::Execute.to_string(), "x");
    assert_eq!(WatchKind::Write.to_string(), "w");
    assert_eq!(WatchKind::ReadWrite.to_string(), "rw");
}

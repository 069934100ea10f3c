//! Contract tests for the 16-byte atomic cell.

use ortak::{AtomicDword, Dword};
use std::sync::Arc;
use std::thread;

// ============================================================================
// Dword value type
// ============================================================================

#[test]
fn lanes_round_trip() {
    let word = Dword::from_lanes(0x1122_3344_5566_7788, 0x99AA_BBCC_DDEE_FF00);
    assert_eq!(word.lo(), 0x1122_3344_5566_7788);
    assert_eq!(word.hi(), 0x99AA_BBCC_DDEE_FF00);

    assert_eq!(word.lane::<u8>(0), 0x88);
    assert_eq!(word.lane::<u8>(7), 0x11);
    assert_eq!(word.lane::<u16>(0), 0x7788);
    assert_eq!(word.lane::<u32>(1), 0x1122_3344);
    assert_eq!(word.lane::<u64>(1), 0x99AA_BBCC_DDEE_FF00);
}

#[test]
fn with_lane_replaces_only_the_lane() {
    let word = Dword::from_lanes(u64::MAX, u64::MAX);
    let patched = word.with_lane::<u16>(2, 0);
    assert_eq!(patched.lane::<u16>(2), 0);
    assert_eq!(patched.lane::<u16>(1), u16::MAX);
    assert_eq!(patched.lane::<u16>(3), u16::MAX);
    assert_eq!(patched.hi(), u64::MAX);
}

#[test]
fn zero_is_zero() {
    assert_eq!(Dword::ZERO.bits(), 0);
    assert_eq!(Dword::default(), Dword::ZERO);
}

// ============================================================================
// AtomicDword, single-threaded contract
// ============================================================================

#[test]
fn load_store_swap() {
    let cell = AtomicDword::new(Dword::ZERO);
    assert_eq!(cell.load(), Dword::ZERO);

    let value = Dword::from_lanes(1, 2);
    cell.store(value);
    assert_eq!(cell.load(), value);

    let next = Dword::from_lanes(3, 4);
    assert_eq!(cell.swap(next), value);
    assert_eq!(cell.load(), next);
}

#[test]
fn compare_exchange_success_and_failure() {
    let cell = AtomicDword::new(Dword::from_lanes(10, 0));

    let mut expected = Dword::from_lanes(10, 0);
    assert!(cell.compare_exchange(&mut expected, Dword::from_lanes(11, 0)));
    assert_eq!(cell.load(), Dword::from_lanes(11, 0));

    // Stale expected: fails and publishes the observed value.
    let mut stale = Dword::from_lanes(10, 0);
    assert!(!cell.compare_exchange(&mut stale, Dword::from_lanes(12, 0)));
    assert_eq!(stale, Dword::from_lanes(11, 0));
    assert_eq!(cell.load(), Dword::from_lanes(11, 0));
}

#[test]
fn fetch_add_returns_previous_cell() {
    let cell = AtomicDword::new(Dword::from_lanes(0xFF, 7));
    let previous = cell.fetch_add_at::<u8>(1, 0);
    assert_eq!(previous, Dword::from_lanes(0xFF, 7));
    // Wraps at the lane width without spilling into the neighbor byte.
    assert_eq!(cell.load(), Dword::from_lanes(0x00, 7));
}

#[test]
fn fetch_sub_wraps_at_lane_width() {
    let cell = AtomicDword::new(Dword::ZERO);
    cell.fetch_sub_at::<u16>(1, 3);
    assert_eq!(cell.load().lane::<u16>(3), u16::MAX);
    assert_eq!(cell.load().lane::<u16>(2), 0);
    assert_eq!(cell.load().hi(), 0);
}

#[test]
fn swap_at_replaces_lane() {
    let cell = AtomicDword::new(Dword::from_lanes(0, u64::MAX));
    let previous = cell.swap_at::<u32>(0xDEAD_BEEF, 1);
    assert_eq!(previous, Dword::from_lanes(0, u64::MAX));
    assert_eq!(cell.load().lane::<u32>(1), 0xDEAD_BEEF);
    assert_eq!(cell.load().lane::<u32>(0), 0);
    assert_eq!(cell.load().hi(), u64::MAX);
}

#[test]
fn sub_word_ops_cover_every_width() {
    let cell = AtomicDword::new(Dword::ZERO);
    cell.fetch_add_at::<u8>(1, 15);
    cell.fetch_add_at::<u16>(1, 0);
    cell.fetch_add_at::<u32>(1, 2);
    cell.fetch_add_at::<u64>(1, 0);
    let word = cell.load();
    assert_eq!(word.lane::<u8>(15), 1);
    assert_eq!(word.lane::<u32>(2), 1);
    // u16 lane 0 and u64 lane 0 both landed in the low word.
    assert_eq!(word.lo(), 2);
}

#[test]
#[should_panic(expected = "sub-word index out of bounds")]
fn out_of_bounds_lane_panics() {
    let cell = AtomicDword::new(Dword::ZERO);
    cell.fetch_add_at::<u64>(1, 2);
}

// ============================================================================
// Concurrent sub-word atomicity
// ============================================================================

#[test]
fn concurrent_disjoint_lanes_do_not_interfere() {
    const PER_THREAD: u64 = 10_000;

    let cell = Arc::new(AtomicDword::new(Dword::ZERO));
    let mut handles = vec![];

    for lane in 0..8usize {
        let cell = cell.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                cell.fetch_add_at::<u16>(1, lane);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let word = cell.load();
    for lane in 0..8usize {
        assert_eq!(word.lane::<u16>(lane), PER_THREAD as u16);
    }
}

#[test]
fn concurrent_same_lane_loses_no_updates() {
    const THREADS: usize = 8;
    const PER_THREAD: u32 = 25_000;

    let cell = Arc::new(AtomicDword::new(Dword::ZERO));
    let mut handles = vec![];

    for _ in 0..THREADS {
        let cell = cell.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                cell.fetch_add_at::<u32>(1, 2);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cell.load().lane::<u32>(2), THREADS as u32 * PER_THREAD);
    assert_eq!(cell.load().lo(), 0);
}

#[test]
fn concurrent_add_sub_cancels() {
    const PER_THREAD: u64 = 20_000;

    let cell = Arc::new(AtomicDword::new(Dword::from_lanes(0, 500)));
    let adder = {
        let cell = cell.clone();
        thread::spawn(move || {
            for _ in 0..PER_THREAD {
                cell.fetch_add_at::<u64>(3, 1);
            }
        })
    };
    let subber = {
        let cell = cell.clone();
        thread::spawn(move || {
            for _ in 0..PER_THREAD {
                cell.fetch_sub_at::<u64>(3, 1);
            }
        })
    };
    adder.join().unwrap();
    subber.join().unwrap();

    assert_eq!(cell.load().hi(), 500);
    assert_eq!(cell.load().lo(), 0);
}

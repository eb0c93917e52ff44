//! Window FIFO tests: ordering, capacity, and peeks.

use vpsim_core::core::fifo::Fifo;

#[test]
fn test_push_pop_preserves_order() {
    let mut fifo: Fifo<u64> = Fifo::new(4);
    fifo.push(10);
    fifo.push(20);
    fifo.push(30);
    assert_eq!(fifo.pop(), 10);
    assert_eq!(fifo.pop(), 20);
    assert_eq!(fifo.pop(), 30);
    assert!(fifo.is_empty());
}

#[test]
fn test_peeks_do_not_consume() {
    let mut fifo: Fifo<u64> = Fifo::new(4);
    fifo.push(1);
    fifo.push(2);
    assert_eq!(*fifo.peek_head(), 1);
    assert_eq!(*fifo.peek_tail(), 2);
    assert_eq!(fifo.len(), 2);
}

#[test]
fn test_wraparound() {
    let mut fifo: Fifo<u64> = Fifo::new(2);
    fifo.push(1);
    fifo.push(2);
    assert!(fifo.is_full());
    assert_eq!(fifo.pop(), 1);
    fifo.push(3);
    assert_eq!(*fifo.peek_head(), 2);
    assert_eq!(*fifo.peek_tail(), 3);
    assert_eq!(fifo.pop(), 2);
    assert_eq!(fifo.pop(), 3);
}

#[test]
#[should_panic(expected = "FIFO overflow")]
fn test_overflow_panics() {
    let mut fifo: Fifo<u64> = Fifo::new(1);
    fifo.push(1);
    fifo.push(2);
}

#[test]
#[should_panic(expected = "FIFO underflow")]
fn test_underflow_panics() {
    let mut fifo: Fifo<u64> = Fifo::new(1);
    let _ = fifo.pop();
}

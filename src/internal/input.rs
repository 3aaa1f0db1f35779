//! Raw input bytes handed from IRQ callbacks to the rest of the kernel.
//!
//! The keyboard (IRQ 1) and mouse (IRQ 12) callbacks only read the data
//! port and push the byte here; decoding happens outside interrupt context.

use conquer_once::spin::OnceCell;
use crossbeam_queue::ArrayQueue;
use log::warn;

use super::config::{MOUSE_QUEUE_SIZE, SCANCODE_QUEUE_SIZE};

/// A bounded byte queue filled from interrupt context
pub struct InputQueue {
    name: &'static str,
    capacity: usize,
    queue: OnceCell<ArrayQueue<u8>>,
}

impl InputQueue {
    /// An uninitialized queue; pushes are dropped until [`InputQueue::init`]
    pub const fn new(name: &'static str, capacity: usize) -> Self {
        InputQueue {
            name,
            capacity,
            queue: OnceCell::uninit(),
        }
    }

    /// Allocate the queue storage. Later calls do nothing.
    pub fn init(&self) {
        let _ = self.queue.try_init_once(|| ArrayQueue::new(self.capacity));
    }

    /// Queue one byte. Called from interrupt handlers, so it never blocks
    /// or allocates; a full or missing queue drops the byte.
    pub fn push(&self, byte: u8) {
        match self.queue.try_get() {
            Ok(queue) => {
                if queue.push(byte).is_err() {
                    warn!("{} queue full; dropping input", self.name);
                }
            }
            Err(_) => warn!("{} queue uninitialized", self.name),
        }
    }

    /// Take the oldest byte
    pub fn pop(&self) -> Option<u8> {
        self.queue.try_get().ok()?.pop()
    }

    /// Bytes waiting
    pub fn len(&self) -> usize {
        self.queue.try_get().map_or(0, |queue| queue.len())
    }

    /// Nothing waiting?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static SCANCODES: InputQueue = InputQueue::new("scancode", SCANCODE_QUEUE_SIZE);
static MOUSE_BYTES: InputQueue = InputQueue::new("mouse", MOUSE_QUEUE_SIZE);

/// Allocate both input queues. Needs the heap.
pub fn init_queues() {
    SCANCODES.init();
    MOUSE_BYTES.init();
}

/// Queue a keyboard scancode
pub fn push_scancode(scancode: u8) {
    SCANCODES.push(scancode);
}

/// Next keyboard scancode, oldest first
pub fn pop_scancode() -> Option<u8> {
    SCANCODES.pop()
}

/// Queue a mouse packet byte
pub fn push_mouse_byte(byte: u8) {
    MOUSE_BYTES.push(byte);
}

/// Next mouse packet byte, oldest first
pub fn pop_mouse_byte() -> Option<u8> {
    MOUSE_BYTES.pop()
}

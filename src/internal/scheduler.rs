//! Process table and round-robin ready queue.
//!
//! The table is an arena of [`Process`] slots indexed by position; the ready
//! queue is threaded through the slots' `next` links. Slot 0 always holds the
//! idle process, the context that booted the kernel. Nothing here touches
//! the machine: [`Scheduler::schedule`] picks the next process and returns a
//! [`Switch`] that the caller performs once it has released its locks.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use log::{info, trace, warn};

use super::config::{DEFAULT_TIME_SLICE, MAX_PROCESSES, PROCESS_STACK_SIZE, STACK_ALIGN};
use super::context::{MachineContext, SavedContext};
use super::heap::{Heap, HeapError};

/// Process identifier. 0 is the idle process, created processes count up from 1.
pub type Pid = u32;

/// pid of the idle process
pub const IDLE_PID: Pid = 0;

const IDLE_SLOT: usize = 0;

/// Lifecycle of a process table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// the slot holds no process
    Unused,
    /// waiting in the ready queue
    Ready,
    /// owns the CPU
    Running,
    /// waiting for an event, not queued
    Blocked,
    /// exited; the stack is gone and the slot can be reused
    Zombie,
}

/// Stack memory owned by a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    /// lowest address, as returned by the heap
    pub base: usize,
    /// size in bytes
    pub size: usize,
}

impl Stack {
    /// One past the highest address
    pub fn top(&self) -> usize {
        self.base + self.size
    }

    /// Does `addr` lie inside the stack?
    pub fn contains(&self, addr: usize) -> bool {
        self.base <= addr && addr < self.top()
    }
}

/// Process control block
#[derive(Debug, Clone, Copy)]
pub struct Process {
    /// process id
    pub pid: Pid,
    /// lifecycle state
    pub state: ProcessState,
    /// scheduling priority, advisory
    pub priority: u32,
    /// time-slice counter, advisory
    pub time_slice: u32,
    /// stack allocation, `None` for the idle process and after exit
    pub stack: Option<Stack>,
    /// where the process resumes
    pub context: SavedContext,
    /// status passed to `exit`
    pub exit_status: Option<i32>,
    next: Option<usize>,
}

impl Process {
    const UNUSED: Process = Process {
        pid: 0,
        state: ProcessState::Unused,
        priority: 0,
        time_slice: 0,
        stack: None,
        context: SavedContext {
            stack_pointer: 0,
            frame_pointer: 0,
        },
        exit_status: None,
        next: None,
    };

    fn is_reusable(&self) -> bool {
        matches!(self.state, ProcessState::Unused | ProcessState::Zombie)
    }
}

/// Failures of [`Scheduler::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// every slot holds a live process
    NoFreeSlot,
    /// the heap could not provide a stack
    StackAllocation(HeapError),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::NoFreeSlot => write!(f, "no free process slots"),
            ProcessError::StackAllocation(err) => write!(f, "failed to allocate stack: {}", err),
        }
    }
}

/// A pending machine switch between two table slots
#[derive(Debug)]
pub struct Switch {
    /// pid being suspended
    pub from_pid: Pid,
    /// pid being resumed
    pub to_pid: Pid,
    /// context to save into
    pub from: *mut SavedContext,
    /// context to restore
    pub to: *const SavedContext,
}

/// Fixed-capacity process table with a FIFO ready queue
pub struct Scheduler<M, const N: usize = MAX_PROCESSES> {
    table: [Process; N],
    current: usize,
    head: Option<usize>,
    tail: Option<usize>,
    next_pid: Pid,
    _machine: PhantomData<fn() -> M>,
}

impl<M: MachineContext, const N: usize> Scheduler<M, N> {
    /// A table holding only the running idle process
    pub const fn new() -> Self {
        let mut table = [Process::UNUSED; N];
        table[IDLE_SLOT].pid = IDLE_PID;
        table[IDLE_SLOT].state = ProcessState::Running;
        table[IDLE_SLOT].time_slice = DEFAULT_TIME_SLICE;
        Scheduler {
            table,
            current: IDLE_SLOT,
            head: None,
            tail: None,
            next_pid: 1,
            _machine: PhantomData,
        }
    }

    /// Clear the table, reinstall the idle process as running and empty the
    /// ready queue. Stacks still held by old entries are not returned to the
    /// heap.
    pub fn init(&mut self) {
        *self = Self::new();
        info!("Process system initialized");
    }

    /// Create a process that starts at `entry` with a fresh stack from `heap`.
    ///
    /// The new process is appended to the ready queue and runs once
    /// everything queued before it has had its turn.
    pub fn create<const H: usize>(
        &mut self,
        heap: &mut Heap<H>,
        entry: fn(),
        priority: u32,
    ) -> Result<Pid, ProcessError> {
        let Some(slot) = (1..N).find(|&slot| self.table[slot].is_reusable()) else {
            warn!("process_create: no free process slots");
            return Err(ProcessError::NoFreeSlot);
        };

        let base = heap
            .allocate_aligned(PROCESS_STACK_SIZE, STACK_ALIGN)
            .map_err(|err| {
                warn!("process_create: failed to allocate stack: {}", err);
                ProcessError::StackAllocation(err)
            })?;
        let stack = Stack {
            base: base.as_ptr() as usize,
            size: PROCESS_STACK_SIZE,
        };

        let pid = self.next_pid;
        self.next_pid += 1;
        self.table[slot] = Process {
            pid,
            state: ProcessState::Ready,
            priority,
            time_slice: DEFAULT_TIME_SLICE,
            stack: Some(stack),
            // the stack was just allocated for this process alone
            context: unsafe { M::initial(stack.top(), entry) },
            exit_status: None,
            next: None,
        };
        self.push_back(slot);

        info!("Created process {}", pid);
        Ok(pid)
    }

    /// Pick the next ready process.
    ///
    /// Returns `None` when the ready queue is empty. Otherwise the head of
    /// the queue becomes the running process and the previous one, unless it
    /// is exiting, goes to the tail of the queue.
    pub fn schedule(&mut self) -> Option<Switch> {
        let next = self.pop_front()?;
        let prev = self.current;

        if self.table[prev].state == ProcessState::Running {
            self.table[prev].state = ProcessState::Ready;
            self.push_back(prev);
        }

        self.table[next].state = ProcessState::Running;
        self.current = next;

        let (from_pid, to_pid) = (self.table[prev].pid, self.table[next].pid);
        trace!("switch {} -> {}", from_pid, to_pid);
        Some(Switch {
            from_pid,
            to_pid,
            from: &raw mut self.table[prev].context,
            to: &raw const self.table[next].context,
        })
    }

    /// Terminate the running process: free its stack, mark it a zombie and
    /// schedule. The caller must perform the returned switch and never come
    /// back; `None` means nothing else is ready to run.
    pub fn exit<const H: usize>(&mut self, heap: &mut Heap<H>, status: i32) -> Option<Switch> {
        let process = &mut self.table[self.current];
        info!("Process {} exited with status {}", process.pid, status);

        if let Some(stack) = process.stack.take() {
            if let Some(base) = NonNull::new(stack.base as *mut u8) {
                // the heap keeps its table outside the heap, so the stack we
                // are still running on is not written to by this
                let _ = heap.free(base);
            }
        }
        process.state = ProcessState::Zombie;
        process.exit_status = Some(status);

        self.schedule()
    }

    /// pid of the running process
    pub fn current(&self) -> Pid {
        self.table[self.current].pid
    }

    /// Control block of the running process
    pub fn current_process(&self) -> &Process {
        &self.table[self.current]
    }

    /// Control block of a live or zombie process
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.table
            .iter()
            .find(|process| process.state != ProcessState::Unused && process.pid == pid)
    }

    /// pids in the ready queue, head first
    pub fn ready_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let slot = cursor?;
            cursor = self.table[slot].next;
            Some(self.table[slot].pid)
        })
    }

    /// Number of processes waiting to run
    pub fn ready_len(&self) -> usize {
        self.ready_pids().count()
    }

    /// Number of processes that have not exited, idle included
    pub fn live_count(&self) -> usize {
        self.table
            .iter()
            .filter(|process| !process.is_reusable())
            .count()
    }

    fn push_back(&mut self, slot: usize) {
        self.table[slot].next = None;
        match self.tail {
            Some(tail) => self.table[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn pop_front(&mut self) -> Option<usize> {
        let slot = self.head?;
        self.head = self.table[slot].next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(slot)
    }
}

impl<M: MachineContext, const N: usize> Default for Scheduler<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Lays out contexts without touching any stack
    struct Recorded;

    impl MachineContext for Recorded {
        unsafe fn initial(stack_top: usize, _entry: fn()) -> SavedContext {
            SavedContext {
                stack_pointer: stack_top,
                frame_pointer: stack_top,
            }
        }

        unsafe fn switch(_from: *mut SavedContext, _to: *const SavedContext) {}
    }

    fn worker() {}

    struct Setup<const N: usize> {
        _memory: Vec<u64>,
        heap: Heap<32>,
        scheduler: Scheduler<Recorded, N>,
    }

    fn setup<const N: usize>(stacks: usize) -> Setup<N> {
        let bytes = stacks * PROCESS_STACK_SIZE + STACK_ALIGN;
        let mut memory = vec![0u64; bytes / 8];
        let mut heap = Heap::empty();
        unsafe { heap.init(memory.as_mut_ptr() as usize, bytes).unwrap() };
        Setup {
            _memory: memory,
            heap,
            scheduler: Scheduler::new(),
        }
    }

    #[test]
    fn starts_with_idle_running() {
        let s = setup::<4>(1);
        assert_eq!(s.scheduler.current(), IDLE_PID);
        assert_eq!(s.scheduler.current_process().state, ProcessState::Running);
        assert_eq!(s.scheduler.ready_len(), 0);
    }

    #[test]
    fn schedule_with_empty_queue_is_noop() {
        let mut s = setup::<4>(1);
        assert!(s.scheduler.schedule().is_none());
        assert_eq!(s.scheduler.current(), IDLE_PID);
    }

    #[test]
    fn create_queues_ready_process_with_stack() {
        let mut s = setup::<4>(2);
        let pid = s.scheduler.create(&mut s.heap, worker, 3).unwrap();
        assert_eq!(pid, 1);

        let process = s.scheduler.process(pid).unwrap();
        assert_eq!(process.state, ProcessState::Ready);
        assert_eq!(process.priority, 3);
        assert_eq!(process.time_slice, DEFAULT_TIME_SLICE);

        let stack = process.stack.unwrap();
        assert_eq!(stack.base % STACK_ALIGN, 0);
        assert_eq!(process.context.stack_pointer, stack.top());
        let base = NonNull::new(stack.base as *mut u8).unwrap();
        assert_eq!(s.heap.block_size(base), Some(PROCESS_STACK_SIZE));
        assert_eq!(s.scheduler.ready_pids().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn yield_moves_runner_to_tail() {
        let mut s = setup::<4>(2);
        let p1 = s.scheduler.create(&mut s.heap, worker, 1).unwrap();
        let p2 = s.scheduler.create(&mut s.heap, worker, 1).unwrap();

        let switch = s.scheduler.schedule().unwrap();
        assert_eq!((switch.from_pid, switch.to_pid), (IDLE_PID, p1));

        // p1 yields
        let switch = s.scheduler.schedule().unwrap();
        assert_eq!((switch.from_pid, switch.to_pid), (p1, p2));
        assert_eq!(s.scheduler.current(), p2);
        assert_eq!(s.scheduler.process(p1).unwrap().state, ProcessState::Ready);
        assert_eq!(s.scheduler.ready_pids().collect::<Vec<_>>(), vec![IDLE_PID, p1]);
    }

    #[test]
    fn switch_points_at_table_contexts() {
        let mut s = setup::<4>(1);
        let pid = s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        let expected = s.scheduler.process(pid).unwrap().context;

        let switch = s.scheduler.schedule().unwrap();
        assert_eq!(unsafe { *switch.to }, expected);
    }

    #[test]
    fn exit_frees_stack_and_never_runs_again() {
        let mut s = setup::<4>(1);
        let pid = s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        let stack = s.scheduler.process(pid).unwrap().stack.unwrap();
        s.scheduler.schedule().unwrap();

        let switch = s.scheduler.exit(&mut s.heap, 7).unwrap();
        assert_eq!((switch.from_pid, switch.to_pid), (pid, IDLE_PID));

        let zombie = s.scheduler.process(pid).unwrap();
        assert_eq!(zombie.state, ProcessState::Zombie);
        assert_eq!(zombie.exit_status, Some(7));
        assert!(zombie.stack.is_none());
        assert_eq!(s.heap.used(), 0);

        // the zombie is not queued, so idle keeps the CPU
        assert!(s.scheduler.schedule().is_none());
        assert_eq!(s.scheduler.current(), IDLE_PID);

        let reused = s.heap.allocate(PROCESS_STACK_SIZE).unwrap();
        let end = reused.as_ptr() as usize + PROCESS_STACK_SIZE;
        assert!(stack.contains(end - 1) || stack.contains(reused.as_ptr() as usize));
    }

    #[test]
    fn exit_of_last_worker_returns_to_idle() {
        let mut s = setup::<4>(2);
        let p1 = s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        let p2 = s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        s.scheduler.schedule().unwrap();

        let switch = s.scheduler.exit(&mut s.heap, 0).unwrap();
        assert_eq!((switch.from_pid, switch.to_pid), (p1, p2));
        let switch = s.scheduler.exit(&mut s.heap, 0).unwrap();
        assert_eq!((switch.from_pid, switch.to_pid), (p2, IDLE_PID));
        assert_eq!(s.scheduler.live_count(), 1);
        assert_eq!(s.scheduler.ready_len(), 0);
    }

    #[test]
    fn slots_run_out() {
        let mut s = setup::<3>(4);
        s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        assert_eq!(
            s.scheduler.create(&mut s.heap, worker, 0),
            Err(ProcessError::NoFreeSlot)
        );
        assert_eq!(s.scheduler.live_count(), 3);
    }

    #[test]
    fn stack_exhaustion_is_reported() {
        let mut s = setup::<8>(1);
        s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        assert_eq!(
            s.scheduler.create(&mut s.heap, worker, 0),
            Err(ProcessError::StackAllocation(HeapError::OutOfMemory))
        );
        assert_eq!(s.scheduler.ready_len(), 1);
    }

    #[test]
    fn zombie_slot_is_reused_with_fresh_pid() {
        let mut s = setup::<2>(1);
        let first = s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        s.scheduler.schedule().unwrap();
        s.scheduler.exit(&mut s.heap, 0).unwrap();

        let second = s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        assert!(second > first);
        assert!(s.scheduler.process(first).is_none());
        assert_eq!(s.scheduler.process(second).unwrap().state, ProcessState::Ready);
    }

    #[test]
    fn init_resets_table() {
        let mut s = setup::<4>(2);
        s.scheduler.create(&mut s.heap, worker, 0).unwrap();
        s.scheduler.schedule().unwrap();
        s.scheduler.init();
        assert_eq!(s.scheduler.current(), IDLE_PID);
        assert_eq!(s.scheduler.ready_len(), 0);
        assert_eq!(s.scheduler.live_count(), 1);
    }
}

use alloc::boxed::Box;
use lazy_static::lazy_static;
use log::{debug, warn};
use spin::Mutex;
use x86_64::instructions::port::Port;
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptStackFrame, PageFaultErrorCode};

use super::config::{IRQ_LINES, PIC_1_OFFSET, PIC_2_OFFSET, YIELD_VECTOR};
use super::idt::{GateAttributes, VectorTable};
use super::irq::{self, InterruptController, IrqHandler, IrqTable};
use super::pic::Pic8259;
use super::{cpu, gdt, input, process};

/// Lines unmasked at boot: timer, keyboard, cascade and mouse
const ENABLED_LINES: [u8; 4] = [0, 1, 2, 12];

const PS2_DATA_PORT: u16 = 0x60;

/// Callbacks for the sixteen hardware lines
static IRQ_TABLE: Mutex<IrqTable> = Mutex::new(IrqTable::new());

/// The cascaded PICs
pub static PICS: Mutex<Pic8259> = Mutex::new(Pic8259::new());

lazy_static! {
    static ref IDT: VectorTable = {
        let mut idt = VectorTable::new();
        let selector = gdt::code_selector();
        let gate = GateAttributes::KERNEL_INTERRUPT;

        idt.set_gate(0, divide_error_handler as usize as u64, selector, gate);
        idt.set_gate(3, breakpoint_handler as usize as u64, selector, gate);
        idt.set_gate(6, invalid_opcode_handler as usize as u64, selector, gate);
        idt.set_gate(8, double_fault_handler as usize as u64, selector, gate);
        *idt.entry_mut(8) = idt.entry(8).with_stack_index(gdt::double_fault_stack_index());
        idt.set_gate(13, general_protection_fault_handler as usize as u64, selector, gate);
        idt.set_gate(14, page_fault_handler as usize as u64, selector, gate);

        for (line, stub) in IRQ_STUBS.iter().enumerate() {
            idt.set_gate(PIC_1_OFFSET + line as u8, *stub as usize as u64, selector, gate);
        }

        idt.set_gate(YIELD_VECTOR, yield_handler as usize as u64, selector, gate);
        idt
    };
}

/// Load the vector table and remap the PICs to vectors 32..48.
///
/// Interrupts stay disabled; the caller enables them once the heap and the
/// scheduler are up.
pub fn init() {
    IDT.load();
    debug!("IDT loaded");

    let mut pics = PICS.lock();
    pics.remap(PIC_1_OFFSET, PIC_2_OFFSET);
    for line in 0..IRQ_LINES as u8 {
        pics.set_line_masked(line, !ENABLED_LINES.contains(&line));
    }
    debug!("PIC remapped to {}/{}", PIC_1_OFFSET, PIC_2_OFFSET);
}

/// Register the callback for `irq`. Lines outside 0..16 are ignored.
pub fn install_handler(irq: u8, handler: IrqHandler) {
    cpu::without_interrupts(|| IRQ_TABLE.lock().install_handler(irq, handler));
}

/// Mask or unmask one hardware line
pub fn set_line_enabled(irq: u8, enabled: bool) {
    cpu::without_interrupts(|| PICS.lock().set_line_masked(irq, !enabled));
}

/// Acknowledge `irq` by hand, for handlers that manage their own timing
pub fn send_eoi(irq: u8) {
    cpu::without_interrupts(|| irq::send_eoi(&mut *PICS.lock(), irq));
}

/// Route keyboard and mouse bytes into the input queues
pub fn install_default_handlers() {
    input::init_queues();
    install_handler(1, Box::new(|| input::push_scancode(read_ps2_data())));
    install_handler(12, Box::new(|| input::push_mouse_byte(read_ps2_data())));
}

fn read_ps2_data() -> u8 {
    unsafe { Port::<u8>::new(PS2_DATA_PORT).read() }
}

fn dispatch(irq: u8) {
    IRQ_TABLE.lock().dispatch(irq, &mut *PICS.lock());
}

macro_rules! irq_handler {
    ($handler:ident, $irq:expr) => {
        extern "x86-interrupt" fn $handler(_: InterruptStackFrame) {
            dispatch($irq);
        }
    };
}

irq_handler!(irq0_handler, 0);
irq_handler!(irq1_handler, 1);
irq_handler!(irq2_handler, 2);
irq_handler!(irq3_handler, 3);
irq_handler!(irq4_handler, 4);
irq_handler!(irq5_handler, 5);
irq_handler!(irq6_handler, 6);
irq_handler!(irq7_handler, 7);
irq_handler!(irq8_handler, 8);
irq_handler!(irq9_handler, 9);
irq_handler!(irq10_handler, 10);
irq_handler!(irq11_handler, 11);
irq_handler!(irq12_handler, 12);
irq_handler!(irq13_handler, 13);
irq_handler!(irq14_handler, 14);
irq_handler!(irq15_handler, 15);

const IRQ_STUBS: [extern "x86-interrupt" fn(InterruptStackFrame); IRQ_LINES] = [
    irq0_handler,
    irq1_handler,
    irq2_handler,
    irq3_handler,
    irq4_handler,
    irq5_handler,
    irq6_handler,
    irq7_handler,
    irq8_handler,
    irq9_handler,
    irq10_handler,
    irq11_handler,
    irq12_handler,
    irq13_handler,
    irq14_handler,
    irq15_handler,
];

extern "x86-interrupt" fn yield_handler(_stack_frame: InterruptStackFrame) {
    process::schedule();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    warn!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: DIVIDE ERROR\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: INVALID OPCODE\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: GENERAL PROTECTION FAULT\n{:#?}\nError code: {:#X}",
        stack_frame, error_code
    );
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    panic!(
        "EXCEPTION: PAGE FAULT at {:?}\n{:#?}\nError code: {:?}",
        Cr2::read(),
        stack_frame,
        error_code
    );
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

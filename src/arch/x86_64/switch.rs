/*
 * x86_64 Context Switch
 *
 * Saves the running register context into the outgoing thread's
 * `SwitchFrame` and resumes the incoming thread from its frame via `iretq`.
 *
 * The outgoing side captures every general-purpose register plus an
 * interrupt-return frame whose saved rip points at the local resume label,
 * so a thread switched out here continues at that label when it is next
 * dispatched. The incoming side works for both cases the scheduler
 * produces: a frame saved by an earlier pass through this routine, and a
 * frame seeded at spawn (rip pointing at the thread entry trampoline,
 * argument registers pre-loaded).
 *
 * Entered with interrupts disabled. `iretq` reloads rflags from the
 * incoming frame, so the interrupt flag comes back exactly as the incoming
 * thread saved it (or as its spawn seed specified).
 *
 * Field offsets below match `SwitchFrame`; the struct is `#[repr(C)]` for
 * exactly this reason.
 */

use core::arch::naked_asm;

use crate::scheduler::thread::SwitchFrame;

/// Switch from the context owning `prev` to the one saved in `next`.
///
/// # Safety
/// Interrupts are disabled; `prev` and `next` point at live, distinct
/// frames; `next` holds a resumable context.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_frames(prev: *mut SwitchFrame, next: *const SwitchFrame) {
    naked_asm!(
        // rdi = prev frame, rsi = next frame.
        //
        // Save general-purpose registers into prev. rdi/rsi are stored too
        // for layout completeness; they are caller-saved and dead across
        // this call.
        "mov [rdi + 0],   r15",
        "mov [rdi + 8],   r14",
        "mov [rdi + 16],  r13",
        "mov [rdi + 24],  r12",
        "mov [rdi + 32],  r11",
        "mov [rdi + 40],  r10",
        "mov [rdi + 48],  r9",
        "mov [rdi + 56],  r8",
        "mov [rdi + 64],  rsi",
        "mov [rdi + 72],  rdi",
        "mov [rdi + 80],  rbp",
        "mov [rdi + 88],  rdx",
        "mov [rdi + 96],  rcx",
        "mov [rdi + 104], rbx",
        "mov [rdi + 112], rax",
        // Interrupt-return frame: resume at 2f, on the current stack, with
        // the current flags and segments.
        "lea rax, [rip + 2f]",
        "mov [rdi + 120], rax", // rip
        "mov rax, cs",
        "mov [rdi + 128], rax",
        "pushfq",
        "pop rax",
        "mov [rdi + 136], rax", // rflags
        "mov [rdi + 144], rsp", // rsp: points at our return address
        "mov rax, ss",
        "mov [rdi + 152], rax",
        // Resume next: point rsp at its frame, reload the registers, then
        // let iretq consume the interrupt-return block at offset 120.
        "mov rsp, rsi",
        "mov r15, [rsp + 0]",
        "mov r14, [rsp + 8]",
        "mov r13, [rsp + 16]",
        "mov r12, [rsp + 24]",
        "mov r11, [rsp + 32]",
        "mov r10, [rsp + 40]",
        "mov r9,  [rsp + 48]",
        "mov r8,  [rsp + 56]",
        "mov rbp, [rsp + 80]",
        "mov rdx, [rsp + 88]",
        "mov rcx, [rsp + 96]",
        "mov rbx, [rsp + 104]",
        "mov rax, [rsp + 112]",
        "mov rdi, [rsp + 72]",
        "mov rsi, [rsp + 64]",
        "add rsp, 120",
        "iretq",
        // Resume point for a thread saved above: its rsp was restored by
        // iretq, so the return address is back on top of the stack.
        "2:",
        "ret",
    )
}

//! 8253/8254 Programmable Interval Timer, channel 2, used only as a
//! busy-wait reference counter candidate: channel 2's gate/speaker-status
//! wiring lets a caller busy-wait a known interval by polling, without
//! needing the PIC or IDT installed at all.

use x86_64::instructions::port::Port;

/// PIT input clock, fixed in hardware — the reason this candidate needs no
/// calibration against anything else.
const PIT_CLOCK_HZ: u64 = 1_193_182;

const PIT_CHANNEL2_DATA_PORT: u16 = 0x42;
const PIT_COMMAND_PORT: u16 = 0x43;
const PC_SPEAKER_PORT: u16 = 0x61;

const CHANNEL2_MODE0_LOBYTE_HIBYTE: u8 = 0b1011_0000;
const SPEAKER_GATE_ENABLE: u8 = 0x01;
const SPEAKER_OUTPUT_DISABLE: u8 = 0x02;
const SPEAKER_STATUS_OUTPUT_BIT: u8 = 0x20;

/// Busy-waits approximately `micros` using PIT channel 2 in mode 0
/// (interrupt-on-terminal-count), polling the output through the PC
/// speaker status port rather than taking an actual interrupt. Saturates at
/// roughly 54.9ms (`u16::MAX` ticks at the fixed PIT clock) — callers
/// needing longer delays call this in a loop.
pub fn busy_wait_micros(micros: u64) {
	let count = ((PIT_CLOCK_HZ * micros) / 1_000_000).clamp(1, u16::MAX as u64) as u16;
	unsafe {
		let mut command: Port<u8> = Port::new(PIT_COMMAND_PORT);
		let mut data: Port<u8> = Port::new(PIT_CHANNEL2_DATA_PORT);
		let mut gate: Port<u8> = Port::new(PC_SPEAKER_PORT);

		command.write(CHANNEL2_MODE0_LOBYTE_HIBYTE);
		data.write((count & 0xFF) as u8);
		data.write((count >> 8) as u8);

		let current = gate.read();
		gate.write((current & !SPEAKER_OUTPUT_DISABLE) | SPEAKER_GATE_ENABLE);

		while gate.read() & SPEAKER_STATUS_OUTPUT_BIT == 0 {
			core::hint::spin_loop();
		}
	}
}

//! UART output sink for [`crate::logging`], built on the `uart_16550` crate.
//! Device-driver concerns like hypercall ports or shell input buffering are
//! out of scope; this is a write-only sink.

use hermit_sync::InterruptTicketMutex;
use uart_16550::SerialPort;

const COM1_BASE: u16 = 0x3F8;

static COM1: InterruptTicketMutex<Option<SerialPort>> = InterruptTicketMutex::new(None);

pub fn init() {
	let mut port = unsafe { SerialPort::new(COM1_BASE) };
	port.init();
	*COM1.lock() = Some(port);
}

pub fn write_bytes(bytes: &[u8]) {
	let mut guard = COM1.lock();
	if let Some(port) = guard.as_mut() {
		for &b in bytes {
			port.send(b);
		}
	}
}

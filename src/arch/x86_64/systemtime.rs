//! Wallclock time source (CMOS real-time clock). Selection among this, the
//! TSC reference counter, and the APIC periodic tick happens in
//! `crate::time`; this module only supplies the raw read.

use x86_64::instructions::port::Port;

const CMOS_COMMAND_PORT: u16 = 0x70;
const CMOS_DATA_PORT: u16 = 0x71;

const CMOS_SECONDS: u8 = 0x00;
const CMOS_MINUTES: u8 = 0x02;
const CMOS_HOURS: u8 = 0x04;
const CMOS_DAY: u8 = 0x07;
const CMOS_MONTH: u8 = 0x08;
const CMOS_YEAR: u8 = 0x09;
const CMOS_STATUS_A: u8 = 0x0A;
const CMOS_UPDATE_IN_PROGRESS: u8 = 0x80;

unsafe fn cmos_read(reg: u8) -> u8 {
	unsafe {
		let mut cmd: Port<u8> = Port::new(CMOS_COMMAND_PORT);
		let mut data: Port<u8> = Port::new(CMOS_DATA_PORT);
		cmd.write(reg);
		data.read()
	}
}

fn bcd_to_bin(v: u8) -> u8 {
	(v & 0x0F) + ((v >> 4) * 10)
}

/// Reads the current wallclock time as seconds since the Unix epoch
/// (only the recent-past case matters for this crate: no Y2K/century
/// handling beyond assuming the 21st century).
pub fn read_wallclock_unix_seconds() -> u64 {
	// Busy-wait for any in-progress update to finish, then read twice to
	// detect a tear; accept the result once two reads agree.
	loop {
		unsafe {
			while cmos_read(CMOS_STATUS_A) & CMOS_UPDATE_IN_PROGRESS != 0 {
				core::hint::spin_loop();
			}
		}
		let first = read_fields();
		let second = read_fields();
		if first == second {
			return to_unix_seconds(first);
		}
	}
}

#[derive(PartialEq, Eq)]
struct Fields {
	sec: u8,
	min: u8,
	hour: u8,
	day: u8,
	month: u8,
	year: u8,
}

fn read_fields() -> Fields {
	unsafe {
		Fields {
			sec: bcd_to_bin(cmos_read(CMOS_SECONDS)),
			min: bcd_to_bin(cmos_read(CMOS_MINUTES)),
			hour: bcd_to_bin(cmos_read(CMOS_HOURS)),
			day: bcd_to_bin(cmos_read(CMOS_DAY)),
			month: bcd_to_bin(cmos_read(CMOS_MONTH)),
			year: bcd_to_bin(cmos_read(CMOS_YEAR)),
		}
	}
}

fn to_unix_seconds(f: Fields) -> u64 {
	let year = 2000 + u64::from(f.year);
	let days_since_epoch = days_from_civil(year, u64::from(f.month), u64::from(f.day));
	days_since_epoch * 86_400 + u64::from(f.hour) * 3600 + u64::from(f.min) * 60 + u64::from(f.sec)
}

/// Howard Hinnant's civil-calendar-to-days algorithm.
fn days_from_civil(y: u64, m: u64, d: u64) -> u64 {
	let y = if m <= 2 { y - 1 } else { y };
	let era = y / 400;
	let yoe = y - era * 400;
	let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
	let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
	era * 146_097 + doe - 719_468
}

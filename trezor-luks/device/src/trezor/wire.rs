//! Trezor v1 HID framing.
//!
//! Every report is 64 bytes. The first report of a message starts with
//! `?##`, the message type (u16 BE) and the payload length (u32 BE);
//! continuation reports start with a single `?`. Unused bytes are zero.

use zeroize::Zeroizing;

use crate::error::{DeviceError, Result};

pub const REPORT_SIZE: usize = 64;
const MAGIC: u8 = b'?';
const FIRST_HEADER_SIZE: usize = 9;
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

pub type Report = [u8; REPORT_SIZE];

/// Raw report transport under the message framing.
pub trait ReportIo {
    fn write_report(&mut self, report: &Report) -> Result<()>;

    /// Fill `report` with the next report from the device. Blocks.
    fn read_report(&mut self, report: &mut Report) -> Result<()>;
}

impl ReportIo for hidapi::HidDevice {
    fn write_report(&mut self, report: &Report) -> Result<()> {
        // hidapi expects the report id in front; Trezor uses unnumbered reports.
        let mut buf = Zeroizing::new([0u8; REPORT_SIZE + 1]);
        buf[1..].copy_from_slice(report);
        let written = self
            .write(&buf[..])
            .map_err(|err| DeviceError::Transport(format!("HID write failed: {err}")))?;
        check_written(written, buf.len())
    }

    fn read_report(&mut self, report: &mut Report) -> Result<()> {
        let read = self
            .read(report)
            .map_err(|err| DeviceError::Transport(format!("HID read failed: {err}")))?;
        if read != REPORT_SIZE {
            return Err(DeviceError::Transport(format!(
                "short HID read: {read} of {REPORT_SIZE} bytes"
            )));
        }
        Ok(())
    }
}

fn check_written(written: usize, expected: usize) -> Result<()> {
    if written < expected {
        return Err(DeviceError::Transport(format!(
            "short HID write: {written} of {expected} bytes"
        )));
    }
    Ok(())
}

/// Split a message into reports.
pub fn encode_reports(kind: u16, payload: &[u8]) -> Result<Vec<Zeroizing<Report>>> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(DeviceError::Protocol(format!(
            "message payload {} exceeds limit {MAX_MESSAGE_SIZE}",
            payload.len()
        )));
    }

    let mut first = Zeroizing::new([0u8; REPORT_SIZE]);
    first[..3].copy_from_slice(b"?##");
    first[3..5].copy_from_slice(&kind.to_be_bytes());
    first[5..9].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    let head_len = payload.len().min(REPORT_SIZE - FIRST_HEADER_SIZE);
    first[FIRST_HEADER_SIZE..FIRST_HEADER_SIZE + head_len].copy_from_slice(&payload[..head_len]);

    let mut reports = vec![first];
    for chunk in payload[head_len..].chunks(REPORT_SIZE - 1) {
        let mut report = Zeroizing::new([0u8; REPORT_SIZE]);
        report[0] = MAGIC;
        report[1..1 + chunk.len()].copy_from_slice(chunk);
        reports.push(report);
    }
    Ok(reports)
}

pub fn write_message<T>(io: &mut T, kind: u16, payload: &[u8]) -> Result<()>
where
    T: ReportIo + ?Sized,
{
    for report in encode_reports(kind, payload)? {
        io.write_report(&report)?;
    }
    Ok(())
}

/// Read one complete message: `(message type, payload)`.
pub fn read_message<T>(io: &mut T) -> Result<(u16, Zeroizing<Vec<u8>>)>
where
    T: ReportIo + ?Sized,
{
    let mut report = Zeroizing::new([0u8; REPORT_SIZE]);
    io.read_report(&mut report)?;
    if &report[..3] != b"?##" {
        return Err(DeviceError::Protocol(
            "response does not start with a message header".into(),
        ));
    }

    let kind = u16::from_be_bytes([report[3], report[4]]);
    let len = u32::from_be_bytes([report[5], report[6], report[7], report[8]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(DeviceError::Protocol(format!(
            "response length {len} exceeds limit {MAX_MESSAGE_SIZE}"
        )));
    }

    let mut payload = Zeroizing::new(Vec::with_capacity(len));
    let head_len = len.min(REPORT_SIZE - FIRST_HEADER_SIZE);
    payload.extend_from_slice(&report[FIRST_HEADER_SIZE..FIRST_HEADER_SIZE + head_len]);

    while payload.len() < len {
        io.read_report(&mut report)?;
        if report[0] != MAGIC {
            return Err(DeviceError::Protocol(
                "continuation report is missing its marker".into(),
            ));
        }
        let take = (len - payload.len()).min(REPORT_SIZE - 1);
        payload.extend_from_slice(&report[1..1 + take]);
    }

    Ok((kind, payload))
}

//! # Wire Format
//!
//! The one message peers exchange: a partial event log, a snapshot of the
//! sender's time table, and the sender id. Bincode is the preferred
//! encoding; CBOR and JSON are also accepted on decode so tooling can
//! inject human-readable messages without negotiating a content type.
//!
//! Frames on the socket are a 4-byte big-endian length prefix followed by
//! the encoded message. The transport must preserve message boundaries and
//! must never collapse duplicate event records; the length prefix gives us
//! the former and encoding the event list verbatim gives us the latter.
//! Delivery may still duplicate or reorder whole messages, which the
//! replication engine tolerates by design of its merge.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::appointment::NodeId;
use crate::event::EventRecord;
use crate::time_table::TimeTable;

/// Upper bound on a single encoded message. Anything larger is treated as
/// corrupt and the connection is dropped.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// One anti-entropy gossip message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Partial log: the events the sender believes the receiver lacks,
    /// in the sender's log order.
    pub events: Vec<EventRecord>,
    /// Value snapshot of the sender's time table at send time.
    pub table: TimeTable,
    /// Id of the sending node.
    pub sender: NodeId,
}

impl SyncMessage {
    pub fn to_bincode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn from_bincode(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }

    pub fn to_cbor(&self) -> serde_cbor::Result<Vec<u8>> {
        serde_cbor::to_vec(self)
    }

    pub fn from_cbor(bytes: &[u8]) -> serde_cbor::Result<Self> {
        serde_cbor::from_slice(bytes)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Attempt to decode with bincode, then CBOR, then JSON.
    pub fn decode_any(bytes: &[u8]) -> Result<Self> {
        if let Ok(m) = Self::from_bincode(bytes) {
            return Ok(m);
        }
        if let Ok(m) = Self::from_cbor(bytes) {
            return Ok(m);
        }
        if let Ok(m) = Self::from_json(bytes) {
            return Ok(m);
        }
        Err(anyhow!(
            "failed to decode sync message with bincode, CBOR, or JSON"
        ))
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes exceeds the limit", payload.len());
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `None` on a clean end of
/// stream before the prefix; anything else incomplete or oversized is an
/// error and the caller should close the connection.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncReadExt + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        bail!("incoming frame of {} bytes exceeds the limit", len);
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::{Appointment, SlotTime, Weekday};

    fn sample() -> SyncMessage {
        let appt = Appointment::new(
            "lunch",
            Weekday::Friday,
            SlotTime::parse("12:00pm").unwrap(),
            SlotTime::parse("1:00pm").unwrap(),
            vec![0, 1],
        )
        .unwrap();
        SyncMessage {
            events: vec![
                EventRecord::insert(0, 1, appt.clone()),
                EventRecord::delete(0, 2, appt),
            ],
            table: TimeTable::new(2),
            sender: 0,
        }
    }

    #[test]
    fn all_codecs_roundtrip() {
        let msg = sample();
        let b = msg.to_bincode().unwrap();
        let c = msg.to_cbor().unwrap();
        let j = msg.to_json().unwrap();
        assert_eq!(SyncMessage::from_bincode(&b).unwrap(), msg);
        assert_eq!(SyncMessage::from_cbor(&c).unwrap(), msg);
        assert_eq!(SyncMessage::from_json(&j).unwrap(), msg);
        assert_eq!(SyncMessage::decode_any(&b).unwrap(), msg);
        assert_eq!(SyncMessage::decode_any(&c).unwrap(), msg);
        assert_eq!(SyncMessage::decode_any(&j).unwrap(), msg);
    }

    #[test]
    fn duplicate_events_survive_encoding() {
        let mut msg = sample();
        let dup = msg.events[0].clone();
        msg.events.push(dup);
        let bytes = msg.to_bincode().unwrap();
        let decoded = SyncMessage::from_bincode(&bytes).unwrap();
        assert_eq!(decoded.events.len(), 3);
    }

    #[test]
    fn garbage_is_rejected() {
        let garbage = b"\xff\xfenot a sync message";
        assert!(SyncMessage::decode_any(garbage).is_err());
    }

    #[tokio::test]
    async fn frames_roundtrip_over_a_buffer() {
        let msg = sample();
        let payload = msg.to_bincode().unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).await.unwrap();
        // Two frames back to back stay separate.
        write_frame(&mut buf, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let first = read_frame(&mut cursor).await.unwrap().unwrap();
        let second = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(SyncMessage::decode_any(&first).unwrap(), msg);
        assert_eq!(SyncMessage::decode_any(&second).unwrap(), msg);
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }
}

//! Recording container format.
//!
//! Append-only layout, finalized by a trailer (nothing is patched in place,
//! so any `Writable` works, including sinks that cannot seek):
//!
//! ```text
//! [40-byte header]
//! [packet: 32-byte packet header | payload] ...
//! [index: 24-byte entry per presented packet] ...
//! [32-byte footer]
//! ```
//!
//! Header:
//! ```text
//! [0-3]    "DCRC"
//! [4-5]    version
//! [6]      stream kind (0 front, 1 back, 2 combined)
//! [7]      flags (bit 0: audio track present)
//! [8-11]   output width
//! [12-15]  output height
//! [16]     pixel format
//! [17]     video codec
//! [18-19]  reserved
//! [20-23]  target bitrate (bit/s)
//! [24-31]  session start (us)
//! [32-35]  audio sample rate
//! [36-37]  audio channels
//! [38-39]  reserved
//! ```
//!
//! Packet header:
//! ```text
//! [0]      track (0 video, 1 audio)
//! [1]      pixel format (video only)
//! [2-3]    reserved
//! [4-7]    width (video only)
//! [8-11]   height (video only)
//! [12-19]  pts (us)
//! [20-27]  duration (us, audio only)
//! [28-31]  payload length
//! ```
//!
//! Only packets listed in the index are part of the presentation. The index
//! holds every packet with `pts <= session end`, so samples written after
//! the end chosen at finalize are present on disk but never presented.
//! A file without a valid footer is unfinalized.

use crate::models::error::ContainerError;
use crate::models::media::{AudioFormat, PixelFormat, StreamKind, Timestamp};

pub const MAGIC: &[u8; 4] = b"DCRC";
pub const FOOTER_MAGIC: &[u8; 4] = b"DCRE";
pub const VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 40;
pub const PACKET_HEADER_SIZE: usize = 32;
pub const INDEX_ENTRY_SIZE: usize = 24;
pub const FOOTER_SIZE: usize = 32;

const FLAG_AUDIO: u8 = 0b0000_0001;

/// Codec of the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// Frames stored exactly as delivered.
    Raw,
}

impl VideoCodec {
    fn id(self) -> u8 {
        match self {
            Self::Raw => 0,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Raw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    fn id(self) -> u8 {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Video),
            1 => Some(Self::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub stream: StreamKind,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub codec: VideoCodec,
    pub bitrate: u32,
    pub session_start: Timestamp,
    pub audio: Option<AudioFormat>,
}

impl ContainerHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(MAGIC);
        out[4..6].copy_from_slice(&VERSION.to_le_bytes());
        out[6] = self.stream.id();
        out[7] = if self.audio.is_some() { FLAG_AUDIO } else { 0 };
        out[8..12].copy_from_slice(&self.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.height.to_le_bytes());
        out[16] = self.pixel_format.id();
        out[17] = self.codec.id();
        out[20..24].copy_from_slice(&self.bitrate.to_le_bytes());
        out[24..32].copy_from_slice(&self.session_start.as_micros().to_le_bytes());
        if let Some(audio) = self.audio {
            out[32..36].copy_from_slice(&audio.sample_rate.to_le_bytes());
            out[36..38].copy_from_slice(&audio.channels.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ContainerError::Truncated("header"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(ContainerError::BadMagic("header"));
        }
        let version = read_u16(bytes, 4);
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let stream = StreamKind::from_id(bytes[6])
            .ok_or_else(|| ContainerError::Corrupt(format!("unknown stream kind {}", bytes[6])))?;
        let pixel_format = PixelFormat::from_id(bytes[16])
            .ok_or_else(|| ContainerError::Corrupt(format!("unknown pixel format {}", bytes[16])))?;
        let codec = VideoCodec::from_id(bytes[17])
            .ok_or_else(|| ContainerError::Corrupt(format!("unknown codec {}", bytes[17])))?;
        let audio = (bytes[7] & FLAG_AUDIO != 0).then(|| AudioFormat {
            sample_rate: read_u32(bytes, 32),
            channels: read_u16(bytes, 36),
        });

        Ok(Self {
            stream,
            width: read_u32(bytes, 8),
            height: read_u32(bytes, 12),
            pixel_format,
            codec,
            bitrate: read_u32(bytes, 20),
            session_start: Timestamp::from_micros(read_i64(bytes, 24)),
            audio,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub track: TrackKind,
    pub pixel_format: Option<PixelFormat>,
    pub width: u32,
    pub height: u32,
    pub pts: Timestamp,
    pub duration_us: i64,
    pub payload_len: u32,
}

impl PacketHeader {
    pub fn video(pixel_format: PixelFormat, width: u32, height: u32, pts: Timestamp, payload_len: u32) -> Self {
        Self {
            track: TrackKind::Video,
            pixel_format: Some(pixel_format),
            width,
            height,
            pts,
            duration_us: 0,
            payload_len,
        }
    }

    pub fn audio(pts: Timestamp, duration_us: i64, payload_len: u32) -> Self {
        Self {
            track: TrackKind::Audio,
            pixel_format: None,
            width: 0,
            height: 0,
            pts,
            duration_us,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut out = [0u8; PACKET_HEADER_SIZE];
        out[0] = self.track.id();
        out[1] = self.pixel_format.map(PixelFormat::id).unwrap_or(0);
        out[4..8].copy_from_slice(&self.width.to_le_bytes());
        out[8..12].copy_from_slice(&self.height.to_le_bytes());
        out[12..20].copy_from_slice(&self.pts.as_micros().to_le_bytes());
        out[20..28].copy_from_slice(&self.duration_us.to_le_bytes());
        out[28..32].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(ContainerError::Truncated("packet header"));
        }
        let track = TrackKind::from_id(bytes[0])
            .ok_or_else(|| ContainerError::Corrupt(format!("unknown track {}", bytes[0])))?;
        let pixel_format = match track {
            TrackKind::Video => Some(
                PixelFormat::from_id(bytes[1])
                    .ok_or_else(|| ContainerError::Corrupt(format!("unknown pixel format {}", bytes[1])))?,
            ),
            TrackKind::Audio => None,
        };
        Ok(Self {
            track,
            pixel_format,
            width: read_u32(bytes, 4),
            height: read_u32(bytes, 8),
            pts: Timestamp::from_micros(read_i64(bytes, 12)),
            duration_us: read_i64(bytes, 20),
            payload_len: read_u32(bytes, 28),
        })
    }
}

/// Location of one presented packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub pts: Timestamp,
    pub track: TrackKind,
    pub payload_len: u32,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut out = [0u8; INDEX_ENTRY_SIZE];
        out[0..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.pts.as_micros().to_le_bytes());
        out[16] = self.track.id();
        out[20..24].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < INDEX_ENTRY_SIZE {
            return Err(ContainerError::Truncated("index entry"));
        }
        let track = TrackKind::from_id(bytes[16])
            .ok_or_else(|| ContainerError::Corrupt(format!("unknown track {}", bytes[16])))?;
        Ok(Self {
            offset: read_u64(bytes, 0),
            pts: Timestamp::from_micros(read_i64(bytes, 8)),
            track,
            payload_len: read_u32(bytes, 20),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerFooter {
    pub session_end: Timestamp,
    pub video_packets: u32,
    pub audio_packets: u32,
    pub index_offset: u64,
    pub index_entries: u32,
}

impl ContainerFooter {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[0..8].copy_from_slice(&self.session_end.as_micros().to_le_bytes());
        out[8..12].copy_from_slice(&self.video_packets.to_le_bytes());
        out[12..16].copy_from_slice(&self.audio_packets.to_le_bytes());
        out[16..24].copy_from_slice(&self.index_offset.to_le_bytes());
        out[24..28].copy_from_slice(&self.index_entries.to_le_bytes());
        out[28..32].copy_from_slice(FOOTER_MAGIC);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < FOOTER_SIZE {
            return Err(ContainerError::Truncated("footer"));
        }
        if &bytes[28..32] != FOOTER_MAGIC {
            return Err(ContainerError::Unfinalized);
        }
        Ok(Self {
            session_end: Timestamp::from_micros(read_i64(bytes, 0)),
            video_packets: read_u32(bytes, 8),
            audio_packets: read_u32(bytes, 12),
            index_offset: read_u64(bytes, 16),
            index_entries: read_u32(bytes, 24),
        })
    }
}

/// Encode the trailer (index followed by footer) that finalizes a stream.
pub fn encode_trailer(index: &[IndexEntry], index_offset: u64, session_end: Timestamp) -> Vec<u8> {
    let video_packets = index.iter().filter(|e| e.track == TrackKind::Video).count() as u32;
    let footer = ContainerFooter {
        session_end,
        video_packets,
        audio_packets: index.len() as u32 - video_packets,
        index_offset,
        index_entries: index.len() as u32,
    };

    let mut out = Vec::with_capacity(index.len() * INDEX_ENTRY_SIZE + FOOTER_SIZE);
    for entry in index {
        out.extend_from_slice(&entry.encode());
    }
    out.extend_from_slice(&footer.encode());
    out
}

/// One presented packet borrowed from a container buffer.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

/// Validating reader for a finalized container.
pub struct ContainerReader<'a> {
    header: ContainerHeader,
    footer: ContainerFooter,
    packets: Vec<Packet<'a>>,
}

impl<'a> ContainerReader<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ContainerError> {
        let header = ContainerHeader::decode(bytes)?;
        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(ContainerError::Unfinalized);
        }
        let footer = ContainerFooter::decode(&bytes[bytes.len() - FOOTER_SIZE..])?;

        let index_start = footer.index_offset as usize;
        let index_len = footer.index_entries as usize * INDEX_ENTRY_SIZE;
        if index_start < HEADER_SIZE || index_start + index_len != bytes.len() - FOOTER_SIZE {
            return Err(ContainerError::Corrupt("index does not end at footer".into()));
        }

        let mut packets = Vec::with_capacity(footer.index_entries as usize);
        for chunk in bytes[index_start..index_start + index_len].chunks_exact(INDEX_ENTRY_SIZE) {
            let entry = IndexEntry::decode(chunk)?;
            let offset = entry.offset as usize;
            if offset < HEADER_SIZE || offset + PACKET_HEADER_SIZE > index_start {
                return Err(ContainerError::Corrupt(format!("packet offset {} out of range", offset)));
            }
            let packet_header = PacketHeader::decode(&bytes[offset..offset + PACKET_HEADER_SIZE])?;
            let payload_start = offset + PACKET_HEADER_SIZE;
            let payload_end = payload_start + packet_header.payload_len as usize;
            if payload_end > index_start {
                return Err(ContainerError::Truncated("packet payload"));
            }
            if packet_header.pts != entry.pts || packet_header.track != entry.track {
                return Err(ContainerError::Corrupt(format!("index entry at {} disagrees with packet", offset)));
            }
            packets.push(Packet {
                header: packet_header,
                payload: &bytes[payload_start..payload_end],
            });
        }

        let video = packets.iter().filter(|p| p.header.track == TrackKind::Video).count() as u32;
        if video != footer.video_packets || packets.len() as u32 - video != footer.audio_packets {
            return Err(ContainerError::Corrupt("footer packet counts disagree with index".into()));
        }

        Ok(Self {
            header,
            footer,
            packets,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn footer(&self) -> &ContainerFooter {
        &self.footer
    }

    pub fn packets(&self) -> &[Packet<'a>] {
        &self.packets
    }

    pub fn video_packets(&self) -> impl Iterator<Item = &Packet<'a>> {
        self.packets.iter().filter(|p| p.header.track == TrackKind::Video)
    }

    pub fn audio_packets(&self) -> impl Iterator<Item = &Packet<'a>> {
        self.packets.iter().filter(|p| p.header.track == TrackKind::Audio)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.footer.session_end - self.header.session_start).as_secs_f64()
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn read_i64(bytes: &[u8], at: usize) -> i64 {
    read_u64(bytes, at) as i64
}

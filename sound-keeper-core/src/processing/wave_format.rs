/// Wave format blob utilities.
///
/// Parses the `WAVEFORMATEX` / `WAVEFORMATEXTENSIBLE` structures the audio
/// engine hands out (mix format, device output format) and patches the
/// sample-rate fields before stream initialisation.
///
/// Layout (little-endian):
/// ```text
/// [0-1]    format tag (1 = PCM, 3 = IEEE float, 0xFFFE = extensible)
/// [2-3]    channels
/// [4-7]    samples per second
/// [8-11]   average bytes per second = samples per second * block align
/// [12-13]  block align (bytes per frame)
/// [14-15]  bits per sample (container size)
/// [16-17]  extra size (22 for extensible)
/// [18-19]  valid bits per sample        (extensible only)
/// [20-23]  channel mask                 (extensible only)
/// [24-39]  sub-format GUID              (extensible only)
/// ```
use crate::models::error::KeeperError;

/// Size of the base `WAVEFORMATEX` structure without the extra-size field.
pub const BASE_FORMAT_SIZE: usize = 16;
/// Size of a complete `WAVEFORMATEXTENSIBLE` structure.
pub const EXTENSIBLE_FORMAT_SIZE: usize = 40;

pub const FORMAT_TAG_PCM: u16 = 0x0001;
pub const FORMAT_TAG_IEEE_FLOAT: u16 = 0x0003;
pub const FORMAT_TAG_EXTENSIBLE: u16 = 0xFFFE;

const GUID_TAIL: [u8; 12] = [0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71];

/// Sub-format GUID for integer PCM, as raw bytes.
pub const SUBTYPE_PCM: [u8; 16] = sub_format_guid(FORMAT_TAG_PCM);
/// Sub-format GUID for IEEE float, as raw bytes.
pub const SUBTYPE_IEEE_FLOAT: [u8; 16] = sub_format_guid(FORMAT_TAG_IEEE_FLOAT);

const fn sub_format_guid(tag: u16) -> [u8; 16] {
    let tag = tag.to_le_bytes();
    let mut guid = [0u8; 16];
    guid[0] = tag[0];
    guid[1] = tag[1];
    let mut i = 0;
    while i < GUID_TAIL.len() {
        guid[4 + i] = GUID_TAIL[i];
        i += 1;
    }
    guid
}

/// Sample encodings the generator can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleEncoding {
    #[default]
    Unknown,
    Int16,
    /// Packed 3-byte samples.
    Int24,
    Int32,
    Float32,
}

impl SampleEncoding {
    /// Bytes one sample of this encoding occupies in a frame.
    pub fn sample_bytes(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Int32 | Self::Float32 => 4,
        }
    }
}

/// The parts of a wave format the renderer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixFormat {
    pub channels: u16,
    pub sample_rate: u32,
    /// Frame stride in bytes.
    pub block_align: u16,
    pub encoding: SampleEncoding,
}

impl std::fmt::Display for MixFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}ch {}Hz", self.encoding, self.channels, self.sample_rate)
    }
}

/// An owned copy of a wave format blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveFormat {
    bytes: Vec<u8>,
}

impl WaveFormat {
    /// Copy and validate a raw format blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeeperError> {
        if bytes.len() < BASE_FORMAT_SIZE {
            return Err(KeeperError::UnsupportedFormat(format!(
                "format blob too short: {} bytes",
                bytes.len()
            )));
        }
        let format = Self { bytes: bytes.to_vec() };
        if format.format_tag() == FORMAT_TAG_EXTENSIBLE && bytes.len() < EXTENSIBLE_FORMAT_SIZE {
            return Err(KeeperError::UnsupportedFormat(format!(
                "extensible format blob too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(format)
    }

    /// Build an extensible format for the given encoding, as the engine reports
    /// shared-mode mix formats.
    pub fn extensible(encoding: SampleEncoding, channels: u16, sample_rate: u32) -> Self {
        let container_bits = (encoding.sample_bytes() * 8) as u16;
        let block_align = channels * encoding.sample_bytes() as u16;
        let sub_format = match encoding {
            SampleEncoding::Float32 => SUBTYPE_IEEE_FLOAT,
            _ => SUBTYPE_PCM,
        };

        let mut bytes = vec![0u8; EXTENSIBLE_FORMAT_SIZE];
        bytes[0..2].copy_from_slice(&FORMAT_TAG_EXTENSIBLE.to_le_bytes());
        bytes[2..4].copy_from_slice(&channels.to_le_bytes());
        bytes[4..8].copy_from_slice(&sample_rate.to_le_bytes());
        bytes[8..12].copy_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        bytes[12..14].copy_from_slice(&block_align.to_le_bytes());
        bytes[14..16].copy_from_slice(&container_bits.to_le_bytes());
        bytes[16..18].copy_from_slice(&22u16.to_le_bytes());
        bytes[18..20].copy_from_slice(&container_bits.to_le_bytes());
        bytes[24..40].copy_from_slice(&sub_format);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format_tag(&self) -> u16 {
        self.u16_at(0)
    }

    pub fn channels(&self) -> u16 {
        self.u16_at(2)
    }

    pub fn sample_rate(&self) -> u32 {
        self.u32_at(4)
    }

    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.u32_at(8)
    }

    pub fn block_align(&self) -> u16 {
        self.u16_at(12)
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.u16_at(14)
    }

    /// Sub-format GUID bytes of an extensible format.
    pub fn sub_format(&self) -> Option<[u8; 16]> {
        if self.format_tag() != FORMAT_TAG_EXTENSIBLE {
            return None;
        }
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&self.bytes[24..40]);
        Some(guid)
    }

    /// Classify the sample encoding from the format tag and container size.
    pub fn encoding(&self) -> SampleEncoding {
        let tag = self.format_tag();
        let sub_format = self.sub_format();
        let is_float = tag == FORMAT_TAG_IEEE_FLOAT || sub_format == Some(SUBTYPE_IEEE_FLOAT);
        let is_pcm = tag == FORMAT_TAG_PCM || sub_format == Some(SUBTYPE_PCM);

        match (is_float, is_pcm, self.bits_per_sample()) {
            (true, _, 32) => SampleEncoding::Float32,
            (false, true, 16) => SampleEncoding::Int16,
            (false, true, 24) => SampleEncoding::Int24,
            (false, true, 32) => SampleEncoding::Int32,
            _ => SampleEncoding::Unknown,
        }
    }

    pub fn mix_format(&self) -> MixFormat {
        MixFormat {
            channels: self.channels(),
            sample_rate: self.sample_rate(),
            block_align: self.block_align(),
            encoding: self.encoding(),
        }
    }

    /// Patch sample rate (offset 4) and the derived average byte rate (offset 8).
    ///
    /// Block align is per frame and does not change with the rate.
    pub fn with_sample_rate(&mut self, sample_rate: u32) {
        let avg_bytes = sample_rate.saturating_mul(u32::from(self.block_align()));
        self.bytes[4..8].copy_from_slice(&sample_rate.to_le_bytes());
        self.bytes[8..12].copy_from_slice(&avg_bytes.to_le_bytes());
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    fn u32_at(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_format(tag: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut bytes = vec![0u8; 18];
        bytes[0..2].copy_from_slice(&tag.to_le_bytes());
        bytes[2..4].copy_from_slice(&channels.to_le_bytes());
        bytes[4..8].copy_from_slice(&rate.to_le_bytes());
        bytes[8..12].copy_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
        bytes[12..14].copy_from_slice(&block_align.to_le_bytes());
        bytes[14..16].copy_from_slice(&bits.to_le_bytes());
        bytes
    }

    #[test]
    fn sub_format_guids_match_ksdataformat() {
        assert_eq!(
            SUBTYPE_IEEE_FLOAT,
            [0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71]
        );
        assert_eq!(SUBTYPE_PCM[0], 0x01);
    }

    #[test]
    fn plain_tags_classify_by_bit_depth() {
        let pcm16 = WaveFormat::from_bytes(&plain_format(FORMAT_TAG_PCM, 2, 44100, 16)).unwrap();
        assert_eq!(pcm16.encoding(), SampleEncoding::Int16);
        let pcm24 = WaveFormat::from_bytes(&plain_format(FORMAT_TAG_PCM, 2, 44100, 24)).unwrap();
        assert_eq!(pcm24.encoding(), SampleEncoding::Int24);
        let float = WaveFormat::from_bytes(&plain_format(FORMAT_TAG_IEEE_FLOAT, 2, 48000, 32)).unwrap();
        assert_eq!(float.encoding(), SampleEncoding::Float32);
        let float64 = WaveFormat::from_bytes(&plain_format(FORMAT_TAG_IEEE_FLOAT, 2, 48000, 64)).unwrap();
        assert_eq!(float64.encoding(), SampleEncoding::Unknown);
        let pcm8 = WaveFormat::from_bytes(&plain_format(FORMAT_TAG_PCM, 1, 8000, 8)).unwrap();
        assert_eq!(pcm8.encoding(), SampleEncoding::Unknown);
    }

    #[test]
    fn extensible_float_stereo() {
        let format = WaveFormat::extensible(SampleEncoding::Float32, 2, 44100);
        assert_eq!(format.as_bytes().len(), EXTENSIBLE_FORMAT_SIZE);
        assert_eq!(format.format_tag(), FORMAT_TAG_EXTENSIBLE);
        assert_eq!(format.sub_format(), Some(SUBTYPE_IEEE_FLOAT));
        assert_eq!(
            format.mix_format(),
            MixFormat {
                channels: 2,
                sample_rate: 44100,
                block_align: 8,
                encoding: SampleEncoding::Float32,
            }
        );
        assert_eq!(format.avg_bytes_per_sec(), 352_800);
    }

    #[test]
    fn extensible_round_trips_through_bytes() {
        let format = WaveFormat::extensible(SampleEncoding::Int24, 6, 96000);
        let parsed = WaveFormat::from_bytes(format.as_bytes()).unwrap();
        assert_eq!(parsed.encoding(), SampleEncoding::Int24);
        assert_eq!(parsed.block_align(), 18);
    }

    #[test]
    fn short_blobs_are_rejected() {
        assert!(WaveFormat::from_bytes(&[0u8; 8]).is_err());
        let mut truncated = WaveFormat::extensible(SampleEncoding::Float32, 2, 48000).as_bytes().to_vec();
        truncated.truncate(24);
        assert!(WaveFormat::from_bytes(&truncated).is_err());
    }

    #[test]
    fn with_sample_rate_updates_derived_fields() {
        let mut format = WaveFormat::extensible(SampleEncoding::Float32, 2, 44100);
        format.with_sample_rate(48000);
        assert_eq!(format.sample_rate(), 48000);
        assert_eq!(format.avg_bytes_per_sec(), 384_000);
        assert_eq!(format.block_align(), 8);
    }
}

//! Plaintext audio format identification.
//!
//! Decrypted output is named by what its first bytes say it is, never by the
//! input file's extension. The magic table below is frozen: these are the
//! exact prefixes the supported players write, including the fixed-size M4A
//! `ftyp` prefix.

/// The audio formats a decrypted payload can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Flac,
    Mp3,
    Ogg,
    M4a,
    Wav,
    Wma,
    Aac,
}

/// Magic prefixes, checked in order. First match wins.
const MAGIC_TABLE: &[(AudioFormat, &[u8])] = &[
    (AudioFormat::Flac, b"fLaC"),
    (AudioFormat::Mp3, b"ID3"),
    (AudioFormat::Ogg, b"OggS"),
    (AudioFormat::M4a, &[0x00, 0x00, 0x00, 0x1C, 0x66, 0x74, 0x79, 0x7D]),
    (AudioFormat::Wav, b"RIFF"),
    (AudioFormat::Wma, &[0x30, 0x26, 0xB2, 0x75]),
    (AudioFormat::Aac, &[0xFF, 0xF1, 0x50]),
];

impl AudioFormat {
    /// Identify a format from the leading bytes of a decrypted payload.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        MAGIC_TABLE
            .iter()
            .find(|(_, magic)| data.len() >= magic.len() && &data[..magic.len()] == *magic)
            .map(|(format, _)| *format)
    }

    /// Case-insensitive parse of a metadata format name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "flac" => Some(AudioFormat::Flac),
            "mp3" => Some(AudioFormat::Mp3),
            "ogg" => Some(AudioFormat::Ogg),
            "m4a" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            "wma" => Some(AudioFormat::Wma),
            "aac" => Some(AudioFormat::Aac),
            _ => None,
        }
    }

    /// Output file extension (no leading dot).
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Wma => "wma",
            AudioFormat::Aac => "aac",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Wma => "audio/x-ms-wma",
            AudioFormat::Aac => "audio/aac",
        }
    }
}

//! WAV helpers around raw s16le PCM.

use crate::{AudioClip, AudioFormat, CollaboratorError, Result};
use std::io::Cursor;
use std::path::Path;

/// Wrap a PCM clip in a RIFF/WAV container.
pub fn encode_wav(clip: AudioClip<'_>) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: clip.format.channels.max(1),
        sample_rate: clip.format.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(clip.pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CollaboratorError::Audio(e.to_string()))?;
        for sample in clip.samples() {
            writer
                .write_sample(sample)
                .map_err(|e| CollaboratorError::Audio(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| CollaboratorError::Audio(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Read a 16-bit integer WAV file into its format and raw s16le bytes.
pub fn read_wav_file(path: impl AsRef<Path>) -> Result<(AudioFormat, Vec<u8>)> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path)
        .map_err(|e| CollaboratorError::Audio(format!("{}: {e}", path.display())))?;
    decode(reader)
}

pub fn decode_wav(bytes: &[u8]) -> Result<(AudioFormat, Vec<u8>)> {
    let reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| CollaboratorError::Audio(e.to_string()))?;
    decode(reader)
}

fn decode<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<(AudioFormat, Vec<u8>)> {
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(CollaboratorError::Audio(format!(
            "expected 16-bit integer PCM, got {} bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let format = AudioFormat {
        sample_rate_hz: spec.sample_rate,
        channels: spec.channels,
    };
    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.into_samples::<i16>() {
        let sample = sample.map_err(|e| CollaboratorError::Audio(e.to_string()))?;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    Ok((format, pcm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_and_payload() {
        let format = AudioFormat::default();
        let pcm: Vec<u8> = (0..400i16).flat_map(|s| (s * 7).to_le_bytes()).collect();
        let wav = encode_wav(AudioClip::new(format, &pcm)).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let (decoded_format, decoded) = decode_wav(&wav).unwrap();
        assert_eq!(decoded_format, format);
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn test_rejects_float_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(0.5f32).unwrap();
            writer.finalize().unwrap();
        }
        assert!(matches!(
            decode_wav(&cursor.into_inner()),
            Err(CollaboratorError::Audio(_))
        ));
    }
}

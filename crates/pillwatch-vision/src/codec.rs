//! Lossless baseline codec: PNG wrapped in a base64 data URL.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, ImageFormat};
use pillwatch_types::{
    frame::{EncodedImage, RawImage},
    PillwatchError, Result,
};
use tracing::warn;

use crate::vision_error;

pub const DATA_URL_PREFIX: &str = "data:image/png;base64,";

pub fn encode(img: &RawImage) -> Result<EncodedImage> {
    if img.is_empty() || !img.is_well_formed() {
        return Err(vision_error(format!(
            "cannot encode {}x{} image with {} bytes",
            img.width,
            img.height,
            img.data.len()
        )));
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&img.data, img.width, img.height, ColorType::Rgba8)
        .map_err(|err| vision_error(format!("PNG encoding failed: {err}")))?;

    let mut out = String::with_capacity(DATA_URL_PREFIX.len() + png.len() * 4 / 3 + 4);
    out.push_str(DATA_URL_PREFIX);
    STANDARD.encode_string(&png, &mut out);
    Ok(EncodedImage::new(out))
}

/// Synchronous decode; prefer [`decode`] from async code.
pub fn decode_blocking(encoded: &EncodedImage) -> Result<RawImage> {
    let payload = encoded
        .as_str()
        .strip_prefix(DATA_URL_PREFIX)
        .ok_or_else(|| decode_error("missing PNG data URL prefix"))?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|err| decode_error(format!("invalid base64: {err}")))?;
    let img = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .map_err(|err| decode_error(format!("invalid PNG: {err}")))?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(decode_error("decoded image has zero dimensions"));
    }
    Ok(RawImage::from_rgba(width, height, rgba.into_raw()))
}

/// Decode off the async executor. `None` means the data is unusable as a baseline.
pub async fn decode(encoded: EncodedImage) -> Option<RawImage> {
    match tokio::task::spawn_blocking(move || decode_blocking(&encoded)).await {
        Ok(Ok(img)) => Some(img),
        Ok(Err(err)) => {
            warn!("baseline decode failed: {err}");
            None
        }
        Err(err) => {
            warn!("baseline decode task failed: {err}");
            None
        }
    }
}

pub fn decode_error(message: impl Into<String>) -> PillwatchError {
    PillwatchError::Decode(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RawImage {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[
                    (x * 37 % 256) as u8,
                    (y * 91 % 256) as u8,
                    ((x + y) * 13 % 256) as u8,
                    (255 - (x * 7 % 128)) as u8,
                ]);
            }
        }
        RawImage::from_rgba(width, height, data)
    }

    #[test]
    fn round_trip_is_lossless() {
        let img = gradient(23, 17);
        let encoded = encode(&img).expect("encode");
        assert!(encoded.as_str().starts_with(DATA_URL_PREFIX));

        let decoded = decode_blocking(&encoded).expect("decode");
        assert_eq!(decoded.dimensions(), img.dimensions());
        assert_eq!(decoded.data, img.data);
    }

    #[test]
    fn encoding_is_deterministic() {
        let img = gradient(8, 8);
        assert_eq!(encode(&img).expect("encode"), encode(&img).expect("encode"));
    }

    #[test]
    fn empty_image_cannot_be_encoded() {
        assert!(encode(&RawImage::empty()).is_err());
    }

    #[test]
    fn corrupt_data_is_a_decode_error() {
        let bad = [
            EncodedImage::new("hello"),
            EncodedImage::new(format!("{DATA_URL_PREFIX}!!!not-base64")),
            EncodedImage::new(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(b"not a png"))),
        ];
        for enc in &bad {
            assert!(matches!(decode_blocking(enc), Err(PillwatchError::Decode(_))));
        }
    }

    #[tokio::test]
    async fn async_decode_maps_failure_to_none() {
        let img = gradient(4, 3);
        let encoded = encode(&img).expect("encode");
        assert_eq!(decode(encoded).await.map(|d| d.data), Some(img.data));
        assert!(decode(EncodedImage::new("garbage")).await.is_none());
    }
}

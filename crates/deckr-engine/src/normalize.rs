use std::io::Cursor;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deckr_contracts::deck::{NormalizedImage, RawImage};
use image::{DynamicImage, ImageFormat};

/// Decodes whatever the renderer produced and re-encodes it as RGBA8 PNG so
/// every slide in a deck shares one byte format. Nothing is passed through
/// undecoded.
pub fn normalize_image(raw: &RawImage) -> Result<NormalizedImage> {
    let bytes = match raw {
        RawImage::Bytes { bytes, .. } => std::borrow::Cow::Borrowed(bytes.as_slice()),
        RawImage::DataUri(uri) => std::borrow::Cow::Owned(decode_data_uri(uri)?),
    };
    normalize_bytes(&bytes)
}

pub fn normalize_bytes(bytes: &[u8]) -> Result<NormalizedImage> {
    if bytes.is_empty() {
        bail!("renderer returned an empty image");
    }
    let decoded = image::load_from_memory(bytes).context("slide image decode failed")?;
    encode_png(decoded)
}

fn encode_png(decoded: DynamicImage) -> Result<NormalizedImage> {
    let rgba = DynamicImage::ImageRgba8(decoded.to_rgba8());
    let (width, height) = (rgba.width(), rgba.height());
    let mut png = Vec::new();
    rgba.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("slide image PNG encode failed")?;
    Ok(NormalizedImage { png, width, height })
}

/// Accepts `data:<mime>;base64,<payload>`; other data URI encodings are
/// rejected.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let Some(rest) = uri.trim().strip_prefix("data:") else {
        bail!("image data URI must start with 'data:'");
    };
    let Some((meta, payload)) = rest.split_once(',') else {
        bail!("image data URI is missing its payload");
    };
    if !meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        bail!("image data URI must be base64 encoded");
    }
    let cleaned: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
    BASE64
        .decode(cleaned.as_bytes())
        .context("image data URI base64 decode failed")
}

pub fn to_data_uri(image: &NormalizedImage) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(&image.png))
}

#[cfg(test)]
mod tests {
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    use super::*;

    fn sample_rgb(width: u32, height: u32) -> RgbImage {
        let mut image = RgbImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 40) as u8, (y * 60) as u8, 128]);
        }
        image
    }

    fn jpeg_bytes() -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90).encode_image(&sample_rgb(4, 3))?;
        Ok(out)
    }

    fn pixels(image: &NormalizedImage) -> Result<Vec<u8>> {
        Ok(image::load_from_memory(&image.png)?.to_rgba8().into_raw())
    }

    #[test]
    fn jpeg_input_becomes_png() -> Result<()> {
        let normalized = normalize_bytes(&jpeg_bytes()?)?;
        assert_eq!((normalized.width, normalized.height), (4, 3));
        assert_eq!(image::guess_format(&normalized.png)?, ImageFormat::Png);
        Ok(())
    }

    #[test]
    fn normalization_is_idempotent() -> Result<()> {
        let once = normalize_bytes(&jpeg_bytes()?)?;
        let twice = normalize_bytes(&once.png)?;
        assert_eq!(pixels(&once)?, pixels(&twice)?);
        assert_eq!((once.width, once.height), (twice.width, twice.height));
        Ok(())
    }

    #[test]
    fn data_uri_is_decoded() -> Result<()> {
        let once = normalize_bytes(&jpeg_bytes()?)?;
        let uri = to_data_uri(&once);
        let again = normalize_image(&RawImage::DataUri(uri))?;
        assert_eq!(pixels(&again)?, pixels(&once)?);
        Ok(())
    }

    #[test]
    fn garbage_bytes_fail() {
        let raw = RawImage::Bytes {
            bytes: b"definitely not an image".to_vec(),
            mime_type: Some("image/png".to_string()),
        };
        assert!(normalize_image(&raw).is_err());
        assert!(normalize_bytes(&[]).is_err());
    }

    #[test]
    fn malformed_data_uris_fail() {
        assert!(decode_data_uri("image/png;base64,AAAA").is_err());
        assert!(decode_data_uri("data:image/png;base64").is_err());
        assert!(decode_data_uri("data:image/svg+xml,<svg/>").is_err());
        assert!(decode_data_uri("data:image/png;base64,@@@").is_err());
    }
}

//! Cover image lookup, decoding and descriptor composition.
//!
//! A descriptor is the media server's serialized image record:
//! `<path>*<ticks>*Primary*<width>*<height>*<blurhash>`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use log::debug;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::blurhash;
use crate::media_file_discovery::find_file_named_like;

pub const BLURHASH_MAX_COMPONENTS: u32 = 5;
/// The server hashes a copy scaled to this many pixels per horizontal component.
pub const DOWNSCALE_PX_PER_COMPONENT: u32 = 32;
pub const IMAGE_TYPE_TAG: &str = "Primary";
/// 100ns ticks between 0001-01-01 and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Result of looking for and hashing a folder's cover image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverLookup {
    /// No file in the folder matched the configured name.
    NotFound,
    /// A file matched but could not be turned into a descriptor.
    Unusable { path: PathBuf, reason: String },
    Found(ImageDescriptor),
}

impl CoverLookup {
    /// The stored descriptor text; empty when no usable image exists.
    pub fn descriptor_text(&self) -> String {
        match self {
            Self::Found(descriptor) => descriptor.to_string(),
            Self::NotFound | Self::Unusable { .. } => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub path: String,
    pub ticks: i64,
    pub width: u32,
    pub height: u32,
    pub hash: String,
}

impl std::fmt::Display for ImageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}*{}*{}*{}*{}*{}",
            self.path, self.ticks, IMAGE_TYPE_TAG, self.width, self.height, self.hash
        )
    }
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgb8(image))
}

fn decode_image_from_memory_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    // Primary decoder first; the non-strict JPEG path only rescues damaged files.
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_non_strict(bytes))
}

fn decode_image_from_path_with_fallback(path: &Path) -> Option<DynamicImage> {
    image::open(path).ok().or_else(|| {
        let bytes = fs::read(path).ok()?;
        decode_image_from_memory_with_fallback(&bytes)
    })
}

/// Component grid for an image, at most 5 per axis, following the aspect ratio.
pub fn blurhash_components(width: u32, height: u32) -> (u32, u32) {
    let max = BLURHASH_MAX_COMPONENTS;
    if width == 0 || height == 0 || width == height {
        return (max, max);
    }
    if width > height {
        let ratio = width / height;
        (max, (max / ratio).max(1))
    } else {
        let ratio = height / width;
        ((max / ratio).max(1), max)
    }
}

/// Size to hash at: scaled down to `target_height` keeping the aspect ratio,
/// or unchanged when the image is not taller than that.
fn downscaled_to_height(width: u32, height: u32, target_height: u32) -> (u32, u32) {
    let target_height = target_height.max(1);
    if height <= target_height {
        return (width, height);
    }
    let scaled_width =
        ((u64::from(width) * u64::from(target_height)) + (u64::from(height) / 2)) / u64::from(height);
    (scaled_width.max(1) as u32, target_height)
}

pub fn file_ticks(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let millis = match modified.duration_since(UNIX_EPOCH) {
        Ok(duration) => i64::try_from(duration.as_millis()).ok()?,
        Err(err) => -i64::try_from(err.duration().as_millis()).ok()?,
    };
    Some(millis * TICKS_PER_MILLISECOND + UNIX_EPOCH_TICKS)
}

/// Absolute, symlink-free path as the server stores it.
pub fn canonical_path_string(path: &Path) -> Option<String> {
    let canonical = fs::canonicalize(path).ok()?;
    let text = canonical.to_string_lossy().into_owned();
    // Windows returns verbatim paths; the server stores plain drive paths.
    if let Some(unc) = text.strip_prefix(r"\\?\UNC\") {
        return Some(format!(r"\\{unc}"));
    }
    Some(text.strip_prefix(r"\\?\").map(str::to_string).unwrap_or(text))
}

/// Builds the descriptor for an already located image file.
pub fn describe_image(image_path: &Path) -> Result<ImageDescriptor, String> {
    let decoded = decode_image_from_path_with_fallback(image_path)
        .ok_or_else(|| "unable to load image".to_string())?;
    if decoded.color().channel_count() != 3 {
        return Err(format!(
            "couldn't decode to 3 channel RGB ({:?})",
            decoded.color()
        ));
    }

    let (width, height) = decoded.dimensions();
    let (x_components, y_components) = blurhash_components(width, height);
    let (scaled_width, scaled_height) =
        downscaled_to_height(width, height, x_components * DOWNSCALE_PX_PER_COMPONENT);
    let scaled = if (scaled_width, scaled_height) == (width, height) {
        decoded.to_rgb8()
    } else {
        decoded
            .resize_exact(scaled_width, scaled_height, FilterType::Triangle)
            .to_rgb8()
    };
    debug!(
        "hashing {} at {}x{} with {}x{} components",
        image_path.display(),
        scaled.width(),
        scaled.height(),
        x_components,
        y_components
    );

    let hash = blurhash::encode(
        scaled.as_raw(),
        scaled.width(),
        scaled.height(),
        x_components,
        y_components,
    )
    .ok_or_else(|| "unable to encode blurhash".to_string())?;
    let path =
        canonical_path_string(image_path).ok_or_else(|| "unable to resolve path".to_string())?;
    let ticks =
        file_ticks(image_path).ok_or_else(|| "unable to read modification time".to_string())?;

    Ok(ImageDescriptor {
        path,
        ticks,
        width,
        height,
        hash,
    })
}

/// Looks in `directory` for the first file whose name contains `image_name`.
pub fn lookup_cover(directory: &Path, image_name: &str) -> CoverLookup {
    let image_path = match find_file_named_like(directory, image_name) {
        Ok(Some(path)) => path,
        Ok(None) => return CoverLookup::NotFound,
        Err(err) => {
            debug!("cover lookup in {} failed: {}", directory.display(), err);
            return CoverLookup::NotFound;
        }
    };

    match describe_image(&image_path) {
        Ok(descriptor) => CoverLookup::Found(descriptor),
        Err(reason) => CoverLookup::Unusable {
            path: image_path,
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{codecs::jpeg::JpegEncoder, ImageBuffer, ImageFormat, Rgb, RgbImage, Rgba};
    use std::time::SystemTime;

    fn unique_temp_dir(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after UNIX_EPOCH")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "mediadb_tweaker_image_{}_{}_{}",
            test_name,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 90])
        })
    }

    #[test]
    fn test_blurhash_components_follow_aspect_ratio() {
        assert_eq!(blurhash_components(600, 600), (5, 5));
        assert_eq!(blurhash_components(1000, 400), (5, 2));
        assert_eq!(blurhash_components(400, 1000), (2, 5));
        assert_eq!(blurhash_components(700, 600), (5, 5));
        assert_eq!(blurhash_components(5000, 100), (5, 1));
        assert_eq!(blurhash_components(100, 5000), (1, 5));
    }

    #[test]
    fn test_downscale_keeps_aspect_ratio() {
        assert_eq!(downscaled_to_height(1000, 500, 160), (320, 160));
        assert_eq!(downscaled_to_height(10, 1000, 32), (1, 32));
    }

    #[test]
    fn test_short_images_are_never_upscaled() {
        assert_eq!(downscaled_to_height(20_000, 10, 160), (20_000, 10));
        assert_eq!(downscaled_to_height(300, 160, 160), (300, 160));
    }

    #[test]
    fn test_wide_banner_hashes_at_decoded_size() {
        let dir = unique_temp_dir("banner");
        gradient(2_000, 10).save(dir.join("folder.png")).expect("png should save");

        let CoverLookup::Found(descriptor) = lookup_cover(&dir, "folder") else {
            panic!("expected a descriptor");
        };
        assert_eq!((descriptor.width, descriptor.height), (2_000, 10));
        // 2000x10 -> 5x1 components
        assert_eq!(descriptor.hash.len(), 4 + 2 * 5);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_descriptor_has_six_fields_with_original_dimensions() {
        let dir = unique_temp_dir("descriptor");
        let image_path = dir.join("folder.png");
        gradient(300, 200).save(&image_path).expect("png should save");

        let lookup = lookup_cover(&dir, "folder");
        let CoverLookup::Found(descriptor) = &lookup else {
            panic!("expected a descriptor, got {lookup:?}");
        };
        let text = lookup.descriptor_text();
        let fields: Vec<&str> = text.splitn(6, '*').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], canonical_path_string(&image_path).unwrap());
        assert_eq!(fields[1], descriptor.ticks.to_string());
        assert_eq!(fields[2], "Primary");
        assert_eq!(fields[3], "300");
        assert_eq!(fields[4], "200");
        assert_eq!(fields[5], descriptor.hash);
        // 300x200 -> 5x5 components
        assert_eq!(descriptor.hash.len(), 4 + 2 * 25);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_ticks_offset_unix_millis() {
        let dir = unique_temp_dir("ticks");
        let path = dir.join("folder.jpg");
        fs::write(&path, b"x").unwrap();

        let millis = fs::metadata(&path)
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        assert_eq!(file_ticks(&path), Some(millis * 10_000 + 621_355_968_000_000_000));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_rgba_image_is_unusable() {
        let dir = unique_temp_dir("rgba");
        let source = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(8, 8, Rgba([1, 2, 3, 255])));
        source
            .save_with_format(dir.join("folder.png"), ImageFormat::Png)
            .unwrap();

        assert!(matches!(
            lookup_cover(&dir, "folder"),
            CoverLookup::Unusable { .. }
        ));
        assert_eq!(lookup_cover(&dir, "folder").descriptor_text(), "");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_undecodable_and_missing_images() {
        let dir = unique_temp_dir("broken");
        fs::write(dir.join("folder.jpg"), b"definitely-not-an-image").unwrap();

        assert!(matches!(
            lookup_cover(&dir, "folder"),
            CoverLookup::Unusable { .. }
        ));
        assert_eq!(lookup_cover(&dir, "cover"), CoverLookup::NotFound);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_truncated_jpeg_decodes_through_fallback() {
        let mut encoded = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut encoded, 85);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(gradient(12, 9)))
                .expect("jpeg encoding should succeed");
        }
        encoded.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let decoded = decode_image_from_memory_with_fallback(&encoded)
            .expect("fallback decoder should decode jpeg bytes");
        assert_eq!(decoded.dimensions(), (12, 9));
        assert_eq!(decoded.color().channel_count(), 3);
    }
}

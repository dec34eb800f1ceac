//! BlurHash encoder for packed 8-bit RGB buffers.
//!
//! Produces the same strings as the reference encoder the media server uses,
//! so stored hashes compare equal to the ones it would compute itself.

use std::f32::consts::PI;

const BASE83_ALPHABET: &[u8; 83] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz#$%*+,-.:;=?@[]^_{|}~";

pub const MAX_COMPONENTS: u32 = 9;

fn encode_base83(value: u32, length: u32, out: &mut String) {
    for position in 1..=length {
        let digit = (value / 83u32.pow(length - position)) % 83;
        out.push(BASE83_ALPHABET[digit as usize] as char);
    }
}

fn srgb_to_linear(value: u8) -> f32 {
    let v = f32::from(value) / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(value: f32) -> u32 {
    let v = value.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        (v * 12.92 * 255.0 + 0.5) as u32
    } else {
        ((1.055 * v.powf(1.0 / 2.4) - 0.055) * 255.0 + 0.5) as u32
    }
}

fn sign_pow(value: f32, exponent: f32) -> f32 {
    value.abs().powf(exponent).copysign(value)
}

fn encode_dc(rgb: [f32; 3]) -> u32 {
    (linear_to_srgb(rgb[0]) << 16) + (linear_to_srgb(rgb[1]) << 8) + linear_to_srgb(rgb[2])
}

fn encode_ac(rgb: [f32; 3], maximum_value: f32) -> u32 {
    let quantise =
        |channel: f32| (sign_pow(channel / maximum_value, 0.5) * 9.0 + 9.5).floor().clamp(0.0, 18.0) as u32;
    quantise(rgb[0]) * 19 * 19 + quantise(rgb[1]) * 19 + quantise(rgb[2])
}

/// Encodes `pixels` (row-major RGB, 3 bytes per pixel, no padding).
///
/// Returns `None` when the component counts are outside `1..=9` or the buffer
/// does not match `width * height * 3`.
pub fn encode(
    pixels: &[u8],
    width: u32,
    height: u32,
    x_components: u32,
    y_components: u32,
) -> Option<String> {
    if !(1..=MAX_COMPONENTS).contains(&x_components)
        || !(1..=MAX_COMPONENTS).contains(&y_components)
        || width == 0
        || height == 0
    {
        return None;
    }
    let (w, h) = (width as usize, height as usize);
    if pixels.len() != w.checked_mul(h)?.checked_mul(3)? {
        return None;
    }

    let mut linear_lut = [0f32; 256];
    for (value, slot) in linear_lut.iter_mut().enumerate() {
        *slot = srgb_to_linear(value as u8);
    }

    let cos_x: Vec<Vec<f32>> = (0..x_components)
        .map(|i| {
            (0..w)
                .map(|x| (PI * i as f32 * x as f32 / width as f32).cos())
                .collect()
        })
        .collect();
    let cos_y: Vec<Vec<f32>> = (0..y_components)
        .map(|j| {
            (0..h)
                .map(|y| (PI * j as f32 * y as f32 / height as f32).cos())
                .collect()
        })
        .collect();

    let mut factors = Vec::with_capacity((x_components * y_components) as usize);
    for j in 0..y_components as usize {
        for i in 0..x_components as usize {
            let normalisation = if i == 0 && j == 0 { 1.0 } else { 2.0 };
            let mut sum = [0f32; 3];
            for y in 0..h {
                let row = &pixels[y * w * 3..(y + 1) * w * 3];
                for x in 0..w {
                    let basis = cos_x[i][x] * cos_y[j][y];
                    let pixel = &row[x * 3..x * 3 + 3];
                    sum[0] += basis * linear_lut[pixel[0] as usize];
                    sum[1] += basis * linear_lut[pixel[1] as usize];
                    sum[2] += basis * linear_lut[pixel[2] as usize];
                }
            }
            let scale = normalisation / (w * h) as f32;
            factors.push([sum[0] * scale, sum[1] * scale, sum[2] * scale]);
        }
    }

    let (dc, ac) = factors.split_first()?;
    let mut hash = String::with_capacity(6 + ac.len() * 2);
    encode_base83((x_components - 1) + (y_components - 1) * 9, 1, &mut hash);

    let maximum_value = if ac.is_empty() {
        encode_base83(0, 1, &mut hash);
        1.0
    } else {
        let actual_maximum = ac
            .iter()
            .flat_map(|factor| factor.iter())
            .fold(0f32, |max, value| max.max(value.abs()));
        let quantised_maximum = (actual_maximum * 166.0 - 0.5).floor().clamp(0.0, 82.0) as u32;
        encode_base83(quantised_maximum, 1, &mut hash);
        (quantised_maximum + 1) as f32 / 166.0
    };

    encode_base83(encode_dc(*dc), 4, &mut hash);
    for factor in ac {
        encode_base83(encode_ac(*factor, maximum_value), 2, &mut hash);
    }
    Some(hash)
}

#[cfg(test)]
mod tests {
    use super::{encode, encode_base83, linear_to_srgb, srgb_to_linear};

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        (0..width * height).flat_map(|_| rgb).collect()
    }

    #[test]
    fn test_base83_encoding_pads_to_length() {
        let mut out = String::new();
        encode_base83(0xFF_FF_FF, 4, &mut out);
        encode_base83(3_429, 2, &mut out);
        encode_base83(0, 1, &mut out);
        assert_eq!(out, "TSUAfQ0");
    }

    #[test]
    fn test_srgb_conversion_round_trips_extremes() {
        assert_eq!(linear_to_srgb(srgb_to_linear(0)), 0);
        assert_eq!(linear_to_srgb(srgb_to_linear(255)), 255);
        assert_eq!(linear_to_srgb(srgb_to_linear(128)), 128);
    }

    #[test]
    fn test_single_component_hash_of_white_and_black() {
        assert_eq!(encode(&solid(4, 4, [255, 255, 255]), 4, 4, 1, 1).as_deref(), Some("00TSUA"));
        assert_eq!(encode(&solid(4, 4, [0, 0, 0]), 4, 4, 1, 1).as_deref(), Some("000000"));
    }

    #[test]
    fn test_hash_length_follows_component_counts() {
        let pixels: Vec<u8> = (0..32u32 * 24)
            .flat_map(|index| {
                let value = (index % 251) as u8;
                [value, 255 - value, value / 2]
            })
            .collect();
        let hash = encode(&pixels, 32, 24, 5, 3).expect("hash should encode");
        assert_eq!(hash.len(), 4 + 2 * 5 * 3);
        // size flag: (5 - 1) + (3 - 1) * 9 = 22
        assert!(hash.starts_with('M'));
        assert_eq!(encode(&pixels, 32, 24, 5, 3), Some(hash));
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let pixels = solid(2, 2, [10, 20, 30]);
        assert_eq!(encode(&pixels, 2, 2, 0, 1), None);
        assert_eq!(encode(&pixels, 2, 2, 1, 10), None);
        assert_eq!(encode(&pixels, 3, 2, 1, 1), None);
        assert_eq!(encode(&[], 0, 0, 1, 1), None);
    }
}

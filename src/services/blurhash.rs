//! BlurHash encoder.
//!
//! Projects the image onto a small grid of cosine basis functions in linear
//! RGB, quantises the coefficients and packs them as base-83 text. The result
//! is short enough to ship inline with JSON and decodes client-side into a
//! blurred preview.

use std::f32::consts::PI;

const BASE83_CHARS: &[u8; 83] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz#$%*+,-.:;=?@[]^_{|}~";

/// Encode packed RGB8 pixels (`width * height * 3` bytes).
///
/// Returns `None` for component counts outside `1..=9`, an empty image, or a
/// buffer that does not match the dimensions.
pub fn encode(
    components_x: u32,
    components_y: u32,
    width: u32,
    height: u32,
    rgb: &[u8],
) -> Option<String> {
    if !(1..=9).contains(&components_x) || !(1..=9).contains(&components_y) {
        return None;
    }
    if width == 0 || height == 0 || rgb.len() != width as usize * height as usize * 3 {
        return None;
    }

    let (cx, cy) = (components_x as usize, components_y as usize);
    let (w, h) = (width as usize, height as usize);

    let cos_x = basis_table(cx, w);
    let cos_y = basis_table(cy, h);
    let linear = srgb_to_linear_table();

    // One pass over the pixels, accumulating every component at once.
    let mut factors = vec![[0f32; 3]; cx * cy];
    for y in 0..h {
        let row = &rgb[y * w * 3..(y + 1) * w * 3];
        for x in 0..w {
            let px = &row[x * 3..x * 3 + 3];
            let (r, g, b) = (
                linear[px[0] as usize],
                linear[px[1] as usize],
                linear[px[2] as usize],
            );
            for j in 0..cy {
                let by = cos_y[j * h + y];
                for i in 0..cx {
                    let basis = cos_x[i * w + x] * by;
                    let f = &mut factors[j * cx + i];
                    f[0] += basis * r;
                    f[1] += basis * g;
                    f[2] += basis * b;
                }
            }
        }
    }

    let scale = 1.0 / (w * h) as f32;
    for (idx, f) in factors.iter_mut().enumerate() {
        let normalisation = if idx == 0 { 1.0 } else { 2.0 };
        for c in f.iter_mut() {
            *c *= normalisation * scale;
        }
    }

    let dc = factors[0];
    let ac = &factors[1..];

    let mut hash = String::with_capacity(4 + 2 * factors.len());
    let size_flag = (components_x - 1) + (components_y - 1) * 9;
    push_base83(&mut hash, size_flag, 1);

    let maximum_value = if ac.is_empty() {
        push_base83(&mut hash, 0, 1);
        1.0
    } else {
        let actual_max = ac
            .iter()
            .flat_map(|f| f.iter())
            .fold(0f32, |m, v| m.max(v.abs()));
        let quantised = (actual_max * 166.0 - 0.5).floor().clamp(0.0, 82.0) as u32;
        push_base83(&mut hash, quantised, 1);
        (quantised as f32 + 1.0) / 166.0
    };

    push_base83(&mut hash, encode_dc(dc), 4);
    for f in ac {
        push_base83(&mut hash, encode_ac(*f, maximum_value), 2);
    }
    Some(hash)
}

/// `table[i * n + p] = cos(PI * i * p / n)`
fn basis_table(components: usize, n: usize) -> Vec<f32> {
    let mut table = Vec::with_capacity(components * n);
    for i in 0..components {
        for p in 0..n {
            table.push((PI * i as f32 * p as f32 / n as f32).cos());
        }
    }
    table
}

fn srgb_to_linear_table() -> [f32; 256] {
    let mut table = [0f32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let v = i as f32 / 255.0;
        *slot = if v <= 0.04045 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        };
    }
    table
}

fn linear_to_srgb(value: f32) -> u32 {
    let v = value.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        (v * 12.92 * 255.0 + 0.5) as u32
    } else {
        ((1.055 * v.powf(1.0 / 2.4) - 0.055) * 255.0 + 0.5) as u32
    }
}

fn encode_dc([r, g, b]: [f32; 3]) -> u32 {
    (linear_to_srgb(r) << 16) + (linear_to_srgb(g) << 8) + linear_to_srgb(b)
}

fn encode_ac([r, g, b]: [f32; 3], maximum_value: f32) -> u32 {
    let quant = |v: f32| {
        let signed = sign_pow(v / maximum_value, 0.5);
        (signed * 9.0 + 9.5).floor().clamp(0.0, 18.0) as u32
    };
    quant(r) * 19 * 19 + quant(g) * 19 + quant(b)
}

fn sign_pow(value: f32, exp: f32) -> f32 {
    value.abs().powf(exp).copysign(value)
}

fn push_base83(out: &mut String, value: u32, length: u32) {
    for i in 1..=length {
        let digit = (value / 83u32.pow(length - i)) % 83;
        out.push(BASE83_CHARS[digit as usize] as char);
    }
}

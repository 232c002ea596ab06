//! CPU rendition of the fragment effect chain.
//!
//! Mirrors the WGSL stage for stage so GPU frames can be checked against it.
//! Sampling follows the GPU sampler: bilinear, clamp-to-edge, texel centers
//! at half-integer positions.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::params::EffectParameters;

type Rgb = [f32; 3];

const LUMA: Rgb = [0.2126, 0.7152, 0.0722];

/// Renders `source` at `surface_size` the way the GPU program does.
pub fn render(source: &RgbaImage, params: &EffectParameters, surface_size: (u32, u32)) -> RgbaImage {
    let (width, height) = surface_size;
    let mut out = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return out;
    }
    let resolution = [width as f32, height as f32];
    let row_len = width as usize * 4;

    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / resolution[1];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let u = (x as f32 + 0.5) / resolution[0];
                let color = shade(source, params, resolution, [u, v]);
                for (dst, value) in px.iter_mut().zip(color) {
                    *dst = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
        });
    out
}

/// Radial outward displacement of `coord` by `distance * bulge`.
pub fn bulge_coord(coord: [f32; 2], bulge: f32) -> [f32; 2] {
    if bulge <= 0.0 {
        return coord;
    }
    let offset = [coord[0] - 0.5, coord[1] - 0.5];
    let dist = (offset[0] * offset[0] + offset[1] * offset[1]).sqrt();
    if dist <= 0.0 {
        return coord;
    }
    [
        coord[0] + offset[0] / dist * dist * bulge,
        coord[1] + offset[1] / dist * dist * bulge,
    ]
}

/// Floor-snaps `coord` to a grid of `pixelation / resolution` cells.
pub fn pixelate_coord(coord: [f32; 2], pixelation: f32, resolution: [f32; 2]) -> [f32; 2] {
    if pixelation <= 1.0 {
        return coord;
    }
    let cell = [pixelation / resolution[0], pixelation / resolution[1]];
    [
        (coord[0] / cell[0]).floor() * cell[0],
        (coord[1] / cell[1]).floor() * cell[1],
    ]
}

/// Coordinate hash used for noise; stable across frames.
pub fn rand(co: [f32; 2]) -> f32 {
    let dot = co[0] * 12.9898 + co[1] * 78.233;
    let v = dot.sin() * 43758.5453;
    v - v.floor()
}

fn shade(
    source: &RgbaImage,
    params: &EffectParameters,
    resolution: [f32; 2],
    tex_coord: [f32; 2],
) -> [f32; 4] {
    let coord = bulge_coord(tex_coord, params.bulge);
    let coord = pixelate_coord(coord, params.pixelation, resolution);

    let texel = sample_sharpened(source, coord, params.sharpness, resolution);
    let mut color: Rgb = [texel[0], texel[1], texel[2]];

    color[0] *= params.red_channel;
    color[1] *= params.green_channel;
    color[2] *= params.blue_channel;

    let gray = color[0] * LUMA[0] + color[1] * LUMA[1] + color[2] * LUMA[2];
    for c in &mut color {
        *c = gray + (*c - gray) * params.saturation;
        *c = (*c - 0.5) * params.contrast + 0.5;
        *c *= params.brightness;
    }

    if params.posterize > 1.0 {
        let steps = (32.0 / params.posterize).floor().max(2.0) - 1.0;
        for c in &mut color {
            *c = (c.clamp(0.0, 1.0) * steps + 0.5).floor() / steps;
        }
    }

    if params.noise > 0.0 {
        let n = rand(coord) * params.noise;
        for c in &mut color {
            *c += n;
        }
    }

    if params.glow_intensity > 0.0 {
        let glow = (color[0] * color[0] + color[1] * color[1] + color[2] * color[2]).sqrt();
        for c in &mut color {
            *c += *c * glow * params.glow_intensity;
        }
    }

    [color[0], color[1], color[2], texel[3]]
}

fn sample_sharpened(
    source: &RgbaImage,
    coord: [f32; 2],
    sharpness: f32,
    resolution: [f32; 2],
) -> [f32; 4] {
    let center = sample_bilinear(source, coord);
    if sharpness <= 0.0 {
        return center;
    }
    let (dx, dy) = (1.0 / resolution[0], 1.0 / resolution[1]);
    let neighbours = [
        sample_bilinear(source, [coord[0] + dx, coord[1]]),
        sample_bilinear(source, [coord[0] - dx, coord[1]]),
        sample_bilinear(source, [coord[0], coord[1] + dy]),
        sample_bilinear(source, [coord[0], coord[1] - dy]),
    ];
    let mut out = center;
    for c in 0..3 {
        let blur = neighbours.iter().map(|n| n[c]).sum::<f32>() * 0.25;
        out[c] = center[c] + sharpness * (center[c] - blur);
    }
    out
}

fn sample_bilinear(source: &RgbaImage, coord: [f32; 2]) -> [f32; 4] {
    let (w, h) = source.dimensions();
    let x = coord[0] * w as f32 - 0.5;
    let y = coord[1] * h as f32 - 0.5;
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);

    let fetch = |xi: f32, yi: f32| -> [f32; 4] {
        let px = (xi as i64).clamp(0, w as i64 - 1) as u32;
        let py = (yi as i64).clamp(0, h as i64 - 1) as u32;
        let Rgba(p) = *source.get_pixel(px, py);
        [
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ]
    };
    let (a, b) = (fetch(x0, y0), fetch(x0 + 1.0, y0));
    let (c, d) = (fetch(x0, y0 + 1.0), fetch(x0 + 1.0, y0 + 1.0));

    let mut out = [0.0; 4];
    for i in 0..4 {
        let top = a[i] + (b[i] - a[i]) * fx;
        let bottom = c[i] + (d[i] - c[i]) * fx;
        out[i] = top + (bottom - top) * fy;
    }
    out
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgba, RgbaImage};

    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255])
        })
    }

    fn min_run_length(img: &RgbaImage, y: u32) -> usize {
        let mut runs = Vec::new();
        let mut current = 1;
        for x in 1..img.width() {
            if img.get_pixel(x, y) == img.get_pixel(x - 1, y) {
                current += 1;
            } else {
                runs.push(current);
                current = 1;
            }
        }
        runs.push(current);
        runs.into_iter().min().unwrap_or(0)
    }

    fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
    }

    #[test]
    fn neutral_parameters_reproduce_source() {
        let src = gradient(32, 24);
        let out = render(&src, &EffectParameters::default(), (32, 24));
        assert_eq!(out, src);
    }

    #[test]
    fn noise_is_deterministic() {
        let src = gradient(32, 24);
        let mut params = EffectParameters::default();
        params.noise = 0.6;
        params.bulge = 0.4;
        let a = render(&src, &params, (32, 24));
        let b = render(&src, &params, (32, 24));
        assert_eq!(a, b);
        assert_ne!(a, src);
    }

    #[test]
    fn rand_stays_in_unit_interval() {
        for i in 0..200 {
            let r = rand([i as f32 / 200.0, 1.0 - i as f32 / 300.0]);
            assert!((0.0..1.0).contains(&r), "{r}");
        }
    }

    #[test]
    fn pixelation_run_length_grows_with_pixelation() {
        let src = gradient(64, 8);
        let mut previous = 0;
        for p in [2.0, 4.0, 8.0] {
            let mut params = EffectParameters::default();
            params.pixelation = p;
            let out = render(&src, &params, (64, 8));
            let run = min_run_length(&out, 4);
            assert_eq!(run, p as usize);
            assert!(run > previous);
            previous = run;
        }
    }

    #[test]
    fn pixelation_at_one_is_a_no_op() {
        let coord = [0.37, 0.81];
        assert_eq!(pixelate_coord(coord, 1.0, [64.0, 64.0]), coord);
    }

    #[test]
    fn zero_bulge_leaves_coordinates_unchanged() {
        for coord in [[0.1, 0.2], [0.5, 0.5], [0.9, 0.7]] {
            assert_eq!(bulge_coord(coord, 0.0), coord);
        }
        assert_eq!(bulge_coord([0.5, 0.5], 2.0), [0.5, 0.5]);
    }

    #[test]
    fn bulge_displacement_grows_with_distance_and_strength() {
        let center = [0.5, 0.5];
        let mut last = 0.0;
        for r in [0.05, 0.1, 0.2, 0.3, 0.45] {
            let coord = [0.5 + r, 0.5];
            let moved = distance(bulge_coord(coord, 0.5), coord);
            assert!(moved > last, "r={r} moved={moved}");
            last = moved;
        }

        let coord = [0.3, 0.65];
        let mut last = 0.0;
        for bulge in [0.1, 0.5, 1.0, 4.0] {
            let moved = distance(bulge_coord(coord, bulge), coord);
            assert!(moved > last, "bulge={bulge} moved={moved}");
            last = moved;
        }
        // Displacement is radial: the warped point stays on the same ray.
        let warped = bulge_coord(coord, 1.0);
        let before = (coord[1] - center[1]).atan2(coord[0] - center[0]);
        let after = (warped[1] - center[1]).atan2(warped[0] - center[0]);
        assert!((before - after).abs() < 1e-5);
    }

    #[test]
    fn saturation_zero_is_grayscale() {
        let src = gradient(16, 16);
        let mut params = EffectParameters::default();
        params.saturation = 0.0;
        let out = render(&src, &params, (16, 16));
        for px in out.pixels() {
            assert!(px[0].abs_diff(px[1]) <= 1 && px[1].abs_diff(px[2]) <= 1);
        }
    }

    #[test]
    fn contrast_pivots_on_midpoint_before_brightness() {
        let src = ImageBuffer::from_pixel(2, 2, Rgba([153, 153, 153, 255]));
        let mut params = EffectParameters::default();
        params.contrast = 2.0;
        params.brightness = 0.5;
        let out = render(&src, &params, (2, 2));
        // ((0.6 - 0.5) * 2 + 0.5) * 0.5 = 0.35
        assert_eq!(out.get_pixel(0, 0)[0], (0.35_f32 * 255.0).round() as u8);
    }

    #[test]
    fn glow_brightens_bright_pixels_more() {
        let mut src = ImageBuffer::from_pixel(2, 1, Rgba([40, 40, 40, 255]));
        src.put_pixel(1, 0, Rgba([140, 140, 140, 255]));
        let mut params = EffectParameters::default();
        params.glow_intensity = 0.5;
        let out = render(&src, &params, (2, 1));
        let dark_gain = out.get_pixel(0, 0)[0] as i32 - 40;
        let bright_gain = out.get_pixel(1, 0)[0] as i32 - 140;
        assert!(bright_gain > dark_gain && dark_gain > 0);
    }

    #[test]
    fn output_is_clamped_and_alpha_passes_through() {
        let src = ImageBuffer::from_pixel(4, 4, Rgba([250, 10, 128, 77]));
        let mut params = EffectParameters::default();
        params.brightness = 10.0;
        params.red_channel = 10.0;
        let out = render(&src, &params, (4, 4));
        let px = out.get_pixel(2, 2);
        assert_eq!(px[0], 255);
        assert_eq!(px[3], 77);
    }

    #[test]
    fn sharpness_accentuates_edges() {
        let mut src = ImageBuffer::from_pixel(8, 1, Rgba([200u8, 200, 200, 255]));
        for x in 0..4 {
            src.put_pixel(x, 0, Rgba([50, 50, 50, 255]));
        }
        let mut params = EffectParameters::default();
        params.sharpness = 1.0;
        let out = render(&src, &params, (8, 1));
        assert!(out.get_pixel(3, 0)[0] < 50);
        assert!(out.get_pixel(4, 0)[0] > 200);
        assert_eq!(out.get_pixel(0, 0)[0], 50);
    }

    #[test]
    fn posterize_limits_distinct_levels() {
        let src: RgbaImage = ImageBuffer::from_fn(256, 1, |x, _| Rgba([x as u8, 0, 0, 255]));
        let mut params = EffectParameters::default();
        params.posterize = 8.0;
        let out = render(&src, &params, (256, 1));
        let mut levels: Vec<u8> = out.pixels().map(|p| p[0]).collect();
        levels.dedup();
        // floor(32 / 8) = 4 levels.
        assert_eq!(levels, vec![0, 85, 170, 255]);
    }
}

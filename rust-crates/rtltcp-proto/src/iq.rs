//! 8-bit unsigned I/Q quantization
//!
//! The stream carries interleaved `I, Q` bytes centred on 128. A component of
//! `c` in `[-1, 1]` becomes `round(128 + c * 127)`, clamped to `0..=255`.

use crate::IqSample;

const CENTER: f32 = 128.0;
const SCALE: f32 = 127.0;

/// Quantize one component. Out-of-range values clamp, NaN maps to 0.
#[inline]
pub fn quantize_component(c: f32) -> u8 {
    let v = (CENTER + c * SCALE).round();
    if v.is_nan() {
        0
    } else {
        v.clamp(0.0, 255.0) as u8
    }
}

#[inline]
pub fn dequantize_component(b: u8) -> f32 {
    (b as f32 - CENTER) / SCALE
}

/// Quantize complex samples to interleaved `I, Q` bytes
pub fn quantize(samples: &[IqSample]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.push(quantize_component(s.re));
        out.push(quantize_component(s.im));
    }
    out
}

/// Quantize interleaved signed 16-bit `I, Q` values (full scale = 32768)
pub fn quantize_i16(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| quantize_component(s as f32 / 32768.0))
        .collect()
}

/// Decode interleaved `I, Q` bytes. A trailing odd byte is ignored.
pub fn dequantize(bytes: &[u8]) -> Vec<IqSample> {
    bytes
        .chunks_exact(2)
        .map(|pair| IqSample::new(dequantize_component(pair[0]), dequantize_component(pair[1])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_quantize_reference_points() {
        assert_eq!(quantize_component(0.0), 128);
        assert_eq!(quantize_component(1.0), 255);
        assert_eq!(quantize_component(-1.0), 1);
        assert_eq!(quantize_component(0.5), 192); // 191.5 rounds up
    }

    #[test]
    fn test_quantize_clamps() {
        assert_eq!(quantize_component(2.0), 255);
        assert_eq!(quantize_component(-2.0), 0);
        assert_eq!(quantize_component(f32::INFINITY), 255);
        assert_eq!(quantize_component(f32::NEG_INFINITY), 0);
        assert_eq!(quantize_component(f32::NAN), 0);
    }

    #[test]
    fn test_quantize_stays_in_range() {
        for i in -1000..=1000 {
            let c = i as f32 / 1000.0;
            let b = quantize_component(c);
            assert!(b >= 1, "{} -> {}", c, b);
        }
    }

    #[test]
    fn test_interleaving() {
        let bytes = quantize(&[IqSample::new(1.0, -1.0), IqSample::new(0.0, 0.5)]);
        assert_eq!(bytes, vec![255, 1, 128, 192]);
    }

    #[test]
    fn test_quantize_i16() {
        assert_eq!(quantize_i16(&[0, i16::MIN, i16::MAX]), vec![128, 1, 255]);
    }

    #[test]
    fn test_dequantize() {
        let samples = dequantize(&[255, 1, 128, 0, 7]);
        assert_eq!(samples.len(), 2);
        assert_abs_diff_eq!(samples[0].re, 1.0);
        assert_abs_diff_eq!(samples[0].im, -1.0);
        assert_abs_diff_eq!(samples[1].re, 0.0);
        assert_abs_diff_eq!(samples[1].im, -128.0 / 127.0);
    }

    #[test]
    fn test_quantize_then_dequantize_is_close() {
        let input: Vec<IqSample> = (0..64)
            .map(|i| {
                let phase = i as f32 * 0.1;
                IqSample::new(phase.cos() * 0.9, phase.sin() * 0.9)
            })
            .collect();
        let output = dequantize(&quantize(&input));
        for (a, b) in input.iter().zip(&output) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 0.5 / 127.0 + 1e-6);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 0.5 / 127.0 + 1e-6);
        }
    }
}

use image::DynamicImage;
use imageproc::filter::laplacian_filter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inputs to the combined quality score. Brightness and sharpness are
/// optional because they are not computable for every capture path; a
/// missing input is omitted from the weighted sum rather than defaulted to
/// zero, so totals shrink only when data is genuinely unavailable.
#[derive(Debug, Clone, Copy)]
pub struct QualityInputs {
    pub face_size_px: u32,
    pub brightness: Option<f32>,
    pub sharpness: Option<f32>,
    pub features_detected: bool,
}

/// Weighted quality score in [0, 1].
///
/// Size saturates at `optimal_face_size` (weight 0.30), brightness peaks
/// inside [0.3, 0.8] and decays linearly outside (weight 0.25), sharpness is
/// taken directly (weight 0.25), detected features score 1.0 vs 0.5
/// (weight 0.20).
pub fn score(inputs: &QualityInputs, optimal_face_size: u32) -> f32 {
    let mut total = 0.0f32;

    let size_score = if inputs.face_size_px > 0 {
        (inputs.face_size_px as f32 / optimal_face_size as f32).min(1.0)
    } else {
        0.5
    };
    total += size_score * 0.30;

    if let Some(brightness) = inputs.brightness {
        let brightness_score = if (0.3..=0.8).contains(&brightness) {
            1.0
        } else if brightness < 0.3 {
            brightness / 0.3
        } else {
            1.0 - ((brightness - 0.8) / 0.2)
        };
        total += brightness_score.clamp(0.0, 1.0) * 0.25;
    }

    if let Some(sharpness) = inputs.sharpness {
        total += sharpness.clamp(0.0, 1.0) * 0.25;
    }

    let features_score = if inputs.features_detected { 1.0 } else { 0.5 };
    total += features_score * 0.20;

    total
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Fixed-threshold letter grade; `None` means no score available (N/A).
    pub fn from_score(score: Option<f32>) -> Option<Grade> {
        let score = score?;
        Some(if score >= 0.9 {
            Grade::A
        } else if score >= 0.8 {
            Grade::B
        } else if score >= 0.7 {
            Grade::C
        } else if score >= 0.6 {
            Grade::D
        } else {
            Grade::F
        })
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        write!(f, "{}", s)
    }
}

/// Pixel-level metrics computed from a decoded image, independent of any
/// face detection backend.
#[derive(Debug, Clone, Copy)]
pub struct ImageQuality {
    /// Mean luma in [0, 1].
    pub brightness: f32,
    /// Laplacian-variance focus measure, normalized and capped at 1.0.
    pub sharpness: f32,
}

impl ImageQuality {
    pub fn is_good_lighting(&self) -> bool {
        (0.3..=0.8).contains(&self.brightness)
    }

    pub fn is_sharp(&self) -> bool {
        self.sharpness >= 0.6
    }
}

/// Assess brightness and sharpness of a decoded image.
pub fn assess(image: &DynamicImage) -> ImageQuality {
    let gray = image.to_luma8();

    let pixel_count = (gray.width() * gray.height()).max(1) as f64;
    let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    let brightness = (sum as f64 / pixel_count / 255.0) as f32;

    // Focus measure: variance of the Laplacian response over the frame.
    let laplacian = laplacian_filter(&gray);
    let mean: f64 = laplacian.pixels().map(|p| p[0] as f64).sum::<f64>() / pixel_count;
    let variance: f64 = laplacian
        .pixels()
        .map(|p| {
            let d = p[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / pixel_count;
    let sharpness = ((variance / 1000.0) as f32).min(1.0);

    ImageQuality {
        brightness,
        sharpness,
    }
}

//! Template matching: given a sub-image and a set of loaded templates,
//! find the single best match by normalized cross-correlation.
//!
//! No computer-vision crate in the dependency stack provides this, so the
//! sliding search is implemented directly over byte buffers. Template-sized
//! inputs against window- or monitor-sized frames keep a naive
//! O(positions × template-pixels) scan cheap enough that no FFT-based
//! speedup is needed.

use std::path::{Path, PathBuf};

use image::GenericImageView;

use crate::error::AgentError;

/// A decoded template, in the same pixel format (grayscale or BGR) the
/// matcher will compare against.
#[derive(Debug, Clone)]
pub struct Template {
    pub path: PathBuf,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl Template {
    fn sample(&self, x: u32, y: u32, c: u8) -> f32 {
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize
            + c as usize;
        self.pixels[idx] as f32
    }
}

/// A sub-image handed to the matcher by the pipeline. The pipeline is
/// responsible for converting it to the same color space as the templates;
/// the matcher never converts.
pub struct MatchInput<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl<'a> MatchInput<'a> {
    fn sample(&self, x: u32, y: u32, c: u8) -> f32 {
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize
            + c as usize;
        self.pixels[idx] as f32
    }
}

/// Result of matching one input against a template set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub score: f32,
    pub top_left: (u32, u32),
    pub size: (u32, u32),
}

impl MatchResult {
    fn none() -> Self {
        MatchResult {
            score: 0.0,
            top_left: (0, 0),
            size: (0, 0),
        }
    }
}

/// Identifies a loaded Template Set so it can be skipped when unchanged.
/// Built from `(sorted_paths, grayscale, multi_scale, sorted_scales)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateSignature {
    sorted_paths: Vec<PathBuf>,
    grayscale: bool,
    multi_scale: bool,
    scales_bits: Vec<u32>,
}

impl TemplateSignature {
    pub fn compute(
        paths: &[PathBuf],
        grayscale: bool,
        multi_scale: bool,
        scales: &[f32],
    ) -> Self {
        let mut sorted_paths = paths.to_vec();
        sorted_paths.sort();
        let mut sorted_scales = scales.to_vec();
        sorted_scales.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        TemplateSignature {
            sorted_paths,
            grayscale,
            multi_scale,
            scales_bits: sorted_scales.iter().map(|s| s.to_bits()).collect(),
        }
    }
}

/// Ordered, immutable table of templates at every configured scale.
/// Insertion order is preserved so ties between templates are broken by
/// declaration order.
#[derive(Debug, Default)]
pub struct TemplateSet {
    signature: Option<TemplateSignature>,
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn signature(&self) -> Option<&TemplateSignature> {
        self.signature.as_ref()
    }

    /// Reloads from disk if `signature` differs from the cached one.
    /// Missing files are skipped and reported, not fatal unless every path
    /// is missing.
    pub fn reload_if_changed(
        &mut self,
        paths: &[PathBuf],
        grayscale: bool,
        multi_scale: bool,
        scales: &[f32],
    ) -> Result<(), AgentError> {
        let signature = TemplateSignature::compute(paths, grayscale, multi_scale, scales);
        if self.signature.as_ref() == Some(&signature) {
            return Ok(());
        }

        let mut templates = Vec::new();
        let mut skipped = Vec::new();

        for path in paths {
            match load_template(path, grayscale) {
                Ok(base) => {
                    if multi_scale {
                        for scale in scales {
                            if *scale <= 0.0 {
                                continue;
                            }
                            if let Some(scaled) = resize_template(&base, *scale) {
                                templates.push(scaled);
                            }
                        }
                    } else {
                        templates.push(base);
                    }
                }
                Err(e) => skipped.push(format!("{}: {e}", path.display())),
            }
        }

        if templates.is_empty() && !paths.is_empty() {
            return Err(AgentError::MatcherSkip {
                reason: format!("every template path failed to load: {}", skipped.join("; ")),
            });
        }
        if !skipped.is_empty() {
            tracing::warn!(skipped = %skipped.join("; "), "some templates were skipped");
        }

        self.templates = templates;
        self.signature = Some(signature);
        Ok(())
    }

    /// Matches `input` against every loaded template, returning the single
    /// best score. Ties are broken by template insertion order: the first
    /// template reaching the maximum score wins.
    pub fn best_match(&self, input: &MatchInput) -> MatchResult {
        let mut best = MatchResult::none();
        for template in &self.templates {
            if template.width > input.width || template.height > input.height {
                continue;
            }
            let candidate = match_template(input, template);
            if candidate.score > best.score {
                best = candidate;
            }
        }
        best
    }
}

fn load_template(path: &Path, grayscale: bool) -> Result<Template, AgentError> {
    let bytes = std::fs::read(path).map_err(|e| AgentError::MatcherSkip {
        reason: format!("could not read {}: {e}", path.display()),
    })?;
    let img = image::load_from_memory(&bytes).map_err(|e| AgentError::MatcherSkip {
        reason: format!("could not decode {}: {e}", path.display()),
    })?;
    let (width, height) = img.dimensions();

    if grayscale {
        let gray = img.to_luma8();
        Ok(Template {
            path: path.to_path_buf(),
            pixels: gray.into_raw(),
            width,
            height,
            channels: 1,
        })
    } else {
        let rgb = img.to_rgb8();
        let mut pixels = rgb.into_raw();
        // Store as BGR to match the capture backend's native byte order.
        for px in pixels.chunks_mut(3) {
            px.swap(0, 2);
        }
        Ok(Template {
            path: path.to_path_buf(),
            pixels,
            width,
            height,
            channels: 3,
        })
    }
}

/// Area-interpolated resize, skipping scales that would produce a
/// dimension under 2px.
fn resize_template(base: &Template, scale: f32) -> Option<Template> {
    let new_width = (base.width as f32 * scale).round() as u32;
    let new_height = (base.height as f32 * scale).round() as u32;
    if new_width < 2 || new_height < 2 {
        return None;
    }
    if new_width == base.width && new_height == base.height {
        return Some(base.clone());
    }

    let mut pixels = vec![0u8; new_width as usize * new_height as usize * base.channels as usize];
    for ny in 0..new_height {
        let sy = ((ny as f32 + 0.5) / scale).floor().min(base.height as f32 - 1.0) as u32;
        for nx in 0..new_width {
            let sx = ((nx as f32 + 0.5) / scale).floor().min(base.width as f32 - 1.0) as u32;
            for c in 0..base.channels {
                let value = base.sample(sx, sy, c) as u8;
                let idx = (ny as usize * new_width as usize + nx as usize) * base.channels as usize
                    + c as usize;
                pixels[idx] = value;
            }
        }
    }

    Some(Template {
        path: base.path.clone(),
        pixels,
        width: new_width,
        height: new_height,
        channels: base.channels,
    })
}

/// Normalized cross-correlation, `cv2.matchTemplate(..., TM_CCOEFF_NORMED)`
/// semantics: score per position is
/// `Σ(I-Ī)(T-T̄) / sqrt(Σ(I-Ī)² · Σ(T-T̄)²)`, with a zero denominator
/// (flat window or flat template) yielding `0.0` rather than `NaN`.
fn match_template(input: &MatchInput, template: &Template) -> MatchResult {
    debug_assert_eq!(
        input.channels, template.channels,
        "matcher input and template must share a pixel format"
    );

    let (tw, th) = (template.width, template.height);
    let template_mean = mean(template, tw, th);
    let template_centered_sq_sum = centered_sq_sum(template, tw, th, template_mean);

    let mut best = MatchResult::none();
    let max_x = input.width - tw;
    let max_y = input.height - th;

    for y in 0..=max_y {
        for x in 0..=max_x {
            let window_mean = window_mean(input, x, y, tw, th);
            let (numerator, window_sq_sum) =
                numerator_and_window_sq_sum(input, template, x, y, tw, th, window_mean, template_mean);

            let denom = (window_sq_sum * template_centered_sq_sum).sqrt();
            let score = if denom > 0.0 { numerator / denom } else { 0.0 };

            if score > best.score {
                best = MatchResult {
                    score,
                    top_left: (x, y),
                    size: (tw, th),
                };
            }
        }
    }

    best
}

fn mean(template: &Template, tw: u32, th: u32) -> f32 {
    let mut sum = 0.0f64;
    let n = (tw as u64 * th as u64 * template.channels as u64).max(1) as f64;
    for y in 0..th {
        for x in 0..tw {
            for c in 0..template.channels {
                sum += template.sample(x, y, c) as f64;
            }
        }
    }
    (sum / n) as f32
}

fn centered_sq_sum(template: &Template, tw: u32, th: u32, mean_val: f32) -> f32 {
    let mut sum = 0.0f64;
    for y in 0..th {
        for x in 0..tw {
            for c in 0..template.channels {
                let d = template.sample(x, y, c) - mean_val;
                sum += (d * d) as f64;
            }
        }
    }
    sum as f32
}

fn window_mean(input: &MatchInput, x0: u32, y0: u32, tw: u32, th: u32) -> f32 {
    let mut sum = 0.0f64;
    let n = (tw as u64 * th as u64 * input.channels as u64).max(1) as f64;
    for y in 0..th {
        for x in 0..tw {
            for c in 0..input.channels {
                sum += input.sample(x0 + x, y0 + y, c) as f64;
            }
        }
    }
    (sum / n) as f32
}

#[allow(clippy::too_many_arguments)]
fn numerator_and_window_sq_sum(
    input: &MatchInput,
    template: &Template,
    x0: u32,
    y0: u32,
    tw: u32,
    th: u32,
    window_mean_val: f32,
    template_mean_val: f32,
) -> (f32, f32) {
    let mut numerator = 0.0f64;
    let mut window_sq_sum = 0.0f64;
    for y in 0..th {
        for x in 0..tw {
            for c in 0..input.channels {
                let iv = input.sample(x0 + x, y0 + y, c) - window_mean_val;
                let tv = template.sample(x, y, c) - template_mean_val;
                numerator += (iv * tv) as f64;
                window_sq_sum += (iv * iv) as f64;
            }
        }
    }
    (numerator as f32, window_sq_sum as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_input(value: u8, width: u32, height: u32) -> Vec<u8> {
        vec![value; (width * height) as usize]
    }

    fn gray_template(pixels: Vec<u8>, width: u32, height: u32) -> Template {
        Template {
            path: PathBuf::from("test.png"),
            pixels,
            width,
            height,
            channels: 1,
        }
    }

    #[test]
    fn identical_template_scores_one_at_its_own_position() {
        // A 3x3 input identical to the template should score 1.0 at (0,0).
        let template = gray_template(vec![10, 200, 30, 40, 250, 60, 70, 80, 255], 3, 3);
        let input_pixels = template.pixels.clone();
        let input = MatchInput {
            pixels: &input_pixels,
            width: 3,
            height: 3,
            channels: 1,
        };
        let result = match_template(&input, &template);
        assert!((result.score - 1.0).abs() < 1e-3);
        assert_eq!(result.top_left, (0, 0));
    }

    #[test]
    fn flat_template_against_flat_window_scores_zero_not_nan() {
        let template = gray_template(vec![128; 9], 3, 3);
        let input_pixels = flat_input(128, 5, 5);
        let input = MatchInput {
            pixels: &input_pixels,
            width: 5,
            height: 5,
            channels: 1,
        };
        let result = match_template(&input, &template);
        assert_eq!(result.score, 0.0);
        assert!(!result.score.is_nan());
    }

    #[test]
    fn template_larger_than_input_is_skipped_by_template_set() {
        let mut set = TemplateSet::default();
        set.templates.push(gray_template(vec![1; 100], 10, 10));
        let input_pixels = flat_input(0, 4, 4);
        let input = MatchInput {
            pixels: &input_pixels,
            width: 4,
            height: 4,
            channels: 1,
        };
        let result = set.best_match(&input);
        assert_eq!(result, MatchResult::none());
    }

    #[test]
    fn empty_template_set_matches_nothing() {
        let set = TemplateSet::default();
        let input_pixels = flat_input(0, 4, 4);
        let input = MatchInput {
            pixels: &input_pixels,
            width: 4,
            height: 4,
            channels: 1,
        };
        assert_eq!(set.best_match(&input), MatchResult::none());
    }

    #[test]
    fn signature_is_stable_regardless_of_scale_declaration_order() {
        let paths = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        let sig_a = TemplateSignature::compute(&paths, true, true, &[1.0, 0.8, 1.25]);
        let sig_b = TemplateSignature::compute(&paths, true, true, &[1.25, 1.0, 0.8]);
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn resize_template_skips_scales_that_would_shrink_below_two_pixels() {
        let base = gray_template(vec![1; 9], 3, 3);
        assert!(resize_template(&base, 0.1).is_none());
    }

    #[test]
    fn best_match_prefers_earlier_template_on_tie() {
        // Two identical templates at the same position must tie; insertion
        // order decides the winner, so the first one found stays best
        // since `>` (not `>=`) is used when updating best.
        let mut set = TemplateSet::default();
        let t = gray_template(vec![10, 20, 30, 40], 2, 2);
        set.templates.push(t.clone());
        set.templates.push(t);
        let input_pixels = vec![10u8, 20, 30, 40];
        let input = MatchInput {
            pixels: &input_pixels,
            width: 2,
            height: 2,
            channels: 1,
        };
        let result = set.best_match(&input);
        assert!((result.score - 1.0).abs() < 1e-3);
    }
}

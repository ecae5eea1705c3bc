//! Per-pixel mixture-of-Gaussians background model on luma.
//!
//! Each pixel keeps up to `max_modes` Gaussians sorted by weight. A pixel is
//! background when it falls within `var_threshold` squared deviations of one of
//! the heaviest modes whose cumulative weight stays under `background_ratio`.
//! Unmatched values replace the lightest mode.

use image::GrayImage;

use crate::frame::FOREGROUND;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackgroundParams {
    /// Frames over which the learning rate settles.
    pub history: u32,
    /// Squared Mahalanobis distance for the background decision.
    pub var_threshold: f32,
    /// Squared Mahalanobis distance for matching a mode during update.
    pub var_threshold_gen: f32,
    pub max_modes: usize,
    pub background_ratio: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 16.0,
            var_threshold_gen: 9.0,
            max_modes: 5,
            background_ratio: 0.9,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Mode {
    weight: f32,
    mean: f32,
    var: f32,
}

/// Mutable per-stream background state. Reset when the camera session
/// restarts or the frame size changes.
pub struct BackgroundModel {
    params: BackgroundParams,
    width: u32,
    height: u32,
    modes: Vec<Mode>,
    used: Vec<u8>,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(params: BackgroundParams) -> Self {
        Self {
            params: BackgroundParams {
                max_modes: params.max_modes.clamp(1, u8::MAX as usize),
                ..params
            },
            width: 0,
            height: 0,
            modes: Vec::new(),
            used: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn params(&self) -> &BackgroundParams {
        &self.params
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn reset(&mut self) {
        self.width = 0;
        self.height = 0;
        self.modes.clear();
        self.used.clear();
        self.frames_seen = 0;
    }

    /// Classify `luma` against the model and fold it into the model.
    ///
    /// Returns the raw foreground mask (0 / 255). The first frame after a reset
    /// seeds the model and is reported as all background.
    pub fn apply(&mut self, luma: &GrayImage) -> GrayImage {
        let (width, height) = luma.dimensions();
        if self.frames_seen == 0 || width != self.width || height != self.height {
            if self.frames_seen != 0 {
                log::debug!(
                    "background model resized {}x{} -> {}x{}",
                    self.width,
                    self.height,
                    width,
                    height
                );
            }
            self.seed(luma);
            return GrayImage::new(width, height);
        }

        self.frames_seen += 1;
        let span = (2 * self.frames_seen).min(self.params.history.max(1) as u64);
        let alpha = 1.0 / span as f32;

        let k = self.params.max_modes;
        let mut mask = GrayImage::new(width, height);
        for (idx, (value, out)) in luma
            .as_raw()
            .iter()
            .zip(mask.iter_mut())
            .enumerate()
        {
            let modes = &mut self.modes[idx * k..(idx + 1) * k];
            let used = &mut self.used[idx];
            if !update_pixel(&self.params, modes, used, *value as f32, alpha) {
                *out = FOREGROUND;
            }
        }
        mask
    }

    fn seed(&mut self, luma: &GrayImage) {
        let (width, height) = luma.dimensions();
        let k = self.params.max_modes;
        let pixels = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.modes = vec![Mode::default(); pixels * k];
        self.used = vec![1; pixels];
        for (idx, value) in luma.as_raw().iter().enumerate() {
            self.modes[idx * k] = Mode {
                weight: 1.0,
                mean: *value as f32,
                var: self.params.var_init,
            };
        }
        self.frames_seen = 1;
    }
}

/// Update one pixel's modes. Returns true when the value is background.
fn update_pixel(
    params: &BackgroundParams,
    modes: &mut [Mode],
    used: &mut u8,
    value: f32,
    alpha: f32,
) -> bool {
    let n = *used as usize;
    let mut background = false;
    let mut matched = false;
    let mut total_weight = 0.0f32;

    for mode in modes.iter_mut().take(n) {
        let mut weight = (1.0 - alpha) * mode.weight;
        if !matched {
            let diff = value - mode.mean;
            let d2 = diff * diff;
            if total_weight < params.background_ratio && d2 < params.var_threshold * mode.var {
                background = true;
            }
            if d2 < params.var_threshold_gen * mode.var {
                matched = true;
                weight += alpha;
                let rate = alpha / weight;
                mode.mean += rate * diff;
                mode.var = (mode.var + rate * (d2 - mode.var))
                    .clamp(params.var_min, params.var_max);
            }
        }
        mode.weight = weight;
        total_weight += weight;
    }

    if !matched {
        let slot = if n < modes.len() {
            *used += 1;
            n
        } else {
            total_weight -= modes[n - 1].weight;
            n - 1
        };
        modes[slot] = Mode {
            weight: alpha,
            mean: value,
            var: params.var_init,
        };
        total_weight += alpha;
    }

    let n = *used as usize;
    if total_weight > 0.0 {
        for mode in modes.iter_mut().take(n) {
            mode.weight /= total_weight;
        }
    }

    // Heaviest first; n is tiny so insertion sort.
    for i in 1..n {
        let mut j = i;
        while j > 0 && modes[j - 1].weight < modes[j].weight {
            modes.swap(j - 1, j);
            j -= 1;
        }
    }

    background
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn first_frame_seeds_without_foreground() {
        let mut model = BackgroundModel::new(BackgroundParams::default());
        let luma = GrayImage::from_pixel(8, 8, Luma([90]));
        let mask = model.apply(&luma);
        assert!(mask.pixels().all(|p| p.0[0] == 0));
        assert_eq!(model.frames_seen(), 1);
    }

    #[test]
    fn sudden_change_is_foreground_then_absorbed() {
        let mut model = BackgroundModel::new(BackgroundParams::default());
        let dark = GrayImage::from_pixel(4, 4, Luma([20]));
        let bright = GrayImage::from_pixel(4, 4, Luma([220]));
        model.apply(&dark);
        for _ in 0..5 {
            model.apply(&dark);
        }
        let mask = model.apply(&bright);
        assert!(mask.pixels().all(|p| p.0[0] == FOREGROUND));

        let mut absorbed = false;
        for _ in 0..200 {
            if model.apply(&bright).pixels().all(|p| p.0[0] == 0) {
                absorbed = true;
                break;
            }
        }
        assert!(absorbed, "a static scene change must become background");
    }

    #[test]
    fn resize_reseeds() {
        let mut model = BackgroundModel::new(BackgroundParams::default());
        model.apply(&GrayImage::from_pixel(4, 4, Luma([10])));
        model.apply(&GrayImage::from_pixel(4, 4, Luma([10])));
        let mask = model.apply(&GrayImage::from_pixel(6, 2, Luma([200])));
        assert_eq!(mask.dimensions(), (6, 2));
        assert_eq!(model.frames_seen(), 1);
    }
}

//! Minimum-tracking noise power estimator
//!
//! Per frequency bin, smooths the frame power, follows its minimum with a
//! slow rise, and decides between "speech present" and "noise only" by
//! comparing the smoothed power against a bin dependent threshold. The
//! noise estimate adapts quickly in noise-only bins and slowly elsewhere.

/// Number of bins for a 1024-point real FFT
pub const NUM_BINS: usize = 513;

/// Bins below this index use the low-frequency presence threshold
const LOW_BAND_BINS: usize = 39;

#[derive(Debug, Clone)]
pub struct NoiseEstimator {
    /// Noise adaptation smoothing
    ad: f32,
    /// Speech presence smoothing
    ap: f32,
    /// Power smoothing
    alpha: f32,
    presence: Vec<f32>,
    delta: Vec<f32>,
    noise_ps: Vec<f32>,
    pxk: Vec<f32>,
    pnk: Vec<f32>,
    pxk_old: Vec<f32>,
    pnk_old: Vec<f32>,
    first_frame: bool,
}

impl Default for NoiseEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseEstimator {
    pub fn new() -> Self {
        let delta = (0..NUM_BINS)
            .map(|i| if i < LOW_BAND_BINS { 1.0 } else { 1.5 })
            .collect();
        Self {
            ad: 0.95,
            ap: 0.2,
            alpha: 0.7,
            presence: vec![0.0; NUM_BINS],
            delta,
            noise_ps: vec![0.0; NUM_BINS],
            pxk: vec![0.0; NUM_BINS],
            pnk: vec![0.0; NUM_BINS],
            pxk_old: vec![0.0; NUM_BINS],
            pnk_old: vec![0.0; NUM_BINS],
            first_frame: true,
        }
    }

    /// Current noise power estimate per bin
    pub fn noise_ps(&self) -> &[f32] {
        &self.noise_ps
    }

    /// Feed one frame of bin powers
    pub fn update(&mut self, power: &[f32]) {
        if self.first_frame {
            self.first_frame = false;
            for buf in [
                &mut self.noise_ps,
                &mut self.pxk,
                &mut self.pnk,
                &mut self.pxk_old,
                &mut self.pnk_old,
            ] {
                buf.copy_from_slice(&power[..NUM_BINS]);
            }
            return;
        }

        for i in 0..NUM_BINS {
            let ps = power[i];
            self.pxk[i] = (self.pxk_old[i] - ps) * self.alpha + ps;
            self.pnk[i] = if self.pnk_old[i] < self.pxk[i] {
                -0.008 * self.pxk_old[i] + (0.02 * self.pxk[i] + 0.97 * self.pnk_old[i])
            } else {
                self.pxk[i]
            };
            self.pxk_old[i] = self.pxk[i];
            self.pnk_old[i] = self.pnk[i];
        }

        let comp_ap = 1.0 - self.ap;
        let comp_ad = 1.0 - self.ad;
        for i in 0..NUM_BINS {
            let srk = self.delta[i] * self.pnk[i] - self.pxk[i];
            let decayed = self.ap * self.presence[i];
            self.presence[i] = if srk < 0.0 { decayed + comp_ap } else { decayed };
            let adk = comp_ad * self.presence[i] + self.ad;
            self.noise_ps[i] = (self.noise_ps[i] - self.pxk[i]) * adk + self.pxk[i];
        }
    }
}

//! Render statistics (SPEC_FULL.md §10): peak, RMS, DC offset, and a
//! zero-crossing frequency estimate, printed by the CLI after a render.
//!
//! Adapted directly from `phonon::render::RenderStats`, generalized from
//! mono `f32` to interleaved stereo `i16` PCM.

#[derive(Debug, Clone, Copy)]
pub struct RenderStats {
    pub duration_secs: f32,
    pub frame_count: usize,
    pub rms: f32,
    pub peak: i16,
    pub dc_offset: f32,
    pub zero_crossings: usize,
}

impl RenderStats {
    /// `interleaved` is stereo int16; `sample_rate` is frames per second.
    pub fn from_samples(interleaved: &[i16], sample_rate: u32) -> Self {
        let frame_count = interleaved.len() / 2;
        if frame_count == 0 {
            return Self {
                duration_secs: 0.0,
                frame_count: 0,
                rms: 0.0,
                peak: 0,
                dc_offset: 0.0,
                zero_crossings: 0,
            };
        }

        // Mono-fold left+right for the summary statistics.
        let mono: Vec<f32> = interleaved
            .chunks_exact(2)
            .map(|f| (f[0] as f32 + f[1] as f32) * 0.5)
            .collect();

        let sum_squares: f64 = mono.iter().map(|&x| (x as f64) * (x as f64)).sum();
        let rms = ((sum_squares / mono.len() as f64).sqrt()) as f32;
        let peak = interleaved.iter().map(|&s| s.unsigned_abs()).max().unwrap_or(0).min(i16::MAX as u16) as i16;
        let dc_offset = mono.iter().sum::<f32>() / mono.len() as f32;

        let mut zero_crossings = 0;
        for w in mono.windows(2) {
            if (w[0] >= 0.0) != (w[1] >= 0.0) {
                zero_crossings += 1;
            }
        }

        Self {
            duration_secs: frame_count as f32 / sample_rate as f32,
            frame_count,
            rms,
            peak,
            dc_offset,
            zero_crossings,
        }
    }

    pub fn print_summary(&self) {
        println!("Render statistics:");
        println!("  Duration:        {:.3} s", self.duration_secs);
        println!("  Frames:          {}", self.frame_count);
        println!("  RMS:             {:.1}", self.rms);
        println!("  Peak:            {}", self.peak);
        println!("  DC offset:       {:.2}", self.dc_offset);
        println!("  Zero crossings:  {}", self.zero_crossings);
        if self.duration_secs > 0.0 {
            let est_freq = self.zero_crossings as f32 / (2.0 * self.duration_secs);
            println!("  Est. frequency:  {est_freq:.1} Hz");
        }
    }
}

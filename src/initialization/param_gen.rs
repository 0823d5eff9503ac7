/// A `ParamGen` generates values for the initial state of the model's weights.
pub trait ParamGen {
    /// Should sample at most `n` weights.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// The samples, or `None` once the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;

    /// Fills `out` from the generator.
    ///
    /// # Returns
    /// The amount of values written, smaller than `out.len()` if the generator ran out.
    fn fill(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;

        while written < out.len() {
            let Some(sample) = self.sample(out.len() - written) else {
                break;
            };

            out[written..written + sample.len()].copy_from_slice(&sample);
            written += sample.len();
        }

        written
    }
}

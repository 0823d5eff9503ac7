/// Maps a label and a predicted margin to a scalar loss.
pub trait LossFn {
    /// Returns the loss of predicting `margin` for a row labeled `label`.
    fn loss(&self, label: f32, margin: f32) -> f32;

    /// Returns the derivative of `loss` with respect to the margin.
    fn gradient(&self, label: f32, margin: f32) -> f32;
}

use machine_learning::Batch;
use ndarray::ArrayView2;

/// A finite, restartable stream of batches.
pub trait DataSource: Send {
    /// The maximum amount of bags per batch.
    fn batch_size(&self) -> usize;

    /// The amount of relation classes, the NA class included.
    fn rel_tot(&self) -> usize;

    /// The amount of distinct (entity pair, non-NA relation) facts.
    fn relfact_tot(&self) -> usize;

    /// The word embedding matrix, one row per vocabulary entry.
    fn word_vec_mat(&self) -> ArrayView2<'_, f32>;

    /// Rewinds the stream to its first batch.
    fn reset(&mut self);

    /// Returns the next batch, or `None` once the stream is exhausted.
    fn next_batch(&mut self) -> Option<Batch>;
}

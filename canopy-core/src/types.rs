/// Identifier for a segment in a [`crate::segment::SegmentTree`].
///
/// This is an index into the tree's segment arena, and is only meaningful
/// within the lifetime of a given tree. Slots freed by pruning are reused
/// by later branches.
pub type SegmentId = usize;

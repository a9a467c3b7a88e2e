use crate::state::Segment;

/// Split `[0, total_size)` into segments of `segment_size` bytes.
///
/// The result depends only on the two arguments, so a retried fetch always
/// addresses the same bytes. The last segment's `end` is `total_size` (see
/// [`Segment`]). A zero `segment_size` yields one segment for the whole file.
pub fn plan(total_size: u64, segment_size: u64) -> Vec<Segment> {
    if total_size == 0 {
        return vec![];
    }
    let segment_size = if segment_size == 0 {
        total_size
    } else {
        segment_size
    };

    let count = total_size.div_ceil(segment_size);
    let mut segments = Vec::with_capacity(count as usize);
    let mut start = 0;
    let mut index = 0;

    while start < total_size {
        let next = start.saturating_add(segment_size);
        let is_final = next >= total_size;
        let end = if is_final { total_size } else { next - 1 };
        segments.push(Segment {
            index,
            start,
            end,
            is_final,
        });
        start = next;
        index += 1;
    }

    segments
}

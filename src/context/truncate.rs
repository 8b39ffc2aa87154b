/// Bounds a token sequence to `max_len` for the encoder.
///
/// Sequences that already fit are returned unchanged. Otherwise the window is placed from the
/// first and last occurrence of `var`:
///
/// * if they are more than `max_len - 2 * left_offset` apart, the window starts `left_offset`
///   tokens before the first occurrence;
/// * otherwise it is centered on the midpoint of the two occurrences.
///
/// The window is shifted, never shrunk, to stay inside the sequence and to keep the first
/// occurrence off its boundaries. Its first and last tokens are then overwritten with `eos`.
/// Without any occurrence of `var` the window starts at the beginning of the sequence.
pub fn truncate<T: Copy + PartialEq>(
    idxs: &[T],
    max_len: usize,
    left_offset: usize,
    var: T,
    eos: T,
) -> Vec<T> {
    if idxs.len() <= max_len {
        return idxs.to_vec();
    }
    if max_len == 0 {
        return Vec::new();
    }

    let first = idxs.iter().position(|&t| t == var);
    let last = idxs.iter().rposition(|&t| t == var);
    let start = match (first, last) {
        (Some(first), Some(last)) => {
            let (first_i, last_i) = (first as isize, last as isize);
            let max = max_len as isize;
            let start = if last_i - first_i > max - 2 * left_offset as isize {
                first_i - left_offset as isize
            } else {
                (first_i + last_i) / 2 - max / 2
            };
            start.min(first_i - 1).max(first_i + 2 - max)
        }
        _ => 0,
    };
    let start = start.clamp(0, (idxs.len() - max_len) as isize) as usize;

    let mut window = idxs[start..start + max_len].to_vec();
    window[0] = eos;
    window[max_len - 1] = eos;
    window
}

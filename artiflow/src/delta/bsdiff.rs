//! bsdiff-4 style block diff with gzip-compressed blocks.
//!
//! Patch layout:
//!
//! | offset | length | contents                               |
//! |--------|--------|----------------------------------------|
//! | 0      | 8      | magic `BSDIFFGZ`                       |
//! | 8      | 8      | compressed control block length        |
//! | 16     | 8      | compressed diff block length           |
//! | 24     | 8      | size of the new file                   |
//! | 32     | ...    | control block, diff block, extra block |
//!
//! Integers are 8-byte sign-magnitude little-endian. The control block is a
//! list of `(diff length, extra length, old seek)` triples.

use crate::errors::{ArtiflowError, FormatError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Patch file magic.
pub const MAGIC: &[u8; 8] = b"BSDIFFGZ";

const HEADER_LEN: usize = 32;

/// Approximate peak memory needed to diff inputs of the given sizes.
#[must_use]
pub const fn diff_memory_estimate(old_len: usize, new_len: usize) -> usize {
    (old_len + 1)
        .saturating_mul(2 * std::mem::size_of::<isize>())
        .saturating_add(new_len.saturating_mul(3))
}

/// Computes a patch that turns `old` into `new`.
///
/// # Errors
///
/// `ResourceExhausted` if the estimated working memory exceeds
/// `memory_limit` or an allocation cannot be reserved.
pub fn diff(old: &[u8], new: &[u8], memory_limit: usize) -> Result<Vec<u8>> {
    let required = diff_memory_estimate(old.len(), new.len());
    if required > memory_limit {
        return Err(ArtiflowError::exhausted(format!(
            "diffing {} -> {} bytes needs about {required} bytes, limit is {memory_limit}",
            old.len(),
            new.len()
        )));
    }

    let mut sa = reserve::<isize>(old.len() + 1, "suffix array")?;
    sa.resize(old.len() + 1, 0);
    let mut rank = reserve::<isize>(old.len() + 1, "rank array")?;
    rank.resize(old.len() + 1, 0);
    qsufsort(&mut sa, &mut rank, old);
    drop(rank);

    let mut blocks = Blocks {
        ctrl: Vec::new(),
        diff: reserve(new.len(), "diff block")?,
        extra: reserve(new.len(), "extra block")?,
    };
    scan_matches(&sa, old, new, &mut blocks);

    let ctrl = gzip(&blocks.ctrl)?;
    let diff = gzip(&blocks.diff)?;
    let extra = gzip(&blocks.extra)?;

    let mut patch = reserve(HEADER_LEN + ctrl.len() + diff.len() + extra.len(), "patch")?;
    patch.extend_from_slice(MAGIC);
    patch.extend_from_slice(&offtout(len_i64(ctrl.len())));
    patch.extend_from_slice(&offtout(len_i64(diff.len())));
    patch.extend_from_slice(&offtout(len_i64(new.len())));
    patch.extend_from_slice(&ctrl);
    patch.extend_from_slice(&diff);
    patch.extend_from_slice(&extra);
    Ok(patch)
}

/// Applies a patch produced by [`diff`] to `old`.
///
/// # Errors
///
/// `Format(MalformedPatch)` if the patch is corrupt, `ResourceExhausted` if
/// the output would exceed `max_output` bytes.
pub fn patch(old: &[u8], patch: &[u8], max_output: usize) -> Result<Vec<u8>> {
    if patch.len() < HEADER_LEN || &patch[..8] != MAGIC {
        return Err(corrupt("bad header"));
    }
    let ctrl_len = header_len(patch, 8, "control block length")?;
    let diff_len = header_len(patch, 16, "diff block length")?;
    let new_size = header_len(patch, 24, "output size")?;
    if new_size > max_output {
        return Err(ArtiflowError::exhausted(format!(
            "patch output of {new_size} bytes exceeds limit {max_output}"
        )));
    }

    let ctrl_end = HEADER_LEN
        .checked_add(ctrl_len)
        .filter(|&end| end <= patch.len())
        .ok_or_else(|| corrupt("control block out of bounds"))?;
    let diff_end = ctrl_end
        .checked_add(diff_len)
        .filter(|&end| end <= patch.len())
        .ok_or_else(|| corrupt("diff block out of bounds"))?;

    let ctrl = gunzip(&patch[HEADER_LEN..ctrl_end], new_size.saturating_add(1).saturating_mul(24), "control block")?;
    let diff = gunzip(&patch[ctrl_end..diff_end], new_size, "diff block")?;
    let extra = gunzip(&patch[diff_end..], new_size, "extra block")?;

    let mut out = reserve::<u8>(new_size, "patch output")?;
    let (mut diff_pos, mut extra_pos) = (0usize, 0usize);
    let mut old_pos: i64 = 0;
    let mut triples = ctrl.chunks_exact(24);

    while out.len() < new_size {
        let triple = triples.next().ok_or_else(|| corrupt("control block ended early"))?;
        let add = usize::try_from(offtin(&triple[0..8])).map_err(|_| corrupt("negative diff length"))?;
        let copy = usize::try_from(offtin(&triple[8..16])).map_err(|_| corrupt("negative extra length"))?;
        let seek = offtin(&triple[16..24]);

        if out.len() + add > new_size || diff_pos + add > diff.len() {
            return Err(corrupt("diff run out of bounds"));
        }
        for (i, &delta) in diff[diff_pos..diff_pos + add].iter().enumerate() {
            let source = seek_by(old_pos, len_i64(i))?;
            let base = usize::try_from(source)
                .ok()
                .and_then(|at| old.get(at))
                .copied()
                .unwrap_or(0);
            out.push(delta.wrapping_add(base));
        }
        diff_pos += add;
        old_pos = seek_by(old_pos, len_i64(add))?;

        if out.len() + copy > new_size || extra_pos + copy > extra.len() {
            return Err(corrupt("extra run out of bounds"));
        }
        out.extend_from_slice(&extra[extra_pos..extra_pos + copy]);
        extra_pos += copy;
        old_pos = seek_by(old_pos, seek)?;
    }
    Ok(out)
}

struct Blocks {
    ctrl: Vec<u8>,
    diff: Vec<u8>,
    extra: Vec<u8>,
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::similar_names)]
fn scan_matches(sa: &[isize], old: &[u8], new: &[u8], blocks: &mut Blocks) {
    let old_size = old.len() as isize;
    let new_size = new.len() as isize;
    let old_at = |i: isize| old[i as usize];
    let new_at = |i: isize| new[i as usize];

    let (mut scan, mut len, mut pos) = (0isize, 0isize, 0isize);
    let (mut last_scan, mut last_pos, mut last_offset) = (0isize, 0isize, 0isize);

    while scan < new_size {
        let mut old_score = 0isize;
        scan += len;
        let mut scsc = scan;
        while scan < new_size {
            let (found_pos, found_len) = search(sa, old, &new[scan as usize..]);
            pos = found_pos as isize;
            len = found_len as isize;

            while scsc < scan + len {
                let at = scsc + last_offset;
                if (0..old_size).contains(&at) && old_at(at) == new_at(scsc) {
                    old_score += 1;
                }
                scsc += 1;
            }

            if (len == old_score && len != 0) || len > old_score + 8 {
                break;
            }

            let at = scan + last_offset;
            if (0..old_size).contains(&at) && old_at(at) == new_at(scan) {
                old_score -= 1;
            }
            scan += 1;
        }

        if len == old_score && scan != new_size {
            continue;
        }

        // extend the previous match forwards
        let (mut s, mut best, mut len_f) = (0isize, 0isize, 0isize);
        let mut i = 0isize;
        while last_scan + i < scan && last_pos + i < old_size {
            if old_at(last_pos + i) == new_at(last_scan + i) {
                s += 1;
            }
            i += 1;
            if s * 2 - i > best * 2 - len_f {
                best = s;
                len_f = i;
            }
        }

        // and the current match backwards
        let mut len_b = 0isize;
        if scan < new_size {
            let (mut s, mut best) = (0isize, 0isize);
            let mut i = 1isize;
            while scan >= last_scan + i && pos >= i {
                if old_at(pos - i) == new_at(scan - i) {
                    s += 1;
                }
                if s * 2 - i > best * 2 - len_b {
                    best = s;
                    len_b = i;
                }
                i += 1;
            }
        }

        if last_scan + len_f > scan - len_b {
            let overlap = (last_scan + len_f) - (scan - len_b);
            let (mut s, mut best, mut len_s) = (0isize, 0isize, 0isize);
            for i in 0..overlap {
                if new_at(last_scan + len_f - overlap + i) == old_at(last_pos + len_f - overlap + i) {
                    s += 1;
                }
                if new_at(scan - len_b + i) == old_at(pos - len_b + i) {
                    s -= 1;
                }
                if s > best {
                    best = s;
                    len_s = i + 1;
                }
            }
            len_f += len_s - overlap;
            len_b -= len_s;
        }

        for i in 0..len_f {
            blocks
                .diff
                .push(new_at(last_scan + i).wrapping_sub(old_at(last_pos + i)));
        }
        let extra_len = (scan - len_b) - (last_scan + len_f);
        let extra_start = (last_scan + len_f) as usize;
        blocks
            .extra
            .extend_from_slice(&new[extra_start..extra_start + extra_len as usize]);

        blocks.ctrl.extend_from_slice(&offtout(len_f as i64));
        blocks.ctrl.extend_from_slice(&offtout(extra_len as i64));
        blocks
            .ctrl
            .extend_from_slice(&offtout(((pos - len_b) - (last_pos + len_f)) as i64));

        last_scan = scan - len_b;
        last_pos = pos - len_b;
        last_offset = pos - scan;
    }
}

/// Larsson-Sadakane suffix sorting. `sa` and `rank` hold `old.len() + 1`
/// entries; on return `sa` is the suffix array including the empty suffix.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn qsufsort(sa: &mut [isize], rank: &mut [isize], old: &[u8]) {
    let n = old.len();
    let mut buckets = [0isize; 256];
    for &b in old {
        buckets[usize::from(b)] += 1;
    }
    for i in 1..256 {
        buckets[i] += buckets[i - 1];
    }
    for i in (1..256).rev() {
        buckets[i] = buckets[i - 1];
    }
    buckets[0] = 0;

    for (i, &b) in old.iter().enumerate() {
        buckets[usize::from(b)] += 1;
        sa[buckets[usize::from(b)] as usize] = i as isize;
    }
    sa[0] = n as isize;
    for (i, &b) in old.iter().enumerate() {
        rank[i] = buckets[usize::from(b)];
    }
    rank[n] = 0;
    for i in 1..256 {
        if buckets[i] == buckets[i - 1] + 1 {
            sa[buckets[i] as usize] = -1;
        }
    }
    sa[0] = -1;

    let done = -(n as isize + 1);
    let mut h = 1usize;
    while sa[0] != done {
        let mut len = 0isize;
        let mut i = 0usize;
        while i < n + 1 {
            if sa[i] < 0 {
                let sorted = -sa[i];
                len += sorted;
                i += sorted as usize;
            } else {
                if len != 0 {
                    sa[i - len as usize] = -len;
                }
                let group = (rank[sa[i] as usize] + 1) as usize - i;
                split(sa, rank, i, group, h);
                i += group;
                len = 0;
            }
        }
        if len != 0 {
            sa[i - len as usize] = -len;
        }
        h += h;
    }

    for i in 0..=n {
        sa[rank[i] as usize] = i as isize;
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn split(sa: &mut [isize], rank: &mut [isize], start: usize, len: usize, h: usize) {
    let key = |sa: &[isize], rank: &[isize], i: usize| rank[sa[i] as usize + h];

    if len < 16 {
        let mut k = start;
        while k < start + len {
            let mut j = 1usize;
            let mut x = key(sa, rank, k);
            let mut i = 1usize;
            while k + i < start + len {
                let value = key(sa, rank, k + i);
                if value < x {
                    x = value;
                    j = 0;
                }
                if value == x {
                    sa.swap(k + j, k + i);
                    j += 1;
                }
                i += 1;
            }
            for i in 0..j {
                rank[sa[k + i] as usize] = (k + j - 1) as isize;
            }
            if j == 1 {
                sa[k] = -1;
            }
            k += j;
        }
        return;
    }

    let x = key(sa, rank, start + len / 2);
    let (mut jj, mut kk) = (0usize, 0usize);
    for i in start..start + len {
        let value = key(sa, rank, i);
        if value < x {
            jj += 1;
        }
        if value == x {
            kk += 1;
        }
    }
    jj += start;
    kk += jj;

    let (mut i, mut j, mut k) = (start, 0usize, 0usize);
    while i < jj {
        let value = key(sa, rank, i);
        if value < x {
            i += 1;
        } else if value == x {
            sa.swap(i, jj + j);
            j += 1;
        } else {
            sa.swap(i, kk + k);
            k += 1;
        }
    }
    while jj + j < kk {
        if key(sa, rank, jj + j) == x {
            j += 1;
        } else {
            sa.swap(jj + j, kk + k);
            k += 1;
        }
    }

    if jj > start {
        split(sa, rank, start, jj - start, h);
    }
    for i in 0..kk - jj {
        rank[sa[jj + i] as usize] = (kk - 1) as isize;
    }
    if jj == kk - 1 {
        sa[jj] = -1;
    }
    if start + len > kk {
        split(sa, rank, kk, start + len - kk, h);
    }
}

/// Binary search over the suffix array for the longest match of `new`.
/// Returns `(position in old, match length)`.
#[allow(clippy::cast_sign_loss)]
fn search(sa: &[isize], old: &[u8], new: &[u8]) -> (usize, usize) {
    let (mut st, mut en) = (0usize, old.len());
    while en - st >= 2 {
        let mid = st + (en - st) / 2;
        let at = sa[mid] as usize;
        let n = (old.len() - at).min(new.len());
        if old[at..at + n] < new[..n] {
            st = mid;
        } else {
            en = mid;
        }
    }
    let (a, b) = (sa[st] as usize, sa[en] as usize);
    let x = match_len(&old[a..], new);
    let y = match_len(&old[b..], new);
    if x > y {
        (a, x)
    } else {
        (b, y)
    }
}

fn match_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn offtout(value: i64) -> [u8; 8] {
    let mut buf = value.unsigned_abs().to_le_bytes();
    if value < 0 {
        buf[7] |= 0x80;
    }
    buf
}

#[allow(clippy::cast_possible_wrap)]
fn offtin(buf: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    let negative = bytes[7] & 0x80 != 0;
    bytes[7] &= 0x7F;
    let magnitude = u64::from_le_bytes(bytes) as i64;
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn header_len(patch: &[u8], at: usize, what: &str) -> Result<usize> {
    usize::try_from(offtin(&patch[at..at + 8])).map_err(|_| corrupt(&format!("negative {what}")))
}

fn len_i64(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn reserve<T>(capacity: usize, what: &str) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity).map_err(|e| {
        ArtiflowError::exhausted(format!("cannot reserve {capacity} elements for {what}: {e}"))
    })?;
    Ok(buf)
}

fn gzip(block: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(block)?;
    Ok(encoder.finish()?)
}

fn gunzip(block: &[u8], limit: usize, what: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(block)
        .take(u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| corrupt(&format!("{what}: {e}")))?;
    if out.len() > limit {
        return Err(corrupt(&format!("{what} larger than the output")));
    }
    Ok(out)
}

fn seek_by(pos: i64, offset: i64) -> Result<i64> {
    pos.checked_add(offset).ok_or_else(|| corrupt("seek out of range"))
}

fn corrupt(message: &str) -> ArtiflowError {
    FormatError::MalformedPatch(message.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const LIMIT: usize = 64 * 1024 * 1024;

    fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    fn check(old: &[u8], new: &[u8]) -> Vec<u8> {
        let delta = diff(old, new, LIMIT).unwrap();
        assert_eq!(patch(old, &delta, LIMIT).unwrap(), new);
        delta
    }

    #[test]
    fn test_small_edit() {
        check(b"The quick brown fox jumps over the lazy dog", b"The quick red fox jumped over the lazy dogs");
    }

    #[test]
    fn test_empty_inputs() {
        check(b"", b"");
        check(b"", b"fresh content");
        check(b"old content", b"");
    }

    #[test]
    fn test_similar_large_inputs_give_small_patch() {
        let old = random_bytes(7, 64 * 1024);
        let mut new = old.clone();
        for i in (0..new.len()).step_by(4096) {
            new[i] = new[i].wrapping_add(1);
        }
        new.extend_from_slice(b"appended tail");

        let delta = check(&old, &new);
        assert!(delta.len() < new.len() / 10, "patch too large: {}", delta.len());
    }

    #[test]
    fn test_unrelated_inputs() {
        check(&random_bytes(1, 5000), &random_bytes(2, 7000));
    }

    #[test]
    fn test_repetitive_inputs() {
        let old = b"abcabcabcabcabcabcabcabc".repeat(50);
        let mut new = old.clone();
        new.splice(100..100, b"xyz".iter().copied());
        check(&old, &new);
    }

    #[test]
    fn test_memory_limit_is_resource_exhaustion() {
        let old = vec![0u8; 1024];
        let err = diff(&old, &old, 1024).unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[test]
    fn test_output_limit_is_resource_exhaustion() {
        let delta = diff(b"a", &[7u8; 4096], LIMIT).unwrap();
        assert!(patch(b"a", &delta, 100).unwrap_err().is_resource_exhausted());
    }

    #[test]
    fn test_corrupt_patch_rejected() {
        let delta = diff(b"hello world", b"hello there world", LIMIT).unwrap();

        let mut bad_magic = delta.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            patch(b"hello world", &bad_magic, LIMIT),
            Err(ArtiflowError::Format(FormatError::MalformedPatch(_)))
        ));

        assert!(matches!(
            patch(b"hello world", &delta[..delta.len() - 5], LIMIT),
            Err(ArtiflowError::Format(FormatError::MalformedPatch(_)))
        ));
    }

    #[test]
    fn test_overflowing_seek_rejected() {
        let ctrl: Vec<u8> = [(1, 0, i64::MAX), (1, 0, i64::MAX), (1, 0, 0)]
            .iter()
            .flat_map(|&(add, copy, seek)| [offtout(add), offtout(copy), offtout(seek)])
            .flatten()
            .collect();
        let (ctrl, diff_block, extra) = (gzip(&ctrl).unwrap(), gzip(&[0u8; 3]).unwrap(), gzip(&[]).unwrap());

        let mut crafted = MAGIC.to_vec();
        crafted.extend_from_slice(&offtout(len_i64(ctrl.len())));
        crafted.extend_from_slice(&offtout(len_i64(diff_block.len())));
        crafted.extend_from_slice(&offtout(3));
        crafted.extend_from_slice(&ctrl);
        crafted.extend_from_slice(&diff_block);
        crafted.extend_from_slice(&extra);

        let err = patch(b"abc", &crafted, LIMIT).unwrap_err();
        assert!(matches!(err, ArtiflowError::Format(FormatError::MalformedPatch(ref m)) if m.contains("seek")));
    }

    #[test]
    fn test_offt_encoding() {
        for value in [0i64, 1, -1, 255, -256, i64::MAX, -i64::MAX] {
            assert_eq!(offtin(&offtout(value)), value);
        }
        assert_eq!(offtout(-1)[7], 0x80);
    }
}

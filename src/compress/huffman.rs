//! Length-limited Huffman code construction for DEFLATE.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Maximum code length for literal/length and distance alphabets.
pub const MAX_CODE_LENGTH: usize = 15;

/// Maximum code length for the code-length alphabet.
pub const MAX_CL_CODE_LENGTH: usize = 7;

/// Huffman code: (code bits, length in bits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HuffmanCode {
    /// The code bits, MSB-first and right-aligned.
    pub code: u16,
    /// Number of bits in the code.
    pub length: u8,
}

/// Heap entry for tree construction; ties break on insertion order so the
/// resulting lengths are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapItem {
    frequency: u64,
    order: usize,
    node: usize,
}

/// Compute code lengths for `frequencies`, limited to `max_length` bits.
///
/// Symbols with zero frequency get length 0. The returned lengths always
/// describe a complete prefix code when at least two symbols are used, so
/// strict inflaters (zlib rejects incomplete sets) accept them. Callers that
/// might have fewer than two used symbols must pad the frequencies first,
/// see [`ensure_two_symbols`].
pub fn build_lengths(frequencies: &[u32], max_length: usize) -> Vec<u8> {
    let num_symbols = frequencies.len();
    let mut lengths = vec![0u8; num_symbols];

    let mut used: Vec<usize> = (0..num_symbols).filter(|&s| frequencies[s] > 0).collect();
    match used.len() {
        0 => return lengths,
        1 => {
            lengths[used[0]] = 1;
            return lengths;
        }
        _ => {}
    }

    // parent[i] for every node; leaves occupy 0..used.len()
    let mut parent: Vec<usize> = vec![usize::MAX; used.len() * 2 - 1];
    let mut heap: BinaryHeap<Reverse<HeapItem>> = used
        .iter()
        .enumerate()
        .map(|(i, &sym)| {
            Reverse(HeapItem {
                frequency: frequencies[sym] as u64,
                order: i,
                node: i,
            })
        })
        .collect();

    let mut next_node = used.len();
    while heap.len() > 1 {
        let (Some(Reverse(a)), Some(Reverse(b))) = (heap.pop(), heap.pop()) else {
            break;
        };
        parent[a.node] = next_node;
        parent[b.node] = next_node;
        heap.push(Reverse(HeapItem {
            frequency: a.frequency + b.frequency,
            order: next_node,
            node: next_node,
        }));
        next_node += 1;
    }

    // Depth of each node; internal nodes are created after their children,
    // so walking from the root downwards in reverse creation order works.
    let root = next_node - 1;
    let mut depth = vec![0usize; next_node];
    for node in (0..root).rev() {
        depth[node] = depth[parent[node]] + 1;
    }

    let longest = depth[..used.len()].iter().copied().max().unwrap_or(0);
    let mut bl_count = vec![0u32; longest.max(max_length) + 1];
    for &d in &depth[..used.len()] {
        bl_count[d] += 1;
    }

    // Move overlong leaves up while keeping the Kraft sum exactly 1.
    for len in (max_length + 1..=longest).rev() {
        while bl_count[len] > 0 {
            let mut j = len - 2;
            while bl_count[j] == 0 {
                j -= 1;
            }
            bl_count[len] -= 2;
            bl_count[len - 1] += 1;
            bl_count[j + 1] += 2;
            bl_count[j] -= 1;
        }
    }

    // Most frequent symbols receive the shortest codes.
    used.sort_by_key(|&s| (Reverse(frequencies[s]), s));
    let mut iter = used.iter();
    for (len, &count) in bl_count.iter().enumerate().skip(1) {
        for _ in 0..count {
            if let Some(&sym) = iter.next() {
                lengths[sym] = len as u8;
            }
        }
    }

    lengths
}

/// Give at least two symbols a non-zero frequency.
///
/// A single-symbol tree would produce an incomplete code; padding mirrors
/// what zlib does before building its trees.
pub fn ensure_two_symbols(frequencies: &mut [u32]) {
    let used = frequencies.iter().filter(|&&f| f > 0).count();
    let mut missing = 2usize.saturating_sub(used);
    for slot in frequencies.iter_mut() {
        if missing == 0 {
            break;
        }
        if *slot == 0 {
            *slot = 1;
            missing -= 1;
        }
    }
}

/// Build canonical codes for `frequencies` with a length limit.
pub fn build_codes(frequencies: &[u32], max_length: usize) -> Vec<HuffmanCode> {
    generate_canonical_codes(&build_lengths(frequencies, max_length))
}

/// Generate canonical Huffman codes from code lengths.
///
/// Shorter codes come before longer codes, and codes of the same length
/// are assigned in symbol order.
pub fn generate_canonical_codes(lengths: &[u8]) -> Vec<HuffmanCode> {
    let mut codes = vec![HuffmanCode::default(); lengths.len()];

    let mut bl_count = [0u32; MAX_CODE_LENGTH + 1];
    for &length in lengths {
        if length > 0 {
            bl_count[length as usize] += 1;
        }
    }

    let mut next_code = [0u16; MAX_CODE_LENGTH + 1];
    let mut code = 0u16;
    for bits in 1..=MAX_CODE_LENGTH {
        code = (code + bl_count[bits - 1] as u16) << 1;
        next_code[bits] = code;
    }

    for (symbol, &length) in lengths.iter().enumerate() {
        if length > 0 {
            codes[symbol] = HuffmanCode {
                code: next_code[length as usize],
                length,
            };
            next_code[length as usize] += 1;
        }
    }

    codes
}

/// Code lengths of the fixed literal/length code (RFC 1951, 3.2.6).
pub fn fixed_literal_lengths() -> [u8; 288] {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    lengths
}
